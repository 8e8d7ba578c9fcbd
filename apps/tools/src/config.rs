use std::{collections::HashMap, fs, path::Path, time::Duration};

use social_core::{ControllerOptions, ServiceOptions};

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub follows_collection: String,
    pub users_collection: String,
    pub degrade_on_error: bool,
    /// Zero disables the per-call timeout.
    pub call_timeout_ms: u64,
    pub failure_delay_ms: u64,
    pub page_size: u32,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/social.db".into(),
            follows_collection: "follows".into(),
            users_collection: "users".into(),
            degrade_on_error: true,
            call_timeout_ms: 10_000,
            failure_delay_ms: 1_000,
            page_size: storage::DEFAULT_PAGE_SIZE,
            log_level: "info".into(),
        }
    }
}

impl Settings {
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            collection: self.follows_collection.clone(),
            degrade_on_error: self.degrade_on_error,
            call_timeout: (self.call_timeout_ms > 0)
                .then(|| Duration::from_millis(self.call_timeout_ms)),
        }
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            failure_presentation_delay: Duration::from_millis(self.failure_delay_ms),
        }
    }
}

pub fn load_settings(path: &Path) -> Settings {
    let raw = fs::read_to_string(path).ok();
    resolve_settings(raw.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the optional TOML file, then environment variables.
pub fn resolve_settings(
    raw_file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = raw_file {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) {
            for (key, value) in file_cfg {
                let value = match value {
                    toml::Value::String(v) => v,
                    other => other.to_string(),
                };
                apply(&mut settings, &key, value);
            }
        }
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    for key in [
        "database_url",
        "follows_collection",
        "users_collection",
        "degrade_on_error",
        "call_timeout_ms",
        "failure_delay_ms",
        "page_size",
        "log_level",
    ] {
        if let Some(v) = env(&format!("APP__{}", key.to_ascii_uppercase())) {
            apply(&mut settings, key, v);
        }
    }

    settings
}

fn apply(settings: &mut Settings, key: &str, value: String) {
    match key {
        "database_url" => settings.database_url = value,
        "follows_collection" => settings.follows_collection = value,
        "users_collection" => settings.users_collection = value,
        "degrade_on_error" => {
            if let Ok(parsed) = value.parse::<bool>() {
                settings.degrade_on_error = parsed;
            }
        }
        "call_timeout_ms" => {
            if let Ok(parsed) = value.parse::<u64>() {
                settings.call_timeout_ms = parsed;
            }
        }
        "failure_delay_ms" => {
            if let Ok(parsed) = value.parse::<u64>() {
                settings.failure_delay_ms = parsed;
            }
        }
        "page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                settings.page_size = parsed;
            }
        }
        "log_level" => settings.log_level = value,
        _ => {}
    }
}

/// Plain paths become `sqlite://` urls; `Storage::new` creates the parent
/// directory.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
