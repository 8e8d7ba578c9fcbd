use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use shared::{domain::UserId, error::ApiError};
use social_core::{
    DocumentUserDirectory, FollowError, FollowRelationshipService, FollowToggleController,
    InitialStateStrategy, ToggleOutcome, TracingNotifier,
};
use storage::{DocumentStore, Storage};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url};

#[derive(Parser, Debug)]
#[command(name = "socialctl", about = "Inspect and edit follow relationships")]
struct Cli {
    #[arg(long, default_value = "socialctl.toml")]
    config: PathBuf,
    /// Overrides the configured database url.
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    AddUser {
        user_id: String,
        name: String,
    },
    Follow {
        follower_id: String,
        following_id: String,
    },
    Unfollow {
        follower_id: String,
        following_id: String,
    },
    IsFollowing {
        follower_id: String,
        following_id: String,
    },
    Stats {
        user_id: String,
        #[arg(long)]
        viewer: Option<String>,
    },
    /// Mounts a follow button for (viewer, target) and presses it once.
    Toggle {
        viewer_id: String,
        target_id: String,
        #[arg(long, default_value_t = InitialStateStrategy::Query)]
        initial: InitialStateStrategy,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config);
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url)
        .await
        .map_err(|error| {
            error!(%database_url, %error, "failed to open SQLite database");
            error
        })?
        .with_page_size(settings.page_size);
    let store: Arc<dyn DocumentStore> = Arc::new(storage.clone());
    let service = Arc::new(FollowRelationshipService::new(
        store.clone(),
        settings.service_options(),
    ));

    match cli.command {
        Command::AddUser { user_id, name } => {
            storage
                .upsert_user(
                    &settings.users_collection,
                    &UserId::new(user_id.as_str()),
                    &name,
                )
                .await?;
            println!("saved user {user_id}");
        }
        Command::Follow {
            follower_id,
            following_id,
        } => {
            let edge = service
                .follow(&UserId::new(follower_id), &UserId::new(following_id))
                .await
                .map_err(report_failure)?;
            println!(
                "{} now follows {} (edge {})",
                edge.follower_id, edge.following_id, edge.id
            );
        }
        Command::Unfollow {
            follower_id,
            following_id,
        } => {
            service
                .unfollow(
                    &UserId::new(follower_id.as_str()),
                    &UserId::new(following_id.as_str()),
                )
                .await
                .map_err(report_failure)?;
            println!("{follower_id} no longer follows {following_id}");
        }
        Command::IsFollowing {
            follower_id,
            following_id,
        } => {
            let following = service
                .is_following(&UserId::new(follower_id), &UserId::new(following_id))
                .await
                .map_err(report_failure)?;
            println!("{following}");
        }
        Command::Stats { user_id, viewer } => {
            let user_id = UserId::new(user_id);
            let viewer = viewer.map(UserId::new).unwrap_or_else(|| user_id.clone());
            let stats = service
                .follow_stats(&viewer, &user_id)
                .await
                .map_err(report_failure)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Toggle {
            viewer_id,
            target_id,
            initial,
        } => {
            let directory = DocumentUserDirectory::new(store.clone())
                .with_collection(settings.users_collection.clone());
            let controller = FollowToggleController::new(
                UserId::new(viewer_id),
                UserId::new(target_id),
                service.clone(),
                Arc::new(TracingNotifier),
                Arc::new(directory),
            )
            .with_initial_state(initial.provider(service.clone()))
            .with_options(settings.controller_options());

            controller.mount().await;
            println!("before: {}", controller.view().label());
            match controller.toggle().await? {
                ToggleOutcome::Committed(_) => {}
                outcome => println!("toggle not applied: {outcome:?}"),
            }
            println!("after: {}", controller.view().label());
        }
    }

    Ok(())
}

/// Prints the failure as an `ApiError` on stderr before bailing out.
fn report_failure(error: FollowError) -> anyhow::Error {
    eprintln!("{}", api_error_json(&error));
    error.into()
}

fn api_error_json(error: &FollowError) -> String {
    let api = ApiError::from(error);
    serde_json::to_string(&api).unwrap_or_else(|_| api.to_string())
}
