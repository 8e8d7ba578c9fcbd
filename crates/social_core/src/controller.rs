//! Follow/Unfollow button state machine for one (viewer, target) pair.
//!
//! `Loading -> {Following, NotFollowing}`; a failed toggle passes through a
//! transient error presentation (shown as following) before a delayed
//! notification and a revert to not following.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};

use shared::{domain::UserId, protocol::Notification};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    collaborators::{DisplayNameLookup, FollowChangeHook, Notifier, UserDirectory},
    error::{PresentationError, ToggleFailure},
    initial_state::{InitialStateProvider, ServiceInitialState},
    service::FollowRelationshipService,
};

pub const DEFAULT_FAILURE_PRESENTATION_DELAY: Duration = Duration::from_millis(1000);

pub const FAILURE_DESCRIPTION: &str =
    "Something went wrong while talking to the server. Please try again in a moment.";

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// How long the transient state stays up before the failure is reported.
    pub failure_presentation_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            failure_presentation_delay: DEFAULT_FAILURE_PRESENTATION_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Disabled,
    Follow,
    Unfollow,
    TransientError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowViewState {
    pub is_following: bool,
    pub is_loading: bool,
    pub is_error_presentation: bool,
}

impl FollowViewState {
    pub fn loading() -> Self {
        Self {
            is_following: false,
            is_loading: true,
            is_error_presentation: false,
        }
    }

    pub fn label(&self) -> &'static str {
        if self.is_loading {
            "Loading..."
        } else if self.is_error_presentation || self.is_following {
            "Unfollow"
        } else {
            "Follow"
        }
    }

    pub fn style(&self) -> ButtonStyle {
        if self.is_loading {
            ButtonStyle::Disabled
        } else if self.is_error_presentation {
            ButtonStyle::TransientError
        } else if self.is_following {
            ButtonStyle::Unfollow
        } else {
            ButtonStyle::Follow
        }
    }

    pub fn is_interactive(&self) -> bool {
        !self.is_loading
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The remote call and the change hook succeeded; carries the new state.
    Committed(bool),
    /// Not started: still loading, another toggle in flight, or unmounted.
    Ignored,
    /// The call finished after the controller was unmounted.
    Discarded,
}

pub struct FollowToggleController {
    viewer_id: UserId,
    target_id: UserId,
    service: Arc<FollowRelationshipService>,
    initial_state: Arc<dyn InitialStateProvider>,
    notifier: Arc<dyn Notifier>,
    directory: Arc<dyn UserDirectory>,
    on_follow_change: Option<Arc<dyn FollowChangeHook>>,
    options: ControllerOptions,
    state: watch::Sender<FollowViewState>,
    target_name: OnceLock<String>,
    in_flight: AtomicBool,
    mounted: AtomicBool,
}

impl FollowToggleController {
    pub fn new(
        viewer_id: UserId,
        target_id: UserId,
        service: Arc<FollowRelationshipService>,
        notifier: Arc<dyn Notifier>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let (state, _) = watch::channel(FollowViewState::loading());
        Self {
            viewer_id,
            target_id,
            initial_state: Arc::new(ServiceInitialState::new(service.clone())),
            service,
            notifier,
            directory,
            on_follow_change: None,
            options: ControllerOptions::default(),
            state,
            target_name: OnceLock::new(),
            in_flight: AtomicBool::new(false),
            mounted: AtomicBool::new(true),
        }
    }

    pub fn with_initial_state(mut self, provider: Arc<dyn InitialStateProvider>) -> Self {
        self.initial_state = provider;
        self
    }

    pub fn with_follow_change_hook(mut self, hook: Arc<dyn FollowChangeHook>) -> Self {
        self.on_follow_change = Some(hook);
        self
    }

    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn view(&self) -> FollowViewState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<FollowViewState> {
        self.state.subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Name used in failure notifications; the raw target id until resolved.
    pub fn target_display_name(&self) -> &str {
        self.target_name
            .get()
            .map(String::as_str)
            .unwrap_or_else(|| self.target_id.as_str())
    }

    /// Resolves the starting follow state and the target's display name, then
    /// leaves the loading state. Spawn it; the button stays disabled until it
    /// returns.
    pub async fn mount(&self) {
        let (initial, lookup) = tokio::join!(
            self.initial_state
                .initial_state(&self.viewer_id, &self.target_id),
            self.directory.display_name(&self.target_id),
        );

        match lookup {
            Ok(DisplayNameLookup::Found(name)) => {
                let _ = self.target_name.set(name.0);
            }
            Ok(DisplayNameLookup::NotFound) => {
                debug!(target_id = %self.target_id, "target user not in directory");
            }
            Err(error) => {
                warn!(target_id = %self.target_id, %error, "error fetching target user's name");
            }
        }

        let is_following = initial.unwrap_or_else(|error| {
            warn!(
                viewer_id = %self.viewer_id,
                target_id = %self.target_id,
                %error,
                "error checking follow status"
            );
            false
        });

        if !self.is_mounted() {
            debug!(target_id = %self.target_id, "controller unmounted before initial state resolved");
            return;
        }
        self.state.send_modify(|state| {
            state.is_following = is_following;
            state.is_loading = false;
        });
    }

    /// Tears the controller down. In-flight calls run to completion but their
    /// results are not applied.
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    pub async fn toggle(&self) -> Result<ToggleOutcome, PresentationError> {
        if !self.is_mounted() || self.view().is_loading {
            return Ok(ToggleOutcome::Ignored);
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(target_id = %self.target_id, "toggle already in flight; ignoring");
            return Ok(ToggleOutcome::Ignored);
        }
        let _in_flight = InFlightGuard(&self.in_flight);

        let desired = !self.view().is_following;
        let remote = if desired {
            self.service
                .follow(&self.viewer_id, &self.target_id)
                .await
                .map(drop)
        } else {
            self.service.unfollow(&self.viewer_id, &self.target_id).await
        };

        if !self.is_mounted() {
            debug!(target_id = %self.target_id, "discarding toggle result for unmounted controller");
            return Ok(ToggleOutcome::Discarded);
        }

        let committed = match remote {
            Ok(()) => {
                self.state.send_modify(|state| state.is_following = desired);
                self.notify_follow_change(desired).await
            }
            Err(error) => Err(ToggleFailure::Service(error)),
        };

        match committed {
            Ok(()) => {
                info!(
                    viewer_id = %self.viewer_id,
                    target_id = %self.target_id,
                    is_following = desired,
                    "follow state changed"
                );
                Ok(ToggleOutcome::Committed(desired))
            }
            Err(cause) => Err(self.present_failure(cause).await),
        }
    }

    async fn notify_follow_change(&self, is_following: bool) -> Result<(), ToggleFailure> {
        match &self.on_follow_change {
            Some(hook) => hook
                .on_follow_change(is_following)
                .await
                .map_err(ToggleFailure::Hook),
            None => Ok(()),
        }
    }

    async fn present_failure(&self, cause: ToggleFailure) -> PresentationError {
        error!(
            viewer_id = %self.viewer_id,
            target_id = %self.target_id,
            error = %cause,
            "error toggling follow status"
        );

        self.state.send_modify(|state| {
            state.is_following = true;
            state.is_error_presentation = true;
        });

        tokio::time::sleep(self.options.failure_presentation_delay).await;

        if self.is_mounted() {
            self.notifier.notify(Notification::new(
                format!("Failed to follow {}", self.target_display_name()),
                FAILURE_DESCRIPTION,
            ));
            self.state.send_modify(|state| {
                state.is_following = false;
                state.is_error_presentation = false;
            });
        }

        PresentationError {
            target: self.target_id.clone(),
            cause,
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
