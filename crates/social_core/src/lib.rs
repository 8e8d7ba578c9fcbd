//! Follow relationships between users and the toggle button that drives them.

pub mod collaborators;
pub mod controller;
pub mod error;
pub mod initial_state;
pub mod service;

#[cfg(test)]
mod test_support;

pub use collaborators::{
    DisplayNameLookup, DocumentUserDirectory, FollowChangeHook, Notifier, TracingNotifier,
    UserDirectory,
};
pub use controller::{
    ButtonStyle, ControllerOptions, FollowToggleController, FollowViewState, ToggleOutcome,
};
pub use error::{FollowError, PresentationError, ToggleFailure};
pub use initial_state::{
    AssumedInitialState, InitialStateProvider, InitialStateStrategy, RandomInitialState,
    ServiceInitialState,
};
pub use service::{FollowRelationshipService, ServiceOptions};
