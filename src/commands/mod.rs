pub mod action;
pub mod dispatcher;

use thiserror::Error;

use crate::host::HostError;

pub use action::{Action, ActionKind};
pub use dispatcher::Dispatcher;

/// Why an action produced a failure Result. The `Display` text is what the
/// controller sees in `error`.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("No active tab")]
    NoActiveTab,

    #[error("Invalid params for {action}: {reason}")]
    InvalidParams { action: &'static str, reason: String },

    #[error(transparent)]
    Host(#[from] HostError),
}
