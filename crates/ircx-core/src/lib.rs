pub mod config;
pub mod error;
pub mod types;

pub use error::{E2eeError, E2eeResult, KeyRef};
pub use types::{ConversationKind, ConversationRef};
