// src/chat/mod.rs
pub mod model;
pub mod reducer;
pub mod reform;
pub mod stream;

pub use reducer::{ChatAction, ChatStore, Outcome, SendRequest, TurnPhase};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    #[error("a reply is still streaming; wait for it to finish")]
    TurnInFlight,

    #[error("message is empty")]
    EmptyMessage,

    #[error("no such session: {0}")]
    UnknownSession(model::SessionId),
}
