//! Device side of field intake: the durable outbox and the engine that
//! replays it against the ingestion endpoint.

pub mod auto_sync;
pub mod refresh;
pub mod store;
pub mod sync;
pub mod transport;

use thiserror::Error;

use crate::engine::validate::ValidationErrors;
use crate::models::outbox::IllegalTransition;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Invalid(#[from] ValidationErrors),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("sync task stopped unexpectedly: {0}")]
    Interrupted(String),
}

pub use store::OutboxStore;
pub use sync::{SkipReason, SyncAttempt, SyncEngine};
