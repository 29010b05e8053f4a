//! Model-backed transformation stages.
//!
//! Every stage receives the gateway explicitly and returns a typed value.
//! Dossier and cross-reference failures are fatal to a run. Venue and
//! coaching are enrichment: a malformed completion degrades to an empty
//! result, while an unreachable gateway still propagates.

pub mod chat;
pub mod coaching;
pub mod cross_reference;
pub mod dossier;
pub mod venue;

use serde::Serialize;

use crate::contract::ContractViolation;
use crate::gateway::GatewayError;

pub use chat::{coach_chat, ChatContext};
pub use coaching::{generate_coaching, try_generate_coaching, CoachingRequest};
pub use cross_reference::cross_reference;
pub use dossier::build_dossier;
pub use venue::{
    brainstorm_venue_queries, rank_venues, try_brainstorm, try_rank, VenueContext,
    MAX_RANKED_VENUES, MAX_VENUE_QUERIES,
};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("model gateway failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

impl StageError {
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, StageError::Contract(_))
    }
}

/// Pretty JSON for a request turn. A payload that cannot be encoded is a
/// request that cannot be sent, same as one over the input limit.
pub(crate) fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<String, GatewayError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| GatewayError::invalid_request(format!("request payload: {e}")))
}

/// Collapse a contract violation into `fallback`, keeping gateway failures.
pub(crate) fn fail_open<T>(
    stage: &'static str,
    result: Result<T, StageError>,
    fallback: impl FnOnce() -> T,
) -> Result<T, GatewayError> {
    match result {
        Ok(value) => Ok(value),
        Err(StageError::Gateway(err)) => Err(err),
        Err(StageError::Contract(violation)) => {
            tracing::warn!(stage, error = %violation, "malformed completion, using empty result");
            Ok(fallback())
        }
    }
}
