//! Cross-reference stage: compare two dossiers.

use serde::Deserialize;
use serde_json::json;

use crate::contract::{self, Contract};
use crate::gateway::{Attribution, ChatTurn, ModelGateway};
use crate::model::{CrossReference, NamedDossier, Signal};
use crate::prompts::{self, sanitize_name};

use super::{encode_payload, StageError};

pub const CALLER: &str = "stages::cross_reference";

/// Wire shape: the payload plus the routing flag the model returns next to it.
#[derive(Debug, Deserialize)]
struct CrossReferenceResponse {
    shared: Vec<Signal>,
    complementary: Vec<Signal>,
    tension_points: Vec<Signal>,
    citations: Vec<String>,
    #[serde(default)]
    venue_appropriate: bool,
}

impl Contract for CrossReferenceResponse {
    const SHAPE: &'static str = "cross_reference";
}

/// Compare two people. Returns the cross-reference and whether a venue would
/// help their meetup.
///
/// Unless both dossiers say something, the empty cross-reference comes back
/// with `false` and no gateway call is made.
pub async fn cross_reference(
    gateway: &dyn ModelGateway,
    a: NamedDossier<'_>,
    b: NamedDossier<'_>,
) -> Result<(CrossReference, bool), StageError> {
    if a.dossier.is_empty() || b.dossier.is_empty() {
        tracing::info!(a = a.name, b = b.name, "empty dossier, skipping cross-reference");
        return Ok((CrossReference::empty(), false));
    }

    let name_a = sanitize_name(a.name);
    let name_b = sanitize_name(b.name);
    let instruction =
        prompts::CROSS_REFERENCE.render(&[("name_a", &name_a), ("name_b", &name_b)]);

    // Keyed by name; two people with the same name still get two entries.
    let key_b = if name_a == name_b {
        format!("{name_b} (2)")
    } else {
        name_b.clone()
    };
    let payload = json!({
        name_a.as_str(): a.dossier,
        key_b.as_str(): b.dossier,
    });
    let payload = encode_payload(&payload)?;

    let raw = gateway
        .complete(&instruction, &[ChatTurn::user(payload)], Attribution::new(CALLER))
        .await?;
    let response: CrossReferenceResponse = contract::parse(&raw)?;

    let cross = CrossReference {
        shared: response.shared,
        complementary: response.complementary,
        tension_points: response.tension_points,
        citations: response.citations,
    };

    if cross.signal_count() > 0 && cross.citations.len() < CrossReference::MIN_CITATIONS {
        tracing::warn!(
            citations = cross.citations.len(),
            "cross-reference cites fewer than {} data points",
            CrossReference::MIN_CITATIONS
        );
    }

    Ok((cross, response.venue_appropriate))
}
