//! Dossier stage: raw multi-source profile data into a two-tier dossier.

use crate::contract::{self, Contract};
use crate::gateway::{Attribution, ChatTurn, ModelGateway};
use crate::model::{Dossier, PersonProfile};
use crate::prompts::{self, sanitize_name};

use super::{encode_payload, StageError};

pub const CALLER: &str = "stages::dossier";

impl Contract for Dossier {
    const SHAPE: &'static str = "dossier";
}

/// Build the dossier for one person.
///
/// Blank data-source blocks are dropped first. When nothing is left the
/// canonical empty dossier comes back without touching the gateway.
pub async fn build_dossier(
    gateway: &dyn ModelGateway,
    profile: &PersonProfile,
) -> Result<Dossier, StageError> {
    let sources = profile.non_empty_sources();
    if sources.is_empty() {
        tracing::info!(person = %profile.name, "no usable data sources, empty dossier");
        return Ok(Dossier::empty());
    }

    let name = sanitize_name(&profile.name);
    let instruction = prompts::DOSSIER.render(&[("name", &name)]);
    let payload = encode_payload(&sources)?;

    tracing::debug!(person = %name, sources = sources.len(), "building dossier");
    let raw = gateway
        .complete(&instruction, &[ChatTurn::user(payload)], Attribution::new(CALLER))
        .await?;

    let mut dossier: Dossier = contract::parse(&raw)?;
    dossier.truncate_to_bounds();
    dossier.data_sources = sources.keys().map(|k| k.to_string()).collect();
    Ok(dossier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use crate::model::SchedulePattern;
    use serde_json::{json, Value};

    fn dossier_reply() -> String {
        json!({
            "public": {
                "vibe": "Alice hums Phoebe Bridgers while shipping Rust at 2am.",
                "tags": ["indie folk", "systems programming", "sci-fi films", "late nights",
                         "vinyl", "open source", "coffee", "board games", "hiking"],
                "schedule_pattern": "night_owl"
            },
            "private": {
                "summary": "Alice is a deep-focus builder.",
                "traits": ["deep-focus builder", "dry humour", "curious"],
                "interests": ["Phoebe Bridgers", "Rust", "Interstellar", "tokio", "Arrival"],
                "deep_cuts": ["maintains a tiny async runtime", "owns 200 records"]
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn empty_profile_short_circuits() {
        let gateway = ScriptedGateway::new();
        let profile = PersonProfile::new("Alice")
            .with_source("spotify", json!({}))
            .with_source("github", Value::Null);

        let dossier = build_dossier(&gateway, &profile).await.unwrap();

        assert_eq!(dossier, Dossier::empty());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn sends_only_non_empty_sources_and_records_provenance() {
        let gateway = ScriptedGateway::new().on(CALLER, format!("```json\n{}\n```", dossier_reply()));
        let profile = PersonProfile::new("Alice")
            .with_source("spotify", json!({"top_artists": ["Phoebe Bridgers"]}))
            .with_source("github", json!({"languages": ["Rust"]}))
            .with_source("letterboxd", json!([]));

        let dossier = build_dossier(&gateway, &profile).await.unwrap();

        assert_eq!(dossier.data_sources, vec!["github", "spotify"]);
        assert_eq!(dossier.public.schedule_pattern, SchedulePattern::NightOwl);
        assert_eq!(dossier.public.tags.len(), Dossier::MAX_TAGS);

        let calls = gateway.calls_for(CALLER);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].turns.len(), 1);
        assert!(calls[0].system_instruction.contains("Alice"));
        assert!(!calls[0].last_turn().contains("letterboxd"));
    }

    #[tokio::test]
    async fn malformed_reply_is_a_contract_violation() {
        let gateway = ScriptedGateway::new().on(CALLER, r#"{"public": {"vibe": "x"}}"#);
        let profile = PersonProfile::new("Bob").with_source("spotify", json!({"genres": ["jazz"]}));

        let err = build_dossier(&gateway, &profile).await.unwrap_err();
        assert!(err.is_contract_violation());
    }
}
