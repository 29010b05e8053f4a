//! Coaching stage: a briefing for one person about meeting the other.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{self, Contract};
use crate::gateway::{Attribution, ChatTurn, GatewayError, ModelGateway};
use crate::model::{CoachingBriefing, CrossReference, NamedDossier, RankedVenue};
use crate::prompts::{self, sanitize_name};

use super::{encode_payload, fail_open, StageError};

pub const CALLER: &str = "stages::coaching";

/// Everything the briefing for `target` is grounded in.
///
/// Party contexts are opaque: they are forwarded to the model as-is.
#[derive(Debug, Clone)]
pub struct CoachingRequest<'a> {
    pub target: &'a str,
    pub target_context: Value,
    pub other: &'a str,
    pub other_context: Value,
    pub cross_reference: &'a CrossReference,
    pub venue: Option<&'a RankedVenue>,
}

impl<'a> CoachingRequest<'a> {
    /// Request whose party contexts are the two dossiers.
    pub fn for_party(
        target: NamedDossier<'a>,
        other: NamedDossier<'a>,
        cross_reference: &'a CrossReference,
        venue: Option<&'a RankedVenue>,
    ) -> Self {
        Self {
            target: target.name,
            target_context: serde_json::to_value(target.dossier).unwrap_or(Value::Null),
            other: other.name,
            other_context: serde_json::to_value(other.dossier).unwrap_or(Value::Null),
            cross_reference,
            venue,
        }
    }
}

#[derive(Serialize)]
struct PartyPayload<'a> {
    name: &'a str,
    profile: &'a Value,
}

#[derive(Serialize)]
struct CoachingPayload<'a> {
    briefing_for: PartyPayload<'a>,
    meeting: PartyPayload<'a>,
    compatibility: &'a CrossReference,
    venue: Option<&'a RankedVenue>,
}

#[derive(Debug, Deserialize)]
struct CoachingResponse {
    match_intel: String,
    conversation_playbook: Vec<String>,
    minefield_map: Vec<String>,
    #[serde(default)]
    venue_cheat_sheet: String,
    #[serde(default)]
    vibe_calibration: String,
}

impl Contract for CoachingResponse {
    const SHAPE: &'static str = "coaching_briefing";

    fn validate(&self) -> Result<(), String> {
        if self.match_intel.trim().is_empty() {
            return Err("match_intel is empty".into());
        }
        Ok(())
    }
}

/// Generate the briefing for `request.target`.
///
/// The target is always taken from the request; whatever the model says about
/// who the briefing is for is ignored.
pub async fn try_generate_coaching(
    gateway: &dyn ModelGateway,
    request: &CoachingRequest<'_>,
) -> Result<CoachingBriefing, StageError> {
    if request.cross_reference.is_empty() {
        tracing::info!(target_name = request.target, "nothing to ground a briefing on");
        return Ok(CoachingBriefing::empty(request.target));
    }

    let target = sanitize_name(request.target);
    let other = sanitize_name(request.other);
    let instruction = prompts::COACHING.render(&[("target", &target), ("other", &other)]);

    let payload = CoachingPayload {
        briefing_for: PartyPayload {
            name: &target,
            profile: &request.target_context,
        },
        meeting: PartyPayload {
            name: &other,
            profile: &request.other_context,
        },
        compatibility: request.cross_reference,
        venue: request.venue,
    };
    let payload = encode_payload(&payload)?;

    let raw = gateway
        .complete(&instruction, &[ChatTurn::user(payload)], Attribution::new(CALLER))
        .await?;
    let response: CoachingResponse = contract::parse(&raw)?;

    let mut briefing = CoachingBriefing {
        target: request.target.to_string(),
        match_intel: response.match_intel,
        conversation_playbook: response.conversation_playbook,
        minefield_map: response.minefield_map,
        venue_cheat_sheet: response.venue_cheat_sheet,
        vibe_calibration: response.vibe_calibration,
    };
    if briefing.conversation_playbook.len() != CoachingBriefing::PLAYBOOK_ITEMS
        || briefing.minefield_map.len() != CoachingBriefing::MINEFIELD_ITEMS
    {
        tracing::debug!(
            playbook = briefing.conversation_playbook.len(),
            minefield = briefing.minefield_map.len(),
            "briefing list sizes off target"
        );
    }
    briefing
        .conversation_playbook
        .truncate(CoachingBriefing::PLAYBOOK_ITEMS);
    briefing.minefield_map.truncate(CoachingBriefing::MINEFIELD_ITEMS);
    Ok(briefing)
}

/// [`try_generate_coaching`], degrading a malformed completion to an empty
/// briefing. Check [`CoachingBriefing::is_empty`] before rendering.
pub async fn generate_coaching(
    gateway: &dyn ModelGateway,
    request: &CoachingRequest<'_>,
) -> Result<CoachingBriefing, GatewayError> {
    fail_open(CALLER, try_generate_coaching(gateway, request).await, || {
        CoachingBriefing::empty(request.target)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use crate::model::{Dossier, Signal};
    use serde_json::json;

    fn cross() -> CrossReference {
        CrossReference {
            shared: vec![Signal {
                signal: "indie music".into(),
                detail: "both stream Phoebe Bridgers".into(),
                source: "spotify".into(),
            }],
            citations: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        }
    }

    fn reply() -> String {
        json!({
            "target": "Bob",
            "match_intel": "Alice and Bob share a soft spot for sad indie songs.",
            "conversation_playbook": ["Ask about Punisher", "Ask about vinyl", "Ask about Rust", "extra"],
            "minefield_map": ["Don't mock early mornings", "Skip crypto", "extra"],
            "venue_cheat_sheet": "The Blue Note keeps it low-key.",
            "vibe_calibration": "Chill and observant"
        })
        .to_string()
    }

    #[tokio::test]
    async fn briefing_targets_the_requested_person() {
        let gateway = ScriptedGateway::new().on(CALLER, reply());
        let (da, db) = (Dossier::empty(), Dossier::empty());
        let cross = cross();
        let request = CoachingRequest::for_party(
            NamedDossier::new("Alice", &da),
            NamedDossier::new("Bob", &db),
            &cross,
            None,
        );

        let briefing = generate_coaching(&gateway, &request).await.unwrap();

        assert_eq!(briefing.target, "Alice");
        assert_eq!(briefing.conversation_playbook.len(), 3);
        assert_eq!(briefing.minefield_map.len(), 2);

        let call = &gateway.calls_for(CALLER)[0];
        assert!(call.system_instruction.contains("briefing for Alice about meeting Bob"));
        let payload: Value = serde_json::from_str(call.last_turn()).unwrap();
        assert_eq!(payload["briefing_for"]["name"], "Alice");
        assert_eq!(payload["meeting"]["name"], "Bob");
        assert!(payload["venue"].is_null());
    }

    #[tokio::test]
    async fn empty_cross_reference_short_circuits() {
        let gateway = ScriptedGateway::new();
        let cross = CrossReference::empty();
        let request = CoachingRequest {
            target: "Alice",
            target_context: Value::Null,
            other: "Bob",
            other_context: Value::Null,
            cross_reference: &cross,
            venue: None,
        };

        let briefing = generate_coaching(&gateway, &request).await.unwrap();
        assert!(briefing.is_empty());
        assert_eq!(briefing.target, "Alice");
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_reply_degrades_to_empty_briefing() {
        let gateway = ScriptedGateway::new().on(CALLER, "You two will be great!");
        let cross = cross();
        let request = CoachingRequest {
            target: "Bob",
            target_context: json!({"vibe": "x"}),
            other: "Alice",
            other_context: json!({"vibe": "y"}),
            cross_reference: &cross,
            venue: None,
        };

        let briefing = generate_coaching(&gateway, &request).await.unwrap();
        assert!(briefing.is_empty());
        assert_eq!(briefing.target, "Bob");

        assert!(try_generate_coaching(&gateway, &request).await.is_err());
    }

    #[tokio::test]
    async fn gateway_failure_still_propagates() {
        let gateway = ScriptedGateway::new().unreachable(CALLER, "timeout");
        let cross = cross();
        let request = CoachingRequest {
            target: "Bob",
            target_context: Value::Null,
            other: "Alice",
            other_context: Value::Null,
            cross_reference: &cross,
            venue: None,
        };

        assert!(generate_coaching(&gateway, &request).await.is_err());
    }
}
