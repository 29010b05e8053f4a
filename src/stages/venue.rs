//! Venue stage: brainstorm search queries, or rank caller-supplied places.
//!
//! Both modes share one instruction and differ only in the user turn. Either
//! mode is enrichment, so a malformed completion yields an empty list.

use serde::{Deserialize, Deserializer};

use crate::contract::{self, Contract};
use crate::gateway::{Attribution, ChatTurn, GatewayError, ModelGateway};
use crate::hours;
use crate::model::{
    CrossReference, NamedDossier, RankedVenue, SchedulePattern, VenueCandidate, VenueQuery,
};
use crate::prompts::{self, sanitize_name};

use super::{encode_payload, fail_open, StageError};

pub const BRAINSTORM_CALLER: &str = "stages::venue::brainstorm";
pub const RANK_CALLER: &str = "stages::venue::rank";

pub const MAX_VENUE_QUERIES: usize = 3;
pub const MAX_RANKED_VENUES: usize = 3;

/// What both venue modes know about the pair.
#[derive(Debug, Clone, Copy)]
pub struct VenueContext<'a> {
    pub name_a: &'a str,
    pub name_b: &'a str,
    pub cross_reference: &'a CrossReference,
    pub schedule: SchedulePattern,
}

impl<'a> VenueContext<'a> {
    /// Context for a pair, with the schedule they share.
    pub fn from_pair(
        a: NamedDossier<'a>,
        b: NamedDossier<'a>,
        cross_reference: &'a CrossReference,
    ) -> Self {
        Self {
            name_a: a.name,
            name_b: b.name,
            cross_reference,
            schedule: SchedulePattern::for_pair(
                a.dossier.public.schedule_pattern,
                b.dossier.public.schedule_pattern,
            ),
        }
    }

    fn instruction(&self) -> String {
        let name_a = sanitize_name(self.name_a);
        let name_b = sanitize_name(self.name_b);
        prompts::VENUE.render(&[
            ("name_a", &name_a),
            ("name_b", &name_b),
            ("schedule_pattern", self.schedule.as_str()),
        ])
    }

    fn analysis(&self) -> Result<String, GatewayError> {
        encode_payload(self.cross_reference)
    }
}

// =============================================================================
// Brainstorm
// =============================================================================

#[derive(Debug, Deserialize)]
struct BrainstormResponse {
    queries: Vec<VenueQuery>,
}

impl Contract for BrainstormResponse {
    const SHAPE: &'static str = "venue_queries";
}

/// Brainstorm up to three activity types with search queries.
pub async fn try_brainstorm(
    gateway: &dyn ModelGateway,
    ctx: &VenueContext<'_>,
) -> Result<Vec<VenueQuery>, StageError> {
    let turn = format!(
        "BRAINSTORM MODE\n\nCompatibility analysis:\n{}",
        ctx.analysis()?
    );
    let raw = gateway
        .complete(
            &ctx.instruction(),
            &[ChatTurn::user(turn)],
            Attribution::new(BRAINSTORM_CALLER),
        )
        .await?;

    let mut response: BrainstormResponse = contract::parse(&raw)?;
    response
        .queries
        .retain(|q| !q.name.trim().is_empty() && !q.search_query.trim().is_empty());
    response.queries.truncate(MAX_VENUE_QUERIES);
    Ok(response.queries)
}

/// [`try_brainstorm`], degrading a malformed completion to no queries.
pub async fn brainstorm_venue_queries(
    gateway: &dyn ModelGateway,
    ctx: &VenueContext<'_>,
) -> Result<Vec<VenueQuery>, GatewayError> {
    fail_open(BRAINSTORM_CALLER, try_brainstorm(gateway, ctx).await, Vec::new)
}

// =============================================================================
// Rank
// =============================================================================

#[derive(Debug, Deserialize)]
struct RankResponse {
    venues: Vec<RankPick>,
}

impl Contract for RankResponse {
    const SHAPE: &'static str = "ranked_venues";
}

#[derive(Debug, Deserialize)]
struct RankPick {
    name: String,
    #[serde(default)]
    reason: String,
    #[serde(default, deserialize_with = "string_or_list")]
    tips: Vec<String>,
    #[serde(default)]
    relevance_score: f64,
}

/// Models sometimes answer `"tips": "..."` instead of a list.
fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tips {
        One(String),
        Many(Vec<String>),
        Missing(()),
    }

    Ok(match Tips::deserialize(deserializer)? {
        Tips::One(tip) if tip.trim().is_empty() => Vec::new(),
        Tips::One(tip) => vec![tip],
        Tips::Many(tips) => tips,
        Tips::Missing(()) => Vec::new(),
    })
}

/// Pick and order up to three of `candidates` for the pair.
///
/// Picks are joined back to the supplied records by name; anything the model
/// invents is dropped. When at least one candidate's hours fit the pair's
/// schedule, picks whose known hours clash with it are dropped too.
pub async fn try_rank(
    gateway: &dyn ModelGateway,
    ctx: &VenueContext<'_>,
    candidates: &[VenueCandidate],
) -> Result<Vec<RankedVenue>, StageError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let turn = format!(
        "RANK MODE\n\nCompatibility analysis:\n{}\n\nCandidates:\n{}",
        ctx.analysis()?,
        encode_payload(candidates)?
    );
    let raw = gateway
        .complete(
            &ctx.instruction(),
            &[ChatTurn::user(turn)],
            Attribution::new(RANK_CALLER),
        )
        .await?;
    let response: RankResponse = contract::parse(&raw)?;

    Ok(select(response.venues, candidates, ctx.schedule))
}

/// [`try_rank`], degrading a malformed completion to no venues.
pub async fn rank_venues(
    gateway: &dyn ModelGateway,
    ctx: &VenueContext<'_>,
    candidates: &[VenueCandidate],
) -> Result<Vec<RankedVenue>, GatewayError> {
    fail_open(RANK_CALLER, try_rank(gateway, ctx, candidates).await, Vec::new)
}

fn select(
    picks: Vec<RankPick>,
    candidates: &[VenueCandidate],
    schedule: SchedulePattern,
) -> Vec<RankedVenue> {
    let clashes: Vec<bool> = candidates
        .iter()
        .map(|c| hours::conflicts(c.opening_hours.as_ref(), schedule))
        .collect();
    let any_fit = clashes.iter().any(|clash| !clash);

    let mut taken = vec![false; candidates.len()];
    let mut ranked = Vec::new();

    for pick in picks {
        let Some(idx) = find_candidate(candidates, &pick.name) else {
            tracing::debug!(venue = %pick.name, "dropping pick that names no candidate");
            continue;
        };
        if taken[idx] {
            continue;
        }
        if any_fit && clashes[idx] {
            tracing::debug!(
                venue = %pick.name,
                schedule = schedule.as_str(),
                "dropping pick whose hours clash with the pair's schedule"
            );
            continue;
        }
        taken[idx] = true;

        let score = if pick.relevance_score.is_finite() {
            pick.relevance_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        ranked.push(RankedVenue {
            venue: candidates[idx].clone(),
            reason: pick.reason,
            tips: pick.tips,
            relevance_score: score,
        });
    }

    ranked.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    ranked.truncate(MAX_RANKED_VENUES);
    ranked
}

fn find_candidate(candidates: &[VenueCandidate], name: &str) -> Option<usize> {
    let wanted = name.trim();
    candidates
        .iter()
        .position(|c| c.name == wanted)
        .or_else(|| {
            candidates
                .iter()
                .position(|c| c.name.trim().eq_ignore_ascii_case(wanted))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use serde_json::json;

    fn ctx(cross: &CrossReference, schedule: SchedulePattern) -> VenueContext<'_> {
        VenueContext {
            name_a: "Alice",
            name_b: "Bob",
            cross_reference: cross,
            schedule,
        }
    }

    fn candidates() -> Vec<VenueCandidate> {
        vec![
            VenueCandidate::new("Morning Brew", "1 Dawn St")
                .with_rating(4.7)
                .with_hours(json!("Mon-Sun 7:00 AM - 3:00 PM")),
            VenueCandidate::new("Blue Note", "131 W 3rd St")
                .with_rating(4.6)
                .with_hours(json!("Mon-Sun 18:00-02:00")),
            VenueCandidate::new("Vinyl Bar", "9 Groove Ave").with_rating(4.2),
            VenueCandidate::new("Arcade", "5 Pixel Rd")
                .with_hours(json!("12:00-23:00")),
        ]
    }

    #[tokio::test]
    async fn brainstorm_caps_at_three() {
        let reply = json!({"queries": [
            {"name": "Jazz club", "search_query": "live jazz near me"},
            {"name": "Record store", "search_query": "vinyl record store"},
            {"name": "Escape room", "search_query": "escape room"},
            {"name": "Arcade", "search_query": "barcade"}
        ]})
        .to_string();
        let gateway = ScriptedGateway::new().on(BRAINSTORM_CALLER, reply);
        let cross = CrossReference::empty();

        let queries = brainstorm_venue_queries(&gateway, &ctx(&cross, SchedulePattern::Mixed))
            .await
            .unwrap();

        assert_eq!(queries.len(), MAX_VENUE_QUERIES);
        let call = &gateway.calls_for(BRAINSTORM_CALLER)[0];
        assert!(call.last_turn().starts_with("BRAINSTORM MODE"));
    }

    #[tokio::test]
    async fn brainstorm_degrades_on_malformed_reply() {
        let gateway = ScriptedGateway::new().on(BRAINSTORM_CALLER, "Try a jazz bar!");
        let cross = CrossReference::empty();

        let queries = brainstorm_venue_queries(&gateway, &ctx(&cross, SchedulePattern::Mixed))
            .await
            .unwrap();
        assert!(queries.is_empty());
    }

    #[tokio::test]
    async fn brainstorm_propagates_gateway_failure() {
        let gateway = ScriptedGateway::new().unreachable(BRAINSTORM_CALLER, "connection reset");
        let cross = CrossReference::empty();

        let result = brainstorm_venue_queries(&gateway, &ctx(&cross, SchedulePattern::Mixed)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rank_skips_the_call_without_candidates() {
        let gateway = ScriptedGateway::new();
        let cross = CrossReference::empty();

        let ranked = rank_venues(&gateway, &ctx(&cross, SchedulePattern::NightOwl), &[])
            .await
            .unwrap();
        assert!(ranked.is_empty());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn night_owls_never_get_an_early_closer() {
        let reply = json!({"venues": [
            {"name": "Morning Brew", "reason": "great coffee", "tips": ["go early"], "relevance_score": 0.95},
            {"name": "Blue Note", "reason": "late jazz", "tips": "sit at the bar", "relevance_score": 0.9},
            {"name": "Vinyl Bar", "reason": "records", "tips": [], "relevance_score": 0.7},
            {"name": "Arcade", "reason": "games", "tips": ["bring quarters"], "relevance_score": 0.8}
        ]})
        .to_string();
        let gateway = ScriptedGateway::new().on(RANK_CALLER, reply);
        let cross = CrossReference::empty();

        let ranked = rank_venues(&gateway, &ctx(&cross, SchedulePattern::NightOwl), &candidates())
            .await
            .unwrap();

        let names: Vec<_> = ranked.iter().map(|r| r.venue.name.as_str()).collect();
        assert_eq!(names, vec!["Blue Note", "Arcade", "Vinyl Bar"]);
        assert_eq!(ranked[0].tips, vec!["sit at the bar".to_string()]);
        assert_eq!(ranked[0].venue.address, "131 W 3rd St");
    }

    #[tokio::test]
    async fn all_clashing_candidates_are_still_rankable() {
        let reply = json!({"venues": [
            {"name": "Morning Brew", "reason": "coffee", "tips": [], "relevance_score": 0.6}
        ]})
        .to_string();
        let gateway = ScriptedGateway::new().on(RANK_CALLER, reply);
        let cross = CrossReference::empty();
        let only_early = vec![candidates().remove(0)];

        let ranked = rank_venues(&gateway, &ctx(&cross, SchedulePattern::NightOwl), &only_early)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
    }

    #[tokio::test]
    async fn invented_and_duplicate_picks_are_dropped() {
        let reply = json!({"venues": [
            {"name": "The Imaginary Lounge", "reason": "?", "tips": [], "relevance_score": 1.0},
            {"name": "blue note", "reason": "jazz", "tips": [], "relevance_score": 0.8,
             "address": "somewhere made up"},
            {"name": "Blue Note", "reason": "again", "tips": [], "relevance_score": 0.7}
        ]})
        .to_string();
        let gateway = ScriptedGateway::new().on(RANK_CALLER, reply);
        let cross = CrossReference::empty();

        let ranked = rank_venues(&gateway, &ctx(&cross, SchedulePattern::Mixed), &candidates())
            .await
            .unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].venue.name, "Blue Note");
        assert_eq!(ranked[0].venue.address, "131 W 3rd St");
        assert_eq!(ranked[0].reason, "jazz");
    }

    #[tokio::test]
    async fn rank_degrades_on_malformed_reply() {
        let gateway = ScriptedGateway::new().on(RANK_CALLER, r#"{"picks": []}"#);
        let cross = CrossReference::empty();

        let strict = try_rank(&gateway, &ctx(&cross, SchedulePattern::Mixed), &candidates()).await;
        assert!(matches!(strict, Err(StageError::Contract(_))));

        let lenient = rank_venues(&gateway, &ctx(&cross, SchedulePattern::Mixed), &candidates())
            .await
            .unwrap();
        assert!(lenient.is_empty());
    }

    #[test]
    fn pair_context_uses_shared_schedule() {
        let mut night = crate::model::Dossier::empty();
        night.public.schedule_pattern = SchedulePattern::NightOwl;
        let cross = CrossReference::empty();

        let ctx = VenueContext::from_pair(
            NamedDossier::new("Alice", &night),
            NamedDossier::new("Bob", &night),
            &cross,
        );
        assert_eq!(ctx.schedule, SchedulePattern::NightOwl);
        assert!(ctx.instruction().contains("\"night_owl\""));
    }
}
