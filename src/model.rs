//! Data model shared by every stage.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use crate::gateway::{ChatTurn, TurnRole};

// =============================================================================
// Parties and profiles
// =============================================================================

/// One of the two people in a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    A,
    B,
}

impl Party {
    pub fn other(self) -> Self {
        match self {
            Party::A => Party::B,
            Party::B => Party::A,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::A => f.write_str("a"),
            Party::B => f.write_str("b"),
        }
    }
}

/// Raw digital-footprint data for one person, as handed over by a collector.
///
/// Every key other than `name` is a data-source block, e.g.
/// `{"name": "Alice", "spotify": {...}, "github": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonProfile {
    pub name: String,
    #[serde(flatten)]
    pub sources: BTreeMap<String, Value>,
}

impl PersonProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>, data: Value) -> Self {
        self.sources.insert(source.into(), data);
        self
    }

    /// Data-source blocks that carry content, keyed and ordered by source name.
    pub fn non_empty_sources(&self) -> BTreeMap<&str, &Value> {
        self.sources
            .iter()
            .filter(|(_, v)| !is_blank(v))
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }
}

/// Null, whitespace-only strings and empty containers carry no signal.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// =============================================================================
// Dossier
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePattern {
    NightOwl,
    EarlyBird,
    #[default]
    Mixed,
}

impl SchedulePattern {
    /// The pattern a pair shares; anything short of agreement is `Mixed`.
    pub fn for_pair(a: SchedulePattern, b: SchedulePattern) -> Self {
        if a == b {
            a
        } else {
            SchedulePattern::Mixed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulePattern::NightOwl => "night_owl",
            SchedulePattern::EarlyBird => "early_bird",
            SchedulePattern::Mixed => "mixed",
        }
    }
}

impl<'de> Deserialize<'de> for SchedulePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        let normalized = raw.trim().to_lowercase().replace([' ', '-'], "_");
        Ok(match normalized.as_str() {
            "night_owl" => SchedulePattern::NightOwl,
            "early_bird" => SchedulePattern::EarlyBird,
            _ => SchedulePattern::Mixed,
        })
    }
}

/// Visible to everyone: intriguing but deliberately vague.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicTier {
    pub vibe: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub schedule_pattern: SchedulePattern,
}

impl PublicTier {
    pub fn is_empty(&self) -> bool {
        self.vibe.trim().is_empty() && self.tags.is_empty()
    }
}

/// Unlocked only for matches: specific names and details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivateTier {
    pub summary: String,
    pub traits: Vec<String>,
    pub interests: Vec<String>,
    pub deep_cuts: Vec<String>,
}

impl PrivateTier {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
            && self.traits.is_empty()
            && self.interests.is_empty()
            && self.deep_cuts.is_empty()
    }
}

/// Two-tier personality summary derived from one [`PersonProfile`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dossier {
    pub public: PublicTier,
    pub private: PrivateTier,
    /// Names of the non-empty sources the dossier was built from.
    #[serde(default)]
    pub data_sources: Vec<String>,
}

impl Dossier {
    pub const MAX_TAGS: usize = 8;
    pub const MAX_TRAITS: usize = 6;
    pub const MAX_INTERESTS: usize = 10;
    pub const MAX_DEEP_CUTS: usize = 4;

    /// The canonical empty dossier.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when neither tier says anything.
    pub fn is_empty(&self) -> bool {
        self.public.is_empty() && self.private.is_empty()
    }

    /// Cap list lengths at their documented maxima.
    pub fn truncate_to_bounds(&mut self) {
        self.public.tags.truncate(Self::MAX_TAGS);
        self.private.traits.truncate(Self::MAX_TRAITS);
        self.private.interests.truncate(Self::MAX_INTERESTS);
        self.private.deep_cuts.truncate(Self::MAX_DEEP_CUTS);
    }
}

/// A dossier paired with the name it describes.
#[derive(Debug, Clone, Copy)]
pub struct NamedDossier<'a> {
    pub name: &'a str,
    pub dossier: &'a Dossier,
}

impl<'a> NamedDossier<'a> {
    pub fn new(name: &'a str, dossier: &'a Dossier) -> Self {
        Self { name, dossier }
    }
}

// =============================================================================
// Cross-reference
// =============================================================================

/// One compatibility observation with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal: String,
    pub detail: String,
    /// Data source(s) that informed it, e.g. "spotify" or "both".
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    pub shared: Vec<Signal>,
    pub complementary: Vec<Signal>,
    pub tension_points: Vec<Signal>,
    pub citations: Vec<String>,
}

impl CrossReference {
    pub const MIN_CITATIONS: usize = 3;

    /// The canonical empty cross-reference.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
            && self.complementary.is_empty()
            && self.tension_points.is_empty()
            && self.citations.is_empty()
    }

    pub fn signal_count(&self) -> usize {
        self.shared.len() + self.complementary.len() + self.tension_points.len()
    }
}

// =============================================================================
// Venues
// =============================================================================

/// A brainstormed activity type plus the query that would find real instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueQuery {
    pub name: String,
    pub search_query: String,
}

/// A real-world place supplied by the caller. Unknown fields pass through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VenueCandidate {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub rating: Option<f64>,
    /// Opaque hours data; see [`crate::hours`] for how it is read.
    #[serde(default)]
    pub opening_hours: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl VenueCandidate {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_hours(mut self, hours: Value) -> Self {
        self.opening_hours = Some(hours);
        self
    }
}

/// A supplied candidate the model selected, with its reasoning attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedVenue {
    #[serde(flatten)]
    pub venue: VenueCandidate,
    pub reason: String,
    pub tips: Vec<String>,
    pub relevance_score: f64,
}

// =============================================================================
// Coaching
// =============================================================================

/// Final briefing for one receiving person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoachingBriefing {
    /// Name of the person this briefing is for.
    pub target: String,
    pub match_intel: String,
    pub conversation_playbook: Vec<String>,
    pub minefield_map: Vec<String>,
    pub venue_cheat_sheet: String,
    pub vibe_calibration: String,
}

impl CoachingBriefing {
    pub const PLAYBOOK_ITEMS: usize = 3;
    pub const MINEFIELD_ITEMS: usize = 2;

    /// "No briefing produced" for `target`. Callers should omit it, not render it.
    pub fn empty(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.match_intel.trim().is_empty()
            && self.conversation_playbook.is_empty()
            && self.minefield_map.is_empty()
            && self.venue_cheat_sheet.trim().is_empty()
            && self.vibe_calibration.trim().is_empty()
    }
}

// =============================================================================
// Chat
// =============================================================================

/// Caller-owned conversation history. Stages only ever read it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistory(Vec<ChatTurn>);

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a user message and the reply it received.
    pub fn record_exchange(&mut self, message: impl Into<String>, reply: impl Into<String>) {
        self.0.push(ChatTurn::user(message));
        self.0.push(ChatTurn::assistant(reply));
    }
}

impl From<Vec<ChatTurn>> for ChatHistory {
    fn from(turns: Vec<ChatTurn>) -> Self {
        Self(turns)
    }
}
