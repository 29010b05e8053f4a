//! Dossier → cross-reference → venue → coaching orchestration.
//!
//! A run is a linear state machine over one [`PipelineState`]:
//!
//! ```text
//! start → dossier_a_built → dossier_b_built → cross_referenced
//!       → (venue_selected) → coached → done
//! ```
//!
//! Each transition consumes the state and hands back the next one, refusing
//! to run from the wrong phase. [`Pipeline::run`] drives a run to completion;
//! [`Pipeline::run_with_observer`] and [`Pipeline::stream`] also report every
//! completed phase as it happens.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::gateway::{Attribution, ChatTurn, GatewayError, ModelGateway};
use crate::model::{
    CoachingBriefing, CrossReference, Dossier, NamedDossier, Party, PersonProfile, RankedVenue,
    VenueCandidate, VenueQuery,
};
use crate::stages::{self, CoachingRequest, StageError, VenueContext};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    DossierABuilt,
    DossierBBuilt,
    CrossReferenced,
    VenueSelected,
    Coached,
    Done,
    Failed,
}

/// Model-backed stages, as named in errors and degradation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dossier,
    CrossReference,
    Venue,
    Coaching,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Dossier => "dossier",
            Stage::CrossReference => "cross_reference",
            Stage::Venue => "venue",
            Stage::Coaching => "coaching",
        })
    }
}

/// Everything a run starts from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineInput {
    pub profile_a: PersonProfile,
    pub profile_b: PersonProfile,
    /// Consider a venue at all. Even when set, the venue stage only runs if
    /// the cross-reference says a venue would help.
    #[serde(default = "default_include_venue")]
    pub include_venue: bool,
    /// Real places to rank. Without any, venue ideas are brainstormed instead.
    #[serde(default)]
    pub venue_candidates: Vec<VenueCandidate>,
}

fn default_include_venue() -> bool {
    true
}

impl PipelineInput {
    pub fn new(profile_a: PersonProfile, profile_b: PersonProfile) -> Self {
        Self {
            profile_a,
            profile_b,
            include_venue: true,
            venue_candidates: Vec::new(),
        }
    }

    pub fn include_venue(mut self, include: bool) -> Self {
        self.include_venue = include;
        self
    }

    pub fn venue_candidates(mut self, candidates: Vec<VenueCandidate>) -> Self {
        self.venue_candidates = candidates;
        self
    }
}

/// An enrichment stage that fell back to an empty result on a malformed completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<Party>,
    pub reason: String,
}

/// The one mutable record of a run. Owned by exactly one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub phase: Phase,
    /// Phases reached so far, in order.
    pub completed: Vec<Phase>,
    pub name_a: String,
    pub name_b: String,
    pub dossier_a: Option<Dossier>,
    pub dossier_b: Option<Dossier>,
    pub cross_reference: Option<CrossReference>,
    pub venue_appropriate: bool,
    #[serde(default)]
    pub venue_queries: Vec<VenueQuery>,
    #[serde(default)]
    pub ranked_venues: Vec<RankedVenue>,
    pub selected_venue: Option<RankedVenue>,
    pub briefing_a: Option<CoachingBriefing>,
    pub briefing_b: Option<CoachingBriefing>,
    #[serde(default)]
    pub degraded: Vec<Degradation>,
    #[serde(skip)]
    input: PipelineInput,
}

impl PipelineState {
    pub fn new(input: PipelineInput) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phase: Phase::Start,
            completed: Vec::new(),
            name_a: input.profile_a.name.clone(),
            name_b: input.profile_b.name.clone(),
            dossier_a: None,
            dossier_b: None,
            cross_reference: None,
            venue_appropriate: false,
            venue_queries: Vec::new(),
            ranked_venues: Vec::new(),
            selected_venue: None,
            briefing_a: None,
            briefing_b: None,
            degraded: Vec::new(),
            input,
        }
    }

    pub fn dossier(&self, party: Party) -> Option<NamedDossier<'_>> {
        match party {
            Party::A => self.dossier_a.as_ref().map(|d| NamedDossier::new(&self.name_a, d)),
            Party::B => self.dossier_b.as_ref().map(|d| NamedDossier::new(&self.name_b, d)),
        }
    }

    pub fn briefing(&self, party: Party) -> Option<&CoachingBriefing> {
        match party {
            Party::A => self.briefing_a.as_ref(),
            Party::B => self.briefing_b.as_ref(),
        }
    }

    /// Whether the venue stage belongs in this run.
    pub fn wants_venue(&self) -> bool {
        self.input.include_venue && self.venue_appropriate
    }

    pub fn is_degraded(&self, stage: Stage) -> bool {
        self.degraded.iter().any(|d| d.stage == stage)
    }

    fn advance(&mut self, phase: Phase) {
        tracing::info!(run_id = %self.run_id, ?phase, "phase complete");
        self.phase = phase;
        self.completed.push(phase);
    }

    fn expect_phase(
        &self,
        transition: &'static str,
        allowed: &[Phase],
    ) -> Result<(), PipelineError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(PipelineError::InvalidTransition {
                transition,
                phase: self.phase,
            })
        }
    }

    fn pair(
        &self,
        transition: &'static str,
    ) -> Result<(NamedDossier<'_>, NamedDossier<'_>), PipelineError> {
        match (self.dossier(Party::A), self.dossier(Party::B)) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(PipelineError::InvalidTransition {
                transition,
                phase: self.phase,
            }),
        }
    }
}

// =============================================================================
// Events and observers
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    PhaseCompleted {
        phase: Phase,
        state: Box<PipelineState>,
    },
    Finished {
        state: Box<PipelineState>,
    },
    /// The run halted. `state` holds whatever was produced before the failure.
    Failed {
        error: String,
        stage: Option<Stage>,
        state: Box<PipelineState>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("event receiver went away")]
    Closed,
    #[error("{0}")]
    Message(String),
}

#[async_trait::async_trait]
pub trait PipelineObserver: Send + Sync {
    async fn on_event(&self, event: PipelineEvent) -> Result<(), ObserverError>;
}

/// Forwards events into a bounded channel.
pub struct ChannelObserver {
    tx: mpsc::Sender<PipelineEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl PipelineObserver for ChannelObserver {
    async fn on_event(&self, event: PipelineEvent) -> Result<(), ObserverError> {
        self.tx.send(event).await.map_err(|_| ObserverError::Closed)
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        party: Option<Party>,
        source: StageError,
    },
    #[error("cannot run {transition} from phase {phase:?}")]
    InvalidTransition {
        transition: &'static str,
        phase: Phase,
    },
    #[error("observer failed: {0}")]
    Observer(#[from] ObserverError),
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    fn at(stage: Stage, party: Option<Party>) -> impl FnOnce(StageError) -> Self {
        move |source| PipelineError::Stage {
            stage,
            party,
            source,
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

const EVENT_BUFFER: usize = 16;

#[derive(Clone)]
pub struct Pipeline {
    gateway: Arc<dyn ModelGateway>,
}

impl Pipeline {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }

    /// Run every transition and return the final state.
    pub async fn run(&self, input: PipelineInput) -> Result<PipelineState, PipelineError> {
        self.drive(PipelineState::new(input), None).await
    }

    /// Like [`Pipeline::run`], reporting each completed phase to `observer`.
    ///
    /// The observer sees `Finished` or `Failed` last. An observer error
    /// abandons the run.
    pub async fn run_with_observer(
        &self,
        input: PipelineInput,
        observer: &dyn PipelineObserver,
    ) -> Result<PipelineState, PipelineError> {
        self.drive(PipelineState::new(input), Some(observer)).await
    }

    /// Start a run on the runtime and return its event stream.
    ///
    /// Dropping the receiver abandons the run at the next event.
    pub fn stream(&self, input: PipelineInput) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pipeline = self.clone();
        tokio::spawn(async move {
            let observer = ChannelObserver::new(tx);
            if let Err(err) = pipeline.run_with_observer(input, &observer).await {
                tracing::debug!(error = %err, "streamed run ended with an error");
            }
        });
        rx
    }

    async fn drive(
        &self,
        state: PipelineState,
        observer: Option<&dyn PipelineObserver>,
    ) -> Result<PipelineState, PipelineError> {
        let span = tracing::info_span!("pipeline", run_id = %state.run_id);
        self.drive_steps(state, observer).instrument(span).await
    }

    async fn drive_steps(
        &self,
        mut state: PipelineState,
        observer: Option<&dyn PipelineObserver>,
    ) -> Result<PipelineState, PipelineError> {
        tracing::info!(a = %state.name_a, b = %state.name_b, "pipeline started");

        for step in [
            Step::Dossiers,
            Step::CrossReference,
            Step::Venue,
            Step::Coaching,
            Step::Finish,
        ] {
            if step == Step::Venue && !state.wants_venue() {
                tracing::info!("venue stage not needed");
                continue;
            }

            let checkpoint = state.clone();
            let reported = state.completed.len();

            state = match self.step(step, state).await {
                Ok(next) => next,
                Err(err) => {
                    tracing::warn!(error = %err, "pipeline halted");
                    if let Some(observer) = observer {
                        let mut failed = checkpoint;
                        failed.phase = Phase::Failed;
                        let event = PipelineEvent::Failed {
                            error: err.to_string(),
                            stage: err.stage(),
                            state: Box::new(failed),
                        };
                        // The run already failed; a closed receiver changes nothing.
                        let _ = observer.on_event(event).await;
                    }
                    return Err(err);
                }
            };

            if let Some(observer) = observer {
                for &phase in &state.completed[reported..] {
                    observer
                        .on_event(PipelineEvent::PhaseCompleted {
                            phase,
                            state: Box::new(state.clone()),
                        })
                        .await?;
                }
            }
        }

        if let Some(observer) = observer {
            observer
                .on_event(PipelineEvent::Finished {
                    state: Box::new(state.clone()),
                })
                .await?;
        }
        Ok(state)
    }

    async fn step(&self, step: Step, state: PipelineState) -> Result<PipelineState, PipelineError> {
        match step {
            Step::Dossiers => self.build_dossiers(state).await,
            Step::CrossReference => self.cross_reference(state).await,
            Step::Venue => self.select_venue(state).await,
            Step::Coaching => self.coach(state).await,
            Step::Finish => Self::finish(state),
        }
    }

    fn scoped(&self, state: &PipelineState) -> RunGateway<'_> {
        RunGateway {
            inner: self.gateway.as_ref(),
            run_id: state.run_id,
        }
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// `start → dossier_a_built → dossier_b_built`. Both calls run concurrently.
    pub async fn build_dossiers(
        &self,
        mut state: PipelineState,
    ) -> Result<PipelineState, PipelineError> {
        state.expect_phase("build_dossiers", &[Phase::Start])?;

        let gateway = &self.scoped(&state);
        let (a, b) = futures::try_join!(
            async {
                stages::build_dossier(gateway, &state.input.profile_a)
                    .await
                    .map_err(PipelineError::at(Stage::Dossier, Some(Party::A)))
            },
            async {
                stages::build_dossier(gateway, &state.input.profile_b)
                    .await
                    .map_err(PipelineError::at(Stage::Dossier, Some(Party::B)))
            },
        )?;

        state.dossier_a = Some(a);
        state.advance(Phase::DossierABuilt);
        state.dossier_b = Some(b);
        state.advance(Phase::DossierBBuilt);
        Ok(state)
    }

    /// `dossier_b_built → cross_referenced`.
    pub async fn cross_reference(
        &self,
        mut state: PipelineState,
    ) -> Result<PipelineState, PipelineError> {
        state.expect_phase("cross_reference", &[Phase::DossierBBuilt])?;

        let (a, b) = state.pair("cross_reference")?;
        let (cross, venue_appropriate) = stages::cross_reference(&self.scoped(&state), a, b)
            .await
            .map_err(PipelineError::at(Stage::CrossReference, None))?;

        state.cross_reference = Some(cross);
        state.venue_appropriate = venue_appropriate;
        state.advance(Phase::CrossReferenced);
        Ok(state)
    }

    /// `cross_referenced → venue_selected`.
    ///
    /// Ranks the supplied candidates and selects the best one, or brainstorms
    /// search queries when there are no candidates.
    pub async fn select_venue(
        &self,
        mut state: PipelineState,
    ) -> Result<PipelineState, PipelineError> {
        state.expect_phase("select_venue", &[Phase::CrossReferenced])?;

        let gateway = &self.scoped(&state);
        let (a, b) = state.pair("select_venue")?;
        let cross = state
            .cross_reference
            .as_ref()
            .ok_or(PipelineError::InvalidTransition {
                transition: "select_venue",
                phase: state.phase,
            })?;
        let ctx = VenueContext::from_pair(a, b, cross);

        let outcome = if state.input.venue_candidates.is_empty() {
            stages::try_brainstorm(gateway, &ctx)
                .await
                .map(VenueOutcome::Queries)
        } else {
            stages::try_rank(gateway, &ctx, &state.input.venue_candidates)
                .await
                .map(VenueOutcome::Ranked)
        };

        match outcome {
            Ok(VenueOutcome::Queries(queries)) => state.venue_queries = queries,
            Ok(VenueOutcome::Ranked(ranked)) => {
                state.selected_venue = ranked.first().cloned();
                state.ranked_venues = ranked;
            }
            Err(StageError::Contract(violation)) => {
                tracing::warn!(error = %violation, "venue stage degraded");
                state.degraded.push(Degradation {
                    stage: Stage::Venue,
                    party: None,
                    reason: violation.to_string(),
                });
            }
            Err(err) => return Err(PipelineError::at(Stage::Venue, None)(err)),
        }

        state.advance(Phase::VenueSelected);
        Ok(state)
    }

    /// `cross_referenced | venue_selected → coached`. One briefing per person,
    /// generated concurrently.
    pub async fn coach(
        &self,
        mut state: PipelineState,
    ) -> Result<PipelineState, PipelineError> {
        state.expect_phase("coach", &[Phase::CrossReferenced, Phase::VenueSelected])?;

        let gateway = &self.scoped(&state);
        let (briefing_a, briefing_b) = {
            let (a, b) = state.pair("coach")?;
            let cross = state
                .cross_reference
                .as_ref()
                .ok_or(PipelineError::InvalidTransition {
                    transition: "coach",
                    phase: state.phase,
                })?;
            let venue = state.selected_venue.as_ref();

            let for_a = CoachingRequest::for_party(a, b, cross, venue);
            let for_b = CoachingRequest::for_party(b, a, cross, venue);
            futures::try_join!(
                coach_party(gateway, &for_a, Party::A),
                coach_party(gateway, &for_b, Party::B),
            )?
        };

        for (party, (briefing, degradation)) in [(Party::A, briefing_a), (Party::B, briefing_b)] {
            if let Some(degradation) = degradation {
                state.degraded.push(degradation);
            }
            match party {
                Party::A => state.briefing_a = Some(briefing),
                Party::B => state.briefing_b = Some(briefing),
            }
        }

        state.advance(Phase::Coached);
        Ok(state)
    }

    /// `coached → done`.
    pub fn finish(mut state: PipelineState) -> Result<PipelineState, PipelineError> {
        state.expect_phase("finish", &[Phase::Coached])?;
        state.advance(Phase::Done);
        Ok(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Dossiers,
    CrossReference,
    Venue,
    Coaching,
    Finish,
}

/// Stamps every call made during a run with that run's id.
struct RunGateway<'a> {
    inner: &'a dyn ModelGateway,
    run_id: Uuid,
}

#[async_trait::async_trait]
impl ModelGateway for RunGateway<'_> {
    async fn complete(
        &self,
        system_instruction: &str,
        turns: &[ChatTurn],
        attribution: Attribution,
    ) -> Result<String, GatewayError> {
        self.inner
            .complete(system_instruction, turns, attribution.with_run(self.run_id))
            .await
    }
}

enum VenueOutcome {
    Queries(Vec<VenueQuery>),
    Ranked(Vec<RankedVenue>),
}

async fn coach_party(
    gateway: &dyn ModelGateway,
    request: &CoachingRequest<'_>,
    party: Party,
) -> Result<(CoachingBriefing, Option<Degradation>), PipelineError> {
    match stages::try_generate_coaching(gateway, request).await {
        Ok(briefing) => Ok((briefing, None)),
        Err(StageError::Contract(violation)) => {
            tracing::warn!(%party, error = %violation, "coaching degraded");
            Ok((
                CoachingBriefing::empty(request.target),
                Some(Degradation {
                    stage: Stage::Coaching,
                    party: Some(party),
                    reason: violation.to_string(),
                }),
            ))
        }
        Err(err) => Err(PipelineError::at(Stage::Coaching, Some(party))(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;

    fn empty_input() -> PipelineInput {
        PipelineInput::new(PersonProfile::new("Alice"), PersonProfile::new("Bob"))
    }

    #[tokio::test]
    async fn transitions_refuse_to_run_twice() {
        let pipeline = Pipeline::new(Arc::new(ScriptedGateway::new()));
        let state = pipeline
            .build_dossiers(PipelineState::new(empty_input()))
            .await
            .unwrap();
        assert_eq!(state.phase, Phase::DossierBBuilt);

        let err = pipeline.build_dossiers(state).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                transition: "build_dossiers",
                phase: Phase::DossierBBuilt
            }
        ));
    }

    #[tokio::test]
    async fn stage_calls_carry_the_run_id() {
        let gateway = Arc::new(ScriptedGateway::new().on("stages::dossier", "not json"));
        let pipeline = Pipeline::new(gateway.clone());
        let input = PipelineInput::new(
            PersonProfile::new("Alice").with_source("spotify", serde_json::json!({"genres": ["jazz"]})),
            PersonProfile::new("Bob"),
        );
        let state = PipelineState::new(input);
        let run_id = state.run_id;

        let err = pipeline.build_dossiers(state).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Dossier));

        let calls = gateway.calls_for("stages::dossier");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].run_id, Some(run_id));
    }

    #[tokio::test]
    async fn transitions_refuse_to_run_out_of_order() {
        let pipeline = Pipeline::new(Arc::new(ScriptedGateway::new()));
        let err = pipeline
            .coach(PipelineState::new(empty_input()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert!(Pipeline::finish(PipelineState::new(empty_input())).is_err());
    }

    #[tokio::test]
    async fn dossier_phases_are_recorded_in_order() {
        let pipeline = Pipeline::new(Arc::new(ScriptedGateway::new()));
        let state = pipeline.run(empty_input()).await.unwrap();
        assert_eq!(
            state.completed,
            vec![
                Phase::DossierABuilt,
                Phase::DossierBBuilt,
                Phase::CrossReferenced,
                Phase::Coached,
                Phase::Done
            ]
        );
    }

    #[test]
    fn input_defaults_to_considering_a_venue() {
        let input: PipelineInput = serde_json::from_value(serde_json::json!({
            "profile_a": {"name": "Alice"},
            "profile_b": {"name": "Bob"}
        }))
        .unwrap();
        assert!(input.include_venue);
        assert!(input.venue_candidates.is_empty());
    }
}
