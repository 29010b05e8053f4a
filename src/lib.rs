#![forbid(unsafe_code)]

//! # starstruck
//!
//! Turns two people's raw digital footprints into compatibility coaching by
//! chaining calls to a generative model.
//!
//! Each person's profile becomes a two-tier dossier. The two dossiers are
//! cross-referenced for shared, complementary and conflicting signals. A venue
//! may be picked for the pair, and each person gets a briefing about the
//! other. A chat stage reuses the same material as grounding for a multi-turn
//! coaching conversation.
//!
//! Every model call goes through [`gateway::ModelGateway`], and every
//! completion is decoded by [`contract::parse`] into a typed value or a typed
//! failure. [`pipeline::Pipeline`] sequences the stages.

pub mod contract;
pub mod gateway;
pub mod hours;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod stages;

pub use contract::{Contract, ContractViolation};
pub use gateway::{
    Attribution, ChatTurn, GatewayError, ModelGateway, ProviderGateway, ScriptedGateway,
    TurnRole, UsageSink,
};
pub use model::{
    ChatHistory, CoachingBriefing, CrossReference, Dossier, NamedDossier, Party, PersonProfile,
    RankedVenue, SchedulePattern, Signal, VenueCandidate, VenueQuery,
};
pub use pipeline::{
    Phase, Pipeline, PipelineError, PipelineEvent, PipelineInput, PipelineObserver,
    PipelineState, Stage,
};
pub use stages::{coach_chat, ChatContext, StageError};
