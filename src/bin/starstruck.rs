#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use starstruck::gateway::{ModelGateway, ProviderGateway, TracingUsageSink};
use starstruck::model::{ChatHistory, Party, PersonProfile, VenueCandidate};
use starstruck::pipeline::{Pipeline, PipelineEvent, PipelineInput, PipelineState};
use starstruck::stages::{self, ChatContext};

#[derive(Parser)]
#[command(name = "starstruck", version, about = "Compatibility coaching pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for two profiles
    Run {
        /// Profile JSON for the first person
        #[arg(long)]
        a: PathBuf,
        /// Profile JSON for the second person
        #[arg(long)]
        b: PathBuf,
        /// JSON array of real venues to rank
        #[arg(long)]
        candidates: Option<PathBuf>,
        /// Skip the venue stage entirely
        #[arg(long)]
        no_venue: bool,
        /// Print one JSON event per line as phases complete
        #[arg(long)]
        stream: bool,
        /// Also write the final state here (input for `chat`)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Build a single dossier
    Dossier {
        #[arg(long)]
        profile: PathBuf,
    },
    /// Ask the coach one question about a finished run
    Chat {
        /// State written by `run --out`
        #[arg(long)]
        state: PathBuf,
        /// Which person is asking
        #[arg(long = "as", value_enum)]
        party: PartyArg,
        /// History file; created if missing, updated after the reply
        #[arg(long)]
        history: PathBuf,
        #[arg(long)]
        message: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PartyArg {
    A,
    B,
}

impl From<PartyArg> for Party {
    fn from(arg: PartyArg) -> Self {
        match arg {
            PartyArg::A => Party::A,
            PartyArg::B => Party::B,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            a,
            b,
            candidates,
            no_venue,
            stream,
            out,
        } => {
            let venue_candidates: Vec<VenueCandidate> = match candidates {
                Some(path) => read_json(&path)?,
                None => Vec::new(),
            };
            let input = PipelineInput::new(read_json(&a)?, read_json(&b)?)
                .include_venue(!no_venue)
                .venue_candidates(venue_candidates);

            let pipeline = Pipeline::new(gateway()?);
            let state = if stream {
                stream_run(&pipeline, input).await?
            } else {
                let state = pipeline.run(input).await?;
                print_json(&state)?;
                state
            };

            if let Some(out) = out {
                write_json(&out, &state)?;
                tracing::info!(path = %out.display(), "state written");
            }
        }
        Commands::Dossier { profile } => {
            let profile: PersonProfile = read_json(&profile)?;
            let gateway = gateway()?;
            let dossier = stages::build_dossier(gateway.as_ref(), &profile).await?;
            print_json(&dossier)?;
        }
        Commands::Chat {
            state,
            party,
            history,
            message,
        } => {
            if message.trim().is_empty() {
                bail!("--message is empty");
            }
            let state: PipelineState = read_json(&state)?;
            let party = Party::from(party);
            let (Some(user), Some(partner)) = (state.dossier(party), state.dossier(party.other()))
            else {
                bail!("state has no dossiers; run the pipeline first");
            };
            let Some(cross_reference) = state.cross_reference.as_ref() else {
                bail!("state has no cross-reference; run the pipeline first");
            };

            let mut turns = if history.exists() {
                read_json::<ChatHistory>(&history)?
            } else {
                ChatHistory::new()
            };

            let ctx = ChatContext::new(user, partner, cross_reference);
            let gateway = gateway()?;
            let reply = stages::coach_chat(gateway.as_ref(), &ctx, turns.turns(), &message).await?;

            println!("{reply}");
            turns.record_exchange(message, reply);
            write_json(&history, &turns)?;
        }
    }

    Ok(())
}

fn gateway() -> anyhow::Result<Arc<dyn ModelGateway>> {
    let gateway = ProviderGateway::from_env(Arc::new(TracingUsageSink))
        .context("configuring the model gateway")?;
    tracing::debug!(model = %gateway.settings().model, "gateway ready");
    Ok(Arc::new(gateway))
}

async fn stream_run(pipeline: &Pipeline, input: PipelineInput) -> anyhow::Result<PipelineState> {
    let mut events = pipeline.stream(input);
    let stdout = io::stdout();

    while let Some(event) = events.recv().await {
        {
            let mut lock = stdout.lock();
            serde_json::to_writer(&mut lock, &event)?;
            writeln!(lock)?;
            lock.flush()?;
        }
        match event {
            PipelineEvent::Finished { state } => return Ok(*state),
            PipelineEvent::Failed { error, .. } => bail!("pipeline failed: {error}"),
            PipelineEvent::PhaseCompleted { .. } => {}
        }
    }
    bail!("pipeline stopped without a final event")
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
