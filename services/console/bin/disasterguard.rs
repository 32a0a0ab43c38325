//! Main Entrypoint for the DisasterGuard Console
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Opening the local store and the analysis client.
//! 3. Dispatching the requested command, including the live voice session.

use anyhow::Context;
use clap::{Parser, Subcommand};
use disasterguard_console::{
    audio::CpalBackend,
    briefing::{render_prediction, render_reports},
    config::Config,
    voice::{VoiceSession, VoiceUpdate},
};
use disasterguard_core::{
    analysis::{AnalysisClient, HttpAnalysisClient},
    identity::IdentityService,
    models::{AnalyzeRequest, Language, NewReport, ReportSeverity},
    store::LocalStore,
};
use gemini_realtime::GeminiLiveConnector;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

/// DisasterGuard: disaster-risk analysis and voice operator console.
#[derive(Parser)]
#[command(name = "disasterguard", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze disaster risk for a location.
    Analyze {
        location: String,
        /// Response language (en, es, fr, hi).
        #[arg(long, default_value = "en")]
        lang: Language,
    },
    /// Manage community reports.
    #[command(subcommand)]
    Report(ReportCommand),
    /// Show or forget the registered operator.
    #[command(subcommand)]
    Identity(IdentityCommand),
    /// Check that the analysis backend is reachable.
    Health,
    /// Start a realtime voice session. Ctrl+C ends it.
    Voice,
}

#[derive(Subcommand)]
enum ReportCommand {
    /// Record a new community report.
    Add {
        #[arg(long = "type")]
        kind: String,
        /// Minor, Moderate or Severe.
        #[arg(long)]
        severity: ReportSeverity,
        #[arg(long)]
        location: String,
        #[arg(long)]
        description: String,
    },
    /// List stored community reports.
    List,
}

#[derive(Subcommand)]
enum IdentityCommand {
    Show,
    Forget,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Initialize Shared Services ---
    let store = Arc::new(LocalStore::open(&config.state_path));
    let analysis = HttpAnalysisClient::new(&config.backend_url);

    match cli.command {
        Command::Analyze { location, lang } => {
            let request = AnalyzeRequest {
                location,
                reports: store.reports(),
                lang,
            };
            let result = analysis
                .analyze(&request)
                .await
                .context("Risk analysis failed")?;
            println!("{}", render_prediction(&result));
        }
        Command::Report(ReportCommand::Add {
            kind,
            severity,
            location,
            description,
        }) => {
            let report = store
                .add_report(NewReport {
                    kind,
                    description,
                    severity,
                    location,
                })
                .context("Failed to save report")?;
            println!("Report {} recorded.", report.id);
        }
        Command::Report(ReportCommand::List) => println!("{}", render_reports(&store.reports())),
        Command::Identity(IdentityCommand::Show) => match store.user_name() {
            Some(name) => println!("Operator: {}", name),
            None => println!("Operator: UNIDENTIFIED"),
        },
        Command::Identity(IdentityCommand::Forget) => {
            store
                .clear_user_name()
                .context("Failed to clear operator identity")?;
            println!("Operator identity cleared.");
        }
        Command::Health => {
            let health = analysis
                .health()
                .await
                .context("Backend health check failed")?;
            println!(
                "Backend {}: engine {}, language {}",
                health.status, health.engine, health.language
            );
        }
        Command::Voice => run_voice(&config, store).await?,
    }
    Ok(())
}

async fn run_voice(config: &Config, store: Arc<LocalStore>) -> anyhow::Result<()> {
    let api_key = config.require_gemini_key()?;
    let connector = GeminiLiveConnector::new(&config.live_url, api_key, &config.live_model);

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal. Ending voice session...");
            ctrl_c.cancel();
        }
    });

    let (updates_tx, mut updates) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                VoiceUpdate::State(state) => println!("[voice] {}", state),
                VoiceUpdate::UserSpeech(text) => println!("[you] {}", text),
                VoiceUpdate::AgentSpeech(text) => println!("[agent] {}", text),
                VoiceUpdate::IdentityRegistered(name) => {
                    println!("[voice] operator identified: {}", name.to_uppercase())
                }
                VoiceUpdate::Failed(reason) => eprintln!("[voice] failed: {}", reason),
            }
        }
    });

    let mut session = VoiceSession::new(
        Arc::new(connector),
        Arc::new(CpalBackend),
        IdentityService::new(store),
        config.connect_timeout,
    )
    .with_updates(updates_tx)
    .with_shutdown(shutdown);

    let span = info_span!("voice_session", session_id = %uuid::Uuid::new_v4());
    let outcome = session.serve().instrument(span).await;

    drop(session);
    let _ = printer.await;
    outcome.context("Voice session ended with an error")
}
