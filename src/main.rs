//! # relay
//!
//! Orchestrator binary: wires settings, telemetry, the context store, remote
//! capabilities and the classifier together, then serves the HTTP API or
//! answers a single query.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use relay_engine::{CapabilityRegistry, Orchestrator, WorkflowConfig};
use relay_remote::{ChatClassifier, ChatClassifierConfig, HttpCapability};
use relay_settings::{RelaySettings, StoreBackend};
use relay_store::{Database, SessionStore, SqliteBackend, StoreConfig};
use relay_telemetry::TelemetryConfig;

/// Capability orchestrator.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Routes requests to capabilities with per-session context")]
struct Cli {
    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API until ctrl-c.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one query and print the result envelope as JSON.
    Ask {
        query: String,
        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,
    },
}

fn load(cli: &Cli) -> Result<RelaySettings> {
    let settings = match &cli.settings {
        Some(path) => relay_settings::load_settings_from_path(path),
        None => relay_settings::load_settings(),
    };
    settings.context("failed to load settings")
}

fn telemetry_config(settings: &RelaySettings) -> TelemetryConfig {
    let logging = &settings.logging;
    let log_level = relay_telemetry::parse_level(&logging.level).unwrap_or(tracing::Level::INFO);
    let module_levels = logging
        .modules
        .iter()
        .filter_map(|(module, level)| {
            relay_telemetry::parse_level(level).map(|level| (module.clone(), level))
        })
        .collect();
    TelemetryConfig {
        log_level,
        module_levels,
        json: logging.json,
    }
}

fn build_store(settings: &RelaySettings) -> Result<Arc<SessionStore>> {
    let config = StoreConfig {
        ttl: settings.store.ttl(),
        sweep_every_puts: settings.store.sweep_every_puts,
    };
    let store = match settings.store.backend {
        StoreBackend::Memory => SessionStore::in_memory(config),
        StoreBackend::Sqlite => {
            let path = settings.store.sqlite_path_in(&relay_settings::relay_home());
            let db = Database::open(&path)
                .with_context(|| format!("failed to open context database {}", path.display()))?;
            SessionStore::new(Arc::new(SqliteBackend::new(db)), config)
        }
    };
    Ok(Arc::new(store))
}

fn build_registry(settings: &RelaySettings) -> Result<CapabilityRegistry> {
    let mut builder = CapabilityRegistry::builder();
    for (name, cap) in &settings.capabilities {
        let timeout_ms = cap.timeout_ms.unwrap_or(settings.workflow.handler_timeout_ms);
        let capability = HttpCapability::new(name, &cap.url, Duration::from_millis(timeout_ms))
            .with_context(|| format!("invalid capability {name}"))?
            .with_description(cap.description.clone());
        let _ = builder
            .register(Arc::new(capability))
            .with_context(|| format!("failed to register capability {name}"))?;
    }
    let registry = builder.build();
    if registry.is_empty() {
        tracing::warn!("no capabilities configured; every request will go unmatched");
    }
    Ok(registry)
}

fn build_classifier(settings: &RelaySettings) -> Result<ChatClassifier> {
    let classifier = &settings.classifier;
    let api_key = std::env::var(&classifier.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from);
    if api_key.is_none() {
        tracing::warn!(env = %classifier.api_key_env, "classifier API key not set");
    }
    ChatClassifier::new(ChatClassifierConfig {
        base_url: classifier.base_url.clone(),
        model: classifier.model.clone(),
        api_key,
        request_timeout: Duration::from_millis(classifier.request_timeout_ms),
    })
    .context("failed to build classifier")
}

fn build_orchestrator(settings: &RelaySettings) -> Result<Arc<Orchestrator>> {
    let store = build_store(settings)?;
    let registry = build_registry(settings)?;
    let classifier = build_classifier(settings)?;
    let config = WorkflowConfig {
        max_dispatches: settings.workflow.max_dispatches,
        classifier_timeout: Duration::from_millis(settings.workflow.classifier_timeout_ms),
        handler_timeout: Duration::from_millis(settings.workflow.handler_timeout_ms),
    };
    tracing::info!(
        backend = store.backend_kind(),
        capabilities = registry.len(),
        model = %settings.classifier.model,
        "orchestrator ready"
    );
    Ok(Arc::new(Orchestrator::new(
        Arc::new(registry),
        Arc::new(classifier),
        store,
        config,
    )))
}

async fn serve(settings: &RelaySettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let orchestrator = build_orchestrator(settings)?;
    let shutdown = CancellationToken::new();

    let sweeper = (settings.store.sweep_interval_secs > 0).then(|| {
        orchestrator.store().spawn_sweeper(
            Duration::from_secs(settings.store.sweep_interval_secs),
            shutdown.child_token(),
        )
    });

    let config = relay_server::ServerConfig {
        host: host.unwrap_or_else(|| settings.server.host.clone()),
        port: port.unwrap_or(settings.server.port),
        turn_deadline: settings.turn_deadline(),
    };
    let handle = relay_server::start(config, orchestrator, shutdown.clone())
        .await
        .context("failed to start server")?;
    tracing::info!(
        port = handle.port,
        turn_deadline_secs = settings.turn_deadline().as_secs(),
        "relay server ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    shutdown.cancel();
    handle.wait().await;
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    Ok(())
}

async fn ask(settings: &RelaySettings, query: &str, session: Option<&str>) -> Result<()> {
    let orchestrator = build_orchestrator(settings)?;
    let result = orchestrator.run_workflow(query, session).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    relay_telemetry::init_telemetry(telemetry_config(&settings))
        .context("failed to initialize logging")?;

    match cli.command {
        Command::Serve { host, port } => serve(&settings, host, port).await,
        Command::Ask { query, session } => ask(&settings, &query, session.as_deref()).await,
    }
}
