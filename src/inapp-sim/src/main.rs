//! inapp-sim: drives the in-app messaging engine from JSON fixtures.
//!
//! The campaign list comes from a ping response fixture and host activity
//! (events, view changes, user changes) from a script of timed steps.
//! Display collaborators only log, so the whole decision pipeline can be
//! watched without a UI.

mod collaborators;

use anyhow::Context;
use campaign_core::config::AppConfig;
use campaign_core::types::{AttributeValue, Event, EventType, UserInfo};
use campaign_inapp::{
    AllowAllContexts, CampaignCache, Collaborators, InAppMessaging, InMemoryCache, JsonFileCache,
};
use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::collaborators::{
    AllowAll, EchoImages, FixtureList, LoggingImpressions, LoggingReporter, LoggingRouter,
    LoggingTooltips, StaticConfig,
};

#[derive(Parser, Debug)]
#[command(name = "inapp-sim")]
#[command(about = "Run the in-app messaging engine against JSON fixtures")]
#[command(version)]
struct Cli {
    /// Ping response fixture (campaign list)
    #[arg(long)]
    campaigns: PathBuf,

    /// Script of host steps to replay
    #[arg(long)]
    events: Option<PathBuf>,

    /// TOML config file, layered under INAPP__* environment variables
    #[arg(long, env = "INAPP_CONFIG")]
    config: Option<PathBuf>,

    /// JSON campaign cache (overrides config)
    #[arg(long, env = "INAPP__CACHE__PATH")]
    cache: Option<PathBuf>,

    /// How long each campaign stays on screen before it is closed
    #[arg(long, default_value_t = 1_000)]
    on_screen_ms: u64,

    /// Total run time before shutting down
    #[arg(long, default_value_t = 30)]
    run_for_secs: u64,
}

#[derive(Debug, Deserialize)]
struct Step {
    /// Pause before this step.
    #[serde(default)]
    after_ms: u64,
    #[serde(flatten)]
    action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Action {
    Event(SimEvent),
    ViewAppeared(String),
    ViewDisappeared(String),
    User(UserInfo),
    CloseMessage { clear_queue: bool },
    CloseTooltip(String),
}

#[derive(Debug, Deserialize)]
struct SimEvent {
    event_type: EventType,
    #[serde(default)]
    name: String,
    #[serde(default)]
    attributes: BTreeMap<String, AttributeValue>,
}

impl From<SimEvent> for Event {
    fn from(sim: SimEvent) -> Self {
        let name = if sim.name.is_empty() {
            sim.event_type.name().to_string()
        } else {
            sim.name
        };
        sim.attributes
            .into_iter()
            .fold(Event::new(sim.event_type, name), |event, (key, value)| {
                event.with_attribute(key, value)
            })
    }
}

fn apply(messaging: &InAppMessaging, action: Action) {
    match action {
        Action::Event(event) => messaging.log_event(event.into()),
        Action::ViewAppeared(view) => messaging.view_did_appear(view),
        Action::ViewDisappeared(view) => messaging.view_did_disappear(&view),
        Action::User(user) => messaging.register_preference(user),
        Action::CloseMessage { clear_queue } => messaging.close_message(clear_queue),
        Action::CloseTooltip(id) => messaging.close_tooltip(&id),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inapp_sim=info,campaign_inapp=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_with_file(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(path) = cli.cache {
        config.cache.path = Some(path);
    }

    let steps: Vec<Step> = match &cli.events {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Vec::new(),
    };

    let cache: Arc<dyn CampaignCache> = match &config.cache.path {
        Some(path) => Arc::new(JsonFileCache::new(path.clone())),
        None => Arc::new(InMemoryCache::new()),
    };
    let router = Arc::new(LoggingRouter::new(Duration::from_millis(cli.on_screen_ms)));

    let messaging = InAppMessaging::configure(
        &config,
        Collaborators {
            config_service: Arc::new(StaticConfig),
            list_service: Arc::new(FixtureList::new(cli.campaigns.clone())),
            permission_service: Arc::new(AllowAll),
            impressions: Arc::new(LoggingImpressions),
            images: Arc::new(EchoImages),
            router: router.clone(),
            tooltip_router: Arc::new(LoggingTooltips),
            contexts: Arc::new(AllowAllContexts),
            cache,
            reporter: Arc::new(LoggingReporter),
            clock: None,
        },
    )
    .await?;

    // Events only match campaigns that are already known.
    for _ in 0..50 {
        if !messaging.campaigns().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!(
        campaigns = messaging.campaigns().len(),
        steps = steps.len(),
        "Simulation starting"
    );

    let script = async {
        for step in steps {
            tokio::time::sleep(Duration::from_millis(step.after_ms)).await;
            apply(&messaging, step.action);
        }
        std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = script => {}
        _ = tokio::time::sleep(Duration::from_secs(cli.run_for_secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    messaging.shutdown().await;
    info!(displayed = ?router.displayed(), "Simulation finished");
    Ok(())
}
