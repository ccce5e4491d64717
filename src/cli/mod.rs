//! Command-line interface for pagebot.
//!
//! Provides commands for running the bot (scheduler plus webhook server),
//! single poll cycles, connection checks, and inspecting the ledger.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::{GeminiClient, Generator, GraphClient, PageIdentity};
use crate::config::{mask, Config};
use crate::core::{Ledger, Orchestrator, Scheduler};
use crate::domain::{LedgerRecord, LedgerStats};
use crate::webhook;

/// pagebot - At-most-once AI auto-replies for page comments and messages
#[derive(Parser, Debug)]
#[command(name = "pagebot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the poll scheduler and the webhook server until Ctrl+C
    Run {
        /// Seconds between poll cycles (overrides config)
        #[arg(short, long, env = "CHECK_INTERVAL_SECONDS")]
        interval: Option<u64>,

        /// Address for the webhook server (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Poll only; do not start the webhook server
        #[arg(long)]
        no_server: bool,
    },

    /// Run only the webhook server
    Serve {
        /// Address to bind to (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run a single poll cycle and exit
    Check,

    /// Verify the page token and the AI connection
    Verify,

    /// Show ledger totals
    Stats,

    /// List recently processed events
    History {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List recent activity log entries
    Activity {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration with secrets masked
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Config::load()?;

        match self.command {
            Commands::Run {
                interval,
                bind,
                no_server,
            } => run_bot(config, interval, bind, no_server).await,
            Commands::Serve { bind } => serve_only(config, bind).await,
            Commands::Check => run_check(config).await,
            Commands::Verify => verify_connections(config).await,
            Commands::Stats => show_stats(&config),
            Commands::History { limit } => show_history(&config, limit),
            Commands::Activity { limit } => show_activity(&config, limit),
            Commands::Config => show_config(&config),
        }
    }
}

/// Fully wired pipeline
struct Runtime {
    config: Config,
    orchestrator: Orchestrator,
    identity: PageIdentity,
}

async fn build_runtime(config: Config) -> Result<Runtime> {
    config.validate()?;

    let graph = Arc::new(
        GraphClient::new(config.graph_config()?).context("Failed to build Graph client")?,
    );
    let identity = graph
        .verify_token()
        .await
        .context("Failed to verify page access token")?;

    let gemini = Arc::new(
        GeminiClient::new(config.gemini_config()?).context("Failed to build Gemini client")?,
    );

    let ledger = Arc::new(
        Ledger::open(&config.database)
            .with_context(|| format!("Failed to open ledger: {}", config.database.display()))?,
    );

    let settings = config.pipeline_settings(identity.id.clone(), config.persona());
    let orchestrator = Orchestrator::new(ledger, gemini, graph.clone(), graph, settings);

    Ok(Runtime {
        config,
        orchestrator,
        identity,
    })
}

fn open_ledger(config: &Config) -> Result<Ledger> {
    Ledger::open(&config.database)
        .with_context(|| format!("Failed to open ledger: {}", config.database.display()))
}

fn print_banner(runtime: &Runtime) {
    println!("╔════════════════════════════════════════════╗");
    println!("  pagebot v{}", env!("CARGO_PKG_VERSION"));
    println!("╚════════════════════════════════════════════╝");
    println!();
    println!(
        "Page:     {} ({})",
        runtime.identity.name.as_deref().unwrap_or("Unknown"),
        runtime.identity.id
    );
    println!("Model:    {}", runtime.config.gemini.model);
    println!("Ledger:   {}", runtime.config.database.display());
}

fn print_stats(stats: &LedgerStats) {
    println!("📊 Historical stats:");
    println!(
        "   Comments: {} total, {} replied",
        stats.total_comments, stats.replied_comments
    );
    println!(
        "   Messages: {} total, {} replied",
        stats.total_messages, stats.replied_messages
    );
}

async fn bind_listener(bind: &str) -> Result<TcpListener> {
    TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind webhook server to {}", bind))
}

/// Resolves once `rx` observes `true` or its sender is gone
async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Run scheduler and webhook server until Ctrl+C
async fn run_bot(
    mut config: Config,
    interval: Option<u64>,
    bind: Option<String>,
    no_server: bool,
) -> Result<()> {
    if let Some(seconds) = interval {
        config.bot.check_interval_seconds = seconds;
    }
    if let Some(bind) = bind {
        config.bind = bind;
    }

    let runtime = build_runtime(config).await?;
    print_banner(&runtime);
    println!("Interval: {}s", runtime.config.bot.check_interval_seconds);
    println!();
    print_stats(&runtime.orchestrator.ledger().stats()?);
    println!();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        Arc::new(runtime.orchestrator.clone()),
        runtime.config.check_interval(),
    )?;
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let server_task: Option<JoinHandle<Result<()>>> = if no_server {
        None
    } else {
        let listener = bind_listener(&runtime.config.bind).await?;
        let app = webhook::router(runtime.orchestrator.clone(), runtime.config.webhook_config());
        println!("🌐 Webhook server on {}{}", runtime.config.bind, webhook::WEBHOOK_PATH);
        Some(tokio::spawn(webhook::serve(
            listener,
            app,
            stopped(shutdown_rx.clone()),
        )))
    };

    println!("✅ Bot is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("🛑 Shutting down, waiting for in-flight work...");
    let _ = shutdown_tx.send(true);

    let report = scheduler_task.await.context("Scheduler task failed")?;
    info!(
        cycles = report.cycles_started,
        dropped = report.ticks_dropped,
        "Scheduler finished"
    );
    if let Some(server) = server_task {
        server.await.context("Webhook server task failed")??;
    }

    print_stats(&runtime.orchestrator.ledger().stats()?);
    println!("👋 Bot stopped");
    Ok(())
}

/// Webhook server alone
async fn serve_only(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.bind = bind;
    }

    let runtime = build_runtime(config).await?;
    print_banner(&runtime);

    let listener = bind_listener(&runtime.config.bind).await?;
    let app = webhook::router(runtime.orchestrator.clone(), runtime.config.webhook_config());
    println!("🌐 Webhook server on {}{}", runtime.config.bind, webhook::WEBHOOK_PATH);

    webhook::serve(listener, app, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
    })
    .await
}

/// One poll cycle
async fn run_check(config: Config) -> Result<()> {
    let runtime = build_runtime(config).await?;

    println!("🔄 Running one check cycle...");
    let stats = runtime.orchestrator.poll_cycle().await;

    println!("Checked:  {}", stats.checked);
    println!("Found:    {}", stats.found);
    println!("New:      {}", stats.new_count);
    println!("Replied:  {}", stats.replies_sent);
    println!("Errors:   {}", stats.errors);
    Ok(())
}

/// Token and AI connectivity checks
async fn verify_connections(config: Config) -> Result<()> {
    config.validate()?;

    println!("🔍 Verifying connections...");

    let graph = GraphClient::new(config.graph_config()?).context("Failed to build Graph client")?;
    let identity = graph
        .verify_token()
        .await
        .context("Failed to verify page access token")?;
    println!(
        "✓ Page token OK: {} ({})",
        identity.name.as_deref().unwrap_or("Unknown"),
        identity.id
    );
    if config.facebook.page_id.as_deref() != Some(identity.id.as_str()) {
        println!("  ⚠ Token is for a different page than FACEBOOK_PAGE_ID; using the token's page");
    }

    let gemini =
        GeminiClient::new(config.gemini_config()?).context("Failed to build Gemini client")?;
    gemini
        .health_check()
        .await
        .context("AI connection check failed")?;
    println!("✓ AI connection OK ({})", config.gemini.model);

    Ok(())
}

fn show_stats(config: &Config) -> Result<()> {
    let ledger = open_ledger(config)?;
    print_stats(&ledger.stats()?);
    Ok(())
}

fn preview(text: Option<&str>, width: usize) -> String {
    let text = text.unwrap_or("").replace('\n', " ");
    if text.chars().count() > width {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

fn print_record(record: &LedgerRecord) {
    println!(
        "{:<20} {:<8} {:<9} {:<18} {}",
        record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        record.kind.as_str(),
        record.status.as_str(),
        record.error_reason.as_deref().unwrap_or("-"),
        preview(record.text.as_deref(), 40)
    );
}

fn show_history(config: &Config, limit: usize) -> Result<()> {
    let ledger = open_ledger(config)?;
    let records = ledger.recent(limit)?;

    if records.is_empty() {
        println!("No processed events yet");
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:<9} {:<18} {}",
        "RECORDED", "KIND", "STATUS", "REASON", "TEXT"
    );
    println!("{}", "-".repeat(100));
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn show_activity(config: &Config, limit: usize) -> Result<()> {
    let ledger = open_ledger(config)?;
    let entries = ledger.recent_activity(limit)?;

    if entries.is_empty() {
        println!("No activity recorded yet");
        return Ok(());
    }

    println!("{:<20} {:<12} {}", "TIME", "KIND", "DETAIL");
    println!("{}", "-".repeat(80));
    for entry in &entries {
        println!(
            "{:<20} {:<12} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.kind,
            entry.detail
        );
    }
    Ok(())
}

fn show_config(cfg: &Config) -> Result<()> {
    println!("╔════════════════════════════════════════════╗");
    println!("  pagebot Configuration");
    println!("╚════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Ledger:   {}", cfg.database.display());
    println!(
        "  Persona:  {}",
        cfg.persona_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built-in)".to_string())
    );
    println!();
    println!("Facebook:");
    println!("  Page ID:      {}", cfg.facebook.page_id.as_deref().unwrap_or("(not set)"));
    println!("  Access token: {}", mask(cfg.facebook.access_token.as_deref()));
    println!("  App secret:   {}", mask(cfg.facebook.app_secret.as_deref()));
    println!("  Verify token: {}", mask(Some(cfg.facebook.verify_token.as_str())));
    println!("  API base:     {}", cfg.facebook.api_base);
    println!();
    println!("Gemini:");
    println!("  API key:  {}", mask(cfg.gemini.api_key.as_deref()));
    println!("  Model:    {}", cfg.gemini.model);
    println!();
    println!("Bot:");
    println!("  Interval:       {}s", cfg.bot.check_interval_seconds);
    println!("  Call timeout:   {}s", cfg.bot.call_timeout_seconds);
    println!("  Workers:        {}", cfg.bot.workers);
    println!("  Posts/cycle:    {}", cfg.bot.post_limit);
    println!("  Conversations:  {}", cfg.bot.conversation_limit);
    println!("  Context window: {}", cfg.bot.context_window);
    println!("  Webhook bind:   {}", cfg.bind);

    if let Err(e) = cfg.validate() {
        println!();
        println!("⚠ {}", e);
    }
    Ok(())
}
