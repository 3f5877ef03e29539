use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bidwatch_client::llm::{DEFAULT_BASE_URL as OPENAI_BASE_URL, DEFAULT_MODEL};
use bidwatch_client::{DiscordNotifier, LogNotifier, OpenAiClassifier, ReqwestFetcher};
use bidwatch_core::config::{
    ChangePolicy, DEFAULT_BASE_URL, DeliveryFailurePolicy, PortalConfig, SchedulerConfig,
    SyncConfig, parse_flag,
};
use bidwatch_core::error::AppError;
use bidwatch_core::models::Listing;
use bidwatch_core::scheduler::{Scheduler, TracingSchedulerReporter};
use bidwatch_core::sync::SyncService;
use bidwatch_core::throttle::{ThrottleConfig, ThrottledFetcher};
use bidwatch_core::traits::{Notifier, SnapshotStore};
use bidwatch_core::PaginationCrawler;
use bidwatch_db::json_store::DEFAULT_STATE_PATH;
use bidwatch_db::{Database, DatabaseConfig, JsonSnapshotStore, PgSnapshotStore};

#[derive(Parser)]
#[command(
    name = "bidwatch",
    version,
    about = "Watches a procurement portal and announces new solicitations"
)]
struct Cli {
    #[command(flatten)]
    portal: PortalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the portal on an interval until interrupted
    Watch(SyncArgs),

    /// Run a single sync pass and print its report
    Run(SyncArgs),

    /// Crawl the portal and print the current listings without touching state
    Crawl {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print the persisted snapshot
    Snapshot {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct PortalArgs {
    /// Search page of the procurement portal
    #[arg(long, env = "BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,

    /// Keep only listings in this category (case-insensitive)
    #[arg(long, env = "CATEGORY_FILTER", global = true)]
    category: Option<String>,

    /// Upper bound on result pages fetched per crawl
    #[arg(long, env = "MAX_PAGES", default_value_t = 500, global = true)]
    max_pages: usize,

    #[arg(long, env = "USER_AGENT", default_value = "bidwatch/0.1", global = true)]
    user_agent: String,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30, global = true,
          value_parser = clap::value_parser!(u64).range(1..))]
    http_timeout_secs: u64,

    /// Minimum delay between requests to the portal, 0 disables
    #[arg(long, env = "REQUEST_DELAY_MS", default_value_t = 0, global = true)]
    request_delay_ms: u64,

    /// JSON snapshot file, used when no database is configured
    #[arg(long, env = "STATE_PATH", default_value = DEFAULT_STATE_PATH, global = true)]
    state_path: PathBuf,

    /// Store the snapshot in PostgreSQL instead of the JSON file
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    /// Connection pool size for the PostgreSQL store
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5, global = true,
          value_parser = clap::value_parser!(u32).range(1..))]
    database_max_connections: u32,
}

#[derive(Args)]
struct SyncArgs {
    /// Log listings instead of posting them to Discord
    #[arg(long)]
    dry_run: bool,

    #[arg(long, env = "CHECK_INTERVAL_MINUTES", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    check_interval_minutes: u64,

    /// Discard the persisted snapshot before the first run (1/true/yes)
    #[arg(long, env = "RESET_STATE_ON_START", action = clap::ArgAction::Set, value_parser = flag,
          num_args = 0..=1, default_value = "false", default_missing_value = "true")]
    reset_state_on_start: bool,

    /// Parallel detail-page fetches and classifier calls
    #[arg(long, env = "SYNC_CONCURRENCY", default_value_t = 4)]
    sync_concurrency: usize,

    /// Whether to persist the snapshot when delivery fails (save|skip)
    #[arg(long, env = "SNAPSHOT_ON_DELIVERY_FAILURE", default_value_t = DeliveryFailurePolicy::SkipSnapshot)]
    snapshot_on_delivery_failure: DeliveryFailurePolicy,

    /// Also notify known listings whose title or status changed
    #[arg(long, env = "NOTIFY_ON_CHANGE")]
    notify_on_change: bool,

    /// Enables relevance filtering when set
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    openai_model: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = OPENAI_BASE_URL)]
    openai_base_url: String,

    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    discord_token: Option<String>,

    #[arg(long, env = "DISCORD_CHANNEL_ID")]
    discord_channel_id: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn flag(raw: &str) -> Result<bool, String> {
    Ok(parse_flag(raw))
}

type PortalFetcher = ThrottledFetcher<ReqwestFetcher>;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bidwatch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch(args) => cmd_watch(&cli.portal, &args).await,
        Commands::Run(args) => cmd_run(&cli.portal, &args).await,
        Commands::Crawl { format } => cmd_crawl(&cli.portal, format).await,
        Commands::Snapshot { format } => cmd_snapshot(&cli.portal, format).await,
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn portal_config(args: &PortalArgs) -> PortalConfig {
    let config = PortalConfig::default()
        .with_base_url(&args.base_url)
        .with_max_pages(args.max_pages);
    match &args.category {
        Some(category) => config.with_category_filter(category),
        None => config,
    }
}

fn build_fetcher(args: &PortalArgs) -> Result<PortalFetcher> {
    let fetcher = ReqwestFetcher::with_options(
        &args.user_agent,
        Duration::from_secs(args.http_timeout_secs),
    )
    .context("Failed to create HTTP client")?;
    let throttle = ThrottleConfig::new(Duration::from_millis(args.request_delay_ms));
    Ok(ThrottledFetcher::new(fetcher, throttle))
}

/// Snapshot store selected by configuration.
#[derive(Clone)]
enum Store {
    Json(JsonSnapshotStore),
    Postgres(PgSnapshotStore),
}

impl SnapshotStore for Store {
    async fn load(&self) -> Result<Vec<Listing>, AppError> {
        match self {
            Store::Json(store) => store.load().await,
            Store::Postgres(store) => store.load().await,
        }
    }

    async fn save(&self, listings: &[Listing]) -> Result<(), AppError> {
        match self {
            Store::Json(store) => store.save(listings).await,
            Store::Postgres(store) => store.save(listings).await,
        }
    }
}

async fn open_store(args: &PortalArgs) -> Result<Store> {
    match &args.database_url {
        Some(url) => {
            let config = DatabaseConfig::new(url).with_max_connections(args.database_max_connections);
            let db = Database::open(&config)
                .await
                .context("Failed to open snapshot database")?;
            let store = db.snapshot_store();
            let stored = store.count().await?;
            tracing::info!(stored, "Using PostgreSQL snapshot store");
            Ok(Store::Postgres(store))
        }
        None => {
            tracing::info!(path = %args.state_path.display(), "Using JSON snapshot store");
            Ok(Store::Json(JsonSnapshotStore::new(&args.state_path)))
        }
    }
}

/// Notification channel selected by configuration.
#[derive(Clone)]
enum Channel {
    Discord(DiscordNotifier),
    Log(LogNotifier),
}

impl Notifier for Channel {
    async fn deliver(&self, listings: &[Listing]) -> Result<(), AppError> {
        match self {
            Channel::Discord(notifier) => notifier.deliver(listings).await,
            Channel::Log(notifier) => notifier.deliver(listings).await,
        }
    }
}

fn build_channel(args: &SyncArgs) -> Result<Channel> {
    if args.dry_run {
        tracing::info!("Dry run: listings will be logged, not sent");
        return Ok(Channel::Log(LogNotifier));
    }
    match (&args.discord_token, &args.discord_channel_id) {
        (Some(token), Some(channel)) => Ok(Channel::Discord(DiscordNotifier::new(token, channel))),
        _ => bail!("DISCORD_TOKEN and DISCORD_CHANNEL_ID must be set (or pass --dry-run)"),
    }
}

async fn build_scheduler(
    portal: &PortalArgs,
    args: &SyncArgs,
) -> Result<Scheduler<PortalFetcher, OpenAiClassifier, Channel, Store>> {
    let fetcher = build_fetcher(portal)?;
    let store = open_store(portal).await?;
    let channel = build_channel(args)?;

    let change_policy = if args.notify_on_change {
        ChangePolicy::Content
    } else {
        ChangePolicy::Identity
    };
    let sync_config = SyncConfig::default()
        .with_concurrency(args.sync_concurrency)
        .with_change_policy(change_policy)
        .with_delivery_failure_policy(args.snapshot_on_delivery_failure);

    let service = match &args.openai_api_key {
        Some(key) => {
            let classifier =
                OpenAiClassifier::with_base_url(key, &args.openai_model, &args.openai_base_url)?;
            tracing::info!(model = %classifier.model(), "Relevance filtering enabled");
            SyncService::with_oracle(
                fetcher,
                portal_config(portal),
                classifier,
                channel,
                store,
                sync_config,
            )?
        }
        None => {
            tracing::info!("OPENAI_API_KEY not set, every new listing will be sent");
            SyncService::new(fetcher, portal_config(portal), channel, store, sync_config)?
        }
    };

    let scheduler_config = SchedulerConfig::default()
        .with_interval_minutes(args.check_interval_minutes)
        .with_reset_state_on_start(args.reset_state_on_start);

    Ok(Scheduler::new(service, scheduler_config))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        token.cancel();
    });
}

async fn cmd_watch(portal: &PortalArgs, args: &SyncArgs) -> Result<()> {
    let scheduler = build_scheduler(portal, args).await?;

    let cancel_token = CancellationToken::new();
    cancel_on_ctrl_c(cancel_token.clone());

    scheduler
        .run(cancel_token, &TracingSchedulerReporter)
        .await?;
    Ok(())
}

async fn cmd_run(portal: &PortalArgs, args: &SyncArgs) -> Result<()> {
    let scheduler = build_scheduler(portal, args).await?;

    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let report = scheduler
        .run_once(token)
        .await
        .context("Sync run did not complete, snapshot left unchanged")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_crawl(portal: &PortalArgs, format: OutputFormat) -> Result<()> {
    let crawler = PaginationCrawler::new(build_fetcher(portal)?, portal_config(portal))?;
    let listings = crawler.crawl().await.context("Crawl failed")?;
    write_listings(&listings, format)
}

async fn cmd_snapshot(portal: &PortalArgs, format: OutputFormat) -> Result<()> {
    let store = open_store(portal).await?;
    let listings = store.load().await.context("Failed to load snapshot")?;
    if listings.is_empty() {
        tracing::info!("Snapshot is empty");
    }
    write_listings(&listings, format)
}

fn write_listings(listings: &[Listing], format: OutputFormat) -> Result<()> {
    let stdout = std::io::stdout();
    match format {
        OutputFormat::Json => {
            let mut out = stdout.lock();
            serde_json::to_writer_pretty(&mut out, listings)?;
            writeln!(out)?;
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(stdout.lock());
            for listing in listings {
                writer.serialize(listing)?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_watch_with_dry_run() {
        let cli = Cli::try_parse_from([
            "bidwatch",
            "--base-url",
            "https://portal.test/Procurement.aspx",
            "watch",
            "--dry-run",
            "--check-interval-minutes",
            "15",
            "--reset-state-on-start",
            "--snapshot-on-delivery-failure",
            "save",
        ])
        .unwrap();

        assert_eq!(cli.portal.base_url, "https://portal.test/Procurement.aspx");
        let Commands::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert!(args.dry_run);
        assert_eq!(args.check_interval_minutes, 15);
        assert!(args.reset_state_on_start);
        assert_eq!(
            args.snapshot_on_delivery_failure,
            DeliveryFailurePolicy::SaveSnapshot
        );
        assert!(matches!(build_channel(&args), Ok(Channel::Log(_))));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = Cli::try_parse_from(["bidwatch", "run", "--check-interval-minutes", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn zero_http_timeout_is_rejected() {
        let result = Cli::try_parse_from(["bidwatch", "crawl", "--http-timeout-secs", "0"]);
        assert!(result.is_err());
        let cli = Cli::try_parse_from(["bidwatch", "crawl", "--http-timeout-secs", "5"]).unwrap();
        assert_eq!(cli.portal.http_timeout_secs, 5);
    }

    #[test]
    fn database_pool_size_is_positive() {
        let cli = Cli::try_parse_from(["bidwatch", "snapshot", "--database-max-connections", "12"])
            .unwrap();
        assert_eq!(cli.portal.database_max_connections, 12);
        let result = Cli::try_parse_from(["bidwatch", "snapshot", "--database-max-connections", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn reset_flag_accepts_env_spellings() {
        let cli =
            Cli::try_parse_from(["bidwatch", "run", "--reset-state-on-start", "yes"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.reset_state_on_start);
    }

    #[test]
    fn discord_is_required_without_dry_run() {
        let cli = Cli::try_parse_from(["bidwatch", "run", "--discord-token", "t"]).unwrap();
        let Commands::Run(mut args) = cli.command else {
            panic!("expected run");
        };
        args.discord_channel_id = None;
        assert!(build_channel(&args).is_err());

        args.discord_channel_id = Some("12345".into());
        assert!(matches!(build_channel(&args), Ok(Channel::Discord(_))));
    }

    #[test]
    fn category_flag_sets_filter() {
        let cli =
            Cli::try_parse_from(["bidwatch", "crawl", "--category", "IT", "--format", "csv"])
                .unwrap();
        let config = portal_config(&cli.portal);
        assert_eq!(config.category_filter.as_deref(), Some("IT"));
        assert!(matches!(
            cli.command,
            Commands::Crawl {
                format: OutputFormat::Csv
            }
        ));
    }
}
