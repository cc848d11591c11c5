// # relwatchd - Relation Watcher Daemon
//
// This is a thin integration layer:
// - no diffing, throttling or retry logic here (all of it lives in
//   relwatch-core)
// - configuration is via environment variables only
//
// The relwatchd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Wiring stores, the VK client, the gateway and the scheduler
// 4. Registering and starting owners
// 5. Stopping every watch and flushing the store on SIGTERM/SIGINT
//
// ## Configuration
//
// ### Provider
// - `RELWATCH_ACCESS_TOKEN`: VK user access token (required)
// - `RELWATCH_API_VERSION`: VK API version (default 5.131)
// - `RELWATCH_API_BASE_URL`: VK method endpoint (default https://api.vk.com/method)
// - `RELWATCH_MIN_API_CALL_DELAY_MS`: Minimum gap between provider calls (default 350)
//
// ### Watching
// - `RELWATCH_OWNERS`: Comma-separated owner ids registered and started at boot
// - `RELWATCH_RELATION_TYPES`: Comma-separated relation types (default friend,follower)
// - `RELWATCH_POLL_INTERVAL_SECS`: Seconds between cycles per owner (default 60)
//
// ### Store
// - `RELWATCH_STORE_TYPE`: Type of store (file, memory; default memory)
// - `RELWATCH_STORE_PATH`: Path to store file (for file store)
//
// ### Logging
// - `RELWATCH_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export RELWATCH_ACCESS_TOKEN=vk1.a.your_token
// export RELWATCH_OWNERS=1,5592362
// export RELWATCH_STORE_TYPE=file
// export RELWATCH_STORE_PATH=/var/lib/relwatch/state.json
//
// relwatchd
// ```

use anyhow::Result;
use relwatch_core::config::{StoreConfig, WatchConfig};
use relwatch_core::traits::{ProfileStore, RegistrationStore, RelationStore};
use relwatch_core::{
    FileStore, MembershipSource, MemoryStore, RateLimitedGateway, ReconciliationEngine,
    WatchEvent, WatchScheduler, WatchService,
};
use relwatch_provider_vk::VkProviderClient;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Upper bound on stopping every watch and flushing the store
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum RelwatchExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<RelwatchExitCode> for ExitCode {
    fn from(code: RelwatchExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    watch: WatchConfig,
    owners: Vec<i64>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut watch = WatchConfig::default();

        let Some(access_token) = get("RELWATCH_ACCESS_TOKEN") else {
            anyhow::bail!(
                "RELWATCH_ACCESS_TOKEN is required. \
                Set it via: export RELWATCH_ACCESS_TOKEN=your_token"
            );
        };
        let relwatch_core::ProviderConfig::Vk {
            access_token: token,
            api_version,
            base_url,
        } = &mut watch.provider;
        *token = access_token;
        if let Some(version) = get("RELWATCH_API_VERSION") {
            *api_version = version;
        }
        if let Some(url) = get("RELWATCH_API_BASE_URL") {
            *base_url = url;
        }

        if let Some(delay) = get("RELWATCH_MIN_API_CALL_DELAY_MS") {
            watch.gateway.min_call_delay_ms = parse_number("RELWATCH_MIN_API_CALL_DELAY_MS", &delay)?;
        }
        if let Some(interval) = get("RELWATCH_POLL_INTERVAL_SECS") {
            watch.scheduler.poll_interval_secs =
                parse_number("RELWATCH_POLL_INTERVAL_SECS", &interval)?;
        }
        if let Some(types) = get("RELWATCH_RELATION_TYPES") {
            watch.relation_types = parse_list("RELWATCH_RELATION_TYPES", &types)?;
        }

        watch.store = match get("RELWATCH_STORE_TYPE").as_deref().unwrap_or("memory") {
            "memory" => StoreConfig::Memory,
            "file" => match get("RELWATCH_STORE_PATH") {
                Some(path) => StoreConfig::File { path },
                None => anyhow::bail!(
                    "RELWATCH_STORE_PATH is required when RELWATCH_STORE_TYPE=file. \
                    Set it via: export RELWATCH_STORE_PATH=/var/lib/relwatch/state.json"
                ),
            },
            other => anyhow::bail!(
                "RELWATCH_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        };

        let owners = match get("RELWATCH_OWNERS") {
            Some(owners) => parse_list("RELWATCH_OWNERS", &owners)?,
            None => Vec::new(),
        };

        Ok(Self {
            watch,
            owners,
            log_level: get("RELWATCH_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Runs the library's own validation, then the checks only the daemon
    /// can make (placeholder token, store directory, log level).
    fn validate(&self) -> Result<()> {
        self.watch.validate()?;

        // Check for obvious placeholder tokens (common mistake)
        let relwatch_core::ProviderConfig::Vk { access_token, .. } = &self.watch.provider;
        let token_lower = access_token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower == "token"
        {
            anyhow::bail!(
                "RELWATCH_ACCESS_TOKEN appears to be a placeholder. \
                Use an actual VK access token."
            );
        }

        if let StoreConfig::File { path } = &self.watch.store
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "RELWATCH_STORE_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        if let Some(owner) = self.owners.iter().find(|owner| **owner <= 0) {
            anyhow::bail!("RELWATCH_OWNERS must hold positive ids. Got: {}", owner);
        }

        self.level()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "RELWATCH_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("{} must be a number. Got '{}': {}", key, value, e))
}

fn parse_list<T: std::str::FromStr>(key: &str, value: &str) -> Result<Vec<T>>
where
    T::Err: std::fmt::Display,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            item.parse()
                .map_err(|e| anyhow::anyhow!("{} has an invalid entry '{}': {}", key, item, e))
        })
        .collect()
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return RelwatchExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return RelwatchExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return RelwatchExitCode::ConfigError.into();
    }

    info!("Starting relwatchd daemon");
    info!(
        "Configuration loaded: {} owner(s), relation types {:?}, provider {}",
        config.owners.len(),
        config.watch.relation_types,
        config.watch.provider.type_name()
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return RelwatchExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            RelwatchExitCode::RuntimeError
        } else {
            RelwatchExitCode::CleanShutdown
        }
    });

    result.into()
}

/// One store seen through every store trait
struct Stores {
    relations: Arc<dyn RelationStore>,
    registrations: Arc<dyn RegistrationStore>,
    profiles: Arc<dyn ProfileStore>,
}

impl Stores {
    fn shared<S>(store: Arc<S>) -> Self
    where
        S: RelationStore + RegistrationStore + ProfileStore + 'static,
    {
        Self {
            relations: store.clone(),
            registrations: store.clone(),
            profiles: store,
        }
    }

    async fn open(config: &StoreConfig) -> Result<Self> {
        match config {
            StoreConfig::Memory => {
                warn!("Using the memory store: history is lost on restart");
                Ok(Self::shared(Arc::new(MemoryStore::new())))
            }
            StoreConfig::File { path } => {
                info!("Using the file store at {}", path);
                Ok(Self::shared(Arc::new(FileStore::new(path).await?)))
            }
        }
    }
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let watch = &config.watch;

    let stores = Stores::open(&watch.store).await?;
    let client = VkProviderClient::from_config(&watch.provider)?;
    let gateway = Arc::new(RateLimitedGateway::from_config(&watch.gateway));
    info!(
        "Provider calls spaced at least {:?} apart",
        gateway.min_delay()
    );

    let source = Arc::new(MembershipSource::new(
        Arc::new(client),
        gateway,
        stores.profiles.clone(),
    ));
    let engine = Arc::new(ReconciliationEngine::new(
        source.clone(),
        stores.relations.clone(),
    ));
    let (scheduler, events) = WatchScheduler::new(engine, watch)?;
    let service = WatchService::new(
        Arc::new(scheduler),
        stores.registrations,
        stores.relations,
        source,
    );

    let monitor = tokio::spawn(log_events(events));

    for owner_id in &config.owners {
        service.register(*owner_id).await?;
    }
    let started = service.start_all().await?;
    if started == 0 {
        warn!("No owners registered; set RELWATCH_OWNERS to watch someone");
    }

    info!("Daemon initialized successfully");

    let signal = wait_for_shutdown_signal().await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    let shutdown = tokio::time::timeout(SHUTDOWN_TIMEOUT, service.shutdown()).await;
    monitor.abort();

    match shutdown {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT),
    }

    info!("Daemon stopped");
    Ok(())
}

/// Log watch events as they arrive
async fn log_events(mut events: mpsc::Receiver<WatchEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WatchEvent::Scheduled { owner_id } => debug!("Watch for {} scheduled", owner_id),
            WatchEvent::Unscheduled { owner_id } => debug!("Watch for {} unscheduled", owner_id),
            WatchEvent::CycleCompleted {
                owner_id,
                relation_type,
                appeared,
                disappeared,
            } if !appeared.is_empty() || !disappeared.is_empty() => {
                info!(
                    "{} of {}: +{} -{}",
                    relation_type,
                    owner_id,
                    appeared.len(),
                    disappeared.len()
                );
            }
            WatchEvent::CycleCompleted { .. } => {}
            WatchEvent::CycleAborted {
                owner_id,
                relation_type,
                phase,
                ..
            } => debug!(
                "{} cycle of {} aborted while {}; retrying next tick",
                relation_type, owner_id, phase
            ),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
