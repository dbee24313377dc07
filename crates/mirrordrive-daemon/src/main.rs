//! MirrorDrive Daemon - Background synchronization service
//!
//! This binary runs as a user service and handles:
//! - Account bootstrap from the configured profiles
//! - One periodic sync loop per account
//! - Early wake-ups when local files change
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Every account gets its own [`SyncOrchestrator`] and loop task. A loop
//! runs a sync on each interval tick, or sooner when its [`ChangeTrigger`]
//! reports settled local changes. All loops share one `CancellationToken`
//! that is triggered on receipt of SIGTERM or SIGINT; an in-flight sync
//! observes the same token and finishes its session as paused.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use mirrordrive_cache::{DatabasePool, SqliteStateRepository};
use mirrordrive_core::{
    config::{AccountProfile, Config, LoggingConfig},
    domain::{AccountContext, AccountId, AuthState, SyncPath},
    ports::IStateRepository,
};
use mirrordrive_graph::{GraphClient, GraphRemoteDrive};
use mirrordrive_sync::{
    watcher::{ChangeTrigger, FileWatcher},
    LocalFileSystemAdapter, SyncError, SyncOptions, SyncOrchestrator,
};
use tokio::{sync::Notify, task::JoinSet, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command line arguments for `mirrordrived`
#[derive(Debug, Parser)]
#[command(name = "mirrordrived", version, about = "MirrorDrive synchronization daemon")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single sync per account and exit
    #[arg(long)]
    once: bool,
}

/// A configured account ready to be synced
struct AccountRuntime {
    account_id: AccountId,
    external_id: String,
    local_root: PathBuf,
    interval: Duration,
    orchestrator: Arc<SyncOrchestrator>,
}

/// Main daemon service
///
/// Holds the configuration, the state store and the shutdown token.
struct DaemonService {
    config: Config,
    store: Arc<dyn IStateRepository>,
    shutdown: CancellationToken,
    once: bool,
}

impl DaemonService {
    /// Opens the state database and prepares the service
    async fn new(config: Config, shutdown: CancellationToken, once: bool) -> Result<Self> {
        let db_path = config.sync.database.clone();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;
        info!(database = %db_path.display(), "Opened state database");

        let store: Arc<dyn IStateRepository> =
            Arc::new(SqliteStateRepository::new(pool.pool().clone()));

        Ok(Self {
            config,
            store,
            shutdown,
            once,
        })
    }

    /// Bootstraps every profile and runs the account loops until shutdown
    async fn run(&self) -> Result<()> {
        let runtimes = self.bootstrap_accounts().await?;
        if runtimes.is_empty() {
            warn!("No account can sync. Add a profile under `accounts.profiles` and export its access token.");
            return Ok(());
        }

        let debounce = Duration::from_secs(self.config.sync.debounce_delay);
        let mut loops = JoinSet::new();
        for runtime in runtimes {
            loops.spawn(account_loop(
                runtime,
                self.shutdown.clone(),
                debounce,
                self.once,
            ));
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Account loop panicked");
            }
        }

        info!("All account loops terminated");
        Ok(())
    }

    async fn bootstrap_accounts(&self) -> Result<Vec<AccountRuntime>> {
        let stored = self
            .store
            .list_accounts()
            .await
            .context("Failed to list accounts")?;

        let mut profiles: Vec<_> = self.config.accounts.profiles.iter().collect();
        profiles.sort_by(|a, b| a.0.cmp(b.0));

        let mut runtimes = Vec::new();
        for (external_id, profile) in profiles {
            let token = access_token(&self.config, profile);
            let account = match reconcile_account(
                &self.config,
                external_id,
                profile,
                &stored,
                token.is_some(),
            ) {
                Ok(account) => account,
                Err(e) => {
                    error!(account = %external_id, error = %format!("{e:#}"), "Skipping account");
                    continue;
                }
            };

            self.store
                .save_account(&account)
                .await
                .with_context(|| format!("Failed to save account {external_id}"))?;

            let Some(token) = token else {
                warn!(
                    account = %external_id,
                    env = %token_env(&self.config, profile),
                    "No access token in the environment, account will not sync"
                );
                continue;
            };

            let local_root = account.local_root().as_path().to_path_buf();
            tokio::fs::create_dir_all(&local_root)
                .await
                .with_context(|| format!("Failed to create {}", local_root.display()))?;

            let client = GraphClient::with_base_url(token, &self.config.remote.base_url);
            let remote = Arc::new(GraphRemoteDrive::from_config(client, &self.config.transfers));
            let orchestrator = SyncOrchestrator::new(
                remote,
                Arc::new(LocalFileSystemAdapter::new()),
                Arc::clone(&self.store),
                SyncOptions::from_config(&self.config),
            );

            info!(
                account = %external_id,
                local_root = %local_root.display(),
                "Account ready"
            );
            runtimes.push(AccountRuntime {
                account_id: *account.id(),
                external_id: external_id.clone(),
                interval: sync_interval(&self.config, &account),
                local_root,
                orchestrator: Arc::new(orchestrator),
            });
        }
        Ok(runtimes)
    }
}

/// Builds or refreshes the stored account for a profile
///
/// Settings always come from the configuration. A stored account keeps
/// its local root and delta token.
fn reconcile_account(
    config: &Config,
    external_id: &str,
    profile: &AccountProfile,
    stored: &[AccountContext],
    has_token: bool,
) -> Result<AccountContext> {
    let settings = config.accounts.settings_for(external_id);
    settings
        .validate()
        .with_context(|| format!("Invalid settings for account {external_id}"))?;

    let mut account = match stored.iter().find(|a| a.external_id() == external_id) {
        Some(existing) => {
            let mut account = existing.clone();
            if let Some(configured) = &profile.local_root {
                if configured.as_path() != account.local_root().as_path() {
                    warn!(
                        account = %external_id,
                        stored = %account.local_root(),
                        configured = %configured.display(),
                        "Configured local root differs from the stored one, keeping the stored root"
                    );
                }
            }
            account.set_settings(settings);
            account
        }
        None => {
            let root = match &profile.local_root {
                Some(root) => root.clone(),
                None => default_local_root(external_id)?,
            };
            let display_name = profile
                .display_name
                .clone()
                .unwrap_or_else(|| external_id.to_string());
            AccountContext::new(external_id, display_name, SyncPath::new(root)?, settings)
        }
    };

    account.set_auth_state(if has_token {
        AuthState::Authenticated
    } else {
        AuthState::TokenExpired
    });
    Ok(account)
}

fn default_local_root(external_id: &str) -> Result<PathBuf> {
    let home = dirs::home_dir().context("No home directory to place the local root in")?;
    Ok(home.join("MirrorDrive").join(external_id))
}

fn token_env<'a>(config: &'a Config, profile: &'a AccountProfile) -> &'a str {
    profile
        .access_token_env
        .as_deref()
        .unwrap_or(&config.remote.access_token_env)
}

fn access_token(config: &Config, profile: &AccountProfile) -> Option<String> {
    std::env::var(token_env(config, profile))
        .ok()
        .filter(|t| !t.trim().is_empty())
}

/// Per-account interval, falling back to `sync.poll_interval` when unset
fn sync_interval(config: &Config, account: &AccountContext) -> Duration {
    let secs = match account.settings().auto_sync_interval_secs {
        0 => config.sync.poll_interval,
        secs => secs,
    };
    Duration::from_secs(secs.max(1))
}

/// Periodic sync for one account
///
/// The first tick fires immediately. Settled local changes wake the loop
/// before the next tick.
async fn account_loop(
    runtime: AccountRuntime,
    shutdown: CancellationToken,
    debounce: Duration,
    once: bool,
) {
    let wake = Arc::new(Notify::new());
    let watch_stop = shutdown.child_token();
    let _watcher = if once {
        None
    } else {
        start_watcher(&runtime, debounce, Arc::clone(&wake), watch_stop.clone())
    };
    let progress = spawn_progress_log(&runtime);

    info!(
        account = %runtime.external_id,
        interval_secs = runtime.interval.as_secs(),
        "Starting sync loop"
    );

    let mut interval = tokio::time::interval(runtime.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(account = %runtime.external_id, "Shutdown signal received");
                break;
            }
            _ = interval.tick() => {}
            _ = wake.notified() => {
                debug!(account = %runtime.external_id, "Local changes settled, syncing early");
                interval.reset();
            }
        }

        run_cycle(&runtime, &shutdown).await;

        if once || shutdown.is_cancelled() {
            break;
        }
    }

    watch_stop.cancel();
    progress.abort();
    info!(account = %runtime.external_id, "Sync loop terminated");
}

fn start_watcher(
    runtime: &AccountRuntime,
    debounce: Duration,
    wake: Arc<Notify>,
    stop: CancellationToken,
) -> Option<FileWatcher> {
    match FileWatcher::watch(&runtime.local_root) {
        Ok((watcher, events)) => {
            tokio::spawn(ChangeTrigger::new(events, debounce, wake).run(stop));
            Some(watcher)
        }
        Err(e) => {
            warn!(
                account = %runtime.external_id,
                error = %format!("{e:#}"),
                "File watching unavailable, relying on the interval"
            );
            None
        }
    }
}

/// Logs each phase change of the account's runs
fn spawn_progress_log(runtime: &AccountRuntime) -> tokio::task::JoinHandle<()> {
    let mut updates = runtime.orchestrator.state().subscribe();
    let account = runtime.external_id.clone();
    tokio::spawn(async move {
        let mut last_phase = None;
        while let Some(state) = updates.recv().await {
            if state.phase != last_phase {
                if let Some(phase) = state.phase {
                    debug!(
                        account = %account,
                        phase = phase.label(),
                        files = state.total_files,
                        bytes = state.total_bytes,
                        "Sync phase"
                    );
                }
                last_phase = state.phase;
            }
        }
    })
}

async fn run_cycle(runtime: &AccountRuntime, shutdown: &CancellationToken) {
    info!(account = %runtime.external_id, "Starting sync cycle");

    match runtime
        .orchestrator
        .sync(&runtime.account_id, shutdown)
        .await
    {
        Ok(report) => {
            let counts = report.counts;
            info!(
                account = %runtime.external_id,
                status = ?report.status,
                uploaded = counts.uploaded,
                downloaded = counts.downloaded,
                deleted = counts.deleted,
                conflicts = counts.conflicts,
                failed = counts.failed,
                bytes = counts.bytes_transferred,
                "Sync cycle completed"
            );
        }
        Err(SyncError::DeltaTokenExpired) => {
            warn!(
                account = %runtime.external_id,
                "Delta token expired, the next cycle runs a full listing"
            );
        }
        Err(e) => {
            error!(
                account = %runtime.external_id,
                error = %format!("{e:#}"),
                "Sync cycle failed"
            );
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()),
    };

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration: {}", details.join("; "));
    }
    Ok(config)
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!("MirrorDrive daemon starting (mirrordrived)");

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token, cli.once).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("MirrorDrive daemon shut down gracefully"),
        Err(e) => error!(error = %e, "MirrorDrive daemon exiting with error"),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrordrive_core::{config::ConfigBuilder, domain::AccountSettings};

    fn profile(root: &Path) -> AccountProfile {
        AccountProfile {
            display_name: Some("Ana".to_string()),
            local_root: Some(root.to_path_buf()),
            access_token_env: Some("MIRRORDRIVE_TEST_UNSET_TOKEN".to_string()),
            ..AccountProfile::default()
        }
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from(["mirrordrived", "--config", "/etc/md.yaml", "--once"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/md.yaml")));
        assert!(cli.once);

        let cli = Cli::parse_from(["mirrordrived"]);
        assert!(cli.config.is_none());
        assert!(!cli.once);
    }

    #[test]
    fn test_new_account_from_profile() {
        let dir = tempfile::tempdir().unwrap();
        let profile = profile(dir.path());
        let config = ConfigBuilder::new()
            .account_profile("ana@example.com", profile.clone())
            .build();

        let account =
            reconcile_account(&config, "ana@example.com", &profile, &[], true).unwrap();
        assert_eq!(account.external_id(), "ana@example.com");
        assert_eq!(account.display_name(), "Ana");
        assert_eq!(account.local_root().as_path(), dir.path());
        assert!(account.auth_state().can_sync());
    }

    #[test]
    fn test_existing_account_keeps_root_and_takes_settings() {
        let stored_root = tempfile::tempdir().unwrap();
        let other_root = tempfile::tempdir().unwrap();
        let existing = AccountContext::new(
            "ana@example.com",
            "Ana",
            SyncPath::new(stored_root.path().to_path_buf()).unwrap(),
            AccountSettings::default(),
        );

        let profile = AccountProfile {
            max_parallel_uploads: Some(5),
            ..profile(other_root.path())
        };
        let config = ConfigBuilder::new()
            .account_profile("ana@example.com", profile.clone())
            .build();

        let account = reconcile_account(
            &config,
            "ana@example.com",
            &profile,
            std::slice::from_ref(&existing),
            false,
        )
        .unwrap();
        assert_eq!(account.id(), existing.id());
        assert_eq!(account.local_root().as_path(), stored_root.path());
        assert_eq!(account.settings().max_parallel_uploads, 5);
        assert_eq!(account.auth_state(), &AuthState::TokenExpired);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let profile = AccountProfile {
            max_parallel_uploads: Some(0),
            ..profile(dir.path())
        };
        let config = ConfigBuilder::new()
            .account_profile("ana@example.com", profile.clone())
            .build();

        assert!(reconcile_account(&config, "ana@example.com", &profile, &[], true).is_err());
    }

    #[test]
    fn test_access_token_from_named_env() {
        let config = Config::default();
        let mut profile = AccountProfile::default();

        profile.access_token_env = Some("MIRRORDRIVE_TEST_DAEMON_TOKEN".to_string());
        std::env::set_var("MIRRORDRIVE_TEST_DAEMON_TOKEN", "secret");
        assert_eq!(access_token(&config, &profile).as_deref(), Some("secret"));

        std::env::set_var("MIRRORDRIVE_TEST_DAEMON_TOKEN", "  ");
        assert!(access_token(&config, &profile).is_none());

        profile.access_token_env = None;
        assert_eq!(token_env(&config, &profile), config.remote.access_token_env);
    }

    #[test]
    fn test_sync_interval_falls_back_to_poll_interval() {
        let dir = tempfile::tempdir().unwrap();
        let root = SyncPath::new(dir.path().to_path_buf()).unwrap();
        let config = ConfigBuilder::new().sync_poll_interval(45).build();

        let settings = AccountSettings {
            auto_sync_interval_secs: 0,
            ..AccountSettings::default()
        };
        let account = AccountContext::new("a", "A", root.clone(), settings);
        assert_eq!(sync_interval(&config, &account), Duration::from_secs(45));

        let settings = AccountSettings {
            auto_sync_interval_secs: 120,
            ..AccountSettings::default()
        };
        let account = AccountContext::new("a", "A", root, settings);
        assert_eq!(sync_interval(&config, &account), Duration::from_secs(120));
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "sync:\n  debounce_delay: 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());

        assert!(load_config(Some(&dir.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn test_cancellation_token_child_propagation() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
