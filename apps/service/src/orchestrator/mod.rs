/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Runs migrations and loads (or seeds) the persisted check settings
/// - Builds the prober, notifier and executor shared by both schedulers
/// - Starts one scheduler per enabled check kind
/// - Reloads settings on SIGHUP and drains running batches on shutdown

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use proxyup::monitoring::{
    BatchRunner, CheckExecutor, CheckScheduler, DisabledIsp, HttpSpeedTester, IspLookup,
    MaxMindIsp, Prober, ReqwestClientFactory,
};
use proxyup::notification::{Notifier, TelegramSink};
use proxyup::{CheckKind, ResourceStore, Settings, SettingsHandle};

use crate::config::{self, Config};
use crate::database::{LibsqlStore, initialize_database};
use crate::pool::LibsqlPool;

const SUMMARY_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything a check needs, built once per process
pub struct Components {
    pub store: Arc<LibsqlStore>,
    pub settings: SettingsHandle,
    pub notifier: Notifier,
    pub executor: CheckExecutor,
}

impl Components {
    pub async fn build(config: &Config, pool: LibsqlPool) -> Result<Self> {
        let conn = pool.get().await?;

        info!("Initializing database schema...");
        initialize_database(&conn).await.context("database migrations failed")?;
        drop(conn);

        let store = Arc::new(LibsqlStore::new_from_pool(pool));
        let settings =
            SettingsHandle::new(load_or_seed_settings(store.as_ref(), config.settings.clone()).await?);

        let isp = open_isp_lookup(&config.geoip)?;
        let sink = TelegramSink::new(
            config.telegram.enabled,
            config.telegram.token.clone(),
            config.telegram.chat_id.clone(),
        )?;
        if !sink.is_configured() {
            info!("Telegram notifications disabled");
        }
        let notifier = Notifier::new(Arc::new(sink));

        let prober = Prober::new(Arc::new(ReqwestClientFactory), Arc::new(HttpSpeedTester), isp);
        let executor = CheckExecutor::new(store.clone(), settings.clone(), prober, notifier.clone());

        Ok(Self { store, settings, notifier, executor })
    }
}

/// Persisted settings win over the config file. The file only seeds an
/// empty database.
pub async fn load_or_seed_settings(store: &dyn ResourceStore, seed: Settings) -> Result<Settings> {
    match store.load_settings().await? {
        Some(settings) => {
            settings.validate().context("persisted settings are invalid")?;
            info!("Loaded persisted check settings");
            Ok(settings)
        }
        None => {
            seed.validate().context("config [settings] are invalid")?;
            store.save_settings(&seed).await?;
            info!("Seeded check settings from config");
            Ok(seed)
        }
    }
}

fn open_isp_lookup(geoip: &config::GeoIp) -> Result<Arc<dyn IspLookup>> {
    match &geoip.isp_database {
        Some(path) => {
            let reader = MaxMindIsp::open(path)
                .with_context(|| format!("failed to open ISP database {path}"))?;
            info!("Opened ISP database {path}");
            Ok(Arc::new(reader))
        }
        None => {
            info!("No ISP database configured, operator lookups disabled");
            Ok(Arc::new(DisabledIsp))
        }
    }
}

/// Main orchestrator for the proxyup service
pub struct Orchestrator {
    config_path: PathBuf,
    daily_summary: bool,
    components: Components,
}

impl Orchestrator {
    /// Create and start a new orchestrator
    /// This is a convenience method that creates and immediately runs the orchestrator
    pub async fn start(config: Config, config_path: PathBuf, pool: LibsqlPool) -> Result<()> {
        let orchestrator = Self::new(config, config_path, pool).await?;
        orchestrator.run().await
    }

    async fn new(config: Config, config_path: PathBuf, pool: LibsqlPool) -> Result<Self> {
        let components = Components::build(&config, pool).await?;
        Ok(Self { config_path, daily_summary: config.telegram.daily_summary, components })
    }

    async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let settings = self.components.settings.snapshot().await;
        let runner: Arc<dyn BatchRunner> = Arc::new(self.components.executor.clone());

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let intervals = [
            (CheckKind::Liveness, settings.liveness_interval_minutes),
            (CheckKind::Throughput, settings.throughput_interval_minutes),
        ];
        for (kind, minutes) in intervals {
            match CheckScheduler::from_minutes(kind, minutes, runner.clone()) {
                Some(scheduler) => handles.push(scheduler.spawn(shutdown.clone(), tracker.clone())),
                None => info!(%kind, minutes, "Scheduler disabled"),
            }
        }

        if self.daily_summary {
            self.spawn_daily_summary(shutdown.clone(), &tracker);
        }

        info!("Orchestrator running");
        self.wait_for_shutdown(&settings).await?;

        info!("Shutting down...");
        shutdown.cancel();
        for handle in handles {
            if let Err(err) = handle.await {
                error!("Scheduler task failed: {err}");
            }
        }
        tracker.close();
        tracker.wait().await;

        // Last holders of the ISP reader go here, after every batch is done
        drop(runner);
        drop(self.components);
        info!("Shutdown complete");
        Ok(())
    }

    fn spawn_daily_summary(&self, shutdown: CancellationToken, tracker: &TaskTracker) {
        let store = self.components.store.clone();
        let notifier = self.components.notifier.clone();

        tracker.spawn(async move {
            let mut ticker = interval_at(Instant::now() + SUMMARY_PERIOD, SUMMARY_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => match store.list_resources().await {
                        Ok(resources) => notifier.send_summary(&resources).await,
                        Err(err) => warn!("Daily summary skipped: {err:#}"),
                    },
                }
            }
        });
    }

    #[cfg(unix)]
    async fn wait_for_shutdown(&self, started_with: &Settings) -> Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Received SIGINT");
                    return Ok(());
                }
                _ = terminate.recv() => {
                    info!("Received SIGTERM");
                    return Ok(());
                }
                _ = hangup.recv() => self.reload_settings(started_with).await,
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_shutdown(&self, _started_with: &Settings) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C");
        Ok(())
    }

    /// Re-read `[settings]` from the config file and apply them
    async fn reload_settings(&self, started_with: &Settings) {
        let config = match Config::load(&self.config_path) {
            Ok(config) => config,
            Err(err) => {
                warn!("Settings reload failed: {err}");
                return;
            }
        };
        let next = config.settings;
        let intervals_changed = next.liveness_interval_minutes
            != started_with.liveness_interval_minutes
            || next.throughput_interval_minutes != started_with.throughput_interval_minutes;

        match self.components.settings.apply(self.components.store.as_ref(), next).await {
            Ok(()) => {
                info!("Reloaded check settings from {}", self.config_path.display());
                if intervals_changed {
                    warn!("Scheduler interval changes take effect after a restart");
                }
            }
            Err(err) => warn!("Settings reload rejected: {err:#}"),
        }
    }
}
