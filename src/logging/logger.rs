use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use eyre::Context;
use log::{LevelFilter, Log};

use super::{
    daily::DailyPerEntitySink,
    formatters::{ConsoleFormatter, ContextFormatter, TimeFormatter},
    record::{Channel, LogRecord},
    report_sink_failure,
    sinks::{ConsoleSink, RotatingFileSink},
    LogFormatter, LogSink, Sink,
};
use crate::{
    alert::{AlertTransport, Destination, RemoteAlertSink, TransportFactory},
    config::Config,
    http::TelegramTransport,
};

// Records from the HTTP stack would feed back into the alert channel.
const IGNORED_TARGET_PREFIXES: [&str; 3] = ["rustls", "hyper", "h2"];

#[derive(Clone)]
struct Route {
    sink: Sink,
    level: LevelFilter,
}

impl Route {
    fn new(sink: Sink, level: LevelFilter) -> Self {
        Self { sink, level }
    }
}

/// The process's logging layer: channel wiring, sinks and their lifecycle.
/// Built once with [`LoggingSystem::initialize`] and shared by handle.
pub struct LoggingSystem {
    config: Config,
    time: TimeFormatter,
    routes: RwLock<HashMap<Channel, Vec<Route>>>,
    daily: Arc<DailyPerEntitySink>,
    last_resort: ConsoleFormatter,
    remote: tokio::sync::Mutex<Option<Arc<RemoteAlertSink>>>,
    shut_down: AtomicBool,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Creates `dir` if needed and proves it is writable with a throwaway file.
fn prepare_dir(dir: &Path) -> eyre::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed creating log directory {}", dir.display()))?;

    let probe = dir.join(format!(".write-probe-{}", uuid::Uuid::new_v4()));
    std::fs::write(&probe, b"probe")
        .with_context(|| format!("Log directory {} is not writable", dir.display()))?;
    std::fs::remove_file(&probe)
        .with_context(|| format!("Failed removing write probe {}", probe.display()))
}

impl LoggingSystem {
    /// Validates the on-disk layout and wires every channel. Any error here
    /// is meant to be fatal for the host process.
    pub fn initialize(config: Config) -> eyre::Result<Arc<Self>> {
        let root = config.log_root.clone();
        let analytics_dir = root.join("analytics");
        prepare_dir(&root)?;
        prepare_dir(&analytics_dir)?;

        let time = TimeFormatter::new(config.utc_offset, &config.time_format);
        let file = |path: PathBuf| -> eyre::Result<Arc<RotatingFileSink>> {
            let sink = RotatingFileSink::new(
                path,
                Box::new(ContextFormatter::new(time.clone())),
                config.max_file_bytes,
                config.backup_count,
            )?;
            Ok(Arc::new(sink))
        };

        let general = file(root.join("general.log"))?;
        let errors = file(root.join("error.log"))?;
        let analytics = file(analytics_dir.join("analytics.log"))?;
        let chat_summary = file(root.join("chat_summary.log"))?;
        let daily = Arc::new(DailyPerEntitySink::new(
            &root,
            ContextFormatter::new(time.clone()),
        ));
        let console = config.console.then(|| {
            Arc::new(ConsoleSink::new(Box::new(ConsoleFormatter::new(
                time.clone(),
                config.use_ansi,
            ))))
        });

        let level = config.level;
        let mut routes = HashMap::new();
        for channel in Channel::ALL {
            let mut wired = Vec::new();
            if let Some(console) = &console {
                wired.push(Route::new(Sink::Console(console.clone()), level));
            }

            match channel {
                Channel::General => {
                    wired.push(Route::new(Sink::RotatingFile(general.clone()), level));
                }
                Channel::Chat => {
                    wired.push(Route::new(Sink::RotatingFile(chat_summary.clone()), level));
                    wired.push(Route::new(Sink::DailyPerEntity(daily.clone()), level));
                }
                Channel::Analytics => {
                    wired.push(Route::new(Sink::RotatingFile(analytics.clone()), level));
                }
                Channel::Error => {
                    wired.push(Route::new(Sink::RotatingFile(errors.clone()), level));
                }
            }

            // Error summary: every channel's errors also land in error.log.
            if channel != Channel::Error {
                wired.push(Route::new(
                    Sink::RotatingFile(errors.clone()),
                    LevelFilter::Error.min(level),
                ));
            }
            routes.insert(channel, wired);
        }

        tracing::debug!(root = %root.display(), "logging layout ready");
        Ok(Arc::new(Self {
            last_resort: ConsoleFormatter::new(time.clone(), false),
            config,
            time,
            routes: RwLock::new(routes),
            daily,
            remote: tokio::sync::Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }))
    }

    /// Routes the `log` facade into this system.
    pub fn install(self: &Arc<Self>) -> eyre::Result<()> {
        log::set_max_level(self.config.level);
        log::set_boxed_logger(Box::new(LogBridge {
            system: self.clone(),
            filter: self.config.level,
        }))
        .context("Failed registering boxed logger")
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn daily_sink(&self) -> &Arc<DailyPerEntitySink> {
        &self.daily
    }

    /// Names of the sinks a channel currently fans out to.
    pub fn sinks_for(&self, channel: Channel) -> Vec<String> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .map(|routes| routes.iter().map(|r| r.sink.name()).collect())
            .unwrap_or_default()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Hands the record to every sink wired to its channel. Never fails;
    /// sink errors are reported on stderr.
    pub fn emit(&self, record: LogRecord) {
        if self.is_shut_down() {
            eprintln!("{}", self.last_resort.format(&record));
            return;
        }

        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(routes) = routes.get(&record.channel) else {
            return;
        };

        for route in routes.iter().filter(|r| record.level <= r.level) {
            if let Err(err) = route.sink.write_log(&record) {
                report_sink_failure(&route.sink.name(), &err);
            }
        }
    }

    pub fn flush(&self) {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        for route in routes.values().flatten() {
            route.sink.flush();
        }
    }

    /// Starts remote alerting when both credentials and destination are
    /// present. Missing or invalid settings only disable alerting.
    pub async fn start_remote_alert_sink(
        &self,
        token: Option<&str>,
        destination: Option<&str>,
    ) -> bool {
        let (Some(token), Some(destination)) = (present(token), present(destination)) else {
            eprintln!("chatlog: remote alerting disabled, token or destination not configured");
            return false;
        };

        let destination: Destination = match destination.parse() {
            Ok(destination) => destination,
            Err(err) => {
                eprintln!("chatlog: remote alerting disabled: {:#}", err);
                return false;
            }
        };

        let token = token.to_string();
        let alert_config = self.config.alert.clone();
        let connect: TransportFactory = Box::new(move || {
            let transport = TelegramTransport::new(token.clone(), &alert_config)?;
            Ok(Arc::new(transport) as Arc<dyn AlertTransport>)
        });

        let sink = RemoteAlertSink::new(
            self.config.alert.clone(),
            destination,
            self.time.clone(),
            connect,
        );
        self.attach_remote_alert_sink(Arc::new(sink)).await
    }

    /// Starts `sink` and wires it to the error channel if it came up.
    pub async fn attach_remote_alert_sink(&self, sink: Arc<RemoteAlertSink>) -> bool {
        let mut remote = self.remote.lock().await;
        if self.is_shut_down() {
            eprintln!("chatlog: logging is shut down, not starting remote alerts");
            return false;
        }
        if remote.as_ref().is_some_and(|existing| existing.is_running()) {
            return true;
        }

        if let Err(err) = sink.start().await {
            report_sink_failure("remote-alert", &err);
            return false;
        }

        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(Channel::Error)
            .or_default()
            .push(Route::new(Sink::RemoteAlert(sink.clone()), LevelFilter::Error));
        *remote = Some(sink);
        true
    }

    /// Stops remote alerting, closes every entity file and flushes the rest.
    /// Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let remote = self.remote.lock().await.take();
        if let Some(remote) = remote {
            remote.stop().await;
        }

        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .values_mut()
            .for_each(|routes| routes.retain(|r| !matches!(r.sink, Sink::RemoteAlert(_))));

        self.daily.close_all();
        self.flush();
        tracing::debug!("logging shut down");
    }
}

/// Sends the pipeline's own `tracing` diagnostics to stderr. Only the global
/// `tracing` subscriber is set; the `log` facade stays free for
/// [`LoggingSystem::install`].
pub fn install_diagnostics(level: tracing::Level) -> eyre::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed registering diagnostics subscriber")
}

struct LogBridge {
    system: Arc<LoggingSystem>,
    filter: LevelFilter,
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= self.filter
            && !IGNORED_TARGET_PREFIXES
                .iter()
                .any(|prefix| metadata.target().starts_with(prefix))
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            self.system.emit(LogRecord::from_log(record));
        }
    }

    fn flush(&self) {
        self.system.flush()
    }
}
