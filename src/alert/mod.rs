mod rate_limit;
mod render;
mod retry;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, PoisonError, RwLock,
};

use eyre::Context;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{
    config::AlertConfig,
    logging::{LogRecord, LogSink, TimeFormatter},
};

pub use rate_limit::{Clock, RateLimiter, SystemClock};
pub use render::{
    escape_html, AlertRenderer, FALLBACK_PREFIX, MAX_PLAIN_CHARS, MAX_RICH_CHARS,
    TRUNCATION_MARKER,
};
pub use retry::{Delivery, DeliveryOutcome, RetryPolicy, Sleeper, TokioSleeper};
pub use transport::{AlertTransport, Destination, MessageFormat, OutboundMessage};

/// Builds the network client. Called on every start, so a stopped sink can be
/// started again with a fresh client.
pub type TransportFactory = Box<dyn Fn() -> eyre::Result<Arc<dyn AlertTransport>> + Send + Sync>;

enum QueueItem {
    Record(Box<LogRecord>),
    Shutdown,
}

enum WorkerState {
    Stopped,
    Running {
        worker: JoinHandle<()>,
        transport: Arc<dyn AlertTransport>,
    },
}

#[derive(Debug, Default)]
struct AlertStats {
    delivered: AtomicU64,
    delivered_plain: AtomicU64,
    rate_limited: AtomicU64,
    failed: AtomicU64,
    dropped_while_stopped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertStatsSnapshot {
    pub delivered: u64,
    pub delivered_plain: u64,
    pub rate_limited: u64,
    pub failed: u64,
    pub dropped_while_stopped: u64,
}

impl AlertStats {
    fn snapshot(&self) -> AlertStatsSnapshot {
        AlertStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            delivered_plain: self.delivered_plain.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped_while_stopped: self.dropped_while_stopped.load(Ordering::Relaxed),
        }
    }
}

/// Forwards error records to a remote channel from a single background task.
///
/// `emit` never blocks and never fails: it pushes onto an unbounded queue that
/// any thread may write to. The worker renders, rate limits and delivers with
/// retries; `stop` drains the queue within a bounded time and cancels the
/// worker if it does not finish.
pub struct RemoteAlertSink {
    config: AlertConfig,
    destination: Destination,
    connect: TransportFactory,
    time: TimeFormatter,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    sender: RwLock<Option<UnboundedSender<QueueItem>>>,
    state: tokio::sync::Mutex<WorkerState>,
    stats: Arc<AlertStats>,
}

impl RemoteAlertSink {
    pub fn new(
        config: AlertConfig,
        destination: Destination,
        time: TimeFormatter,
        connect: TransportFactory,
    ) -> Self {
        Self {
            config,
            destination,
            connect,
            time,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            sender: RwLock::new(None),
            state: tokio::sync::Mutex::new(WorkerState::Stopped),
            stats: Arc::new(AlertStats::default()),
        }
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..self }
    }

    pub fn with_sleeper(self, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper, ..self }
    }

    pub fn is_running(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn stats(&self) -> AlertStatsSnapshot {
        self.stats.snapshot()
    }

    /// Builds the client, optionally checks connectivity and spawns the
    /// worker on the current tokio runtime. A no-op when already running.
    pub async fn start(&self) -> eyre::Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, WorkerState::Running { .. }) {
            return Ok(());
        }

        let transport = (self.connect)().context("Failed constructing alert transport")?;
        if self.config.verify_on_start {
            transport
                .verify()
                .await
                .context("Alert transport connectivity check failed")?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = AlertWorker {
            transport: transport.clone(),
            destination: self.destination.clone(),
            renderer: AlertRenderer::new(self.time.clone()),
            limiter: RateLimiter::new(self.config.rate_limit, self.clock.clone()),
            policy: self.config.retry.clone(),
            sleeper: self.sleeper.clone(),
            stats: self.stats.clone(),
        };
        let worker = tokio::spawn(worker.run(rx));

        *self.sender.write().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        *state = WorkerState::Running { worker, transport };

        tracing::debug!(destination = %self.destination, "remote alert worker started");
        Ok(())
    }

    /// Queues a record for delivery. Safe from any thread, never blocks.
    pub fn emit(&self, record: &LogRecord) {
        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let queued = match sender.as_ref() {
            Some(tx) => tx.send(QueueItem::Record(Box::new(record.clone()))).is_ok(),
            None => false,
        };

        if !queued {
            self.stats
                .dropped_while_stopped
                .fetch_add(1, Ordering::Relaxed);
            eprintln!(
                "chatlog: remote alert sink is not running, dropping {} record from '{}': {}",
                record.level, record.channel, record.message
            );
        }
    }

    /// Drains and stops the worker, cancelling it if the drain takes longer
    /// than the configured timeout. Safe to call when never started.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let WorkerState::Running {
            mut worker,
            transport,
        } = std::mem::replace(&mut *state, WorkerState::Stopped)
        else {
            return;
        };

        let sender = self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(QueueItem::Shutdown);
        }

        match tokio::time::timeout(self.config.drain_timeout, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => eprintln!("chatlog: remote alert worker ended abnormally: {}", err),
            Err(_) => {
                eprintln!(
                    "chatlog: remote alert worker did not drain within {:?}, cancelling it",
                    self.config.drain_timeout
                );
                worker.abort();
                match tokio::time::timeout(self.config.cancel_grace, worker).await {
                    Ok(Err(err)) if !err.is_cancelled() => {
                        eprintln!("chatlog: remote alert worker failed while cancelling: {}", err)
                    }
                    Err(_) => eprintln!("chatlog: remote alert worker ignored cancellation"),
                    _ => {}
                }
            }
        }

        drop(transport);
        let stats = self.stats();
        tracing::debug!(
            delivered = stats.delivered,
            delivered_plain = stats.delivered_plain,
            rate_limited = stats.rate_limited,
            failed = stats.failed,
            "remote alert worker stopped"
        );
    }
}

impl LogSink for RemoteAlertSink {
    fn write_log(&self, record: &LogRecord) -> eyre::Result<()> {
        self.emit(record);
        Ok(())
    }

    fn flush(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processed {
    RateLimited,
    Attempted(DeliveryOutcome),
}

struct AlertWorker {
    transport: Arc<dyn AlertTransport>,
    destination: Destination,
    renderer: AlertRenderer,
    limiter: RateLimiter,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    stats: Arc<AlertStats>,
}

impl AlertWorker {
    async fn run(mut self, mut queue: UnboundedReceiver<QueueItem>) {
        while let Some(item) = queue.recv().await {
            match item {
                QueueItem::Record(record) => {
                    self.process(&record).await;
                }
                QueueItem::Shutdown => break,
            }
        }
        tracing::debug!("remote alert queue drained");
    }

    async fn process(&mut self, record: &LogRecord) -> Processed {
        let rich = OutboundMessage::html(self.renderer.rich(record));

        if !self.limiter.permits() {
            self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(channel = %record.channel, "alert dropped by rate limiter");
            return Processed::RateLimited;
        }

        let delivery = Delivery {
            policy: &self.policy,
            sleeper: self.sleeper.as_ref(),
            transport: self.transport.as_ref(),
            destination: &self.destination,
        };
        let renderer = &self.renderer;
        let outcome = delivery
            .run(&rich, || OutboundMessage::plain(renderer.plain(record)))
            .await;
        self.limiter.record_send();

        let counter = match outcome {
            DeliveryOutcome::Delivered { .. } => &self.stats.delivered,
            DeliveryOutcome::DeliveredPlain => &self.stats.delivered_plain,
            DeliveryOutcome::Dropped => &self.stats.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        Processed::Attempted(outcome)
    }
}
