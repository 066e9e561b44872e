//! In-memory doubles for the alert pipeline's clock, sleeper and network.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{
    rate_limit::Clock,
    retry::Sleeper,
    transport::{AlertTransport, Destination, OutboundMessage},
};

pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Fails the first `failures` sends, then succeeds. Every send waits `delay`.
pub struct ScriptedTransport {
    failures: usize,
    delay: Duration,
    calls: AtomicUsize,
    attempted: Mutex<Vec<OutboundMessage>>,
    sent: Mutex<Vec<(Destination, OutboundMessage)>>,
    verify_ok: bool,
}

impl ScriptedTransport {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            attempted: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            verify_ok: true,
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn rejecting_verify(mut self) -> Self {
        self.verify_ok = false;
        self
    }

    pub fn attempts(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn attempted(&self) -> Vec<OutboundMessage> {
        self.attempted.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn destinations(&self) -> Vec<Destination> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(dest, _)| dest.clone())
            .collect()
    }
}

#[async_trait]
impl AlertTransport for ScriptedTransport {
    async fn verify(&self) -> eyre::Result<()> {
        if self.verify_ok {
            Ok(())
        } else {
            Err(eyre::eyre!("401 Unauthorized"))
        }
    }

    async fn send(&self, destination: &Destination, message: &OutboundMessage) -> eyre::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempted.lock().unwrap().push(message.clone());
        if call < self.failures {
            return Err(eyre::eyre!("scripted failure #{}", call + 1));
        }

        self.sent
            .lock()
            .unwrap()
            .push((destination.clone(), message.clone()));
        Ok(())
    }
}
