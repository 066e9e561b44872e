use std::time::Duration;

use async_trait::async_trait;

use super::transport::{AlertTransport, Destination, OutboundMessage};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// How often rich delivery is attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based) before the next one.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    DeliveredPlain,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryState {
    Attempt(u32),
    Wait(u32),
    Fallback,
    Done(DeliveryOutcome),
}

/// Runs `attempt -> wait -> attempt -> ... -> fallback -> drop` for one alert.
pub struct Delivery<'a> {
    pub policy: &'a RetryPolicy,
    pub sleeper: &'a dyn Sleeper,
    pub transport: &'a dyn AlertTransport,
    pub destination: &'a Destination,
}

impl Delivery<'_> {
    pub async fn run(
        &self,
        rich: &OutboundMessage,
        plain: impl FnOnce() -> OutboundMessage,
    ) -> DeliveryOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut plain = Some(plain);
        let mut state = DeliveryState::Attempt(1);

        loop {
            state = match state {
                DeliveryState::Attempt(n) => match self.transport.send(self.destination, rich).await {
                    Ok(()) => DeliveryState::Done(DeliveryOutcome::Delivered { attempts: n }),
                    Err(err) if n < max_attempts => {
                        tracing::debug!(attempt = n, error = %err, "alert delivery failed, retrying");
                        DeliveryState::Wait(n)
                    }
                    Err(err) => {
                        eprintln!(
                            "chatlog: alert delivery failed after {} attempts: {:#}; sending plain fallback",
                            n, err
                        );
                        DeliveryState::Fallback
                    }
                },
                DeliveryState::Wait(n) => {
                    self.sleeper.sleep(self.policy.backoff(n)).await;
                    DeliveryState::Attempt(n + 1)
                }
                DeliveryState::Fallback => {
                    let message = match plain.take() {
                        Some(render) => render(),
                        None => return DeliveryOutcome::Dropped,
                    };
                    match self.transport.send(self.destination, &message).await {
                        Ok(()) => DeliveryState::Done(DeliveryOutcome::DeliveredPlain),
                        Err(err) => {
                            eprintln!("chatlog: plain fallback alert failed, dropping it: {:#}", err);
                            DeliveryState::Done(DeliveryOutcome::Dropped)
                        }
                    }
                }
                DeliveryState::Done(outcome) => return outcome,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::{RecordingSleeper, ScriptedTransport};
    use crate::alert::transport::MessageFormat;

    fn destination() -> Destination {
        "-100:3".parse().unwrap()
    }

    fn rich() -> OutboundMessage {
        OutboundMessage::html("<b>boom</b>".to_string())
    }

    fn plain() -> OutboundMessage {
        OutboundMessage::plain("[FALLBACK] boom".to_string())
    }

    #[test]
    fn backoff_grows_geometrically() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn first_success_sends_once() {
        let transport = ScriptedTransport::failing_first(0);
        let sleeper = RecordingSleeper::default();
        let dest = destination();
        let delivery = Delivery {
            policy: &RetryPolicy::default(),
            sleeper: &sleeper,
            transport: &transport,
            destination: &dest,
        };

        let outcome = delivery.run(&rich(), plain).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(transport.sent().len(), 1);
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_without_duplicates() {
        let transport = ScriptedTransport::failing_first(2);
        let sleeper = RecordingSleeper::default();
        let dest = destination();
        let delivery = Delivery {
            policy: &RetryPolicy::default(),
            sleeper: &sleeper,
            transport: &transport,
            destination: &dest,
        };

        let outcome = delivery.run(&rich(), plain).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.sent(), vec![rich()]);
        assert_eq!(
            sleeper.slept(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn falls_back_to_plain_exactly_once() {
        let transport = ScriptedTransport::failing_first(3);
        let sleeper = RecordingSleeper::default();
        let dest = destination();
        let delivery = Delivery {
            policy: &RetryPolicy::default(),
            sleeper: &sleeper,
            transport: &transport,
            destination: &dest,
        };

        let outcome = delivery.run(&rich(), plain).await;

        assert_eq!(outcome, DeliveryOutcome::DeliveredPlain);
        assert_eq!(transport.attempts(), 4);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].format, MessageFormat::Plain);
    }

    #[tokio::test]
    async fn drops_when_the_fallback_fails_too() {
        let transport = ScriptedTransport::always_failing();
        let sleeper = RecordingSleeper::default();
        let dest = destination();
        let delivery = Delivery {
            policy: &RetryPolicy::default(),
            sleeper: &sleeper,
            transport: &transport,
            destination: &dest,
        };

        let outcome = delivery.run(&rich(), plain).await;

        assert_eq!(outcome, DeliveryOutcome::Dropped);
        assert_eq!(transport.attempts(), 4);
        assert!(transport.sent().is_empty());
        let formats: Vec<_> = transport.attempted().iter().map(|m| m.format).collect();
        assert_eq!(
            formats,
            vec![
                MessageFormat::Html,
                MessageFormat::Html,
                MessageFormat::Html,
                MessageFormat::Plain
            ]
        );
    }
}
