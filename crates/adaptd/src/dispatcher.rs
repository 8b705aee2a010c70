//! Dispatcher/Executor - delivers a planned tactic to the managed side.
//!
//! Delivery failures are retried with bounded exponential backoff; the
//! loop is bounded both by an attempt limit and a wall-clock budget so an
//! unreachable managed system never accumulates dispatch backlog. Every
//! retry of one decision reuses the original `event_id`; the managed side
//! keys its idempotency on it.

use crate::config::DispatchConfig;
use adapt_common::{AdaptError, AdaptationEvent, DeliveryResponse, TacticDelivery};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};

/// Transport seam: HTTP in production, in-memory fakes in tests.
#[async_trait]
pub trait TacticTransport: Send + Sync {
    async fn deliver(&self, endpoint: &str, delivery: &TacticDelivery)
        -> Result<(), AdaptError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(attempt_timeout: Duration) -> Result<Self, AdaptError> {
        let client = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .build()
            .map_err(|e| AdaptError::DispatchRefused(e.to_string()))?;
        Ok(Self {
            client,
            timeout_ms: attempt_timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl TacticTransport for HttpTransport {
    async fn deliver(
        &self,
        endpoint: &str,
        delivery: &TacticDelivery,
    ) -> Result<(), AdaptError> {
        let response = self
            .client
            .post(endpoint)
            .json(delivery)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdaptError::DispatchTimeout(self.timeout_ms)
                } else {
                    AdaptError::DispatchRefused(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdaptError::DispatchRefused(format!(
                "managed side returned {}",
                status
            )));
        }

        // A 2xx with an explicit rejection body is a definitive refusal,
        // not a transient failure.
        if let Ok(body) = response.json::<DeliveryResponse>().await {
            if !body.accepted {
                let reason = body.reason.unwrap_or_else(|| "unspecified".to_string());
                if reason == "retrain_failure" {
                    return Err(AdaptError::RetrainFailure(reason));
                }
                return Err(AdaptError::DispatchRefused(reason));
            }
        }
        Ok(())
    }
}

/// Drives the delivery of adaptation events.
pub struct Dispatcher {
    transport: Arc<dyn TacticTransport>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn TacticTransport>, config: DispatchConfig) -> Self {
        Self { transport, config }
    }

    /// Deliver `event`, retrying per the backoff policy. On success the
    /// event is marked delivered; on exhaustion it is marked failed and
    /// the error surfaced. A `RetrainFailure` response is definitive and
    /// is not retried.
    pub async fn dispatch(&self, event: &mut AdaptationEvent) -> Result<(), AdaptError> {
        let delivery = TacticDelivery::new(&event.event_id, &event.tactic);
        let endpoint = event.tactic.endpoint.clone();
        let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);
        let budget = Duration::from_millis(self.config.retry_budget_ms);
        let started = Instant::now();
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);

        for attempt in 1..=self.config.max_attempts {
            event.attempts = attempt;

            let result = match timeout(
                attempt_timeout,
                self.transport.deliver(&endpoint, &delivery),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AdaptError::DispatchTimeout(
                    self.config.attempt_timeout_ms,
                )),
            };

            match result {
                Ok(()) => {
                    event.mark_delivered();
                    info!(
                        "Delivered event {} to {} (attempt {})",
                        event.event_id, endpoint, attempt
                    );
                    return Ok(());
                }
                Err(AdaptError::RetrainFailure(reason)) => {
                    event.mark_failed("retrain_failure");
                    warn!(
                        "Managed side rejected retrain for event {}: {}",
                        event.event_id, reason
                    );
                    return Err(AdaptError::RetrainFailure(reason));
                }
                Err(e) => {
                    let out_of_budget = started.elapsed() + backoff >= budget;
                    if attempt == self.config.max_attempts || out_of_budget {
                        event.mark_failed(e.reason_code());
                        error!(
                            "Dispatch of event {} failed permanently after {} attempts: {}",
                            event.event_id, attempt, e
                        );
                        return Err(AdaptError::DispatchFailed(e.to_string()));
                    }
                    warn!(
                        "Dispatch attempt {} for event {} failed: {}; retrying in {:?}",
                        attempt, event.event_id, e, backoff
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_millis(self.config.max_backoff_ms));
                }
            }
        }

        // max_attempts >= 1, so the loop always returns before this point.
        event.mark_failed("dispatch_failed");
        Err(AdaptError::DispatchFailed("attempt limit reached".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapt_common::{Classification, EventStatus, Tactic, TacticKind};
    use std::sync::Mutex;

    struct ScriptedTransport {
        /// Outcomes consumed per attempt; `true` delivers, `false` refuses.
        script: Mutex<Vec<bool>>,
        seen_event_ids: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<bool>) -> Self {
            Self {
                script: Mutex::new(script),
                seen_event_ids: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl TacticTransport for ScriptedTransport {
        async fn deliver(
            &self,
            _endpoint: &str,
            delivery: &TacticDelivery,
        ) -> Result<(), AdaptError> {
            self.seen_event_ids
                .lock()
                .unwrap()
                .push(delivery.event_id.clone());
            let ok = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    false
                } else {
                    script.remove(0)
                }
            };
            if ok {
                Ok(())
            } else {
                Err(AdaptError::DispatchRefused("connection refused".to_string()))
            }
        }
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            attempt_timeout_ms: 1_000,
            max_attempts: 3,
            retry_budget_ms: 60_000,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    fn event() -> AdaptationEvent {
        AdaptationEvent::issue(
            "p1",
            "i1",
            Tactic {
                kind: TacticKind::Switch,
                target: Some("yolo_s".to_string()),
                endpoint: "http://localhost:9000/v1/tactic".to_string(),
            },
            Classification::ScoreViolation,
            0.6,
        )
    }

    #[tokio::test]
    async fn test_success_marks_delivered() {
        let transport = Arc::new(ScriptedTransport::new(vec![true]));
        let dispatcher = Dispatcher::new(transport, config());
        let mut event = event();

        dispatcher.dispatch(&mut event).await.unwrap();
        assert_eq!(event.status, EventStatus::Delivered);
        assert!(event.delivered);
        assert_eq!(event.attempts, 1);
        assert!(event.acked_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_then_success_reuses_event_id() {
        let transport = Arc::new(ScriptedTransport::new(vec![false, false, true]));
        let dispatcher = Dispatcher::new(Arc::clone(&transport) as Arc<dyn TacticTransport>, config());
        let mut event = event();

        dispatcher.dispatch(&mut event).await.unwrap();
        assert_eq!(event.attempts, 3);

        let seen = transport.seen_event_ids.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|id| *id == event.event_id));
    }

    #[tokio::test]
    async fn test_exhaustion_marks_failed() {
        let transport = Arc::new(ScriptedTransport::new(vec![false, false, false]));
        let dispatcher = Dispatcher::new(transport, config());
        let mut event = event();

        let err = dispatcher.dispatch(&mut event).await.unwrap_err();
        assert!(matches!(err, AdaptError::DispatchFailed(_)));
        assert_eq!(event.status, EventStatus::Failed);
        assert!(!event.delivered);
        assert_eq!(event.failure_reason.as_deref(), Some("dispatch_refused"));
    }

    #[tokio::test]
    async fn test_wall_clock_budget_stops_retries() {
        struct SlowTransport;
        #[async_trait]
        impl TacticTransport for SlowTransport {
            async fn deliver(
                &self,
                _endpoint: &str,
                _delivery: &TacticDelivery,
            ) -> Result<(), AdaptError> {
                sleep(Duration::from_millis(30)).await;
                Err(AdaptError::DispatchRefused("still down".to_string()))
            }
        }

        let dispatcher = Dispatcher::new(
            Arc::new(SlowTransport),
            DispatchConfig {
                attempt_timeout_ms: 1_000,
                max_attempts: 100,
                retry_budget_ms: 50,
                initial_backoff_ms: 10,
                max_backoff_ms: 10,
            },
        );
        let mut event = event();

        let err = dispatcher.dispatch(&mut event).await.unwrap_err();
        assert!(matches!(err, AdaptError::DispatchFailed(_)));
        // Budget, not the 100-attempt limit, ended the loop.
        assert!(event.attempts < 10);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_enforced() {
        struct HangingTransport;
        #[async_trait]
        impl TacticTransport for HangingTransport {
            async fn deliver(
                &self,
                _endpoint: &str,
                _delivery: &TacticDelivery,
            ) -> Result<(), AdaptError> {
                sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let dispatcher = Dispatcher::new(
            Arc::new(HangingTransport),
            DispatchConfig {
                attempt_timeout_ms: 20,
                max_attempts: 1,
                retry_budget_ms: 1_000,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
            },
        );
        let mut event = event();

        let err = dispatcher.dispatch(&mut event).await.unwrap_err();
        assert!(matches!(err, AdaptError::DispatchFailed(_)));
        assert_eq!(event.failure_reason.as_deref(), Some("dispatch_timeout"));
    }

    #[tokio::test]
    async fn test_retrain_rejection_is_not_retried() {
        struct RejectingTransport {
            calls: Mutex<u32>,
        }
        #[async_trait]
        impl TacticTransport for RejectingTransport {
            async fn deliver(
                &self,
                _endpoint: &str,
                _delivery: &TacticDelivery,
            ) -> Result<(), AdaptError> {
                *self.calls.lock().unwrap() += 1;
                Err(AdaptError::RetrainFailure("no training data".to_string()))
            }
        }

        let transport = Arc::new(RejectingTransport {
            calls: Mutex::new(0),
        });
        let dispatcher =
            Dispatcher::new(Arc::clone(&transport) as Arc<dyn TacticTransport>, config());
        let mut event = event();

        let err = dispatcher.dispatch(&mut event).await.unwrap_err();
        assert!(matches!(err, AdaptError::RetrainFailure(_)));
        assert_eq!(*transport.calls.lock().unwrap(), 1);
        assert_eq!(event.failure_reason.as_deref(), Some("retrain_failure"));
    }
}
