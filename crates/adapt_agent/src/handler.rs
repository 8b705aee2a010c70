//! Adaptation handler state machine.
//!
//! Per instance: `Idle → Switching(target) → Idle` or
//! `Idle → Retraining → Idle`. Applying a tactic is idempotent under
//! redelivery of the same `event_id`, and `Retraining` is the only phase
//! that defers deliveries instead of applying them immediately - a switch
//! must never interleave with a running retrain.

use crate::actuation::ActuationSurface;
use adapt_common::{DeliveredTactic, TacticDelivery, TacticKind};
use lru::LruCache;
use std::collections::VecDeque;
use std::io;
use std::num::NonZeroUsize;
use tracing::{info, warn};

/// Event ids remembered for idempotency.
const SEEN_CAPACITY: usize = 4_096;

/// Where the handler is in its per-instance state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerPhase {
    Idle,
    Switching { target: String },
    Retraining,
}

/// What applying one delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Tactic actuated (model file rewritten or retrain started).
    Applied,
    /// Same `event_id` seen before; nothing changed.
    DuplicateIgnored,
    /// Arrived during a retrain; queued until completion.
    Deferred,
    /// Retrain requested but this deployment cannot retrain.
    RetrainUnavailable,
}

/// The command-driven adaptation handler.
pub struct AdaptationHandler {
    surface: ActuationSurface,
    phase: HandlerPhase,
    seen: LruCache<String, ()>,
    deferred: VecDeque<TacticDelivery>,
    allow_retrain: bool,
    /// Applied-switch count; duplicates must not advance it.
    switches_applied: u64,
    retrains_started: u64,
}

impl AdaptationHandler {
    pub fn new(surface: ActuationSurface, allow_retrain: bool) -> Self {
        Self {
            surface,
            phase: HandlerPhase::Idle,
            seen: LruCache::new(NonZeroUsize::new(SEEN_CAPACITY).unwrap()),
            deferred: VecDeque::new(),
            allow_retrain,
            switches_applied: 0,
            retrains_started: 0,
        }
    }

    pub fn phase(&self) -> &HandlerPhase {
        &self.phase
    }

    pub fn switches_applied(&self) -> u64 {
        self.switches_applied
    }

    pub fn retrains_started(&self) -> u64 {
        self.retrains_started
    }

    /// Apply one delivery. Safe to call repeatedly with the same
    /// `event_id`: the first application wins, the rest are no-ops.
    pub fn apply(&mut self, delivery: &TacticDelivery) -> io::Result<ApplyOutcome> {
        if self.seen.contains(&delivery.event_id) {
            info!("Duplicate event {} ignored", delivery.event_id);
            return Ok(ApplyOutcome::DuplicateIgnored);
        }

        if delivery.tactic.kind == TacticKind::Retrain && !self.allow_retrain {
            warn!(
                "Retrain requested by event {} but retraining is unavailable",
                delivery.event_id
            );
            return Ok(ApplyOutcome::RetrainUnavailable);
        }

        if self.phase == HandlerPhase::Retraining {
            self.seen.put(delivery.event_id.clone(), ());
            self.deferred.push_back(delivery.clone());
            info!(
                "Event {} deferred until retraining completes",
                delivery.event_id
            );
            return Ok(ApplyOutcome::Deferred);
        }

        self.seen.put(delivery.event_id.clone(), ());
        self.actuate(&delivery.tactic)?;
        Ok(ApplyOutcome::Applied)
    }

    fn actuate(&mut self, tactic: &DeliveredTactic) -> io::Result<()> {
        match tactic.kind {
            TacticKind::Switch => {
                let target = tactic
                    .target
                    .clone()
                    .ok_or_else(|| io::Error::other("switch tactic without target"))?;
                self.surface.write_active_model(&target)?;
                self.switches_applied += 1;
                info!("Switched active model to '{}'", target);
                self.phase = HandlerPhase::Switching { target };
            }
            TacticKind::Retrain => {
                self.retrains_started += 1;
                info!("Entering retraining phase");
                self.phase = HandlerPhase::Retraining;
            }
        }
        Ok(())
    }

    /// The inference loop confirmed the new model is live.
    pub fn complete_switch(&mut self) {
        if matches!(self.phase, HandlerPhase::Switching { .. }) {
            self.phase = HandlerPhase::Idle;
        }
    }

    /// The retraining job finished (successfully or not). Deferred
    /// deliveries are applied now, in arrival order.
    pub fn complete_retraining(&mut self) -> io::Result<()> {
        if self.phase != HandlerPhase::Retraining {
            return Ok(());
        }
        self.phase = HandlerPhase::Idle;

        while let Some(delivery) = self.deferred.pop_front() {
            self.actuate(&delivery.tactic)?;
            // A deferred retrain re-enters Retraining and re-defers the rest.
            if self.phase == HandlerPhase::Retraining {
                break;
            }
            self.complete_switch();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapt_common::DeliveredTactic;
    use tempfile::TempDir;

    fn switch(event_id: &str, target: &str) -> TacticDelivery {
        TacticDelivery {
            event_id: event_id.to_string(),
            tactic: DeliveredTactic {
                kind: TacticKind::Switch,
                target: Some(target.to_string()),
            },
        }
    }

    fn retrain(event_id: &str) -> TacticDelivery {
        TacticDelivery {
            event_id: event_id.to_string(),
            tactic: DeliveredTactic {
                kind: TacticKind::Retrain,
                target: None,
            },
        }
    }

    fn handler(dir: &TempDir) -> AdaptationHandler {
        AdaptationHandler::new(ActuationSurface::new(dir.path()), true)
    }

    #[test]
    fn test_switch_writes_model_file() {
        let dir = TempDir::new().unwrap();
        let mut h = handler(&dir);

        let outcome = h.apply(&switch("ev-1", "yolo_s")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(
            h.phase(),
            &HandlerPhase::Switching {
                target: "yolo_s".to_string()
            }
        );

        let surface = ActuationSurface::new(dir.path());
        assert_eq!(
            surface.read_active_model().unwrap().as_deref(),
            Some("yolo_s")
        );
    }

    #[test]
    fn test_redelivery_while_switching_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut h = handler(&dir);

        h.apply(&switch("ev-1", "yolo_s")).unwrap();
        assert_eq!(h.switches_applied(), 1);

        // Same event id again, still in Switching: state unchanged, no
        // duplicate swap recorded.
        let outcome = h.apply(&switch("ev-1", "yolo_s")).unwrap();
        assert_eq!(outcome, ApplyOutcome::DuplicateIgnored);
        assert_eq!(
            h.phase(),
            &HandlerPhase::Switching {
                target: "yolo_s".to_string()
            }
        );
        assert_eq!(h.switches_applied(), 1);
    }

    #[test]
    fn test_duplicate_retrain_does_not_fork_twice() {
        let dir = TempDir::new().unwrap();
        let mut h = handler(&dir);

        h.apply(&retrain("ev-1")).unwrap();
        assert_eq!(h.retrains_started(), 1);
        assert_eq!(h.phase(), &HandlerPhase::Retraining);

        let outcome = h.apply(&retrain("ev-1")).unwrap();
        assert_eq!(outcome, ApplyOutcome::DuplicateIgnored);
        assert_eq!(h.retrains_started(), 1);
    }

    #[test]
    fn test_switches_defer_during_retraining_and_apply_after() {
        let dir = TempDir::new().unwrap();
        let mut h = handler(&dir);

        h.apply(&retrain("ev-1")).unwrap();
        let outcome = h.apply(&switch("ev-2", "yolo_n")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Deferred);
        let outcome = h.apply(&switch("ev-3", "yolo_m")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Deferred);

        // Nothing actuated yet.
        let surface = ActuationSurface::new(dir.path());
        assert!(surface.read_active_model().unwrap().is_none());

        h.complete_retraining().unwrap();
        assert_eq!(h.phase(), &HandlerPhase::Idle);
        // Applied in arrival order: the later delivery wins the file.
        assert_eq!(
            surface.read_active_model().unwrap().as_deref(),
            Some("yolo_m")
        );
        assert_eq!(h.switches_applied(), 2);
    }

    #[test]
    fn test_deferred_duplicate_is_still_ignored() {
        let dir = TempDir::new().unwrap();
        let mut h = handler(&dir);

        h.apply(&retrain("ev-1")).unwrap();
        h.apply(&switch("ev-2", "yolo_n")).unwrap();
        let outcome = h.apply(&switch("ev-2", "yolo_n")).unwrap();
        assert_eq!(outcome, ApplyOutcome::DuplicateIgnored);

        h.complete_retraining().unwrap();
        assert_eq!(h.switches_applied(), 1);
    }

    #[test]
    fn test_retrain_unavailable_is_reported_not_applied() {
        let dir = TempDir::new().unwrap();
        let mut h = AdaptationHandler::new(ActuationSurface::new(dir.path()), false);

        let outcome = h.apply(&retrain("ev-1")).unwrap();
        assert_eq!(outcome, ApplyOutcome::RetrainUnavailable);
        assert_eq!(h.phase(), &HandlerPhase::Idle);
        assert_eq!(h.retrains_started(), 0);

        // The event was not consumed: a later redelivery after an operator
        // enables retraining would still apply.
        h.allow_retrain = true;
        let outcome = h.apply(&retrain("ev-1")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }

    #[test]
    fn test_complete_switch_returns_to_idle() {
        let dir = TempDir::new().unwrap();
        let mut h = handler(&dir);

        h.apply(&switch("ev-1", "yolo_s")).unwrap();
        h.complete_switch();
        assert_eq!(h.phase(), &HandlerPhase::Idle);
    }
}
