//! One adaptation cycle: ingest → analyze → plan → dispatch → commit.
//!
//! The per-(policy, instance) slot lock is taken before the ordering check
//! and held until the new state is committed: samples for one instance
//! are processed in arrival order,
//! and the tactic for sample N is dispatched before analysis of sample
//! N+1 begins. State is mutated on a clone and swapped in at the end, so
//! a failed cycle leaves the previous state untouched.

use crate::analyzer;
use crate::audit::{AuditLogger, ExportLog};
use crate::dispatcher::Dispatcher;
use crate::knowledge::KnowledgeStore;
use crate::planner::{self, PlanInput, VersionRegistry};
use adapt_common::{
    AdaptError, AdaptationEvent, AuditKind, AuditRecord, Classification, ExportRecord,
    TacticKind, TelemetrySample,
};
use rand::rngs::SmallRng;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// What one ingested sample led to.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub classification: Classification,
    pub suppressed_by_cooldown: bool,
    /// The adaptation event issued this cycle, if any (delivered or not).
    pub event: Option<AdaptationEvent>,
}

/// The control loop itself.
pub struct AdaptationCycle {
    store: Arc<KnowledgeStore>,
    dispatcher: Arc<Dispatcher>,
    audit: Arc<AuditLogger>,
    export: Arc<ExportLog>,
    registry: Arc<dyn VersionRegistry>,
    rng: Mutex<SmallRng>,
}

impl AdaptationCycle {
    pub fn new(
        store: Arc<KnowledgeStore>,
        dispatcher: Arc<Dispatcher>,
        audit: Arc<AuditLogger>,
        export: Arc<ExportLog>,
        registry: Arc<dyn VersionRegistry>,
        rng: SmallRng,
    ) -> Self {
        Self {
            store,
            dispatcher,
            audit,
            export,
            registry,
            rng: Mutex::new(rng),
        }
    }

    /// Process one telemetry sample end to end.
    pub async fn ingest(&self, sample: TelemetrySample) -> Result<CycleOutcome, AdaptError> {
        if let Err(e) = sample.validate() {
            self.audit_rejection(&sample, &e).await;
            return Err(e);
        }

        let Some(policy) = self.store.get_policy(&sample.policy_id).await else {
            let e = AdaptError::UnknownPolicy(sample.policy_id.clone());
            self.audit_rejection(&sample, &e).await;
            return Err(e);
        };

        // Serialization point: everything below runs under the instance key's
        // lock, including dispatch.
        let slot_arc = self.store.slot(&sample.policy_id, &sample.instance_id).await;
        let mut slot = slot_arc.lock().await;

        if let Some(last_timestamp) = slot.state.last_timestamp {
            if sample.timestamp <= last_timestamp {
                let e = AdaptError::OutOfOrderSample {
                    instance_id: sample.instance_id.clone(),
                    timestamp: sample.timestamp,
                    last_timestamp,
                };
                self.audit_rejection(&sample, &e).await;
                return Err(e);
            }
        }

        let mut next = slot.state.clone();
        next.last_timestamp = Some(sample.timestamp);

        let analysis = analyzer::analyze(&policy, &mut next, &sample);
        next.update_ema(&sample.model_used, sample.score, policy.ema_alpha);

        let mut outcome = CycleOutcome {
            classification: analysis.classification,
            suppressed_by_cooldown: analysis.suppressed_by_cooldown,
            event: None,
        };

        if analysis.actionable {
            // Snapshot for planning so the committed state can be mutated
            // independently below.
            let planning_state = next.clone();
            let input = PlanInput {
                policy: &policy,
                state: &planning_state,
                classification: analysis.classification,
                current_model: &sample.model_used,
                policy_id: &sample.policy_id,
                instance_id: &sample.instance_id,
            };

            let tactic = {
                let mut rng = self.rng.lock().expect("planner rng poisoned");
                planner::plan(&input, self.registry.as_ref(), &mut *rng)
            };

            if let Some(tactic) = tactic {
                let event = AdaptationEvent::issue(
                    &sample.policy_id,
                    &sample.instance_id,
                    tactic,
                    analysis.classification,
                    analysis.trigger_value,
                );
                outcome.event = Some(
                    self.execute(&policy, &sample, &input, event, &mut next)
                        .await,
                );
            }
        }

        self.export
            .append(
                &sample.policy_id,
                &sample.instance_id,
                &ExportRecord::from(&sample),
            )
            .await
            .map_err(|e| AdaptError::Io(std::io::Error::other(e.to_string())))?;

        // Commit: the cycle fully succeeded.
        slot.state = next;
        self.store.push_history(&mut slot, sample);

        Ok(outcome)
    }

    /// Persist and deliver one event, falling back to the best switch
    /// candidate when the managed side rejects a retrain. Cooldown and
    /// counters are only armed on confirmed delivery.
    async fn execute(
        &self,
        policy: &adapt_common::Policy,
        sample: &TelemetrySample,
        input: &PlanInput<'_>,
        mut event: AdaptationEvent,
        next: &mut adapt_common::AnalysisState,
    ) -> AdaptationEvent {
        self.store.append_event(event.clone()).await;
        self.audit_dispatch(&event, AuditKind::TacticDispatched).await;
        info!(
            "Dispatching {:?} tactic for {}/{} (trigger {:.4})",
            event.tactic.kind, event.policy_id, event.instance_id, event.trigger_value
        );

        match self.dispatcher.dispatch(&mut event).await {
            Ok(()) => {
                self.arm_cooldown(policy, &event, next);
                self.store.update_event(&event).await;
                event
            }
            Err(AdaptError::RetrainFailure(reason)) => {
                self.store.update_event(&event).await;
                self.audit_dispatch(&event, AuditKind::RetrainRejected).await;
                warn!(
                    "Retrain rejected for {}/{} ({}), trying best switch candidate",
                    sample.policy_id, sample.instance_id, reason
                );

                match planner::fallback_switch(input) {
                    Some(tactic) => {
                        // A new decision, so a new event id.
                        let mut fallback = AdaptationEvent::issue(
                            &sample.policy_id,
                            &sample.instance_id,
                            tactic,
                            event.classification,
                            event.trigger_value,
                        );
                        self.store.append_event(fallback.clone()).await;
                        self.audit_dispatch(&fallback, AuditKind::TacticDispatched)
                            .await;

                        match self.dispatcher.dispatch(&mut fallback).await {
                            Ok(()) => self.arm_cooldown(policy, &fallback, next),
                            Err(_) => {
                                next.counters.dispatch_failures += 1;
                                self.audit_dispatch(&fallback, AuditKind::DispatchFailed)
                                    .await;
                            }
                        }
                        self.store.update_event(&fallback).await;
                        fallback
                    }
                    None => {
                        next.counters.dispatch_failures += 1;
                        event
                    }
                }
            }
            Err(e) => {
                // The decision stays recorded; only the cooldown depends on
                // delivery success.
                next.counters.dispatch_failures += 1;
                self.store.update_event(&event).await;
                self.audit_dispatch(&event, AuditKind::DispatchFailed).await;
                warn!(
                    "Dispatch failed for {}/{}: {}",
                    sample.policy_id, sample.instance_id, e
                );
                event
            }
        }
    }

    fn arm_cooldown(
        &self,
        policy: &adapt_common::Policy,
        event: &AdaptationEvent,
        next: &mut adapt_common::AnalysisState,
    ) {
        next.recovery_cycles_remaining = policy.cooldown_cycles_after_switch;
        match event.tactic.kind {
            TacticKind::Switch => next.counters.model_switches += 1,
            TacticKind::Retrain => next.counters.retrains += 1,
        }
    }

    async fn audit_rejection(&self, sample: &TelemetrySample, error: &AdaptError) {
        let record = AuditRecord::new(AuditKind::TelemetryRejected, &sample.policy_id)
            .instance(&sample.instance_id)
            .reason(error.reason_code())
            .detail(error.to_string());
        if let Err(e) = self.audit.log(&record).await {
            warn!("Failed to audit telemetry rejection: {}", e);
        }
    }

    async fn audit_dispatch(&self, event: &AdaptationEvent, kind: AuditKind) {
        let record = AuditRecord::new(kind, &event.policy_id)
            .instance(&event.instance_id)
            .detail(format!(
                "event {} {:?} -> {:?}",
                event.event_id, event.tactic.kind, event.tactic.target
            ));
        if let Err(e) = self.audit.log(&record).await {
            warn!("Failed to audit dispatch: {}", e);
        }
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn export(&self) -> &Arc<ExportLog> {
        &self.export
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }
}
