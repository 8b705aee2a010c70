//! Knowledge Store - versioned, per-policy state behind per-instance
//! serialization keys.
//!
//! The store owns registered policies, the telemetry history and analysis
//! state per (policy_id, instance_id), and the adaptation event log. All
//! mutating access to one instance key goes through its `Arc<Mutex>` slot;
//! the caller holds the slot lock for the whole analysis cycle, which
//! linearizes samples per instance while distinct instances proceed in
//! parallel.

use adapt_common::{AdaptationEvent, AnalysisState, Policy, TelemetrySample};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Serialization key: one managed instance under one policy.
pub type InstanceKey = (String, String);

/// State guarded by an instance key's lock.
#[derive(Debug, Default)]
pub struct InstanceSlot {
    pub state: AnalysisState,
    pub history: VecDeque<TelemetrySample>,
}

/// Per-policy knowledge view for the debug/audit endpoint.
#[derive(Debug, Serialize)]
pub struct KnowledgeView {
    pub policy: Policy,
    pub instances: Vec<InstanceView>,
    pub events: Vec<AdaptationEvent>,
}

#[derive(Debug, Serialize)]
pub struct InstanceView {
    pub instance_id: String,
    pub state: AnalysisState,
    pub history: Vec<TelemetrySample>,
}

/// The Knowledge Store (K in the loop).
pub struct KnowledgeStore {
    policies: RwLock<HashMap<String, Arc<Policy>>>,
    slots: RwLock<HashMap<InstanceKey, Arc<Mutex<InstanceSlot>>>>,
    events: RwLock<VecDeque<AdaptationEvent>>,
    history_limit: usize,
    event_limit: usize,
}

impl KnowledgeStore {
    pub fn new(history_limit: usize, event_limit: usize) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            slots: RwLock::new(HashMap::new()),
            events: RwLock::new(VecDeque::new()),
            history_limit,
            event_limit,
        }
    }

    /// Register or replace a policy. Replacing atomically resets every
    /// instance slot under the policy so the new policy does not inherit
    /// stale exploration history or cooldown state.
    pub async fn put_policy(&self, policy: Policy) {
        let policy_id = policy.policy_id.clone();
        let replaced = {
            let mut policies = self.policies.write().await;
            policies.insert(policy_id.clone(), Arc::new(policy)).is_some()
        };

        let mut slots = self.slots.write().await;
        slots.retain(|(pid, _), _| *pid != policy_id);

        if replaced {
            info!("Policy '{}' replaced, analysis state reset", policy_id);
        } else {
            info!("Policy '{}' registered", policy_id);
        }
    }

    pub async fn get_policy(&self, policy_id: &str) -> Option<Arc<Policy>> {
        self.policies.read().await.get(policy_id).cloned()
    }

    pub async fn policy_count(&self) -> usize {
        self.policies.read().await.len()
    }

    /// Get-or-create the serialization slot for an instance key. The
    /// returned `Arc<Mutex>` is the per-key lock: callers hold it for the
    /// duration of one analysis cycle.
    pub async fn slot(&self, policy_id: &str, instance_id: &str) -> Arc<Mutex<InstanceSlot>> {
        let key = (policy_id.to_string(), instance_id.to_string());

        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(&key) {
                return Arc::clone(slot);
            }
        }

        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(InstanceSlot::default()))),
        )
    }

    /// Append an accepted sample to a slot's history, trimming to the
    /// retention limit. Caller must hold the slot lock.
    pub fn push_history(&self, slot: &mut InstanceSlot, sample: TelemetrySample) {
        slot.history.push_back(sample);
        while slot.history.len() > self.history_limit {
            slot.history.pop_front();
        }
    }

    /// Append a new adaptation event to the log.
    pub async fn append_event(&self, event: AdaptationEvent) {
        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > self.event_limit {
            events.pop_front();
        }
    }

    /// Update delivery bookkeeping for an existing event.
    pub async fn update_event(&self, updated: &AdaptationEvent) {
        let mut events = self.events.write().await;
        if let Some(existing) = events
            .iter_mut()
            .find(|e| e.event_id == updated.event_id)
        {
            *existing = updated.clone();
        }
    }

    /// Recent events, most recent first.
    pub async fn events(&self, limit: usize) -> Vec<AdaptationEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Full knowledge view for one policy: definition, per-instance state
    /// and history, and the policy's events.
    pub async fn knowledge_view(&self, policy_id: &str) -> Option<KnowledgeView> {
        let policy = self.get_policy(policy_id).await?;

        let slot_arcs: Vec<(String, Arc<Mutex<InstanceSlot>>)> = {
            let slots = self.slots.read().await;
            slots
                .iter()
                .filter(|((pid, _), _)| pid == policy_id)
                .map(|((_, iid), slot)| (iid.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut instances = Vec::with_capacity(slot_arcs.len());
        for (instance_id, slot_arc) in slot_arcs {
            let slot = slot_arc.lock().await;
            instances.push(InstanceView {
                instance_id,
                state: slot.state.clone(),
                history: slot.history.iter().cloned().collect(),
            });
        }
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

        let events = {
            let events = self.events.read().await;
            events
                .iter()
                .filter(|e| e.policy_id == policy_id)
                .cloned()
                .collect()
        };

        Some(KnowledgeView {
            policy: (*policy).clone(),
            instances,
            events,
        })
    }
}
