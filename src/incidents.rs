//! Incident lifecycle per rule
//!
//! Each rule is either without incident or has exactly one open incident.
//! Transitions for one rule are serialised by that rule's own mutex, so
//! results for different rules never wait on each other.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::{
    probes::ProbeResult,
    wire::{Incident, IncidentHistoryItem, IncidentStatus, Timestamp},
};

/// Default upper bound for the history of one incident
pub const DEFAULT_MAX_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleHealth {
    Healthy,
    Failing,
}

impl From<&ProbeResult> for RuleHealth {
    fn from(result: &ProbeResult) -> Self {
        if result.is_ok() {
            RuleHealth::Healthy
        } else {
            RuleHealth::Failing
        }
    }
}

/// What one observation did to a rule
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Healthy rule stayed healthy
    Unchanged,
    Opened(Incident),
    /// Another failure was recorded on the open incident
    Updated(Incident),
    Closed(Incident),
}

impl Transition {
    /// The incident to persist, if any
    pub fn incident(&self) -> Option<&Incident> {
        match self {
            Transition::Unchanged => None,
            Transition::Opened(incident)
            | Transition::Updated(incident)
            | Transition::Closed(incident) => Some(incident),
        }
    }

    pub fn into_incident(self) -> Option<Incident> {
        match self {
            Transition::Unchanged => None,
            Transition::Opened(incident)
            | Transition::Updated(incident)
            | Transition::Closed(incident) => Some(incident),
        }
    }
}

#[derive(Debug, Default)]
struct RuleState {
    open: Option<Incident>,
}

/// Per-rule incident state machine
#[derive(Debug)]
pub struct IncidentEngine {
    rules: Mutex<HashMap<String, Arc<Mutex<RuleState>>>>,
    max_history: usize,
}

impl Default for IncidentEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentEngine {
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// `max_history` is raised to 2 so an incident always keeps its opening
    /// and its latest entry
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            rules: Mutex::new(HashMap::new()),
            max_history: max_history.max(2),
        }
    }

    async fn rule(&self, rule_id: &str) -> Arc<Mutex<RuleState>> {
        let mut rules = self.rules.lock().await;
        rules
            .entry(rule_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RuleState::default())))
            .clone()
    }

    fn push_history(&self, incident: &mut Incident, status: IncidentStatus, at: &DateTime<Utc>) {
        if incident.histories.len() >= self.max_history {
            // Index 0 is the opening entry and always stays.
            incident.histories.remove(1);
        }
        incident.histories.push(IncidentHistoryItem {
            status: status.code(),
            timestamp: Some(Timestamp::from_datetime(at)),
        });
    }

    /// Feed one observation for `rule_id` taken at `at`
    pub async fn observe(&self, rule_id: &str, health: RuleHealth, at: DateTime<Utc>) -> Transition {
        let rule = self.rule(rule_id).await;
        let mut state = rule.lock().await;

        let transition = match (state.open.take(), health) {
            (None, RuleHealth::Healthy) => Transition::Unchanged,
            (None, RuleHealth::Failing) => {
                let mut incident = Incident {
                    id: uuid::Uuid::new_v4().to_string(),
                    status: IncidentStatus::Opened.code(),
                    rule_id: rule_id.to_string(),
                    histories: Vec::new(),
                };
                self.push_history(&mut incident, IncidentStatus::Opened, &at);
                debug!(rule = rule_id, incident = %incident.id, "incident opened");
                state.open = Some(incident.clone());
                Transition::Opened(incident)
            }
            (Some(mut incident), RuleHealth::Failing) => {
                self.push_history(&mut incident, IncidentStatus::Opened, &at);
                trace!(rule = rule_id, incident = %incident.id, entries = incident.histories.len(), "incident still failing");
                state.open = Some(incident.clone());
                Transition::Updated(incident)
            }
            (Some(mut incident), RuleHealth::Healthy) => {
                self.push_history(&mut incident, IncidentStatus::Closed, &at);
                incident.status = IncidentStatus::Closed.code();
                debug!(rule = rule_id, incident = %incident.id, "incident closed");
                Transition::Closed(incident)
            }
        };

        let idle = state.open.is_none();
        drop(state);
        if idle {
            self.release(rule_id, rule).await;
        }
        transition
    }

    /// Forget a rule without an open incident unless another observer holds it
    async fn release(&self, rule_id: &str, rule: Arc<Mutex<RuleState>>) {
        let mut rules = self.rules.lock().await;
        // The map and `rule` are the only owners; nobody can reach the state
        // without the map lock we hold.
        let unused = Arc::strong_count(&rule) == 2
            && rule.try_lock().is_ok_and(|state| state.open.is_none());
        if unused {
            rules.remove(rule_id);
        }
    }

    /// Number of rules currently holding state
    pub async fn tracked_rules(&self) -> usize {
        self.rules.lock().await.len()
    }

    pub async fn observe_result(&self, rule_id: &str, result: &ProbeResult) -> Transition {
        self.observe(rule_id, RuleHealth::from(result), result.timestamp)
            .await
    }

    /// Currently open incident of `rule_id`
    pub async fn open_incident(&self, rule_id: &str) -> Option<Incident> {
        let rule = {
            let rules = self.rules.lock().await;
            rules.get(rule_id).cloned()
        }?;
        let state = rule.lock().await;
        state.open.clone()
    }

    /// Resume an incident that was open before a restart.
    ///
    /// Returns false, leaving the engine untouched, for incidents that are
    /// not open or whose rule already has an open incident.
    pub async fn restore(&self, incident: Incident) -> bool {
        if incident.status != IncidentStatus::Opened.code() || incident.rule_id.is_empty() {
            return false;
        }
        let rule = self.rule(&incident.rule_id).await;
        let mut state = rule.lock().await;
        if state.open.is_some() {
            return false;
        }

        let mut incident = incident;
        if incident.histories.len() > self.max_history {
            let excess = incident.histories.len() - self.max_history;
            incident.histories.drain(1..1 + excess);
        }
        debug!(rule = %incident.rule_id, incident = %incident.id, "incident restored");
        state.open = Some(incident);
        true
    }
}
