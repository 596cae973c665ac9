// src/model.rs
//
// =============================================================================
// SHORTLIST: COORDINATION DOCUMENT TYPES (v 0.1)
// =============================================================================
//
// Typed shapes for the documents committed to the coordination repository.
// Every document keeps an `extra` bucket of unknown fields so a newer
// Shortlist version's additions survive a round-trip through an older one.
// `BTreeMap` (not `HashMap`) everywhere a document has a key->value section,
// so two semantically-equal documents always serialize to identical bytes —
// that's what lets `NothingToCommit` be detected locally before a push.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_empty_map(m: &serde_json::Map<String, serde_json::Value>) -> bool {
    m.is_empty()
}

// -----------------------------------------------------------------------------
// roster.json
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeMetrics {
    pub cpu_load: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RosterEntry {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub metrics: NodeMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(flatten, skip_serializing_if = "is_empty_map")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RosterDocument {
    pub nodes: Vec<RosterEntry>,
}

impl RosterDocument {
    pub fn is_alive(entry: &RosterEntry, now: DateTime<Utc>, node_timeout: chrono::Duration) -> bool {
        now - entry.last_seen <= node_timeout
    }

    pub fn get(&self, id: &str) -> Option<&RosterEntry> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn upsert(&mut self, entry: RosterEntry) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.id == entry.id) {
            *existing = entry;
        } else {
            self.nodes.push(entry);
        }
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

// -----------------------------------------------------------------------------
// schedule.json
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDeclaration {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_region: Option<String>,

    #[serde(flatten, skip_serializing_if = "is_empty_map")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleDocument {
    pub tasks: Vec<TaskDeclaration>,
}

impl ScheduleDocument {
    pub fn get(&self, id: &str) -> Option<&TaskDeclaration> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn sorted_by_priority(&self) -> Vec<&TaskDeclaration> {
        let mut v: Vec<&TaskDeclaration> = self.tasks.iter().collect();
        v.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        v
    }
}

// -----------------------------------------------------------------------------
// assignments.json
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Claiming,
    Streaming,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub node_id: String,
    pub claimed_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub status: AssignmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(flatten, skip_serializing_if = "is_empty_map")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssignmentsDocument {
    pub assignments: BTreeMap<String, Assignment>,
}

impl AssignmentsDocument {
    pub fn is_live(assignment: &Assignment, now: DateTime<Utc>) -> bool {
        now < assignment.lease_expires_at
    }

    pub fn is_orphan(assignment: &Assignment, now: DateTime<Utc>) -> bool {
        now > assignment.lease_expires_at
    }
}

// -----------------------------------------------------------------------------
// shortlist.json — opaque to the core
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShortlistDocument(pub serde_json::Value);

// -----------------------------------------------------------------------------
// triggers.json — operator-authored policy, read-only to the Governor
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TriggerCondition {
    TimeBased {
        #[serde(skip_serializing_if = "Option::is_none")]
        start: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        hours: Option<Vec<u32>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        weekdays: Option<Vec<u32>>,
    },
    SwarmMetricAgg {
        metric: String,
        aggregator: Aggregator,
        operator: Operator,
        threshold: f64,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    Average,
    Sum,
    CountAboveThreshold,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Lt,
    Eq,
    Ge,
    Le,
}

impl Operator {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Gt => lhs > rhs,
            Operator::Lt => lhs < rhs,
            Operator::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Operator::Ge => lhs >= rhs,
            Operator::Le => lhs <= rhs,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Quorum {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_nodes_alive: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_percent_alive: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum ScheduleAction {
    AddTask {
        id: String,
        #[serde(rename = "type")]
        task_type: String,
        priority: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        required_role: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        required_region: Option<String>,
    },
    RemoveTask {
        id: String,
    },
    ChangePriority {
        id: String,
        priority: i64,
    },
    SwapTasks {
        id_a: String,
        id_b: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerRule {
    pub condition: TriggerCondition,
    #[serde(default, skip_serializing_if = "is_default_quorum")]
    pub quorum: Quorum,
    pub actions: Vec<ScheduleAction>,
}

fn is_default_quorum(q: &Quorum) -> bool {
    q.min_nodes_alive.is_none() && q.min_percent_alive.is_none()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggersDocument {
    pub triggers: BTreeMap<String, TriggerRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_upsert_replaces_by_id() {
        let mut doc = RosterDocument::default();
        let now = Utc::now();
        doc.upsert(RosterEntry {
            id: "n1".into(),
            started_at: now,
            last_seen: now,
            metrics: NodeMetrics { cpu_load: 0.1, memory_percent: 0.2 },
            region: None,
            extra: Default::default(),
        });
        doc.upsert(RosterEntry {
            id: "n1".into(),
            started_at: now,
            last_seen: now + chrono::Duration::seconds(5),
            metrics: NodeMetrics { cpu_load: 0.5, memory_percent: 0.6 },
            region: Some("eu".into()),
            extra: Default::default(),
        });
        assert_eq!(doc.nodes.len(), 1);
        assert_eq!(doc.nodes[0].region.as_deref(), Some("eu"));
    }

    #[test]
    fn unknown_fields_round_trip() {
        let raw = r#"{"tasks":[{"id":"t1","type":"web","priority":1,"from_future":true}]}"#;
        let doc: ScheduleDocument = serde_json::from_str(raw).unwrap();
        let back = serde_json::to_string(&doc).unwrap();
        assert!(back.contains("\"from_future\":true"));
    }

    #[test]
    fn operator_apply() {
        assert!(Operator::Ge.apply(3.0, 3.0));
        assert!(!Operator::Gt.apply(3.0, 3.0));
        assert!(Operator::Eq.apply(1.0, 1.0));
    }
}
