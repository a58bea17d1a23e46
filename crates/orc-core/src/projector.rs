//! Structured view projector (C4): folds a run's structured event stream
//! into an in-memory thinking/tool/diff snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use orc_db::models::RunStructuredEvent;

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingItem {
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolState {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: String,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffInfo {
    pub diff_stat: String,
    pub diff_patch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectionSnapshot {
    pub last_sequence: i64,
    pub timeline: Vec<i64>,
    pub thinking: Vec<ThinkingItem>,
    pub tools: Vec<ToolState>,
    pub diff: Option<DiffInfo>,
}

/// Describes what changed in the snapshot as a result of applying one event,
/// so the publisher can emit targeted notifications rather than the whole
/// snapshot.
#[derive(Debug, Clone)]
pub enum ProjectionDelta {
    NewThinkingItem(ThinkingItem),
    ToolUpdated(ToolState),
    DiffUpdated(DiffInfo),
    /// Event recognised but carries no projectable content (still advances
    /// `last_sequence`).
    None,
}

/// Normalise a raw payload string per the decode rules: whitespace-only
/// becomes `"{}"`; unparseable JSON is escaped as a string; parseable JSON
/// is re-serialised minified.
pub fn normalize_payload(raw: &str) -> String {
    if raw.trim().is_empty() {
        return "{}".to_string();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => value.to_string(),
        Err(_) => serde_json::Value::String(raw.to_string()).to_string(),
    }
}

/// Apply one structured event to `snapshot`, mutating it in place. Returns
/// the `None` delta for an event whose sequence was already applied
/// (idempotent hydration).
pub fn apply_structured_event(
    snapshot: &mut ProjectionSnapshot,
    event: &RunStructuredEvent,
) -> ProjectionDelta {
    if event.sequence <= snapshot.last_sequence {
        return ProjectionDelta::None;
    }

    snapshot.timeline.push(event.sequence);

    let delta = match event.category.as_str() {
        "reasoning.delta" => {
            let content = event
                .payload_json
                .get("thinking")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let item = ThinkingItem {
                sequence: event.sequence,
                timestamp: event.timestamp,
                content,
            };
            snapshot.thinking.push(item.clone());
            ProjectionDelta::NewThinkingItem(item)
        }
        "tool.lifecycle" => {
            let tool_call_id = event
                .payload_json
                .get("tool_call_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let tool_name = event
                .payload_json
                .get("tool_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let state = event
                .payload_json
                .get("state")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let existing = snapshot
                .tools
                .iter_mut()
                .find(|t| t.tool_call_id == tool_call_id && t.tool_name == tool_name);

            let started_at = existing
                .as_ref()
                .and_then(|t| t.started_at)
                .or(Some(event.timestamp));

            let updated = ToolState {
                tool_call_id,
                tool_name,
                state,
                started_at,
            };

            match existing {
                Some(slot) => *slot = updated.clone(),
                None => snapshot.tools.push(updated.clone()),
            }

            ProjectionDelta::ToolUpdated(updated)
        }
        "diff.updated" => {
            let diff_stat = event
                .payload_json
                .get("diff_stat")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let diff_patch = event
                .payload_json
                .get("diff_patch")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let info = DiffInfo { diff_stat, diff_patch };
            snapshot.diff = Some(info.clone());
            ProjectionDelta::DiffUpdated(info)
        }
        _ => ProjectionDelta::None,
    };

    snapshot.last_sequence = event.sequence;
    delta
}

/// Hydrate a snapshot from a run's persisted events, then return it.
pub fn hydrate(events: &[RunStructuredEvent]) -> ProjectionSnapshot {
    let mut snapshot = ProjectionSnapshot::default();
    for event in events {
        apply_structured_event(&mut snapshot, event);
    }
    snapshot
}

fn shard_index(run_id: &Uuid) -> usize {
    let bytes = run_id.as_bytes();
    (bytes[0] as usize) % SHARD_COUNT
}

/// The process-wide projection cache, keyed by `run_id`. Append-only and
/// never cross-mutated; sharded to reduce lock contention across many
/// concurrently streaming runs.
pub struct ProjectionCache {
    shards: Vec<Mutex<HashMap<Uuid, ProjectionSnapshot>>>,
}

impl ProjectionCache {
    pub fn new() -> Arc<Self> {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(Mutex::new(HashMap::new()));
        }
        Arc::new(Self { shards })
    }

    /// Apply an event to the cached snapshot for `run_id`, hydrating from
    /// `hydrate_events` (the store) on first touch.
    pub async fn apply(
        &self,
        run_id: Uuid,
        hydrate_events: impl FnOnce() -> Vec<RunStructuredEvent>,
        event: &RunStructuredEvent,
    ) -> ProjectionDelta {
        let shard = &self.shards[shard_index(&run_id)];
        let mut map = shard.lock().await;
        let snapshot = map
            .entry(run_id)
            .or_insert_with(|| hydrate(&hydrate_events()));
        apply_structured_event(snapshot, event)
    }

    pub async fn snapshot(&self, run_id: Uuid) -> Option<ProjectionSnapshot> {
        let shard = &self.shards[shard_index(&run_id)];
        let map = shard.lock().await;
        map.get(&run_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(sequence: i64, category: &str, payload: serde_json::Value) -> RunStructuredEvent {
        RunStructuredEvent {
            id: sequence,
            run_id: Uuid::new_v4(),
            sequence,
            category: category.to_string(),
            event_type: "structured".to_string(),
            payload_json: payload,
            schema_version: "harness-structured-event-v2".to_string(),
            summary: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn dedup_drops_already_applied_sequence() {
        let mut snapshot = ProjectionSnapshot {
            last_sequence: 5,
            ..Default::default()
        };
        let e = event(3, "reasoning.delta", serde_json::json!({"thinking": "x"}));
        let delta = apply_structured_event(&mut snapshot, &e);
        assert!(matches!(delta, ProjectionDelta::None));
        assert_eq!(snapshot.last_sequence, 5);
    }

    #[test]
    fn full_scenario_matches_expected_snapshot() {
        let events = vec![
            event(1, "reasoning.delta", serde_json::json!({"thinking": "plan"})),
            event(
                2,
                "tool.lifecycle",
                serde_json::json!({"tool_call_id": "c1", "tool_name": "bash", "state": "started"}),
            ),
            event(
                3,
                "tool.lifecycle",
                serde_json::json!({"tool_call_id": "c1", "tool_name": "bash", "state": "completed"}),
            ),
            event(
                4,
                "diff.updated",
                serde_json::json!({"diff_stat": "1 file changed", "diff_patch": "..."}),
            ),
        ];

        let snapshot = hydrate(&events);

        assert_eq!(snapshot.last_sequence, 4);
        assert_eq!(snapshot.thinking.len(), 1);
        assert_eq!(snapshot.thinking[0].content, "plan");
        assert_eq!(snapshot.tools.len(), 1);
        assert_eq!(snapshot.tools[0].tool_name, "bash");
        assert_eq!(snapshot.tools[0].state, "completed");
        assert_eq!(snapshot.diff.as_ref().unwrap().diff_stat, "1 file changed");
    }

    #[test]
    fn normalize_payload_handles_whitespace_unparseable_and_parseable() {
        assert_eq!(normalize_payload("   "), "{}");
        assert_eq!(normalize_payload("not json"), "\"not json\"");
        assert_eq!(normalize_payload(r#"{"a":1}"#), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn cache_hydrates_on_first_touch_and_applies_subsequent_events() {
        let cache = ProjectionCache::new();
        let run_id = Uuid::new_v4();

        let e1 = event(1, "reasoning.delta", serde_json::json!({"thinking": "plan"}));
        cache.apply(run_id, Vec::new, &e1).await;

        let e2 = event(
            2,
            "tool.lifecycle",
            serde_json::json!({"tool_call_id": "c1", "tool_name": "bash", "state": "started"}),
        );
        cache.apply(run_id, Vec::new, &e2).await;

        let snapshot = cache.snapshot(run_id).await.unwrap();
        assert_eq!(snapshot.last_sequence, 2);
        assert_eq!(snapshot.thinking.len(), 1);
        assert_eq!(snapshot.tools.len(), 1);
    }
}
