use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::db::Database;
use crate::models::{LastGenerated, RecommendedMealRecord, StoredState};

/// Committed history and the committed-id set are both capped here.
pub const HISTORY_LIMIT: usize = 30;

/// Migrate a raw persisted payload into the current shape. Called once at
/// load time; tolerates every shape ever written:
/// - a bare array (the original history-only layout),
/// - an object missing `committedIds` (records were committed implicitly),
/// - the current versioned object.
/// Anything unreadable degrades to an empty default rather than an error.
#[must_use]
pub fn normalize_stored_state(payload: &str) -> StoredState {
    let Ok(raw) = serde_json::from_str::<Value>(payload) else {
        return StoredState::default();
    };

    let (history_raw, object) = match raw {
        Value::Array(items) => (items, None),
        Value::Object(map) => {
            let items = map
                .get("history")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            (items, Some(map))
        }
        _ => return StoredState::default(),
    };

    let mut history: Vec<RecommendedMealRecord> = history_raw
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();
    history.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let seen_explain_at = object
        .as_ref()
        .and_then(|m| m.get("seenExplainAt"))
        .and_then(Value::as_str)
        .map(String::from);

    let last_generated: Option<LastGenerated> = object
        .as_ref()
        .and_then(|m| m.get("lastGenerated"))
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());

    // Legacy payloads predate the committed-id set; everything already in
    // history was committed implicitly, so seed the set from it or the
    // subset invariant would erase the history on the next save.
    let committed_ids: Vec<String> = match object.as_ref().and_then(|m| m.get("committedIds")) {
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => history.iter().map(|r| r.id.clone()).collect(),
    };

    StoredState {
        version: 1,
        history,
        seen_explain_at,
        committed_ids,
        last_generated,
    }
}

/// Load the user's blob; a missing row or unreadable payload both yield
/// the empty default so a read can never fail the request.
#[must_use]
pub fn load(db: &Database, user_id: &str) -> StoredState {
    match db.get_state_payload(user_id) {
        Ok(Some(payload)) => normalize_stored_state(&payload),
        Ok(None) => StoredState::default(),
        Err(err) => {
            warn!(user_id, error = %err, "failed to read recommendation state; using empty default");
            StoredState::default()
        }
    }
}

/// Persist the blob. This is the only path that makes a record durable:
/// history is re-derived as its intersection with `committed_ids` (capped,
/// most-recent-first) on every save, so revoked or orphaned entries cannot
/// resurrect.
pub fn save(db: &Database, user_id: &str, state: &StoredState) -> Result<()> {
    let committed: std::collections::HashSet<&str> =
        state.committed_ids.iter().map(String::as_str).collect();

    let mut history: Vec<RecommendedMealRecord> = state
        .history
        .iter()
        .filter(|r| committed.contains(r.id.as_str()))
        .cloned()
        .collect();
    history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    history.truncate(HISTORY_LIMIT);

    // History ids first so the cap can never break the subset invariant,
    // then the remaining committed ids in their existing order.
    let mut committed_ids: Vec<String> = history.iter().map(|r| r.id.clone()).collect();
    for id in &state.committed_ids {
        if !committed_ids.contains(id) {
            committed_ids.push(id.clone());
        }
    }
    committed_ids.truncate(HISTORY_LIMIT);

    let normalized = StoredState {
        version: 1,
        history,
        seen_explain_at: state.seen_explain_at.clone(),
        committed_ids,
        last_generated: state.last_generated.clone(),
    };
    let payload = serde_json::to_string(&normalized)?;
    db.put_state_payload(user_id, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MacroTotals, MealCategory};

    fn record(id: &str, created_at: &str) -> RecommendedMealRecord {
        RecommendedMealRecord {
            id: id.to_string(),
            created_at: created_at.to_string(),
            date: "2024-06-15".to_string(),
            category: MealCategory::Lunch,
            meal_name: format!("Meal {id}"),
            tags: Vec::new(),
            why: String::new(),
            recipe: None,
            items: Vec::new(),
            totals: MacroTotals::default(),
        }
    }

    #[test]
    fn test_normalize_bare_array_is_history_only_blob() {
        let payload = serde_json::to_string(&vec![
            record("a", "2024-06-15T10:00:00Z"),
            record("b", "2024-06-15T12:00:00Z"),
        ])
        .unwrap();
        let state = normalize_stored_state(&payload);
        assert_eq!(state.history.len(), 2);
        // Most recent first, and legacy records count as committed.
        assert_eq!(state.history[0].id, "b");
        assert!(state.committed_ids.contains(&"a".to_string()));
        assert!(state.committed_ids.contains(&"b".to_string()));
    }

    #[test]
    fn test_normalize_object_without_committed_ids_seeds_from_history() {
        let payload = serde_json::json!({
            "version": 1,
            "history": [record("a", "2024-06-15T10:00:00Z")],
        })
        .to_string();
        let state = normalize_stored_state(&payload);
        assert_eq!(state.committed_ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_normalize_respects_explicit_committed_ids() {
        let payload = serde_json::json!({
            "version": 1,
            "history": [record("a", "2024-06-15T10:00:00Z")],
            "committedIds": [],
        })
        .to_string();
        let state = normalize_stored_state(&payload);
        assert!(state.committed_ids.is_empty());
    }

    #[test]
    fn test_normalize_garbage_returns_default() {
        assert!(normalize_stored_state("not json").history.is_empty());
        assert!(normalize_stored_state("42").history.is_empty());
        assert!(normalize_stored_state("\"str\"").history.is_empty());
    }

    #[test]
    fn test_normalize_skips_malformed_history_entries() {
        let payload = serde_json::json!({
            "history": [record("a", "2024-06-15T10:00:00Z"), {"bogus": true}],
        })
        .to_string();
        let state = normalize_stored_state(&payload);
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn test_save_filters_uncommitted_history() {
        let db = Database::open_in_memory().unwrap();
        let state = StoredState {
            history: vec![
                record("keep", "2024-06-15T12:00:00Z"),
                record("drop", "2024-06-15T10:00:00Z"),
            ],
            committed_ids: vec!["keep".to_string()],
            ..StoredState::default()
        };
        save(&db, "u1", &state).unwrap();
        let loaded = load(&db, "u1");
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.history[0].id, "keep");
    }

    #[test]
    fn test_save_caps_history_and_committed_ids() {
        let db = Database::open_in_memory().unwrap();
        let mut history = Vec::new();
        let mut ids = Vec::new();
        for i in 0..40 {
            let id = format!("rec-{i:02}");
            history.push(record(&id, &format!("2024-06-15T{:02}:{:02}:00Z", i / 60, i % 60)));
            ids.push(id);
        }
        ids.reverse(); // most recent first
        let state = StoredState {
            history,
            committed_ids: ids,
            ..StoredState::default()
        };
        save(&db, "u1", &state).unwrap();
        let loaded = load(&db, "u1");
        assert_eq!(loaded.history.len(), HISTORY_LIMIT);
        assert_eq!(loaded.committed_ids.len(), HISTORY_LIMIT);
        // Every surviving record is still authorized.
        for r in &loaded.history {
            assert!(loaded.committed_ids.contains(&r.id));
        }
        // The newest record survived the cap.
        assert_eq!(loaded.history[0].id, "rec-39");
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let state = StoredState {
            history: vec![record("a", "2024-06-15T10:00:00Z")],
            committed_ids: vec!["a".to_string()],
            seen_explain_at: Some("2024-06-01T00:00:00Z".to_string()),
            last_generated: Some(LastGenerated {
                meal_name: "Draft meal".to_string(),
                items: Vec::new(),
                created_at: "2024-06-15T11:00:00Z".to_string(),
            }),
            ..StoredState::default()
        };
        save(&db, "u1", &state).unwrap();
        let loaded = load(&db, "u1");
        assert_eq!(loaded.history[0].id, "a");
        assert_eq!(loaded.seen_explain_at.as_deref(), Some("2024-06-01T00:00:00Z"));
        assert_eq!(loaded.last_generated.unwrap().meal_name, "Draft meal");
    }

    #[test]
    fn test_load_missing_user_returns_default() {
        let db = Database::open_in_memory().unwrap();
        let state = load(&db, "nobody");
        assert!(state.history.is_empty());
        assert!(state.seen_explain_at.is_none());
    }
}
