//! Per-session todo storage.
//!
//! Items live in `<todos-dir>/<session-id>.json` as a pretty-printed JSON
//! array. Status is a free-form string; the conventional lifecycle is
//! PENDING → IN_PROGRESS → COMPLETED (or CANCELLED).

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use tether_domain::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TodoItem {
    pub id: String,
    pub short_task_description: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct TodoStore {
    path: PathBuf,
}

impl TodoStore {
    pub fn new(dir: &Path, session_id: &str) -> Self {
        Self {
            path: dir.join(format!("{session_id}.json")),
        }
    }

    /// Create a new todo with status `PENDING` and a sequential id.
    pub fn add(&self, description: &str) -> Result<TodoItem> {
        let mut items = self.load()?;
        let next = items
            .iter()
            .filter_map(|t| t.id.strip_prefix("todo-")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now().to_rfc3339();
        let item = TodoItem {
            id: format!("todo-{next}"),
            short_task_description: description.to_string(),
            status: "PENDING".into(),
            created_at: now.clone(),
            updated_at: now,
        };
        items.push(item.clone());
        self.save(&items)?;
        Ok(item)
    }

    /// Move a todo to a new status. Errors when the id is unknown.
    pub fn update(&self, todo_id: &str, new_status: &str) -> Result<TodoItem> {
        let mut items = self.load()?;
        let item = items
            .iter_mut()
            .find(|t| t.id == todo_id)
            .ok_or_else(|| Error::Other(format!("todo not found: {todo_id}")))?;
        item.status = new_status.to_string();
        item.updated_at = Utc::now().to_rfc3339();
        let updated = item.clone();
        self.save(&items)?;
        Ok(updated)
    }

    pub fn list(&self) -> Result<Vec<TodoItem>> {
        self.load()
    }

    /// Formatted enumeration followed by the raw JSON dump.
    pub fn render(&self) -> Result<String> {
        let items = self.load()?;
        if items.is_empty() {
            return Ok("No todos.".into());
        }
        let mut out = String::from("Todos:\n");
        for (i, item) in items.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{}] {} ({})\n",
                i + 1,
                item.status,
                item.short_task_description,
                item.id
            ));
        }
        out.push('\n');
        out.push_str(&serde_json::to_string_pretty(&items)?);
        Ok(out)
    }

    fn load(&self) -> Result<Vec<TodoItem>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, items: &[TodoItem]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(items)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, TodoStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TodoStore::new(dir.path(), "cafe0123");
        (dir, store)
    }

    #[test]
    fn add_assigns_sequential_ids_and_pending_status() {
        let (_dir, store) = store();
        let first = store.add("write tests").unwrap();
        let second = store.add("run tests").unwrap();
        assert_eq!(first.id, "todo-1");
        assert_eq!(second.id, "todo-2");
        assert_eq!(first.status, "PENDING");
    }

    #[test]
    fn update_transitions_and_stamps() {
        let (_dir, store) = store();
        let item = store.add("task").unwrap();
        let updated = store.update(&item.id, "IN_PROGRESS").unwrap();
        assert_eq!(updated.status, "IN_PROGRESS");

        let listed = store.list().unwrap();
        assert_eq!(listed[0].status, "IN_PROGRESS");
    }

    #[test]
    fn update_unknown_id_errors() {
        let (_dir, store) = store();
        let err = store.update("todo-99", "COMPLETED").unwrap_err();
        assert!(err.to_string().contains("todo-99"));
    }

    #[test]
    fn render_lists_then_dumps_json() {
        let (_dir, store) = store();
        store.add("first").unwrap();
        store.add("second").unwrap();
        let rendered = store.render().unwrap();
        assert!(rendered.contains("1. [PENDING] first (todo-1)"));
        assert!(rendered.contains("2. [PENDING] second (todo-2)"));
        // Raw dump parses back.
        let json_part = rendered.split("\n\n").last().unwrap();
        let parsed: Vec<TodoItem> = serde_json::from_str(json_part).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn render_empty_store() {
        let (_dir, store) = store();
        assert_eq!(store.render().unwrap(), "No todos.");
    }

    #[test]
    fn ids_keep_counting_after_deletion_style_updates() {
        let (_dir, store) = store();
        store.add("a").unwrap();
        store.add("b").unwrap();
        store.update("todo-1", "CANCELLED").unwrap();
        let third = store.add("c").unwrap();
        assert_eq!(third.id, "todo-3");
    }
}
