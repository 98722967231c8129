//! The in-memory transcript: the ordered conversation-item sequence the
//! orchestrator treats as authoritative conversation state.
//!
//! Items are only ever appended, except during compaction which replaces
//! the whole transcript with a single summary message.

use tether_domain::item::ConversationItem;

#[derive(Debug, Default)]
pub struct Transcript {
    items: Vec<ConversationItem>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one item. Assistant-message fragments sharing an id merge by
    /// text concatenation in arrival order; the later fragment's status
    /// wins.
    pub fn push(&mut self, item: ConversationItem) {
        if let ConversationItem::AssistantMessage { id, content, status } = &item {
            if let Some(last @ ConversationItem::AssistantMessage { .. }) = self.items.last_mut() {
                if last.id() == id {
                    let delta: String = content.iter().map(|p| p.text()).collect();
                    if let ConversationItem::AssistantMessage { status: last_status, .. } = last {
                        *last_status = *status;
                    }
                    last.append_text(&delta);
                    return;
                }
            }
        }
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = ConversationItem>) {
        for item in items {
            self.push(item);
        }
    }

    /// Compaction: replace everything with the given items.
    pub fn replace_all(&mut self, items: Vec<ConversationItem>) {
        self.items = items;
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn snapshot(&self) -> Vec<ConversationItem> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Character length of the serialized transcript (the basis of the
    /// four-characters-per-token approximation).
    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(&self.items).map(|s| s.len()).unwrap_or(0)
    }
}
