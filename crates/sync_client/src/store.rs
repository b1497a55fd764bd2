use std::collections::HashSet;

use shared::{
    domain::{ConversationId, MessageId, NotificationId, UserId},
    protocol::{ConversationSummary, MessagePayload, NotificationPayload},
};

/// Text shown in place of a soft-deleted message body.
pub const DELETED_MESSAGE_PLACEHOLDER: &str = "[Message deleted]";

/// Ordered, deduplicated messages for the active conversation.
///
/// Display order is arrival order. Identity is the dedup key: a record whose
/// id is already present is discarded wholesale, because a duplicate arrival
/// (e.g. a `message_sent` confirmation followed by the broadcast copy) is
/// indistinguishable from new content except through the explicit edit and
/// delete frames.
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: Vec<MessagePayload>,
    seen: HashSet<MessageId>,
}

impl MessageStore {
    pub fn reset(&mut self, initial: Vec<MessagePayload>) {
        self.entries.clear();
        self.seen.clear();
        for message in initial {
            self.upsert(message);
        }
    }

    /// Insert-if-absent. Returns false when the id was already present.
    pub fn upsert(&mut self, message: MessagePayload) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.entries.push(message);
        true
    }

    /// Merge an edit into the existing record. Unknown ids are a no-op; the
    /// caller drops such stale edits silently.
    pub fn apply_edit(&mut self, update: &MessagePayload) -> Option<MessagePayload> {
        let existing = self.entries.iter_mut().find(|m| m.id == update.id)?;
        existing.text = update.text.clone();
        if !update.attachments.is_empty() {
            existing.attachments = update.attachments.clone();
        }
        existing.is_edited = true;
        existing.edited_at = update.edited_at;
        Some(existing.clone())
    }

    /// Soft-delete: the record stays, flagged, with its body replaced by the
    /// frame's text or the placeholder.
    pub fn apply_delete(&mut self, update: &MessagePayload) -> Option<MessagePayload> {
        let existing = self.entries.iter_mut().find(|m| m.id == update.id)?;
        existing.is_deleted = true;
        existing.deleted_at = update.deleted_at;
        existing.text = Some(match update.text.as_deref() {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => DELETED_MESSAGE_PLACEHOLDER.to_string(),
        });
        Some(existing.clone())
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<MessagePayload> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }
}

/// Conversation summaries kept sorted by recency.
#[derive(Debug, Default)]
pub struct ConversationIndex {
    entries: Vec<ConversationSummary>,
}

impl ConversationIndex {
    pub fn reset(&mut self, summaries: Vec<ConversationSummary>) {
        self.entries = summaries;
        self.resort();
    }

    /// Refresh the preview and last-activity timestamp for the message's
    /// conversation, inserting a summary if the conversation is new to the
    /// index, then restore the ordering.
    pub fn record_message(&mut self, message: &MessagePayload) {
        let preview = if message.is_deleted {
            DELETED_MESSAGE_PLACEHOLDER.to_string()
        } else {
            message.text.clone().unwrap_or_default()
        };
        match self
            .entries
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            Some(entry) => {
                entry.last_message = preview;
                entry.last_message_timestamp = Some(message.timestamp);
            }
            None => self.entries.push(ConversationSummary {
                id: message.conversation_id.clone(),
                participants: vec![message.sender_id.clone()],
                last_message: preview,
                last_message_timestamp: Some(message.timestamp),
                unread_counts: Default::default(),
            }),
        }
        self.resort();
    }

    pub fn reset_unread(&mut self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        match self.entries.iter_mut().find(|c| &c.id == conversation_id) {
            Some(entry) => {
                entry.unread_counts.insert(user_id.clone(), 0);
                true
            }
            None => false,
        }
    }

    fn resort(&mut self) {
        // Descending by last activity; never-messaged conversations sink to
        // the end. The sort is stable, so ties keep their arrival order.
        self.entries
            .sort_by(|a, b| b.last_message_timestamp.cmp(&a.last_message_timestamp));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ConversationSummary> {
        self.entries.clone()
    }
}

/// Notifications in newest-first order plus the unread counter.
///
/// Invariant: `unread` always equals the number of records with
/// `is_read == false`. Every mutation adjusts the counter in the same call.
#[derive(Debug, Default)]
pub struct NotificationStore {
    entries: Vec<NotificationPayload>,
    unread: u32,
}

impl NotificationStore {
    pub fn prepend(&mut self, notification: NotificationPayload) {
        if !notification.is_read {
            self.unread += 1;
        }
        self.entries.insert(0, notification);
    }

    /// Prepend a resync batch, preserving its order at the front.
    pub fn prepend_batch(&mut self, notifications: Vec<NotificationPayload>) -> usize {
        let count = notifications.len();
        self.unread += notifications.iter().filter(|n| !n.is_read).count() as u32;
        self.entries.splice(0..0, notifications);
        count
    }

    pub fn mark_read(&mut self, id: &NotificationId) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|n| &n.id == id) else {
            return false;
        };
        if !entry.is_read {
            entry.is_read = true;
            self.unread = self.unread.saturating_sub(1);
        }
        true
    }

    pub fn mark_all_read(&mut self) {
        for entry in &mut self.entries {
            entry.is_read = true;
        }
        self.unread = 0;
    }

    pub fn remove(&mut self, id: &NotificationId) -> bool {
        let Some(index) = self.entries.iter().position(|n| &n.id == id) else {
            return false;
        };
        let removed = self.entries.remove(index);
        if !removed.is_read {
            self.unread = self.unread.saturating_sub(1);
        }
        true
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<NotificationPayload> {
        self.entries.clone()
    }
}
