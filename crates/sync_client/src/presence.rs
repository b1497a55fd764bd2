use std::collections::HashMap;

use shared::domain::UserId;

/// Transient per-user typing flags.
///
/// Entries are never persisted and carry no ordering guarantee relative to
/// messages. Each set returns a generation token; the expiry task armed for
/// that generation only clears the flag if no newer event has replaced it,
/// which is what lets a fresh typing event supersede the previous timer.
#[derive(Debug, Default)]
pub struct TypingTracker {
    entries: HashMap<UserId, u64>,
    next_generation: u64,
}

impl TypingTracker {
    /// Flag the user as typing. Returns the generation to arm expiry for.
    pub fn set_typing(&mut self, user_id: UserId) -> u64 {
        self.next_generation += 1;
        self.entries.insert(user_id, self.next_generation);
        self.next_generation
    }

    /// Explicit typing-false event. Returns true when a flag was present.
    pub fn clear(&mut self, user_id: &UserId) -> bool {
        self.entries.remove(user_id).is_some()
    }

    /// Expiry fired for `generation`. A newer event for the same user keeps
    /// the flag alive, so a stale timer is a no-op.
    pub fn expire(&mut self, user_id: &UserId, generation: u64) -> bool {
        match self.entries.get(user_id) {
            Some(current) if *current == generation => {
                self.entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_typing(&self, user_id: &UserId) -> bool {
        self.entries.contains_key(user_id)
    }

    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.entries.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
