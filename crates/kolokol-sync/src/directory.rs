use std::collections::HashMap;

use chrono::{DateTime, Utc};

use kolokol_shared::{Chat, User, UserId};

/// Profiles and presence of the users this session has seen.
#[derive(Debug, Default)]
pub struct Directory {
    users: HashMap<UserId, User>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.users.contains_key(id)
    }

    pub fn upsert_all(&mut self, users: impl IntoIterator<Item = User>) {
        for user in users {
            self.users.insert(user.id.clone(), user);
        }
    }

    /// Apply a presence change. Unknown users are ignored until their
    /// profile has been fetched.
    pub fn apply_status(&mut self, id: &UserId, is_online: bool, last_seen: DateTime<Utc>) -> bool {
        match self.users.get_mut(id) {
            Some(user) => {
                user.is_online = is_online;
                if last_seen > user.last_seen {
                    user.last_seen = last_seen;
                }
                true
            }
            None => false,
        }
    }

    /// Participants of `chats` whose profile is not known yet.
    pub fn missing<'a>(&self, chats: impl IntoIterator<Item = &'a Chat>) -> Vec<UserId> {
        let mut missing: Vec<UserId> = chats
            .into_iter()
            .flat_map(|c| c.participants.iter())
            .filter(|id| !self.users.contains_key(*id))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    pub fn display_name(&self, chat: &Chat, me: &UserId) -> String {
        chat.display_name(me, |id| self.users.get(id).map(User::full_name))
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
