use chrono::{DateTime, Utc};

use kolokol_shared::{User, UserId};

/// The logged-in user. Created on login, dropped on logout.
#[derive(Debug, Clone)]
pub struct Session {
    user: User,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user: User) -> Self {
        Self {
            user,
            started_at: Utc::now(),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
