//! Domain DTOs served by the feed API.
//!
//! These mirror the mock server's JSON but are defined independently; the
//! end-to-end test catches drift between the two.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long after posting an author may still delete a post.
pub const DELETE_WINDOW_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub user: User,
    pub verified: bool,
}

/// Response of `GET /account` for a signed-in caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub connection: Connection,
}

impl Account {
    pub fn user(&self) -> &User {
        &self.connection.user
    }

    pub fn is_verified(&self) -> bool {
        self.connection.verified
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PostCounts {
    pub likes: u64,
    pub replies: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub author: User,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub counts: PostCounts,
    pub liked: bool,
}

impl Post {
    /// Flip `liked` and move the like count with it. Returns the new state.
    /// Unliking a post whose count is already zero leaves it at zero.
    pub fn toggle_like(&mut self) -> bool {
        self.liked = !self.liked;
        if self.liked {
            self.counts.likes += 1;
        } else {
            self.counts.likes = self.counts.likes.saturating_sub(1);
        }
        self.liked
    }

    /// Authors may delete their own post for a short while after posting.
    pub fn can_delete(&self, viewer: Option<&Account>, now: DateTime<Utc>) -> bool {
        let Some(viewer) = viewer else {
            return false;
        };
        viewer.user().id == self.author.id && self.created_at > now - TimeDelta::seconds(DELETE_WINDOW_SECS)
    }

    /// "Just now", "1 minute ago", "3 days ago", ...
    pub fn elapsed_label(&self, now: DateTime<Utc>) -> String {
        const UNITS: [(i64, &str); 6] = [
            (31_536_000, "year"),
            (2_592_000, "month"),
            (86_400, "day"),
            (3_600, "hour"),
            (60, "minute"),
            (1, "second"),
        ];

        let seconds = (now - self.created_at).num_seconds();
        UNITS
            .iter()
            .find_map(|&(unit, name)| {
                let count = seconds / unit;
                (count >= 1).then(|| format!("{count} {name}{} ago", if count > 1 { "s" } else { "" }))
            })
            .unwrap_or_else(|| "Just now".to_string())
    }
}
