//! Cache keys for the feed API's resources.

use uuid::Uuid;

use crate::cache::CacheKey;

pub fn account() -> CacheKey {
    CacheKey::new("/account")
}

pub fn posts() -> CacheKey {
    CacheKey::new("/posts")
}

pub fn post(id: Uuid) -> CacheKey {
    CacheKey::new(format!("/posts/{id}"))
}

pub fn replies(id: Uuid) -> CacheKey {
    CacheKey::new(format!("/posts/{id}/replies"))
}

pub fn users() -> CacheKey {
    CacheKey::new("/users")
}

/// Profile pages report load failures, so their keys notify.
pub fn user(username: &str) -> CacheKey {
    CacheKey::notifying(format!("/users/{username}"))
}

pub fn user_posts(username: &str) -> CacheKey {
    CacheKey::notifying(format!("/users/{username}/posts"))
}

/// Whether `key` addresses a list or a single post.
pub fn lists_posts(key: &CacheKey) -> bool {
    let path = key.path();
    path.starts_with("/posts") || (path.starts_with("/users/") && path.ends_with("/posts"))
}
