//! Optimistic like/unlike.
//!
//! Two independent transitions act on the same post. The optimistic one
//! happens synchronously when `toggle_like` is called: the caller's `Post`
//! flips and every cached copy of it is patched to match. The authoritative
//! one arrives later, when the request settles and the listing keys are
//! invalidated and refetched. Whatever the last successful fetch returns is
//! what stays; a failed request is never rolled back by hand.

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::QueryCache;
use crate::error::{ApiError, ApiResult};
use crate::executor::{RequestDescriptor, RequestExecutor};
use crate::http::HttpMethod;
use crate::keys;
use crate::notify::Notification;
use crate::types::{Account, Post};

pub const LIKE_REQUIRES_VERIFICATION: &str = "You must be authenticated and verified to like a post.";

/// Like or unlike `post` on behalf of `viewer`.
///
/// The local mutation is done by the time this returns. The request and the
/// follow-up invalidation run as a task on the cache's runtime, so they
/// happen even if the returned future is dropped; awaiting it yields the
/// request's outcome. An absent or unverified viewer gets an immediate `PRECONDITION_FAILED` with
/// nothing mutated and nothing sent.
pub fn toggle_like(
    executor: &RequestExecutor,
    cache: &QueryCache,
    post: &mut Post,
    viewer: Option<&Account>,
) -> BoxFuture<'static, ApiResult<()>> {
    if !viewer.is_some_and(Account::is_verified) {
        let err = ApiError::precondition_failed(LIKE_REQUIRES_VERIFICATION);
        executor.notifier().notify(Notification::error(err.message()));
        return future::ready(Err(err)).boxed();
    }

    let liked = post.toggle_like();
    let likes = post.counts.likes;
    let id = post.id;

    let mut listing = cache.apply_optimistic(|data| patch_post(data, id, liked, likes));
    let feed = keys::posts();
    if !listing.contains(&feed) {
        listing.push(feed);
    }

    let method = if liked { HttpMethod::Post } else { HttpMethod::Delete };
    let descriptor = RequestDescriptor::new(method, format!("/posts/{id}/likes"))
        .json(json!({}))
        .notify(true);
    let runtime = cache.runtime().clone();
    let executor = executor.clone();
    let cache = cache.clone();

    let task = runtime.spawn(async move {
        let result = executor.execute(descriptor).await;
        cache.invalidate(&listing);
        result.map(|_| ())
    });
    task.map(|joined| joined.unwrap_or_else(|err| Err(ApiError::internal(err.to_string()))))
        .boxed()
}

/// Set `liked`/`counts.likes` on the post with `id`, whether `data` is the
/// post itself or a list containing it.
fn patch_post(data: &mut Value, id: Uuid, liked: bool, likes: u64) -> bool {
    match data {
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |touched, item| patch_one(item, id, liked, likes) || touched),
        other => patch_one(other, id, liked, likes),
    }
}

fn patch_one(value: &mut Value, id: Uuid, liked: bool, likes: u64) -> bool {
    let Some(object) = value.as_object_mut() else {
        return false;
    };
    let matches = object
        .get("id")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<Uuid>().ok())
        == Some(id);
    if !matches {
        return false;
    }
    object.insert("liked".to_string(), Value::Bool(liked));
    if let Some(counts) = object.get_mut("counts").and_then(Value::as_object_mut) {
        counts.insert("likes".to_string(), Value::from(likes));
    }
    true
}
