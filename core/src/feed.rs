//! The feed client: the reads and actions views call.
//!
//! Every action follows the same shape. Send the request with error
//! notifications on, then on success invalidate whatever it changed, and on
//! failure hand field errors to the form that triggered it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::json;
use uuid::Uuid;

use crate::cache::{CacheConfig, QueryCache, QueryObserver, QueryOptions};
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::executor::{RequestDescriptor, RequestExecutor};
use crate::form::{map_errors, FormState};
use crate::http::Payload;
use crate::keys;
use crate::like;
use crate::notify::{Notification, Notifier};
use crate::transport::UreqTransport;
use crate::types::{Account, Post};

/// Replies on a post page are polled at this rate while it is open.
pub const REPLIES_REFRESH: Duration = Duration::from_secs(5);

pub const DELETE_NOT_ALLOWED: &str = "Only the author can delete a post, within five minutes of posting.";

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Client-side rules rejected the form; nothing was sent.
    #[error("form has validation errors")]
    Invalid,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Clone)]
pub struct FeedClient {
    executor: RequestExecutor,
    cache: QueryCache,
}

impl FeedClient {
    pub fn new(executor: RequestExecutor, cache: QueryCache) -> Self {
        Self { executor, cache }
    }

    /// Wire a client against `config.api_url` over HTTP with a cookie jar.
    /// Must be called inside a Tokio runtime.
    pub fn connect(config: &ClientConfig, notifier: Arc<dyn Notifier>) -> Self {
        let executor = RequestExecutor::new(&config.api_url, Arc::new(UreqTransport::new()), notifier);
        let cache = QueryCache::new(Arc::new(executor.clone()), CacheConfig::for_mode(config.mode));
        Self::new(executor, cache)
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn account(&self) -> QueryObserver {
        self.cache.ensure(keys::account(), QueryOptions::default())
    }

    pub fn feed(&self) -> QueryObserver {
        self.cache.ensure(keys::posts(), QueryOptions::default())
    }

    pub fn post(&self, id: Uuid) -> QueryObserver {
        self.cache.ensure(keys::post(id), QueryOptions::default())
    }

    pub fn replies(&self, id: Uuid) -> QueryObserver {
        self.cache
            .ensure(keys::replies(id), QueryOptions::default().refetch_every(REPLIES_REFRESH))
    }

    pub fn users(&self) -> QueryObserver {
        self.cache.ensure(keys::users(), QueryOptions::default())
    }

    pub fn user(&self, username: &str) -> QueryObserver {
        self.cache.ensure(keys::user(username), QueryOptions::default())
    }

    pub fn user_posts(&self, username: &str) -> QueryObserver {
        self.cache.ensure(keys::user_posts(username), QueryOptions::default())
    }

    /// Publish the composer's content as a post, or as a reply to `reply_to`.
    /// The composer is cleared on success.
    pub async fn submit_post(&self, form: &mut FormState, reply_to: Option<Uuid>) -> Result<(), SubmitError> {
        let path = match reply_to {
            Some(parent) => format!("/posts/{parent}/replies"),
            None => "/posts".to_string(),
        };
        self.submit(form, &path).await?;
        form.reset();

        match reply_to {
            Some(parent) => self.cache.invalidate(&[keys::replies(parent), keys::post(parent)]),
            None => self.cache.invalidate(&[keys::posts()]),
        }
        Ok(())
    }

    pub async fn login(&self, form: &mut FormState) -> Result<(), SubmitError> {
        self.submit(form, "/auth/login").await?;
        self.signed_in("Successfully logged in");
        Ok(())
    }

    pub async fn register(&self, form: &mut FormState) -> Result<(), SubmitError> {
        self.submit(form, "/auth/register").await?;
        self.signed_in("Successfully registered");
        Ok(())
    }

    pub async fn verify_account(&self, form: &mut FormState) -> Result<(), SubmitError> {
        self.submit(form, "/account/verify").await?;
        self.signed_in("Account verified successfully.");
        Ok(())
    }

    pub async fn logout(&self) -> ApiResult<()> {
        self.executor
            .execute(RequestDescriptor::post("/account/logout").json(json!({})).notify(true))
            .await?;
        self.signed_in("Successfully logged out");
        Ok(())
    }

    pub async fn resend_verification(&self) -> ApiResult<()> {
        self.executor
            .execute(RequestDescriptor::post("/account/resend").notify(true))
            .await?;
        self.executor
            .notifier()
            .notify(Notification::success("A new verification code has been sent to your email."));
        Ok(())
    }

    /// Delete one of the viewer's own recent posts and refresh post listings.
    pub async fn delete_post(&self, post: &Post, viewer: Option<&Account>, now: DateTime<Utc>) -> ApiResult<()> {
        if !post.can_delete(viewer, now) {
            return Err(ApiError::precondition_failed(DELETE_NOT_ALLOWED));
        }
        self.executor
            .execute(
                RequestDescriptor::delete(format!("/posts/{}", post.id))
                    .json(json!({}))
                    .notify(true),
            )
            .await?;
        self.cache.invalidate_where(keys::lists_posts);
        Ok(())
    }

    /// See [`like::toggle_like`].
    pub fn toggle_like(&self, post: &mut Post, viewer: Option<&Account>) -> BoxFuture<'static, ApiResult<()>> {
        like::toggle_like(&self.executor, &self.cache, post, viewer)
    }

    /// Validate, send, and route failures into `form`. Errors from a previous
    /// attempt are cleared once the server accepts the form.
    async fn submit(&self, form: &mut FormState, path: &str) -> Result<Payload, SubmitError> {
        if !form.validate() {
            return Err(SubmitError::Invalid);
        }
        let descriptor = RequestDescriptor::post(path).json(form.values()).notify(true);
        match self.executor.execute(descriptor).await {
            Ok(payload) => {
                form.clear_errors();
                Ok(payload)
            }
            Err(err) => {
                map_errors(form, &err);
                Err(SubmitError::Api(err))
            }
        }
    }

    /// The session changed; everything cached may now be wrong.
    fn signed_in(&self, message: &str) {
        self.executor.notifier().notify(Notification::success(message));
        self.cache.invalidate_all();
    }
}
