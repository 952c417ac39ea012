use async_trait::async_trait;
use serde_json::Value;

use super::CacheKey;
use crate::error::ApiResult;
use crate::executor::{RequestDescriptor, RequestExecutor};

/// Loads the value behind a cache key.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> ApiResult<Value>;
}

/// `GET key.path`, notifying on failure when the key says so. Text bodies are
/// cached as JSON strings.
#[async_trait]
impl Fetcher for RequestExecutor {
    async fn fetch(&self, key: &CacheKey) -> ApiResult<Value> {
        let descriptor = RequestDescriptor::get(key.path()).notify(key.notify());
        Ok(self.execute(descriptor).await?.into_value())
    }
}
