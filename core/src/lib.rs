//! Data-sync core for the social feed client.
//!
//! # Overview
//! Views read server state through a key-addressed [`QueryCache`] and write it
//! through the [`RequestExecutor`]. After a write, the caller invalidates the
//! keys the write affected and the cache refetches whatever is still observed.
//! Liking a post is the one optimistic write: the local copy flips at once and
//! the follow-up refetch settles the truth.
//!
//! # Design
//! - `HttpRequest`/`HttpResponse` are plain data. The executor builds and
//!   parses them; a [`Transport`] moves them. Tests swap the transport.
//! - Every call returns `Result<_, ApiError>`. Transport failures, non-2xx
//!   responses and client-side guards all normalize into the same error.
//! - Cache state lives behind one mutex that is never held across `.await`;
//!   background work runs on the Tokio runtime the cache was created on.
//! - DTOs are defined independently from the mock-server crate; the
//!   end-to-end test catches schema drift.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod feed;
pub mod form;
pub mod http;
pub mod keys;
pub mod like;
pub mod notify;
pub mod transport;
pub mod types;

pub use cache::{
    CacheConfig, CacheEntry, CacheKey, EnvironmentEvent, Fetcher, QueryCache, QueryObserver, QueryOptions,
    QueryStatus,
};
pub use config::{ClientConfig, ConfigError, Mode};
pub use error::{ApiError, ApiResult, ErrorKind, FieldErrors};
pub use executor::{RequestDescriptor, RequestExecutor, RequestOptions};
pub use feed::{FeedClient, SubmitError};
pub use form::{map_errors, ErrorSource, FieldError, FieldSpec, FormState};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Payload};
pub use notify::{ChannelNotifier, Notification, NotificationLevel, Notifier, TracingNotifier};
pub use transport::{Transport, TransportError, UreqTransport};
pub use types::{Account, Connection, Post, PostCounts, User};
