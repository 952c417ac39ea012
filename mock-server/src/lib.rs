use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;
use uuid::Uuid;

/// Every account is verified with this code; no mail is ever sent.
pub const VERIFICATION_CODE: &str = "123456";

pub const SESSION_COOKIE: &str = "session";

const DELETE_WINDOW_SECS: i64 = 5 * 60;
const MAX_CONTENT: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub user: User,
    pub verified: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub connection: Connection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub likes: u64,
    pub replies: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author: User,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub counts: Counts,
    /// Whether the caller likes this post.
    pub liked: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Deserialize)]
pub struct Register {
    pub display_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct Login {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct Verify {
    pub code: String,
}

#[derive(Deserialize)]
pub struct NewPost {
    pub content: String,
}

struct UserRecord {
    user: User,
    email: String,
    password: String,
    verified: bool,
}

struct PostRecord {
    id: Uuid,
    author: Uuid,
    content: String,
    created_at: DateTime<Utc>,
    parent: Option<Uuid>,
}

#[derive(Default)]
pub struct Store {
    users: HashMap<Uuid, UserRecord>,
    sessions: HashMap<String, Uuid>,
    /// Oldest first.
    posts: Vec<PostRecord>,
    likes: HashSet<(Uuid, Uuid)>,
}

impl Store {
    fn user_by_name(&self, username: &str) -> Option<&UserRecord> {
        self.users.values().find(|record| record.user.username == username)
    }

    fn account(&self, id: Uuid) -> Option<Account> {
        self.users.get(&id).map(|record| Account {
            connection: Connection {
                user: record.user.clone(),
                verified: record.verified,
            },
        })
    }

    fn post(&self, id: Uuid) -> Option<&PostRecord> {
        self.posts.iter().find(|record| record.id == id)
    }

    fn view(&self, record: &PostRecord, viewer: Option<Uuid>) -> Option<Post> {
        let author = self.users.get(&record.author)?.user.clone();
        let likes = self.likes.iter().filter(|(post, _)| *post == record.id).count() as u64;
        let replies = self.posts.iter().filter(|reply| reply.parent == Some(record.id)).count() as u64;
        Some(Post {
            id: record.id,
            author,
            content: record.content.clone(),
            created_at: record.created_at,
            counts: Counts { likes, replies },
            liked: viewer.is_some_and(|viewer| self.likes.contains(&(record.id, viewer))),
        })
    }

    /// Newest first.
    fn list(&self, viewer: Option<Uuid>, keep: impl Fn(&PostRecord) -> bool) -> Vec<Post> {
        self.posts
            .iter()
            .rev()
            .filter(|record| keep(*record))
            .filter_map(|record| self.view(record, viewer))
            .collect()
    }

    fn remove_post(&mut self, id: Uuid) {
        let doomed: HashSet<Uuid> = self
            .posts
            .iter()
            .filter(|record| record.id == id || record.parent == Some(id))
            .map(|record| record.id)
            .collect();
        self.posts.retain(|record| !doomed.contains(&record.id));
        self.likes.retain(|(post, _)| !doomed.contains(post));
    }
}

pub type Db = Arc<RwLock<Store>>;

/// `{code, message, details}` with a status.
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
                details: None,
            },
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "You must be logged in")
    }

    fn forbidden(message: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    fn post_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Post not found")
    }

    fn invalid(fields: FieldErrors) -> Self {
        let fields: Vec<Value> = fields
            .0
            .into_iter()
            .map(|(name, errors)| json!({"name": name, "errors": errors}))
            .collect();
        let mut error = Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Invalid input");
        error.body.details = Some(json!({ "fields": fields }));
        error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Collects validation failures in field order.
#[derive(Default)]
struct FieldErrors(Vec<(&'static str, Vec<String>)>);

impl FieldErrors {
    fn add(&mut self, field: &'static str, message: impl Into<String>) {
        match self.0.iter_mut().find(|(name, _)| *name == field) {
            Some((_, errors)) => errors.push(message.into()),
            None => self.0.push((field, vec![message.into()])),
        }
    }

    fn check(self) -> Result<(), ApiError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ApiError::invalid(self))
        }
    }
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/account", get(account))
        .route("/account/logout", post(logout))
        .route("/account/verify", post(verify))
        .route("/account/resend", post(resend))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", get(get_post).delete(delete_post))
        .route("/posts/{id}/replies", get(list_replies).post(create_reply))
        .route("/posts/{id}/likes", post(like).delete(unlike))
        .route("/users", get(list_users))
        .route("/users/{username}", get(get_user))
        .route("/users/{username}/posts", get(list_user_posts))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| pair.trim().strip_prefix("session="))
}

fn viewer(store: &Store, headers: &HeaderMap) -> Option<Uuid> {
    session_token(headers).and_then(|token| store.sessions.get(token).copied())
}

fn require_viewer(store: &Store, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    viewer(store, headers).ok_or_else(ApiError::unauthorized)
}

fn require_verified(store: &Store, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let id = require_viewer(store, headers)?;
    match store.users.get(&id) {
        Some(record) if record.verified => Ok(id),
        _ => Err(ApiError::forbidden("You must verify your account first")),
    }
}

fn open_session(store: &mut Store, user: Uuid) -> String {
    let token = Uuid::new_v4().to_string();
    store.sessions.insert(token.clone(), user);
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly")
}

fn validate_content(content: &str) -> Result<(), ApiError> {
    let mut errors = FieldErrors::default();
    let length = content.trim().chars().count();
    if length == 0 {
        errors.add("content", "Content is required");
    } else if length > MAX_CONTENT {
        errors.add("content", format!("Content must be at most {MAX_CONTENT} characters"));
    }
    errors.check()
}

async fn health() -> &'static str {
    "ok"
}

async fn register(
    State(db): State<Db>,
    Json(input): Json<Register>,
) -> Result<impl IntoResponse, ApiError> {
    let mut store = db.write().await;

    let mut errors = FieldErrors::default();
    if input.display_name.trim().is_empty() {
        errors.add("display_name", "Display name is required");
    }
    if input.username.trim().len() < 3 {
        errors.add("username", "Username must be at least 3 characters");
    }
    if store.user_by_name(&input.username).is_some() {
        errors.add("username", "Username is already taken");
    }
    if !input.email.contains('@') {
        errors.add("email", "Email is invalid");
    }
    if store.users.values().any(|record| record.email == input.email) {
        errors.add("email", "Email is already in use");
    }
    if input.password.chars().count() < 8 {
        errors.add("password", "Password must be at least 8 characters");
    }
    errors.check()?;

    let user = User {
        id: Uuid::new_v4(),
        username: input.username,
        display_name: input.display_name,
    };
    let id = user.id;
    info!(username = %user.username, "user registered");
    store.users.insert(
        id,
        UserRecord {
            user,
            email: input.email,
            password: input.password,
            verified: false,
        },
    );
    let cookie = open_session(&mut store, id);
    let account = store.account(id).ok_or_else(ApiError::unauthorized)?;
    Ok((StatusCode::CREATED, [(header::SET_COOKIE, cookie)], Json(account)))
}

async fn login(
    State(db): State<Db>,
    Json(input): Json<Login>,
) -> Result<impl IntoResponse, ApiError> {
    let mut store = db.write().await;
    let id = store
        .users
        .values()
        .find(|record| record.email == input.email && record.password == input.password)
        .map(|record| record.user.id)
        .ok_or_else(|| {
            let mut errors = FieldErrors::default();
            errors.add("email", "Invalid email or password");
            ApiError::invalid(errors)
        })?;
    let cookie = open_session(&mut store, id);
    let account = store.account(id).ok_or_else(ApiError::unauthorized)?;
    Ok(([(header::SET_COOKIE, cookie)], Json(account)))
}

async fn account(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Account>, ApiError> {
    let store = db.read().await;
    let id = require_viewer(&store, &headers)?;
    store.account(id).map(Json).ok_or_else(ApiError::unauthorized)
}

async fn logout(State(db): State<Db>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let mut store = db.write().await;
    require_viewer(&store, &headers)?;
    if let Some(token) = session_token(&headers) {
        store.sessions.remove(token);
    }
    let cookie = format!("{SESSION_COOKIE}=; Path=/; Max-Age=0");
    Ok(([(header::SET_COOKIE, cookie)], Json(json!({}))))
}

async fn verify(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<Verify>,
) -> Result<Json<Account>, ApiError> {
    let mut store = db.write().await;
    let id = require_viewer(&store, &headers)?;
    if input.code != VERIFICATION_CODE {
        let mut errors = FieldErrors::default();
        errors.add("code", "Invalid verification code");
        return Err(ApiError::invalid(errors));
    }
    if let Some(record) = store.users.get_mut(&id) {
        record.verified = true;
    }
    store.account(id).map(Json).ok_or_else(ApiError::unauthorized)
}

async fn resend(State(db): State<Db>, headers: HeaderMap) -> Result<&'static str, ApiError> {
    let store = db.read().await;
    require_viewer(&store, &headers)?;
    Ok("Verification code sent")
}

async fn list_posts(State(db): State<Db>, headers: HeaderMap) -> Json<Vec<Post>> {
    let store = db.read().await;
    let viewer = viewer(&store, &headers);
    Json(store.list(viewer, |record| record.parent.is_none()))
}

async fn insert_post(
    db: &Db,
    headers: &HeaderMap,
    content: String,
    parent: Option<Uuid>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let mut store = db.write().await;
    let author = require_verified(&store, headers)?;
    if let Some(parent) = parent {
        store.post(parent).ok_or_else(ApiError::post_not_found)?;
    }
    validate_content(&content)?;

    let record = PostRecord {
        id: Uuid::new_v4(),
        author,
        content,
        created_at: Utc::now(),
        parent,
    };
    let view = store.view(&record, Some(author)).ok_or_else(ApiError::unauthorized)?;
    store.posts.push(record);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn create_post(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<NewPost>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    insert_post(&db, &headers, input.content, None).await
}

async fn get_post(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Post>, ApiError> {
    let store = db.read().await;
    let viewer = viewer(&store, &headers);
    store
        .post(id)
        .and_then(|record| store.view(record, viewer))
        .map(Json)
        .ok_or_else(ApiError::post_not_found)
}

async fn delete_post(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let viewer = require_viewer(&store, &headers)?;
    let record = store.post(id).ok_or_else(ApiError::post_not_found)?;
    if record.author != viewer {
        return Err(ApiError::forbidden("You can only delete your own posts"));
    }
    if record.created_at <= Utc::now() - TimeDelta::seconds(DELETE_WINDOW_SECS) {
        return Err(ApiError::forbidden("Posts can only be deleted within five minutes"));
    }
    store.remove_post(id);
    Ok(Json(json!({})))
}

async fn list_replies(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Post>>, ApiError> {
    let store = db.read().await;
    store.post(id).ok_or_else(ApiError::post_not_found)?;
    let viewer = viewer(&store, &headers);
    Ok(Json(store.list(viewer, |record| record.parent == Some(id))))
}

async fn create_reply(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(input): Json<NewPost>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    insert_post(&db, &headers, input.content, Some(id)).await
}

async fn set_like(db: &Db, headers: &HeaderMap, id: Uuid, liked: bool) -> Result<Json<Post>, ApiError> {
    let mut store = db.write().await;
    let viewer = require_verified(&store, headers)?;
    store.post(id).ok_or_else(ApiError::post_not_found)?;
    if liked {
        store.likes.insert((id, viewer));
    } else {
        store.likes.remove(&(id, viewer));
    }
    store
        .post(id)
        .and_then(|record| store.view(record, Some(viewer)))
        .map(Json)
        .ok_or_else(ApiError::post_not_found)
}

async fn like(State(db): State<Db>, headers: HeaderMap, Path(id): Path<Uuid>) -> Result<Json<Post>, ApiError> {
    set_like(&db, &headers, id, true).await
}

async fn unlike(State(db): State<Db>, headers: HeaderMap, Path(id): Path<Uuid>) -> Result<Json<Post>, ApiError> {
    set_like(&db, &headers, id, false).await
}

async fn list_users(State(db): State<Db>) -> Json<Vec<User>> {
    let store = db.read().await;
    let mut users: Vec<User> = store.users.values().map(|record| record.user.clone()).collect();
    users.sort_by(|a, b| a.username.cmp(&b.username));
    Json(users)
}

async fn get_user(State(db): State<Db>, Path(username): Path<String>) -> Result<Json<User>, ApiError> {
    let store = db.read().await;
    store
        .user_by_name(&username)
        .map(|record| Json(record.user.clone()))
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "User not found"))
}

async fn list_user_posts(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Result<Json<Vec<Post>>, ApiError> {
    let store = db.read().await;
    let author = store
        .user_by_name(&username)
        .map(|record| record.user.id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "User not found"))?;
    let viewer = viewer(&store, &headers);
    Ok(Json(store.list(viewer, |record| record.author == author && record.parent.is_none())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, cookie.parse().unwrap());
        headers
    }

    #[test]
    fn session_token_found_among_other_cookies() {
        let headers = headers_with_cookie("theme=dark; session=abc; lang=en");
        assert_eq!(session_token(&headers), Some("abc"));
    }

    #[test]
    fn session_token_absent() {
        assert_eq!(session_token(&HeaderMap::new()), None);
        assert_eq!(session_token(&headers_with_cookie("theme=dark")), None);
    }

    #[test]
    fn field_errors_group_by_field() {
        let mut errors = FieldErrors::default();
        errors.add("email", "Required");
        errors.add("password", "Too short");
        errors.add("email", "Invalid");
        let err = errors.check().err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            err.body.details,
            Some(json!({"fields": [
                {"name": "email", "errors": ["Required", "Invalid"]},
                {"name": "password", "errors": ["Too short"]},
            ]}))
        );
    }

    #[test]
    fn empty_field_errors_pass() {
        assert!(FieldErrors::default().check().is_ok());
    }

    #[test]
    fn content_length_is_checked_after_trim() {
        assert!(validate_content("   ").is_err());
        assert!(validate_content("hello").is_ok());
        assert!(validate_content(&"x".repeat(MAX_CONTENT)).is_ok());
        assert!(validate_content(&"x".repeat(MAX_CONTENT + 1)).is_err());
    }

    #[test]
    fn deleting_a_post_takes_its_replies_and_likes() {
        let mut store = Store::default();
        let author = Uuid::new_v4();
        let parent = Uuid::new_v4();
        let reply = Uuid::new_v4();
        for (id, parent_id) in [(parent, None), (reply, Some(parent))] {
            store.posts.push(PostRecord {
                id,
                author,
                content: "x".into(),
                created_at: Utc::now(),
                parent: parent_id,
            });
        }
        store.likes.insert((parent, author));
        store.likes.insert((reply, author));

        store.remove_post(parent);
        assert!(store.posts.is_empty());
        assert!(store.likes.is_empty());
    }

    #[test]
    fn error_body_serializes_null_details() {
        let body = ApiError::post_not_found().body;
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, json!({"code": "NOT_FOUND", "message": "Post not found", "details": null}));
    }
}
