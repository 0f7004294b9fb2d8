use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Token accepted by every authenticated route from startup.
pub const ROOT_TOKEN: &str = "mock_token";
/// Userpass credentials accepted by `/v1/auth/{mount}/login/{username}`.
pub const USERNAME: &str = "testuser";
pub const PASSWORD: &str = "testpass";

const TOKEN_HEADER: &str = "x-vault-token";
const WRAP_TTL_HEADER: &str = "x-vault-wrap-ttl";

#[derive(Clone, Debug, PartialEq)]
pub struct TokenEntry {
    pub accessor: String,
    pub policies: Vec<String>,
    pub meta: Map<String, Value>,
    pub ttl: u64,
    pub renewable: bool,
    pub display_name: String,
}

impl TokenEntry {
    fn issue(policies: Vec<String>, meta: Map<String, Value>, display_name: &str) -> (String, Self) {
        let entry = Self {
            accessor: Uuid::new_v4().to_string(),
            policies,
            meta,
            ttl: 3600,
            renewable: true,
            display_name: display_name.to_string(),
        };
        (Uuid::new_v4().to_string(), entry)
    }

    fn auth(&self, token: &str) -> Value {
        json!({
            "auth": {
                "client_token": token,
                "accessor": self.accessor,
                "policies": self.policies,
                "metadata": self.meta,
                "lease_duration": self.ttl,
                "renewable": self.renewable,
            }
        })
    }
}

/// `?list=true` on secret reads.
#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    list: bool,
}

#[derive(Clone, Debug)]
struct Wrapped {
    data: Value,
    ttl: u64,
    creation_time: String,
}

/// Misbehaviour injected in front of every route.
#[derive(Clone, Debug, Default)]
pub struct MockOptions {
    /// Answer this many requests with a plain-text 500 before serving normally.
    pub failures_before_success: u32,
    /// Hold every request this long before answering.
    pub delay: Option<Duration>,
}

pub struct MockState {
    tokens: RwLock<HashMap<String, TokenEntry>>,
    secrets: RwLock<BTreeMap<String, Value>>,
    wrapped: RwLock<HashMap<String, Wrapped>>,
    failures_left: AtomicU32,
    delay: Option<Duration>,
}

pub type Db = Arc<MockState>;

impl MockState {
    fn new(options: &MockOptions) -> Self {
        let root = TokenEntry {
            accessor: Uuid::new_v4().to_string(),
            policies: vec!["root".to_string()],
            meta: Map::new(),
            ttl: 0,
            renewable: false,
            display_name: "root".to_string(),
        };
        Self {
            tokens: RwLock::new(HashMap::from([(ROOT_TOKEN.to_string(), root)])),
            secrets: RwLock::new(BTreeMap::new()),
            wrapped: RwLock::new(HashMap::new()),
            failures_left: AtomicU32::new(options.failures_before_success),
            delay: options.delay,
        }
    }
}

pub fn app() -> Router {
    app_with(MockOptions::default())
}

pub fn app_with(options: MockOptions) -> Router {
    let db: Db = Arc::new(MockState::new(&options));
    Router::new()
        .route("/v1/auth/{mount}/login", post(login))
        .route("/v1/auth/{mount}/login/{username}", post(login_userpass))
        .route("/v1/auth/{mount}/create", post(create_token))
        .route("/v1/auth/{mount}/create/{role}", post(create_token_for_role))
        .route("/v1/auth/{mount}/lookup-self", get(lookup_self))
        .route("/v1/auth/{mount}/renew-self", post(renew_self))
        .route("/v1/auth/{mount}/revoke-self", post(revoke_self))
        .route("/v1/sys/wrapping/wrap", post(wrap))
        .route("/v1/sys/wrapping/unwrap", post(unwrap))
        .route("/v1/sys/wrapping/lookup", get(lookup_wrap))
        .route(
            "/v1/secret/{*path}",
            get(read_secret).post(write_secret).put(write_secret).delete(delete_secret),
        )
        .layer(middleware::from_fn_with_state(db.clone(), misbehave))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, options: MockOptions) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(options)).await
}

async fn misbehave(State(db): State<Db>, request: Request, next: Next) -> Response {
    if let Some(delay) = db.delay {
        tokio::time::sleep(delay).await;
    }
    let failing = db
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok();
    if failing {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            "mock failure",
        )
            .into_response();
    }
    next.run(request).await
}

fn errors(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "errors": [message] }))).into_response()
}

/// Clients are not required to label JSON bodies, so parse whatever arrived.
fn json_body(body: &Bytes) -> Map<String, Value> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(object)) => object,
        _ => Map::new(),
    }
}

fn string_field(body: &Map<String, Value>, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

async fn caller(db: &Db, headers: &HeaderMap) -> Result<(String, TokenEntry), Response> {
    let token = header_value(headers, TOKEN_HEADER).ok_or_else(|| errors(StatusCode::FORBIDDEN, "missing client token"))?;
    let tokens = db.tokens.read().await;
    match tokens.get(&token) {
        Some(entry) => Ok((token, entry.clone())),
        None => Err(errors(StatusCode::FORBIDDEN, "permission denied")),
    }
}

// --- auth ---

async fn login(State(db): State<Db>, Path(mount): Path<String>, body: Bytes) -> Response {
    let body = json_body(&body);
    let mut meta = Map::new();
    if let Some(app_id) = string_field(&body, "app_id") {
        meta.insert("app-id".into(), app_id.into());
    }
    if let Some(user_id) = string_field(&body, "user_id") {
        meta.insert("user-id".into(), user_id.into());
    }
    if let Some(nonce) = string_field(&body, "nonce") {
        meta.insert("nonce".into(), nonce.into());
    }
    if let Some(role) = string_field(&body, "role").or_else(|| string_field(&body, "role_id")) {
        meta.insert("role".into(), role.into());
    }

    let (token, entry) = TokenEntry::issue(vec!["default".to_string()], meta, &mount);
    let response = entry.auth(&token);
    db.tokens.write().await.insert(token, entry);
    Json(response).into_response()
}

async fn login_userpass(
    State(db): State<Db>,
    Path((mount, username)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let body = json_body(&body);
    if username != USERNAME || string_field(&body, "password").as_deref() != Some(PASSWORD) {
        return errors(StatusCode::BAD_REQUEST, "invalid username or password");
    }
    let mut meta = Map::new();
    meta.insert("username".into(), username.into());
    let (token, entry) = TokenEntry::issue(vec!["default".to_string()], meta, &mount);
    let response = entry.auth(&token);
    db.tokens.write().await.insert(token, entry);
    Json(response).into_response()
}

async fn create_token(State(db): State<Db>, headers: HeaderMap, body: Bytes) -> Response {
    issue_child(db, headers, body, None).await
}

async fn create_token_for_role(
    State(db): State<Db>,
    Path((_mount, role)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    issue_child(db, headers, body, Some(role)).await
}

async fn issue_child(db: Db, headers: HeaderMap, body: Bytes, role: Option<String>) -> Response {
    if let Err(denied) = caller(&db, &headers).await {
        return denied;
    }
    let body = json_body(&body);
    let mut policies: Vec<String> = body
        .get("policies")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();
    if policies.is_empty() {
        policies.push("default".to_string());
    }
    let mut meta = body.get("meta").and_then(Value::as_object).cloned().unwrap_or_default();
    if let Some(role) = role {
        meta.insert("role".into(), role.into());
    }
    let display_name = string_field(&body, "display_name").unwrap_or_else(|| "token".to_string());

    let (token, mut entry) = TokenEntry::issue(policies, meta, &display_name);
    if let Some(renewable) = body.get("renewable").and_then(Value::as_bool) {
        entry.renewable = renewable;
    }
    let token = body
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or(token);
    let response = entry.auth(&token);
    db.tokens.write().await.insert(token, entry);
    Json(response).into_response()
}

async fn lookup_self(State(db): State<Db>, headers: HeaderMap) -> Response {
    let (token, entry) = match caller(&db, &headers).await {
        Ok(found) => found,
        Err(denied) => return denied,
    };
    Json(json!({
        "data": {
            "id": token,
            "accessor": entry.accessor,
            "policies": entry.policies,
            "meta": entry.meta,
            "ttl": entry.ttl,
            "creation_ttl": entry.ttl,
            "renewable": entry.renewable,
            "display_name": entry.display_name,
            "num_uses": 0,
            "orphan": false,
            "path": "auth/token/create",
            "type": "service",
        }
    }))
    .into_response()
}

async fn renew_self(State(db): State<Db>, headers: HeaderMap, body: Bytes) -> Response {
    let (token, _) = match caller(&db, &headers).await {
        Ok(found) => found,
        Err(denied) => return denied,
    };
    let increment = json_body(&body).get("increment").and_then(Value::as_u64);
    let mut tokens = db.tokens.write().await;
    let Some(entry) = tokens.get_mut(&token) else {
        return errors(StatusCode::FORBIDDEN, "permission denied");
    };
    if !entry.renewable {
        return errors(StatusCode::BAD_REQUEST, "lease is not renewable");
    }
    entry.ttl = increment.unwrap_or(3600);
    Json(entry.auth(&token)).into_response()
}

async fn revoke_self(State(db): State<Db>, headers: HeaderMap) -> Response {
    let (token, _) = match caller(&db, &headers).await {
        Ok(found) => found,
        Err(denied) => return denied,
    };
    db.tokens.write().await.remove(&token);
    StatusCode::NO_CONTENT.into_response()
}

// --- response wrapping ---

async fn wrap(State(db): State<Db>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(denied) = caller(&db, &headers).await {
        return denied;
    }
    let ttl = header_value(&headers, WRAP_TTL_HEADER)
        .and_then(|value| value.parse().ok())
        .unwrap_or(300);
    let token = Uuid::new_v4().to_string();
    let creation_time = "2024-01-01T00:00:00Z".to_string();
    let wrapped = Wrapped {
        data: Value::Object(json_body(&body)),
        ttl,
        creation_time: creation_time.clone(),
    };
    db.wrapped.write().await.insert(token.clone(), wrapped);
    Json(json!({
        "wrap_info": {
            "token": token,
            "accessor": Uuid::new_v4().to_string(),
            "ttl": ttl,
            "creation_time": creation_time,
            "creation_path": "sys/wrapping/wrap",
        }
    }))
    .into_response()
}

async fn unwrap(State(db): State<Db>, headers: HeaderMap, body: Bytes) -> Response {
    let token = string_field(&json_body(&body), "token").or_else(|| header_value(&headers, TOKEN_HEADER));
    let Some(token) = token else {
        return errors(StatusCode::BAD_REQUEST, "missing wrapping token");
    };
    match db.wrapped.write().await.remove(&token) {
        Some(wrapped) => Json(json!({ "data": wrapped.data })).into_response(),
        None => errors(StatusCode::BAD_REQUEST, "wrapping token is not valid or does not exist"),
    }
}

async fn lookup_wrap(State(db): State<Db>, headers: HeaderMap) -> Response {
    let Some(token) = header_value(&headers, TOKEN_HEADER) else {
        return errors(StatusCode::BAD_REQUEST, "missing wrapping token");
    };
    match db.wrapped.read().await.get(&token) {
        Some(wrapped) => Json(json!({
            "data": {
                "creation_path": "sys/wrapping/wrap",
                "creation_time": wrapped.creation_time,
                "creation_ttl": wrapped.ttl,
            }
        }))
        .into_response(),
        None => errors(StatusCode::BAD_REQUEST, "wrapping token is not valid or does not exist"),
    }
}

// --- kv v1 ---

async fn read_secret(
    State(db): State<Db>,
    Path(path): Path<String>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = caller(&db, &headers).await {
        return denied;
    }
    let secrets = db.secrets.read().await;
    if query.list {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut keys: Vec<String> = secrets
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((dir, _)) => format!("{dir}/"),
                None => rest.to_string(),
            })
            .collect();
        keys.dedup();
        if keys.is_empty() {
            return errors(StatusCode::NOT_FOUND, "");
        }
        return Json(json!({ "data": { "keys": keys } })).into_response();
    }
    match secrets.get(&path) {
        Some(data) => Json(json!({
            "lease_id": "",
            "lease_duration": 2764800,
            "renewable": false,
            "data": data,
        }))
        .into_response(),
        None => errors(StatusCode::NOT_FOUND, ""),
    }
}

async fn write_secret(State(db): State<Db>, Path(path): Path<String>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(denied) = caller(&db, &headers).await {
        return denied;
    }
    db.secrets.write().await.insert(path, Value::Object(json_body(&body)));
    StatusCode::NO_CONTENT.into_response()
}

async fn delete_secret(State(db): State<Db>, Path(path): Path<String>, headers: HeaderMap) -> Response {
    if let Err(denied) = caller(&db, &headers).await {
        return denied;
    }
    db.secrets.write().await.remove(&path);
    StatusCode::NO_CONTENT.into_response()
}
