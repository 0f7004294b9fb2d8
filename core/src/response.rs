//! Response envelopes.
//!
//! # Design
//! Every operation result starts as a `VaultResponse`: the raw status, content
//! type and body, the retry count, and the body parsed into a generic JSON
//! tree when it is JSON at all. Typed envelopes (`AuthResponse`,
//! `LookupResponse`, ...) read their fields out of that tree.
//!
//! Construction never fails. A body that is not JSON leaves the tree empty and
//! every typed field at its default. Each typed field is read leniently: a
//! missing key, an explicit `null` and a value of the wrong JSON type all
//! produce the field's default, independently of the other fields.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::http::HttpResponse;

/// Deserialize a field, falling back to its default on null or a type mismatch.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default())
}

/// Read the sub-object at `key` as `T`. Absent, null or unreadable sections
/// come back as `T::default()`.
fn section<T>(json: Option<&Value>, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    json.and_then(|json| json.get(key))
        .filter(|value| value.is_object())
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

/// Raw response plus the generic JSON view of its body.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultResponse {
    raw: HttpResponse,
    retries: u32,
    json: Option<Value>,
}

impl VaultResponse {
    pub fn new(raw: HttpResponse, retries: u32) -> Self {
        let json = if raw.body.is_empty() {
            None
        } else {
            match serde_json::from_slice(&raw.body) {
                Ok(json) => Some(json),
                Err(e) => {
                    tracing::debug!(status = raw.status, error = %e, "response body is not JSON");
                    None
                }
            }
        };
        Self { raw, retries, json }
    }

    pub fn status(&self) -> u16 {
        self.raw.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.raw.content_type.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.raw.body
    }

    /// Zero-based retry count of the attempt that produced this response.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The parsed body, if it was JSON.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn raw(&self) -> &HttpResponse {
        &self.raw
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthMetadata {
    #[serde(rename = "app-id", default, deserialize_with = "lenient")]
    pub app_id: String,
    #[serde(rename = "user-id", default, deserialize_with = "lenient")]
    pub user_id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub username: String,
    #[serde(default, deserialize_with = "lenient")]
    pub nonce: String,
}

/// The `auth` section returned by logins and token operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthData {
    #[serde(default, deserialize_with = "lenient")]
    pub client_token: String,
    #[serde(default, deserialize_with = "lenient")]
    pub accessor: String,
    #[serde(default, deserialize_with = "lenient")]
    pub policies: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub lease_duration: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub renewable: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub metadata: AuthMetadata,
}

/// Result of an auth backend login or token create/renew.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    response: VaultResponse,
    auth: AuthData,
    renewable: Option<bool>,
}

impl AuthResponse {
    pub fn new(raw: HttpResponse, retries: u32) -> Self {
        Self::from(VaultResponse::new(raw, retries))
    }

    pub fn response(&self) -> &VaultResponse {
        &self.response
    }

    pub fn retries(&self) -> u32 {
        self.response.retries()
    }

    pub fn auth(&self) -> &AuthData {
        &self.auth
    }

    pub fn client_token(&self) -> &str {
        &self.auth.client_token
    }

    pub fn token_accessor(&self) -> &str {
        &self.auth.accessor
    }

    pub fn policies(&self) -> &[String] {
        &self.auth.policies
    }

    pub fn lease_duration(&self) -> u64 {
        self.auth.lease_duration
    }

    pub fn is_auth_renewable(&self) -> bool {
        self.auth.renewable
    }

    /// Top-level `renewable` flag, which only some endpoints report.
    pub fn renewable(&self) -> Option<bool> {
        self.renewable
    }

    pub fn app_id(&self) -> &str {
        &self.auth.metadata.app_id
    }

    pub fn user_id(&self) -> &str {
        &self.auth.metadata.user_id
    }

    pub fn username(&self) -> &str {
        &self.auth.metadata.username
    }

    pub fn nonce(&self) -> &str {
        &self.auth.metadata.nonce
    }
}

impl From<VaultResponse> for AuthResponse {
    fn from(response: VaultResponse) -> Self {
        let auth = section(response.json(), "auth");
        let renewable = response
            .json()
            .and_then(|json| json.get("renewable"))
            .and_then(Value::as_bool);
        Self {
            response,
            auth,
            renewable,
        }
    }
}

/// The `data` section of a token lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenLookup {
    #[serde(default, deserialize_with = "lenient")]
    pub accessor: String,
    #[serde(default, deserialize_with = "lenient")]
    pub creation_time: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub creation_ttl: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub display_name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub entity_id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub expire_time: String,
    #[serde(default, deserialize_with = "lenient")]
    pub explicit_max_ttl: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub issue_time: String,
    #[serde(default, deserialize_with = "lenient")]
    pub meta: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient")]
    pub num_uses: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub orphan: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub path: String,
    #[serde(default, deserialize_with = "lenient")]
    pub policies: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub renewable: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub ttl: u64,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub token_type: String,
}

/// Result of `lookup_self`.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResponse {
    response: VaultResponse,
    data: TokenLookup,
}

impl LookupResponse {
    pub fn new(raw: HttpResponse, retries: u32) -> Self {
        let response = VaultResponse::new(raw, retries);
        let data = section(response.json(), "data");
        Self { response, data }
    }

    pub fn response(&self) -> &VaultResponse {
        &self.response
    }

    pub fn retries(&self) -> u32 {
        self.response.retries()
    }

    pub fn data(&self) -> &TokenLookup {
        &self.data
    }

    /// `meta.username`, set by username-based logins.
    pub fn username(&self) -> &str {
        self.data.meta.get("username").map(String::as_str).unwrap_or_default()
    }
}

/// Result of KV reads, writes and lists, and of wrapping lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalResponse {
    response: VaultResponse,
    data: BTreeMap<String, String>,
    list: Vec<String>,
    lease_id: String,
    lease_duration: u64,
    renewable: bool,
}

impl LogicalResponse {
    pub fn new(raw: HttpResponse, retries: u32) -> Self {
        let response = VaultResponse::new(raw, retries);
        let json = response.json();
        let data_object = json.and_then(|json| json.get("data")).and_then(Value::as_object);

        let data = data_object
            .map(|object| {
                object
                    .iter()
                    .map(|(key, value)| (key.clone(), flatten(value)))
                    .collect()
            })
            .unwrap_or_default();
        let list = data_object
            .and_then(|object| object.get("keys"))
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).map(str::to_owned).collect())
            .unwrap_or_default();

        let field = |key: &str| json.and_then(|json| json.get(key));
        let lease_id = field("lease_id").and_then(Value::as_str).unwrap_or_default().to_owned();
        let lease_duration = field("lease_duration").and_then(Value::as_u64).unwrap_or_default();
        let renewable = field("renewable").and_then(Value::as_bool).unwrap_or_default();

        Self {
            response,
            data,
            list,
            lease_id,
            lease_duration,
            renewable,
        }
    }

    pub fn response(&self) -> &VaultResponse {
        &self.response
    }

    pub fn retries(&self) -> u32 {
        self.response.retries()
    }

    /// `data` with every value rendered as a string.
    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    /// The untouched `data` tree.
    pub fn data_object(&self) -> Option<&Value> {
        self.response.json().and_then(|json| json.get("data")).filter(|data| !data.is_null())
    }

    /// `data.keys` from a list operation.
    pub fn list(&self) -> &[String] {
        &self.list
    }

    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }

    pub fn lease_duration(&self) -> u64 {
        self.lease_duration
    }

    pub fn renewable(&self) -> bool {
        self.renewable
    }
}

fn flatten(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The `wrap_info` section returned for wrapped responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WrapInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub token: String,
    #[serde(default, deserialize_with = "lenient")]
    pub accessor: String,
    #[serde(default, deserialize_with = "lenient")]
    pub ttl: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub creation_time: String,
    #[serde(default, deserialize_with = "lenient")]
    pub creation_path: String,
}

/// Result of `wrap`.
#[derive(Debug, Clone, PartialEq)]
pub struct WrapResponse {
    response: VaultResponse,
    wrap_info: WrapInfo,
}

impl WrapResponse {
    pub fn new(raw: HttpResponse, retries: u32) -> Self {
        let response = VaultResponse::new(raw, retries);
        let wrap_info = section(response.json(), "wrap_info");
        Self {
            response,
            wrap_info,
        }
    }

    pub fn response(&self) -> &VaultResponse {
        &self.response
    }

    pub fn retries(&self) -> u32 {
        self.response.retries()
    }

    pub fn wrap_info(&self) -> &WrapInfo {
        &self.wrap_info
    }

    pub fn token(&self) -> &str {
        &self.wrap_info.token
    }

    pub fn accessor(&self) -> &str {
        &self.wrap_info.accessor
    }

    pub fn ttl(&self) -> u64 {
        self.wrap_info.ttl
    }
}

/// Result of `unwrap`: a wrapped auth section, wrapped data, or both.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwrapResponse {
    auth: AuthResponse,
}

impl UnwrapResponse {
    pub fn new(raw: HttpResponse, retries: u32) -> Self {
        Self {
            auth: AuthResponse::new(raw, retries),
        }
    }

    pub fn response(&self) -> &VaultResponse {
        self.auth.response()
    }

    pub fn retries(&self) -> u32 {
        self.auth.retries()
    }

    pub fn auth(&self) -> &AuthResponse {
        &self.auth
    }

    /// The unwrapped `data` tree.
    pub fn data(&self) -> Option<&Value> {
        self.response()
            .json()
            .and_then(|json| json.get("data"))
            .filter(|data| !data.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            content_type: Some("application/json".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn auth_fields_are_exposed() {
        let response = AuthResponse::new(
            json_response(
                200,
                r#"{"auth":{"client_token":"t1","policies":["default"],"lease_duration":10,"renewable":true}}"#,
            ),
            0,
        );
        assert_eq!(response.client_token(), "t1");
        assert_eq!(response.policies(), ["default".to_string()]);
        assert_eq!(response.lease_duration(), 10);
        assert!(response.is_auth_renewable());
        assert_eq!(response.renewable(), None);
    }

    #[test]
    fn missing_auth_yields_defaults() {
        let response = AuthResponse::new(json_response(200, r#"{"data":{}}"#), 2);
        assert_eq!(response.client_token(), "");
        assert!(response.policies().is_empty());
        assert_eq!(response.lease_duration(), 0);
        assert!(!response.is_auth_renewable());
        assert_eq!(response.username(), "");
        assert_eq!(response.retries(), 2);
    }

    #[test]
    fn null_auth_and_null_metadata_yield_defaults() {
        let response = AuthResponse::new(json_response(200, r#"{"auth":null,"renewable":false}"#), 0);
        assert_eq!(response.auth(), &AuthData::default());
        assert_eq!(response.renewable(), Some(false));

        let response = AuthResponse::new(
            json_response(200, r#"{"auth":{"client_token":"t2","metadata":null,"policies":null}}"#),
            0,
        );
        assert_eq!(response.client_token(), "t2");
        assert_eq!(response.auth().metadata, AuthMetadata::default());
        assert!(response.policies().is_empty());
    }

    #[test]
    fn mistyped_field_only_resets_that_field() {
        let response = AuthResponse::new(
            json_response(200, r#"{"auth":{"client_token":"t3","lease_duration":"soon"}}"#),
            0,
        );
        assert_eq!(response.client_token(), "t3");
        assert_eq!(response.lease_duration(), 0);
    }

    #[test]
    fn metadata_uses_hyphenated_keys() {
        let response = AuthResponse::new(
            json_response(
                200,
                r#"{"auth":{"metadata":{"app-id":"a","user-id":"u","username":"bob","nonce":"n"}}}"#,
            ),
            0,
        );
        assert_eq!(response.app_id(), "a");
        assert_eq!(response.user_id(), "u");
        assert_eq!(response.username(), "bob");
        assert_eq!(response.nonce(), "n");
    }

    #[test]
    fn non_json_body_keeps_raw_data_only() {
        let raw = HttpResponse {
            status: 500,
            content_type: Some("text/plain".to_string()),
            body: b"internal error".to_vec(),
        };
        let response = AuthResponse::new(raw, 0);
        assert!(response.response().json().is_none());
        assert_eq!(response.response().status(), 500);
        assert_eq!(response.response().body(), b"internal error");
        assert_eq!(response.client_token(), "");
    }

    #[test]
    fn empty_body_has_no_json() {
        let raw = HttpResponse {
            status: 204,
            content_type: None,
            body: Vec::new(),
        };
        let response = VaultResponse::new(raw, 0);
        assert!(response.json().is_none());
    }

    #[test]
    fn lookup_reads_data_section() {
        let response = LookupResponse::new(
            json_response(
                200,
                r#"{"data":{"id":"tok","accessor":"acc","policies":["root"],"ttl":3600,
                    "meta":{"username":"alice"},"type":"service","orphan":true,"expire_time":null}}"#,
            ),
            0,
        );
        let data = response.data();
        assert_eq!(data.id, "tok");
        assert_eq!(data.accessor, "acc");
        assert_eq!(data.policies, vec!["root".to_string()]);
        assert_eq!(data.ttl, 3600);
        assert_eq!(data.token_type, "service");
        assert!(data.orphan);
        assert_eq!(data.expire_time, "");
        assert_eq!(response.username(), "alice");
    }

    #[test]
    fn logical_flattens_data_values() {
        let response = LogicalResponse::new(
            json_response(
                200,
                r#"{"lease_id":"l1","lease_duration":60,"renewable":true,
                    "data":{"value":"mock","count":3,"nested":{"a":1}}}"#,
            ),
            1,
        );
        assert_eq!(response.data()["value"], "mock");
        assert_eq!(response.data()["count"], "3");
        assert_eq!(response.data()["nested"], r#"{"a":1}"#);
        assert_eq!(response.lease_id(), "l1");
        assert_eq!(response.lease_duration(), 60);
        assert!(response.renewable());
        assert_eq!(response.retries(), 1);
    }

    #[test]
    fn logical_reads_list_keys() {
        let response = LogicalResponse::new(json_response(200, r#"{"data":{"keys":["a","b/"]}}"#), 0);
        assert_eq!(response.list(), ["a".to_string(), "b/".to_string()]);
    }

    #[test]
    fn logical_without_data_is_empty() {
        let response = LogicalResponse::new(json_response(200, r#"{"data":null}"#), 0);
        assert!(response.data().is_empty());
        assert!(response.data_object().is_none());
        assert!(response.list().is_empty());
    }

    #[test]
    fn wrap_info_is_exposed() {
        let response = WrapResponse::new(
            json_response(
                200,
                r#"{"wrap_info":{"token":"w1","accessor":"wa","ttl":60,"creation_path":"sys/wrapping/wrap"}}"#,
            ),
            0,
        );
        assert_eq!(response.token(), "w1");
        assert_eq!(response.accessor(), "wa");
        assert_eq!(response.ttl(), 60);
        assert_eq!(response.wrap_info().creation_path, "sys/wrapping/wrap");
    }

    #[test]
    fn unwrap_exposes_data_and_auth() {
        let response = UnwrapResponse::new(
            json_response(200, r#"{"data":{"foo":"bar"},"auth":{"client_token":"t9"}}"#),
            0,
        );
        assert_eq!(response.data().unwrap()["foo"], "bar");
        assert_eq!(response.auth().client_token(), "t9");
    }
}
