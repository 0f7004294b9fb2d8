//! Operations on `/v1/auth/*` and `/v1/sys/wrapping/*`.
//!
//! Each endpoint has a `build_*` method producing the request and an
//! executing method that sends it through the client's retry policy. Mount
//! arguments default to the backend's conventional path when `None`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::client::{Expect, Vault, WRAP_TTL_HEADER};
use crate::error::VaultError;
use crate::http::{HttpMethod, HttpRequest};
use crate::response::{AuthResponse, LogicalResponse, LookupResponse, UnwrapResponse, VaultResponse, WrapResponse};
use crate::transport::Transport;

/// Options for `create_token`. Unset fields are left out of the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_parent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_default_policy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_uses: Option<u64>,
    /// Create the token against this role (`.../create/{role}`).
    #[serde(skip)]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewable: Option<bool>,
    /// `service` or `batch`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_max_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_alias: Option<String>,
}

/// Auth backend and response-wrapping operations.
pub struct Auth<'a, T> {
    vault: &'a Vault<T>,
    namespace: Option<String>,
}

impl<'a, T: Transport> Auth<'a, T> {
    pub(crate) fn new(vault: &'a Vault<T>) -> Self {
        let namespace = vault.config().namespace.clone().filter(|ns| !ns.is_empty());
        Self { vault, namespace }
    }

    /// Send `X-Vault-Namespace: namespace` instead of the configured namespace.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        self.vault.request(method, path, self.namespace.as_deref())
    }

    fn login(&self, request: &HttpRequest) -> Result<AuthResponse, VaultError> {
        self.vault
            .call(request, Expect::JSON, |raw, retries| Ok(AuthResponse::new(raw, retries)))
    }

    // --- token ---

    pub fn build_create_token(&self, token: &TokenRequest, mount: Option<&str>) -> Result<HttpRequest, VaultError> {
        let mount = mount.unwrap_or("token");
        let path = match &token.role {
            Some(role) => format!("auth/{mount}/create/{role}"),
            None => format!("auth/{mount}/create"),
        };
        let request = self.vault.authenticated(self.request(HttpMethod::Post, &path));
        Ok(request.json_body(token)?)
    }

    /// Create a child token of the configured token.
    pub fn create_token(&self, token: &TokenRequest, mount: Option<&str>) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_create_token(token, mount)?)
    }

    pub fn build_renew_self(&self, increment: Option<u64>, mount: Option<&str>) -> Result<HttpRequest, VaultError> {
        let path = format!("auth/{}/renew-self", mount.unwrap_or("token"));
        let request = self.vault.authenticated(self.request(HttpMethod::Post, &path));
        match increment {
            Some(increment) => Ok(request.json_body(&json!({ "increment": increment }))?),
            None => Ok(request),
        }
    }

    /// Renew the configured token, optionally asking for `increment` seconds.
    pub fn renew_self(&self, increment: Option<u64>, mount: Option<&str>) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_renew_self(increment, mount)?)
    }

    pub fn build_lookup_self(&self, mount: Option<&str>) -> HttpRequest {
        let path = format!("auth/{}/lookup-self", mount.unwrap_or("token"));
        self.vault.authenticated(self.request(HttpMethod::Get, &path))
    }

    pub fn lookup_self(&self, mount: Option<&str>) -> Result<LookupResponse, VaultError> {
        self.vault.call(&self.build_lookup_self(mount), Expect::JSON, |raw, retries| {
            Ok(LookupResponse::new(raw, retries))
        })
    }

    pub fn build_revoke_self(&self, mount: Option<&str>) -> HttpRequest {
        let path = format!("auth/{}/revoke-self", mount.unwrap_or("token"));
        self.vault.authenticated(self.request(HttpMethod::Post, &path))
    }

    /// Revoke the configured token. The server answers 204 with no body.
    pub fn revoke_self(&self, mount: Option<&str>) -> Result<VaultResponse, VaultError> {
        self.vault.call(&self.build_revoke_self(mount), Expect::NO_CONTENT, |raw, retries| {
            Ok(VaultResponse::new(raw, retries))
        })
    }

    // --- logins ---

    pub fn build_login_by_app_id(&self, path: &str, app_id: &str, user_id: &str) -> Result<HttpRequest, VaultError> {
        let request = self.request(HttpMethod::Post, &format!("auth/{path}"));
        Ok(request.json_body(&json!({ "app_id": app_id, "user_id": user_id }))?)
    }

    /// Log in to an app-id backend at `auth/{path}`.
    #[deprecated(note = "the app-id backend was superseded by AppRole; use `login_by_app_role`")]
    pub fn login_by_app_id(&self, path: &str, app_id: &str, user_id: &str) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_login_by_app_id(path, app_id, user_id)?)
    }

    pub fn build_login_by_app_role(
        &self,
        role_id: &str,
        secret_id: &str,
        mount: Option<&str>,
    ) -> Result<HttpRequest, VaultError> {
        let path = format!("auth/{}/login", mount.unwrap_or("approle"));
        let request = self.request(HttpMethod::Post, &path);
        Ok(request.json_body(&json!({ "role_id": role_id, "secret_id": secret_id }))?)
    }

    pub fn login_by_app_role(&self, role_id: &str, secret_id: &str, mount: Option<&str>) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_login_by_app_role(role_id, secret_id, mount)?)
    }

    pub fn build_login_by_userpass(
        &self,
        username: &str,
        password: &str,
        mount: Option<&str>,
    ) -> Result<HttpRequest, VaultError> {
        let path = format!("auth/{}/login/{username}", mount.unwrap_or("userpass"));
        let request = self.request(HttpMethod::Post, &path);
        Ok(request.json_body(&json!({ "password": password }))?)
    }

    pub fn login_by_userpass(&self, username: &str, password: &str, mount: Option<&str>) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_login_by_userpass(username, password, mount)?)
    }

    /// LDAP speaks the userpass login API under its own mount.
    pub fn login_by_ldap(&self, username: &str, password: &str, mount: Option<&str>) -> Result<AuthResponse, VaultError> {
        self.login_by_userpass(username, password, Some(mount.unwrap_or("ldap")))
    }

    pub fn build_login_by_aws_ec2(
        &self,
        role: Option<&str>,
        identity: &str,
        signature: &str,
        nonce: Option<&str>,
        mount: Option<&str>,
    ) -> Result<HttpRequest, VaultError> {
        let mut body = Map::new();
        body.insert("identity".into(), identity.into());
        body.insert("signature".into(), signature.into());
        insert_opt(&mut body, "role", role);
        insert_opt(&mut body, "nonce", nonce);
        let path = format!("auth/{}/login", mount.unwrap_or("aws"));
        Ok(self.request(HttpMethod::Post, &path).json_body(&body)?)
    }

    /// EC2 login with a base64 identity document and its signature.
    pub fn login_by_aws_ec2(
        &self,
        role: Option<&str>,
        identity: &str,
        signature: &str,
        nonce: Option<&str>,
        mount: Option<&str>,
    ) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_login_by_aws_ec2(role, identity, signature, nonce, mount)?)
    }

    pub fn build_login_by_aws_ec2_pkcs7(
        &self,
        role: Option<&str>,
        pkcs7: &str,
        nonce: Option<&str>,
        mount: Option<&str>,
    ) -> Result<HttpRequest, VaultError> {
        let mut body = Map::new();
        body.insert("pkcs7".into(), pkcs7.into());
        insert_opt(&mut body, "role", role);
        insert_opt(&mut body, "nonce", nonce);
        let path = format!("auth/{}/login", mount.unwrap_or("aws"));
        Ok(self.request(HttpMethod::Post, &path).json_body(&body)?)
    }

    /// EC2 login with a PKCS7 signature (newlines stripped).
    pub fn login_by_aws_ec2_pkcs7(
        &self,
        role: Option<&str>,
        pkcs7: &str,
        nonce: Option<&str>,
        mount: Option<&str>,
    ) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_login_by_aws_ec2_pkcs7(role, pkcs7, nonce, mount)?)
    }

    pub fn build_login_by_aws_iam(
        &self,
        role: Option<&str>,
        iam_request_url: &str,
        iam_request_body: &str,
        iam_request_headers: &str,
        mount: Option<&str>,
    ) -> Result<HttpRequest, VaultError> {
        let mut body = Map::new();
        body.insert("iam_request_url".into(), iam_request_url.into());
        body.insert("iam_request_body".into(), iam_request_body.into());
        body.insert("iam_request_headers".into(), iam_request_headers.into());
        body.insert("iam_http_request_method".into(), "POST".into());
        insert_opt(&mut body, "role", role);
        let path = format!("auth/{}/login", mount.unwrap_or("aws"));
        Ok(self.request(HttpMethod::Post, &path).json_body(&body)?)
    }

    /// IAM login with a signed `sts:GetCallerIdentity` request, all parts base64.
    pub fn login_by_aws_iam(
        &self,
        role: Option<&str>,
        iam_request_url: &str,
        iam_request_body: &str,
        iam_request_headers: &str,
        mount: Option<&str>,
    ) -> Result<AuthResponse, VaultError> {
        let request = self.build_login_by_aws_iam(role, iam_request_url, iam_request_body, iam_request_headers, mount)?;
        self.login(&request)
    }

    pub fn build_login_by_github(&self, github_token: &str, mount: Option<&str>) -> Result<HttpRequest, VaultError> {
        let path = format!("auth/{}/login", mount.unwrap_or("github"));
        Ok(self
            .request(HttpMethod::Post, &path)
            .json_body(&json!({ "token": github_token }))?)
    }

    pub fn login_by_github(&self, github_token: &str, mount: Option<&str>) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_login_by_github(github_token, mount)?)
    }

    pub fn build_login_by_jwt(&self, provider: &str, role: &str, jwt: &str) -> Result<HttpRequest, VaultError> {
        let path = format!("auth/{provider}/login");
        Ok(self
            .request(HttpMethod::Post, &path)
            .json_body(&json!({ "role": role, "jwt": jwt }))?)
    }

    /// Log in to any JWT-style backend mounted at `auth/{provider}`.
    pub fn login_by_jwt(&self, provider: &str, role: &str, jwt: &str) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_login_by_jwt(provider, role, jwt)?)
    }

    pub fn login_by_gcp(&self, role: &str, jwt: &str) -> Result<AuthResponse, VaultError> {
        self.login_by_jwt("gcp", role, jwt)
    }

    pub fn login_by_kubernetes(&self, role: &str, jwt: &str) -> Result<AuthResponse, VaultError> {
        self.login_by_jwt("kubernetes", role, jwt)
    }

    pub fn build_login_by_cert(&self, mount: Option<&str>) -> HttpRequest {
        let path = format!("auth/{}/login", mount.unwrap_or("cert"));
        self.request(HttpMethod::Post, &path)
    }

    /// TLS client-certificate login; the certificate is presented by the transport.
    pub fn login_by_cert(&self, mount: Option<&str>) -> Result<AuthResponse, VaultError> {
        self.login(&self.build_login_by_cert(mount))
    }

    // --- response wrapping ---

    pub fn build_lookup_wrap(&self) -> HttpRequest {
        self.vault
            .authenticated(self.request(HttpMethod::Get, "sys/wrapping/lookup"))
    }

    /// Look up the wrapping token configured as the client token.
    pub fn lookup_wrap(&self) -> Result<LogicalResponse, VaultError> {
        self.vault.call(&self.build_lookup_wrap(), Expect::JSON, |raw, retries| {
            Ok(LogicalResponse::new(raw, retries))
        })
    }

    pub fn build_wrap(&self, data: &Value, ttl_secs: u32) -> Result<HttpRequest, VaultError> {
        let request = self
            .vault
            .authenticated(self.request(HttpMethod::Post, "sys/wrapping/wrap"))
            .header(WRAP_TTL_HEADER, &ttl_secs.to_string());
        Ok(request.json_body(data)?)
    }

    /// Wrap `data` in a single-use token valid for `ttl_secs`.
    pub fn wrap(&self, data: &Value, ttl_secs: u32) -> Result<WrapResponse, VaultError> {
        self.vault.call(&self.build_wrap(data, ttl_secs)?, Expect::JSON, |raw, retries| {
            let response = WrapResponse::new(raw, retries);
            if response.token().is_empty() {
                return Err(VaultError::MalformedBody("wrap response has no wrap_info.token".to_string()));
            }
            Ok(response)
        })
    }

    pub fn build_unwrap(&self, wrapped_token: Option<&str>) -> Result<HttpRequest, VaultError> {
        let mut body = Map::new();
        insert_opt(&mut body, "token", wrapped_token);
        let request = self
            .vault
            .authenticated(self.request(HttpMethod::Post, "sys/wrapping/unwrap"));
        Ok(request.json_body(&body)?)
    }

    /// Unwrap `wrapped_token`, or the configured token when `None`.
    pub fn unwrap(&self, wrapped_token: Option<&str>) -> Result<UnwrapResponse, VaultError> {
        self.vault.call(&self.build_unwrap(wrapped_token)?, Expect::JSON, |raw, retries| {
            Ok(UnwrapResponse::new(raw, retries))
        })
    }
}

fn insert_opt(body: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        body.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::Duration;

    use super::*;
    use crate::client::TOKEN_HEADER;
    use crate::config::VaultConfig;
    use crate::error::TransportError;
    use crate::http::HttpResponse;

    type Handler = fn(&HttpRequest) -> Result<HttpResponse, TransportError>;

    fn unreachable_transport(_: &HttpRequest) -> Result<HttpResponse, TransportError> {
        Err(TransportError::UrlNotSet)
    }

    fn vault() -> Vault<Handler> {
        Vault::with_transport(
            VaultConfig::new("http://127.0.0.1:8200", "root"),
            unreachable_transport as Handler,
        )
    }

    fn body(request: &HttpRequest) -> Value {
        serde_json::from_slice(request.payload().unwrap()).unwrap()
    }

    #[test]
    fn create_token_serializes_only_set_fields() {
        let vault = vault();
        let token = TokenRequest {
            policies: vec!["default".to_string()],
            ttl: Some("1h".to_string()),
            token_type: Some("service".to_string()),
            role: Some("ops".to_string()),
            ..TokenRequest::default()
        };
        let req = vault.auth().build_create_token(&token, None).unwrap();
        assert_eq!(req.method(), HttpMethod::Post);
        assert_eq!(req.url(), "http://127.0.0.1:8200/v1/auth/token/create/ops");
        assert_eq!(req.headers()[TOKEN_HEADER], "root");
        assert_eq!(body(&req), json!({"policies": ["default"], "ttl": "1h", "type": "service"}));
    }

    #[test]
    fn userpass_login_has_no_token_header() {
        let vault = vault();
        let req = vault.auth().build_login_by_userpass("alice", "pw", None).unwrap();
        assert_eq!(req.url(), "http://127.0.0.1:8200/v1/auth/userpass/login/alice");
        assert!(!req.headers().contains_key(TOKEN_HEADER));
        assert_eq!(body(&req), json!({"password": "pw"}));
    }

    #[test]
    fn namespace_header_comes_from_config_or_override() {
        let config = VaultConfig {
            namespace: Some("team-a".to_string()),
            ..VaultConfig::new("http://127.0.0.1:8200", "root")
        };
        let vault = Vault::with_transport(config, unreachable_transport as Handler);

        let req = vault.auth().build_lookup_self(None);
        assert_eq!(req.headers()["X-Vault-Namespace"], "team-a");

        let req = vault.auth().with_namespace("team-b").build_lookup_self(None);
        assert_eq!(req.headers()["X-Vault-Namespace"], "team-b");
    }

    #[test]
    fn renew_self_sends_body_only_with_increment() {
        let vault = vault();
        let req = vault.auth().build_renew_self(None, None).unwrap();
        assert!(req.payload().is_none());
        let req = vault.auth().build_renew_self(Some(3600), Some("token2")).unwrap();
        assert_eq!(req.url(), "http://127.0.0.1:8200/v1/auth/token2/renew-self");
        assert_eq!(body(&req), json!({"increment": 3600}));
    }

    #[test]
    fn aws_ec2_omits_unset_optionals() {
        let vault = vault();
        let req = vault
            .auth()
            .build_login_by_aws_ec2(None, "doc", "sig", Some("n1"), None)
            .unwrap();
        assert_eq!(req.url(), "http://127.0.0.1:8200/v1/auth/aws/login");
        assert_eq!(body(&req), json!({"identity": "doc", "signature": "sig", "nonce": "n1"}));
    }

    #[test]
    fn aws_iam_always_posts() {
        let vault = vault();
        let req = vault
            .auth()
            .build_login_by_aws_iam(Some("r"), "dXJs", "Ym9keQ==", "e30=", Some("aws-east"))
            .unwrap();
        assert_eq!(req.url(), "http://127.0.0.1:8200/v1/auth/aws-east/login");
        let body = body(&req);
        assert_eq!(body["iam_http_request_method"], "POST");
        assert_eq!(body["role"], "r");
    }

    #[test]
    fn jwt_providers_share_one_shape() {
        let vault = vault();
        let req = vault.auth().build_login_by_jwt("kubernetes", "app", "ey.x.y").unwrap();
        assert_eq!(req.url(), "http://127.0.0.1:8200/v1/auth/kubernetes/login");
        assert_eq!(body(&req), json!({"role": "app", "jwt": "ey.x.y"}));
    }

    #[test]
    fn cert_login_sends_no_body() {
        let vault = vault();
        let req = vault.auth().build_login_by_cert(None);
        assert_eq!(req.url(), "http://127.0.0.1:8200/v1/auth/cert/login");
        assert!(req.payload().is_none());
        assert!(req.form_body().is_none());
    }

    #[test]
    fn wrap_sets_ttl_header() {
        let vault = vault();
        let req = vault.auth().build_wrap(&json!({"foo": "bar"}), 60).unwrap();
        assert_eq!(req.url(), "http://127.0.0.1:8200/v1/sys/wrapping/wrap");
        assert_eq!(req.headers()[WRAP_TTL_HEADER], "60");
        assert_eq!(body(&req), json!({"foo": "bar"}));
    }

    #[test]
    fn unwrap_body_carries_optional_token() {
        let vault = vault();
        let req = vault.auth().build_unwrap(Some("wrapped")).unwrap();
        assert_eq!(body(&req), json!({"token": "wrapped"}));
        let req = vault.auth().build_unwrap(None).unwrap();
        assert_eq!(body(&req), json!({}));
    }

    #[test]
    #[allow(deprecated)]
    fn app_id_login_posts_to_given_path() {
        let seen = RefCell::new(None);
        let transport = |req: &HttpRequest| -> Result<HttpResponse, TransportError> {
            *seen.borrow_mut() = Some(req.url().to_string());
            Ok(HttpResponse {
                status: 200,
                content_type: Some("application/json".to_string()),
                body: br#"{"auth":{"client_token":"t","metadata":{"app-id":"a","user-id":"u"}}}"#.to_vec(),
            })
        };
        let vault = Vault::with_transport(VaultConfig::new("http://127.0.0.1:8200", "root"), transport);
        let response = vault.auth().login_by_app_id("app-id/login", "a", "u").unwrap();
        assert_eq!(response.app_id(), "a");
        assert_eq!(response.user_id(), "u");
        assert_eq!(seen.borrow().as_deref(), Some("http://127.0.0.1:8200/v1/auth/app-id/login"));
    }

    #[test]
    fn wrap_without_token_is_malformed_and_retried() {
        let calls = RefCell::new(0);
        let transport = |_: &HttpRequest| -> Result<HttpResponse, TransportError> {
            *calls.borrow_mut() += 1;
            Ok(HttpResponse {
                status: 200,
                content_type: Some("application/json".to_string()),
                body: br#"{"wrap_info":null}"#.to_vec(),
            })
        };
        let vault = Vault::with_transport(VaultConfig::new("http://127.0.0.1:8200", "root"), transport)
            .with_retries(1, Duration::from_millis(1));
        let err = vault.auth().wrap(&json!({"k": "v"}), 30).unwrap_err();
        assert!(matches!(err, VaultError::MalformedBody(_)));
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn revoke_self_expects_no_content() {
        let transport = |_: &HttpRequest| -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse {
                status: 204,
                content_type: None,
                body: Vec::new(),
            })
        };
        let vault = Vault::with_transport(VaultConfig::new("http://127.0.0.1:8200", "root"), transport);
        let response = vault.auth().revoke_self(None).unwrap();
        assert_eq!(response.status(), 204);
        assert!(response.json().is_none());
    }
}
