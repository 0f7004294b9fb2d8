//! Key/value reads and writes against secret engines (KV version 1 paths).

use serde_json::Value;

use crate::client::{Expect, Vault};
use crate::error::VaultError;
use crate::http::{HttpMethod, HttpRequest};
use crate::response::LogicalResponse;
use crate::transport::Transport;

pub struct Logical<'a, T> {
    vault: &'a Vault<T>,
    namespace: Option<String>,
}

impl<'a, T: Transport> Logical<'a, T> {
    pub(crate) fn new(vault: &'a Vault<T>) -> Self {
        let namespace = vault.config().namespace.clone().filter(|ns| !ns.is_empty());
        Self { vault, namespace }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        self.vault
            .authenticated(self.vault.request(method, path, self.namespace.as_deref()))
    }

    fn send(&self, request: &HttpRequest, expect: Expect) -> Result<LogicalResponse, VaultError> {
        self.vault
            .call(request, expect, |raw, retries| Ok(LogicalResponse::new(raw, retries)))
    }

    pub fn build_read(&self, path: &str) -> HttpRequest {
        self.request(HttpMethod::Get, path)
    }

    /// Read the secret at `path`, e.g. `secret/app/db`.
    pub fn read(&self, path: &str) -> Result<LogicalResponse, VaultError> {
        self.send(&self.build_read(path), Expect::JSON)
    }

    pub fn build_list(&self, path: &str) -> HttpRequest {
        self.request(HttpMethod::Get, path).parameter("list", "true")
    }

    /// Key names under `path`, available through `LogicalResponse::list`.
    pub fn list(&self, path: &str) -> Result<LogicalResponse, VaultError> {
        self.send(&self.build_list(path), Expect::JSON)
    }

    pub fn build_write(&self, path: &str, data: &Value) -> Result<HttpRequest, VaultError> {
        Ok(self.request(HttpMethod::Post, path).json_body(data)?)
    }

    /// Store `data` at `path`. KV v1 answers 204; engines that return data answer 200.
    pub fn write(&self, path: &str, data: &Value) -> Result<LogicalResponse, VaultError> {
        self.send(&self.build_write(path, data)?, Expect::JSON_OR_NO_CONTENT)
    }

    pub fn build_delete(&self, path: &str) -> HttpRequest {
        self.request(HttpMethod::Delete, path)
    }

    pub fn delete(&self, path: &str) -> Result<LogicalResponse, VaultError> {
        self.send(&self.build_delete(path), Expect::NO_CONTENT)
    }
}
