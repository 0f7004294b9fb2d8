//! End-to-end tests against the live mock server.
//!
//! # Design
//! Each test starts its own mock server on a random port, then drives the
//! client over real HTTP through `UreqTransport`. Retry and timeout tests
//! configure the server to fail or stall before answering.

use std::time::{Duration, Instant};

use mock_server::{MockOptions, PASSWORD, ROOT_TOKEN, USERNAME};
use serde_json::json;
use vault_core::{TokenRequest, TransportError, Vault, VaultConfig, VaultError};

/// Start a mock server in a background thread and return its base address.
fn start_mock(options: MockOptions) -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with(listener, options).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn token_and_kv_lifecycle() {
    init_tracing();
    let address = start_mock(MockOptions::default());
    let vault = Vault::new(VaultConfig::new(&address, ROOT_TOKEN)).unwrap();

    // Step 1: look up the root token.
    let lookup = vault.auth().lookup_self(None).unwrap();
    assert_eq!(lookup.data().id, ROOT_TOKEN);
    assert_eq!(lookup.retries(), 0);

    // Step 2: create a child token and use it.
    let request = TokenRequest {
        policies: vec!["dev".to_string()],
        ..TokenRequest::default()
    };
    let child = vault.auth().create_token(&request, None).unwrap();
    assert_eq!(child.policies(), ["dev"]);
    assert!(child.is_auth_renewable());
    let child_vault = Vault::new(VaultConfig::new(&address, child.client_token())).unwrap();

    let renewed = child_vault.auth().renew_self(Some(7200), None).unwrap();
    assert_eq!(renewed.lease_duration(), 7200);

    // Step 3: write, list, read, delete a secret.
    let written = child_vault
        .logical()
        .write("secret/app/db", &json!({"user": "admin", "port": 5432}))
        .unwrap();
    assert_eq!(written.response().status(), 204);

    let listed = child_vault.logical().list("secret/app").unwrap();
    assert_eq!(listed.list(), ["db"]);

    let read = child_vault.logical().read("secret/app/db").unwrap();
    assert_eq!(read.data()["user"], "admin");
    assert_eq!(read.data()["port"], "5432");

    child_vault.logical().delete("secret/app/db").unwrap();
    let err = child_vault.logical().read("secret/app/db").unwrap_err();
    assert_eq!(err.status(), Some(404));

    // Step 4: revoke the child; its token stops working.
    let revoked = child_vault.auth().revoke_self(None).unwrap();
    assert_eq!(revoked.status(), 204);
    let err = child_vault.auth().lookup_self(None).unwrap_err();
    assert!(matches!(err, VaultError::UnexpectedResponse { status: 403, .. }));
}

#[test]
fn logins_return_auth_sections() {
    let address = start_mock(MockOptions::default());
    let vault = Vault::new(VaultConfig::new(&address, ROOT_TOKEN)).unwrap();

    let userpass = vault.auth().login_by_userpass(USERNAME, PASSWORD, None).unwrap();
    assert!(!userpass.client_token().is_empty());
    assert_eq!(userpass.username(), USERNAME);

    let err = vault.auth().login_by_userpass(USERNAME, "wrong", None).unwrap_err();
    match err {
        VaultError::UnexpectedResponse { status, body } => {
            assert_eq!(status, 400);
            assert!(String::from_utf8_lossy(&body).contains("invalid username or password"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let approle = vault.auth().login_by_app_role("role-1", "secret-1", None).unwrap();
    assert!(!approle.client_token().is_empty());

    let github = vault.auth().login_by_github("gh-token", None).unwrap();
    assert_eq!(github.policies(), ["default"]);

    let ec2 = vault
        .auth()
        .login_by_aws_ec2(Some("web"), "doc", "sig", Some("n-1"), None)
        .unwrap();
    assert_eq!(ec2.nonce(), "n-1");

    let k8s = vault.auth().login_by_kubernetes("app", "ey.x.y").unwrap();
    assert!(!k8s.token_accessor().is_empty());
}

#[test]
fn wrap_lookup_unwrap() {
    let address = start_mock(MockOptions::default());
    let vault = Vault::new(VaultConfig::new(&address, ROOT_TOKEN)).unwrap();

    let wrapped = vault.auth().wrap(&json!({"foo": "bar"}), 60).unwrap();
    assert_eq!(wrapped.ttl(), 60);

    let wrap_vault = Vault::new(VaultConfig::new(&address, wrapped.token())).unwrap();
    let lookup = wrap_vault.auth().lookup_wrap().unwrap();
    assert_eq!(lookup.data()["creation_ttl"], "60");

    let unwrapped = vault.auth().unwrap(Some(wrapped.token())).unwrap();
    assert_eq!(unwrapped.data().unwrap()["foo"], "bar");

    let err = vault.auth().unwrap(Some(wrapped.token())).unwrap_err();
    assert_eq!(err.status(), Some(400));
}

#[test]
fn retries_until_the_server_recovers() {
    init_tracing();
    let address = start_mock(MockOptions {
        failures_before_success: 3,
        delay: None,
    });
    let vault = Vault::new(VaultConfig::new(&address, ROOT_TOKEN))
        .unwrap()
        .with_retries(5, Duration::from_millis(10));

    let response = vault.auth().lookup_self(None).unwrap();
    assert_eq!(response.retries(), 3);
    assert_eq!(response.data().id, ROOT_TOKEN);
}

#[test]
fn write_is_retried_until_accepted() {
    let address = start_mock(MockOptions {
        failures_before_success: 2,
        delay: None,
    });
    let vault = Vault::new(VaultConfig::new(&address, ROOT_TOKEN))
        .unwrap()
        .with_retries(5, Duration::from_millis(10));

    let written = vault.logical().write("secret/retried", &json!({"value": "mock"})).unwrap();
    assert_eq!(written.response().status(), 204);
    assert_eq!(written.retries(), 2);

    let read = vault.logical().read("secret/retried").unwrap();
    assert_eq!(read.data()["value"], "mock");
    assert_eq!(read.retries(), 0);
}

#[test]
fn exhausted_retries_return_the_last_failure() {
    let address = start_mock(MockOptions {
        failures_before_success: 10,
        delay: None,
    });
    let vault = Vault::new(VaultConfig::new(&address, ROOT_TOKEN))
        .unwrap()
        .with_retries(2, Duration::from_millis(10));

    let err = vault.logical().read("secret/anything").unwrap_err();
    match err {
        VaultError::UnexpectedResponse { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, b"mock failure");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn read_timeout_is_a_transport_error() {
    let address = start_mock(MockOptions {
        failures_before_success: 0,
        delay: Some(Duration::from_secs(3)),
    });
    let config = VaultConfig {
        read_timeout: Some(1),
        ..VaultConfig::new(&address, ROOT_TOKEN)
    };
    let vault = Vault::new(config).unwrap();

    let started = Instant::now();
    let err = vault.auth().lookup_self(None).unwrap_err();
    assert!(matches!(err, VaultError::Transport(TransportError::Request { .. })));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn unreachable_server_is_a_transport_error() {
    // Bind then drop to find a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = VaultConfig {
        open_timeout: Some(1),
        ..VaultConfig::new(&format!("http://127.0.0.1:{port}"), ROOT_TOKEN)
    };
    let vault = Vault::new(config).unwrap().with_retries(1, Duration::from_millis(10));

    let err = vault.auth().lookup_self(None).unwrap_err();
    assert!(matches!(err, VaultError::Transport(_)));
    assert_eq!(err.status(), None);
}
