use assert_cmd::Command;
use assert_cmd::cargo;
use kvm_autotester::http::{
    ErrorKind, Failure, Method, Outcome, RequestOptions, ResilientClient, RetryPolicy, Session,
    SessionConfig, USER_AGENT,
};
use mockito::Server;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// Config that keeps the default retry sets but does not wait between attempts.
const FAST_RETRY_CONFIG: &str = "retry:\n  backoff_base_secs: 0\n";

fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

fn cli() -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("kvm-autotester"));
    cmd.env_remove("RUST_LOG").env_remove("KVM_AUTOTESTER_CONFIG");
    cmd
}

/// Client over a real session with zero backoff.
fn fast_client() -> ResilientClient {
    let policy = RetryPolicy::new(5, Duration::ZERO, 3.0).unwrap();
    ResilientClient::new(Session::new(SessionConfig::default()).unwrap(), policy)
}

#[test]
fn test_help_lists_flags() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("--debug"))
        .stdout(predicates::str::contains("--config"));
}

#[test]
fn test_shows_loaded_config() {
    let (_dir, path) = write_config("api_url: https://kvm.example.com\nhosts:\n  - kvm-01\n");

    cli()
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("debug: false"))
        .stdout(predicates::str::contains("api_url: https://kvm.example.com"))
        .stdout(predicates::str::contains("kvm-01"));
}

#[test]
fn test_missing_config_is_logged_and_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing.yaml");

    cli()
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stderr(predicates::str::contains("Unable to read config file"))
        .stderr(predicates::str::contains("missing.yaml"));
}

#[test]
fn test_malformed_config_is_logged_and_ignored() {
    let (_dir, path) = write_config("key: [unclosed\n");

    cli()
        .arg("-c")
        .arg(&path)
        .assert()
        .success()
        .stderr(predicates::str::contains("Unable to parse config file"));
}

#[test]
fn test_request_success_prints_body() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/api/status")
        .match_header("user-agent", USER_AGENT)
        .with_status(200)
        .with_body("all hosts up")
        .expect(1)
        .create();
    let (_dir, path) = write_config(FAST_RETRY_CONFIG);

    cli()
        .arg("--config")
        .arg(&path)
        .arg("request")
        .arg("GET")
        .arg(format!("{}/api/status", server.url()))
        .assert()
        .success()
        .stdout(predicates::str::contains("all hosts up"));

    mock.assert();
}

#[test]
fn test_request_client_error_exits_with_failure() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/api/hosts/42")
        .with_status(404)
        .with_body("host\nnot found")
        .expect(1)
        .create();
    let (_dir, path) = write_config(FAST_RETRY_CONFIG);

    cli()
        .arg("--config")
        .arg(&path)
        .arg("request")
        .arg("GET")
        .arg(format!("{}/api/hosts/42", server.url()))
        .assert()
        .code(1)
        .stderr(predicates::str::contains("HTTP 404"))
        .stderr(predicates::str::contains("host not found"));

    mock.assert();
}

#[test]
fn test_request_server_error_retries_per_config() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/api/jobs")
        .match_body("start")
        .with_status(503)
        .expect(3)
        .create();
    let (_dir, path) = write_config("retry:\n  max_attempts: 3\n  backoff_base_secs: 0\n");

    cli()
        .arg("--config")
        .arg(&path)
        .arg("request")
        .arg("POST")
        .arg(format!("{}/api/jobs", server.url()))
        .arg("--data")
        .arg("start")
        .assert()
        .code(1)
        .stderr(predicates::str::contains("HTTP 503"));

    mock.assert();
}

#[test]
fn test_request_connection_refused_exits_with_failure() {
    let (_dir, path) = write_config("retry:\n  max_attempts: 2\n  backoff_base_secs: 0\n");

    cli()
        .arg("--config")
        .arg(&path)
        .arg("request")
        .arg("GET")
        .arg("http://127.0.0.1:1/")
        .assert()
        .code(1)
        .stderr(predicates::str::contains("Connection error"));
}

#[test]
fn test_request_invalid_url_exits_with_failure() {
    let (_dir, path) = write_config(FAST_RETRY_CONFIG);

    cli()
        .arg("--config")
        .arg(&path)
        .arg("request")
        .arg("GET")
        .arg("not-a-url")
        .assert()
        .code(1)
        .stderr(predicates::str::contains("Undefined error"));
}

#[test]
fn test_session_retries_server_errors_up_to_budget() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/flaky")
        .with_status(504)
        .expect(5)
        .create();

    let outcome = fast_client().execute(
        Method::Get,
        &format!("{}/flaky", server.url()),
        RequestOptions::new(),
    );

    mock.assert();
    assert!(matches!(
        outcome,
        Outcome::Failure(Failure::Http { status: 504, .. })
    ));
}

#[test]
fn test_session_does_not_retry_put() {
    let mut server = Server::new();
    let mock = server
        .mock("PUT", "/vm/1")
        .with_status(503)
        .expect(1)
        .create();

    let outcome = fast_client().execute(
        Method::Put,
        &format!("{}/vm/1", server.url()),
        RequestOptions::new().text("power=on"),
    );

    mock.assert();
    assert_eq!(outcome.failure_kind(), Some(ErrorKind::Http));
}

#[test]
fn test_session_does_not_retry_client_errors() {
    let mut server = Server::new();
    let mock = server
        .mock("DELETE", "/vm/1")
        .with_status(409)
        .expect(1)
        .create();

    let outcome = fast_client().execute(
        Method::Delete,
        &format!("{}/vm/1", server.url()),
        RequestOptions::new(),
    );

    mock.assert();
    assert_eq!(outcome.failure_kind(), Some(ErrorKind::Http));
}

#[test]
fn test_session_reuse_gives_same_classification() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/stable")
        .with_status(200)
        .with_body("ok")
        .expect(2)
        .create();

    let client = fast_client();
    let url = format!("{}/stable", server.url());
    let first = client.execute(Method::Get, &url, RequestOptions::new());
    let second = client.execute(Method::Get, &url, RequestOptions::new());

    mock.assert();
    assert!(first.is_success());
    assert!(second.is_success());
}

#[test]
fn test_session_connection_refused_is_connection_failure() {
    let outcome = fast_client().execute(Method::Get, "http://127.0.0.1:1/", RequestOptions::new());
    assert_eq!(outcome.failure_kind(), Some(ErrorKind::Connection));
}
