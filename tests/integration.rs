use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use ravel::{Environment, PluginRegistry, Runtime, RuntimeConfig, RuntimeError, FAILED_ASSERTION_COUNT};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

struct TestServer {
    base_url: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route(
                "/login",
                post(|Json(body): Json<Value>| async move {
                    let user = body["user"].as_str().unwrap_or_default().to_string();
                    (
                        [("X-Request-Id", "req-1")],
                        Json(json!({"token": format!("t-{user}")})),
                    )
                }),
            )
            .route(
                "/profile",
                get(|headers: HeaderMap| async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer t-ann");
                    if authorized {
                        (
                            StatusCode::OK,
                            Json(json!({"name": "ann", "roles": ["admin"]})),
                        )
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({"error": "unauthorized"})),
                        )
                    }
                }),
            )
            .route(
                "/users",
                get(|| async move {
                    Json(json!([
                        {"id": 1, "name": "ann"},
                        {"id": 2, "name": "bob"}
                    ]))
                }),
            )
            .route("/text", get(|| async move { "Hello runner world" }))
            .route(
                "/echo",
                post(|headers: HeaderMap, body: String| async move {
                    let content_type = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    ([("X-Echo-Content-Type", content_type)], body)
                }),
            );

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });

        let handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                eprintln!("test server error: {err}");
            }
        });
        let base_url = format!("http://{addr}");

        Self {
            base_url,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                let _ = handle.await;
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(name: &str) -> String {
    fixtures_dir().join(name).to_string_lossy().into_owned()
}

fn runtime_for(server: &TestServer) -> Runtime {
    let config = RuntimeConfig::default()
        .with_binding("base", json!(server.base_url))
        .with_binding("fixtures", json!(fixtures_dir().to_string_lossy()));
    Runtime::with_environment(Environment::new(), config, Arc::new(PluginRegistry::builtin()))
        .expect("failed to build runtime")
}

fn labels(runtime: &Runtime) -> Vec<String> {
    runtime
        .api_calls()
        .iter()
        .map(|c| c.script().label().to_string())
        .collect()
}

#[tokio::test]
async fn login_flow_binds_and_reuses_variables() {
    let server = TestServer::spawn().await;
    let mut runtime = runtime_for(&server);

    runtime
        .execute_source(&fixture("login_flow.json"))
        .await
        .expect("login flow should run");

    assert_eq!(labels(&runtime), ["login", "profile", "profile"]);
    assert!(
        runtime.api_calls().iter().all(|c| c.passed()),
        "unexpected failures: {:?}",
        runtime
            .api_calls()
            .iter()
            .flat_map(|c| c.failed_assertions())
            .collect::<Vec<_>>()
    );
    assert_eq!(runtime.binding("token"), Some(&json!("t-ann")));
    assert_eq!(runtime.binding("firstRole"), Some(&json!("admin")));
    assert!(runtime.has_template("api.template"));
    assert_eq!(runtime.report(), 0);

    let sent = runtime.api_calls()[1].request().unwrap();
    assert_eq!(sent.headers.get("Authorization").map(String::as_str), Some("Bearer t-ann"));
    assert_eq!(sent.headers.get("Accept").map(String::as_str), Some("application/json"));

    server.shutdown().await;
}

#[tokio::test]
async fn assertion_failures_are_counted_and_do_not_abort() {
    let server = TestServer::spawn().await;
    let mut runtime = runtime_for(&server);

    runtime
        .execute_source(&fixture("failures.json"))
        .await
        .expect("assertion failures must not abort the run");

    assert_eq!(labels(&runtime), ["wrong-status", "missing-text", "after"]);
    assert_eq!(runtime.failed_assertion_count(), 2);
    assert_eq!(runtime.binding(FAILED_ASSERTION_COUNT), Some(&json!(2)));
    assert!(runtime.api_calls()[2].passed());
    assert_eq!(runtime.report(), 2);

    runtime.reset();
    assert_eq!(runtime.report(), 1);
    assert_eq!(runtime.failed_assertion_count(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn conditions_and_preconditions_gate_requests() {
    let server = TestServer::spawn().await;
    let mut runtime = runtime_for(&server);

    runtime
        .execute_source(&fixture("conditional.json"))
        .await
        .expect("conditional scripts should run");

    assert_eq!(labels(&runtime), ["guarded", "listed"]);
    let guarded = &runtime.api_calls()[0];
    assert!(guarded.request().is_none());
    assert!(!guarded.passed());
    assert!(runtime.api_calls()[1].passed());
    assert_eq!(runtime.report(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn redirect_loads_yaml_source() {
    let server = TestServer::spawn().await;
    let mut runtime = runtime_for(&server);

    runtime
        .execute_source(&fixture("redirect.json"))
        .await
        .expect("redirect should run");

    assert_eq!(labels(&runtime), ["yaml-users", "after-redirect"]);
    assert_eq!(runtime.binding("second"), Some(&json!("bob")));
    assert_eq!(runtime.report(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn generated_bodies_set_content_type() {
    let server = TestServer::spawn().await;
    let mut runtime = runtime_for(&server);
    runtime.bind("n", 1).unwrap();

    runtime
        .execute(vec![json!({
            "name": "echo",
            "POST": "{base}/echo",
            "body": {"text": ["a={n}", "b"]},
            "bind": {"text": "echoed"},
            "assert": [
                {"status": 200},
                {"headers": {"X-Echo-Content-Type": "text/plain"}},
                {"contains": ["a=1", "b"]}
            ]
        })])
        .await
        .unwrap();

    assert_eq!(runtime.report(), 0);
    assert_eq!(runtime.binding("echoed"), Some(&json!("a=1\nb")));

    server.shutdown().await;
}

#[tokio::test]
async fn missing_script_reference_is_an_error() {
    let server = TestServer::spawn().await;
    let mut runtime = runtime_for(&server);

    let err = runtime
        .execute(vec![
            json!({"name": "first", "GET": "{base}/users", "assert": {"status": 200}}),
            json!("nope"),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::NoSuchScript(ref name) if name == "nope"));
    assert_eq!(labels(&runtime), ["first"]);

    server.shutdown().await;
}

#[tokio::test]
async fn unreachable_source_names_the_locator() {
    let server = TestServer::spawn().await;
    let mut runtime = runtime_for(&server);
    let locator = format!("{}/no-such-script.json", server.base_url);

    let err = runtime.execute_source(&locator).await.unwrap_err();
    match err {
        RuntimeError::Load { locator: failed, .. } => assert_eq!(failed, locator),
        other => panic!("expected load error, got {other:?}"),
    }

    server.shutdown().await;
}
