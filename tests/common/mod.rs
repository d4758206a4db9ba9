//! Shared integration-test harness: runs the `testudo` binary and stands up
//! mock phase and advisory services on ephemeral ports.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Output;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use testudo::client::{PhaseClient, PhaseResponse, parse_response};
use testudo::config::{AssessmentConfig, FailurePolicy, RetryPolicy};
use testudo::dispatch::{PhaseEndpoint, ServiceDispatcher};
use testudo::error::ClientError;
use testudo::phase::Phase;
use testudo::target::Target;

// ============================================================================
// Binary
// ============================================================================

/// Runs the `testudo` binary.
pub struct TestudoProcess;

impl TestudoProcess {
    /// Runs a command to completion in a scratch directory.
    pub async fn run_in(dir: &Path, args: &[&str]) -> Output {
        Self::run_with_env(dir, args, &[]).await
    }

    /// Runs a command with extra environment variables.
    pub async fn run_with_env(dir: &Path, args: &[&str], env: &[(&str, &str)]) -> Output {
        let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_testudo"));
        cmd.args(args)
            .current_dir(dir)
            .env_remove("TESTUDO_CONFIG")
            .env_remove("TESTUDO_ADVISORY_API_KEY")
            .env("TESTUDO_LOG_LEVEL", "warn")
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }
        tokio::time::timeout(Duration::from_secs(30), cmd.output())
            .await
            .expect("testudo did not finish within 30s")
            .expect("failed to spawn testudo")
    }

    /// Runs a command that needs no services and no scratch directory.
    pub fn spawn_command(args: &[&str]) -> Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_testudo"))
            .args(args)
            .env_remove("TESTUDO_CONFIG")
            .output()
            .expect("failed to spawn testudo")
    }
}

// ============================================================================
// Mock HTTP services
// ============================================================================

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: Value,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Value>>>,
}

/// An HTTP service answering every POST on one path with a fixed reply.
pub struct MockService {
    /// Base URL, without the route path.
    pub url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockService {
    /// A phase service answering `POST /execute` with `200 body`.
    pub async fn phase(body: Value) -> Self {
        Self::start("/execute", StatusCode::OK, body).await
    }

    /// A phase service answering `POST /execute` with `status body`.
    pub async fn phase_with_status(status: StatusCode, body: Value) -> Self {
        Self::start("/execute", status, body).await
    }

    /// A service on an arbitrary route.
    pub async fn start(route: &str, status: StatusCode, body: Value) -> Self {
        let state = MockState {
            status,
            body,
            hits: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let hits = Arc::clone(&state.hits);
        let requests = Arc::clone(&state.requests);

        let app = Router::new().route(route, post(reply)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock service");
        let addr = listener.local_addr().expect("mock address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            url: format!("http://{addr}"),
            hits,
            requests,
        }
    }

    /// Number of requests received.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Request bodies received, in order.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("requests lock").clone()
    }
}

async fn reply(State(state): State<MockState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().expect("requests lock").push(body);
    (state.status, Json(state.body.clone()))
}

/// An endpoint nothing listens on.
pub fn unreachable_endpoint() -> String {
    "http://127.0.0.1:1".to_string()
}

// ============================================================================
// In-process stubs
// ============================================================================

/// Phase client answering from a fixed per-endpoint script.
#[derive(Default)]
pub struct ScriptedClient {
    replies: BTreeMap<String, Result<Value, ClientError>>,
    calls: Mutex<Vec<String>>,
    on_call: Option<Box<dyn Fn(&str) + Send + Sync>>,
    rendezvous: Option<(Vec<String>, Arc<tokio::sync::Barrier>)>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a reply body for `phase`.
    #[must_use]
    pub fn ok(mut self, phase: Phase, body: Value) -> Self {
        self.replies.insert(stub_endpoint(phase), Ok(body));
        self
    }

    /// Scripts an error for `phase`.
    #[must_use]
    pub fn err(mut self, phase: Phase, error: ClientError) -> Self {
        self.replies.insert(stub_endpoint(phase), Err(error));
        self
    }

    /// Runs `hook` with the endpoint on every call.
    #[must_use]
    pub fn on_call(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Box::new(hook));
        self
    }

    /// Holds every call to one of `phases` until all of them have been
    /// entered. Sequential dispatch of those phases never gets past the
    /// first one.
    #[must_use]
    pub fn rendezvous(mut self, phases: &[Phase]) -> Self {
        let endpoints = phases.iter().map(|&p| stub_endpoint(p)).collect();
        self.rendezvous = Some((endpoints, Arc::new(tokio::sync::Barrier::new(phases.len()))));
        self
    }

    /// Endpoints called, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl PhaseClient for ScriptedClient {
    async fn execute(
        &self,
        endpoint: &str,
        _target: &Target,
        _options: Option<&Value>,
    ) -> Result<PhaseResponse, ClientError> {
        self.calls.lock().expect("calls lock").push(endpoint.to_string());
        if let Some(hook) = &self.on_call {
            hook(endpoint);
        }
        if let Some((endpoints, barrier)) = &self.rendezvous {
            if endpoints.iter().any(|e| e == endpoint) {
                barrier.wait().await;
            }
        }
        match self.replies.get(endpoint) {
            Some(Ok(body)) => parse_response(body.to_string().as_bytes()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(ClientError::Transport(format!("no script for {endpoint}"))),
        }
    }
}

/// Endpoint name the stub dispatcher maps `phase` to.
pub fn stub_endpoint(phase: Phase) -> String {
    format!("stub://{}", phase.id())
}

/// A dispatcher over every phase, backed by `client`, without retries.
pub fn stub_dispatcher(client: Arc<dyn PhaseClient>) -> ServiceDispatcher {
    let endpoints = Phase::ALL
        .iter()
        .map(|&p| (p, PhaseEndpoint::new(stub_endpoint(p))))
        .collect();
    ServiceDispatcher::new(endpoints, RetryPolicy::none(), Duration::from_secs(5), client)
}

/// Default configuration with the given failure policy.
pub fn config_with_policy(policy: FailurePolicy) -> Arc<AssessmentConfig> {
    let mut config = AssessmentConfig::default();
    config.execution.on_failure = policy;
    config.advisory.enabled = false;
    Arc::new(config)
}

/// A successful phase reply with one finding.
pub fn ok_body() -> Value {
    serde_json::json!({"status": "ok", "findings": [{"port": 22}]})
}

/// Writes `contents` to `name` inside `dir` and returns the path.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}
