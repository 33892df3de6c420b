//! HTTP client for the agent gateway.
//!
//! The gateway is an external service that starts sub-agents on request.
//! This crate owns discovery (env vars, then the `~/.clawdbot/clawdbot.json`
//! daemon config, then a loopback default), the `/tools/invoke` call shape,
//! and retry with exponential backoff on transient failures. Authentication
//! failures are never retried.
//!
//! ```no_run
//! use trak_gateway::{GatewayClient, GatewayConfig, SpawnSpec};
//!
//! let client = GatewayClient::new(GatewayConfig::discover())?;
//! client.probe()?;
//! let session = client.spawn_agent(&SpawnSpec {
//!     task: "Close task trak-0000aa when done".into(),
//!     label: "trak-trak-0000aa".into(),
//!     run_timeout_seconds: 900,
//!     model: None,
//! })?;
//! println!("spawned {session}");
//! # Ok::<(), trak_gateway::GatewayError>(())
//! ```

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

/// Default gateway address when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:18789";

/// Session key the orchestrator invokes tools under.
pub const MAIN_SESSION_KEY: &str = "agent:main:main";

/// Env var overriding the gateway base URL.
pub const ENV_URL: &str = "GATEWAY_URL";

/// Env var overriding the bearer token.
pub const ENV_TOKEN: &str = "GATEWAY_TOKEN";

/// Backoff schedule for transient failures, in seconds.
const RETRY_BACKOFF_SECS: [u64; 3] = [1, 2, 4];

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Could not reach the gateway, even after retries.
    #[error("gateway unreachable at {url}: {message}")]
    Unreachable {
        /// The base URL that was tried.
        url: String,
        /// The last transport failure.
        message: String,
    },

    /// The gateway refused the credentials (HTTP 401/403). Not retried.
    #[error("gateway authentication failed (HTTP {status})")]
    Auth {
        /// The status code returned.
        status: u16,
    },

    /// The gateway answered `ok: false`.
    #[error("gateway rejected the request: {message}")]
    Rejected {
        /// The gateway's error message.
        message: String,
    },

    /// The response did not match the protocol shape.
    #[error("invalid gateway response: {0}")]
    Protocol(String),

    /// Transport-level failure (also wraps client construction).
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Resolved gateway endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL, scheme included, no trailing slash.
    pub base_url: String,
    /// Bearer token, when one is configured.
    pub token: Option<String>,
}

/// Shape of `~/.clawdbot/clawdbot.json` (the daemon's own config file);
/// only the fields discovery needs.
#[derive(Debug, Deserialize)]
struct ClawdbotFile {
    #[serde(default)]
    gateway: ClawdbotGateway,
}

#[derive(Debug, Default, Deserialize)]
struct ClawdbotGateway {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    bind: Option<String>,
    #[serde(default)]
    auth: ClawdbotAuth,
    #[serde(default)]
    tls: ClawdbotTls,
}

#[derive(Debug, Default, Deserialize)]
struct ClawdbotAuth {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClawdbotTls {
    #[serde(default)]
    enabled: bool,
}

impl GatewayConfig {
    /// Discover the gateway: env vars first, then the clawdbot config
    /// file, then the loopback default with no token.
    #[must_use]
    pub fn discover() -> Self {
        let env_url = std::env::var(ENV_URL).ok().filter(|v| !v.is_empty());
        let env_token = std::env::var(ENV_TOKEN).ok().filter(|v| !v.is_empty());
        Self::discover_from(env_url, env_token, dirs::home_dir().as_deref())
    }

    /// Discovery with injected inputs (test seam).
    #[must_use]
    pub fn discover_from(
        env_url: Option<String>,
        env_token: Option<String>,
        home: Option<&Path>,
    ) -> Self {
        if let Some(url) = env_url {
            return Self {
                base_url: url.trim_end_matches('/').to_owned(),
                token: env_token,
            };
        }

        if let Some(home) = home {
            let path = home.join(".clawdbot/clawdbot.json");
            if let Some(mut config) = Self::from_clawdbot_file(&path) {
                if env_token.is_some() {
                    config.token = env_token;
                }
                return config;
            }
        }

        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            token: env_token,
        }
    }

    fn from_clawdbot_file(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        let parsed: ClawdbotFile = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable clawdbot config ignored");
                return None;
            }
        };
        let gw = parsed.gateway;
        let host = resolve_bind(gw.bind.as_deref());
        let port = gw.port.unwrap_or(18789);
        let scheme = if gw.tls.enabled { "https" } else { "http" };
        Some(Self {
            base_url: format!("{scheme}://{host}:{port}"),
            token: gw.auth.token,
        })
    }
}

/// Map a configured bind address to something dialable from this host.
fn resolve_bind(bind: Option<&str>) -> String {
    match bind {
        Some("tailnet") => tailnet_ip().unwrap_or_else(|| "127.0.0.1".to_owned()),
        // Wildcard binds collapse to loopback.
        None | Some("" | "0.0.0.0" | "::") => "127.0.0.1".to_owned(),
        Some(host) => host.to_owned(),
    }
}

/// Best-effort tailnet address lookup via the tailscale CLI.
fn tailnet_ip() -> Option<String> {
    let output = Command::new("tailscale").args(["ip", "-4"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let ip = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()?
        .trim()
        .to_owned();
    (!ip.is_empty()).then_some(ip)
}

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<InvokeError>,
}

#[derive(Debug, Deserialize)]
struct InvokeError {
    #[serde(default)]
    message: String,
}

/// Arguments for [`GatewayClient::spawn_agent`].
#[derive(Clone, Debug)]
pub struct SpawnSpec {
    /// The instruction text handed to the spawned agent.
    pub task: String,
    /// Session label (`trak-<task-id>`).
    pub label: String,
    /// Run-time limit enforced by the gateway.
    pub run_timeout_seconds: u64,
    /// Model override, when the caller picked one.
    pub model: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Blocking client for one gateway endpoint.
#[derive(Debug)]
pub struct GatewayClient {
    http: reqwest::blocking::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    /// Build a client for `config`.
    ///
    /// # Errors
    /// Client construction failures.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Invoke one gateway tool.
    ///
    /// Transient failures (connect errors, timeouts, 5xx) retry on a
    /// 1s/2s/4s backoff; 401/403 fail immediately.
    ///
    /// # Errors
    /// [`GatewayError`] as described per variant.
    pub fn invoke(
        &self,
        tool: &str,
        args: Value,
        session_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}/tools/invoke", self.config.base_url);
        let mut body = json!({"tool": tool, "args": args});
        if let Some(key) = session_key {
            body["sessionKey"] = json!(key);
        }

        let mut last_transport = String::new();
        for (attempt, backoff) in RETRY_BACKOFF_SECS.iter().copied().enumerate() {
            match self.send_once(&url, &body) {
                Ok(response) => return finish(response),
                Err(SendError::Fatal(e)) => return Err(e),
                Err(SendError::Transient(message)) => {
                    debug!(tool, attempt, backoff, %message, "transient gateway failure");
                    last_transport = message;
                    std::thread::sleep(Duration::from_secs(backoff));
                }
            }
        }
        // One final try after the last backoff.
        match self.send_once(&url, &body) {
            Ok(response) => finish(response),
            Err(SendError::Fatal(e)) => Err(e),
            Err(SendError::Transient(message)) => Err(GatewayError::Unreachable {
                url: self.config.base_url.clone(),
                message: if message.is_empty() { last_transport } else { message },
            }),
        }
    }

    /// Cheap reachability check via `sessions_list`.
    ///
    /// # Errors
    /// Whatever [`Self::invoke`] surfaces.
    pub fn probe(&self) -> Result<(), GatewayError> {
        self.invoke("sessions_list", json!({}), None).map(|_| ())
    }

    /// Spawn a sub-agent; returns the child session key.
    ///
    /// # Errors
    /// Whatever [`Self::invoke`] surfaces, plus a protocol error when the
    /// response carries no session key.
    pub fn spawn_agent(&self, spec: &SpawnSpec) -> Result<String, GatewayError> {
        let mut args = json!({
            "task": spec.task,
            "label": spec.label,
            "cleanup": "delete",
            "runTimeoutSeconds": spec.run_timeout_seconds,
        });
        if let Some(model) = &spec.model {
            args["model"] = json!(model);
        }
        let result = self.invoke("sessions_spawn", args, Some(MAIN_SESSION_KEY))?;
        session_key_from(&result)
            .ok_or_else(|| GatewayError::Protocol(format!("no session key in {result}")))
    }

    fn send_once(&self, url: &str, body: &Value) -> Result<InvokeResponse, SendError> {
        let mut request = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().map_err(|e| {
            if e.is_connect() || e.is_timeout() || e.is_request() {
                SendError::Transient(e.to_string())
            } else {
                SendError::Fatal(e.into())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SendError::Fatal(GatewayError::Auth { status: status.as_u16() }));
        }
        if status.is_server_error() {
            return Err(SendError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(SendError::Fatal(GatewayError::Protocol(format!(
                "unexpected HTTP {status}"
            ))));
        }
        response
            .json::<InvokeResponse>()
            .map_err(|e| SendError::Fatal(GatewayError::Protocol(e.to_string())))
    }
}

enum SendError {
    Transient(String),
    Fatal(GatewayError),
}

fn finish(response: InvokeResponse) -> Result<Value, GatewayError> {
    if response.ok {
        Ok(response.result.unwrap_or(Value::Null))
    } else {
        Err(GatewayError::Rejected {
            message: response
                .error
                .map_or_else(|| "unspecified error".to_owned(), |e| e.message),
        })
    }
}

/// Pull the child session key out of a `sessions_spawn` result.
fn session_key_from(result: &Value) -> Option<String> {
    if let Some(s) = result.as_str() {
        return Some(s.to_owned());
    }
    for key in ["sessionKey", "session_key"] {
        if let Some(s) = result.get(key).and_then(Value::as_str) {
            return Some(s.to_owned());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
