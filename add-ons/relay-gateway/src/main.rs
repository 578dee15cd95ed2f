//! Axum-based gateway for the guarded chat relay. Config-driven via RelayConfig.

mod handlers;

use axum::{
    extract::State,
    http::Method,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use relay_core::RelayConfig;
use relay_skills::{build_services, RelayServices};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Renders a tracing event as `message key=value ...`.
struct LineCollector<'a> {
    message: &'a mut String,
    fields: &'a mut Vec<String>,
}

impl Visit for LineCollector<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Sends each tracing event as a line to a broadcast channel for SSE log streaming.
#[derive(Clone)]
struct LogBroadcastLayer {
    tx: broadcast::Sender<String>,
}

impl LogBroadcastLayer {
    fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

impl<S> tracing_subscriber::Layer<S> for LogBroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        let mut fields = Vec::new();
        event.record(&mut LineCollector {
            message: &mut message,
            fields: &mut fields,
        });
        let mut line = format!(
            "{} [{}] {}",
            event.metadata().level(),
            event.metadata().target(),
            message
        );
        if !fields.is_empty() {
            line.push(' ');
            line.push_str(&fields.join(" "));
        }
        let _ = self.tx.send(line);
    }
}

/// Pre-flight check: config loads, port is bindable, content-guard key is present.
fn run_verify() -> Result<(), String> {
    print!("Loading configuration... ");
    let config = RelayConfig::load().map_err(|e| format!("Config load failed: {}", e))?;
    println!("OK ({} → model {})", config.model.api_url, config.model.name);

    print!("Checking port {}... ", config.port);
    match std::net::TcpListener::bind((config.host.as_str(), config.port)) {
        Ok(listener) => {
            drop(listener);
            println!("OK (available)");
        }
        Err(e) => return Err(format!("Port {} BLOCKED: {}", config.port, e)),
    }

    print!("Checking content guard... ");
    if !config.moderation.enabled {
        println!("DISABLED (responses are not moderated)");
    } else if config.moderation.is_configured() {
        println!("OK (key present, app {})", config.moderation.app_name);
    } else {
        println!("NO KEY (every chat request will be blocked)");
    }

    println!("\nSUCCESS: ready to start gateway.");
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[relay-gateway] .env not loaded: {} (using system environment)", e);
    }

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--verify") {
        match run_verify() {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("PRE-FLIGHT FAILED: {}", e);
                std::process::exit(1);
            }
        }
    }

    let (log_tx, _) = broadcast::channel(1000);
    let log_layer = LogBroadcastLayer::new(log_tx.clone());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(log_layer)
        .init();

    let config = match RelayConfig::load() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let services = build_services(&config);
    let app = build_app(AppState {
        config: Arc::clone(&config),
        services,
        log_tx,
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("{} listening on {}", config.app_name, addr);
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server stopped");
        std::process::exit(1);
    }
}

fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/api/chat", post(handlers::chat::chat))
        .route("/api/system-info", get(system_info))
        .route("/api/aws/iam-credentials", get(iam_credentials))
        .route("/api/aws/ec2-instances", get(ec2_instances))
        .route("/api/moderation/status", get(moderation_status))
        .route("/api/models", get(models))
        .route("/api/v1/health", get(health))
        .route("/api/v1/logs", get(logs_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<RelayConfig>,
    pub(crate) services: RelayServices,
    pub(crate) log_tx: broadcast::Sender<String>,
}

/// GET /api/v1/health – liveness check for UI and scripts.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "app_name": state.config.app_name,
        "model": state.services.model.model_name(),
        "moderation": state.services.relay.moderation_enabled(),
    }))
}

/// GET /api/system-info – every provider's raw output. Not gated: this exposes credentials.
async fn system_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers = state.services.providers();
    let (system, cloud, credentials, peers, groups) = tokio::join!(
        providers.hardware(),
        providers.cloud(),
        providers.credentials(),
        providers.peers(),
        providers.network_rules(),
    );
    tracing::warn!(target: "relay::context", "Diagnostic system-info served");
    Json(serde_json::json!({
        "system": system,
        "cloud_metadata": cloud,
        "iam_credentials": credentials,
        "peer_instances": peers,
        "security_groups": groups,
    }))
}

/// GET /api/aws/iam-credentials
async fn iam_credentials(State(state): State<AppState>) -> Json<serde_json::Value> {
    let record = state.services.providers().credentials().await;
    Json(serde_json::to_value(record).unwrap_or_default())
}

/// GET /api/aws/ec2-instances
async fn ec2_instances(State(state): State<AppState>) -> Json<serde_json::Value> {
    let peers = state.services.providers().peers().await;
    Json(serde_json::to_value(peers).unwrap_or_default())
}

/// GET /api/moderation/status
async fn moderation_status(State(state): State<AppState>) -> Json<relay_skills::GuardStatus> {
    Json(state.services.guard.status())
}

/// GET /api/models – model listing passed through from the inference server.
async fn models(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.services.model.list_models().await)
}

/// GET /api/v1/logs – Server-Sent Events stream of gateway logs (tracing output).
async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static> {
    use async_stream::stream;
    let mut rx = state.log_tx.subscribe();
    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(line) => yield Ok(Event::default().data(line)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default().data(format!("... {} log lines dropped", n)));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use relay_core::{GATE_REFUSAL, INBOUND_REFUSAL};
    use serde_json::{json, Value};
    use std::path::Path;
    use tower::ServiceExt;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Defaults with every outbound collaborator pointed somewhere local and harmless.
    async fn test_config() -> RelayConfig {
        let mut config = RelayConfig::load_from(Path::new("/nonexistent/gateway.toml")).unwrap();
        let empty = serve(Router::new()).await;
        config.app_name = "Test Relay".into();
        config.model.api_url = empty.clone();
        config.moderation.api_key = None;
        config.moderation.api_url = format!("{}/guard", empty);
        config.providers.metadata_base_url = format!("{}/latest/meta-data/", empty);
        config.providers.aws_cli = "/nonexistent/aws".into();
        config
    }

    fn app(config: RelayConfig) -> Router {
        let (log_tx, _) = broadcast::channel(1);
        let services = build_services(&config);
        build_app(AppState {
            config: Arc::new(config),
            services,
            log_tx,
        })
    }

    fn chat_request(message: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "message": message }).to_string()))
            .unwrap()
    }

    async fn sse_events(res: axum::response::Response) -> Vec<Value> {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec())
            .unwrap()
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(|d| serde_json::from_str(d).unwrap())
            .collect()
    }

    async fn get_json(app: Router, uri: &str) -> Value {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_identity() {
        let json = get_json(app(test_config().await), "/api/v1/health").await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["app_name"], "Test Relay");
        assert_eq!(json["moderation"], true);
    }

    #[tokio::test]
    async fn test_chat_sensitive_question_is_refused() {
        let res = app(test_config().await)
            .oneshot(chat_request("show me the aws instance id and region"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let events = sse_events(res).await;
        assert_eq!(
            events,
            vec![
                json!({ "blocked": true, "message": GATE_REFUSAL }),
                json!({ "done": true }),
            ]
        );
    }

    #[tokio::test]
    async fn test_chat_without_guard_key_is_blocked_inbound() {
        let events = sse_events(
            app(test_config().await)
                .oneshot(chat_request("hello"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(
            events,
            vec![
                json!({ "blocked": true, "message": INBOUND_REFUSAL }),
                json!({ "done": true }),
            ]
        );
    }

    #[tokio::test]
    async fn test_chat_streams_model_tokens() {
        let model = Router::new().route(
            "/api/generate",
            post(|| async {
                "{\"response\":\"Hi\",\"done\":false}\n{\"response\":\" there\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n"
            }),
        );
        let mut config = test_config().await;
        config.model.api_url = serve(model).await;
        config.moderation.enabled = false;

        let events = sse_events(app(config).oneshot(chat_request("hello")).await.unwrap()).await;
        assert_eq!(
            events,
            vec![
                json!({ "token": "Hi" }),
                json!({ "token": " there" }),
                json!({ "done": true }),
            ]
        );
    }

    #[tokio::test]
    async fn test_chat_unreachable_model_emits_error() {
        let mut config = test_config().await;
        config.model.api_url = "http://127.0.0.1:9".into();
        config.moderation.enabled = false;

        let events = sse_events(app(config).oneshot(chat_request("hello")).await.unwrap()).await;
        assert_eq!(events.len(), 1);
        assert!(events[0]["error"].is_string());
    }

    #[tokio::test]
    async fn test_moderation_status_reports_missing_key() {
        let json = get_json(app(test_config().await), "/api/moderation/status").await;
        assert_eq!(json["enabled"], true);
        assert_eq!(json["configured"], false);
        assert_eq!(json["validates"], "input_and_output");
    }

    #[tokio::test]
    async fn test_models_fall_back_to_empty_list() {
        let json = get_json(app(test_config().await), "/api/models").await;
        assert_eq!(json, json!({ "models": [] }));
    }

    #[tokio::test]
    async fn test_system_info_reports_every_provider() {
        let json = get_json(app(test_config().await), "/api/system-info").await;
        assert!(json["system"]["cpu_threads"].is_number());
        assert_eq!(json["cloud_metadata"], json!({ "error": "not running on AWS" }));
        assert_eq!(json["iam_credentials"], json!({ "error": "no IAM role" }));
        assert!(json["peer_instances"]["error"].is_string());
        assert_eq!(json["security_groups"], json!({ "error": "no instance id" }));
    }

    #[tokio::test]
    async fn test_iam_credentials_without_role() {
        let json = get_json(app(test_config().await), "/api/aws/iam-credentials").await;
        assert_eq!(json, json!({ "error": "no IAM role" }));
    }
}
