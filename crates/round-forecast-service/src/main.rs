mod upstream;

use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use parking_lot::Mutex;
use round_forecast_core::{
    decode_history_json, EnsembleRuleset, Forecast, ForecastEngine, HistoryEntry, OutcomeRecord,
    UpstreamSession,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use crate::upstream::{HttpUpstream, UpstreamFeed};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const DEFAULT_HISTORY_LIMIT: usize = 50;

type SharedEngine = Arc<Mutex<ForecastEngine>>;

#[derive(Debug, Clone)]
struct ServiceState {
    engine: SharedEngine,
    upstream: Option<Arc<dyn UpstreamFeed>>,
    upstream_timeout: Duration,
    operation_timeout: Duration,
    telemetry: Arc<ServiceTelemetry>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    request_id: String,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    request_id: String,
    error: ServiceErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceErrorPayload {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct ServiceFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    timeout_ms: u64,
    upstream_configured: bool,
    history_len: usize,
    telemetry: ServiceTelemetrySnapshot,
}

#[derive(Debug, Clone, Serialize)]
struct ForecastResponse {
    generated_at: String,
    stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_error: Option<String>,
    latest: Option<OutcomeRecord>,
    history_len: usize,
    forecast: Forecast,
}

#[derive(Debug, Clone, Serialize)]
struct IngestResponse {
    accepted: bool,
    history_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
struct HistoryResponse {
    history_len: usize,
    records: Vec<OutcomeRecord>,
}

#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetry {
    requests_total: AtomicU64,
    requests_success_total: AtomicU64,
    requests_failure_total: AtomicU64,
    timeout_total: AtomicU64,
    invalid_request_total: AtomicU64,
    upstream_failure_total: AtomicU64,
    stale_forecast_total: AtomicU64,
    internal_error_total: AtomicU64,
    other_error_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetrySnapshot {
    requests_total: u64,
    requests_success_total: u64,
    requests_failure_total: u64,
    timeout_total: u64,
    invalid_request_total: u64,
    upstream_failure_total: u64,
    stale_forecast_total: u64,
    internal_error_total: u64,
    other_error_total: u64,
}

#[derive(Debug, Parser)]
#[command(name = "round-forecast-service")]
#[command(about = "HTTP service for the round forecast ensemble")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
    /// Endpoint returning the latest settled session; forecasts use held history only when omitted.
    #[arg(long)]
    upstream_url: Option<String>,
    #[arg(long, default_value_t = 8000)]
    upstream_timeout_ms: u64,
    #[arg(long, default_value_t = 2500)]
    operation_timeout_ms: u64,
    /// History JSON file ingested before serving.
    #[arg(long)]
    seed_history: Option<PathBuf>,
    #[arg(long)]
    ruleset: Option<PathBuf>,
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ServiceError {
            service_contract_version: SERVICE_CONTRACT_VERSION,
            request_id: Ulid::new().to_string(),
            error: ServiceErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

impl ServiceState {
    fn new(
        engine: ForecastEngine,
        upstream: Option<Arc<dyn UpstreamFeed>>,
        upstream_timeout: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            upstream,
            upstream_timeout,
            operation_timeout,
            telemetry: Arc::new(ServiceTelemetry::default()),
        }
    }

    fn failure(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ServiceFailure {
        ServiceFailure {
            status,
            code,
            message: message.into(),
            details,
        }
    }

    fn invalid_json_with_telemetry(&self, rejection: &JsonRejection) -> ServiceFailure {
        self.telemetry.record_failure("invalid_json", false);
        Self::failure(
            rejection.status(),
            "invalid_json",
            rejection.body_text(),
            Some(json!({"rejection": rejection.to_string()})),
        )
    }

    fn invalid_query_with_telemetry(&self, rejection: &QueryRejection) -> ServiceFailure {
        self.telemetry.record_failure("invalid_query", false);
        Self::failure(rejection.status(), "invalid_query", rejection.body_text(), None)
    }

    fn classify_error(
        err: &anyhow::Error,
        default_status: StatusCode,
        default_code: &'static str,
    ) -> ServiceFailure {
        let message = err.to_string();
        let normalized = format!("{err:#}").to_ascii_lowercase();

        if normalized.starts_with("upstream") {
            return Self::failure(StatusCode::BAD_GATEWAY, "upstream_unavailable", message, None);
        }
        if normalized.contains("validation error") || normalized.contains(" must ") {
            return Self::failure(StatusCode::BAD_REQUEST, "invalid_request", message, None);
        }
        Self::failure(default_status, default_code, message, None)
    }

    /// Polls the feed on a blocking thread under the upstream timeout, before
    /// and apart from the operation timeout. `None` when no feed is configured.
    async fn poll_upstream(&self) -> Option<anyhow::Result<UpstreamSession>> {
        let feed = self.upstream.clone()?;
        let handle = tokio::task::spawn_blocking(move || feed.fetch_latest());
        let fetched = match tokio::time::timeout(self.upstream_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(anyhow!("upstream poll join failure: {err}")),
            Err(_) => Err(anyhow!(
                "upstream poll timed out after {} ms",
                self.upstream_timeout.as_millis()
            )),
        };
        Some(fetched)
    }

    async fn run_blocking<T, F>(
        &self,
        default_status: StatusCode,
        default_code: &'static str,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(SharedEngine) -> anyhow::Result<T> + Send + 'static,
    {
        self.telemetry.requests_total.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::clone(&self.engine);
        let handle = tokio::task::spawn_blocking(move || op(engine));
        let join_result =
            tokio::time::timeout(self.operation_timeout, handle).await.map_err(|_| {
                self.telemetry.record_failure(default_code, true);
                Self::failure(
                    default_status,
                    default_code,
                    format!(
                        "{operation_label} timed out after {} ms",
                        self.operation_timeout.as_millis()
                    ),
                    Some(json!({ "timeout_ms": self.operation_timeout.as_millis() })),
                )
            })?;

        let op_result = join_result.map_err(|err| {
            self.telemetry.record_failure("internal_error", false);
            Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{operation_label} join failure: {err}"),
                None,
            )
        })?;

        match op_result {
            Ok(value) => {
                self.telemetry.requests_success_total.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => {
                let failure = Self::classify_error(&err, default_status, default_code);
                warn!(code = failure.code, error = %failure.message, "{operation_label} failed");
                self.telemetry.record_failure(failure.code, false);
                Err(failure)
            }
        }
    }
}

impl ServiceTelemetry {
    fn record_failure(&self, code: &str, timeout: bool) {
        self.requests_failure_total.fetch_add(1, Ordering::Relaxed);
        if timeout {
            self.timeout_total.fetch_add(1, Ordering::Relaxed);
        }
        match code {
            "invalid_json" | "invalid_query" | "invalid_request" => {
                self.invalid_request_total.fetch_add(1, Ordering::Relaxed);
            }
            "upstream_unavailable" => {
                self.upstream_failure_total.fetch_add(1, Ordering::Relaxed);
            }
            "internal_error" => {
                self.internal_error_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.other_error_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn record_stale_forecast(&self) {
        self.upstream_failure_total.fetch_add(1, Ordering::Relaxed);
        self.stale_forecast_total.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServiceTelemetrySnapshot {
        ServiceTelemetrySnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success_total: self.requests_success_total.load(Ordering::Relaxed),
            requests_failure_total: self.requests_failure_total.load(Ordering::Relaxed),
            timeout_total: self.timeout_total.load(Ordering::Relaxed),
            invalid_request_total: self.invalid_request_total.load(Ordering::Relaxed),
            upstream_failure_total: self.upstream_failure_total.load(Ordering::Relaxed),
            stale_forecast_total: self.stale_forecast_total.load(Ordering::Relaxed),
            internal_error_total: self.internal_error_total.load(Ordering::Relaxed),
            other_error_total: self.other_error_total.load(Ordering::Relaxed),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        request_id: Ulid::new().to_string(),
        data,
    }
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed formatting current time")
}

fn load_ruleset(path: Option<&FsPath>) -> Result<EnsembleRuleset> {
    let Some(path) = path else {
        return Ok(EnsembleRuleset::v1());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading ruleset file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("ruleset file {} is not JSON", path.display()))?;
    EnsembleRuleset::from_json(&value).map_err(|err| anyhow!("{}: {err}", path.display()))
}

fn build_engine(args: &Args) -> Result<ForecastEngine> {
    let ruleset = load_ruleset(args.ruleset.as_deref())?;
    let mut engine = ForecastEngine::new(ruleset).map_err(|err| anyhow!(err.to_string()))?;

    if let Some(path) = &args.seed_history {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading seed history {}", path.display()))?;
        let inputs = decode_history_json(&raw).map_err(|err| anyhow!("{}: {err}", path.display()))?;
        let submitted = inputs.len();
        let accepted = engine.seed(inputs);
        info!(submitted, accepted, path = %path.display(), "seeded history");
    }
    Ok(engine)
}

/// Ingests the polled session, if any, then forecasts.
///
/// A failed poll falls back to the held history when the ensemble can still
/// engage; otherwise the upstream error is returned.
fn forecast_cycle(
    engine: &Mutex<ForecastEngine>,
    fetched: Option<Result<UpstreamSession>>,
    telemetry: &ServiceTelemetry,
) -> Result<ForecastResponse> {
    let mut engine = engine.lock();
    let upstream_error = match fetched {
        Some(Ok(session)) => {
            let round = session.phien;
            if !engine.ingest_outcome(session.into()) {
                info!(round = ?round, "upstream session not ingested");
            }
            None
        }
        Some(Err(err)) => {
            let held = engine.history().len();
            let minimum = engine.ruleset().min_ensemble_history;
            if held < minimum {
                return Err(anyhow!(
                    "upstream unavailable and only {held} of {minimum} records are held: {err:#}"
                ));
            }
            warn!(error = %err, held, "upstream unavailable, forecasting from held history");
            Some(format!("{err:#}"))
        }
        None => None,
    };

    let forecast = engine.predict_next();
    let stale = upstream_error.is_some();
    if stale {
        telemetry.record_stale_forecast();
    }

    Ok(ForecastResponse {
        generated_at: now_rfc3339()?,
        stale,
        upstream_error,
        latest: engine.history().latest().copied(),
        history_len: engine.history().len(),
        forecast: if stale { forecast.into_stale() } else { forecast },
    })
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/forecast", get(forecast))
        .route("/v1/outcomes", post(ingest_outcome))
        .route("/v1/history", get(history))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let engine = build_engine(&args)?;
    let upstream = args.upstream_url.as_ref().map(|url| {
        Arc::new(HttpUpstream::new(url.clone(), Duration::from_millis(args.upstream_timeout_ms)))
            as Arc<dyn UpstreamFeed>
    });
    let state = ServiceState::new(
        engine,
        upstream,
        Duration::from_millis(args.upstream_timeout_ms),
        Duration::from_millis(args.operation_timeout_ms),
    );

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, "round forecast service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    let timeout_ms = u64::try_from(state.operation_timeout.as_millis()).unwrap_or(u64::MAX);
    let history_len = state.engine.lock().history().len();
    Json(envelope(HealthResponse {
        status: "ok",
        timeout_ms,
        upstream_configured: state.upstream.is_some(),
        history_len,
        telemetry: state.telemetry.snapshot(),
    }))
}

async fn forecast(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<ForecastResponse>>, ServiceFailure> {
    let fetched = state.poll_upstream().await;
    let telemetry = Arc::clone(&state.telemetry);
    let response = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "forecast_failed",
            "forecast",
            move |engine| forecast_cycle(&engine, fetched, &telemetry),
        )
        .await?;
    Ok(Json(envelope(response)))
}

async fn ingest_outcome(
    State(state): State<ServiceState>,
    payload: Result<Json<HistoryEntry>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<IngestResponse>>, ServiceFailure> {
    let Json(entry) =
        payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let response = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ingest_failed",
            "ingest_outcome",
            move |engine| {
                let mut engine = engine.lock();
                let accepted = engine.ingest_outcome(entry.into());
                Ok(IngestResponse {
                    accepted,
                    history_len: engine.history().len(),
                })
            },
        )
        .await?;
    Ok(Json(envelope(response)))
}

async fn history(
    State(state): State<ServiceState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<ServiceEnvelope<HistoryResponse>>, ServiceFailure> {
    let Query(query) =
        query.map_err(|rejection| state.invalid_query_with_telemetry(&rejection))?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let response = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "history_failed",
            "history",
            move |engine| {
                let engine = engine.lock();
                Ok(HistoryResponse {
                    history_len: engine.history().len(),
                    records: engine.history().tail(limit),
                })
            },
        )
        .await?;
    Ok(Json(envelope(response)))
}
