use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Json, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use mixgate_admin::SharedStateType;
use mixgate_projects::{AdmissionGate, GateError};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::context::RequestContext;
use crate::upstream::{EventForwarder, EventKind, ForwardError, Outbound};

/// Header carrying the project API key on every ingestion call.
pub const API_KEY_HEADER: &str = "mixer-key";

/// Everything the ingestion handlers need, built once in `main`.
pub struct IngestService {
    pub gate: AdmissionGate,
    pub forwarder: Arc<dyn EventForwarder>,
    /// Admin state; the ingestion path only records metrics into it.
    pub admin: SharedStateType,
}

type Shared = Arc<IngestService>;

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub distinct_id: String,
    pub event: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct PeopleRequest {
    pub distinct_id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct AliasRequest {
    pub distinct_id: String,
    pub alias: String,
}

/// Reasons an ingestion call did not reach the backend.
#[derive(Debug)]
enum IngestError {
    MissingKey,
    InvalidBody(&'static str),
    Gate(GateError),
    Forward(ForwardError),
}

impl IngestError {
    fn kind(&self) -> &'static str {
        match self {
            IngestError::MissingKey => "missing_key",
            IngestError::InvalidBody(_) => "invalid_body",
            IngestError::Gate(e) => e.kind(),
            IngestError::Forward(_) => "forward_failed",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            IngestError::MissingKey | IngestError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            IngestError::Gate(e) => match e {
                GateError::Rejected { .. } => StatusCode::TOO_MANY_REQUESTS,
                GateError::ProjectNotFound => StatusCode::NOT_FOUND,
                GateError::ProjectMisconfigured(_) => StatusCode::BAD_REQUEST,
                GateError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                GateError::StoreUnavailable(_) | GateError::Timeout(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            IngestError::Forward(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn message(&self) -> String {
        match self {
            IngestError::MissingKey => format!("missing {} header", API_KEY_HEADER),
            IngestError::InvalidBody(msg) => msg.to_string(),
            IngestError::Gate(GateError::Rejected { reason, retry_after }) => format!(
                "{}, retry in {} seconds",
                reason,
                retry_after_secs(*retry_after)
            ),
            // Internal details stay in the logs.
            IngestError::Gate(GateError::Configuration(_)) => "internal configuration error".into(),
            IngestError::Gate(e) => e.to_string(),
            IngestError::Forward(_) => "analytics backend rejected the event".into(),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (
            status,
            Json(json!({
                "status": "error",
                "message": self.message()
            })),
        )
            .into_response();

        if let IngestError::Gate(GateError::Rejected { retry_after, .. }) = &self {
            let secs = retry_after_secs(*retry_after).to_string();
            if let Ok(value) = HeaderValue::from_str(&secs) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

/// Whole seconds, rounded up and never zero.
fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

pub fn build_router(service: Shared) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/events/track", post(track))
        .route("/api/v1/people/set", post(people_set))
        .route("/api/v1/people/set-once", post(people_set_once))
        .route("/api/v1/people/increment", post(people_increment))
        .route("/api/v1/people/append", post(people_append))
        .route("/api/v1/people/union", post(people_union))
        .route("/api/v1/identity/alias", post(alias))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

/// Serve the ingestion API on `listen_addr` until the process shuts down.
pub async fn run_ingest_server(service: Shared, listen_addr: &str) -> anyhow::Result<()> {
    let app = build_router(service);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "ingestion server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn track(
    State(svc): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<TrackRequest>,
) -> Response {
    if body.event.trim().is_empty() {
        return ingest(&svc, &headers, Err(IngestError::InvalidBody("event must not be empty"))).await;
    }
    let outbound = Outbound::Track {
        distinct_id: body.distinct_id,
        event: body.event,
        properties: body.properties,
    };
    ingest(&svc, &headers, Ok(outbound)).await
}

fn people(kind: EventKind, body: PeopleRequest) -> Outbound {
    Outbound::People {
        kind,
        distinct_id: body.distinct_id,
        properties: body.properties,
    }
}

async fn people_set(
    State(svc): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<PeopleRequest>,
) -> Response {
    ingest(&svc, &headers, Ok(people(EventKind::PeopleSet, body))).await
}

async fn people_set_once(
    State(svc): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<PeopleRequest>,
) -> Response {
    ingest(&svc, &headers, Ok(people(EventKind::PeopleSetOnce, body))).await
}

async fn people_increment(
    State(svc): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<PeopleRequest>,
) -> Response {
    ingest(&svc, &headers, Ok(people(EventKind::PeopleIncrement, body))).await
}

async fn people_append(
    State(svc): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<PeopleRequest>,
) -> Response {
    ingest(&svc, &headers, Ok(people(EventKind::PeopleAppend, body))).await
}

async fn people_union(
    State(svc): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<PeopleRequest>,
) -> Response {
    ingest(&svc, &headers, Ok(people(EventKind::PeopleUnion, body))).await
}

async fn alias(
    State(svc): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<AliasRequest>,
) -> Response {
    if body.alias.trim().is_empty() {
        return ingest(&svc, &headers, Err(IngestError::InvalidBody("alias must not be empty"))).await;
    }
    let outbound = Outbound::Alias {
        distinct_id: body.distinct_id,
        alias: body.alias,
    };
    ingest(&svc, &headers, Ok(outbound)).await
}

/// Shared request path: validate, admit, forward, record.
async fn ingest(
    svc: &IngestService,
    headers: &HeaderMap,
    outbound: Result<Outbound, IngestError>,
) -> Response {
    let mut ctx = RequestContext::new();
    svc.admin.metrics.requests_total.inc();

    let result = process(svc, headers, outbound, &mut ctx).await;
    let response = match result {
        Ok(remaining) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "message": format!("{} accepted", ctx.kind.map(EventKind::as_str).unwrap_or("event")),
                "remaining": remaining
            })),
        )
            .into_response(),
        Err(e) => {
            ctx.refusal = Some(e.kind());
            e.into_response()
        }
    };

    ctx.status = response.status().as_u16();
    ctx.log_completion();
    response
}

async fn process(
    svc: &IngestService,
    headers: &HeaderMap,
    outbound: Result<Outbound, IngestError>,
    ctx: &mut RequestContext,
) -> Result<Option<u64>, IngestError> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(IngestError::MissingKey)?;

    let outbound = outbound?;
    if outbound_distinct_id(&outbound).trim().is_empty() {
        return Err(IngestError::InvalidBody("distinct_id must not be empty"));
    }
    ctx.kind = Some(outbound.kind());

    let metrics = &svc.admin.metrics;
    let started = Instant::now();
    let admitted = svc.gate.resolve_and_admit(api_key).await;
    metrics
        .admission_duration
        .observe(started.elapsed().as_secs_f64());

    let admitted = match admitted {
        Ok(admitted) => admitted,
        Err(e) => {
            match &e {
                GateError::Rejected { .. } => metrics.requests_rate_limited.inc(),
                other => metrics
                    .requests_refused
                    .with_label_values(&[other.kind()])
                    .inc(),
            }
            return Err(IngestError::Gate(e));
        }
    };
    metrics.requests_admitted.inc();
    ctx.project_id = Some(admitted.project.id);

    if let Err(e) = svc.forwarder.forward(&admitted.project, &outbound).await {
        warn!(project_id = %admitted.project.id, error = %e, "event forwarding failed");
        metrics.forward_failures.inc();
        return Err(IngestError::Forward(e));
    }
    metrics.events_forwarded.inc();

    Ok(admitted.remaining)
}

fn outbound_distinct_id(outbound: &Outbound) -> &str {
    match outbound {
        Outbound::Track { distinct_id, .. }
        | Outbound::People { distinct_id, .. }
        | Outbound::Alias { distinct_id, .. } => distinct_id,
    }
}
