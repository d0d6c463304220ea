//! API Server (Cold Path)
//!
//! Control surface for the bridge:
//! - status, capabilities and the (empty) instrument-field schema
//! - security list and directory browsing over the reference-data cache
//! - market-data subscribe requests
//! - `/ws/market-data`: outbound frames as JSON text messages
//!
//! Business rejects map to 422, a pending subscription to 409 and session
//! failures to 503.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::cors::CorsLayer;
use tracing::Level;

use crate::core::market_data::{EventPublisher, OutboundFrame};
use crate::infrastructure::config::ApiConfig;
use crate::infrastructure::metrics::{MetricsCollector, MetricsSnapshot};
use crate::log_api;
use crate::market_data::{GatewayError, MarketDataGateway, MarketDataRequest, SubscribeOutcome};
use crate::refdata::{DirEntry, RefDataError, ReferenceDataCache, SecurityListRequest, SecurityRecord};
use crate::session::FixSession;

/// Features advertised to clients
pub const CAPABILITIES: [&str; 5] = [
    "SYNC_SNAPSHOT",
    "GET_TICKER_FIELDS",
    "SUBSCRIBE",
    "LIST_DIRECTORY",
    "PUB_ORDER_BOOK_INCREMENTAL",
];

/// Status DTO
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDto {
    pub module_name: String,
    pub endpoint_name: String,
    pub session_id: String,
    pub connection_state: String,
    pub logged_on: bool,
    pub uptime_seconds: u64,
    pub last_inbound_age_ms: u64,
    pub subscriptions: usize,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct ListDirectoryRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub outcome: SubscribeOutcome,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<FixSession>,
    pub refdata: Arc<ReferenceDataCache>,
    pub gateway: Arc<MarketDataGateway>,
    pub events: Arc<EventPublisher>,
    pub metrics: Arc<MetricsCollector>,
    pub config: ApiConfig,
    /// Fresh per process
    pub session_id: uuid::Uuid,
}

impl AppState {
    pub fn new(
        session: Arc<FixSession>,
        refdata: Arc<ReferenceDataCache>,
        gateway: Arc<MarketDataGateway>,
        metrics: Arc<MetricsCollector>,
        config: ApiConfig,
    ) -> Self {
        Self {
            events: Arc::clone(gateway.events()),
            session,
            refdata,
            gateway,
            metrics,
            config,
            session_id: uuid::Uuid::new_v4(),
        }
    }
}

/// Control-surface error
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    RefData(#[from] RefDataError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::RefData(e) if e.is_business_reject() => {
                (StatusCode::UNPROCESSABLE_ENTITY, "business_reject")
            }
            ApiError::RefData(_) => (StatusCode::SERVICE_UNAVAILABLE, "session_unavailable"),
            ApiError::Gateway(GatewayError::SubscriptionPending(_)) => {
                (StatusCode::CONFLICT, "subscription_pending")
            }
            ApiError::Gateway(GatewayError::Reject(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "business_reject")
            }
            ApiError::Gateway(GatewayError::Session(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "session_unavailable")
            }
            ApiError::Gateway(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        log_api!(Level::WARN, status = status.as_u16(), error = %self, "request failed");
        let body = serde_json::json!({ "error": kind, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Build the router; split out so tests can drive it without a socket
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/capabilities", get(get_capabilities))
        .route("/api/instrument-fields", get(get_instrument_fields))
        .route("/api/security-list", post(post_security_list))
        .route("/api/list-directory", post(post_list_directory))
        .route("/api/market-data-request", post(post_market_data_request))
        .route("/ws/market-data", get(market_data_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the API server
pub async fn start_server(state: AppState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log_api!(Level::INFO, %addr, "API server listening");
    axum::serve(listener, app).await
}

async fn get_status(State(state): State<AppState>) -> Json<StatusDto> {
    let metrics = state.metrics.snapshot();
    Json(StatusDto {
        module_name: state.config.module_name.clone(),
        endpoint_name: state.config.endpoint_name.clone(),
        session_id: state.session_id.to_string(),
        connection_state: format!("{:?}", state.session.state()),
        logged_on: metrics.logged_on,
        uptime_seconds: metrics.uptime_seconds,
        last_inbound_age_ms: state.metrics.inbound_age_ms(),
        subscriptions: state.gateway.subscription_count(),
        metrics,
    })
}

async fn get_capabilities() -> Json<Vec<&'static str>> {
    Json(CAPABILITIES.to_vec())
}

async fn get_instrument_fields() -> Json<Vec<String>> {
    Json(Vec::new())
}

async fn post_security_list(
    State(state): State<AppState>,
    Json(request): Json<SecurityListRequest>,
) -> Result<Json<Vec<SecurityRecord>>, ApiError> {
    let records = state.refdata.security_list(&request).await?;
    log_api!(Level::DEBUG, records = records.len(), "security list served");
    Ok(Json(records))
}

async fn post_list_directory(
    State(state): State<AppState>,
    Json(request): Json<ListDirectoryRequest>,
) -> Result<Json<Vec<DirEntry>>, ApiError> {
    Ok(Json(state.refdata.list_directory(&request.path).await?))
}

async fn post_market_data_request(
    State(state): State<AppState>,
    Json(request): Json<MarketDataRequest>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let outcome = state.gateway.subscribe(&request).await?;
    log_api!(Level::INFO, instrument = %request.instrument_id, ?outcome, "market data request handled");
    Ok(Json(SubscribeResponse { outcome }))
}

async fn market_data_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let frames = state.events.subscribe();
    ws.on_upgrade(move |socket| stream_frames(socket, frames))
}

/// Forward frames until the client goes away
async fn stream_frames(mut socket: WebSocket, mut frames: broadcast::Receiver<Arc<OutboundFrame>>) {
    log_api!(Level::INFO, "market data stream opened");
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let text = match serde_json::to_string(frame.as_ref()) {
                        Ok(text) => text,
                        Err(e) => {
                            log_api!(Level::WARN, error = %e, "frame not serializable");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log_api!(Level::WARN, skipped, "stream client lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    log_api!(Level::INFO, "market data stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::{MarketDataConfig, ReferenceDataConfig};
    use crate::test_utils::test_session;
    use axum::body::Body;
    use axum::http::Request;
    use bytes::Bytes;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;

    fn state() -> (AppState, UnboundedReceiver<Bytes>) {
        let (session, wire) = test_session();
        let metrics = Arc::new(MetricsCollector::new());
        let refdata = Arc::new(ReferenceDataCache::new(
            Arc::clone(&session),
            &ReferenceDataConfig::default(),
            Arc::clone(&metrics),
        ));
        let gateway = Arc::new(MarketDataGateway::new(
            Arc::clone(&session),
            MarketDataConfig::default(),
            Arc::new(EventPublisher::new(64)),
            Arc::clone(&metrics),
        ));
        let state = AppState::new(session, refdata, gateway, metrics, ApiConfig::default());
        (state, wire)
    }

    async fn call(state: AppState, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router(state).oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_and_capabilities() {
        let (state, _wire) = state();
        let session_id = state.session_id.to_string();

        let (status, body) = call(state.clone(), "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["moduleName"], "cts-fix-md");
        assert_eq!(body["sessionId"], session_id.as_str());
        assert_eq!(body["loggedOn"], false);
        assert_eq!(body["connectionState"], "Connected");

        let (_, body) = call(state.clone(), "GET", "/api/capabilities", None).await;
        assert_eq!(body.as_array().unwrap().len(), 5);
        assert!(body.as_array().unwrap().iter().any(|c| c == "LIST_DIRECTORY"));

        let (_, body) = call(state, "GET", "/api/instrument-fields", None).await;
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_directory_root_needs_no_lookup() {
        let (state, mut wire) = state();
        let (status, body) =
            call(state, "POST", "/api/list-directory", Some(serde_json::json!({ "path": "/" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["nodeName"], "FUT");
        assert_eq!(body[1]["nodeName"], "OPT");
        assert!(wire.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_business_rejects_map_to_422() {
        let (state, _wire) = state();

        let (status, body) = call(
            state.clone(),
            "POST",
            "/api/market-data-request",
            Some(serde_json::json!({ "instrumentId": "/FUT/CME/ES/1", "subscriptionRequestType": "9" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "business_reject");

        let (status, _) = call(
            state.clone(),
            "POST",
            "/api/list-directory",
            Some(serde_json::json!({ "path": "/FUT/CME/ES/Outright/202406/1/extra" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) =
            call(state, "POST", "/api/security-list", Some(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "SecurityType is required");
    }

    #[tokio::test]
    async fn test_session_failure_maps_to_503() {
        let (state, wire) = state();
        drop(wire);

        let (status, body) = call(
            state,
            "POST",
            "/api/security-list",
            Some(serde_json::json!({ "securityType": "FUT", "symbol": "ES" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "session_unavailable");
    }

    #[test]
    fn test_pending_maps_to_409() {
        let err = ApiError::from(GatewayError::SubscriptionPending("/FUT/CME/ES/1".into()));
        assert_eq!(err.classify(), (StatusCode::CONFLICT, "subscription_pending"));
        let fatal = ApiError::from(GatewayError::BusOverrun(3));
        assert_eq!(fatal.classify().0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
