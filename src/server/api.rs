use crate::cli::Args;
use crate::models::websocket::WireMessage;
use crate::room::{ RoomId, RoomRegistry };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::get,
    Json,
    Router,
    extract::{ State, Path },
    http::StatusCode,
};
use chrono::{ DateTime, Utc };
use serde::Serialize;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub started_at: String,
    pub rooms: usize,
}

#[derive(Serialize)]
pub struct RoomsResponse {
    pub rooms: Vec<RoomId>,
}

#[derive(Serialize)]
pub struct NewRoomResponse {
    pub room: RoomId,
}

#[derive(Clone)]
pub struct AppState {
    registry: Arc<RoomRegistry>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry, started_at: Utc::now() }
    }
}

type ApiError = (StatusCode, String);

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/rooms", get(list_rooms_handler))
        .route("/api/rooms/{room}/messages", get(room_messages_handler))
        .route("/api/new-room", get(new_room_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    http_port: u16,
    registry: Arc<RoomRegistry>,
    args: Args,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(AppState::new(registry));

    match (args.enable_tls, &args.tls_cert_path, &args.tls_key_path) {
        (true, Some(cert_path), Some(key_path)) => {
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                cert_path,
                key_path
            ).await?;

            tokio::spawn(async move {
                let result = axum_server::bind_rustls(addr, tls_config)
                    .serve(app.into_make_service())
                    .await;

                if let Err(e) = result {
                    error!("HTTPS server error: {}", e);
                }
            });

            info!("HTTPS server started with TLS enabled");
        }
        _ => {
            tokio::spawn(async move {
                match tokio::net::TcpListener::bind(addr).await {
                    Ok(listener) => {
                        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                            error!("HTTP server error: {}", e);
                        }
                    },
                    Err(e) => {
                        error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                    }
                }
            });

            info!("HTTP server started");
        }
    }

    Ok(())
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        started_at: state.started_at.to_rfc3339(),
        rooms: state.registry.active_rooms().await.len(),
    })
}

pub async fn list_rooms_handler(State(state): State<AppState>) -> Json<RoomsResponse> {
    Json(RoomsResponse {
        rooms: state.registry.active_rooms().await,
    })
}

/// Same `all` snapshot a newly connected peer receives.
pub async fn room_messages_handler(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<Json<WireMessage>, ApiError> {
    let room = RoomId::parse(&room).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let handle = state.registry
        .join(&room).await
        .map_err(|e| {
            error!("Failed to open room {}: {}", room, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    let messages = handle
        .snapshot().await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(WireMessage::All { messages }))
}

pub async fn new_room_handler() -> Json<NewRoomResponse> {
    Json(NewRoomResponse { room: RoomId::generate() })
}
