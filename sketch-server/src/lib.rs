use chrono::Utc;
use serde::Deserialize;
use sketch_core::SketchError;
use sketch_types::ParticipantId;
use std::sync::Arc;
use uuid::Uuid;
use warp::Filter;
use warp::http::StatusCode;

use crate::session_manager::SessionManager;
use crate::websocket::ConnectionManager;

pub mod change_feed;
pub mod config;
pub mod session_manager;
pub mod websocket;

#[derive(Deserialize)]
struct CreateSessionRequest {
    host_id: ParticipantId,
    display_name: String,
    cycles_total: Option<u32>,
    round_duration_seconds: Option<u32>,
}

#[derive(Deserialize)]
struct SnapshotQuery {
    viewer: Option<ParticipantId>,
}

pub fn create_routes(
    connection_manager: Arc<ConnectionManager>,
    session_manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let connection_manager_filter = warp::any().map({
        let connection_manager = connection_manager.clone();
        move || connection_manager.clone()
    });

    let session_manager_filter = warp::any().map({
        let session_manager = session_manager.clone();
        move || session_manager.clone()
    });

    // WebSocket endpoint
    let websocket = warp::path("ws")
        .and(warp::ws())
        .and(connection_manager_filter.clone())
        .and(session_manager_filter.clone())
        .map(|ws: warp::ws::Ws, conn_mgr, session_mgr| {
            ws.on_upgrade(move |socket| websocket::handle_connection(socket, conn_mgr, session_mgr))
        });

    // Health check endpoint
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", StatusCode::OK));

    // Room creation
    let create_session = warp::path("sessions")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<CreateSessionRequest>())
        .and(session_manager_filter.clone())
        .and_then(handle_create_session);

    // Session snapshot, word hidden unless the viewer is drawing
    let snapshot = warp::path!("sessions" / Uuid)
        .and(warp::get())
        .and(warp::query::<SnapshotQuery>())
        .and(session_manager_filter.clone())
        .and_then(handle_snapshot_request);

    // Durable canvas as a PPM image
    let canvas = warp::path!("sessions" / Uuid / "canvas")
        .and(warp::get())
        .and(session_manager_filter.clone())
        .and_then(handle_canvas_request);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST"]);

    websocket
        .or(health)
        .or(create_session)
        .or(snapshot)
        .or(canvas)
        .with(cors)
        .with(warp::log("sketch_server"))
}

fn error_reply(error: &SketchError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = match error {
        SketchError::DataAbsent(_) => StatusCode::NOT_FOUND,
        SketchError::InvalidInput(_) | SketchError::WrongPhase { .. } => StatusCode::BAD_REQUEST,
        SketchError::InvalidActor => StatusCode::FORBIDDEN,
        SketchError::ConflictLost => StatusCode::CONFLICT,
        SketchError::TransientIo(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": error.to_string() })),
        status,
    )
}

async fn handle_create_session(
    request: CreateSessionRequest,
    session_manager: Arc<SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    match session_manager
        .create_session(
            request.host_id,
            &request.display_name,
            request.cycles_total,
            request.round_duration_seconds,
            Utc::now(),
        )
        .await
    {
        Ok(session) => Ok(warp::reply::with_status(
            warp::reply::json(&session),
            StatusCode::CREATED,
        )),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_snapshot_request(
    session_id: Uuid,
    query: SnapshotQuery,
    session_manager: Arc<SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    // Anonymous viewers never match the drawer, so they get the masked word.
    let viewer = query.viewer.unwrap_or_else(Uuid::nil);

    match session_manager.snapshot(session_id, viewer, Utc::now()).await {
        Ok(snapshot) => Ok(warp::reply::with_status(
            warp::reply::json(&snapshot),
            StatusCode::OK,
        )),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_canvas_request(
    session_id: Uuid,
    session_manager: Arc<SessionManager>,
) -> Result<Box<dyn warp::Reply>, warp::Rejection> {
    match session_manager.render_canvas(session_id).await {
        Ok(raster) => Ok(Box::new(warp::reply::with_header(
            raster.to_ppm(),
            "content-type",
            "image/x-portable-pixmap",
        ))),
        Err(e) => Ok(Box::new(error_reply(&e))),
    }
}
