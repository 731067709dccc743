use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use porter_api::auth::{self, AppState, AppStateInner};
use porter_api::middleware::require_auth;
use porter_api::{chat, deliveries, tags};
use porter_db::Database;
use porter_gateway::connection;
use porter_gateway::dispatcher::Dispatcher;
use porter_types::api::Claims;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "porter=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PORTER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PORTER_DB_PATH").unwrap_or_else(|_| "porter.db".into());
    let host = std::env::var("PORTER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PORTER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let tagger_url = std::env::var("PORTER_TAGGER_URL").ok();

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        tagger_url,
    });

    let state = ServerState {
        dispatcher,
        db,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/credits", get(deliveries::get_credits))
        .route("/deliveries", get(deliveries::list_open))
        .route("/deliveries", post(deliveries::create_delivery))
        .route("/deliveries/cancel", post(deliveries::cancel_delivery))
        .route("/deliveries/user", get(deliveries::list_user_deliveries))
        .route("/deliveries/{delivery_id}/accept", post(deliveries::accept_delivery))
        .route("/deliveries/{delivery_id}/complete", post(deliveries::complete_delivery))
        .route("/deliveries/{delivery_id}/chat", get(chat::get_chat_room))
        .route("/deliveries/chat/{chat_room_id}/messages", get(chat::get_messages))
        .route("/tags/suggest", post(tags::suggest_tags))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Porter server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct WsAuth {
    token: String,
}

/// WebSocket upgrade. The client identifies itself with a `?token=` query
/// parameter; an invalid token is rejected before the upgrade completes.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(auth): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let claims = match decode::<Claims>(
        &auth.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => data.claims,
        Err(e) => {
            warn!("Gateway upgrade rejected: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.db, claims.sub, claims.name)
    })
    .into_response()
}
