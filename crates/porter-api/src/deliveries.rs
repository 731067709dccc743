use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use porter_types::api::{
    AcceptResponse, Claims, CreateDeliveryRequest, CreditsResponse, DeliveriesResponse,
    StatusMessage,
};
use porter_types::events::GatewayEvent;
use porter_types::models::DeliveryStatus;

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn get_credits(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let credits = tokio::task::spawn_blocking(move || db.get_credits(&uid))
        .await
        .map_err(ApiError::join)??;

    Ok(Json(CreditsResponse { credits }))
}

/// The marketplace view: every open delivery except the caller's own.
pub async fn list_open(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.list_open_deliveries(&uid))
        .await
        .map_err(ApiError::join)??;

    Ok(Json(DeliveriesResponse {
        deliveries: rows.into_iter().map(|r| r.into_delivery(None)).collect(),
    }))
}

pub async fn create_delivery(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateDeliveryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let delivery_id = Uuid::new_v4();
    let title = req.title.unwrap_or_else(|| "Delivery Request".to_string());
    let reward = req.reward.unwrap_or(5);
    let pickup = req.pickup_location.unwrap_or_default();
    let dropoff = req.dropoff_location.unwrap_or_default();

    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let row = tokio::task::spawn_blocking(move || {
        db.create_open_delivery(&delivery_id.to_string(), &uid, &title, &pickup, &dropoff, reward)
    })
    .await
    .map_err(ApiError::join)??;

    info!("{} posted delivery {}", claims.name, delivery_id);

    // Marketplace refresh for everyone currently connected
    state.dispatcher.broadcast_all(GatewayEvent::NewDelivery {
        delivery: row.into_delivery(None),
    });

    Ok((
        StatusCode::CREATED,
        Json(StatusMessage {
            message: "Delivery requested".to_string(),
        }),
    ))
}

pub async fn cancel_delivery(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let row = tokio::task::spawn_blocking(move || db.cancel_open_delivery(&uid))
        .await
        .map_err(ApiError::join)??;

    let canceled = row.into_delivery(None);
    info!("{} canceled delivery {}", claims.name, canceled.id);

    state
        .dispatcher
        .broadcast_all(GatewayEvent::DeliveryCancelled {
            delivery_id: canceled.id,
        });

    Ok(Json(StatusMessage {
        message: "Delivery canceled".to_string(),
    }))
}

pub async fn accept_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let chat_room_id = Uuid::new_v4();

    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let row = tokio::task::spawn_blocking(move || {
        db.accept_delivery(&delivery_id.to_string(), &uid, &chat_room_id.to_string())
    })
    .await
    .map_err(ApiError::join)??;

    let accepted = row.into_delivery(None);
    info!(
        "{} accepted delivery {} from {}",
        claims.name, delivery_id, accepted.requester_name
    );

    // Both parties get steered into the new chat room
    let payload = GatewayEvent::DeliveryAccepted {
        chat_room_id,
        requester_id: accepted.requester_id,
        acceptor_id: claims.sub,
    };
    state
        .dispatcher
        .emit_to_user(accepted.requester_id, payload.clone())
        .await;
    state.dispatcher.emit_to_user(claims.sub, payload).await;

    Ok(Json(AcceptResponse {
        message: "Delivery accepted".to_string(),
        chat_room_id,
    }))
}

pub async fn complete_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let row = tokio::task::spawn_blocking(move || {
        db.complete_delivery(&delivery_id.to_string(), &uid)
    })
    .await
    .map_err(ApiError::join)??;

    let completed = row.into_delivery(None);
    info!("{} completed delivery {}", claims.name, delivery_id);

    // Marketplace-wide refresh, plus a targeted status event for the two
    // parties (their "my deliveries" views are the ones that must update)
    state
        .dispatcher
        .broadcast_all(GatewayEvent::DeliveryCompleted {
            delivery_id: completed.id,
        });

    let status_changed = GatewayEvent::DeliveryStatusChanged {
        delivery_id: completed.id,
        status: DeliveryStatus::Completed,
    };
    state
        .dispatcher
        .emit_to_user(completed.requester_id, status_changed.clone())
        .await;
    if let Some(acceptor_id) = completed.acceptor_id {
        state.dispatcher.emit_to_user(acceptor_id, status_changed).await;
    }

    Ok(Json(StatusMessage {
        message: "Delivery completed".to_string(),
    }))
}

/// Everything the caller is a party to, role-annotated, most recently
/// completed first.
pub async fn list_user_deliveries(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.list_deliveries_for_user(&uid))
        .await
        .map_err(ApiError::join)??;

    Ok(Json(DeliveriesResponse {
        deliveries: rows
            .into_iter()
            .map(|(row, role)| row.into_delivery(Some(role)))
            .collect(),
    }))
}
