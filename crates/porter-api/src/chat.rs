use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use porter_types::ServiceError;
use porter_types::api::{ChatRoomResponse, Claims, MessagesResponse};

use crate::auth::AppState;
use crate::error::ApiError;

/// Resolve the chat room attached to a delivery. Only the two parties of the
/// delivery may look it up.
pub async fn get_chat_room(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let caller = claims.sub.to_string();

    let room = tokio::task::spawn_blocking(move || {
        let parcel = db
            .get_delivery(&delivery_id.to_string())?
            .ok_or_else(|| ServiceError::NotFound("delivery not found".into()))?;

        if parcel.requester_id != caller && parcel.acceptor_id.as_deref() != Some(caller.as_str()) {
            return Err(ServiceError::Authorization(
                "you are not a party to this delivery".into(),
            ));
        }

        let room_id = parcel
            .chat_room_id
            .ok_or_else(|| ServiceError::NotFound("delivery has no chat room yet".into()))?;
        db.get_chat_room(&room_id)?
            .ok_or_else(|| ServiceError::NotFound("chat room not found".into()))
    })
    .await
    .map_err(ApiError::join)??;

    Ok(Json(ChatRoomResponse {
        chat_room: room.into_chat_room(),
    }))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let caller = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || {
        db.chat_history(&chat_room_id.to_string(), &caller)
    })
    .await
    .map_err(ApiError::join)??;

    Ok(Json(MessagesResponse {
        messages: rows.into_iter().map(|r| r.into_message()).collect(),
    }))
}
