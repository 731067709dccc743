use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, ChatRoom, Delivery};

// -- JWT Claims --

/// JWT claims shared across porter-api (REST middleware) and porter-server
/// (WebSocket upgrade authentication). Canonical definition lives here in
/// porter-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub enroll: String,
    pub name: String,
    pub password: String,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub enroll: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
}

// -- Deliveries --

#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub credits: i64,
}

/// Body of `POST /deliveries`. Title and reward fall back to the historical
/// defaults ("Delivery Request", 5 credits) when omitted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateDeliveryRequest {
    pub title: Option<String>,
    pub pickup_location: Option<String>,
    pub dropoff_location: Option<String>,
    pub reward: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeliveriesResponse {
    pub deliveries: Vec<Delivery>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    pub message: String,
    pub chat_room_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub message: String,
}

// -- Chat --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomResponse {
    pub chat_room: ChatRoom,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
}

// -- Tags --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuggestTagsRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestTagsResponse {
    pub tags: Vec<String>,
}
