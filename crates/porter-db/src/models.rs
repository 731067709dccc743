//! Database row types — these map directly to SQLite rows.
//! Distinct from porter-types API models to keep the DB layer independent.

use tracing::warn;
use uuid::Uuid;

use porter_types::models::{ChatMessage, ChatRoom, Delivery, DeliveryStatus, UserRole};

pub struct UserRow {
    pub id: String,
    pub enroll: String,
    pub password: String,
    pub name: String,
    pub phone: Option<String>,
    pub credits: i64,
    pub created_at: String,
}

pub struct ParcelRow {
    pub id: String,
    pub title: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub reward: i64,
    pub requester_id: String,
    pub requester_name: String,
    pub acceptor_id: Option<String>,
    pub status: String,
    pub chat_room_id: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

pub struct ChatRoomRow {
    pub id: String,
    pub parcel_id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub created_at: String,
}

impl ParcelRow {
    pub fn into_delivery(self, user_role: Option<UserRole>) -> Delivery {
        Delivery {
            id: parse_uuid(&self.id, "parcel id"),
            title: self.title,
            pickup_location: self.pickup_location,
            dropoff_location: self.dropoff_location,
            reward: self.reward,
            requester_id: parse_uuid(&self.requester_id, "requester_id"),
            requester_name: self.requester_name,
            acceptor_id: self.acceptor_id.as_deref().map(|s| parse_uuid(s, "acceptor_id")),
            status: DeliveryStatus::parse(&self.status).unwrap_or_else(|| {
                warn!("Corrupt parcel status '{}' on '{}'", self.status, self.id);
                DeliveryStatus::Canceled
            }),
            chat_room_id: self.chat_room_id.as_deref().map(|s| parse_uuid(s, "chat_room_id")),
            created_at: parse_ts(&self.created_at, &self.id),
            completed_at: self.completed_at.as_deref().map(|t| parse_ts(t, &self.id)),
            user_role,
        }
    }
}

impl ChatRoomRow {
    pub fn into_chat_room(self) -> ChatRoom {
        ChatRoom {
            id: parse_uuid(&self.id, "room id"),
            delivery_id: parse_uuid(&self.parcel_id, "parcel_id"),
            participants: [
                parse_uuid(&self.participant_a, "participant_a"),
                parse_uuid(&self.participant_b, "participant_b"),
            ],
            created_at: parse_ts(&self.created_at, &self.id),
        }
    }
}

impl MessageRow {
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: parse_uuid(&self.id, "message id"),
            room_id: parse_uuid(&self.room_id, "room_id"),
            sender: parse_uuid(&self.sender_id, "sender_id"),
            sender_name: self.sender_name,
            text: self.body,
            timestamp: parse_ts(&self.created_at, &self.id),
        }
    }
}

fn parse_uuid(raw: &str, field: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", field, raw, e);
        Uuid::default()
    })
}

fn parse_ts(raw: &str, row_id: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on row '{}': {}", raw, row_id, e);
            chrono::DateTime::default()
        })
}
