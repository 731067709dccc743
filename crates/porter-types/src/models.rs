use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a delivery request.
///
/// `open → in-progress → completed` with a side exit `open → canceled`.
/// Both `completed` and `canceled` are terminal; there is no re-opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStatus {
    Open,
    InProgress,
    Completed,
    Canceled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in-progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// The caller's relationship to a delivery, attached when listing a user's
/// own deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Requester,
    Acceptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub enroll: String,
    pub name: String,
    pub phone: Option<String>,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
}

/// A parcel-delivery request posted by a requester, claimed by an acceptor
/// for a credit reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: Uuid,
    pub title: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub reward: i64,
    pub requester_id: Uuid,
    pub requester_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptor_id: Option<Uuid>,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_room_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Only present in `GET /deliveries/user` responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_role: Option<UserRole>,
}

/// Chat rooms pair exactly the requester and acceptor of one delivery.
/// The participant set is fixed at creation and the message log is
/// append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub participants: [Uuid; 2],
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender: Uuid,
    pub sender_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
