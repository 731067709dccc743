use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Delivery, DeliveryStatus};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the session is registered
    Ready { user_id: Uuid, name: String },

    /// A new open delivery hit the marketplace
    #[serde(rename = "NEW_DELIVERY")]
    NewDelivery { delivery: Delivery },

    /// A delivery was accepted — sent to requester and acceptor so both
    /// can navigate to the chat room
    #[serde(rename = "DELIVERY_ACCEPTED")]
    DeliveryAccepted {
        #[serde(rename = "chatRoomId")]
        chat_room_id: Uuid,
        #[serde(rename = "requesterId")]
        requester_id: Uuid,
        #[serde(rename = "acceptorId")]
        acceptor_id: Uuid,
    },

    /// An open delivery was withdrawn — marketplace refresh
    #[serde(rename = "DELIVERY_CANCELLED")]
    DeliveryCancelled {
        #[serde(rename = "deliveryId")]
        delivery_id: Uuid,
    },

    /// A delivery finished — marketplace refresh
    #[serde(rename = "DELIVERY_COMPLETED")]
    DeliveryCompleted {
        #[serde(rename = "deliveryId")]
        delivery_id: Uuid,
    },

    /// Status change pushed to the two parties of a delivery, distinct from
    /// the marketplace-wide event
    #[serde(rename = "DELIVERY_STATUS_CHANGED")]
    DeliveryStatusChanged {
        #[serde(rename = "deliveryId")]
        delivery_id: Uuid,
        status: DeliveryStatus,
    },

    /// A chat message was appended to a room the session has joined
    #[serde(rename = "CHAT_MESSAGE")]
    ChatMessage {
        #[serde(rename = "chatRoomId")]
        chat_room_id: Uuid,
        sender: Uuid,
        #[serde(rename = "senderName")]
        sender_name: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
}

/// Commands sent FROM client TO server over WebSocket.
///
/// The sender identity is always taken from the authenticated connection,
/// never from the command payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Subscribe this session to a chat room's broadcasts
    #[serde(rename = "JOIN_ROOM")]
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: Uuid,
    },

    /// Append a message to a chat room
    #[serde(rename = "CHAT_MESSAGE")]
    ChatMessage {
        #[serde(rename = "chatRoomId")]
        chat_room_id: Uuid,
        text: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_command_wire_shape() {
        let raw = r#"{"type":"CHAT_MESSAGE","data":{"chatRoomId":"7f1a0b9e-0000-0000-0000-000000000001","text":"on my way"}}"#;
        let cmd: GatewayCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            GatewayCommand::ChatMessage { text, .. } => assert_eq!(text, "on my way"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn accepted_event_uses_camel_case_payload() {
        let event = GatewayEvent::DeliveryAccepted {
            chat_room_id: Uuid::nil(),
            requester_id: Uuid::nil(),
            acceptor_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"DELIVERY_ACCEPTED""#));
        assert!(json.contains("chatRoomId"));
        assert!(json.contains("requesterId"));
    }
}
