use rusqlite::{Connection, params};

use crate::Database;
use crate::models::{ChatRoomRow, MessageRow, ParcelRow, UserRow};
use porter_types::models::UserRole;
use porter_types::{Result, ServiceError};

/// Concurrency cap: an acceptor may hold at most this many in-progress
/// deliveries at once.
pub const MAX_ACTIVE_ACCEPTS: u32 = 5;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        enroll: &str,
        name: &str,
        phone: Option<&str>,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, enroll, name, phone, password) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, enroll, name, phone, password_hash],
            )
            .map_err(ServiceError::internal)?;
            Ok(())
        })
    }

    pub fn get_user_by_enroll(&self, enroll: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, enroll, password, name, phone, credits, created_at
                 FROM users WHERE enroll = ?1",
                [enroll],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn get_credits(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT credits FROM users WHERE id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| ServiceError::NotFound("user not found".into()))
        })
    }

    // -- Deliveries --

    /// Persist a new open delivery. Fails with `Conflict` while the requester
    /// already has an open or in-progress delivery, and with `Validation` on
    /// blank locations or a reward below 1.
    pub fn create_open_delivery(
        &self,
        id: &str,
        requester_id: &str,
        title: &str,
        pickup: &str,
        dropoff: &str,
        reward: i64,
    ) -> Result<ParcelRow> {
        if pickup.trim().is_empty() || dropoff.trim().is_empty() {
            return Err(ServiceError::Validation(
                "pickup and dropoff locations are required".into(),
            ));
        }
        if reward < 1 {
            return Err(ServiceError::Validation("reward must be at least 1".into()));
        }

        self.with_conn(|conn| {
            let active: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM parcels
                     WHERE requester_id = ?1 AND status IN ('open', 'in-progress')",
                    [requester_id],
                    |row| row.get(0),
                )
                .map_err(ServiceError::internal)?;
            if active > 0 {
                return Err(ServiceError::Conflict(
                    "you already have an active delivery request".into(),
                ));
            }

            conn.execute(
                "INSERT INTO parcels (id, title, pickup_location, dropoff_location, reward, requester_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, title, pickup, dropoff, reward, requester_id],
            )
            .map_err(ServiceError::internal)?;

            query_parcel(conn, id)?
                .ok_or_else(|| ServiceError::internal(anyhow::anyhow!("inserted parcel vanished")))
        })
    }

    /// All open deliveries except the caller's own, newest first.
    pub fn list_open_deliveries(&self, exclude_user: &str) -> Result<Vec<ParcelRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{PARCEL_SELECT} WHERE p.status = 'open' AND p.requester_id != ?1
                 ORDER BY p.created_at DESC, p.rowid DESC"
            );
            let mut stmt = conn.prepare(&sql).map_err(ServiceError::internal)?;
            let rows = stmt
                .query_map([exclude_user], parcel_from_row)
                .map_err(ServiceError::internal)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(ServiceError::internal)?;
            Ok(rows)
        })
    }

    pub fn get_delivery(&self, id: &str) -> Result<Option<ParcelRow>> {
        self.with_conn(|conn| query_parcel(conn, id))
    }

    /// Cancel the caller's open delivery. Only `open` is cancelable; an
    /// in-progress delivery has no cancellation path.
    pub fn cancel_open_delivery(&self, requester_id: &str) -> Result<ParcelRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(ServiceError::internal)?;

            let id: Option<String> = tx
                .query_row(
                    "SELECT id FROM parcels WHERE requester_id = ?1 AND status = 'open'",
                    [requester_id],
                    |row| row.get(0),
                )
                .optional()?;
            let id = id.ok_or_else(|| ServiceError::NotFound("no open delivery found".into()))?;

            let changed = tx
                .execute(
                    "UPDATE parcels SET status = 'canceled' WHERE id = ?1 AND status = 'open'",
                    [&id],
                )
                .map_err(ServiceError::internal)?;
            if changed == 0 {
                return Err(ServiceError::NotFound("no open delivery found".into()));
            }

            let canceled = query_parcel(&tx, &id)?
                .ok_or_else(|| ServiceError::Transaction("canceled delivery vanished".into()))?;
            tx.commit()
                .map_err(|e| ServiceError::Transaction(e.to_string()))?;
            Ok(canceled)
        })
    }

    /// Claim an open delivery and create its chat room in one transaction.
    ///
    /// The status transition is a conditional update keyed on the expected
    /// prior status: when two acceptors race, the second UPDATE touches zero
    /// rows and the claim fails, so exactly one acceptance commits.
    pub fn accept_delivery(
        &self,
        delivery_id: &str,
        acceptor_id: &str,
        room_id: &str,
    ) -> Result<ParcelRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(ServiceError::internal)?;

            let parcel = query_parcel(&tx, delivery_id)?
                .ok_or_else(|| ServiceError::NotFound("delivery not found or not open".into()))?;
            if parcel.status != "open" {
                return Err(ServiceError::NotFound("delivery not found or not open".into()));
            }
            if parcel.requester_id == acceptor_id {
                return Err(ServiceError::SelfAccept);
            }

            let in_progress: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM parcels WHERE acceptor_id = ?1 AND status = 'in-progress'",
                    [acceptor_id],
                    |row| row.get(0),
                )
                .map_err(ServiceError::internal)?;
            if in_progress >= i64::from(MAX_ACTIVE_ACCEPTS) {
                return Err(ServiceError::Capacity(MAX_ACTIVE_ACCEPTS));
            }

            let changed = tx
                .execute(
                    "UPDATE parcels SET acceptor_id = ?1, status = 'in-progress', chat_room_id = ?2
                     WHERE id = ?3 AND status = 'open'",
                    params![acceptor_id, room_id, delivery_id],
                )
                .map_err(ServiceError::internal)?;
            if changed == 0 {
                return Err(ServiceError::NotFound("delivery not found or not open".into()));
            }

            tx.execute(
                "INSERT INTO chat_rooms (id, parcel_id, participant_a, participant_b)
                 VALUES (?1, ?2, ?3, ?4)",
                params![room_id, delivery_id, parcel.requester_id, acceptor_id],
            )
            .map_err(ServiceError::internal)?;

            let accepted = query_parcel(&tx, delivery_id)?
                .ok_or_else(|| ServiceError::Transaction("accepted delivery vanished".into()))?;
            tx.commit()
                .map_err(|e| ServiceError::Transaction(e.to_string()))?;
            Ok(accepted)
        })
    }

    /// Mark an in-progress delivery completed and transfer the reward.
    ///
    /// The status transition and both balance updates live in one SQLite
    /// transaction: either everything commits or nothing does. Balances may
    /// go negative; the reward is a soft score, not escrowed money.
    pub fn complete_delivery(&self, delivery_id: &str, caller_id: &str) -> Result<ParcelRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(ServiceError::internal)?;

            let parcel = query_parcel(&tx, delivery_id)?
                .ok_or_else(|| ServiceError::NotFound("delivery not found or not in progress".into()))?;
            if parcel.status != "in-progress" {
                return Err(ServiceError::NotFound(
                    "delivery not found or not in progress".into(),
                ));
            }
            if parcel.requester_id != caller_id {
                return Err(ServiceError::Authorization(
                    "only the requester can complete a delivery".into(),
                ));
            }
            let acceptor_id = parcel
                .acceptor_id
                .clone()
                .ok_or_else(|| ServiceError::Transaction("in-progress delivery has no acceptor".into()))?;

            let changed = tx
                .execute(
                    "UPDATE parcels SET status = 'completed', completed_at = datetime('now')
                     WHERE id = ?1 AND status = 'in-progress'",
                    [delivery_id],
                )
                .map_err(ServiceError::internal)?;
            if changed == 0 {
                return Err(ServiceError::NotFound(
                    "delivery not found or not in progress".into(),
                ));
            }

            let debited = tx
                .execute(
                    "UPDATE users SET credits = credits - ?1 WHERE id = ?2",
                    params![parcel.reward, parcel.requester_id],
                )
                .map_err(|e| ServiceError::Transaction(e.to_string()))?;
            let credited = tx
                .execute(
                    "UPDATE users SET credits = credits + ?1 WHERE id = ?2",
                    params![parcel.reward, acceptor_id],
                )
                .map_err(|e| ServiceError::Transaction(e.to_string()))?;
            if debited != 1 || credited != 1 {
                return Err(ServiceError::Transaction(
                    "credit transfer touched an unexpected number of accounts".into(),
                ));
            }

            let completed = query_parcel(&tx, delivery_id)?
                .ok_or_else(|| ServiceError::Transaction("completed delivery vanished".into()))?;
            tx.commit()
                .map_err(|e| ServiceError::Transaction(e.to_string()))?;
            Ok(completed)
        })
    }

    /// Every delivery the user is a party to, with their role, most recently
    /// completed first; never-completed rows follow, newest first.
    pub fn list_deliveries_for_user(&self, user_id: &str) -> Result<Vec<(ParcelRow, UserRole)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{PARCEL_SELECT} WHERE p.requester_id = ?1 OR p.acceptor_id = ?1
                 ORDER BY (p.completed_at IS NULL), p.completed_at DESC,
                          p.created_at DESC, p.rowid DESC"
            );
            let mut stmt = conn.prepare(&sql).map_err(ServiceError::internal)?;
            let rows = stmt
                .query_map([user_id], parcel_from_row)
                .map_err(ServiceError::internal)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(ServiceError::internal)?;

            Ok(rows
                .into_iter()
                .map(|p| {
                    let role = if p.requester_id == user_id {
                        UserRole::Requester
                    } else {
                        UserRole::Acceptor
                    };
                    (p, role)
                })
                .collect())
        })
    }

    // -- Chat --

    pub fn get_chat_room(&self, room_id: &str) -> Result<Option<ChatRoomRow>> {
        self.with_conn(|conn| query_chat_room(conn, room_id))
    }

    /// Append a message to a room's log. The log is append-only; there is no
    /// edit or delete.
    pub fn append_chat_message(
        &self,
        message_id: &str,
        room_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<MessageRow> {
        if text.trim().is_empty() {
            return Err(ServiceError::Validation("message text is required".into()));
        }

        self.with_conn(|conn| {
            let room = query_chat_room(conn, room_id)?
                .ok_or_else(|| ServiceError::NotFound("chat room not found".into()))?;
            require_participant(&room, sender_id)?;

            conn.execute(
                "INSERT INTO chat_messages (id, room_id, sender_id, body) VALUES (?1, ?2, ?3, ?4)",
                params![message_id, room_id, sender_id, text],
            )
            .map_err(ServiceError::internal)?;

            query_message(conn, message_id)?
                .ok_or_else(|| ServiceError::internal(anyhow::anyhow!("inserted message vanished")))
        })
    }

    /// Messages in insertion order, sender display names resolved.
    pub fn chat_history(&self, room_id: &str, caller_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let room = query_chat_room(conn, room_id)?
                .ok_or_else(|| ServiceError::NotFound("chat room not found".into()))?;
            require_participant(&room, caller_id)?;

            let sql = format!("{MESSAGE_SELECT} WHERE m.room_id = ?1 ORDER BY m.created_at, m.rowid");
            let mut stmt = conn.prepare(&sql).map_err(ServiceError::internal)?;
            let rows = stmt
                .query_map([room_id], message_from_row)
                .map_err(ServiceError::internal)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(ServiceError::internal)?;
            Ok(rows)
        })
    }
}

fn require_participant(room: &ChatRoomRow, user_id: &str) -> Result<()> {
    if room.participant_a != user_id && room.participant_b != user_id {
        return Err(ServiceError::Authorization(
            "you are not a participant of this chat".into(),
        ));
    }
    Ok(())
}

const PARCEL_SELECT: &str = "SELECT p.id, p.title, p.pickup_location, p.dropoff_location, p.reward,
        p.requester_id, u.name, p.acceptor_id, p.status, p.chat_room_id,
        p.created_at, p.completed_at
 FROM parcels p JOIN users u ON p.requester_id = u.id";

const MESSAGE_SELECT: &str = "SELECT m.id, m.room_id, m.sender_id, u.name, m.body, m.created_at
 FROM chat_messages m JOIN users u ON m.sender_id = u.id";

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        enroll: row.get(1)?,
        password: row.get(2)?,
        name: row.get(3)?,
        phone: row.get(4)?,
        credits: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn parcel_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParcelRow> {
    Ok(ParcelRow {
        id: row.get(0)?,
        title: row.get(1)?,
        pickup_location: row.get(2)?,
        dropoff_location: row.get(3)?,
        reward: row.get(4)?,
        requester_id: row.get(5)?,
        requester_name: row.get(6)?,
        acceptor_id: row.get(7)?,
        status: row.get(8)?,
        chat_room_id: row.get(9)?,
        created_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        body: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn query_parcel(conn: &Connection, id: &str) -> Result<Option<ParcelRow>> {
    conn.query_row(&format!("{PARCEL_SELECT} WHERE p.id = ?1"), [id], parcel_from_row)
        .optional()
}

fn query_chat_room(conn: &Connection, id: &str) -> Result<Option<ChatRoomRow>> {
    conn.query_row(
        "SELECT id, parcel_id, participant_a, participant_b, created_at
         FROM chat_rooms WHERE id = ?1",
        [id],
        |row| {
            Ok(ChatRoomRow {
                id: row.get(0)?,
                parcel_id: row.get(1)?,
                participant_a: row.get(2)?,
                participant_b: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    conn.query_row(&format!("{MESSAGE_SELECT} WHERE m.id = ?1"), [id], message_from_row)
        .optional()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ServiceError::internal(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn mk_user(db: &Database, enroll: &str, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, enroll, name, None, "argon2-hash").unwrap();
        id
    }

    fn mk_open(db: &Database, requester: &str, reward: i64) -> ParcelRow {
        db.create_open_delivery(
            &Uuid::new_v4().to_string(),
            requester,
            "Delivery Request",
            "Library",
            "Block C",
            reward,
        )
        .unwrap()
    }

    fn accept(db: &Database, delivery: &str, acceptor: &str) -> Result<ParcelRow> {
        db.accept_delivery(delivery, acceptor, &Uuid::new_v4().to_string())
    }

    #[test]
    fn one_active_delivery_per_requester() {
        let db = test_db();
        let r = mk_user(&db, "21BCE100", "Riya");
        mk_open(&db, &r, 5);

        let second = db.create_open_delivery(
            &Uuid::new_v4().to_string(),
            &r,
            "Another",
            "Mess",
            "Block A",
            3,
        );
        assert!(matches!(second, Err(ServiceError::Conflict(_))));
    }

    #[test]
    fn create_validates_locations_and_reward() {
        let db = test_db();
        let r = mk_user(&db, "21BCE101", "Riya");

        let blank = db.create_open_delivery(
            &Uuid::new_v4().to_string(),
            &r,
            "T",
            "  ",
            "Block C",
            5,
        );
        assert!(matches!(blank, Err(ServiceError::Validation(_))));

        let zero = db.create_open_delivery(
            &Uuid::new_v4().to_string(),
            &r,
            "T",
            "Library",
            "Block C",
            0,
        );
        assert!(matches!(zero, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn cancel_is_not_repeatable() {
        let db = test_db();
        let r = mk_user(&db, "21BCE102", "Riya");
        mk_open(&db, &r, 5);

        let canceled = db.cancel_open_delivery(&r).unwrap();
        assert_eq!(canceled.status, "canceled");

        // Second cancel finds nothing; state unchanged
        assert!(matches!(
            db.cancel_open_delivery(&r),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn canceled_delivery_leaves_the_marketplace() {
        let db = test_db();
        let r = mk_user(&db, "21BCE103", "Riya");
        let a = mk_user(&db, "21BCE104", "Arjun");
        mk_open(&db, &r, 5);

        assert_eq!(db.list_open_deliveries(&a).unwrap().len(), 1);
        db.cancel_open_delivery(&r).unwrap();
        assert!(db.list_open_deliveries(&a).unwrap().is_empty());
    }

    #[test]
    fn list_open_excludes_own_requests() {
        let db = test_db();
        let r = mk_user(&db, "21BCE105", "Riya");
        let a = mk_user(&db, "21BCE106", "Arjun");
        mk_open(&db, &r, 5);

        assert!(db.list_open_deliveries(&r).unwrap().is_empty());
        let visible = db.list_open_deliveries(&a).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].requester_name, "Riya");
    }

    #[test]
    fn accept_claims_delivery_and_creates_chat_room() {
        let db = test_db();
        let r = mk_user(&db, "21BCE107", "Riya");
        let a = mk_user(&db, "21BCE108", "Arjun");
        let parcel = mk_open(&db, &r, 5);

        let room_id = Uuid::new_v4().to_string();
        let accepted = db.accept_delivery(&parcel.id, &a, &room_id).unwrap();

        assert_eq!(accepted.status, "in-progress");
        assert_eq!(accepted.acceptor_id.as_deref(), Some(a.as_str()));
        assert_eq!(accepted.chat_room_id.as_deref(), Some(room_id.as_str()));

        let room = db.get_chat_room(&room_id).unwrap().unwrap();
        assert_eq!(room.parcel_id, parcel.id);
        assert_eq!(room.participant_a, r);
        assert_eq!(room.participant_b, a);
    }

    #[test]
    fn requester_cannot_accept_own_delivery() {
        let db = test_db();
        let r = mk_user(&db, "21BCE109", "Riya");
        let parcel = mk_open(&db, &r, 5);

        assert!(matches!(
            accept(&db, &parcel.id, &r),
            Err(ServiceError::SelfAccept)
        ));
    }

    #[test]
    fn sixth_concurrent_accept_is_rejected() {
        let db = test_db();
        let a = mk_user(&db, "21BCE110", "Arjun");

        let mut parcels = Vec::new();
        for i in 0..6 {
            let r = mk_user(&db, &format!("21BCE2{:02}", i), &format!("Requester {}", i));
            parcels.push(mk_open(&db, &r, 2));
        }

        for parcel in &parcels[..5] {
            accept(&db, &parcel.id, &a).unwrap();
        }
        assert!(matches!(
            accept(&db, &parcels[5].id, &a),
            Err(ServiceError::Capacity(n)) if n == MAX_ACTIVE_ACCEPTS
        ));
    }

    #[test]
    fn already_claimed_delivery_cannot_be_accepted_again() {
        let db = test_db();
        let r = mk_user(&db, "21BCE111", "Riya");
        let a = mk_user(&db, "21BCE112", "Arjun");
        let b = mk_user(&db, "21BCE113", "Bela");
        let parcel = mk_open(&db, &r, 5);

        accept(&db, &parcel.id, &a).unwrap();
        assert!(matches!(
            accept(&db, &parcel.id, &b),
            Err(ServiceError::NotFound(_))
        ));

        let row = db.get_delivery(&parcel.id).unwrap().unwrap();
        assert_eq!(row.acceptor_id.as_deref(), Some(a.as_str()));
    }

    #[test]
    fn racing_accepts_commit_exactly_once() {
        let db = Arc::new(test_db());
        let r = mk_user(&db, "21BCE114", "Riya");
        let a = mk_user(&db, "21BCE115", "Arjun");
        let b = mk_user(&db, "21BCE116", "Bela");
        let parcel = mk_open(&db, &r, 5);

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|acceptor| {
                let db = db.clone();
                let id = parcel.id.clone();
                std::thread::spawn(move || accept(&db, &id, &acceptor))
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(wins, 1);

        let row = db.get_delivery(&parcel.id).unwrap().unwrap();
        assert_eq!(row.status, "in-progress");
        assert!(row.acceptor_id.is_some());
    }

    #[test]
    fn accept_rolls_back_when_room_insert_fails() {
        let db = test_db();
        let r = mk_user(&db, "21BCE117", "Riya");
        let a = mk_user(&db, "21BCE118", "Arjun");
        let b = mk_user(&db, "21BCE119", "Bela");
        let first = mk_open(&db, &r, 5);

        let room_id = Uuid::new_v4().to_string();
        db.accept_delivery(&first.id, &a, &room_id).unwrap();
        db.complete_delivery(&first.id, &r).unwrap();

        // Colliding room id makes the chat-room insert fail after the status
        // CAS succeeded; the whole transaction must roll back.
        let second = mk_open(&db, &r, 5);
        assert!(db.accept_delivery(&second.id, &b, &room_id).is_err());

        let row = db.get_delivery(&second.id).unwrap().unwrap();
        assert_eq!(row.status, "open");
        assert!(row.acceptor_id.is_none());
        assert!(row.chat_room_id.is_none());

        // And a clean accept still works afterwards
        accept(&db, &second.id, &b).unwrap();
    }

    #[test]
    fn complete_transfers_reward_and_frees_the_requester() {
        let db = test_db();
        let r = mk_user(&db, "21BCE120", "Riya");
        let a = mk_user(&db, "21BCE121", "Arjun");
        let parcel = mk_open(&db, &r, 5);
        accept(&db, &parcel.id, &a).unwrap();

        let completed = db.complete_delivery(&parcel.id, &r).unwrap();
        assert_eq!(completed.status, "completed");
        assert!(completed.completed_at.is_some());

        assert_eq!(db.get_credits(&r).unwrap(), 95);
        assert_eq!(db.get_credits(&a).unwrap(), 105);

        // Nothing open anymore, so cancel has nothing to find...
        assert!(matches!(
            db.cancel_open_delivery(&r),
            Err(ServiceError::NotFound(_))
        ));
        // ...but a brand-new request is no longer blocked
        mk_open(&db, &r, 3);
    }

    #[test]
    fn only_the_requester_may_complete() {
        let db = test_db();
        let r = mk_user(&db, "21BCE122", "Riya");
        let a = mk_user(&db, "21BCE123", "Arjun");
        let parcel = mk_open(&db, &r, 5);
        accept(&db, &parcel.id, &a).unwrap();

        assert!(matches!(
            db.complete_delivery(&parcel.id, &a),
            Err(ServiceError::Authorization(_))
        ));

        let row = db.get_delivery(&parcel.id).unwrap().unwrap();
        assert_eq!(row.status, "in-progress");
        assert_eq!(db.get_credits(&r).unwrap(), 100);
        assert_eq!(db.get_credits(&a).unwrap(), 100);
    }

    #[test]
    fn double_complete_transfers_exactly_once() {
        let db = test_db();
        let r = mk_user(&db, "21BCE124", "Riya");
        let a = mk_user(&db, "21BCE125", "Arjun");
        let parcel = mk_open(&db, &r, 5);
        accept(&db, &parcel.id, &a).unwrap();

        db.complete_delivery(&parcel.id, &r).unwrap();
        assert!(matches!(
            db.complete_delivery(&parcel.id, &r),
            Err(ServiceError::NotFound(_))
        ));

        assert_eq!(db.get_credits(&r).unwrap(), 95);
        assert_eq!(db.get_credits(&a).unwrap(), 105);
    }

    #[test]
    fn complete_rolls_back_when_transfer_fails() {
        let db = test_db();
        let r = mk_user(&db, "21BCE126", "Riya");
        let a = mk_user(&db, "21BCE127", "Arjun");
        let parcel = mk_open(&db, &r, 5);
        accept(&db, &parcel.id, &a).unwrap();

        // Force the balance update to fail after the status CAS committed
        // inside the transaction
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER credits_frozen BEFORE UPDATE OF credits ON users
                 BEGIN SELECT RAISE(ABORT, 'credits frozen'); END;",
            )
            .map_err(ServiceError::internal)
        })
        .unwrap();

        assert!(db.complete_delivery(&parcel.id, &r).is_err());

        let row = db.get_delivery(&parcel.id).unwrap().unwrap();
        assert_eq!(row.status, "in-progress");
        assert!(row.completed_at.is_none());
        assert_eq!(db.get_credits(&r).unwrap(), 100);
        assert_eq!(db.get_credits(&a).unwrap(), 100);

        db.with_conn(|conn| {
            conn.execute_batch("DROP TRIGGER credits_frozen;")
                .map_err(ServiceError::internal)
        })
        .unwrap();

        let completed = db.complete_delivery(&parcel.id, &r).unwrap();
        assert_eq!(completed.status, "completed");
        assert_eq!(db.get_credits(&r).unwrap(), 95);
    }

    #[test]
    fn balances_may_go_negative() {
        let db = test_db();
        let r = mk_user(&db, "21BCE128", "Riya");
        let a = mk_user(&db, "21BCE129", "Arjun");
        let parcel = db
            .create_open_delivery(
                &Uuid::new_v4().to_string(),
                &r,
                "Big ask",
                "Library",
                "Block C",
                250,
            )
            .unwrap();
        accept(&db, &parcel.id, &a).unwrap();
        db.complete_delivery(&parcel.id, &r).unwrap();

        assert_eq!(db.get_credits(&r).unwrap(), -150);
        assert_eq!(db.get_credits(&a).unwrap(), 350);
    }

    #[test]
    fn user_listing_annotates_roles_and_orders_completed_first() {
        let db = test_db();
        let r = mk_user(&db, "21BCE130", "Riya");
        let a = mk_user(&db, "21BCE131", "Arjun");

        // Arjun completes a delivery as acceptor
        let done = mk_open(&db, &r, 5);
        accept(&db, &done.id, &a).unwrap();
        db.complete_delivery(&done.id, &r).unwrap();

        // And has an open request of his own
        mk_open(&db, &a, 4);

        let listed = db.list_deliveries_for_user(&a).unwrap();
        assert_eq!(listed.len(), 2);

        let (first, first_role) = &listed[0];
        assert_eq!(first.status, "completed");
        assert_eq!(*first_role, UserRole::Acceptor);

        let (second, second_role) = &listed[1];
        assert_eq!(second.status, "open");
        assert_eq!(*second_role, UserRole::Requester);
    }

    #[test]
    fn chat_log_is_append_only_and_participant_scoped() {
        let db = test_db();
        let r = mk_user(&db, "21BCE132", "Riya");
        let a = mk_user(&db, "21BCE133", "Arjun");
        let outsider = mk_user(&db, "21BCE134", "Omar");
        let parcel = mk_open(&db, &r, 5);
        let room_id = Uuid::new_v4().to_string();
        db.accept_delivery(&parcel.id, &a, &room_id).unwrap();

        let stored = db
            .append_chat_message(&Uuid::new_v4().to_string(), &room_id, &a, "on my way")
            .unwrap();
        assert_eq!(stored.sender_name, "Arjun");
        assert_eq!(stored.body, "on my way");

        let history = db.chat_history(&room_id, &r).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "on my way");

        assert!(matches!(
            db.chat_history(&room_id, &outsider),
            Err(ServiceError::Authorization(_))
        ));
        assert!(matches!(
            db.append_chat_message(&Uuid::new_v4().to_string(), &room_id, &outsider, "hi"),
            Err(ServiceError::Authorization(_))
        ));
        assert!(matches!(
            db.append_chat_message(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &a,
                "hi"
            ),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            db.append_chat_message(&Uuid::new_v4().to_string(), &room_id, &a, "   "),
            Err(ServiceError::Validation(_))
        ));
    }
}
