use std::collections::HashMap;

use indexmap::IndexMap;

use crate::dao::models::{ParticipantRow, RoomRow};

/// Participant as seen by the local client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Client-generated identity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Submitted card, if any.
    pub vote: Option<String>,
    /// Last heartbeat in milliseconds since the epoch.
    pub last_seen: i64,
}

impl Participant {
    /// Whether a heartbeat stamped `last_seen` still counts as present at `now_ms`.
    ///
    /// `0` is the explicit departure marker and never counts.
    pub fn is_live_at(last_seen: i64, now_ms: i64, timeout_ms: i64) -> bool {
        last_seen > 0 && now_ms - last_seen <= timeout_ms
    }

    /// Whether this participant is a member of the room at `now_ms`.
    pub fn is_live(&self, now_ms: i64, timeout_ms: i64) -> bool {
        Self::is_live_at(self.last_seen, now_ms, timeout_ms)
    }

    /// Whether a card has been submitted.
    pub fn has_voted(&self) -> bool {
        self.vote.as_deref().is_some_and(|vote| !vote.is_empty())
    }
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Self {
            id: row.user_id,
            name: row.name,
            vote: row.vote.filter(|vote| !vote.is_empty()),
            last_seen: row.last_seen,
        }
    }
}

/// Room-level state shared by every member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Room {
    /// Room code.
    pub id: String,
    /// Identity of the admin, empty until assigned.
    pub admin_user_id: String,
    /// Verbatim PIN guarding admin re-entry.
    pub admin_pin: Option<String>,
    /// Whether the admin's vote counts in statistics.
    pub admin_participates: bool,
    /// Whether a voting round has been started.
    pub voting_started: bool,
    /// Whether votes are visible.
    pub revealed: bool,
    /// Whether discussion mode is on.
    pub discussion_active: bool,
    /// Highlighted low-estimate participant.
    pub discussion_min_voter: Option<String>,
    /// Highlighted high-estimate participant.
    pub discussion_max_voter: Option<String>,
}

impl Room {
    /// All-defaults room used before the row exists.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Whether an admin has been recorded.
    pub fn has_admin(&self) -> bool {
        !self.admin_user_id.is_empty()
    }

    /// Whether `user_id` is the recorded admin.
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.has_admin() && self.admin_user_id == user_id
    }

    /// Whether `user_id`'s vote counts toward statistics.
    pub fn counts_vote_of(&self, user_id: &str) -> bool {
        self.admin_participates || !self.is_admin(user_id)
    }
}

impl From<RoomRow> for Room {
    fn from(row: RoomRow) -> Self {
        Self {
            id: row.id,
            admin_user_id: row.admin_user_id,
            admin_pin: row.admin_pin,
            admin_participates: row.admin_participates,
            voting_started: row.voting_started,
            revealed: row.revealed,
            discussion_active: row.discussion_active,
            discussion_min_voter: row.discussion_min_voter,
            discussion_max_voter: row.discussion_max_voter,
        }
    }
}

impl From<Room> for RoomRow {
    fn from(room: Room) -> Self {
        Self {
            id: room.id,
            revealed: room.revealed,
            voting_started: room.voting_started,
            admin_user_id: room.admin_user_id,
            admin_pin: room.admin_pin,
            admin_participates: room.admin_participates,
            discussion_active: room.discussion_active,
            discussion_min_voter: room.discussion_min_voter,
            discussion_max_voter: room.discussion_max_voter,
        }
    }
}

/// Point-in-time view of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Room-level fields.
    pub room: Room,
    /// Members in join order, keyed by identity.
    pub participants: IndexMap<String, Participant>,
    /// Bumped on every accepted change; derivations memoize on it.
    pub revision: u64,
    /// Highest `last_seen` observed for participants that left or were evicted. Rows at or
    /// below it are echoes from before the departure.
    pub(crate) departed: HashMap<String, i64>,
}

impl RoomSnapshot {
    /// Empty snapshot for `room_id`.
    pub fn empty(room_id: impl Into<String>) -> Self {
        Self {
            room: Room::empty(room_id),
            participants: IndexMap::new(),
            revision: 0,
            departed: HashMap::new(),
        }
    }

    /// Look up a member by identity.
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.get(user_id)
    }

    /// Whether `user_id` is currently a member.
    pub fn contains(&self, user_id: &str) -> bool {
        self.participants.contains_key(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_boundaries() {
        assert!(Participant::is_live_at(1_000, 11_000, 10_000));
        assert!(!Participant::is_live_at(1_000, 11_001, 10_000));
        assert!(!Participant::is_live_at(0, 5, 10_000));
    }

    #[test]
    fn non_participating_admin_vote_does_not_count() {
        let mut room = Room::empty("R");
        room.admin_user_id = "admin".into();
        assert!(!room.counts_vote_of("admin"));
        assert!(room.counts_vote_of("guest"));

        room.admin_participates = true;
        assert!(room.counts_vote_of("admin"));
    }

    #[test]
    fn empty_vote_string_reads_as_absent() {
        let participant = Participant::from(ParticipantRow {
            room_id: "R".into(),
            user_id: "u".into(),
            name: "Ann".into(),
            vote: Some(String::new()),
            last_seen: 1,
        });
        assert_eq!(participant.vote, None);
        assert!(!participant.has_voted());
    }
}
