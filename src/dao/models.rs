use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Participant row as stored by the transport, one per (room, user) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ParticipantRow {
    /// Room the participant belongs to.
    pub room_id: String,
    /// Client-generated identity of the participant.
    pub user_id: String,
    /// Display name, not unique within a room.
    pub name: String,
    /// Card currently submitted, if any.
    #[serde(default)]
    pub vote: Option<String>,
    /// Last heartbeat in milliseconds since the epoch; `0` means the participant left.
    #[serde(default)]
    pub last_seen: i64,
}

/// Room row as stored by the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(default)]
pub struct RoomRow {
    /// Room code.
    pub id: String,
    /// Whether votes are currently visible to everyone.
    pub revealed: bool,
    /// Whether a voting round has been started.
    pub voting_started: bool,
    /// Identity of the room admin, empty until assigned.
    pub admin_user_id: String,
    /// Shared secret required to re-enter as admin.
    pub admin_pin: Option<String>,
    /// Whether the admin's own vote counts in statistics.
    pub admin_participates: bool,
    /// Whether discussion mode is on.
    pub discussion_active: bool,
    /// Participant highlighted for the lowest estimate.
    pub discussion_min_voter: Option<String>,
    /// Participant highlighted for the highest estimate.
    pub discussion_max_voter: Option<String>,
}

impl RoomRow {
    /// All-defaults row for a room that has not been written yet.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Partial update of a participant row. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ParticipantFields {
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New vote; `Some(None)` clears it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    #[schema(value_type = Option<String>)]
    pub vote: Option<Option<String>>,
    /// New heartbeat timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

impl ParticipantFields {
    /// Fields written when a participant enters a room.
    pub fn joined(name: impl Into<String>, now_ms: i64) -> Self {
        Self {
            name: Some(name.into()),
            vote: None,
            last_seen: Some(now_ms),
        }
    }

    /// Heartbeat refresh.
    pub fn heartbeat(now_ms: i64) -> Self {
        Self {
            last_seen: Some(now_ms),
            ..Self::default()
        }
    }

    /// Explicit departure marker.
    pub fn left() -> Self {
        Self::heartbeat(0)
    }

    /// Set or clear the vote.
    pub fn vote(vote: Option<String>) -> Self {
        Self {
            vote: Some(vote),
            ..Self::default()
        }
    }

    /// The writer's own vote, stamped with `last_seen` so echoes of older writes lose the merge.
    pub fn own_vote(vote: Option<String>, last_seen: i64) -> Self {
        Self {
            vote: Some(vote),
            last_seen: Some(last_seen),
            ..Self::default()
        }
    }

    /// Overwrite the provided fields of `row`.
    pub fn apply_to(&self, row: &mut ParticipantRow) {
        if let Some(name) = &self.name {
            row.name = name.clone();
        }
        if let Some(vote) = &self.vote {
            row.vote = vote.clone();
        }
        if let Some(last_seen) = self.last_seen {
            row.last_seen = last_seen;
        }
    }

    /// Materialise a fresh row from these fields, used by upserts creating the row.
    pub fn into_row(self, room_id: &str, user_id: &str) -> ParticipantRow {
        let mut row = ParticipantRow {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            name: String::new(),
            vote: None,
            last_seen: 0,
        };
        self.apply_to(&mut row);
        row
    }
}

/// Partial update of a room row. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RoomFields {
    /// New reveal flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed: Option<bool>,
    /// New voting flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_started: Option<bool>,
    /// New admin identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_user_id: Option<String>,
    /// New PIN; `Some(None)` removes PIN protection.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    #[schema(value_type = Option<String>)]
    pub admin_pin: Option<Option<String>>,
    /// New admin participation flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_participates: Option<bool>,
    /// New discussion flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discussion_active: Option<bool>,
    /// New low-estimate highlight.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    #[schema(value_type = Option<String>)]
    pub discussion_min_voter: Option<Option<String>>,
    /// New high-estimate highlight.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    #[schema(value_type = Option<String>)]
    pub discussion_max_voter: Option<Option<String>>,
}

impl RoomFields {
    /// Whether the update touches no field at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite the provided fields of `row`.
    pub fn apply_to(&self, row: &mut RoomRow) {
        if let Some(revealed) = self.revealed {
            row.revealed = revealed;
        }
        if let Some(voting_started) = self.voting_started {
            row.voting_started = voting_started;
        }
        if let Some(admin) = &self.admin_user_id {
            row.admin_user_id = admin.clone();
        }
        if let Some(pin) = &self.admin_pin {
            row.admin_pin = pin.clone();
        }
        if let Some(participates) = self.admin_participates {
            row.admin_participates = participates;
        }
        if let Some(active) = self.discussion_active {
            row.discussion_active = active;
        }
        if let Some(min) = &self.discussion_min_voter {
            row.discussion_min_voter = min.clone();
        }
        if let Some(max) = &self.discussion_max_voter {
            row.discussion_max_voter = max.clone();
        }
    }

    /// Fields that switch discussion mode off.
    pub fn discussion_cleared() -> Self {
        Self {
            discussion_active: Some(false),
            discussion_min_voter: Some(None),
            discussion_max_voter: Some(None),
            ..Self::default()
        }
    }

    /// Merge `other` on top of `self`; fields set in `other` win.
    pub fn merged(mut self, other: RoomFields) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            revealed,
            voting_started,
            admin_user_id,
            admin_pin,
            admin_participates,
            discussion_active,
            discussion_min_voter,
            discussion_max_voter
        );
        self
    }
}

/// Change notification delivered by a transport subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// A participant row was created or changed; carries the full new row.
    ParticipantUpserted {
        /// Row after the write.
        participant: ParticipantRow,
    },
    /// A participant row was deleted.
    ParticipantDeleted {
        /// Room the row belonged to.
        room_id: String,
        /// Identity of the removed participant.
        user_id: String,
    },
    /// The room row was created or changed; carries the full new row.
    RoomUpdated {
        /// Row after the write.
        room: RoomRow,
    },
}

impl RoomEvent {
    /// Room this event belongs to.
    pub fn room_id(&self) -> &str {
        match self {
            Self::ParticipantUpserted { participant } => &participant.room_id,
            Self::ParticipantDeleted { room_id, .. } => room_id,
            Self::RoomUpdated { room } => &room.id,
        }
    }

    /// Stable event name, used as the SSE `event:` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParticipantUpserted { .. } => "participant.upserted",
            Self::ParticipantDeleted { .. } => "participant.deleted",
            Self::RoomUpdated { .. } => "room.updated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_patch_distinguishes_clear_from_untouched() {
        let clear: ParticipantFields = serde_json::from_str(r#"{"vote": null}"#).unwrap();
        assert_eq!(clear.vote, Some(None));

        let untouched: ParticipantFields = serde_json::from_str(r#"{"last_seen": 5}"#).unwrap();
        assert_eq!(untouched.vote, None);
        assert_eq!(untouched.last_seen, Some(5));
    }

    #[test]
    fn room_patch_applies_only_set_fields() {
        let mut row = RoomRow::empty("ABCD1234");
        row.admin_user_id = "admin".into();
        row.discussion_active = true;
        row.discussion_min_voter = Some("a".into());

        RoomFields::discussion_cleared().apply_to(&mut row);

        assert_eq!(row.admin_user_id, "admin");
        assert!(!row.discussion_active);
        assert_eq!(row.discussion_min_voter, None);
    }

    #[test]
    fn merged_fields_prefer_later_values() {
        let first = RoomFields {
            revealed: Some(true),
            discussion_active: Some(true),
            ..RoomFields::default()
        };
        let merged = first.merged(RoomFields::discussion_cleared());
        assert_eq!(merged.revealed, Some(true));
        assert_eq!(merged.discussion_active, Some(false));
        assert_eq!(merged.discussion_max_voter, Some(None));
    }

    #[test]
    fn missing_last_seen_reads_as_departed() {
        let row: ParticipantRow =
            serde_json::from_str(r#"{"room_id": "r", "user_id": "u", "name": "Ann"}"#).unwrap();
        assert_eq!(row.last_seen, 0);
        assert_eq!(row.vote, None);
    }

    #[test]
    fn events_are_tagged() {
        let event = RoomEvent::ParticipantDeleted {
            room_id: "r".into(),
            user_id: "u".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "participant_deleted");
        assert_eq!(event.kind(), "participant.deleted");
    }
}
