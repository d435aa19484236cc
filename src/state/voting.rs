use crate::{dao::models::RoomFields, state::room::Room};

/// Phases a voting round can be in. Discussion is an orthogonal flag on top of `Revealed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VotingPhase {
    /// No round has been started.
    Idle,
    /// Cards are being collected face down.
    Voting,
    /// Cards are visible to everyone.
    Revealed,
}

impl VotingPhase {
    /// Phase implied by the room flags.
    pub fn of(room: &Room) -> Self {
        match (room.voting_started, room.revealed) {
            (_, true) => VotingPhase::Revealed,
            (true, false) => VotingPhase::Voting,
            (false, false) => VotingPhase::Idle,
        }
    }

    /// Whether the strict rule would take a vote in this phase.
    ///
    /// The engine itself accepts votes in every phase; callers wanting the stricter policy
    /// check this first.
    pub fn accepts_votes(self) -> bool {
        matches!(self, VotingPhase::Voting)
    }

    /// Whether discussion mode can be meaningful in this phase.
    pub fn allows_discussion(self) -> bool {
        matches!(self, VotingPhase::Revealed)
    }
}

/// Admin commands driving the voting round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingEvent {
    /// Start (or restart) a round with a clean slate.
    StartVoting,
    /// Flip card visibility.
    ToggleReveal,
    /// Drop the round and return to idle.
    ResetVotes,
}

/// Outcome of applying a [`VotingEvent`] to the current room, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotingPlan {
    /// Phase before the command.
    pub from: VotingPhase,
    /// Phase after the command.
    pub to: VotingPhase,
    /// Event that produced this plan.
    pub event: VotingEvent,
    /// Room fields to write in one update.
    pub room: RoomFields,
    /// Whether every participant's vote must be cleared.
    pub clear_votes: bool,
}

/// Compute the room update for `event` from the current room state.
///
/// Every command is valid from every phase; admin checks are the caller's business.
pub fn plan(room: &Room, event: VotingEvent) -> VotingPlan {
    let from = VotingPhase::of(room);

    let (to, mut fields, clear_votes) = match (from, event) {
        (_, VotingEvent::StartVoting) => (
            VotingPhase::Voting,
            RoomFields {
                voting_started: Some(true),
                revealed: Some(false),
                ..RoomFields::default()
            }
            .merged(RoomFields::discussion_cleared()),
            true,
        ),
        (VotingPhase::Revealed, VotingEvent::ToggleReveal) => {
            let hidden = RoomFields {
                revealed: Some(false),
                ..RoomFields::default()
            };
            let next = if room.voting_started {
                VotingPhase::Voting
            } else {
                VotingPhase::Idle
            };
            (next, hidden, false)
        }
        (_, VotingEvent::ToggleReveal) => (
            VotingPhase::Revealed,
            RoomFields {
                revealed: Some(true),
                ..RoomFields::default()
            },
            false,
        ),
        (_, VotingEvent::ResetVotes) => (
            VotingPhase::Idle,
            RoomFields {
                voting_started: Some(false),
                revealed: Some(false),
                ..RoomFields::default()
            }
            .merged(RoomFields::discussion_cleared()),
            true,
        ),
    };

    // Hiding cards while discussing ends the discussion in the same write.
    if to != VotingPhase::Revealed && room.discussion_active && fields.discussion_active.is_none() {
        fields = fields.merged(RoomFields::discussion_cleared());
    }

    VotingPlan {
        from,
        to,
        event,
        room: fields,
        clear_votes,
    }
}
