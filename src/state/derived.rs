//! Pure derivations over a [`RoomSnapshot`], recomputed when the store changes.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use crate::state::{
    discussion::{OutlierCandidates, compute_outlier_candidates},
    room::{Participant, RoomSnapshot},
    voting::VotingPhase,
};

/// Parse a card as a number. `"?"`, empty or non-finite values are not numeric.
pub fn numeric_vote(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Members in join order.
pub fn participants(snapshot: &RoomSnapshot) -> Vec<Participant> {
    snapshot.participants.values().cloned().collect()
}

/// Members whose votes count, i.e. everyone except a non-participating admin.
pub fn eligible_participants(snapshot: &RoomSnapshot) -> Vec<Participant> {
    snapshot
        .participants
        .values()
        .filter(|participant| snapshot.room.counts_vote_of(&participant.id))
        .cloned()
        .collect()
}

/// Eligible members who have submitted a card, `"?"` included.
pub fn voted_count(snapshot: &RoomSnapshot) -> usize {
    snapshot
        .participants
        .values()
        .filter(|participant| snapshot.room.counts_vote_of(&participant.id))
        .filter(|participant| participant.has_voted())
        .count()
}

/// Mean of the eligible numeric votes rounded to one decimal, rendered like `"5.0"`.
///
/// `None` while cards are hidden or when nobody eligible voted a number.
pub fn average_vote(snapshot: &RoomSnapshot) -> Option<String> {
    if VotingPhase::of(&snapshot.room) != VotingPhase::Revealed {
        return None;
    }

    let values: Vec<f64> = snapshot
        .participants
        .values()
        .filter(|participant| snapshot.room.counts_vote_of(&participant.id))
        .filter_map(|participant| numeric_vote(participant.vote.as_deref()?))
        .collect();

    if values.is_empty() {
        return None;
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let rounded = (mean * 10.0).round() / 10.0;
    Some(format!("{rounded:.1}"))
}

/// Everything a view needs about the room, derived from one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSummary {
    /// Revision of the snapshot this was derived from.
    pub revision: u64,
    /// Current voting phase.
    pub phase: VotingPhase,
    /// Whether discussion mode is on.
    pub discussion_active: bool,
    /// Members in join order.
    pub participants: Vec<Participant>,
    /// Members whose votes count.
    pub eligible: Vec<Participant>,
    /// Eligible members with a card down.
    pub voted_count: usize,
    /// Rounded mean of numeric votes once revealed.
    pub average_vote: Option<String>,
    /// Outliers of the revealed round.
    pub outliers: OutlierCandidates,
}

impl RoomSummary {
    /// Derive the summary of `snapshot`.
    pub fn derive(snapshot: &RoomSnapshot) -> Self {
        Self {
            revision: snapshot.revision,
            phase: VotingPhase::of(&snapshot.room),
            discussion_active: snapshot.room.discussion_active,
            participants: participants(snapshot),
            eligible: eligible_participants(snapshot),
            voted_count: voted_count(snapshot),
            average_vote: average_vote(snapshot),
            outliers: compute_outlier_candidates(snapshot),
        }
    }

    /// Whether two summaries show the same thing, ignoring the revision they came from.
    pub fn same_view(&self, other: &RoomSummary) -> bool {
        self.phase == other.phase
            && self.discussion_active == other.discussion_active
            && self.participants == other.participants
            && self.eligible == other.eligible
            && self.voted_count == other.voted_count
            && self.average_vote == other.average_vote
            && self.outliers == other.outliers
    }
}

/// Memoizes a [`RoomSummary`] by snapshot revision.
#[derive(Debug, Default)]
pub struct SummaryCache {
    cached: Option<Arc<RoomSummary>>,
}

impl SummaryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Summary for `snapshot`, recomputed only when its revision moved.
    pub fn get(&mut self, snapshot: &RoomSnapshot) -> Arc<RoomSummary> {
        match &self.cached {
            Some(summary) if summary.revision == snapshot.revision => summary.clone(),
            _ => {
                let summary = Arc::new(RoomSummary::derive(snapshot));
                self.cached = Some(summary.clone());
                summary
            }
        }
    }
}

/// Keep a summary channel up to date with `snapshots`.
///
/// Receivers are only woken when the derived view actually differs. The task ends when the
/// snapshot source closes or every summary receiver is dropped.
pub fn spawn_summary_feed(
    mut snapshots: watch::Receiver<RoomSnapshot>,
) -> watch::Receiver<RoomSummary> {
    let initial = RoomSummary::derive(&snapshots.borrow_and_update());
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let next = RoomSummary::derive(&snapshots.borrow_and_update());
            let sent = tx.send_if_modified(|current| {
                if current.same_view(&next) {
                    return false;
                }
                *current = next;
                true
            });
            if sent {
                trace!("room summary changed");
            }
        }
    });

    rx
}
