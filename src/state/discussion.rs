use rand::{Rng, seq::IndexedRandom};

use crate::{
    dao::models::RoomFields,
    state::{derived::numeric_vote, room::RoomSnapshot, voting::VotingPhase},
};

/// Participants tied at the lowest and highest numeric estimate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutlierCandidates {
    /// Everyone holding the minimum, in join order.
    pub min_candidates: Vec<String>,
    /// Everyone holding the maximum, in join order.
    pub max_candidates: Vec<String>,
}

impl OutlierCandidates {
    /// Whether there is anyone to discuss with.
    pub fn is_empty(&self) -> bool {
        self.min_candidates.is_empty() && self.max_candidates.is_empty()
    }
}

/// Participants picked to explain their estimate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscussionPick {
    /// Picked from the minimum candidates.
    pub min_voter: Option<String>,
    /// Picked from the maximum candidates.
    pub max_voter: Option<String>,
}

impl DiscussionPick {
    /// Room fields that turn discussion on with this pick frozen in.
    pub fn into_fields(self) -> RoomFields {
        RoomFields {
            discussion_active: Some(true),
            discussion_min_voter: Some(self.min_voter),
            discussion_max_voter: Some(self.max_voter),
            ..RoomFields::default()
        }
    }
}

/// Collect the min/max outliers of a revealed round.
///
/// Empty when cards are hidden, when nobody eligible voted a number, or when every numeric
/// vote is identical.
pub fn compute_outlier_candidates(snapshot: &RoomSnapshot) -> OutlierCandidates {
    if VotingPhase::of(&snapshot.room) != VotingPhase::Revealed {
        return OutlierCandidates::default();
    }

    let numeric: Vec<(&str, f64)> = snapshot
        .participants
        .values()
        .filter(|participant| snapshot.room.counts_vote_of(&participant.id))
        .filter_map(|participant| {
            let value = numeric_vote(participant.vote.as_deref()?)?;
            Some((participant.id.as_str(), value))
        })
        .collect();

    let Some(min) = numeric.iter().map(|(_, value)| *value).reduce(f64::min) else {
        return OutlierCandidates::default();
    };
    let max = numeric
        .iter()
        .map(|(_, value)| *value)
        .fold(f64::NEG_INFINITY, f64::max);

    if min == max {
        return OutlierCandidates::default();
    }

    let tied_at = |target: f64| -> Vec<String> {
        numeric
            .iter()
            .filter(|(_, value)| *value == target)
            .map(|(id, _)| id.to_string())
            .collect()
    };

    OutlierCandidates {
        min_candidates: tied_at(min),
        max_candidates: tied_at(max),
    }
}

/// Pick one participant per non-empty candidate list, independently and uniformly.
pub fn select_for_discussion<R>(candidates: &OutlierCandidates, rng: &mut R) -> DiscussionPick
where
    R: Rng + ?Sized,
{
    DiscussionPick {
        min_voter: candidates.min_candidates.choose(rng).cloned(),
        max_voter: candidates.max_candidates.choose(rng).cloned(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use indexmap::IndexMap;
    use rand::{RngCore, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::state::room::{Participant, Room};

    /// Deterministic RNG whose every draw is zero, so every pick lands on index 0.
    pub(crate) struct ZeroRng;

    impl RngCore for ZeroRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            dst.fill(0);
        }
    }

    pub(crate) fn revealed_with(votes: &[(&str, Option<&str>)]) -> RoomSnapshot {
        let mut snapshot = RoomSnapshot::empty("R");
        snapshot.room = Room {
            voting_started: true,
            revealed: true,
            ..Room::empty("R")
        };
        snapshot.participants = votes
            .iter()
            .map(|(id, vote)| {
                (
                    id.to_string(),
                    Participant {
                        id: id.to_string(),
                        name: id.to_string(),
                        vote: vote.map(str::to_string),
                        last_seen: 1,
                    },
                )
            })
            .collect::<IndexMap<_, _>>();
        snapshot
    }

    #[test]
    fn ties_are_kept_in_join_order_and_zero_rng_picks_first() {
        let snapshot = revealed_with(&[("A", Some("2")), ("B", Some("2")), ("C", Some("13"))]);

        let candidates = compute_outlier_candidates(&snapshot);
        assert_eq!(candidates.min_candidates, vec!["A", "B"]);
        assert_eq!(candidates.max_candidates, vec!["C"]);

        let pick = select_for_discussion(&candidates, &mut ZeroRng);
        assert_eq!(pick.min_voter.as_deref(), Some("A"));
        assert_eq!(pick.max_voter.as_deref(), Some("C"));
    }

    #[test]
    fn identical_votes_leave_nobody_to_discuss() {
        let snapshot = revealed_with(&[("A", Some("5")), ("B", Some("5")), ("C", Some("?"))]);
        assert!(compute_outlier_candidates(&snapshot).is_empty());
    }

    #[test]
    fn hidden_cards_have_no_candidates() {
        let mut snapshot = revealed_with(&[("A", Some("1")), ("B", Some("8"))]);
        snapshot.room.revealed = false;
        assert!(compute_outlier_candidates(&snapshot).is_empty());
    }

    #[test]
    fn non_participating_admin_is_not_a_candidate() {
        let mut snapshot = revealed_with(&[("admin", Some("100")), ("A", Some("1")), ("B", Some("8"))]);
        snapshot.room.admin_user_id = "admin".into();

        let candidates = compute_outlier_candidates(&snapshot);
        assert_eq!(candidates.max_candidates, vec!["B"]);

        snapshot.room.admin_participates = true;
        let candidates = compute_outlier_candidates(&snapshot);
        assert_eq!(candidates.max_candidates, vec!["admin"]);
    }

    #[test]
    fn seeded_picks_stay_within_candidates() {
        let snapshot = revealed_with(&[
            ("A", Some("1")),
            ("B", Some("1")),
            ("C", Some("1")),
            ("D", Some("20")),
            ("E", Some("20")),
        ]);
        let candidates = compute_outlier_candidates(&snapshot);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..32 {
            let pick = select_for_discussion(&candidates, &mut rng);
            let min = pick.min_voter.expect("min pick");
            let max = pick.max_voter.expect("max pick");
            assert!(candidates.min_candidates.contains(&min));
            assert!(candidates.max_candidates.contains(&max));
        }
    }

    #[test]
    fn empty_candidates_pick_nobody() {
        let pick = select_for_discussion(&OutlierCandidates::default(), &mut ZeroRng);
        assert_eq!(pick, DiscussionPick::default());
        assert_eq!(pick.into_fields().discussion_active, Some(true));
    }
}
