//! Vote aggregation for one voting session.
//!
//! Votes are kept per round in submission order. A user has at most one vote
//! per round; resubmitting replaces the value in place without moving the
//! vote to the back of the list.

use std::collections::BTreeMap;

use pointroom_db::models::Vote;
use pointroom_protocol::VoteStatistics;
use pointroom_protocol::deck::numeric_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    New,
    Replaced,
}

#[derive(Debug, Clone, Default)]
pub struct VoteBook {
    rounds: BTreeMap<u32, Vec<Vote>>,
}

impl VoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a book from persisted votes, in any order.
    pub fn from_votes(votes: impl IntoIterator<Item = Vote>) -> Self {
        let mut book = Self::new();
        for vote in votes {
            book.record(vote);
        }
        book
    }

    pub fn record(&mut self, vote: Vote) -> Recorded {
        let round = self.rounds.entry(vote.round).or_default();
        match round.iter_mut().find(|v| v.user_id == vote.user_id) {
            Some(existing) => {
                *existing = vote;
                Recorded::Replaced
            }
            None => {
                round.push(vote);
                Recorded::New
            }
        }
    }

    pub fn round(&self, round: u32) -> &[Vote] {
        self.rounds.get(&round).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, round: u32) -> usize {
        self.round(round).len()
    }

    pub fn vote_of(&self, round: u32, user_id: &str) -> Option<&Vote> {
        self.round(round).iter().find(|v| v.user_id == user_id)
    }
}

/// True when the round holds as many distinct voters as there are eligible
/// online members, and there is at least one of them.
pub fn is_complete(voters: usize, eligible: usize) -> bool {
    eligible > 0 && voters == eligible
}

/// Mean, median and spread over the numeric votes. Non-numeric cards such as
/// `?` or t-shirt sizes are left out; `None` when nothing numeric remains.
pub fn statistics(votes: &[Vote]) -> Option<VoteStatistics> {
    let mut values: Vec<f64> = votes.iter().filter_map(|v| numeric_value(&v.value)).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let median = if count % 2 == 1 {
        values[count / 2]
    } else {
        (values[count / 2 - 1] + values[count / 2]) / 2.0
    };
    let min = values[0];
    let max = values[count - 1];

    Some(VoteStatistics {
        count,
        mean,
        mean_rounded: (mean * 10.0).round() / 10.0,
        median,
        min,
        max,
        consensus: min == max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::DateTime;
    use uuid::Uuid;

    fn vote(session: Uuid, round: u32, user: &str, value: &str) -> Vote {
        Vote {
            id: Vote::key(session, round, user),
            session_id: session,
            room_id: "ABC123".to_string(),
            round,
            user_id: user.to_string(),
            display_name: user.to_uppercase(),
            value: value.to_string(),
            submitted_at: DateTime::now(),
        }
    }

    fn values(votes: &[Vote]) -> Vec<&str> {
        votes.iter().map(|v| v.value.as_str()).collect()
    }

    #[test]
    fn distinct_voters_in_any_order_are_all_counted() {
        let session = Uuid::new_v4();
        let orders = [["a", "b", "c"], ["c", "a", "b"], ["b", "c", "a"]];
        for order in orders {
            let mut book = VoteBook::new();
            for user in order {
                assert_eq!(book.record(vote(session, 1, user, "3")), Recorded::New);
            }
            assert_eq!(book.count(1), 3);
        }
    }

    #[test]
    fn resubmission_replaces_in_place() {
        let session = Uuid::new_v4();
        let mut book = VoteBook::new();
        book.record(vote(session, 1, "a", "3"));
        book.record(vote(session, 1, "b", "5"));
        assert_eq!(book.record(vote(session, 1, "a", "8")), Recorded::Replaced);

        assert_eq!(book.count(1), 2);
        assert_eq!(values(book.round(1)), vec!["8", "5"]);
        assert_eq!(book.vote_of(1, "a").unwrap().value, "8");
    }

    #[test]
    fn rounds_are_kept_apart() {
        let session = Uuid::new_v4();
        let mut book = VoteBook::new();
        book.record(vote(session, 1, "a", "3"));
        book.record(vote(session, 2, "a", "5"));

        assert_eq!(values(book.round(1)), vec!["3"]);
        assert_eq!(values(book.round(2)), vec!["5"]);
        assert!(book.round(3).is_empty());
    }

    #[test]
    fn completion_compares_voter_and_online_counts() {
        assert!(!is_complete(2, 3));
        assert!(is_complete(3, 3));
        assert!(!is_complete(4, 3));
        assert!(!is_complete(0, 0));
    }

    #[test]
    fn odd_count_statistics() {
        let session = Uuid::new_v4();
        let votes: Vec<Vote> = ["1", "3", "5"]
            .iter()
            .enumerate()
            .map(|(i, v)| vote(session, 1, &format!("u{i}"), v))
            .collect();
        let stats = statistics(&votes).unwrap();
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.count, 3);
        assert!(!stats.consensus);
    }

    #[test]
    fn even_count_statistics() {
        let session = Uuid::new_v4();
        let votes: Vec<Vote> = ["1", "2", "3", "5"]
            .iter()
            .enumerate()
            .map(|(i, v)| vote(session, 1, &format!("u{i}"), v))
            .collect();
        let stats = statistics(&votes).unwrap();
        assert_eq!(stats.mean, 2.75);
        assert_eq!(stats.mean_rounded, 2.8);
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
    }

    #[test]
    fn non_numeric_cards_are_ignored() {
        let session = Uuid::new_v4();
        let votes = vec![
            vote(session, 1, "a", "5"),
            vote(session, 1, "b", "?"),
            vote(session, 1, "c", "☕"),
            vote(session, 1, "d", "5"),
        ];
        let stats = statistics(&votes).unwrap();
        assert_eq!(stats.count, 2);
        assert!(stats.consensus);

        let sizes = vec![vote(session, 1, "a", "XL"), vote(session, 1, "b", "?")];
        assert!(statistics(&sizes).is_none());
    }
}
