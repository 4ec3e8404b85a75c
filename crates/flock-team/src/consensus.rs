//! Threshold consensus over team votes

use flock_core::ConsensusScore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configuration for threshold consensus
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Share of the team that must endorse a proposal (0.0 - 1.0)
    pub threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self { threshold: 0.7 }
    }
}

impl ConsensusConfig {
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Minimum endorsements needed out of `total_members`
    pub fn min_votes(&self, total_members: usize) -> usize {
        ((total_members as f64) * self.threshold).ceil() as usize
    }
}

/// How a member voted on a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    For,
    Against,
    Abstain,
}

/// A vote from one team member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub agent_id: String,
    pub proposal_id: Uuid,
    pub stance: Stance,
}

impl Vote {
    pub fn new(agent_id: impl Into<String>, proposal_id: Uuid, stance: Stance) -> Self {
        Self {
            agent_id: agent_id.into(),
            proposal_id,
            stance,
        }
    }
}

/// Vote count for one proposal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    pub votes_for: usize,
    pub votes_against: usize,
    pub abstained: usize,
}

impl Tally {
    pub fn count<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut tally = Self::default();
        for vote in votes {
            match vote.stance {
                Stance::For => tally.votes_for += 1,
                Stance::Against => tally.votes_against += 1,
                Stance::Abstain => tally.abstained += 1,
            }
        }
        tally
    }

    pub fn total(&self) -> usize {
        self.votes_for + self.votes_against + self.abstained
    }

    /// Endorsement share; a team of nobody has no objections
    pub fn score(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.votes_for as f64 / total as f64,
        }
    }

    /// Whether the endorsements meet the configured threshold
    pub fn approved(&self, config: &ConsensusConfig) -> bool {
        self.total() == 0 || self.votes_for >= config.min_votes(self.total())
    }

    pub fn into_score(self, proposal_id: Uuid) -> ConsensusScore {
        ConsensusScore {
            proposal_id,
            score: self.score(),
            votes_for: self.votes_for,
            votes_against: self.votes_against,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(stances: &[Stance]) -> Vec<Vote> {
        let id = Uuid::new_v4();
        stances
            .iter()
            .enumerate()
            .map(|(i, s)| Vote::new(format!("agent-{}", i), id, *s))
            .collect()
    }

    #[test]
    fn test_min_votes() {
        let config = ConsensusConfig::default();
        assert_eq!(config.min_votes(4), 3); // ceil(4 * 0.7)
        assert_eq!(config.min_votes(10), 7);
        assert_eq!(config.min_votes(0), 0);
    }

    #[test]
    fn test_tally_score() {
        let tally = Tally::count(&votes(&[
            Stance::For,
            Stance::For,
            Stance::For,
            Stance::Against,
        ]));
        assert_eq!(tally.votes_for, 3);
        assert_eq!(tally.votes_against, 1);
        assert!((tally.score() - 0.75).abs() < f64::EPSILON);
        assert!(tally.approved(&ConsensusConfig::default()));
        assert!(!tally.approved(&ConsensusConfig::with_threshold(0.8)));
    }

    #[test]
    fn test_abstentions_count_against_share() {
        let tally = Tally::count(&votes(&[Stance::For, Stance::Abstain]));
        assert!((tally.score() - 0.5).abs() < f64::EPSILON);
        assert!(!tally.approved(&ConsensusConfig::default()));
    }

    #[test]
    fn test_empty_team_approves() {
        let tally = Tally::count(&[]);
        assert_eq!(tally.score(), 1.0);
        assert!(tally.approved(&ConsensusConfig::with_threshold(1.0)));
    }
}
