//! In-process team registry
//!
//! Members endorse every proposal except those whose decision tag they have
//! registered an objection to.

use async_trait::async_trait;
use flock_core::{
    ConsensusOutcome, FlockError, Proposal, Result, SwarmId, TeamMember, TeamRegistry,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::consensus::{ConsensusConfig, Stance, Tally, Vote};

/// Team registry holding members per swarm
#[derive(Debug, Default)]
pub struct InMemoryTeamRegistry {
    config: ConsensusConfig,
    teams: RwLock<HashMap<SwarmId, Vec<TeamMember>>>,
    /// agent id -> decision tags the agent votes against
    objections: RwLock<HashMap<String, HashSet<String>>>,
    /// Upper bound on members per team
    max_team_size: Option<usize>,
}

impl InMemoryTeamRegistry {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_max_team_size(mut self, max: usize) -> Self {
        self.max_team_size = Some(max);
        self
    }

    /// Make `agent_id` vote against every proposal tagged `tag`
    pub fn add_objection(&self, agent_id: impl Into<String>, tag: impl Into<String>) {
        self.objections
            .write()
            .entry(agent_id.into())
            .or_default()
            .insert(tag.into());
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    fn stance_of(&self, member: &TeamMember, proposal: &Proposal) -> Stance {
        let objections = self.objections.read();
        match objections.get(&member.agent_id) {
            Some(tags) if tags.contains(proposal.action.tag()) => Stance::Against,
            _ => Stance::For,
        }
    }
}

#[async_trait]
impl TeamRegistry for InMemoryTeamRegistry {
    async fn get_team(&self, swarm_id: &SwarmId) -> Result<Vec<TeamMember>> {
        Ok(self
            .teams
            .read()
            .get(swarm_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn form_team(&self, swarm_id: &SwarmId, agent_ids: &[String]) -> Result<Vec<TeamMember>> {
        let mut teams = self.teams.write();
        let team = teams.entry(*swarm_id).or_default();

        let mut joining: Vec<&String> = Vec::new();
        for agent_id in agent_ids {
            let known = team.iter().any(|m| &m.agent_id == agent_id);
            if !known && !joining.contains(&agent_id) {
                joining.push(agent_id);
            }
        }

        if let Some(max) = self.max_team_size {
            if team.len() + joining.len() > max {
                return Err(FlockError::Team(format!(
                    "Team for swarm {} would have {} members, limit is {}",
                    swarm_id,
                    team.len() + joining.len(),
                    max
                )));
            }
        }

        team.extend(joining.into_iter().map(|id| TeamMember::new(id.clone())));
        debug!("Team for swarm {} now has {} members", swarm_id, team.len());
        Ok(team.clone())
    }

    async fn get_consensus(
        &self,
        swarm_id: &SwarmId,
        proposals: &[Proposal],
    ) -> Result<ConsensusOutcome> {
        let team = self.get_team(swarm_id).await?;

        let results = proposals
            .iter()
            .map(|proposal| {
                let votes: Vec<Vote> = team
                    .iter()
                    .map(|member| {
                        Vote::new(
                            member.agent_id.clone(),
                            proposal.id,
                            self.stance_of(member, proposal),
                        )
                    })
                    .collect();
                Tally::count(&votes).into_score(proposal.id)
            })
            .collect();

        Ok(ConsensusOutcome {
            results,
            threshold: self.config.threshold,
        })
    }

    async fn disband_team(&self, swarm_id: &SwarmId) -> Result<()> {
        if self.teams.write().remove(swarm_id).is_some() {
            debug!("Disbanded team for swarm {}", swarm_id);
        }
        Ok(())
    }
}
