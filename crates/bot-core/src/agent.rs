use std::collections::BTreeSet;

use crate::schema::{
    BallPrediction, ControllerState, DesiredGameState, FieldInfo, GamePacket, MatchComm,
    MatchConfiguration, PlayerLoadout, RenderMessage,
};

/// Who one spawned agent is: the player indices it controls (more than one
/// in hivemind mode), its team, and its display name from the match
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub indices: BTreeSet<u32>,
    pub team: u32,
    pub name: String,
}

impl AgentIdentity {
    pub fn controls(&self, index: u32) -> bool {
        self.indices.contains(&index)
    }
}

/// Per-tick decision logic supplied by the user.
///
/// One instance lives inside each worker and is only ever called from the
/// thread driving that worker, so implementations need no internal locking.
/// Calls arrive in a fixed order per tick: pending [`Agent::on_match_comm`]
/// deliveries first, then one [`Agent::update`], then one
/// [`Agent::output`] per controlled player index, then the drains.
pub trait Agent: Send {
    /// Absorb this tick's world state. `prediction` is the most recent ball
    /// prediction, which can lag a tick behind or be absent entirely.
    fn update(
        &mut self,
        packet: &GamePacket,
        prediction: Option<&BallPrediction>,
        field_info: &FieldInfo,
        match_config: &MatchConfiguration,
    );

    /// Controller state for one of this agent's player indices.
    fn output(&mut self, index: u32) -> ControllerState;

    /// An inter-agent message addressed to this agent. Never called for the
    /// agent's own messages or for team-only messages of the other team.
    fn on_match_comm(&mut self, _comm: &MatchComm) {}

    /// Optional loadout, queried once per controlled index at spawn.
    fn loadout(&mut self, _index: u32) -> Option<PlayerLoadout> {
        None
    }

    /// Outgoing inter-agent messages gathered since the last tick.
    fn drain_match_comms(&mut self) -> Vec<MatchComm> {
        Vec::new()
    }

    /// Pending state-setting request, if any. Discarded when the match
    /// configuration disables state setting.
    fn drain_desired_state(&mut self) -> Option<DesiredGameState> {
        None
    }

    /// Render groups gathered since the last tick. An empty group asks for
    /// that group to be removed. Discarded while rendering is disabled.
    fn drain_render_groups(&mut self) -> Vec<(i32, Vec<RenderMessage>)> {
        Vec::new()
    }
}

/// Creates the agent instance for one worker.
pub type AgentSpawner = dyn Fn(AgentIdentity) -> Box<dyn Agent> + Send + Sync;
