// manager.rs
//
// Demultiplexes inbound frames and owns the agent workers. Control
// messages update session state, data messages fan out to the workers, and
// the shutdown sentinel ends the session.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{info, warn};

use crate::agent::{AgentIdentity, AgentSpawner};
use crate::schema::{
    ConnectionSettings, ControllableTeamInfo, DesiredGameState, FieldInfo, InitComplete, MatchComm,
    MatchConfiguration, PlayerClass, RemoveRenderGroup, RenderGroup, RenderingStatus, SetLoadout,
    StartCommand, StopCommand,
};
use crate::transport::{MessageHandler, OutboundSender, Transport};
use crate::wire::{FramedMessage, MessageKind};
use crate::worker::{self, AgentWorker, WorkerContext, WorkerDriver};

/// Connection parameters for [`AgentManager::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Required; the server uses it to pair this connection with players.
    pub agent_id: String,
    pub wants_ball_predictions: bool,
    /// One worker owning every controlled index instead of one worker per
    /// index.
    pub batch_hivemind: bool,
}

/// A running session: one connection, its router, and its agent workers.
pub struct AgentManager {
    transport: Transport,
}

impl AgentManager {
    /// Connect to the match server and announce this agent. Workers spawn
    /// later, once the server has delivered the bootstrap messages.
    pub async fn connect(options: ConnectOptions, spawner: Arc<AgentSpawner>) -> anyhow::Result<Self> {
        anyhow::ensure!(!options.agent_id.trim().is_empty(), "no agent id provided");

        let agent_id = options.agent_id.clone();
        let batch_hivemind = options.batch_hivemind;
        let transport = Transport::connect(&options.host, options.port, move |sender| {
            Router::new(sender, spawner, batch_hivemind, agent_id)
        })
        .await?;

        let settings = ConnectionSettings {
            agent_id: options.agent_id,
            wants_ball_predictions: options.wants_ball_predictions,
            wants_comms: true,
            close_between_matches: true,
        };
        transport
            .sender()
            .send(MessageKind::ConnectionSettings, &settings);

        Ok(Self { transport })
    }

    /// Request teardown; idempotent. `join` still has to be awaited.
    pub fn terminate(&self) {
        self.transport.terminate();
    }

    /// Wait for the session to end and every worker thread to exit.
    pub async fn join(&mut self) {
        self.transport.join().await;
    }

    /// Resolve once all queued outbound bytes are on the socket.
    pub async fn wait_for_writer_idle(&self) {
        self.transport.wait_for_writer_idle().await;
    }

    pub fn send_match_comm(&self, comm: &MatchComm) {
        self.transport.sender().send(MessageKind::MatchComm, comm);
    }

    pub fn send_desired_game_state(&self, state: &DesiredGameState) {
        self.transport
            .sender()
            .send(MessageKind::DesiredGameState, state);
    }

    pub fn send_render_group(&self, group: &RenderGroup) {
        self.transport.sender().send(MessageKind::RenderGroup, group);
    }

    pub fn send_remove_render_group(&self, group: &RemoveRenderGroup) {
        self.transport
            .sender()
            .send(MessageKind::RemoveRenderGroup, group);
    }

    pub fn send_rendering_status(&self, status: &RenderingStatus) {
        self.transport
            .sender()
            .send(MessageKind::RenderingStatus, status);
    }

    pub fn send_start_command(&self, command: &StartCommand) {
        self.transport
            .sender()
            .send(MessageKind::StartCommand, command);
    }

    pub fn send_stop_command(&self, command: &StopCommand) {
        self.transport.sender().send(MessageKind::StopCommand, command);
    }

    pub fn send_match_configuration(&self, config: &MatchConfiguration) {
        self.transport
            .sender()
            .send(MessageKind::MatchConfiguration, config);
    }
}

struct Router {
    sender: OutboundSender,
    spawner: Arc<AgentSpawner>,
    batch_hivemind: bool,
    agent_id: String,

    // Most recent bootstrap messages; workers spawn once all three exist.
    controllable_team_info: Option<FramedMessage>,
    field_info: Option<FramedMessage>,
    match_config: Option<FramedMessage>,

    /// Shared with the match-comm loopback; the first entry is the primary.
    workers: Arc<Mutex<Vec<Arc<AgentWorker>>>>,
    /// Driver for the primary worker, run inline on the service task.
    primary: Option<WorkerDriver>,
    threads: Vec<JoinHandle<()>>,
    rendering_enabled: Arc<AtomicBool>,
}

impl Router {
    fn new(
        sender: OutboundSender,
        spawner: Arc<AgentSpawner>,
        batch_hivemind: bool,
        agent_id: String,
    ) -> Self {
        let workers: Arc<Mutex<Vec<Arc<AgentWorker>>>> = Arc::new(Mutex::new(Vec::new()));

        // Outgoing match comms loop back to the other workers on this
        // connection; the sender's own worker drops the echo.
        let loopback_workers = workers.clone();
        sender.set_comm_loopback(move |frame| {
            let Some(comm) = frame.decode::<MatchComm>() else {
                return;
            };
            let comm = Arc::new(comm);
            let workers = loopback_workers.lock().unwrap();
            for worker in workers.iter().skip(1) {
                worker.offer_match_comm(&comm, true);
            }
            if let Some(primary) = workers.first() {
                primary.offer_match_comm(&comm, false);
            }
        });

        Self {
            sender,
            spawner,
            batch_hivemind,
            agent_id,
            controllable_team_info: None,
            field_info: None,
            match_config: None,
            workers,
            primary: None,
            threads: Vec::new(),
            rendering_enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn worker_list(&self) -> Vec<Arc<AgentWorker>> {
        self.workers.lock().unwrap().clone()
    }

    fn run_primary(&mut self) {
        if let Some(primary) = self.primary.as_mut() {
            primary.run_once();
        }
    }

    /// Terminate and join every worker. Re-entrant with respect to spawn:
    /// called both on re-bootstrap and at session end.
    fn clear_workers(&mut self) {
        let drained: Vec<Arc<AgentWorker>> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain(..).collect()
        };
        for worker in &drained {
            worker.terminate();
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        self.primary = None;
    }

    /// Create workers once ControllableTeamInfo, FieldInfo and
    /// MatchConfiguration have all arrived. Any existing workers are torn
    /// down first, so a repeated bootstrap message regenerates the set.
    fn spawn_workers(&mut self) {
        let (Some(team_info_frame), Some(field_info_frame), Some(match_config_frame)) = (
            self.controllable_team_info.clone(),
            self.field_info.clone(),
            self.match_config.clone(),
        ) else {
            return;
        };

        self.clear_workers();

        if self.agent_id.trim().is_empty() {
            warn!("no agent id; not spawning workers");
            return;
        }

        let Some(team_info) = team_info_frame.decode::<ControllableTeamInfo>() else {
            return;
        };
        let Some(field_info) = field_info_frame.decode::<FieldInfo>() else {
            return;
        };
        let Some(match_config) = match_config_frame.decode::<MatchConfiguration>() else {
            return;
        };

        self.rendering_enabled
            .store(match_config.enable_rendering, Ordering::Relaxed);

        let field_info = Arc::new(field_info);
        let match_config = Arc::new(match_config);
        let team = team_info.team;

        let mut drivers = Vec::new();
        let mut taken_indices = BTreeSet::new();
        let mut hive_indices = BTreeSet::new();
        let mut hive_name = String::new();

        for controllable in &team_info.controllables {
            let Some(player) = match_config
                .player_configurations
                .iter()
                .find(|player| player.spawn_id == controllable.spawn_id)
            else {
                warn!(
                    spawn_id = controllable.spawn_id,
                    "controllable not found in match configuration"
                );
                continue;
            };
            if player.team != team {
                warn!(index = controllable.index, "controllable team mismatch");
                continue;
            }
            if !matches!(player.variety, PlayerClass::CustomBot) {
                warn!(index = controllable.index, "controllable is not a custom bot");
                continue;
            }
            if !taken_indices.insert(controllable.index) {
                warn!(index = controllable.index, "duplicate player index");
                continue;
            }

            if self.batch_hivemind {
                // Defer creation until the whole index set is known.
                hive_indices.insert(controllable.index);
                if hive_name.is_empty() {
                    hive_name = player.name.clone();
                }
                continue;
            }

            let identity = AgentIdentity {
                indices: BTreeSet::from([controllable.index]),
                team,
                name: player.name.clone(),
            };
            drivers.push(self.create_worker(identity, &field_info, &match_config));
        }

        if self.batch_hivemind && !hive_indices.is_empty() {
            let identity = AgentIdentity {
                indices: hive_indices,
                team,
                name: hive_name,
            };
            drivers.push(self.create_worker(identity, &field_info, &match_config));
        }

        // The first worker is driven inline on this task; the rest get
        // their own service threads.
        let mut drivers = drivers.into_iter();
        if let Some(primary) = drivers.next() {
            primary.worker.mark_initialized();
            self.primary = Some(primary);
        }
        for driver in drivers {
            self.threads.push(worker::start_thread(driver));
        }

        for worker in self.worker_list() {
            worker.wait_initialized();
        }

        self.sender.send(MessageKind::InitComplete, &InitComplete);
    }

    fn create_worker(
        &mut self,
        identity: AgentIdentity,
        field_info: &Arc<FieldInfo>,
        match_config: &Arc<MatchConfiguration>,
    ) -> WorkerDriver {
        let mut agent = (self.spawner)(identity.clone());

        for &index in &identity.indices {
            if let Some(loadout) = agent.loadout(index) {
                self.sender
                    .send(MessageKind::SetLoadout, &SetLoadout { index, loadout });
            }
        }

        let worker = Arc::new(AgentWorker::new(identity));
        self.workers.lock().unwrap().push(worker.clone());

        WorkerDriver::new(
            worker,
            agent,
            WorkerContext {
                outbound: self.sender.clone(),
                field_info: field_info.clone(),
                match_config: match_config.clone(),
                rendering_enabled: self.rendering_enabled.clone(),
            },
        )
    }
}

impl MessageHandler for Router {
    fn on_frame(&mut self, frame: FramedMessage) {
        let Some(kind) = frame.kind() else {
            warn!(kind = frame.raw_kind(), "ignoring unknown message kind");
            return;
        };

        match kind {
            MessageKind::None | MessageKind::DisconnectSignal => {
                info!("server requested shutdown");
                self.sender.terminate();
            }

            MessageKind::ControllableTeamInfo => {
                info!("received controllable team info");
                self.controllable_team_info = Some(frame);
                self.spawn_workers();
            }
            MessageKind::FieldInfo => {
                info!("received field info");
                self.field_info = Some(frame);
                self.spawn_workers();
            }
            MessageKind::MatchConfiguration => {
                info!("received match configuration");
                self.match_config = Some(frame);
                self.spawn_workers();
            }

            MessageKind::GamePacket => {
                let workers = self.worker_list();
                if workers.is_empty() {
                    return;
                }
                for worker in workers.iter().skip(1) {
                    worker.set_game_packet(frame.clone(), true);
                }
                workers[0].set_game_packet(frame, false);
                self.run_primary();
            }

            MessageKind::BallPrediction => {
                for worker in self.worker_list() {
                    worker.set_ball_prediction(frame.clone());
                }
            }

            MessageKind::MatchComm => {
                let workers = self.worker_list();
                if workers.is_empty() {
                    return;
                }
                let Some(comm) = frame.decode::<MatchComm>() else {
                    return;
                };
                let comm = Arc::new(comm);
                for worker in workers.iter().skip(1) {
                    worker.offer_match_comm(&comm, true);
                }
                self.run_primary();
            }

            MessageKind::RenderingStatus => {
                if let Some(status) = frame.decode::<RenderingStatus>() {
                    self.rendering_enabled
                        .store(status.status, Ordering::Relaxed);
                }
            }

            // Interface-bound messages have no business arriving here.
            MessageKind::StartCommand
            | MessageKind::PlayerInput
            | MessageKind::DesiredGameState
            | MessageKind::RenderGroup
            | MessageKind::RemoveRenderGroup
            | MessageKind::ConnectionSettings
            | MessageKind::StopCommand
            | MessageKind::SetLoadout
            | MessageKind::InitComplete => {
                warn!(?kind, "ignoring unexpected message");
            }
        }
    }

    fn on_wake(&mut self) {
        self.run_primary();
    }

    fn on_shutdown(&mut self) {
        self.clear_workers();
    }
}
