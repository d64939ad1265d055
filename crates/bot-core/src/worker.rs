// worker.rs
//
// One worker per spawned agent: input slots the router fills, and a driver
// that owns the user agent. The primary worker is driven inline on the
// service task; every other worker runs its driver on a dedicated thread
// parked on the worker's condvar.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::error;

use crate::agent::{Agent, AgentIdentity};
use crate::schema::{
    BallPrediction, FieldInfo, GamePacket, MatchComm, MatchConfiguration, PlayerInput,
    RemoveRenderGroup, RenderGroup,
};
use crate::transport::OutboundSender;
use crate::wire::{FramedMessage, MessageKind};

#[derive(Default)]
struct Inputs {
    /// Most recent unprocessed tick; at most one pending.
    game_packet: Option<FramedMessage>,
    /// Latest prediction; overwritten on update, never triggers a wakeup.
    ball_prediction: Option<FramedMessage>,
    match_comms: Vec<Arc<MatchComm>>,
}

impl Inputs {
    fn has_work(&self) -> bool {
        self.game_packet.is_some() || !self.match_comms.is_empty()
    }
}

/// Inputs collected for one pass of the service loop.
struct Work {
    comms: Vec<Arc<MatchComm>>,
    game_packet: Option<FramedMessage>,
    ball_prediction: Option<FramedMessage>,
}

/// Shared state of one live agent worker.
pub(crate) struct AgentWorker {
    pub(crate) identity: AgentIdentity,
    inputs: Mutex<Inputs>,
    work_ready: Condvar,
    quit: AtomicBool,
    initialized: Mutex<bool>,
    initialized_cv: Condvar,
}

impl AgentWorker {
    pub(crate) fn new(identity: AgentIdentity) -> Self {
        Self {
            identity,
            inputs: Mutex::new(Inputs::default()),
            work_ready: Condvar::new(),
            quit: AtomicBool::new(false),
            initialized: Mutex::new(false),
            initialized_cv: Condvar::new(),
        }
    }

    pub(crate) fn set_game_packet(&self, frame: FramedMessage, notify: bool) {
        {
            let mut inputs = self.inputs.lock().unwrap();
            inputs.game_packet = Some(frame);
        }
        if notify {
            self.work_ready.notify_one();
        }
    }

    pub(crate) fn set_ball_prediction(&self, frame: FramedMessage) {
        let mut inputs = self.inputs.lock().unwrap();
        inputs.ball_prediction = Some(frame);
    }

    /// Queue an inter-agent message unless the filters drop it: the
    /// worker's own messages (self echo) and team-only messages addressed
    /// to the other team are never delivered.
    pub(crate) fn offer_match_comm(&self, comm: &Arc<MatchComm>, notify: bool) {
        if self.identity.controls(comm.index) {
            return;
        }
        if comm.team_only && comm.team != self.identity.team {
            return;
        }

        {
            let mut inputs = self.inputs.lock().unwrap();
            inputs.match_comms.push(comm.clone());
        }
        if notify {
            self.work_ready.notify_one();
        }
    }

    /// Ask the worker to exit; its thread wakes and returns.
    pub(crate) fn terminate(&self) {
        self.quit.store(true, Ordering::Relaxed);
        self.work_ready.notify_all();
    }

    pub(crate) fn mark_initialized(&self) {
        *self.initialized.lock().unwrap() = true;
        self.initialized_cv.notify_all();
    }

    /// Block until the worker's driver has reported in.
    pub(crate) fn wait_initialized(&self) {
        let mut initialized = self.initialized.lock().unwrap();
        while !*initialized {
            initialized = self.initialized_cv.wait(initialized).unwrap();
        }
    }

    #[cfg(test)]
    fn pending_comms(&self) -> usize {
        self.inputs.lock().unwrap().match_comms.len()
    }
}

/// Immutable surroundings every driver call sees.
pub(crate) struct WorkerContext {
    pub(crate) outbound: OutboundSender,
    pub(crate) field_info: Arc<FieldInfo>,
    pub(crate) match_config: Arc<MatchConfiguration>,
    pub(crate) rendering_enabled: Arc<AtomicBool>,
}

/// Owns the user agent and turns collected inputs into outbound messages.
pub(crate) struct WorkerDriver {
    pub(crate) worker: Arc<AgentWorker>,
    agent: Box<dyn Agent>,
    ctx: WorkerContext,
}

impl WorkerDriver {
    pub(crate) fn new(worker: Arc<AgentWorker>, agent: Box<dyn Agent>, ctx: WorkerContext) -> Self {
        Self { worker, agent, ctx }
    }

    /// One pass of the service loop. Returns whether any work was done.
    pub(crate) fn run_once(&mut self) -> bool {
        let work = {
            let mut inputs = self.worker.inputs.lock().unwrap();
            if !inputs.has_work() {
                return false;
            }
            Work {
                comms: std::mem::take(&mut inputs.match_comms),
                game_packet: inputs.game_packet.take(),
                ball_prediction: inputs.ball_prediction.clone(),
            }
        };

        // User code must not unwind past the worker loop; a panicking agent
        // takes down its own worker and nothing else.
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run(work)));
        if outcome.is_err() {
            error!(
                name = %self.worker.identity.name,
                "agent panicked; terminating this worker"
            );
            self.worker.terminate();
        }
        true
    }

    fn run(&mut self, work: Work) {
        for comm in &work.comms {
            self.agent.on_match_comm(comm);
        }

        if let Some(frame) = work.game_packet {
            if let Some(packet) = frame.decode::<GamePacket>() {
                let prediction: Option<BallPrediction> =
                    work.ball_prediction.and_then(|frame| frame.decode());
                self.agent.update(
                    &packet,
                    prediction.as_ref(),
                    &self.ctx.field_info,
                    &self.ctx.match_config,
                );

                for &index in &self.worker.identity.indices {
                    if index as usize >= packet.players.len() {
                        continue;
                    }
                    let input = PlayerInput {
                        player_index: index,
                        controller_state: self.agent.output(index),
                    };
                    self.ctx.outbound.send(MessageKind::PlayerInput, &input);
                }
            }
        }

        for comm in self.agent.drain_match_comms() {
            self.ctx.outbound.send(MessageKind::MatchComm, &comm);
        }

        if let Some(state) = self.agent.drain_desired_state() {
            if self.ctx.match_config.enable_state_setting {
                self.ctx.outbound.send(MessageKind::DesiredGameState, &state);
            }
        }

        let groups = self.agent.drain_render_groups();
        if !groups.is_empty() && self.ctx.rendering_enabled.load(Ordering::Relaxed) {
            for (id, render_messages) in groups {
                if render_messages.is_empty() {
                    self.ctx
                        .outbound
                        .send(MessageKind::RemoveRenderGroup, &RemoveRenderGroup { id });
                } else {
                    let group = RenderGroup {
                        id,
                        render_messages,
                    };
                    self.ctx.outbound.send(MessageKind::RenderGroup, &group);
                }
            }
        }
    }

    /// Service loop for non-primary workers: wait on the condvar until
    /// there is work or the quit flag is set.
    fn service(&mut self) {
        while !self.worker.quit.load(Ordering::Relaxed) {
            if self.run_once() {
                continue;
            }
            let mut inputs = self.worker.inputs.lock().unwrap();
            while !self.worker.quit.load(Ordering::Relaxed) && !inputs.has_work() {
                inputs = self.worker.work_ready.wait(inputs).unwrap();
            }
        }
    }
}

/// Start a non-primary worker's service thread. The driver reports the
/// worker initialized before entering its loop.
pub(crate) fn start_thread(mut driver: WorkerDriver) -> JoinHandle<()> {
    let name = driver
        .worker
        .identity
        .indices
        .iter()
        .next()
        .map(|index| format!("agent-{index}"))
        .unwrap_or_else(|| "agent".to_string());
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            driver.worker.mark_initialized();
            driver.service();
        })
        .expect("failed to spawn agent worker thread")
}
