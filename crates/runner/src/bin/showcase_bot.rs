//! Ball-chasing agent that demonstrates the rest of the agent surface:
//! a custom loadout at spawn, a team message, a render group, and a
//! state-setting request, staged over the first seconds of the match.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Arc;

use anyhow::Context as _;
use rlbot_core::agent::{Agent, AgentIdentity};
use rlbot_core::manager::{AgentManager, ConnectOptions};
use rlbot_core::schema::{
    BallPrediction, Color, ControllerState, DesiredBallState, DesiredGameState, FieldInfo,
    GamePacket, MatchComm, MatchConfiguration, Physics, PlayerLoadout, RenderMessage, Vector3,
};
use rlbot_core::{config, logging};
use tracing::info;

const STEER_GAIN: f32 = 2.0;

fn angle_wrap(angle: f32) -> f32 {
    let theta = angle % (2.0 * PI);
    if theta > PI {
        theta - 2.0 * PI
    } else if theta < -PI {
        theta + 2.0 * PI
    } else {
        theta
    }
}

fn angle_steer(angle: f32) -> f32 {
    (STEER_GAIN * angle_wrap(angle)).clamp(-1.0, 1.0)
}

struct ShowcaseBot {
    identity: AgentIdentity,
    outputs: HashMap<u32, ControllerState>,
    pending_comms: Vec<MatchComm>,
    pending_state: Option<DesiredGameState>,
    pending_render: Vec<(i32, Vec<RenderMessage>)>,
    sent_comm: bool,
    rendered: bool,
    state_set: bool,
}

impl ShowcaseBot {
    fn new(identity: AgentIdentity) -> Self {
        for index in &identity.indices {
            info!(team = identity.team, index, "showcase bot ready");
        }
        Self {
            identity,
            outputs: HashMap::new(),
            pending_comms: Vec::new(),
            pending_state: None,
            pending_render: Vec::new(),
            sent_comm: false,
            rendered: false,
            state_set: false,
        }
    }

    fn say(&mut self, index: u32, display: &str) {
        self.pending_comms.push(MatchComm {
            index,
            team: self.identity.team,
            team_only: true,
            display: display.to_string(),
            content: Vec::new(),
        });
    }

    fn stage_demonstrations(&mut self, packet: &GamePacket) {
        let elapsed = packet.match_info.seconds_elapsed;
        let Some(&first_index) = self.identity.indices.iter().next() else {
            return;
        };

        if !self.sent_comm && elapsed > 5.0 {
            self.say(first_index, "Here is a team message");
            self.sent_comm = true;
        } else if !self.rendered && elapsed > 10.0 {
            let (car, ball) = match (
                packet.players.get(first_index as usize),
                packet.balls.first(),
            ) {
                (Some(car), Some(ball)) => (car, ball),
                _ => return,
            };
            let line = RenderMessage::Line3D {
                start: car.physics.location,
                end: ball.physics.location,
                color: Color {
                    r: 255,
                    g: 255,
                    b: 255,
                    a: 255,
                },
            };
            // Group ids are unique per connection, so offset by the index.
            self.pending_render
                .push((first_index as i32 + 100, vec![line]));
            self.say(first_index, "Enabled render");
            self.rendered = true;
        } else if !self.state_set && elapsed > 15.0 {
            self.pending_state = Some(DesiredGameState {
                ball_states: vec![DesiredBallState {
                    physics: Physics {
                        location: Vector3::new(0.0, 0.0, 500.0),
                        ..Physics::default()
                    },
                }],
                car_states: Vec::new(),
            });
            self.say(first_index, "State set");
            self.state_set = true;
        }
    }
}

impl Agent for ShowcaseBot {
    fn update(
        &mut self,
        packet: &GamePacket,
        _prediction: Option<&BallPrediction>,
        _field_info: &FieldInfo,
        _match_config: &MatchConfiguration,
    ) {
        self.stage_demonstrations(packet);
        self.outputs.clear();

        let Some(ball) = packet.balls.first() else {
            return;
        };

        for &index in &self.identity.indices {
            let Some(player) = packet.players.get(index as usize) else {
                continue;
            };
            let car = &player.physics;
            let to_ball = (ball.physics.location.y - car.location.y)
                .atan2(ball.physics.location.x - car.location.x);
            let steer = angle_steer(to_ball - car.rotation.yaw);
            self.outputs.insert(
                index,
                ControllerState {
                    throttle: 1.0,
                    steer,
                    handbrake: steer.abs() >= 1.0,
                    ..ControllerState::default()
                },
            );
        }
    }

    fn output(&mut self, index: u32) -> ControllerState {
        self.outputs.get(&index).copied().unwrap_or_default()
    }

    fn on_match_comm(&mut self, comm: &MatchComm) {
        info!(
            from = comm.index,
            team = comm.team,
            message = %comm.display,
            "match comm received"
        );
    }

    fn loadout(&mut self, _index: u32) -> Option<PlayerLoadout> {
        Some(PlayerLoadout {
            team_color_id: 27,
            car_id: 23,
            boost_id: 35,
            ..PlayerLoadout::default()
        })
    }

    fn drain_match_comms(&mut self) -> Vec<MatchComm> {
        std::mem::take(&mut self.pending_comms)
    }

    fn drain_desired_state(&mut self) -> Option<DesiredGameState> {
        self.pending_state.take()
    }

    fn drain_render_groups(&mut self) -> Vec<(i32, Vec<RenderMessage>)> {
        std::mem::take(&mut self.pending_render)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let addr = config::server_addr(std::env::args().skip(1))?;
    let agent_id = match config::agent_id() {
        Ok(agent_id) => agent_id,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let options = ConnectOptions {
        host: addr.host,
        port: addr.port,
        agent_id,
        wants_ball_predictions: true,
        batch_hivemind: true,
    };
    let mut manager = AgentManager::connect(
        options,
        Arc::new(|identity| Box::new(ShowcaseBot::new(identity)) as Box<dyn Agent>),
    )
    .await
    .context("failed to connect to the match server")?;

    manager.join().await;
    Ok(())
}
