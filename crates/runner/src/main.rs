//! Example agent that blindly drives toward the ball.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Arc;

use anyhow::Context as _;
use rlbot_core::agent::{Agent, AgentIdentity};
use rlbot_core::manager::{AgentManager, ConnectOptions};
use rlbot_core::schema::{
    BallPrediction, ControllerState, FieldInfo, GamePacket, MatchConfiguration, Physics,
};
use rlbot_core::{config, logging};
use tracing::info;

struct BallChaser {
    identity: AgentIdentity,
    outputs: HashMap<u32, ControllerState>,
}

impl BallChaser {
    fn new(identity: AgentIdentity) -> Self {
        for index in &identity.indices {
            info!(team = identity.team, index, "ball chaser ready");
        }
        Self {
            identity,
            outputs: HashMap::new(),
        }
    }

    /// Full throttle, steering hard toward the ball.
    fn chase(car: &Physics, ball: &Physics) -> ControllerState {
        let to_ball = (ball.location.y - car.location.y).atan2(ball.location.x - car.location.x);
        let mut error = to_ball - car.rotation.yaw;
        if error > PI {
            error -= 2.0 * PI;
        }
        if error < -PI {
            error += 2.0 * PI;
        }
        ControllerState {
            throttle: 1.0,
            steer: 1.0f32.copysign(error),
            ..ControllerState::default()
        }
    }
}

impl Agent for BallChaser {
    fn update(
        &mut self,
        packet: &GamePacket,
        _prediction: Option<&BallPrediction>,
        _field_info: &FieldInfo,
        _match_config: &MatchConfiguration,
    ) {
        self.outputs.clear();

        // No ball, nothing to chase.
        let Some(ball) = packet.balls.first() else {
            return;
        };

        for &index in &self.identity.indices {
            let Some(player) = packet.players.get(index as usize) else {
                continue;
            };
            self.outputs
                .insert(index, Self::chase(&player.physics, &ball.physics));
        }
    }

    fn output(&mut self, index: u32) -> ControllerState {
        self.outputs.get(&index).copied().unwrap_or_default()
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
    let batch_hivemind = std::env::var("RLBOT_BATCH_HIVEMIND")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let options = ConnectOptions {
        host: addr.host,
        port: addr.port,
        agent_id,
        wants_ball_predictions: true,
        batch_hivemind,
    };
    let mut manager = AgentManager::connect(
        options,
        Arc::new(|identity| Box::new(BallChaser::new(identity)) as Box<dyn Agent>),
    )
    .await
    .context("failed to connect to the match server")?;

    manager.join().await;
    Ok(())
}
