//! Payload types for every message on the wire.
//!
//! These are the accessor types behind [`crate::wire::FramedMessage::decode`];
//! the transport itself treats payloads as opaque bytes.

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode)]
pub struct Rotator {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode)]
pub struct Physics {
    pub location: Vector3,
    pub rotation: Rotator,
    pub velocity: Vector3,
    pub angular_velocity: Vector3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

// --- per-tick world state ---------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct MatchInfo {
    pub seconds_elapsed: f32,
    pub frame_num: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct BallInfo {
    pub physics: Physics,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct PlayerInfo {
    pub physics: Physics,
    pub team: u32,
    pub name: String,
    pub boost: f32,
    pub is_demolished: bool,
}

/// One tick's world snapshot.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct GamePacket {
    pub players: Vec<PlayerInfo>,
    pub balls: Vec<BallInfo>,
    pub match_info: MatchInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct PredictionSlice {
    pub game_seconds: f32,
    pub physics: Physics,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct BallPrediction {
    pub slices: Vec<PredictionSlice>,
}

// --- static match data ------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct BoostPad {
    pub location: Vector3,
    pub is_full_boost: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct GoalInfo {
    pub team_num: u32,
    pub location: Vector3,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct FieldInfo {
    pub boost_pads: Vec<BoostPad>,
    pub goals: Vec<GoalInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum GameMode {
    #[default]
    Soccer,
    Hoops,
    Dropshot,
    Snowday,
    Rumble,
    Heatseeker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum ExistingMatchBehavior {
    #[default]
    Restart,
    ContinueAndSpawn,
    RestartIfDifferent,
}

/// What kind of player occupies one slot in the match.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum PlayerClass {
    /// A bot driven over this protocol; the only variety workers spawn for.
    CustomBot,
    Human,
    Psyonix { skill: f32 },
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct PlayerConfiguration {
    pub variety: PlayerClass,
    pub name: String,
    pub team: u32,
    /// Matches a [`Controllable::spawn_id`] on the connection that owns
    /// this player.
    pub spawn_id: i32,
    pub root_dir: String,
    pub run_command: String,
    pub agent_id: String,
    pub hivemind: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct MatchConfiguration {
    pub game_map_upk: String,
    pub game_mode: GameMode,
    pub player_configurations: Vec<PlayerConfiguration>,
    pub enable_rendering: bool,
    pub enable_state_setting: bool,
    pub auto_start_agents: bool,
    pub instant_start: bool,
    pub skip_replays: bool,
    pub existing_match_behavior: ExistingMatchBehavior,
}

/// One player index this connection is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Controllable {
    pub index: u32,
    pub spawn_id: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct ControllableTeamInfo {
    pub team: u32,
    pub controllables: Vec<Controllable>,
}

// --- agent output -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode)]
pub struct ControllerState {
    pub throttle: f32,
    pub steer: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
    pub jump: bool,
    pub boost: bool,
    pub handbrake: bool,
    pub use_item: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode)]
pub struct PlayerInput {
    pub player_index: u32,
    pub controller_state: ControllerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct PlayerLoadout {
    pub team_color_id: u32,
    pub custom_color_id: u32,
    pub car_id: u32,
    pub decal_id: u32,
    pub wheels_id: u32,
    pub boost_id: u32,
    pub antenna_id: u32,
    pub hat_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct SetLoadout {
    pub index: u32,
    pub loadout: PlayerLoadout,
}

// --- inter-agent messaging and state setting --------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct MatchComm {
    /// Player index of the sender.
    pub index: u32,
    pub team: u32,
    /// Addressed to teammates only; the router drops it for the other team.
    pub team_only: bool,
    pub display: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct DesiredBallState {
    pub physics: Physics,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct DesiredCarState {
    pub index: u32,
    pub physics: Option<Physics>,
    pub boost_amount: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct DesiredGameState {
    pub ball_states: Vec<DesiredBallState>,
    pub car_states: Vec<DesiredCarState>,
}

// --- rendering --------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum RenderMessage {
    Line3D {
        start: Vector3,
        end: Vector3,
        color: Color,
    },
    PolyLine3D {
        points: Vec<Vector3>,
        color: Color,
    },
    Text2D {
        text: String,
        x: f32,
        y: f32,
        scale: f32,
        foreground: Color,
        background: Color,
    },
    Text3D {
        text: String,
        position: Vector3,
        scale: f32,
        foreground: Color,
        background: Color,
    },
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct RenderGroup {
    pub id: i32,
    pub render_messages: Vec<RenderMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct RemoveRenderGroup {
    pub id: i32,
}

/// Runtime toggle for a player's render permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct RenderingStatus {
    pub index: u32,
    pub status: bool,
}

// --- session control --------------------------------------------------------

/// Sent once right after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct ConnectionSettings {
    pub agent_id: String,
    pub wants_ball_predictions: bool,
    pub wants_comms: bool,
    pub close_between_matches: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct StartCommand {
    pub config_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct StopCommand {
    pub shutdown_server: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct InitComplete;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct DisconnectSignal;

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::config::standard;

    #[test]
    fn game_packet_round_trips() {
        let packet = GamePacket {
            players: vec![PlayerInfo {
                physics: Physics {
                    location: Vector3::new(100.0, -200.0, 17.0),
                    rotation: Rotator {
                        pitch: 0.0,
                        yaw: 1.5,
                        roll: 0.0,
                    },
                    ..Physics::default()
                },
                team: 1,
                name: "Bot".to_string(),
                boost: 33.0,
                is_demolished: false,
            }],
            balls: vec![BallInfo::default()],
            match_info: MatchInfo {
                seconds_elapsed: 4.25,
                frame_num: 510,
            },
        };

        let bytes = bincode::encode_to_vec(&packet, standard()).unwrap();
        let (decoded, read): (GamePacket, usize) =
            bincode::decode_from_slice(&bytes, standard()).unwrap();
        assert_eq!(read, bytes.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn player_variety_round_trips() {
        let config = MatchConfiguration {
            player_configurations: vec![
                PlayerConfiguration {
                    variety: PlayerClass::CustomBot,
                    name: "X".to_string(),
                    team: 0,
                    spawn_id: 7,
                    root_dir: String::new(),
                    run_command: String::new(),
                    agent_id: "test/x".to_string(),
                    hivemind: false,
                },
                PlayerConfiguration {
                    variety: PlayerClass::Psyonix { skill: 1.0 },
                    name: "AllStar".to_string(),
                    team: 1,
                    spawn_id: 8,
                    root_dir: String::new(),
                    run_command: String::new(),
                    agent_id: String::new(),
                    hivemind: false,
                },
            ],
            ..MatchConfiguration::default()
        };

        let bytes = bincode::encode_to_vec(&config, standard()).unwrap();
        let (decoded, _): (MatchConfiguration, usize) =
            bincode::decode_from_slice(&bytes, standard()).unwrap();
        assert_eq!(decoded, config);
    }
}
