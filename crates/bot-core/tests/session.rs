//! End-to-end tests against a deterministic in-process server harness that
//! feeds bytes and reads bytes over a real TCP socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rlbot_core::agent::{Agent, AgentIdentity};
use rlbot_core::manager::{AgentManager, ConnectOptions};
use rlbot_core::pool::BufferPool;
use rlbot_core::schema::{
    BallInfo, BallPrediction, ConnectionSettings, Controllable, ControllableTeamInfo,
    ControllerState, DisconnectSignal, FieldInfo, GamePacket, MatchComm, MatchConfiguration,
    PlayerClass, PlayerConfiguration, PlayerInfo, PlayerInput, PlayerLoadout,
};
use rlbot_core::wire::{self, encode_frame, FramedMessage, MessageKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);

struct Server {
    stream: TcpStream,
    buf: BytesMut,
    pool: BufferPool,
}

impl Server {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            pool: BufferPool::new(),
        }
    }

    async fn send<T: bincode::Encode>(&mut self, kind: MessageKind, payload: &T) {
        let frame = encode_frame(&self.pool, kind, payload).unwrap();
        self.stream.write_all(frame.as_slice()).await.unwrap();
    }

    async fn recv(&mut self) -> FramedMessage {
        loop {
            if let Some(frame) = wire::next_frame(&mut self.buf) {
                return frame;
            }
            let count = timeout(DEADLINE, self.stream.read_buf(&mut self.buf))
                .await
                .expect("timed out waiting for a frame")
                .unwrap();
            assert!(count > 0, "connection closed while waiting for a frame");
        }
    }

    async fn recv_kind(&mut self, kind: MessageKind) -> FramedMessage {
        let frame = self.recv().await;
        assert_eq!(frame.kind(), Some(kind), "unexpected frame");
        frame
    }

    /// Read until the peer hangs up; fails on any further frame.
    async fn expect_eof(&mut self) {
        loop {
            let count = timeout(DEADLINE, self.stream.read_buf(&mut self.buf))
                .await
                .expect("timed out waiting for eof")
                .unwrap();
            if count == 0 {
                return;
            }
            assert!(
                wire::next_frame(&mut self.buf).is_none(),
                "unexpected frame before eof"
            );
        }
    }
}

#[derive(Default)]
struct DriveAgent {
    with_loadout: bool,
}

impl Agent for DriveAgent {
    fn update(
        &mut self,
        _packet: &GamePacket,
        _prediction: Option<&BallPrediction>,
        _field_info: &FieldInfo,
        _match_config: &MatchConfiguration,
    ) {
    }

    fn output(&mut self, _index: u32) -> ControllerState {
        ControllerState {
            throttle: 1.0,
            ..ControllerState::default()
        }
    }

    fn loadout(&mut self, _index: u32) -> Option<PlayerLoadout> {
        self.with_loadout.then(PlayerLoadout::default)
    }
}

fn custom_bot(spawn_id: i32, team: u32, name: &str) -> PlayerConfiguration {
    PlayerConfiguration {
        variety: PlayerClass::CustomBot,
        name: name.to_string(),
        team,
        spawn_id,
        root_dir: String::new(),
        run_command: String::new(),
        agent_id: "test/bot".to_string(),
        hivemind: false,
    }
}

fn packet_with_players(count: usize) -> GamePacket {
    GamePacket {
        players: (0..count).map(|_| PlayerInfo::default()).collect(),
        balls: vec![BallInfo::default()],
        ..GamePacket::default()
    }
}

async fn connect_pair(
    batch_hivemind: bool,
    with_loadout: bool,
    spawned: Arc<AtomicUsize>,
) -> (AgentManager, Server) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let options = ConnectOptions {
        host: "127.0.0.1".to_string(),
        port,
        agent_id: "test/bot".to_string(),
        wants_ball_predictions: true,
        batch_hivemind,
    };
    let spawner = Arc::new(move |_identity: AgentIdentity| {
        spawned.fetch_add(1, Ordering::SeqCst);
        Box::new(DriveAgent { with_loadout }) as Box<dyn Agent>
    });

    let connect = AgentManager::connect(options, spawner);
    let accept = listener.accept();
    let (manager, accepted) = tokio::join!(connect, accept);
    let (stream, _) = accepted.unwrap();
    (manager.unwrap(), Server::new(stream))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bootstrap_tick_and_graceful_disconnect() {
    let spawned = Arc::new(AtomicUsize::new(0));
    let (mut manager, mut server) = connect_pair(false, false, spawned.clone()).await;

    // The client announces itself before anything else.
    let settings: ConnectionSettings = server
        .recv_kind(MessageKind::ConnectionSettings)
        .await
        .decode()
        .unwrap();
    assert_eq!(settings.agent_id, "test/bot");
    assert!(settings.wants_ball_predictions);
    assert!(settings.wants_comms);

    // Bootstrap in an awkward order; the client must not care.
    server.send(MessageKind::FieldInfo, &FieldInfo::default()).await;
    server
        .send(
            MessageKind::ControllableTeamInfo,
            &ControllableTeamInfo {
                team: 0,
                controllables: vec![Controllable {
                    index: 0,
                    spawn_id: 7,
                }],
            },
        )
        .await;
    server
        .send(
            MessageKind::MatchConfiguration,
            &MatchConfiguration {
                player_configurations: vec![custom_bot(7, 0, "X")],
                ..MatchConfiguration::default()
            },
        )
        .await;

    server.recv_kind(MessageKind::InitComplete).await;
    assert_eq!(spawned.load(Ordering::SeqCst), 1);

    // One tick produces exactly one input for the controlled player.
    server
        .send(MessageKind::GamePacket, &packet_with_players(1))
        .await;
    let input: PlayerInput = server
        .recv_kind(MessageKind::PlayerInput)
        .await
        .decode()
        .unwrap();
    assert_eq!(input.player_index, 0);
    assert_eq!(input.controller_state.throttle, 1.0);

    // Server-initiated shutdown: every thread exits and join returns.
    server
        .send(MessageKind::DisconnectSignal, &DisconnectSignal)
        .await;
    timeout(DEADLINE, manager.join())
        .await
        .expect("join timed out after disconnect");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hivemind_batches_loadouts_and_inputs() {
    let spawned = Arc::new(AtomicUsize::new(0));
    let (mut manager, mut server) = connect_pair(true, true, spawned.clone()).await;
    server.recv_kind(MessageKind::ConnectionSettings).await;

    let controllables: Vec<Controllable> = (0..4)
        .map(|index| Controllable {
            index,
            spawn_id: 10 + index as i32,
        })
        .collect();
    let players: Vec<PlayerConfiguration> =
        (0..4).map(|index| custom_bot(10 + index, 0, "Hive")).collect();

    server
        .send(
            MessageKind::ControllableTeamInfo,
            &ControllableTeamInfo {
                team: 0,
                controllables,
            },
        )
        .await;
    server.send(MessageKind::FieldInfo, &FieldInfo::default()).await;
    server
        .send(
            MessageKind::MatchConfiguration,
            &MatchConfiguration {
                player_configurations: players,
                ..MatchConfiguration::default()
            },
        )
        .await;

    // One worker, one loadout per controlled index, then the init marker.
    for expected_index in 0..4 {
        let frame = server.recv_kind(MessageKind::SetLoadout).await;
        let loadout: rlbot_core::schema::SetLoadout = frame.decode().unwrap();
        assert_eq!(loadout.index, expected_index);
    }
    server.recv_kind(MessageKind::InitComplete).await;
    assert_eq!(spawned.load(Ordering::SeqCst), 1);

    server
        .send(MessageKind::GamePacket, &packet_with_players(4))
        .await;
    for expected_index in 0..4 {
        let input: PlayerInput = server
            .recv_kind(MessageKind::PlayerInput)
            .await
            .decode()
            .unwrap();
        assert_eq!(input.player_index, expected_index);
    }

    manager.terminate();
    timeout(DEADLINE, manager.join()).await.expect("join timed out");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outbound_messages_arrive_in_fifo_order() {
    let spawned = Arc::new(AtomicUsize::new(0));
    let (mut manager, mut server) = connect_pair(false, false, spawned).await;

    // Burst six messages before the harness reads anything.
    for index in 0..6 {
        manager.send_match_comm(&MatchComm {
            index,
            team: 0,
            team_only: false,
            display: format!("burst {index}"),
            content: Vec::new(),
        });
    }
    timeout(DEADLINE, manager.wait_for_writer_idle())
        .await
        .expect("writer never went idle");

    server.recv_kind(MessageKind::ConnectionSettings).await;
    for expected in 0..6 {
        let comm: MatchComm = server
            .recv_kind(MessageKind::MatchComm)
            .await
            .decode()
            .unwrap();
        assert_eq!(comm.index, expected);
    }

    manager.terminate();
    timeout(DEADLINE, manager.join()).await.expect("join timed out");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_match_sends_config_and_disconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = MatchConfiguration {
        game_map_upk: "Stadium_P".to_string(),
        player_configurations: vec![custom_bot(1, 0, "ExampleBot")],
        enable_rendering: true,
        ..MatchConfiguration::default()
    };

    let launch = rlbot_core::launch::start_match("127.0.0.1", port, &config);
    let accept = listener.accept();
    let (launched, accepted) = tokio::join!(launch, accept);
    launched.unwrap();
    let (stream, _) = accepted.unwrap();
    let mut server = Server::new(stream);

    let received: MatchConfiguration = server
        .recv_kind(MessageKind::MatchConfiguration)
        .await
        .decode()
        .unwrap();
    assert_eq!(received, config);
    server.expect_eof().await;
}
