//! Starts a match described by a TOML file.
//!
//! Usage: `launch_match <match.toml> [host] [port]`

use anyhow::Context as _;
use rlbot_core::schema::{
    GameMode, MatchConfiguration, PlayerClass, PlayerConfiguration,
};
use rlbot_core::{config, launch, logging};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct MatchFile {
    #[serde(default = "default_map")]
    game_map_upk: String,
    #[serde(default)]
    game_mode: String,
    #[serde(default)]
    enable_rendering: bool,
    #[serde(default)]
    enable_state_setting: bool,
    #[serde(default = "default_true")]
    auto_start_agents: bool,
    #[serde(default = "default_true")]
    instant_start: bool,
    #[serde(default)]
    skip_replays: bool,
    #[serde(default)]
    players: Vec<PlayerEntry>,
}

#[derive(Debug, Deserialize)]
struct PlayerEntry {
    name: String,
    #[serde(default)]
    team: u32,
    spawn_id: i32,
    #[serde(default)]
    root_dir: String,
    #[serde(default)]
    run_command: String,
    #[serde(default)]
    agent_id: String,
    #[serde(default)]
    hivemind: bool,
}

fn default_map() -> String {
    "Stadium_P".to_string()
}

fn default_true() -> bool {
    true
}

fn game_mode_for(raw: &str) -> anyhow::Result<GameMode> {
    Ok(match raw {
        "" | "soccer" => GameMode::Soccer,
        "hoops" => GameMode::Hoops,
        "dropshot" => GameMode::Dropshot,
        "snowday" => GameMode::Snowday,
        "rumble" => GameMode::Rumble,
        "heatseeker" => GameMode::Heatseeker,
        other => anyhow::bail!("unknown game mode: {other}"),
    })
}

fn match_configuration_from(file: MatchFile) -> anyhow::Result<MatchConfiguration> {
    let game_mode = game_mode_for(&file.game_mode)?;
    let player_configurations = file
        .players
        .into_iter()
        .map(|player| PlayerConfiguration {
            variety: PlayerClass::CustomBot,
            name: player.name,
            team: player.team % 2,
            spawn_id: player.spawn_id,
            root_dir: player.root_dir,
            run_command: player.run_command,
            agent_id: player.agent_id,
            hivemind: player.hivemind,
        })
        .collect();

    Ok(MatchConfiguration {
        game_map_upk: file.game_map_upk,
        game_mode,
        player_configurations,
        enable_rendering: file.enable_rendering,
        enable_state_setting: file.enable_state_setting,
        auto_start_agents: file.auto_start_agents,
        instant_start: file.instant_start,
        skip_replays: file.skip_replays,
        ..MatchConfiguration::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("Usage: launch_match <match.toml> [host] [port]");
        std::process::exit(2);
    };
    let addr = config::server_addr(args)?;

    let raw = std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
    let file: MatchFile = toml::from_str(&raw).with_context(|| format!("failed to parse {path}"))?;
    let configuration = match_configuration_from(file)?;

    launch::start_match(&addr.host, addr.port, &configuration).await?;
    println!(
        "match configuration delivered to [{}]:{}",
        addr.host, addr.port
    );
    Ok(())
}
