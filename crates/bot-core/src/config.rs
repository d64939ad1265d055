// Every binary resolves the server endpoint the same way: positional
// `[host] [port]` arguments win over RLBOT_SERVER_IP / RLBOT_SERVER_PORT,
// which fall back to the local default server.

use anyhow::Context as _;

pub const DEFAULT_SERVER_IP: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 23234;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Resolve the server endpoint from positional arguments and environment.
pub fn server_addr<I>(args: I) -> anyhow::Result<ServerAddr>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let host = args
        .next()
        .or_else(|| env_nonempty("RLBOT_SERVER_IP"))
        .unwrap_or_else(|| DEFAULT_SERVER_IP.to_string());
    let port = match args.next().or_else(|| env_nonempty("RLBOT_SERVER_PORT")) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid server port: {raw}"))?,
        None => DEFAULT_SERVER_PORT,
    };
    Ok(ServerAddr { host, port })
}

/// The identifier the server uses to pair this process with its players.
/// Refuses to run without one.
pub fn agent_id() -> anyhow::Result<String> {
    env_nonempty("RLBOT_AGENT_ID").context("missing environment variable RLBOT_AGENT_ID")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_arguments_win() {
        let addr = server_addr(vec!["10.0.0.2".to_string(), "4444".to_string()]).unwrap();
        assert_eq!(
            addr,
            ServerAddr {
                host: "10.0.0.2".to_string(),
                port: 4444,
            }
        );
    }

    #[test]
    fn host_alone_keeps_default_port_unless_env_overrides() {
        // RLBOT_SERVER_PORT is unset in the test environment.
        let addr = server_addr(vec!["192.168.1.5".to_string()]).unwrap();
        assert_eq!(addr.host, "192.168.1.5");
    }

    #[test]
    fn bad_port_is_an_error() {
        let result = server_addr(vec!["host".to_string(), "not-a-port".to_string()]);
        assert!(result.is_err());
    }
}
