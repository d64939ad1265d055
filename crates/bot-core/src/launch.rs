//! One-shot helpers for starting and stopping matches.
//!
//! These reuse the transport directly: connect, put a single message on the
//! wire, wait for the writer to drain, and disconnect. No response frame is
//! awaited.

use crate::schema::{MatchConfiguration, StartCommand, StopCommand};
use crate::transport::{MessageHandler, OutboundSender, Transport};
use crate::wire::{FramedMessage, MessageKind};

/// Nothing inbound matters to a one-shot connection except the shutdown
/// sentinel.
struct CommandHandler {
    sender: OutboundSender,
}

impl MessageHandler for CommandHandler {
    fn on_frame(&mut self, frame: FramedMessage) {
        if matches!(
            frame.kind(),
            Some(MessageKind::None | MessageKind::DisconnectSignal)
        ) {
            self.sender.terminate();
        }
    }
}

/// Ask the server to start a match with the given configuration.
pub async fn start_match(host: &str, port: u16, config: &MatchConfiguration) -> anyhow::Result<()> {
    send_one(host, port, MessageKind::MatchConfiguration, config).await
}

/// Ask the server to start a match from a configuration file it can read.
pub async fn start_match_from_path(host: &str, port: u16, config_path: &str) -> anyhow::Result<()> {
    let command = StartCommand {
        config_path: config_path.to_string(),
    };
    send_one(host, port, MessageKind::StartCommand, &command).await
}

/// Ask the server to stop the current match, optionally shutting the
/// server down with it.
pub async fn stop_match(host: &str, port: u16, shutdown_server: bool) -> anyhow::Result<()> {
    let command = StopCommand { shutdown_server };
    send_one(host, port, MessageKind::StopCommand, &command).await
}

async fn send_one<T: bincode::Encode>(
    host: &str,
    port: u16,
    kind: MessageKind,
    payload: &T,
) -> anyhow::Result<()> {
    let mut transport = Transport::connect(host, port, |sender| CommandHandler { sender }).await?;
    transport.sender().send(kind, payload);
    transport.wait_for_writer_idle().await;
    transport.terminate();
    transport.join().await;
    Ok(())
}
