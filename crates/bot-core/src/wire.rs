// wire.rs
//
// Frame layout and the shared frame handle. Every message on the stream is
// a 4-byte header (big-endian type, big-endian payload length) followed by
// a bincode-encoded payload.

use anyhow::Context as _;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::pool::BufferPool;

pub const HEADER_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// Wire discriminator for every message this client understands.
///
/// The numeric values are part of the protocol contract shared with the
/// server; never reorder them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    None = 0,
    GamePacket = 1,
    FieldInfo = 2,
    StartCommand = 3,
    MatchConfiguration = 4,
    PlayerInput = 5,
    DesiredGameState = 6,
    RenderGroup = 7,
    RemoveRenderGroup = 8,
    MatchComm = 9,
    BallPrediction = 10,
    ConnectionSettings = 11,
    StopCommand = 12,
    SetLoadout = 13,
    InitComplete = 14,
    ControllableTeamInfo = 15,
    DisconnectSignal = 16,
    RenderingStatus = 17,
}

impl MessageKind {
    pub fn from_wire(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::None,
            1 => Self::GamePacket,
            2 => Self::FieldInfo,
            3 => Self::StartCommand,
            4 => Self::MatchConfiguration,
            5 => Self::PlayerInput,
            6 => Self::DesiredGameState,
            7 => Self::RenderGroup,
            8 => Self::RemoveRenderGroup,
            9 => Self::MatchComm,
            10 => Self::BallPrediction,
            11 => Self::ConnectionSettings,
            12 => Self::StopCommand,
            13 => Self::SetLoadout,
            14 => Self::InitComplete,
            15 => Self::ControllableTeamInfo,
            16 => Self::DisconnectSignal,
            17 => Self::RenderingStatus,
            _ => return None,
        })
    }
}

/// One framed message: a shared view of header plus payload.
///
/// Copies are cheap; they reference the same underlying block, which keeps
/// that block out of the pool until the last copy is dropped.
#[derive(Clone, Debug)]
pub struct FramedMessage {
    bytes: Bytes,
}

impl FramedMessage {
    pub(crate) fn from_bytes(bytes: Bytes) -> Self {
        debug_assert!(bytes.len() >= HEADER_LEN);
        debug_assert_eq!(
            bytes.len(),
            HEADER_LEN + BigEndian::read_u16(&bytes[2..4]) as usize
        );
        Self { bytes }
    }

    /// Message kind, or None when the discriminator is unknown.
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_wire(self.raw_kind())
    }

    pub fn raw_kind(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[0..2])
    }

    pub fn payload_len(&self) -> usize {
        BigEndian::read_u16(&self.bytes[2..4]) as usize
    }

    /// Size of the frame including its header.
    pub fn frame_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    /// The whole frame, header included, as it appears on the wire.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode the payload into its schema type.
    ///
    /// Decoding doubles as verification: a malformed payload or trailing
    /// bytes log a warning and yield None, and the caller drops the frame
    /// while the connection continues.
    pub fn decode<T: bincode::Decode<()>>(&self) -> Option<T> {
        match bincode::decode_from_slice(self.payload(), bincode::config::standard()) {
            Ok((value, read)) if read == self.payload_len() => Some(value),
            Ok(_) => {
                warn!(kind = self.raw_kind(), "frame payload has trailing bytes");
                None
            }
            Err(err) => {
                warn!(kind = self.raw_kind(), "dropping undecodable frame: {err}");
                None
            }
        }
    }
}

/// Encode `payload` into a pooled block and frame it.
pub fn encode_frame<T: bincode::Encode>(
    pool: &BufferPool,
    kind: MessageKind,
    payload: &T,
) -> anyhow::Result<FramedMessage> {
    let mut block = pool.get();
    block.put_u16(kind as u16);
    block.put_u16(0); // length, patched below

    let mut writer = block.writer();
    let result = bincode::encode_into_std_write(payload, &mut writer, bincode::config::standard());
    let mut block = writer.into_inner();
    if let Err(err) = result.with_context(|| format!("encode {kind:?} payload")) {
        pool.put(block);
        return Err(err);
    }

    let payload_len = block.len() - HEADER_LEN;
    if payload_len > MAX_PAYLOAD_LEN {
        pool.put(block);
        anyhow::bail!("{kind:?} payload is too large to frame ({payload_len} bytes)");
    }
    BigEndian::write_u16(&mut block[2..4], payload_len as u16);

    let frame = block.split().freeze();
    pool.put(block);
    Ok(FramedMessage::from_bytes(frame))
}

/// Split one complete frame off the front of the rolling read buffer.
///
/// Returns None while only a partial frame (or nothing) is buffered; the
/// remaining bytes stay in place for the next read to extend.
pub fn next_frame(buf: &mut BytesMut) -> Option<FramedMessage> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let frame_len = HEADER_LEN + BigEndian::read_u16(&buf[2..4]) as usize;
    if buf.len() < frame_len {
        return None;
    }
    Some(FramedMessage::from_bytes(buf.split_to(frame_len).freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{InitComplete, MatchComm};

    #[test]
    fn kind_wire_values_round_trip() {
        for raw in 0..=17u16 {
            let kind = MessageKind::from_wire(raw).unwrap();
            assert_eq!(kind as u16, raw);
        }
        assert_eq!(MessageKind::from_wire(18), None);
        assert_eq!(MessageKind::from_wire(u16::MAX), None);
    }

    #[test]
    fn encoded_frame_carries_header_and_payload() {
        let pool = BufferPool::new();
        let comm = MatchComm {
            index: 2,
            team: 1,
            team_only: true,
            display: "hello".to_string(),
            content: vec![1, 2, 3],
        };
        let frame = encode_frame(&pool, MessageKind::MatchComm, &comm).unwrap();

        assert_eq!(frame.kind(), Some(MessageKind::MatchComm));
        assert_eq!(frame.frame_len(), HEADER_LEN + frame.payload_len());
        assert_eq!(frame.decode::<MatchComm>().unwrap(), comm);
    }

    #[test]
    fn empty_payload_is_legal() {
        let pool = BufferPool::new();
        let frame = encode_frame(&pool, MessageKind::InitComplete, &InitComplete).unwrap();
        assert_eq!(frame.payload_len(), 0);
        assert!(frame.decode::<InitComplete>().is_some());
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let pool = BufferPool::new();
        let blob = vec![0u8; MAX_PAYLOAD_LEN];
        // The length prefix pushes the encoded size past the 16-bit limit.
        assert!(encode_frame(&pool, MessageKind::MatchComm, &blob).is_err());
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let pool = BufferPool::new();
        let frame = encode_frame(&pool, MessageKind::MatchComm, &(7u32, 0u32, false)).unwrap();
        // MatchComm expects two more fields, so this decode must fail
        // rather than silently accept a short payload.
        assert!(frame.decode::<MatchComm>().is_none());
    }

    #[test]
    fn framing_survives_arbitrary_fragmentation() {
        let pool = BufferPool::new();
        let frames: Vec<FramedMessage> = (0..5)
            .map(|i| {
                let comm = MatchComm {
                    index: i,
                    team: i % 2,
                    team_only: false,
                    display: format!("message {i}"),
                    content: vec![i as u8; i as usize],
                };
                encode_frame(&pool, MessageKind::MatchComm, &comm).unwrap()
            })
            .collect();

        let mut stream = Vec::new();
        for frame in &frames {
            stream.extend_from_slice(frame.as_slice());
        }

        // Replay the byte stream in every chunk size from single bytes up
        // to the whole stream at once; the parsed frames must not change.
        for chunk_size in 1..=stream.len() {
            let mut buf = BytesMut::new();
            let mut parsed = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                buf.extend_from_slice(chunk);
                while let Some(frame) = next_frame(&mut buf) {
                    parsed.push(frame);
                }
            }
            assert!(buf.is_empty());
            assert_eq!(parsed.len(), frames.len());
            for (got, want) in parsed.iter().zip(&frames) {
                assert_eq!(got.as_slice(), want.as_slice());
            }
        }
    }
}
