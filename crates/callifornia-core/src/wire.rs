//! Callifornia wire format: the chunk header and packet type registry.
//!
//! Every UDP datagram exchanged with the relay begins with an 18-byte
//! big-endian `ChunkHeader`. Logical packets larger than one datagram are
//! split across several chunks sharing a `packet_id`; see `codec` for the
//! splitting and reassembly rules.
//!
//! The header is `#[repr(C)]` over zerocopy's big-endian integer wrappers,
//! which are alignment-1, so the layout has no padding and parsing never
//! needs unsafe code.

use static_assertions::assert_eq_size;
use thiserror::Error;
use zerocopy::byteorder::{BigEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Chunk Header ─────────────────────────────────────────────────────────────

/// Prefix of every datagram.
///
/// Wire size: 18 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ChunkHeader {
    /// Random id shared by all chunks of one logical packet.
    packet_id: U64<BigEndian>,
    /// Zero-based position of this chunk. Always `< chunks_count`.
    chunk_index: U16<BigEndian>,
    /// Number of chunks the logical packet was split into.
    chunks_count: U16<BigEndian>,
    /// Bytes of payload following this header in the same datagram.
    payload_length: U16<BigEndian>,
    /// Raw `PacketType` value. Identical across all chunks of a packet.
    packet_type: U32<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(ChunkHeader, [u8; 18]);

impl ChunkHeader {
    pub fn new(
        packet_id: u64,
        chunk_index: u16,
        chunks_count: u16,
        payload_length: u16,
        packet_type: u32,
    ) -> Self {
        Self {
            packet_id: U64::new(packet_id),
            chunk_index: U16::new(chunk_index),
            chunks_count: U16::new(chunks_count),
            payload_length: U16::new(payload_length),
            packet_type: U32::new(packet_type),
        }
    }

    /// Parse a header from the front of a datagram.
    pub fn parse(datagram: &[u8]) -> Result<Self, WireError> {
        if datagram.len() < HEADER_SIZE {
            return Err(WireError::TooShort(datagram.len()));
        }
        Self::read_from_prefix(datagram).ok_or(WireError::TooShort(datagram.len()))
    }

    pub fn packet_id(&self) -> u64 {
        self.packet_id.get()
    }

    pub fn chunk_index(&self) -> u16 {
        self.chunk_index.get()
    }

    pub fn chunks_count(&self) -> u16 {
        self.chunks_count.get()
    }

    pub fn payload_length(&self) -> u16 {
        self.payload_length.get()
    }

    pub fn packet_type(&self) -> u32 {
        self.packet_type.get()
    }
}

// ── Packet Types ─────────────────────────────────────────────────────────────

/// Every packet type the client and relay understand.
///
/// `Ping` and `PingSuccess` carry no body. `Voice`, `Screen` and `Camera`
/// carry `IV || AES-CTR ciphertext`. Everything else is a UTF-8 JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    Ping = 0,
    PingSuccess = 1,
    Authorize = 2,
    AuthorizeSuccess = 3,
    AuthorizeFail = 4,
    Logout = 5,
    LogoutOk = 6,
    GetFriendInfo = 7,
    GetFriendInfoSuccess = 8,
    GetFriendInfoFail = 9,
    StartCalling = 10,
    StartCallingOk = 11,
    StartCallingFail = 12,
    StopCalling = 13,
    StopCallingOk = 14,
    CallAccepted = 15,
    CallAcceptedOk = 16,
    CallAcceptedFail = 17,
    CallDeclined = 18,
    CallDeclinedOk = 19,
    EndCall = 20,
    EndCallOk = 21,
    StartScreenSharing = 22,
    StartScreenSharingOk = 23,
    StartScreenSharingFail = 24,
    StopScreenSharing = 25,
    StopScreenSharingOk = 26,
    StartCameraSharing = 27,
    StartCameraSharingOk = 28,
    StartCameraSharingFail = 29,
    StopCameraSharing = 30,
    StopCameraSharingOk = 31,
    Voice = 32,
    Screen = 33,
    Camera = 34,
}

impl PacketType {
    const ALL: [PacketType; 35] = [
        PacketType::Ping,
        PacketType::PingSuccess,
        PacketType::Authorize,
        PacketType::AuthorizeSuccess,
        PacketType::AuthorizeFail,
        PacketType::Logout,
        PacketType::LogoutOk,
        PacketType::GetFriendInfo,
        PacketType::GetFriendInfoSuccess,
        PacketType::GetFriendInfoFail,
        PacketType::StartCalling,
        PacketType::StartCallingOk,
        PacketType::StartCallingFail,
        PacketType::StopCalling,
        PacketType::StopCallingOk,
        PacketType::CallAccepted,
        PacketType::CallAcceptedOk,
        PacketType::CallAcceptedFail,
        PacketType::CallDeclined,
        PacketType::CallDeclinedOk,
        PacketType::EndCall,
        PacketType::EndCallOk,
        PacketType::StartScreenSharing,
        PacketType::StartScreenSharingOk,
        PacketType::StartScreenSharingFail,
        PacketType::StopScreenSharing,
        PacketType::StopScreenSharingOk,
        PacketType::StartCameraSharing,
        PacketType::StartCameraSharingOk,
        PacketType::StartCameraSharingFail,
        PacketType::StopCameraSharing,
        PacketType::StopCameraSharingOk,
        PacketType::Voice,
        PacketType::Screen,
        PacketType::Camera,
    ];

    /// Bodiless liveness packets.
    pub fn is_ping(self) -> bool {
        matches!(self, PacketType::Ping | PacketType::PingSuccess)
    }

    /// Encrypted media frames. Never JSON.
    pub fn is_media(self) -> bool {
        matches!(self, PacketType::Voice | PacketType::Screen | PacketType::Camera)
    }

    /// Whether the body is a JSON control object.
    pub fn is_json(self) -> bool {
        !self.is_ping() && !self.is_media()
    }

    /// Requests a peer originates and the relay forwards to us.
    pub fn is_peer_request(self) -> bool {
        matches!(
            self,
            PacketType::StartCalling
                | PacketType::StopCalling
                | PacketType::CallAccepted
                | PacketType::CallDeclined
                | PacketType::EndCall
                | PacketType::StartScreenSharing
                | PacketType::StopScreenSharing
                | PacketType::StartCameraSharing
                | PacketType::StopCameraSharing
        )
    }
}

impl TryFrom<u32> for PacketType {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        PacketType::ALL
            .get(value as usize)
            .copied()
            .ok_or(WireError::UnknownPacketType(value))
    }
}

impl From<PacketType> for u32 {
    fn from(t: PacketType) -> u32 {
        t as u32
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of `ChunkHeader` on the wire.
pub const HEADER_SIZE: usize = 18;

/// Default datagram cap: 1300 bytes of payload plus the header.
pub const DEFAULT_MAX_DATAGRAM: usize = 1300 + HEADER_SIZE;

/// Smallest datagram cap the codec accepts.
pub const MIN_MAX_DATAGRAM: usize = 32;

/// Most chunks one logical packet may span (`chunks_count` is a u16).
pub const MAX_CHUNKS: usize = u16::MAX as usize;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {0} bytes, header needs 18")]
    TooShort(usize),

    #[error("payload length {declared} exceeds the {present} bytes present")]
    TruncatedPayload { declared: usize, present: usize },

    #[error("chunk index {index} out of range for {count} chunks")]
    ChunkIndexOutOfRange { index: u16, count: u16 },

    #[error("chunk count is zero")]
    ZeroChunkCount,

    #[error("unknown packet type: {0}")]
    UnknownPacketType(u32),

    #[error("datagram cap {0} is below the minimum of 32 bytes")]
    DatagramTooSmall(usize),

    #[error("payload of {0} bytes needs more than 65535 chunks")]
    PayloadTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
