//! callifornia-core: wire format, chunk codec, crypto and configuration.
//! The client and relay crates both depend on this one.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod packet;
pub mod wire;

pub use codec::{ReassembledPacket, Reassembler};
pub use config::CallsConfig;
pub use crypto::{AesKey, CryptoError, KeyPair};
pub use rsa::RsaPublicKey;
pub use wire::{ChunkHeader, PacketType, WireError};
