//! callifornia-relay: server-side outbound path.
//!
//! The relay answers and forwards client packets through one UDP socket.
//! Producers push `OutgoingPacket`s onto a shared queue; a dedicated sender
//! thread drains it, splits packets into datagrams and transmits them.

pub mod queue;
pub mod sender;

pub use queue::{OutgoingPacket, OutgoingPacketQueue};
pub use sender::{SenderConfig, ServerPacketSender};
