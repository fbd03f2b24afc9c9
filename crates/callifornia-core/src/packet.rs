//! JSON bodies of Callifornia control packets.
//!
//! Field names on the wire are fixed; the serde renames below are the
//! protocol. Every body carries a `UUID` that correlates a request with the
//! confirmation that resolves it.

use serde::{Deserialize, Serialize};

/// Protocol version announced in `Authorize`.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// `AUTHORIZE`: register a nickname hash and public key with the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorize {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "nicknameHashSender")]
    pub sender: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub version: String,
}

/// `LOGOUT`: leave the relay, withdrawing any offers still pending to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logout {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "nicknameHashSender")]
    pub sender: String,
    #[serde(rename = "nicknameHashesArray", default)]
    pub pending_callers: Vec<String>,
}

/// `GET_FRIEND_INFO`: ask the relay for a user's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendInfoRequest {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "nicknameHash")]
    pub target: String,
    #[serde(rename = "nicknameHashSender")]
    pub sender: String,
}

/// `GET_FRIEND_INFO_SUCCESS`: the relay's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendInfo {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "nicknameHash")]
    pub target: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// `START_CALLING`: a call offer.
///
/// The plaintext nickname travels AES-GCM encrypted under a one-off packet
/// key; both that key and the call key are RSA-wrapped to the callee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOffer {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "packetKey")]
    pub packet_key: String,
    #[serde(rename = "nickname")]
    pub encrypted_nickname: String,
    #[serde(rename = "nicknameHashSender")]
    pub sender: String,
    #[serde(rename = "nicknameHashReceiver")]
    pub receiver: String,
    #[serde(rename = "callKey")]
    pub call_key: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// Body shared by every peer-to-peer signal and every `*_OK`/`*_FAIL` echo:
/// `STOP_CALLING`, `CALL_ACCEPTED`, `CALL_DECLINED`, `END_CALL`, and the
/// screen/camera start/stop packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "nicknameHashSender")]
    pub sender: String,
    #[serde(rename = "nicknameHashReceiver", default)]
    pub receiver: String,
    #[serde(
        rename = "needConfirmation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub need_confirmation: Option<bool>,
}

impl Signal {
    pub fn new(uuid: String, sender: String, receiver: String) -> Self {
        Self {
            uuid,
            sender,
            receiver,
            need_confirmation: None,
        }
    }

    pub fn with_confirmation(mut self, need: bool) -> Self {
        self.need_confirmation = Some(need);
        self
    }

    pub fn needs_confirmation(&self) -> bool {
        self.need_confirmation.unwrap_or(false)
    }

    /// The echo a receiver sends back: same UUID, roles swapped.
    pub fn echo(&self) -> Signal {
        Signal::new(self.uuid.clone(), self.receiver.clone(), self.sender.clone())
    }
}

/// Minimal view of any control body, used to resolve confirmations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Correlated {
    #[serde(rename = "UUID")]
    pub uuid: String,
}
