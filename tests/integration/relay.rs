//! In-process stand-in for the Callifornia relay.
//!
//! Speaks the real wire format on loopback: registers users by nickname
//! hash, answers friend-info lookups, and forwards every peer packet to the
//! `nicknameHashReceiver` named in its body. Media carries no header, so it
//! goes to every other registered user; each test runs its own relay with
//! at most one call on it.
//!
//! Tests can make it lose packets: `drop_from` swallows the next few
//! packets of one type from one user, `set_silent` swallows everything.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use callifornia_core::codec;
use callifornia_core::crypto::hash;
use callifornia_core::packet::{Authorize, FriendInfo, FriendInfoRequest, Logout};
use callifornia_core::wire::DEFAULT_MAX_DATAGRAM;
use callifornia_core::{PacketType, Reassembler};

struct User {
    addr: SocketAddr,
    public_key: String,
}

struct DropRule {
    packet_type: PacketType,
    sender: String,
    remaining: usize,
}

#[derive(Default)]
struct Shared {
    users: HashMap<String, User>,
    drops: Vec<DropRule>,
    silent: bool,
}

impl Shared {
    /// Consume one matching drop rule, if any applies.
    fn should_drop(&mut self, packet_type: PacketType, payload: &[u8]) -> bool {
        if self.silent {
            return true;
        }
        let sender = serde_json::from_slice::<Value>(payload)
            .ok()
            .and_then(|v| v["nicknameHashSender"].as_str().map(str::to_string));
        let Some(sender) = sender else { return false };

        let Some(rule) = self
            .drops
            .iter_mut()
            .find(|r| r.packet_type == packet_type && r.sender == sender && r.remaining > 0)
        else {
            return false;
        };
        rule.remaining -= 1;
        true
    }
}

pub struct FakeRelay {
    addr: SocketAddr,
    shared: Arc<Mutex<Shared>>,
    shutdown: broadcast::Sender<()>,
}

impl FakeRelay {
    pub async fn spawn() -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (shutdown, rx) = broadcast::channel(1);
        tokio::spawn(
            RelayLoop {
                socket,
                shared: shared.clone(),
                next_id: 0,
            }
            .run(rx),
        );
        Ok(Self {
            addr,
            shared,
            shutdown,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Public key `nickname` is registered with, if online.
    pub fn public_key(&self, nickname: &str) -> Option<String> {
        let shared = self.shared.lock().unwrap();
        shared.users.get(&hash(nickname)).map(|u| u.public_key.clone())
    }

    /// Swallow the next `count` packets of `packet_type` sent by `nickname`.
    pub fn drop_from(&self, packet_type: PacketType, nickname: &str, count: usize) {
        self.shared.lock().unwrap().drops.push(DropRule {
            packet_type,
            sender: hash(nickname),
            remaining: count,
        });
    }

    /// While silent the relay receives everything and answers nothing.
    pub fn set_silent(&self, silent: bool) {
        self.shared.lock().unwrap().silent = silent;
    }
}

impl Drop for FakeRelay {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

struct RelayLoop {
    socket: UdpSocket,
    shared: Arc<Mutex<Shared>>,
    next_id: u64,
}

impl RelayLoop {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut reassembler = Reassembler::default();
        let mut buf = vec![0u8; 65536];
        loop {
            let (len, from) = tokio::select! {
                _ = shutdown.recv() => return,
                r = self.socket.recv_from(&mut buf) => match r {
                    Ok(v) => v,
                    Err(_) => continue,
                },
            };
            let packet = match reassembler.push(&buf[..len]) {
                Ok(Some(p)) => p,
                _ => continue,
            };
            let Ok(packet_type) = PacketType::try_from(packet.packet_type) else {
                continue;
            };
            if self.shared.lock().unwrap().should_drop(packet_type, &packet.payload) {
                continue;
            }
            self.handle(packet_type, &packet.payload, from).await;
        }
    }

    fn addr_of(&self, nickname_hash: &str) -> Option<SocketAddr> {
        self.shared.lock().unwrap().users.get(nickname_hash).map(|u| u.addr)
    }

    async fn handle(&mut self, packet_type: PacketType, payload: &[u8], from: SocketAddr) {
        match packet_type {
            PacketType::Ping => self.send(PacketType::PingSuccess, &[], from).await,
            PacketType::PingSuccess => {}

            PacketType::Authorize => {
                let Ok(body) = serde_json::from_slice::<Authorize>(payload) else { return };
                let reply = {
                    let mut shared = self.shared.lock().unwrap();
                    let taken = shared.users.get(&body.sender).is_some_and(|u| u.addr != from);
                    if taken {
                        PacketType::AuthorizeFail
                    } else {
                        shared.users.insert(
                            body.sender,
                            User {
                                addr: from,
                                public_key: body.public_key,
                            },
                        );
                        PacketType::AuthorizeSuccess
                    }
                };
                self.send_json(reply, &json!({ "UUID": body.uuid }), from).await;
            }

            PacketType::Logout => {
                let Ok(body) = serde_json::from_slice::<Logout>(payload) else { return };
                self.shared.lock().unwrap().users.remove(&body.sender);
                self.send_json(PacketType::LogoutOk, &json!({ "UUID": body.uuid }), from).await;
            }

            PacketType::GetFriendInfo => {
                let Ok(body) = serde_json::from_slice::<FriendInfoRequest>(payload) else { return };
                let public_key = {
                    let shared = self.shared.lock().unwrap();
                    shared.users.get(&body.target).map(|u| u.public_key.clone())
                };
                match public_key {
                    Some(public_key) => {
                        let info = FriendInfo {
                            uuid: body.uuid,
                            target: body.target,
                            public_key,
                        };
                        let info = serde_json::to_value(info).unwrap_or(Value::Null);
                        self.send_json(PacketType::GetFriendInfoSuccess, &info, from).await;
                    }
                    None => {
                        let fail = json!({ "UUID": body.uuid });
                        self.send_json(PacketType::GetFriendInfoFail, &fail, from).await;
                    }
                }
            }

            PacketType::Voice | PacketType::Screen | PacketType::Camera => {
                let others: Vec<SocketAddr> = {
                    let shared = self.shared.lock().unwrap();
                    shared
                        .users
                        .values()
                        .map(|u| u.addr)
                        .filter(|addr| *addr != from)
                        .collect()
                };
                for addr in others {
                    self.send(packet_type, payload, addr).await;
                }
            }

            _ => {
                let Ok(body) = serde_json::from_slice::<Value>(payload) else { return };
                let receiver = body["nicknameHashReceiver"].as_str().unwrap_or_default();
                match self.addr_of(receiver) {
                    Some(addr) => self.send(packet_type, payload, addr).await,
                    None if packet_type == PacketType::StartCalling => {
                        let fail = json!({ "UUID": body["UUID"] });
                        self.send_json(PacketType::StartCallingFail, &fail, from).await;
                    }
                    None => {}
                }
            }
        }
    }

    async fn send_json(&mut self, packet_type: PacketType, body: &Value, to: SocketAddr) {
        let payload = body.to_string();
        self.send(packet_type, payload.as_bytes(), to).await;
    }

    async fn send(&mut self, packet_type: PacketType, payload: &[u8], to: SocketAddr) {
        self.next_id += 1;
        let Ok(datagrams) = codec::split(self.next_id, packet_type.into(), payload, DEFAULT_MAX_DATAGRAM) else {
            return;
        };
        for datagram in &datagrams {
            let _ = self.socket.send_to(datagram, to).await;
        }
    }
}
