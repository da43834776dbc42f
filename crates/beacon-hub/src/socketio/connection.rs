//! Per-connection state: outbound channel, connect handshake state,
//! pending-ack table, and heartbeat bookkeeping.
//!
//! A connection never holds references back into the room index; it only
//! records its scope keys so unregistration can walk back into the index.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::protocol::{ENGINE_MESSAGE, build_event_packet};

pub const PING_INTERVAL: Duration = Duration::from_secs(25);
pub const PING_TIMEOUT: Duration = Duration::from_secs(20);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_PAYLOAD: usize = 1_000_000;

/// Message handed to the connection's writer pump.
#[derive(Debug)]
pub enum Outbound {
    Frame(String),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    UserScoped,
    SessionScoped,
    MachineScoped,
}

impl ClientType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user-scoped" => Some(Self::UserScoped),
            "session-scoped" => Some(Self::SessionScoped),
            "machine-scoped" => Some(Self::MachineScoped),
            _ => None,
        }
    }
}

/// Identity recorded once the CONNECT handshake is accepted.
#[derive(Debug, Clone)]
pub struct Scope {
    pub user_id: String,
    pub client_type: ClientType,
    pub session_id: Option<String>,
    pub machine_id: Option<String>,
}

struct AckTable {
    next_id: i64,
    pending: HashMap<i64, oneshot::Sender<Vec<Value>>>,
}

struct Heartbeat {
    awaiting_pong: bool,
    ping_sent_at: Instant,
    next_ping_at: Instant,
}

/// What the heartbeat ticker should do after a 1s tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Idle,
    SendPing,
    Close,
}

pub struct Connection {
    key: u64,
    sid: String,
    tx: mpsc::UnboundedSender<Outbound>,
    connected: AtomicBool,
    closed: AtomicBool,
    scope: OnceLock<Scope>,
    acks: Mutex<AckTable>,
    heartbeat: Mutex<Heartbeat>,
}

impl Connection {
    pub fn new(key: u64, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            key,
            sid: Uuid::new_v4().to_string(),
            tx,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            scope: OnceLock::new(),
            acks: Mutex::new(AckTable {
                next_id: 0,
                pending: HashMap::new(),
            }),
            heartbeat: Mutex::new(Heartbeat {
                awaiting_pong: false,
                ping_sent_at: Instant::now(),
                next_ping_at: Instant::now() + PING_INTERVAL,
            }),
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Scope recorded at CONNECT; `None` while still in the opened state.
    pub fn scope(&self) -> Option<&Scope> {
        self.scope.get()
    }

    /// Accept the CONNECT handshake. Idempotence is enforced by the caller
    /// checking `is_connected` first.
    pub fn accept(&self, scope: Scope) {
        let _ = self.scope.set(scope);
        self.connected.store(true, Ordering::Release);
    }

    /// Queue a raw text frame. Returns false when the writer pump is gone,
    /// which callers treat as a dead peer.
    pub fn send_frame(&self, frame: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    /// Queue a Socket.IO payload inside an engine MESSAGE frame.
    pub fn send_payload(&self, payload: &str) -> bool {
        let mut frame = String::with_capacity(payload.len() + 1);
        frame.push(ENGINE_MESSAGE as char);
        frame.push_str(payload);
        self.send_frame(frame)
    }

    /// Idempotent close: flips the flag once, then asks the pump to send a
    /// close frame and shut the socket down.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Outbound::Close);
    }

    /// Emit an EVENT carrying a fresh ack id and wait for the matching ACK.
    pub async fn emit_with_ack(
        &self,
        event: &str,
        arg: Value,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let id = {
            let mut acks = self.acks.lock().unwrap();
            acks.next_id += 1;
            let id = acks.next_id;
            acks.pending.insert(id, ack_tx);
            id
        };

        let packet = build_event_packet("/", Some(id), event, std::slice::from_ref(&arg));
        if !self.send_payload(&packet) {
            self.acks.lock().unwrap().pending.remove(&id);
            bail!("connection closed");
        }

        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(args)) => Ok(args),
            Ok(Err(_)) => {
                self.acks.lock().unwrap().pending.remove(&id);
                bail!("connection closed");
            }
            Err(_) => {
                self.acks.lock().unwrap().pending.remove(&id);
                bail!("RPC timeout");
            }
        }
    }

    /// Resolve a pending ack; unknown ids are ignored.
    pub fn resolve_ack(&self, id: i64, args: Vec<Value>) {
        let slot = self.acks.lock().unwrap().pending.remove(&id);
        if let Some(tx) = slot {
            let _ = tx.send(args);
        }
    }

    pub fn mark_pong(&self) {
        self.heartbeat.lock().unwrap().awaiting_pong = false;
    }

    /// One heartbeat tick: decide whether to ping, close, or do nothing.
    pub fn heartbeat_tick(&self, now: Instant) -> HeartbeatAction {
        let mut hb = self.heartbeat.lock().unwrap();
        if hb.awaiting_pong {
            if now.duration_since(hb.ping_sent_at) > PING_TIMEOUT {
                return HeartbeatAction::Close;
            }
            return HeartbeatAction::Idle;
        }
        if now >= hb.next_ping_at {
            hb.awaiting_pong = true;
            hb.ping_sent_at = now;
            hb.next_ping_at = now + PING_INTERVAL;
            return HeartbeatAction::SendPing;
        }
        HeartbeatAction::Idle
    }
}
