//! The realtime server: WebSocket acceptance, the per-connection reader /
//! writer / heartbeat tasks, CONNECT authentication, event dispatch, and
//! update fan-out.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::store::{Store, now_millis};

use super::connection::{
    ClientType, Connection, HeartbeatAction, MAX_PAYLOAD, Outbound, Scope, WRITE_TIMEOUT,
};
use super::protocol::{
    self, AckPacket, ENGINE_CLOSE, ENGINE_MESSAGE, ENGINE_OPEN, ENGINE_PING, ENGINE_PONG,
    EventPacket, SOCKET_ACK, SOCKET_CONNECT, SOCKET_EVENT,
};
use super::rooms::{RoomIndex, RoomKind};

const RPC_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL_MS: u64 = 25_000;
const PING_TIMEOUT_MS: u64 = 20_000;

pub struct RealtimeServer {
    store: Arc<Store>,
    verifier: Arc<dyn TokenVerifier>,
    rooms: RoomIndex,
    update_seq: AtomicI64,
    next_conn_key: AtomicU64,
}

#[derive(Deserialize, Default)]
struct ConnectAuth {
    #[serde(default)]
    token: String,
    #[serde(rename = "clientType", default)]
    client_type: String,
    #[serde(rename = "sessionId", default)]
    session_id: String,
    #[serde(rename = "machineId", default)]
    machine_id: String,
}

impl RealtimeServer {
    pub fn new(store: Arc<Store>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            store,
            verifier,
            rooms: RoomIndex::new(),
            update_seq: AtomicI64::new(0),
            next_conn_key: AtomicU64::new(1),
        }
    }

    /// Ask every live connection to shut down; used on graceful exit.
    pub fn close_all(&self) {
        for conn in self.rooms.all_connections() {
            conn.close();
        }
    }

    fn next_update(&self) -> (String, i64) {
        let seq = self.update_seq.fetch_add(1, Ordering::SeqCst) + 1;
        (Uuid::new_v4().to_string(), seq)
    }

    /// Tear a connection out of every room and close its socket. Safe to
    /// call from any task, any number of times.
    fn drop_connection(&self, conn: &Arc<Connection>) {
        self.rooms.unregister(conn);
        conn.close();
    }

    /// Deliver a payload to the union of the target rooms, one copy per
    /// connection. Peers whose writer is gone are unregistered off-path.
    fn broadcast(self: &Arc<Self>, targets: &[(RoomKind, &str)], payload: &str) {
        for conn in self.rooms.members_union(targets) {
            if !conn.send_payload(payload) {
                let server = Arc::clone(self);
                tokio::spawn(async move {
                    server.drop_connection(&conn);
                });
            }
        }
    }

    // --- inbound frames ---

    async fn handle_frame(self: &Arc<Self>, conn: &Arc<Connection>, frame: &str) {
        let Some(first) = frame.bytes().next() else {
            return;
        };
        match first {
            ENGINE_PONG => conn.mark_pong(),
            ENGINE_MESSAGE => self.handle_socket_payload(conn, &frame[1..]).await,
            ENGINE_CLOSE => conn.close(),
            _ => {}
        }
    }

    async fn handle_socket_payload(self: &Arc<Self>, conn: &Arc<Connection>, payload: &str) {
        let Some(first) = payload.bytes().next() else {
            return;
        };
        match first {
            SOCKET_CONNECT => self.handle_connect(conn, payload),
            SOCKET_EVENT => self.handle_event(conn, payload).await,
            SOCKET_ACK => match protocol::parse_ack_packet(payload) {
                Ok(AckPacket { id, args, .. }) => conn.resolve_ack(id, args),
                Err(err) => debug!(conn = %conn.sid(), error = %err, "dropping malformed ack"),
            },
            _ => {}
        }
    }

    fn handle_connect(self: &Arc<Self>, conn: &Arc<Connection>, payload: &str) {
        if conn.is_connected() {
            return;
        }

        let (_, rest) = protocol::parse_optional_namespace(&payload[1..]);
        if rest.is_empty() {
            self.reject(conn, "Missing auth");
            return;
        }

        let Ok(auth) = serde_json::from_str::<ConnectAuth>(rest) else {
            self.reject(conn, "Invalid auth");
            return;
        };
        if auth.token.is_empty() {
            self.reject(conn, "Missing token");
            return;
        }
        let claims = match self.verifier.verify(&auth.token) {
            Ok(claims) if !claims.user_id.is_empty() => claims,
            _ => {
                self.reject(conn, "Invalid authentication token");
                return;
            }
        };

        let Some(client_type) = ClientType::parse(&auth.client_type) else {
            self.reject(conn, "Invalid client type");
            return;
        };

        if client_type == ClientType::SessionScoped {
            if auth.session_id.is_empty() {
                self.reject(conn, "Missing sessionId");
                return;
            }
            if self
                .store
                .get_session(&claims.user_id, &auth.session_id)
                .is_none()
            {
                self.reject(conn, "Session not found");
                return;
            }
        }
        if client_type == ClientType::MachineScoped {
            if auth.machine_id.is_empty() {
                self.reject(conn, "Missing machineId");
                return;
            }
            if self
                .store
                .get_machine(&claims.user_id, &auth.machine_id)
                .is_none()
            {
                self.reject(conn, "Machine not found");
                return;
            }
        }

        conn.accept(Scope {
            user_id: claims.user_id,
            client_type,
            session_id: (!auth.session_id.is_empty()).then(|| auth.session_id.clone()),
            machine_id: (!auth.machine_id.is_empty()).then(|| auth.machine_id.clone()),
        });
        self.rooms.join_scope(conn);

        conn.send_payload(&protocol::build_connect_packet("/", conn.sid()));
    }

    fn reject(&self, conn: &Arc<Connection>, reason: &str) {
        conn.send_payload(&protocol::build_event_packet(
            "/",
            None,
            "error",
            &[json!({ "message": reason })],
        ));
        conn.close();
    }

    async fn handle_event(self: &Arc<Self>, conn: &Arc<Connection>, payload: &str) {
        if !conn.is_connected() {
            return;
        }

        let pkt = match protocol::parse_event_packet(payload) {
            Ok(pkt) => pkt,
            Err(err) => {
                debug!(conn = %conn.sid(), error = %err, "dropping malformed event");
                return;
            }
        };

        match pkt.event.as_str() {
            "ping" => {
                if let Some(id) = pkt.id {
                    conn.send_payload(&protocol::build_ack_packet(&pkt.namespace, id, &[]));
                }
            }
            "rpc-register" => {
                if let Some(method) = arg_str(&pkt, "method") {
                    self.rooms.rpc_register(&method, conn);
                }
            }
            "rpc-unregister" => {
                if let Some(method) = arg_str(&pkt, "method") {
                    self.rooms.rpc_unregister(&method, conn);
                }
            }
            "rpc-call" => self.handle_rpc_call(conn, &pkt).await,
            "message" => self.handle_session_message(conn, &pkt),
            "update-metadata" => self.handle_session_metadata_update(conn, &pkt),
            "update-state" => self.handle_session_state_update(conn, &pkt),
            "machine-update-metadata" => self.handle_machine_metadata_update(conn, &pkt),
            "machine-update-state" => self.handle_machine_state_update(conn, &pkt),
            "session-alive" => {
                #[derive(Deserialize)]
                struct Body {
                    #[serde(default)]
                    sid: String,
                    #[serde(default)]
                    time: i64,
                }
                let Some(body) = parse_body::<Body>(&pkt) else {
                    return;
                };
                if body.sid.is_empty() {
                    return;
                }
                let user_id = conn_user(conn);
                self.store
                    .set_session_active(&user_id, &body.sid, true, body.time, now_millis());
            }
            "session-end" => {
                #[derive(Deserialize)]
                struct Body {
                    #[serde(default)]
                    sid: String,
                }
                let Some(body) = parse_body::<Body>(&pkt) else {
                    return;
                };
                if body.sid.is_empty() {
                    return;
                }
                let user_id = conn_user(conn);
                self.store
                    .set_session_active(&user_id, &body.sid, false, 0, now_millis());
            }
            _ => {}
        }
    }

    /// Relay an RPC to the connection owning the method and surface its
    /// first ack argument (which must be a JSON string) to the caller.
    /// Awaiting here suspends only the calling reader, never the target's.
    async fn handle_rpc_call(self: &Arc<Self>, conn: &Arc<Connection>, pkt: &EventPacket) {
        let Some(id) = pkt.id else {
            return;
        };
        #[derive(Deserialize)]
        struct Body {
            #[serde(default)]
            method: String,
            #[serde(default)]
            params: String,
        }
        let Some(body) = parse_body::<Body>(pkt) else {
            return;
        };
        if body.method.is_empty() {
            return;
        }

        let result = match self.rooms.rpc_owner(&body.method) {
            None => Err("Method not found".to_string()),
            Some(owner) => {
                let request = json!({ "method": body.method, "params": body.params });
                match owner.emit_with_ack("rpc-request", request, RPC_TIMEOUT).await {
                    Err(err) => Err(err.to_string()),
                    Ok(args) if args.is_empty() => Err("Empty response".to_string()),
                    Ok(args) => match &args[0] {
                        Value::String(result) => Ok(result.clone()),
                        _ => Err("Invalid response".to_string()),
                    },
                }
            }
        };

        let response = match result {
            Ok(result) => json!({ "ok": true, "result": result }),
            Err(error) => json!({ "ok": false, "error": error }),
        };
        conn.send_payload(&protocol::build_ack_packet(&pkt.namespace, id, &[response]));
    }

    fn handle_session_message(self: &Arc<Self>, conn: &Arc<Connection>, pkt: &EventPacket) {
        let Some(scope) = conn.scope() else {
            return;
        };
        if scope.client_type != ClientType::SessionScoped {
            return;
        }

        #[derive(Deserialize)]
        struct Body {
            #[serde(default)]
            sid: String,
            #[serde(default)]
            message: String,
        }
        let Some(body) = parse_body::<Body>(pkt) else {
            return;
        };
        if body.sid.is_empty() || Some(body.sid.as_str()) != scope.session_id.as_deref() {
            return;
        }

        let now = now_millis();
        let Ok(message) = self
            .store
            .append_message(&scope.user_id, &body.sid, &body.message, now)
        else {
            return;
        };

        let (update_id, update_seq) = self.next_update();
        let payload = protocol::build_event_packet(
            "/",
            None,
            "update",
            &[json!({
                "id": update_id,
                "seq": update_seq,
                "createdAt": now,
                "body": {
                    "t": "new-message",
                    "sid": body.sid,
                    "message": {
                        "id": message.id,
                        "seq": message.seq,
                        "content": { "t": "encrypted", "c": message.content },
                    },
                },
            })],
        );
        self.broadcast(
            &[
                (RoomKind::Session, body.sid.as_str()),
                (RoomKind::User, scope.user_id.as_str()),
            ],
            &payload,
        );
    }

    fn handle_session_metadata_update(self: &Arc<Self>, conn: &Arc<Connection>, pkt: &EventPacket) {
        let Some(id) = pkt.id else {
            return;
        };
        #[derive(Deserialize)]
        struct Body {
            #[serde(default)]
            sid: String,
            #[serde(rename = "expectedVersion", default)]
            expected_version: i64,
            #[serde(default)]
            metadata: String,
        }
        let Some(body) = parse_body::<Body>(pkt) else {
            return;
        };
        if body.sid.is_empty() {
            return;
        }

        let user_id = conn_user(conn);
        let now = now_millis();
        let outcome = self.store.update_session_metadata(
            &user_id,
            &body.sid,
            body.expected_version,
            &body.metadata,
            now,
        );

        let (status, version, value) = flatten_outcome(&outcome, String::new());
        conn.send_payload(&protocol::build_ack_packet(
            &pkt.namespace,
            id,
            &[json!({ "result": status, "version": version, "metadata": value })],
        ));
        if !outcome.is_success() {
            return;
        }

        let (update_id, update_seq) = self.next_update();
        let payload = protocol::build_event_packet(
            "/",
            None,
            "update",
            &[json!({
                "id": update_id,
                "seq": update_seq,
                "createdAt": now,
                "body": {
                    "t": "update-session",
                    "sid": body.sid,
                    "metadata": { "version": version, "value": value },
                },
            })],
        );
        self.broadcast(
            &[
                (RoomKind::Session, body.sid.as_str()),
                (RoomKind::User, user_id.as_str()),
            ],
            &payload,
        );
    }

    fn handle_session_state_update(self: &Arc<Self>, conn: &Arc<Connection>, pkt: &EventPacket) {
        let Some(id) = pkt.id else {
            return;
        };
        #[derive(Deserialize)]
        struct Body {
            #[serde(default)]
            sid: String,
            #[serde(rename = "expectedVersion", default)]
            expected_version: i64,
            #[serde(rename = "agentState", default)]
            agent_state: Option<String>,
        }
        let Some(body) = parse_body::<Body>(pkt) else {
            return;
        };
        if body.sid.is_empty() {
            return;
        }

        let user_id = conn_user(conn);
        let now = now_millis();
        let outcome = self.store.update_session_agent_state(
            &user_id,
            &body.sid,
            body.expected_version,
            body.agent_state.as_deref(),
            now,
        );

        let (status, version, value) = flatten_outcome(&outcome, None);
        conn.send_payload(&protocol::build_ack_packet(
            &pkt.namespace,
            id,
            &[json!({ "result": status, "version": version, "agentState": value })],
        ));
        if !outcome.is_success() {
            return;
        }

        let (update_id, update_seq) = self.next_update();
        let payload = protocol::build_event_packet(
            "/",
            None,
            "update",
            &[json!({
                "id": update_id,
                "seq": update_seq,
                "createdAt": now,
                "body": {
                    "t": "update-session",
                    "sid": body.sid,
                    "agentState": { "version": version, "value": value },
                },
            })],
        );
        self.broadcast(
            &[
                (RoomKind::Session, body.sid.as_str()),
                (RoomKind::User, user_id.as_str()),
            ],
            &payload,
        );
    }

    fn handle_machine_metadata_update(self: &Arc<Self>, conn: &Arc<Connection>, pkt: &EventPacket) {
        let Some(id) = pkt.id else {
            return;
        };
        #[derive(Deserialize)]
        struct Body {
            #[serde(rename = "machineId", default)]
            machine_id: String,
            #[serde(rename = "expectedVersion", default)]
            expected_version: i64,
            #[serde(default)]
            metadata: String,
        }
        let Some(body) = parse_body::<Body>(pkt) else {
            return;
        };
        if body.machine_id.is_empty() {
            return;
        }

        let user_id = conn_user(conn);
        let now = now_millis();
        let outcome = self.store.update_machine_metadata(
            &user_id,
            &body.machine_id,
            body.expected_version,
            &body.metadata,
            now,
        );

        let (status, version, value) = flatten_outcome(&outcome, String::new());
        conn.send_payload(&protocol::build_ack_packet(
            &pkt.namespace,
            id,
            &[json!({ "result": status, "version": version, "metadata": value })],
        ));
        if !outcome.is_success() {
            return;
        }

        let (update_id, update_seq) = self.next_update();
        let payload = protocol::build_event_packet(
            "/",
            None,
            "update",
            &[json!({
                "id": update_id,
                "seq": update_seq,
                "createdAt": now,
                "body": {
                    "t": "update-machine",
                    "machineId": body.machine_id,
                    "metadata": { "version": version, "value": value },
                },
            })],
        );
        self.broadcast(
            &[
                (RoomKind::Machine, body.machine_id.as_str()),
                (RoomKind::User, user_id.as_str()),
            ],
            &payload,
        );
    }

    fn handle_machine_state_update(self: &Arc<Self>, conn: &Arc<Connection>, pkt: &EventPacket) {
        let Some(id) = pkt.id else {
            return;
        };
        #[derive(Deserialize)]
        struct Body {
            #[serde(rename = "machineId", default)]
            machine_id: String,
            #[serde(rename = "expectedVersion", default)]
            expected_version: i64,
            #[serde(rename = "daemonState", default)]
            daemon_state: Option<String>,
        }
        let Some(body) = parse_body::<Body>(pkt) else {
            return;
        };
        if body.machine_id.is_empty() {
            return;
        }

        let user_id = conn_user(conn);
        let now = now_millis();
        let outcome = self.store.update_machine_daemon_state(
            &user_id,
            &body.machine_id,
            body.expected_version,
            body.daemon_state.as_deref(),
            now,
        );

        let (status, version, value) = flatten_outcome(&outcome, None);
        conn.send_payload(&protocol::build_ack_packet(
            &pkt.namespace,
            id,
            &[json!({ "result": status, "version": version, "daemonState": value })],
        ));
        if !outcome.is_success() {
            return;
        }

        let (update_id, update_seq) = self.next_update();
        let payload = protocol::build_event_packet(
            "/",
            None,
            "update",
            &[json!({
                "id": update_id,
                "seq": update_seq,
                "createdAt": now,
                "body": {
                    "t": "update-machine",
                    "machineId": body.machine_id,
                    "daemonState": { "version": version, "value": value },
                },
            })],
        );
        self.broadcast(
            &[
                (RoomKind::Machine, body.machine_id.as_str()),
                (RoomKind::User, user_id.as_str()),
            ],
            &payload,
        );
    }
}

fn conn_user(conn: &Connection) -> String {
    conn.scope().map(|s| s.user_id.clone()).unwrap_or_default()
}

fn parse_body<T: serde::de::DeserializeOwned>(pkt: &EventPacket) -> Option<T> {
    let first = pkt.args.first()?;
    serde_json::from_value(first.clone()).ok()
}

fn arg_str(pkt: &EventPacket, field: &str) -> Option<String> {
    let value = pkt.args.first()?.get(field)?.as_str()?;
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

/// Collapse an update outcome into the `(status, version, value)` triple
/// the ack responses carry. Not-found reports version 0 and the default.
fn flatten_outcome<T: Clone>(
    outcome: &crate::store::types::UpdateOutcome<T>,
    default: T,
) -> (&'static str, i64, T) {
    use crate::store::types::UpdateOutcome;
    match outcome {
        UpdateOutcome::Success { version, value }
        | UpdateOutcome::VersionMismatch { version, value } => {
            (outcome.status(), *version, value.clone())
        }
        UpdateOutcome::NotFound => ("not-found", 0, default),
    }
}

// --- transport plumbing ---

pub fn router(server: Arc<RealtimeServer>) -> Router {
    Router::new()
        .route("/v1/updates", get(upgrade))
        .route("/v1/updates/", get(upgrade))
        .route("/v1/updates/{*rest}", get(upgrade))
        .route("/v1/user-machine-daemon", get(upgrade))
        .with_state(server)
}

async fn upgrade(
    State(server): State<Arc<RealtimeServer>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_PAYLOAD)
        .max_frame_size(MAX_PAYLOAD)
        .on_upgrade(move |socket| handle_socket(server, socket))
}

async fn handle_socket(server: Arc<RealtimeServer>, socket: WebSocket) {
    let key = server.next_conn_key.fetch_add(1, Ordering::Relaxed);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = unbounded_channel::<Outbound>();
    let conn = Arc::new(Connection::new(key, out_tx));
    server.rooms.track(&conn);

    debug!(conn = %conn.sid(), "socket opened");

    let open = json!({
        "sid": conn.sid(),
        "upgrades": [],
        "pingInterval": PING_INTERVAL_MS,
        "pingTimeout": PING_TIMEOUT_MS,
        "maxPayload": MAX_PAYLOAD,
    });
    conn.send_frame(format!("{}{open}", ENGINE_OPEN as char));

    // Writer pump: the only task touching the sink, so writes are
    // serialized. A frame that cannot be flushed within the write
    // deadline means a dead or stalled peer.
    let pump_conn = Arc::clone(&conn);
    let pump = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            match out {
                Outbound::Frame(text) => {
                    let write = ws_tx.send(Message::Text(text.into()));
                    match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            debug!(conn = %pump_conn.sid(), error = %err, "socket write failed");
                            break;
                        }
                        Err(_) => {
                            warn!(conn = %pump_conn.sid(), "socket write timed out");
                            break;
                        }
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let heartbeat_conn = Arc::clone(&conn);
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if heartbeat_conn.is_closed() {
                return;
            }
            match heartbeat_conn.heartbeat_tick(Instant::now()) {
                HeartbeatAction::Close => {
                    debug!(conn = %heartbeat_conn.sid(), "heartbeat timed out");
                    heartbeat_conn.close();
                    return;
                }
                HeartbeatAction::SendPing => {
                    heartbeat_conn.send_frame((ENGINE_PING as char).to_string());
                }
                HeartbeatAction::Idle => {}
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(_) => break,
        };
        server.handle_frame(&conn, &frame).await;
        if conn.is_closed() {
            break;
        }
    }

    debug!(conn = %conn.sid(), "socket closed");
    server.drop_connection(&conn);
    heartbeat.abort();
    drop(conn);
    let _ = pump.await;
}
