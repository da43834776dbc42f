//! Engine.IO v4 / Socket.IO text framing.
//!
//! Only the subset the hub speaks: text frames, engine types 0-4, socket
//! types CONNECT/EVENT/ACK on an optional non-root namespace with an
//! optional decimal ack id.

use anyhow::{Result, bail};
use serde_json::Value;

pub const ENGINE_OPEN: u8 = b'0';
pub const ENGINE_CLOSE: u8 = b'1';
pub const ENGINE_PING: u8 = b'2';
pub const ENGINE_PONG: u8 = b'3';
pub const ENGINE_MESSAGE: u8 = b'4';

pub const SOCKET_CONNECT: u8 = b'0';
pub const SOCKET_EVENT: u8 = b'2';
pub const SOCKET_ACK: u8 = b'3';

/// A parsed EVENT packet: `2[/ns,][id]["event", ...args]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPacket {
    pub namespace: String,
    pub id: Option<i64>,
    pub event: String,
    pub args: Vec<Value>,
}

/// A parsed ACK packet: `3[/ns,]id[...args]`. The id is mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct AckPacket {
    pub namespace: String,
    pub id: i64,
    pub args: Vec<Value>,
}

/// Split an optional `/namespace,` prefix. Anything that does not start
/// with `/` (or has no terminating comma) belongs to the root namespace.
pub fn parse_optional_namespace(s: &str) -> (&str, &str) {
    if !s.starts_with('/') {
        return ("/", s);
    }
    match s.find(',') {
        Some(comma) => (&s[..comma], &s[comma + 1..]),
        None => ("/", s),
    }
}

/// Split a leading run of ASCII digits as the ack id.
pub fn parse_optional_id_prefix(s: &str) -> (Option<i64>, &str) {
    let digits = s.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return (None, s);
    }
    match s[..digits].parse::<i64>() {
        Ok(id) => (Some(id), &s[digits..]),
        Err(_) => (None, s),
    }
}

pub fn parse_event_packet(payload: &str) -> Result<EventPacket> {
    let Some(rest) = payload.strip_prefix(SOCKET_EVENT as char) else {
        bail!("not an event packet");
    };

    let (namespace, rest) = parse_optional_namespace(rest);
    let (id, rest) = parse_optional_id_prefix(rest);
    if !rest.starts_with('[') {
        bail!("invalid event payload");
    }

    let mut arr: Vec<Value> = serde_json::from_str(rest)?;
    if arr.is_empty() {
        bail!("missing event name");
    }
    let Value::String(event) = arr.remove(0) else {
        bail!("invalid event name");
    };

    Ok(EventPacket {
        namespace: namespace.to_string(),
        id,
        event,
        args: arr,
    })
}

pub fn parse_ack_packet(payload: &str) -> Result<AckPacket> {
    let Some(rest) = payload.strip_prefix(SOCKET_ACK as char) else {
        bail!("not an ack packet");
    };

    let (namespace, rest) = parse_optional_namespace(rest);
    let (id, rest) = parse_optional_id_prefix(rest);
    let Some(id) = id else {
        bail!("missing ack id");
    };
    if !rest.starts_with('[') {
        bail!("invalid ack payload");
    }

    let args: Vec<Value> = serde_json::from_str(rest)?;
    Ok(AckPacket {
        namespace: namespace.to_string(),
        id,
        args,
    })
}

fn push_namespace(out: &mut String, namespace: &str) {
    if !namespace.is_empty() && namespace != "/" {
        out.push_str(namespace);
        out.push(',');
    }
}

pub fn build_event_packet(namespace: &str, id: Option<i64>, event: &str, args: &[Value]) -> String {
    let mut arr = Vec::with_capacity(1 + args.len());
    arr.push(Value::String(event.to_string()));
    arr.extend(args.iter().cloned());

    let mut out = String::new();
    out.push(SOCKET_EVENT as char);
    push_namespace(&mut out, namespace);
    if let Some(id) = id {
        out.push_str(&id.to_string());
    }
    out.push_str(&Value::Array(arr).to_string());
    out
}

pub fn build_connect_packet(namespace: &str, sid: &str) -> String {
    let mut out = String::new();
    out.push(SOCKET_CONNECT as char);
    push_namespace(&mut out, namespace);
    out.push_str(&serde_json::json!({ "sid": sid }).to_string());
    out
}

pub fn build_ack_packet(namespace: &str, id: i64, args: &[Value]) -> String {
    let mut out = String::new();
    out.push(SOCKET_ACK as char);
    push_namespace(&mut out, namespace);
    out.push_str(&id.to_string());
    out.push_str(&Value::Array(args.to_vec()).to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_event_root_namespace() {
        let pkt = parse_event_packet(r#"2["ping"]"#).unwrap();
        assert_eq!(pkt.namespace, "/");
        assert_eq!(pkt.id, None);
        assert_eq!(pkt.event, "ping");
        assert!(pkt.args.is_empty());
    }

    #[test]
    fn parse_event_with_id_and_args() {
        let pkt = parse_event_packet(r#"217["message",{"sid":"s1"},2]"#).unwrap();
        assert_eq!(pkt.id, Some(17));
        assert_eq!(pkt.event, "message");
        assert_eq!(pkt.args, vec![json!({"sid": "s1"}), json!(2)]);
    }

    #[test]
    fn parse_event_with_namespace() {
        let pkt = parse_event_packet(r#"2/admin,3["probe"]"#).unwrap();
        assert_eq!(pkt.namespace, "/admin");
        assert_eq!(pkt.id, Some(3));
        assert_eq!(pkt.event, "probe");
    }

    #[test]
    fn parse_event_rejects_garbage() {
        assert!(parse_event_packet("").is_err());
        assert!(parse_event_packet(r#"3["ack"]"#).is_err());
        assert!(parse_event_packet("2not-json").is_err());
        assert!(parse_event_packet("2[]").is_err());
        assert!(parse_event_packet("2[42]").is_err());
        assert!(parse_event_packet(r#"2["e", {"open": true"#).is_err());
    }

    #[test]
    fn parse_ack_requires_id() {
        assert!(parse_ack_packet(r#"3["x"]"#).is_err());
        let pkt = parse_ack_packet(r#"35["x",1]"#).unwrap();
        assert_eq!(pkt.id, 5);
        assert_eq!(pkt.args, vec![json!("x"), json!(1)]);
    }

    #[test]
    fn namespace_without_comma_is_root() {
        let (ns, rest) = parse_optional_namespace("/weird[1]");
        assert_eq!(ns, "/");
        assert_eq!(rest, "/weird[1]");
    }

    #[test]
    fn id_prefix_longest_digit_run() {
        let (id, rest) = parse_optional_id_prefix("123[true]");
        assert_eq!(id, Some(123));
        assert_eq!(rest, "[true]");

        let (id, rest) = parse_optional_id_prefix("[true]");
        assert_eq!(id, None);
        assert_eq!(rest, "[true]");
    }

    #[test]
    fn build_event_round_trips() {
        let args = vec![json!({"a": 1}), json!("two")];
        let encoded = build_event_packet("/", Some(9), "update", &args);
        let decoded = parse_event_packet(&encoded).unwrap();
        assert_eq!(decoded.namespace, "/");
        assert_eq!(decoded.id, Some(9));
        assert_eq!(decoded.event, "update");
        assert_eq!(decoded.args, args);
    }

    #[test]
    fn build_event_namespace_round_trips() {
        let encoded = build_event_packet("/admin", None, "e", &[]);
        assert!(encoded.starts_with("2/admin,["));
        let decoded = parse_event_packet(&encoded).unwrap();
        assert_eq!(decoded.namespace, "/admin");
        assert_eq!(decoded.id, None);
    }

    #[test]
    fn build_ack_empty_args() {
        assert_eq!(build_ack_packet("/", 1, &[]), "31[]");
    }

    #[test]
    fn build_connect_carries_sid() {
        let encoded = build_connect_packet("/", "abc");
        assert_eq!(encoded, r#"0{"sid":"abc"}"#);
    }
}
