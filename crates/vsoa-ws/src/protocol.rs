// SPDX-License-Identifier: Apache-2.0 OR MIT

//! WebSocket text protocol for the RTDB push bridge.
//!
//! Unlike `vsoa`'s own binary wire, the browser-facing protocol is plain
//! text for client-to-server commands (`SUBSCRIBE <prefix>`,
//! `UNSUBSCRIBE <prefix>`, `PING`) and JSON for server-to-client pushes —
//! the split spec.md §4.8 calls out explicitly.

use serde::Serialize;

/// A command sent by a browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe(String),
    Unsubscribe(String),
    Ping,
}

/// Parse one text frame. Commands are whitespace-separated, case-sensitive
/// on the verb, with the prefix taken verbatim (including its own
/// surrounding whitespace is trimmed, the prefix itself is not).
pub fn parse_command(text: &str) -> Result<ClientCommand, String> {
    let text = text.trim();
    if text == "PING" {
        return Ok(ClientCommand::Ping);
    }
    if let Some(prefix) = text.strip_prefix("SUBSCRIBE ") {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err("SUBSCRIBE requires a prefix".to_string());
        }
        return Ok(ClientCommand::Subscribe(prefix.to_string()));
    }
    if let Some(prefix) = text.strip_prefix("UNSUBSCRIBE ") {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err("UNSUBSCRIBE requires a prefix".to_string());
        }
        return Ok(ClientCommand::Unsubscribe(prefix.to_string()));
    }
    Err(format!("unrecognized command: {text}"))
}

/// A tag update pushed to every session whose prefix set matches `name`.
#[derive(Debug, Clone, Serialize)]
pub struct PointUpdate {
    pub event: &'static str,
    pub name: String,
    pub value: String,
    pub timestamp: u64,
    pub driver: String,
    pub device: String,
}

impl PointUpdate {
    pub fn new(name: &str, value: &str, timestamp: u64, driver: &str, device: &str) -> Self {
        Self {
            event: "POINT_UPDATE",
            name: name.to_string(),
            value: value.to_string(),
            timestamp,
            driver: driver.to_string(),
            device: device.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe() {
        assert_eq!(
            parse_command("SUBSCRIBE /tele/"),
            Ok(ClientCommand::Subscribe("/tele/".to_string()))
        );
    }

    #[test]
    fn parses_unsubscribe() {
        assert_eq!(
            parse_command("UNSUBSCRIBE /tele/"),
            Ok(ClientCommand::Unsubscribe("/tele/".to_string()))
        );
    }

    #[test]
    fn parses_ping() {
        assert_eq!(parse_command("PING"), Ok(ClientCommand::Ping));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(parse_command("FROB /x").is_err());
    }

    #[test]
    fn rejects_subscribe_without_prefix() {
        assert!(parse_command("SUBSCRIBE").is_err());
        assert!(parse_command("SUBSCRIBE  ").is_err());
    }

    #[test]
    fn point_update_serializes_with_event_tag() {
        let update = PointUpdate::new("/tele/speed", "42", 1_700_000_000_000, "drv", "dev");
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"event\":\"POINT_UPDATE\""));
        assert!(json.contains("\"name\":\"/tele/speed\""));
    }
}
