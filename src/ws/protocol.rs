//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

use crate::battle::command::{CommandKind, CommandPayload};
use crate::battle::result::BattleResult;
use crate::battle::runner::BattleMessage;
use crate::battle::snapshot::{BattleDelta, BattleSnapshot, SnapshotBuilder};
use crate::battle::types::{BattleId, CommandId, FleetId};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Order for one fleet, applied on the next tick
    Command {
        fleet_id: FleetId,
        command: CommandKind,
        #[serde(default)]
        payload: CommandPayload,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        battle_id: BattleId,
        server_time: u64,
        /// Full state so deltas have a base
        state: BattleSnapshot,
    },

    /// Full battle state for one tick
    Snapshot { snapshot: BattleSnapshot },

    /// Only fleets that changed since the previous tick
    Delta { delta: BattleDelta },

    BattleStarted { tick: u64 },

    BattlePaused { tick: u64 },

    BattleResumed { tick: u64 },

    BattleEnded { tick: u64, result: BattleResult },

    CommandAccepted { command_id: CommandId },

    /// Request refused, with a machine-readable code
    Error { code: String, message: String },

    /// Response to client ping
    Pong {
        /// Echoed client timestamp
        t: u64,
        /// Server timestamp
        server_time: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Turns a battle's message stream into wire messages,
/// optionally diffing consecutive snapshots
pub struct SnapshotEncoder {
    delta: bool,
    previous: Option<BattleSnapshot>,
}

impl SnapshotEncoder {
    pub fn new(delta: bool, base: Option<BattleSnapshot>) -> Self {
        Self {
            delta,
            previous: base,
        }
    }

    pub fn encode(&mut self, message: BattleMessage) -> ServerMsg {
        match message {
            BattleMessage::Snapshot(snapshot) => {
                let current = (*snapshot).clone();
                let msg = match (&self.previous, self.delta) {
                    (Some(prev), true) => ServerMsg::Delta {
                        delta: SnapshotBuilder::delta(prev, &current),
                    },
                    _ => ServerMsg::Snapshot {
                        snapshot: current.clone(),
                    },
                };
                if self.delta {
                    self.previous = Some(current);
                }
                msg
            }
            BattleMessage::Started { tick } => ServerMsg::BattleStarted { tick },
            BattleMessage::Paused { tick } => ServerMsg::BattlePaused { tick },
            BattleMessage::Resumed { tick } => ServerMsg::BattleResumed { tick },
            BattleMessage::Ended { tick, result } => ServerMsg::BattleEnded { tick, result },
        }
    }

    /// Forget the base after a gap, so the next snapshot goes out in full
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::battle::types::{BattleArea, BattleStatus};

    fn snapshot(tick: u64) -> BattleSnapshot {
        BattleSnapshot {
            battle_id: BattleId::new(),
            tick,
            status: BattleStatus::Active,
            area: BattleArea::default(),
            fleets: Vec::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn client_command_parses() {
        let id = FleetId::new();
        let json = format!(
            r#"{{"type":"command","fleet_id":"{}","command":"ROTATE","payload":{{"heading":270.0}}}}"#,
            id
        );
        match serde_json::from_str::<ClientMsg>(&json).unwrap() {
            ClientMsg::Command {
                fleet_id,
                command,
                payload,
            } => {
                assert_eq!(fleet_id, id);
                assert_eq!(command, CommandKind::Rotate);
                assert_eq!(payload.heading, Some(270.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn delta_encoder_needs_a_base() {
        let mut encoder = SnapshotEncoder::new(true, None);
        let first = encoder.encode(BattleMessage::Snapshot(Arc::new(snapshot(1))));
        assert!(matches!(first, ServerMsg::Snapshot { .. }));
        let second = encoder.encode(BattleMessage::Snapshot(Arc::new(snapshot(2))));
        assert!(matches!(second, ServerMsg::Delta { delta } if delta.base_tick == 1));

        encoder.reset();
        let third = encoder.encode(BattleMessage::Snapshot(Arc::new(snapshot(3))));
        assert!(matches!(third, ServerMsg::Snapshot { .. }));

        let mut full = SnapshotEncoder::new(false, None);
        full.encode(BattleMessage::Snapshot(Arc::new(snapshot(1))));
        let again = full.encode(BattleMessage::Snapshot(Arc::new(snapshot(2))));
        assert!(matches!(again, ServerMsg::Snapshot { .. }));
    }

    #[test]
    fn wire_tags_are_snake_case() {
        let json = serde_json::to_string(&ServerMsg::BattleStarted { tick: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"battle_started","tick":3}"#);
    }
}
