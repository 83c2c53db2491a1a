//! Command targets for the character runtime.
//!
//! [`BridgeTarget`] forwards every command as one JSON text frame over an
//! [`EventTransport`] to whatever hosts the runtime:
//!
//! ```json
//! {"object": "WebGLInputManagerGameObject", "method": "TriggerByName", "param": "{...}"}
//! ```
//!
//! The runtime counts as ready while the bridge socket is open.
//! [`LogTarget`] just logs, for running without a runtime attached.

use puppetproto::EventTransport;
use puppetstage::{CommandTarget, TargetError};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct BridgeCommand<'a> {
    object: &'a str,
    method: &'a str,
    param: &'a str,
}

/// Encode one command as a bridge frame.
pub fn encode_command(object: &str, method: &str, param: &str) -> Result<String, TargetError> {
    serde_json::to_string(&BridgeCommand {
        object,
        method,
        param,
    })
    .map_err(|e| TargetError::Rejected {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

pub struct BridgeTarget {
    transport: EventTransport,
}

impl BridgeTarget {
    pub fn new(transport: EventTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &EventTransport {
        &self.transport
    }
}

impl CommandTarget for BridgeTarget {
    fn is_ready(&self) -> bool {
        self.transport.is_open()
    }

    fn send_message(&self, object: &str, method: &str, param: &str) -> Result<(), TargetError> {
        if !self.transport.is_open() {
            return Err(TargetError::NotReady);
        }
        let frame = encode_command(object, method, param)?;
        if self.transport.send(&frame) {
            Ok(())
        } else {
            Err(TargetError::NotReady)
        }
    }
}

/// Always-ready target that logs each command.
#[derive(Debug, Default)]
pub struct LogTarget;

impl CommandTarget for LogTarget {
    fn is_ready(&self) -> bool {
        true
    }

    fn send_message(&self, object: &str, method: &str, param: &str) -> Result<(), TargetError> {
        info!(object, method, param, "command");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puppetproto::TransportConfig;
    use serde_json::json;

    #[test]
    fn frame_shape() {
        let frame = encode_command("bg", "SetBackground", "bg_room").unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"object": "bg", "method": "SetBackground", "param": "bg_room"})
        );
    }

    #[test]
    fn unopened_bridge_is_not_ready() {
        let transport =
            EventTransport::new(TransportConfig::new("bridge", "ws://127.0.0.1:9/")).unwrap();
        let target = BridgeTarget::new(transport);
        assert!(!target.is_ready());
        assert!(matches!(
            target.send_message("obj", "PlayVoiceFromJS", ""),
            Err(TargetError::NotReady)
        ));
    }

    #[test]
    fn log_target_accepts_everything() {
        let target = LogTarget;
        assert!(target.is_ready());
        assert!(target.send_message("obj", "ClearAllTextBoxes", "").is_ok());
    }
}
