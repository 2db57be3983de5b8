use serde::{Deserialize, Serialize};

use crate::definitions::ConnectionMethod;
use crate::transport::{Role, TransportOptions};

fn default_prompt() -> String {
    "Hold your phone near the mdoc holder's device".to_string()
}

/// Settings of an engagement, loadable from JSON.
///
/// ```json
/// {
///   "prompt": "Tap the wallet",
///   "transport_options": { "ble_use_l2cap": true },
///   "negotiated_handover_candidates": [
///     { "type": "ble", "central_client_mode": { "uuid": "..." } }
///   ]
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementConfig {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub transport_options: TransportOptions,
    /// Offered in a Handover Request and warmed up before the tag is seen.
    #[serde(default)]
    pub negotiated_handover_candidates: Vec<ConnectionMethod>,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            role: Role::default(),
            transport_options: TransportOptions::default(),
            negotiated_handover_candidates: Vec::new(),
        }
    }
}

impl EngagementConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        assert_eq!(EngagementConfig::from_json("{}").unwrap(), EngagementConfig::default());
    }

    #[test]
    fn parse() {
        let json = r#"{
            "prompt": "Tap the wallet",
            "transport_options": { "ble_use_l2cap": true },
            "negotiated_handover_candidates": [
                { "type": "nfc", "max_len_command_data_field": 255, "max_len_response_data_field": 256 }
            ]
        }"#;
        let config = EngagementConfig::from_json(json).unwrap();
        assert_eq!(config.prompt, "Tap the wallet");
        assert_eq!(config.role, Role::MdocReader);
        assert!(config.transport_options.ble_use_l2cap);
        assert_eq!(config.negotiated_handover_candidates.len(), 1);
    }

    #[test]
    fn unknown_method_type_is_rejected() {
        let json = r#"{ "negotiated_handover_candidates": [ { "type": "usb" } ] }"#;
        assert!(EngagementConfig::from_json(json).is_err());
    }
}
