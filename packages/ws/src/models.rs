use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};

/// Backend-wide operating mode.
///
/// `Server` means every client sees the shared data set; `Local` means the
/// backend is gated to the operator and non-admin clients are blocked.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Server,
    Local,
}

impl std::fmt::Display for ServerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Messages sent from a client to the backend.
#[derive(Debug, Serialize, Deserialize, Clone, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum InboundPayload {
    Connect(ConnectPayload),
    GetMode(EmptyPayload),
    Ping(PingPayload),
    Pong(PongPayload),
    Disconnect(DisconnectPayload),
}

impl std::fmt::Display for InboundPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EmptyPayload {}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    pub client_id: String,
    pub is_admin: bool,
    pub user_agent: String,
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    pub timestamp: u64,
    pub client_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    pub client_id: String,
}

/// Messages pushed from the backend to clients.
///
/// The backend wraps every push in `{type, data, time}`; the envelope-level
/// `time` field is informational and ignored here. The `error` push is the
/// one exception to the `data` nesting and carries a flat `message`.
#[derive(Debug, Serialize, Deserialize, Clone, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum OutboundPayload {
    Connected(ConnectedPayload),
    ModeChanged(ModeChangedPayload),
    ModeInfo(ModeInfoPayload),
    Ping(ServerPingPayload),
    Pong(ServerPongPayload),
    ForceReload(ForceReloadPayload),
    ClientsUpdate(ClientsUpdatePayload),
    Error(ErrorPayload),
}

impl std::fmt::Display for OutboundPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectedPayload {
    pub data: ConnectedData,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ConnectedData {
    pub mode: ServerMode,
    pub clients: u64,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModeChangedPayload {
    pub data: ModeChangedData,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ModeChangedData {
    pub new_mode: ServerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_mode: Option<ServerMode>,
    #[serde(default)]
    pub force_reload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModeInfoPayload {
    pub data: ModeInfoData,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ModeInfoData {
    pub mode: ServerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerPingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ServerPingData>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ServerPingData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerPongPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ServerPongData>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ServerPongData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ForceReloadPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ForceReloadData>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ForceReloadData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientsUpdatePayload {
    pub data: ClientsUpdateData,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ClientsUpdateData {
    pub clients: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_connect_payload_serializes_flat_beside_the_tag() {
        let payload = InboundPayload::Connect(ConnectPayload {
            client_id: "client_V1StGXR8_Z5jdHi6B-myT".to_string(),
            is_admin: false,
            user_agent: "usermanager/0.1.0".to_string(),
            timestamp: 1_700_000_000_000,
        });

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "type": "connect",
                "clientId": "client_V1StGXR8_Z5jdHi6B-myT",
                "isAdmin": false,
                "userAgent": "usermanager/0.1.0",
                "timestamp": 1_700_000_000_000_u64,
            })
        );
    }

    #[test]
    fn test_get_mode_serializes_to_bare_tag() {
        let payload = InboundPayload::GetMode(EmptyPayload {});

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"type": "get_mode"})
        );
    }

    #[test]
    fn test_mode_changed_parses_backend_broadcast() {
        let message = r#"{
            "type": "mode_changed",
            "data": {
                "old_mode": "server",
                "new_mode": "local",
                "time": 1700000000,
                "force_reload": true,
                "changed_by": "127.0.0.1:54023"
            },
            "time": 1700000000
        }"#;

        let payload: OutboundPayload = serde_json::from_str(message).unwrap();

        let OutboundPayload::ModeChanged(payload) = payload else {
            panic!("Expected ModeChanged");
        };
        assert_eq!(payload.data.new_mode, ServerMode::Local);
        assert_eq!(payload.data.old_mode, Some(ServerMode::Server));
        assert!(payload.data.force_reload);
    }

    #[test]
    fn test_connected_parses_welcome_message() {
        let message = r#"{
            "type": "connected",
            "data": {
                "mode": "server",
                "clients": 3,
                "is_admin": false,
                "server_time": "2026-08-07 12:00:00",
                "client_id": "client_1"
            },
            "time": 1700000000
        }"#;

        let payload: OutboundPayload = serde_json::from_str(message).unwrap();

        let OutboundPayload::Connected(payload) = payload else {
            panic!("Expected Connected");
        };
        assert_eq!(payload.data.mode, ServerMode::Server);
        assert_eq!(payload.data.clients, 3);
        assert!(!payload.data.is_admin);
    }

    #[test]
    fn test_server_ping_parses_without_data() {
        let payload: OutboundPayload = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();

        assert!(matches!(payload, OutboundPayload::Ping(_)));
    }

    #[test]
    fn test_error_parses_flat_message() {
        let payload: OutboundPayload =
            serde_json::from_str(r#"{"type":"error","message":"Invalid admin password"}"#).unwrap();

        let OutboundPayload::Error(payload) = payload else {
            panic!("Expected Error");
        };
        assert_eq!(payload.message, "Invalid admin password");
    }

    #[test]
    fn test_unknown_type_is_a_parse_error() {
        let result = serde_json::from_str::<OutboundPayload>(r#"{"type":"surprise","data":{}}"#);

        assert!(result.is_err());
    }

    #[test]
    fn test_server_mode_string_forms() {
        assert_eq!(ServerMode::Server.to_string(), "server");
        assert_eq!(ServerMode::Local.to_string(), "local");
        assert_eq!("local".parse::<ServerMode>().unwrap(), ServerMode::Local);
        assert_eq!(ServerMode::default(), ServerMode::Server);
    }
}
