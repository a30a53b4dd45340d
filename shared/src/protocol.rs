//! Wire protocol types for the relay control connection.
//!
//! Every frame on the control connection is a UTF-8 JSON text frame matching
//! one of the envelopes below. Field names and type tags are fixed by the
//! relay and must not change.

use serde::{Deserialize, Serialize};

/// Response bodies larger than this are split across multiple frames.
pub const CHUNK_SIZE: usize = 500_000;

/// Inbound envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    /// Work item: perform one local-service call.
    Forward,
    /// One-time notice that the relay established the tunnel.
    Created,
    /// Any type this client does not recognize; usually carries `error`.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Outbound envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseType {
    /// Normal (possibly chunked) payload.
    ResponseChunk,
    /// The local service could not be reached.
    NotRunningAppOfClient,
}

/// Describes one local-service call to make.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardInfo {
    pub path: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Informational payload sent once when the tunnel is established.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelInfo {
    pub message: String,
}

/// Request envelope received from the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_info: Option<ForwardInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_info: Option<TunnelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response envelope sent back to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request_id: String,
    pub status: u16,
    pub body: String,
    pub last: bool,
    pub response_type: ResponseType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_forward_request() {
        let json = r#"{
            "id": "r1",
            "type": "FORWARD",
            "forwardInfo": {"path": "/hello", "method": "GET"}
        }"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(request.id, "r1");
        assert_eq!(request.kind, RequestType::Forward);
        let info = request.forward_info.unwrap();
        assert_eq!(info.path, "/hello");
        assert_eq!(info.method, "GET");
        assert!(info.body.is_none());
    }

    #[test]
    fn test_decode_created_request() {
        let json = r#"{"type": "CREATED", "tunnelInfo": {"message": "ready"}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(request.kind, RequestType::Created);
        assert_eq!(request.tunnel_info.unwrap().message, "ready");
    }

    #[test]
    fn test_unknown_type_carries_error() {
        let json = r#"{"type": "SOMETHING_ELSE", "error": "tunnel limit reached"}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(request.kind, RequestType::Unknown);
        assert_eq!(request.error.as_deref(), Some("tunnel limit reached"));
    }

    #[test]
    fn test_response_field_names() {
        let response = Response {
            request_id: "r1".into(),
            status: 500,
            body: String::new(),
            last: true,
            response_type: ResponseType::NotRunningAppOfClient,
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();
        assert_eq!(json["requestId"], "r1");
        assert_eq!(json["status"], 500);
        assert_eq!(json["last"], true);
        assert_eq!(json["responseType"], "NOT_RUNNING_APP_OF_CLIENT");

        let chunk = Response {
            response_type: ResponseType::ResponseChunk,
            ..response
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&chunk).unwrap()).unwrap();
        assert_eq!(json["responseType"], "RESPONSE_CHUNK");
    }
}
