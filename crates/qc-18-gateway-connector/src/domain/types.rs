//! Envelope and payload types exchanged with gateway nodes.

use crate::domain::correlation::RequestId;
use crate::domain::methods::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Addressed, method-tagged envelope around an opaque payload.
///
/// Outgoing bodies leave `sender` empty; the transport fills it in when it
/// signs the message. Inbound bodies carry the identity of the original
/// sender, which is what the rate limiter keys on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageBody {
    /// Correlation identifier assigned by the caller
    pub message_id: String,
    /// Method name
    pub method: String,
    /// Destination domain (DON) identifier
    pub don_id: String,
    /// Sender identity
    pub sender: String,
    /// Opaque serialized payload
    pub payload: serde_json::Value,
}

impl MessageBody {
    /// Build an outgoing request body
    pub fn request(
        message_id: &RequestId,
        don_id: impl Into<String>,
        method: Method,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            method: method.as_str().to_string(),
            don_id: don_id.into(),
            sender: String::new(),
            payload,
        }
    }

    /// Build a response body as a gateway would deliver it
    pub fn response(
        message_id: impl Into<String>,
        method: impl Into<String>,
        sender: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            method: method.into(),
            don_id: String::new(),
            sender: sender.into(),
            payload,
        }
    }

    /// Correlation identifier of this body
    pub fn request_id(&self) -> RequestId {
        RequestId::new(self.message_id.clone())
    }
}

/// Signed message as delivered by a gateway node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayMessage {
    pub body: MessageBody,
    /// Signature over the body (verified by the transport)
    pub signature: String,
}

impl GatewayMessage {
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            signature: String::new(),
        }
    }

    /// Decode the payload into a concrete type
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body.payload)
    }
}

/// Request payload sent to a gateway
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutboundRequest {
    pub url: String,
    /// HTTP method the gateway should use
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    /// Request timeout in milliseconds (0 = use the configured default)
    pub timeout_ms: u32,
    pub workflow_id: String,
    pub workflow_execution_id: String,
}

impl OutboundRequest {
    /// Request with only a body and a timeout
    pub fn with_body(body: impl Into<Vec<u8>>, timeout_ms: u32) -> Self {
        Self {
            body: body.into(),
            timeout_ms,
            ..Self::default()
        }
    }
}

/// Response payload returned by a gateway
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutboundResponse {
    /// True when the gateway failed to execute the request
    pub execution_error: bool,
    pub error_message: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl OutboundResponse {
    /// Successful response with a body
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code: 200,
            body: body.into(),
            ..Self::default()
        }
    }
}

/// Byte bodies travel as standard base64 strings
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
