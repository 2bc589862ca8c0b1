//! Request and response documents.

use crate::error::LeaseError;
use crate::store::Lease;
use serde::{Deserialize, Serialize};

/// Registration request, one JSON document per connection.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Shared secret
    #[serde(default)]
    pub password: Option<String>,

    /// Client public key (the identity)
    #[serde(default)]
    pub pubkey: Option<String>,

    /// Free text stored with the lease
    #[serde(default)]
    pub misc: Option<String>,
}

/// Response document. `status` is 1 and `data` present only on success.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,

    pub status: u8,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseData {
    /// Issued address, canonical uncompressed form
    pub address: String,

    /// Public key the client should open its tunnel to
    pub pubkey: String,
}

impl Response {
    pub fn success(lease: &Lease, pubkey: impl Into<String>) -> Self {
        Self {
            error: None,
            data: Some(ResponseData {
                address: lease.address.format(),
                pubkey: pubkey.into(),
            }),
            status: 1,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            data: None,
            status: 0,
        }
    }

    /// Wire form: the JSON document followed by CRLF.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).unwrap_or_else(|_| {
            br#"{"error":"Internal error","status":0}"#.to_vec()
        });
        line.extend_from_slice(b"\r\n");
        line
    }
}

impl LeaseError {
    /// The failure response reported to the client.
    pub fn into_response(self) -> Response {
        match self {
            LeaseError::MalformedRequest(msg) => Response::failure(msg),
            e => Response::failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use address_space::Address;

    #[test]
    fn test_request_optional_fields() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"password": "pw", "pubkey": "alice.k"}"#).unwrap();
        assert_eq!(req.password.as_deref(), Some("pw"));
        assert_eq!(req.pubkey.as_deref(), Some("alice.k"));
        assert!(req.misc.is_none());

        let req: RegisterRequest = serde_json::from_str("{}").unwrap();
        assert!(req.pubkey.is_none());
    }

    #[test]
    fn test_success_response_shape() {
        let lease = Lease::new("alice.k", Address::parse("::2").unwrap(), None);
        let json: serde_json::Value =
            serde_json::to_value(Response::success(&lease, "server.k")).unwrap();

        assert_eq!(json["error"], serde_json::Value::Null);
        assert_eq!(json["status"], 1);
        assert_eq!(
            json["data"]["address"],
            "0000:0000:0000:0000:0000:0000:0000:0002"
        );
        assert_eq!(json["data"]["pubkey"], "server.k");
    }

    #[test]
    fn test_failure_response_omits_data() {
        let line = Response::failure("Invalid password").to_line();
        assert_eq!(
            line,
            b"{\"error\":\"Invalid password\",\"status\":0}\r\n".to_vec()
        );
    }

    #[test]
    fn test_error_messages_on_the_wire() {
        let cases = [
            (LeaseError::MalformedRequest("Invalid JSON".into()), "Invalid JSON"),
            (LeaseError::Authentication, "Invalid password"),
            (LeaseError::InvalidIdentity, "No pubkey defined"),
            (LeaseError::AddressSpaceExhausted, "No available IP addresses"),
            (LeaseError::Activation(vec!["Invalid public key".into()]), "Invalid public key"),
            (LeaseError::RateLimitExceeded, "Rate limit exceeded"),
        ];

        for (err, message) in cases {
            let response = err.into_response();
            assert_eq!(response.error.as_deref(), Some(message));
            assert_eq!(response.status, 0);
            assert!(response.data.is_none());
        }
    }
}
