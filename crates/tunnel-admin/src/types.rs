//! Admin protocol message types.
//!
//! Messages are bencoded dictionaries. Keys are emitted in sorted order,
//! which the authentication hash depends on.

use serde::{Deserialize, Serialize};

/// Value of the `error` field on success.
pub const NO_ERROR: &str = "none";

/// Unauthenticated query (`cookie`, `ping`).
#[derive(Debug, Clone, Serialize)]
pub struct Query {
    pub q: String,
    pub txid: String,
}

/// Authenticated function call.
#[derive(Debug, Clone, Serialize)]
pub struct AuthQuery<A> {
    pub q: String,
    pub aq: String,
    pub args: A,
    pub cookie: String,
    pub hash: String,
    pub txid: String,
}

/// Reply to a `cookie` query.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieReply {
    pub cookie: String,
    #[serde(default)]
    pub txid: Option<String>,
}

/// Generic reply; only the fields callers inspect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminReply {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
}

impl AdminReply {
    /// The error message, unless the reply reports success.
    pub fn failure(&self) -> Option<&str> {
        match self.error.as_deref() {
            None | Some(NO_ERROR) => None,
            Some(msg) => Some(msg),
        }
    }
}

/// Arguments of `IpTunnel_allowConnection`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowConnectionArgs {
    pub public_key_of_authorized_node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip6_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip6_prefix: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip4_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip4_prefix: Option<u8>,
}
