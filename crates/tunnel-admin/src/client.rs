//! cjdns admin client implementation.

use crate::error::AdminError;
use crate::types::*;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Largest datagram the admin interface sends.
const MAX_DATAGRAM: usize = 65_535;

/// Client for the cjdns admin UDP interface.
#[derive(Clone, Debug)]
pub struct AdminClient {
    addr: SocketAddr,
    password: SecretString,
    timeout: Duration,
}

impl AdminClient {
    /// Create a new admin client.
    pub fn new(addr: SocketAddr, password: SecretString, timeout: Duration) -> Self {
        Self {
            addr,
            password,
            timeout,
        }
    }

    /// The admin interface address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Check that the admin interface answers.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn ping(&self) -> Result<(), AdminError> {
        let socket = self.connect().await?;
        let txid = new_txid();
        let query = Query {
            q: "ping".into(),
            txid: txid.clone(),
        };

        let raw = self
            .exchange(&socket, serde_bencode::to_bytes(&query)?, &txid)
            .await?;
        let reply: AdminReply = serde_bencode::from_bytes(&raw)?;

        match reply.q.as_deref() {
            Some("pong") => Ok(()),
            other => Err(AdminError::Unexpected(format!(
                "expected pong, got {:?}",
                other
            ))),
        }
    }

    /// Authorize a peer to open an IP tunnel with the given address.
    #[instrument(skip(self, args), fields(addr = %self.addr))]
    pub async fn allow_connection(&self, args: AllowConnectionArgs) -> Result<(), AdminError> {
        let reply = self.call("IpTunnel_allowConnection", args).await?;

        match reply.failure() {
            None => Ok(()),
            Some(msg) => {
                warn!(error = %msg, "IpTunnel_allowConnection rejected");
                Err(AdminError::Rejected(msg.to_string()))
            }
        }
    }

    /// Invoke an authenticated admin function.
    ///
    /// Fetches a fresh cookie, then signs the request: the `hash` field first
    /// holds `sha256(password || cookie)`, and is then replaced by the sha256
    /// of the whole bencoded request carrying that first hash.
    pub async fn call<A: Serialize>(
        &self,
        function: &str,
        args: A,
    ) -> Result<AdminReply, AdminError> {
        let socket = self.connect().await?;
        let cookie = self.cookie(&socket).await?;
        let txid = new_txid();

        let mut query = AuthQuery {
            q: "auth".into(),
            aq: function.to_string(),
            args,
            cookie: cookie.clone(),
            hash: password_hash(self.password.expose_secret(), &cookie),
            txid: txid.clone(),
        };
        query.hash = hex::encode(Sha256::digest(serde_bencode::to_bytes(&query)?));

        debug!(function = %function, "Calling admin function");

        let raw = self
            .exchange(&socket, serde_bencode::to_bytes(&query)?, &txid)
            .await?;
        Ok(serde_bencode::from_bytes(&raw)?)
    }

    async fn cookie(&self, socket: &UdpSocket) -> Result<String, AdminError> {
        let txid = new_txid();
        let query = Query {
            q: "cookie".into(),
            txid: txid.clone(),
        };

        let raw = self
            .exchange(socket, serde_bencode::to_bytes(&query)?, &txid)
            .await?;
        let reply: CookieReply = serde_bencode::from_bytes(&raw)?;
        Ok(reply.cookie)
    }

    async fn connect(&self) -> Result<UdpSocket, AdminError> {
        let local = if self.addr.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.addr).await?;
        Ok(socket)
    }

    /// Send one datagram and wait for the reply carrying the same txid.
    async fn exchange(
        &self,
        socket: &UdpSocket,
        payload: Vec<u8>,
        txid: &str,
    ) -> Result<Vec<u8>, AdminError> {
        socket.send(&payload).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let len = tokio::time::timeout_at(deadline, socket.recv(&mut buf))
                .await
                .map_err(|_| AdminError::Timeout(self.timeout))??;
            let raw = buf[..len].to_vec();

            // Replies without a txid cannot be matched and are taken as ours.
            let reply: AdminReply = serde_bencode::from_bytes(&raw)?;
            match reply.txid.as_deref() {
                Some(id) if id != txid => {
                    debug!(expected = %txid, got = %id, "Dropping stale admin reply");
                }
                _ => return Ok(raw),
            }
        }
    }
}

/// First-stage authentication hash: hex(sha256(password || cookie)).
pub(crate) fn password_hash(password: &str, cookie: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(cookie.as_bytes());
    hex::encode(hasher.finalize())
}

fn new_txid() -> String {
    hex::encode(rand::thread_rng().gen::<[u8; 8]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_bencode::value::Value;
    use std::collections::HashMap;

    const PASSWORD: &str = "ycdzz73bn17k22c017xtdxgmq7kn7xq";
    const COOKIE: &str = "1700000000";

    fn bytes(value: &Value) -> Option<&[u8]> {
        match value {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn reply(entries: &[(&str, &str)]) -> Vec<u8> {
        let dict: HashMap<Vec<u8>, Value> = entries
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), Value::Bytes(v.as_bytes().to_vec())))
            .collect();
        serde_bencode::to_bytes(&Value::Dict(dict)).unwrap()
    }

    /// Minimal admin interface: hands out cookies, answers pings and checks
    /// request signatures. Functions named in `reject` fail with that message.
    async fn fake_admin(reject: Option<&'static str>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, peer) = match socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(_) => return,
                };
                let Ok(Value::Dict(mut dict)) = serde_bencode::from_bytes::<Value>(&buf[..len])
                else {
                    continue;
                };

                let txid = dict
                    .get(b"txid".as_slice())
                    .and_then(bytes)
                    .map(|b| String::from_utf8_lossy(b).to_string())
                    .unwrap_or_default();
                let q = dict
                    .get(b"q".as_slice())
                    .and_then(bytes)
                    .map(|b| String::from_utf8_lossy(b).to_string())
                    .unwrap_or_default();

                let out = match q.as_str() {
                    "cookie" => reply(&[("cookie", COOKIE), ("txid", txid.as_str())]),
                    "ping" => reply(&[("q", "pong"), ("txid", txid.as_str())]),
                    "auth" => {
                        let given = dict
                            .get(b"hash".as_slice())
                            .and_then(bytes)
                            .map(|b| b.to_vec())
                            .unwrap_or_default();
                        dict.insert(
                            b"hash".to_vec(),
                            Value::Bytes(password_hash(PASSWORD, COOKIE).into_bytes()),
                        );
                        let expected = hex::encode(Sha256::digest(
                            serde_bencode::to_bytes(&Value::Dict(dict)).unwrap(),
                        ));

                        if given != expected.as_bytes() {
                            reply(&[("error", "Auth failed."), ("txid", txid.as_str())])
                        } else if let Some(msg) = reject {
                            reply(&[("error", msg), ("txid", txid.as_str())])
                        } else {
                            reply(&[("error", NO_ERROR), ("txid", txid.as_str())])
                        }
                    }
                    _ => continue,
                };

                let _ = socket.send_to(&out, peer).await;
            }
        });

        addr
    }

    fn client(addr: SocketAddr, password: &str) -> AdminClient {
        AdminClient::new(
            addr,
            SecretString::new(password.to_string()),
            Duration::from_secs(2),
        )
    }

    fn args() -> AllowConnectionArgs {
        AllowConnectionArgs {
            public_key_of_authorized_node: "alice.k".into(),
            ip6_address: Some("fc00:0000:0000:0000:0000:0000:0000:0002".into()),
            ip6_prefix: Some(0),
            ip4_address: None,
            ip4_prefix: None,
        }
    }

    #[test]
    fn test_password_hash() {
        let hash = password_hash("secret", "123");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, password_hash("secret", "123"));
        assert_ne!(hash, password_hash("secret", "124"));
    }

    #[test]
    fn test_txid_is_random_hex() {
        let a = new_txid();
        let b = new_txid();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_ping() {
        let addr = fake_admin(None).await;
        tokio_test::assert_ok!(client(addr, PASSWORD).ping().await);
    }

    #[tokio::test]
    async fn test_allow_connection_accepted() {
        let addr = fake_admin(None).await;
        tokio_test::assert_ok!(client(addr, PASSWORD).allow_connection(args()).await);
    }

    #[tokio::test]
    async fn test_allow_connection_wrong_password() {
        let addr = fake_admin(None).await;
        let result = client(addr, "wrong").allow_connection(args()).await;

        match result {
            Err(AdminError::Rejected(msg)) => assert_eq!(msg, "Auth failed."),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_allow_connection_rejected_by_function() {
        let addr = fake_admin(Some("Invalid public key")).await;
        let result = client(addr, PASSWORD).allow_connection(args()).await;

        assert!(matches!(result, Err(AdminError::Rejected(msg)) if msg == "Invalid public key"));
    }

    #[tokio::test]
    async fn test_timeout_when_nobody_answers() {
        // Bound but never read from.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = AdminClient::new(
            silent.local_addr().unwrap(),
            SecretString::new(PASSWORD.to_string()),
            Duration::from_millis(100),
        );

        assert!(matches!(client.ping().await, Err(AdminError::Timeout(_))));
    }
}
