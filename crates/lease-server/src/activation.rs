//! Tunnel activation.
//!
//! Issued addresses only become usable once the tunnel daemon has been told
//! to accept the client. The coordinator talks to it through [`Activator`].

use address_space::{Address, AddressFamily};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use tunnel_admin::{AdminClient, AdminError, AllowConnectionArgs};

/// Hands an issued address to the tunnel daemon.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Activator: Send + Sync {
    /// Authorize `identity` to use `address`. Errors carry the reasons given
    /// by the daemon, verbatim.
    async fn activate(&self, address: &Address, identity: &str) -> Result<(), Vec<String>>;
}

/// Activator backed by the cjdns admin interface.
pub struct CjdnsActivator {
    client: AdminClient,
    prefix: u8,
}

impl CjdnsActivator {
    pub fn new(client: AdminClient, prefix: u8) -> Self {
        Self { client, prefix }
    }

    /// Check the admin interface is reachable.
    pub async fn probe(&self) -> Result<(), AdminError> {
        self.client.ping().await
    }

    fn args(&self, address: &Address, identity: &str) -> AllowConnectionArgs {
        let mut args = AllowConnectionArgs {
            public_key_of_authorized_node: identity.to_string(),
            ip6_address: None,
            ip6_prefix: None,
            ip4_address: None,
            ip4_prefix: None,
        };

        match address.family() {
            AddressFamily::V6 => {
                args.ip6_address = Some(address.format());
                args.ip6_prefix = Some(self.prefix);
            }
            AddressFamily::V4 => {
                args.ip4_address = Some(address.format());
                args.ip4_prefix = Some(self.prefix);
            }
        }

        args
    }
}

#[async_trait]
impl Activator for CjdnsActivator {
    #[instrument(skip(self), fields(address = %address))]
    async fn activate(&self, address: &Address, identity: &str) -> Result<(), Vec<String>> {
        match self.client.allow_connection(self.args(address, identity)).await {
            Ok(()) => {
                debug!("Tunnel connection allowed");
                Ok(())
            }
            Err(AdminError::Rejected(msg)) => Err(vec![msg]),
            Err(e) => {
                warn!(error = %e, "Admin call failed");
                Err(vec![e.to_string()])
            }
        }
    }
}
