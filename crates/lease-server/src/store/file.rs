//! Directory-of-files lease store.

use super::{CursorRecord, Lease};
use crate::error::LeaseError;
use address_space::Address;
use async_stream::stream;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

/// File holding the cursor record.
const CURSOR_FILE: &str = "cursor.json";

/// Lease file names are `lease-<hex(sha256(identity))>.json`, so every
/// identity maps to a name of the same length.
const LEASE_PREFIX: &str = "lease-";
const RECORD_EXT: &str = ".json";

/// Persistent store keeping each record in its own file.
///
/// Writes go to a temporary file which is synced and then renamed over the
/// record, so readers only ever observe a complete old or new record.
pub struct FileStore {
    dir: PathBuf,
    seed: Address,
}

impl FileStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub async fn open(dir: PathBuf, seed: Address) -> Result<Self, LeaseError> {
        fs::create_dir_all(&dir).await?;

        let meta = fs::metadata(&dir).await?;
        if !meta.is_dir() {
            return Err(LeaseError::Persistence(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        Ok(Self { dir, seed })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn seed(&self) -> Address {
        self.seed
    }

    #[instrument(skip(self))]
    pub async fn has_lease(&self, identity: &str) -> Result<bool, LeaseError> {
        Ok(fs::try_exists(self.lease_path(identity)).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_lease(&self, identity: &str) -> Result<Lease, LeaseError> {
        let path = self.lease_path(identity);
        match fs::read(&path).await {
            Ok(data) => decode_lease(identity, &data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LeaseError::NotFound(identity.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, lease), fields(identity = %lease.identity, address = %lease.address))]
    pub async fn put_lease(&self, lease: &Lease) -> Result<(), LeaseError> {
        self.write_record(&self.lease_path(&lease.identity), lease)
            .await
    }

    pub async fn stored_cursor(&self) -> Result<Option<Address>, LeaseError> {
        let path = self.dir.join(CURSOR_FILE);
        match fs::read(&path).await {
            Ok(data) => {
                let record: CursorRecord = decode(&data).map_err(|reason| {
                    LeaseError::Persistence(format!("Corrupt cursor record: {}", reason))
                })?;
                Ok(Some(record.last_issued_address))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(address = %address))]
    pub async fn put_cursor(&self, address: &Address) -> Result<(), LeaseError> {
        let record = CursorRecord {
            last_issued_address: *address,
        };
        self.write_record(&self.dir.join(CURSOR_FILE), &record)
            .await
    }

    pub fn list_leases(&self) -> impl Stream<Item = Result<Lease, LeaseError>> + Send + '_ {
        stream! {
            let mut entries = match fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    yield Err(LeaseError::from(e));
                    return;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(LeaseError::from(e));
                        break;
                    }
                };

                let name = entry.file_name();
                let Some(key) = name
                    .to_str()
                    .and_then(|n| n.strip_prefix(LEASE_PREFIX))
                    .and_then(|n| n.strip_suffix(RECORD_EXT))
                else {
                    continue;
                };

                let item = match fs::read(entry.path()).await {
                    Ok(data) => decode_listed(key, &data),
                    Err(e) => Err(LeaseError::CorruptRecord {
                        identity: key.to_string(),
                        reason: e.to_string(),
                    }),
                };

                if let Err(e) = &item {
                    warn!(error = %e, "Skipping unreadable lease record");
                }
                yield item;
            }
        }
    }

    fn lease_path(&self, identity: &str) -> PathBuf {
        let name = format!("{}{}{}", LEASE_PREFIX, lease_key(identity), RECORD_EXT);
        self.dir.join(name)
    }

    /// Write `value` to `path` atomically and durably.
    async fn write_record<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), LeaseError> {
        let data = serde_json::to_vec_pretty(value)?;
        let temp_path = path.with_extension("tmp");

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        // Visible once renamed, so the write has happened.
        if let Err(e) = sync_dir(&self.dir).await {
            warn!(path = ?path, error = %e, "Directory sync failed after rename");
        }

        debug!(path = ?path, bytes = data.len(), "Wrote record");
        Ok(())
    }
}

/// Make a completed rename durable.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), LeaseError> {
    fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), LeaseError> {
    Ok(())
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, String> {
    serde_json::from_slice(data).map_err(|e| e.to_string())
}

fn decode_lease(identity: &str, data: &[u8]) -> Result<Lease, LeaseError> {
    let lease: Lease = decode(data).map_err(|reason| LeaseError::CorruptRecord {
        identity: identity.to_string(),
        reason,
    })?;

    if lease.identity != identity {
        return Err(LeaseError::CorruptRecord {
            identity: identity.to_string(),
            reason: format!("record names {}", lease.identity),
        });
    }

    Ok(lease)
}

fn lease_key(identity: &str) -> String {
    hex::encode(Sha256::digest(identity.as_bytes()))
}

/// Decode a record found by listing, where only the file name key is known.
///
/// Damaged records are reported under the identity they still name, or
/// under the key when not even that can be read.
fn decode_listed(key: &str, data: &[u8]) -> Result<Lease, LeaseError> {
    #[derive(Deserialize)]
    struct Named {
        identity: String,
    }

    let identity = match decode::<Named>(data) {
        Ok(named) if lease_key(&named.identity) == key => named.identity,
        Ok(named) => {
            return Err(LeaseError::CorruptRecord {
                identity: key.to_string(),
                reason: format!("record names {}", named.identity),
            });
        }
        Err(reason) => {
            return Err(LeaseError::CorruptRecord {
                identity: key.to_string(),
                reason,
            });
        }
    };

    decode_lease(&identity, data)
}
