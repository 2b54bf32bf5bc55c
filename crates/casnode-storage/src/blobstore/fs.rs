//! File-per-object blob store
//!
//! Layout: `<root>/<container hex>/<object hex>`. Each file is framed so a torn
//! or bit-rotted file is detected on read:
//!
//! ```text
//! +--------+---------+--------+---------+--------+
//! | Magic  | Version | Length | Payload | CRC32C |
//! | 4B     | 4B      | 8B     | var     | 4B     |
//! +--------+---------+--------+---------+--------+
//! ```
//!
//! Writes go to a temporary file that is renamed into place, so a reader sees
//! either the old value or the new one.

use super::BlobStore;
use bytes::Bytes;
use casnode_common::checksum::compute_crc32c;
use casnode_common::{Address, ContainerId, Error, ObjectId, Result, Tier};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BLOB_MAGIC: u32 = 0x4342_4C42; // "CBLB"
const BLOB_VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;
const FOOTER_SIZE: usize = 4;
const TMP_SUFFIX: &str = "tmp";

fn io_err(e: std::io::Error) -> Error {
    Error::io(Tier::BlobStore, e)
}

/// Blob store keeping one file per address
pub struct FsBlobStore {
    root: PathBuf,
    sync_on_write: bool,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>, sync_on_write: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(io_err)?;
        let store = Self {
            root,
            sync_on_write,
        };
        let removed = store.remove_temp_files()?;
        if removed > 0 {
            warn!(
                "Removed {} interrupted blob writes under {:?}",
                removed, store.root
            );
        }
        info!("Opened blob store at {:?}", store.root);
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &ContainerId) -> PathBuf {
        self.root.join(container.to_string())
    }

    fn blob_path(&self, address: &Address) -> PathBuf {
        self.container_dir(&address.container)
            .join(address.object.to_string())
    }

    fn encode(data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + data.len() + FOOTER_SIZE);
        buf.extend_from_slice(&BLOB_MAGIC.to_le_bytes());
        buf.extend_from_slice(&BLOB_VERSION.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
        buf.extend_from_slice(data);
        buf.extend_from_slice(&compute_crc32c(data).to_le_bytes());
        buf
    }

    fn decode(address: &Address, mut raw: Vec<u8>) -> Result<Bytes> {
        let corrupt = |what: &str| {
            Error::storage(Tier::BlobStore, format!("corrupt blob {address}: {what}"))
        };

        if raw.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt("file too small"));
        }
        let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        if word(0) != BLOB_MAGIC {
            return Err(corrupt("bad magic"));
        }
        if word(4) != BLOB_VERSION {
            return Err(corrupt("unsupported version"));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&raw[8..16]);
        let len = usize::try_from(u64::from_le_bytes(len_bytes))
            .map_err(|_| corrupt("length overflow"))?;
        if raw.len() != HEADER_SIZE + len + FOOTER_SIZE {
            return Err(corrupt("length mismatch"));
        }
        let stored_crc = word(HEADER_SIZE + len);
        if compute_crc32c(&raw[HEADER_SIZE..HEADER_SIZE + len]) != stored_crc {
            return Err(Error::ChecksumMismatch {
                expected: format!("{stored_crc:08x}"),
                actual: format!(
                    "{:08x}",
                    compute_crc32c(&raw[HEADER_SIZE..HEADER_SIZE + len])
                ),
            });
        }

        raw.truncate(HEADER_SIZE + len);
        let mut payload = Bytes::from(raw);
        Ok(payload.split_off(HEADER_SIZE))
    }

    fn remove_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in fs::read_dir(&self.root).map_err(io_err)? {
            let dir = dir.map_err(io_err)?;
            if !dir.file_type().map_err(io_err)?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(dir.path()).map_err(io_err)? {
                let path = entry.map_err(io_err)?.path();
                if path.extension().is_some_and(|ext| ext == TMP_SUFFIX) {
                    fs::remove_file(&path).map_err(io_err)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, address: &Address, data: &[u8]) -> Result<()> {
        let dir = self.container_dir(&address.container);
        fs::create_dir_all(&dir).map_err(io_err)?;

        let path = self.blob_path(address);
        let temp_path = dir.join(format!(
            "{}.{}.{TMP_SUFFIX}",
            address.object,
            uuid::Uuid::new_v4().simple()
        ));

        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(io_err)?;
            file.write_all(&Self::encode(data)).map_err(io_err)?;
            if self.sync_on_write {
                file.sync_all().map_err(io_err)?;
            }
        }

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(io_err(e));
        }
        if self.sync_on_write {
            File::open(&dir)
                .and_then(|d| d.sync_all())
                .map_err(io_err)?;
        }

        debug!("blob put: {} ({} bytes)", address, data.len());
        Ok(())
    }

    fn get(&self, address: &Address) -> Result<Option<Bytes>> {
        match fs::read(self.blob_path(address)) {
            Ok(raw) => Self::decode(address, raw).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    fn delete(&self, address: &Address) -> Result<bool> {
        match fs::remove_file(self.blob_path(address)) {
            Ok(()) => {
                debug!("blob delete: {}", address);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(e)),
        }
    }

    fn exists(&self, address: &Address) -> Result<bool> {
        self.blob_path(address).try_exists().map_err(io_err)
    }

    fn addresses(&self) -> Result<Vec<Address>> {
        let mut out = Vec::new();
        for dir in fs::read_dir(&self.root).map_err(io_err)? {
            let dir = dir.map_err(io_err)?;
            let Ok(container) = dir.file_name().to_string_lossy().parse::<ContainerId>() else {
                continue;
            };
            for entry in fs::read_dir(dir.path()).map_err(io_err)? {
                let entry = entry.map_err(io_err)?;
                if let Ok(object) = entry.file_name().to_string_lossy().parse::<ObjectId>() {
                    out.push(Address::new(container, object));
                }
            }
        }
        Ok(out)
    }
}
