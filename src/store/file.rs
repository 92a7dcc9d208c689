//! Durable file-per-record store backend
//!
//! Layout: `<root>/<KindName>/<uid>`, one file per record. Every write
//! goes to a temp file in the same directory, is fsynced, then renamed
//! over the final name, followed by a directory fsync. A record carries a
//! 4-byte big-endian CRC32 header verified on every read.
//!
//! `relocate` is a same-filesystem rename between the two kind
//! directories, so a record is never visible under neither kind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;

use super::{ObjectStore, RecordKind, StoreError, StoreResult};

const CRC_HEADER_LEN: usize = 4;
const TMP_SUFFIX: &str = ".tmp";

/// File-backed `ObjectStore` backend.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens the store rooted at `root`, creating the kind directories if
    /// missing. Stale temp files from an interrupted write are discarded.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for kind in RecordKind::all() {
            let dir = root.join(kind.type_name());
            fs::create_dir_all(&dir)?;
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "tmp") {
                    let _ = fs::remove_file(&path);
                }
            }
        }
        Ok(Self { root })
    }

    fn record_path(&self, kind: RecordKind, uid: &str) -> PathBuf {
        self.root.join(kind.type_name()).join(uid)
    }

    fn kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.type_name())
    }

    fn sync_dir(dir: &Path) -> StoreResult<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

impl ObjectStore for FileStore {
    fn write(&self, kind: RecordKind, uid: &str, bytes: &[u8]) -> StoreResult<()> {
        let final_path = self.record_path(kind, uid);
        let tmp_path = self.record_path(kind, &format!("{}{}", uid, TMP_SUFFIX));

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&checksum(bytes).to_be_bytes())?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &final_path)?;
        Self::sync_dir(&self.kind_dir(kind))
    }

    fn read(&self, kind: RecordKind, uid: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.record_path(kind, uid);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        if contents.len() < CRC_HEADER_LEN {
            return Err(StoreError::Corrupt(format!(
                "record {}/{} shorter than its checksum header",
                kind, uid
            )));
        }

        let (header, payload) = contents.split_at(CRC_HEADER_LEN);
        let stored = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if stored != checksum(payload) {
            return Err(StoreError::Corrupt(format!(
                "checksum mismatch for record {}/{}",
                kind, uid
            )));
        }
        Ok(Some(payload.to_vec()))
    }

    fn remove(&self, kind: RecordKind, uid: &str) -> StoreResult<()> {
        match fs::remove_file(self.record_path(kind, uid)) {
            Ok(()) => Self::sync_dir(&self.kind_dir(kind)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, kind: RecordKind) -> StoreResult<Vec<String>> {
        let mut uids = Vec::new();
        for entry in fs::read_dir(self.kind_dir(kind))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            uids.push(name);
        }
        Ok(uids)
    }

    fn relocate(&self, from: RecordKind, to: RecordKind, uid: &str) -> StoreResult<()> {
        let src = self.record_path(from, uid);
        let dst = self.record_path(to, uid);
        match fs::rename(&src, &dst) {
            Ok(()) => {
                Self::sync_dir(&self.kind_dir(to))?;
                Self::sync_dir(&self.kind_dir(from))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                kind: from,
                uid: uid.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
