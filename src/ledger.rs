//! Durable record of order ids that have already been folded into a pick list.
//!
//! The set only grows. An id is written (and flushed) before any of its items
//! are aggregated, so a crash between the two can drop that order from the
//! report in flight but can never aggregate it twice.

use chrono::{DateTime, Utc};
use redis::Commands;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashSet},
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, info, warn};

pub type OrderId = String;

pub trait Ledger: Send {
    /// Re-reads the durable store and returns every processed order id.
    fn load_all(&mut self) -> Result<HashSet<OrderId>, LedgerError>;

    fn contains(&self, order_id: &str) -> bool;

    /// Durably appends `order_id`. Recording a known id is a no-op.
    fn record(&mut self, order_id: &str) -> Result<(), LedgerError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger line {line} is unreadable: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("ledger entry encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("redis ledger failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("refusing to record an empty order id")]
    EmptyOrderId,
    #[error(
        "ledger append to {} failed ({write}) and the partial line could not be removed: {truncate}",
        path.display()
    )]
    TornAppend {
        path: PathBuf,
        write: io::Error,
        #[source]
        truncate: io::Error,
    },
}

impl LedgerError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerEntry {
    order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recorded_at: Option<DateTime<Utc>>,
}

/// JSON-lines ledger. Each `record` is one appended line followed by an fsync.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    known: HashSet<OrderId>,
}

impl FileLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let mut ledger = Self {
            path: path.into(),
            known: HashSet::new(),
        };
        ledger.load_all()?;
        info!(
            target = "pickwell.ledger",
            path = %ledger.path.display(),
            known = ledger.known.len(),
            "file ledger opened"
        );
        Ok(ledger)
    }
}

impl Ledger for FileLedger {
    fn load_all(&mut self) -> Result<HashSet<OrderId>, LedgerError> {
        self.known = load_file(&self.path)?;
        Ok(self.known.clone())
    }

    fn contains(&self, order_id: &str) -> bool {
        self.known.contains(order_id)
    }

    fn record(&mut self, order_id: &str) -> Result<(), LedgerError> {
        if order_id.is_empty() {
            return Err(LedgerError::EmptyOrderId);
        }
        if self.known.contains(order_id) {
            return Ok(());
        }

        let entry = LedgerEntry {
            order_id: order_id.to_string(),
            recorded_at: Some(Utc::now()),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| LedgerError::io(&self.path, err))?;
        let pre_write_len = file
            .metadata()
            .map_err(|err| LedgerError::io(&self.path, err))?
            .len();

        if let Err(err) = file.write_all(&line).and_then(|_| file.sync_data()) {
            return Err(rollback_append(&file, &self.path, pre_write_len, err));
        }

        self.known.insert(entry.order_id);
        Ok(())
    }

    fn len(&self) -> usize {
        self.known.len()
    }
}

/// Drops a partial line so the next append starts on a clean boundary.
fn rollback_append(file: &File, path: &Path, pre_write_len: u64, write: io::Error) -> LedgerError {
    match file.set_len(pre_write_len) {
        Ok(()) => LedgerError::io(path, write),
        Err(truncate) => {
            error!(
                target = "pickwell.ledger",
                path = %path.display(),
                len = pre_write_len,
                write_error = %write,
                error = %truncate,
                "ledger append failed and truncate failed; file may end in a torn line"
            );
            LedgerError::TornAppend {
                path: path.to_path_buf(),
                write,
                truncate,
            }
        }
    }
}

fn load_file(path: &Path) -> Result<HashSet<OrderId>, LedgerError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(err) => return Err(LedgerError::io(path, err)),
    };
    if raw.trim().is_empty() {
        return Ok(HashSet::new());
    }
    if !raw.trim_start().starts_with('{') {
        let ids = parse_legacy(&raw);
        migrate_legacy(path, &ids)?;
        return Ok(ids.into_iter().collect());
    }

    let mut ids = HashSet::new();
    let mut intact_len = 0usize;
    for (idx, line) in raw.split_inclusive('\n').enumerate() {
        if !line.ends_with('\n') {
            // Unterminated tail: the append never completed, so the order
            // was never aggregated and must stay eligible.
            warn!(
                target = "pickwell.ledger",
                path = %path.display(),
                line = idx + 1,
                "dropping torn ledger tail"
            );
            break;
        }
        let body = line.trim();
        if !body.is_empty() {
            let entry: LedgerEntry =
                serde_json::from_str(body).map_err(|err| LedgerError::Corrupt {
                    line: idx + 1,
                    reason: err.to_string(),
                })?;
            ids.insert(entry.order_id);
        }
        intact_len += line.len();
    }

    if intact_len < raw.len() {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|err| LedgerError::io(path, err))?;
        file.set_len(intact_len as u64)
            .and_then(|_| file.sync_all())
            .map_err(|err| LedgerError::io(path, err))?;
    }
    Ok(ids)
}

/// Older deployments kept a single comma-joined line of ids.
fn parse_legacy(raw: &str) -> BTreeSet<OrderId> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn migrate_legacy(path: &Path, ids: &BTreeSet<OrderId>) -> Result<(), LedgerError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut buf = Vec::new();
    for id in ids {
        let entry = LedgerEntry {
            order_id: id.clone(),
            recorded_at: None,
        };
        serde_json::to_writer(&mut buf, &entry)?;
        buf.push(b'\n');
    }

    {
        let mut file = File::create(&tmp_path).map_err(|err| LedgerError::io(&tmp_path, err))?;
        file.write_all(&buf)
            .and_then(|_| file.sync_all())
            .map_err(|err| LedgerError::io(&tmp_path, err))?;
    }
    fs::rename(&tmp_path, path).map_err(|err| LedgerError::io(path, err))?;
    info!(
        target = "pickwell.ledger",
        path = %path.display(),
        migrated = ids.len(),
        "converted comma-separated ledger to json lines"
    );
    Ok(())
}

/// Ledger kept as one Redis set. Durability follows the server's persistence
/// settings (AOF with `appendfsync always` for the same guarantee as the file
/// ledger).
pub struct RedisLedger {
    conn: redis::Connection,
    key: String,
    known: HashSet<OrderId>,
}

impl RedisLedger {
    pub fn open(client: &redis::Client, key: impl Into<String>) -> Result<Self, LedgerError> {
        let mut ledger = Self {
            conn: client.get_connection()?,
            key: key.into(),
            known: HashSet::new(),
        };
        ledger.load_all()?;
        info!(
            target = "pickwell.ledger",
            key = %ledger.key,
            known = ledger.known.len(),
            "redis ledger opened"
        );
        Ok(ledger)
    }
}

impl Ledger for RedisLedger {
    fn load_all(&mut self) -> Result<HashSet<OrderId>, LedgerError> {
        let members: HashSet<String> = self.conn.smembers(&self.key)?;
        self.known = members;
        Ok(self.known.clone())
    }

    fn contains(&self, order_id: &str) -> bool {
        self.known.contains(order_id)
    }

    fn record(&mut self, order_id: &str) -> Result<(), LedgerError> {
        if order_id.is_empty() {
            return Err(LedgerError::EmptyOrderId);
        }
        if self.known.contains(order_id) {
            return Ok(());
        }
        let _: usize = self.conn.sadd(&self.key, order_id)?;
        self.known.insert(order_id.to_string());
        Ok(())
    }

    fn len(&self) -> usize {
        self.known.len()
    }
}

/// In-process ledger for tests. `fail_on` makes `record` fail for that id.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryLedger {
    pub known: HashSet<OrderId>,
    pub writes: Vec<OrderId>,
    pub fail_on: Option<OrderId>,
}

#[cfg(test)]
impl MemoryLedger {
    pub fn with_known(ids: &[&str]) -> Self {
        Self {
            known: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
impl Ledger for MemoryLedger {
    fn load_all(&mut self) -> Result<HashSet<OrderId>, LedgerError> {
        Ok(self.known.clone())
    }

    fn contains(&self, order_id: &str) -> bool {
        self.known.contains(order_id)
    }

    fn record(&mut self, order_id: &str) -> Result<(), LedgerError> {
        if self.fail_on.as_deref() == Some(order_id) {
            return Err(LedgerError::io(
                Path::new("memory"),
                io::Error::other("disk full"),
            ));
        }
        if self.known.insert(order_id.to_string()) {
            self.writes.push(order_id.to_string());
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.known.len()
    }
}
