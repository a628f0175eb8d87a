// log.rs — Append-only JSONL audit log.
//
// The audit log is stored as a JSONL (JSON Lines) file: one JSON object per
// line. Each entry is linked to the previous one via `previousHash`, the
// hash of the previous line's exact bytes, forming a hash chain. Inserting,
// deleting, or modifying a line breaks the link after it.
//
// Several processes may append to the same file. Every append takes an
// exclusive lock on the file and re-reads the last line under it, so the
// chain stays linear no matter who wrote last.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use fs2::FileExt;
use serde::Serialize;
use serde_json::Value;

use crate::entry::{signing_payload, AuditLogEntry};
use crate::error::AuditError;
use crate::hasher::{ChainHasher, GENESIS_HASH};

const LOCK_ATTEMPTS: u32 = 100;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);
const TAIL_CHUNK: u64 = 4096;

/// An append-only audit log backed by a JSONL file.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    hasher: ChainHasher,
    strict: bool,
    /// Hash of the last line written or seen; the next entry's `previousHash`.
    last_hash: Mutex<String>,
}

impl AuditLog {
    /// Open (or create) an unkeyed audit log at the given path.
    ///
    /// If the file already exists, the hash of its last line is recovered so
    /// new entries link correctly.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        Self::open_with(path, ChainHasher::Plain)
    }

    /// Open a log whose chain and signatures are keyed with `secret`.
    pub fn open_with_secret(path: impl AsRef<Path>, secret: &str) -> Result<Self, AuditError> {
        Self::open_with(path, ChainHasher::new(Some(secret)))
    }

    pub fn open_with(path: impl AsRef<Path>, hasher: ChainHasher) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| AuditError::OpenFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let last_hash = Self::current_tail_hash(&path, &hasher)?;
        tracing::debug!(path = %path.display(), keyed = hasher.is_keyed(), "audit log opened");

        Ok(Self {
            path,
            hasher,
            strict: false,
            last_hash: Mutex::new(last_hash),
        })
    }

    /// In strict mode `log` returns write failures instead of swallowing them.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn is_keyed(&self) -> bool {
        self.hasher.is_keyed()
    }

    /// Return the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash the next entry will link to.
    pub fn last_hash(&self) -> String {
        self.last_hash
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Append an entry to the log.
    ///
    /// Sets `previous_hash` (and `signature` on a keyed log), writes the
    /// entry as one line and syncs it to disk.
    pub fn append(&self, entry: &mut AuditLogEntry) -> Result<(), AuditError> {
        let mut last_hash = self
            .last_hash
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| AuditError::OpenFailed {
                path: self.path.clone(),
                source,
            })?;
        let _lock = LogLock::acquire(&file, &self.path)?;

        // Another process may have appended since we last looked.
        entry.previous_hash = Self::current_tail_hash(&self.path, &self.hasher)?;
        entry.signature = None;
        if self.hasher.is_keyed() {
            entry.signature = self.hasher.sign(entry.signing_payload()?.as_bytes());
        }

        let line = serde_json::to_string(entry)?;
        let mut record = Vec::with_capacity(line.len() + 2);
        // A torn final line keeps its own line; ours must not be glued onto it.
        if !ends_with_newline(&file)? {
            tracing::warn!(path = %self.path.display(), "audit log ends mid-line; starting a new line");
            record.push(b'\n');
        }
        record.extend_from_slice(line.as_bytes());
        record.push(b'\n');
        (&file).write_all(&record)?;
        (&file).flush()?;
        file.sync_data()?;

        *last_hash = self.hasher.chain_hash(line.as_bytes());
        Ok(())
    }

    /// Append with the strict-mode contract applied.
    ///
    /// Strict: a failure is returned. Otherwise it is reported through
    /// `tracing::error!` and the run carries on.
    pub fn log(&self, mut entry: AuditLogEntry) -> Result<(), AuditError> {
        match self.append(&mut entry) {
            Ok(()) => Ok(()),
            Err(e) if self.strict => Err(e),
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    action = %entry.action.action_name,
                    "failed to write audit entry"
                );
                Ok(())
            }
        }
    }

    /// Read all entries from this log, oldest first.
    pub fn entries(&self) -> Result<Vec<AuditLogEntry>, AuditError> {
        Self::read_all(&self.path)
    }

    /// Read all entries from a log file, oldest first.
    ///
    /// A missing file reads as empty. Skips blank lines gracefully.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditLogEntry>, AuditError> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AuditError::OpenFailed {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line?;
            let line = strip_cr(&line);
            if line.trim_ascii().is_empty() {
                continue;
            }
            let entry = serde_json::from_slice(line).map_err(|source| AuditError::MalformedEntry {
                line: index + 1,
                source,
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Verify this log's chain (and signatures, if keyed).
    pub fn verify_chain(&self) -> Result<ChainReport, AuditError> {
        verify_file(&self.path, &self.hasher)
    }

    /// Hash of the last non-blank line in the file, or genesis.
    fn current_tail_hash(path: &Path, hasher: &ChainHasher) -> Result<String, AuditError> {
        let tail = read_last_line(path).map_err(|source| AuditError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(match tail {
            Some(line) => hasher.chain_hash(&line),
            None => GENESIS_HASH.to_string(),
        })
    }
}

/// Exclusive advisory lock on the log file, released on drop.
struct LogLock<'a> {
    file: &'a File,
}

impl<'a> LogLock<'a> {
    fn acquire(file: &'a File, path: &Path) -> Result<Self, AuditError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(_) if attempt >= LOCK_ATTEMPTS => {
                    return Err(AuditError::LockTimeout {
                        path: path.to_path_buf(),
                        attempts: attempt,
                    })
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "audit log busy, retrying");
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
            }
        }
    }
}

impl Drop for LogLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file) {
            tracing::warn!(error = %e, "failed to release audit log lock");
        }
    }
}

/// What went wrong on one line of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// `previousHash` does not match the hash of the line before.
    HashMismatch { expected: String, found: String },
    /// A keyed log entry whose signature does not verify.
    SignatureMismatch,
    /// A keyed log entry with no signature at all.
    MissingSignature,
    /// The line is not a JSON object.
    ParseError { message: String },
}

/// One chain violation, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainViolation {
    pub line: usize,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl std::fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ViolationKind::HashMismatch { expected, found } => write!(
                f,
                "line {}: hash mismatch (expected {}, found {})",
                self.line, expected, found
            ),
            ViolationKind::SignatureMismatch => write!(f, "line {}: signature mismatch", self.line),
            ViolationKind::MissingSignature => write!(f, "line {}: missing signature", self.line),
            ViolationKind::ParseError { message } => {
                write!(f, "line {}: parse error: {}", self.line, message)
            }
        }
    }
}

/// Result of walking a log file end to end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// Non-blank lines examined.
    pub entries: usize,
    pub violations: Vec<ChainViolation>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Walk a log file and collect every chain violation. Never modifies it.
///
/// A missing file is an empty, valid chain. Parse failures do not stop the
/// walk: the raw line still feeds the next link.
pub fn verify_file(path: impl AsRef<Path>, hasher: &ChainHasher) -> Result<ChainReport, AuditError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ChainReport::default()),
        Err(source) => {
            return Err(AuditError::OpenFailed {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut report = ChainReport::default();
    let mut expected = GENESIS_HASH.to_string();

    for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line?;
        let line = strip_cr(&line);
        if line.trim_ascii().is_empty() {
            continue;
        }
        let line_no = index + 1;
        report.entries += 1;

        match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(map)) => {
                let found = map
                    .get("previousHash")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if found != expected {
                    report.violations.push(ChainViolation {
                        line: line_no,
                        kind: ViolationKind::HashMismatch {
                            expected: expected.clone(),
                            found,
                        },
                    });
                }
                if hasher.is_keyed() {
                    let signature = map.get("signature").and_then(Value::as_str).map(str::to_string);
                    let payload = signing_payload(Value::Object(map));
                    let kind = match signature {
                        None => Some(ViolationKind::MissingSignature),
                        Some(sig) if !hasher.verify_signature(payload.as_bytes(), &sig) => {
                            Some(ViolationKind::SignatureMismatch)
                        }
                        Some(_) => None,
                    };
                    if let Some(kind) = kind {
                        report.violations.push(ChainViolation { line: line_no, kind });
                    }
                }
            }
            Ok(_) => report.violations.push(ChainViolation {
                line: line_no,
                kind: ViolationKind::ParseError {
                    message: "entry is not a JSON object".to_string(),
                },
            }),
            Err(e) => report.violations.push(ChainViolation {
                line: line_no,
                kind: ViolationKind::ParseError {
                    message: e.to_string(),
                },
            }),
        }

        expected = hasher.chain_hash(line);
    }

    if report.is_valid() {
        tracing::debug!(path = %path.display(), entries = report.entries, "audit chain verified");
    } else {
        tracing::warn!(
            path = %path.display(),
            violations = report.violations.len(),
            "audit chain verification failed"
        );
    }
    Ok(report)
}

/// True for an empty file or one whose last byte is `\n`.
fn ends_with_newline(mut file: &File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Last non-blank line of a file, read backwards from the end.
fn read_last_line(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut end = file.metadata()?.len();
    let mut tail: Vec<u8> = Vec::new();

    loop {
        // Everything after the first newline in `tail` is made of whole lines;
        // once we reach the start of the file, all of it is.
        let whole_from = if end == 0 {
            0
        } else {
            tail.iter().position(|b| *b == b'\n').map_or(tail.len(), |p| p + 1)
        };
        let last = tail[whole_from..]
            .split(|b| *b == b'\n')
            .map(strip_cr)
            .rev()
            .find(|l| !l.trim_ascii().is_empty());
        if let Some(line) = last {
            return Ok(Some(line.to_vec()));
        }
        if end == 0 {
            return Ok(None);
        }

        let start = end.saturating_sub(TAIL_CHUNK);
        let mut chunk = vec![0u8; (end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&tail);
        tail = chunk;
        end = start;
    }
}
