//! Dedup / resume (§4.5): the `should_restore_from_disk` decision table
//! and a concrete JSON-file-backed `ResumeStore`, following the donor's
//! pattern of a small trait behind a file-backed default (see
//! `filter::FilterEngine` for the shape) so the gate stays swappable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ResumeStoreError;
use crate::model::LastParse;

/// Outcome of the resume gate for one incoming line/log snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    Process,
    Drop,
}

/// Snapshot of a log's current read state, compared against its persisted
/// `LastParse` to decide whether this run already ingested it.
#[derive(Debug, Clone, Copy)]
pub struct CurrentState<'a> {
    pub has_inode: bool,
    pub size: u64,
    pub line: u64,
    pub ts: i64,
    pub snippet: &'a [u8],
}

/// §4.5's seven-row decision table, applied in the order the table lists
/// it (earlier rows take priority).
pub fn should_restore_from_disk(
    restore_requested: bool,
    last_parse: Option<&LastParse>,
    current: &CurrentState,
) -> ResumeDecision {
    let Some(lp) = last_parse.filter(|_| restore_requested) else {
        return ResumeDecision::Process;
    };

    let same_snippet = current.snippet == lp.snippet.as_ref();

    if same_snippet {
        if current.size > lp.size && current.line >= lp.line {
            return ResumeDecision::Process;
        }
        return ResumeDecision::Drop;
    }

    if !current.has_inode && current.ts <= lp.ts {
        return ResumeDecision::Drop;
    }

    if current.ts > lp.ts {
        return ResumeDecision::Process;
    }

    if current.size < lp.size && current.ts == lp.ts {
        return ResumeDecision::Process;
    }

    ResumeDecision::Drop
}

/// Resume-store collaborator (`ht_get_last_parse`/`ht_insert_last_parse`
/// in the spec's external-interface vocabulary), keyed by inode — `0` for
/// pipes, which have none.
pub trait ResumeStore {
    fn get(&self, inode: u64) -> Option<LastParse>;
    fn insert(&mut self, inode: u64, lp: LastParse);
    fn flush(&self) -> Result<(), ResumeStoreError>;
}

/// JSON file on disk mapping inode (decimal string key) to `LastParse`.
/// Loaded once at startup, written back atomically (temp file + rename)
/// after each log finishes.
pub struct JsonFileResumeStore {
    path: PathBuf,
    entries: HashMap<u64, LastParse>,
}

impl JsonFileResumeStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ResumeStoreError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => {
                let raw: HashMap<String, LastParse> =
                    serde_json::from_slice(&bytes).map_err(|source| ResumeStoreError::Parse {
                        path: path.display().to_string(),
                        source,
                    })?;
                raw.into_iter()
                    .filter_map(|(k, v)| k.parse::<u64>().ok().map(|inode| (inode, v)))
                    .collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(ResumeStoreError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Self { path, entries })
    }

    fn write_atomically(&self) -> Result<(), ResumeStoreError> {
        let as_strings: HashMap<String, &LastParse> = self
            .entries
            .iter()
            .map(|(inode, lp)| (inode.to_string(), lp))
            .collect();
        let serialized =
            serde_json::to_vec_pretty(&as_strings).expect("LastParse serialization cannot fail");

        let tmp_path = tmp_path_for(&self.path);
        std::fs::write(&tmp_path, &serialized).map_err(|source| ResumeStoreError::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| ResumeStoreError::Write {
            path: self.path.display().to_string(),
            source,
        })
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl ResumeStore for JsonFileResumeStore {
    fn get(&self, inode: u64) -> Option<LastParse> {
        self.entries.get(&inode).cloned()
    }

    fn insert(&mut self, inode: u64, lp: LastParse) {
        self.entries.insert(inode, lp);
    }

    fn flush(&self) -> Result<(), ResumeStoreError> {
        self.write_atomically()
    }
}
