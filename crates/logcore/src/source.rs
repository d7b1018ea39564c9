//! Log lifecycle (§4.7): open a file or stdin, `stat` it for inode/size,
//! capture the startup snippet, drive the pipeline over it block by
//! block, and persist the final `LastParse` on completion.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::classify::{classify, ClassifyConfig, Classifiers};
use crate::error::{LogIoError, RunError};
use crate::filter::VhostMatcher;
use crate::metrics::{GlobalFlags, PerLogCounters};
use crate::model::{LastParse, Log, LogItem};
use crate::pipeline::{self, Chunks, ParserEngine};
use crate::resume::{should_restore_from_disk, CurrentState, ResumeDecision, ResumeStore};

/// Bytes captured from the start of a log at open time, compared across
/// runs to recognize the same file even if it was rotated in place.
pub const READ_BYTES: usize = 4096;

type DynAsyncRead = Box<dyn AsyncRead + Unpin + Send>;

/// An opened log source paired with its bookkeeping record.
pub struct LogSource {
    pub log: Log,
    reader: BufReader<DynAsyncRead>,
}

impl LogSource {
    /// Open a named file, `stat` it for inode/size, and capture the
    /// startup snippet without consuming it from the stream the pipeline
    /// will read (the snippet is read separately via `std::fs::read`; the
    /// async reader starts fresh from byte 0).
    pub async fn open_file(path: impl Into<PathBuf>) -> Result<Self, LogIoError> {
        let path = path.into();
        let std_file = std::fs::File::open(&path).map_err(|source| LogIoError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let metadata = std_file.metadata().map_err(|source| LogIoError::Stat {
            path: path.display().to_string(),
            source,
        })?;

        #[cfg(unix)]
        let inode = {
            use std::os::unix::fs::MetadataExt;
            metadata.ino()
        };
        #[cfg(not(unix))]
        let inode = 0u64;

        let size = metadata.len();
        let snippet = read_snippet(&path)?;

        let tokio_file = tokio::fs::File::from_std(std_file);
        let reader: DynAsyncRead = Box::new(tokio_file);

        Ok(Self {
            log: Log {
                path: Some(path),
                is_pipe: false,
                inode,
                size,
                read_bytes: 0,
                line_count: 0,
                start_time: 0,
                snippet,
                last_parse: None,
                processed: 0,
                invalid: 0,
                errors: Vec::new(),
            },
            reader: BufReader::new(reader),
        })
    }

    /// Accept stdin as a pre-opened pipe. No inode, no meaningful size.
    pub fn open_stdin() -> Self {
        let reader: DynAsyncRead = Box::new(tokio::io::stdin());
        Self {
            log: Log {
                path: None,
                is_pipe: true,
                inode: 0,
                size: 0,
                read_bytes: 0,
                line_count: 0,
                start_time: 0,
                snippet: Bytes::new(),
                last_parse: None,
                processed: 0,
                invalid: 0,
                errors: Vec::new(),
            },
            reader: BufReader::new(reader),
        }
    }

    pub fn attach_last_parse(&mut self, lp: Option<LastParse>) {
        self.log.last_parse = lp;
    }
}

fn read_snippet(path: &Path) -> Result<Bytes, LogIoError> {
    use std::io::Read;
    let mut file = std::fs::File::open(path).map_err(|source| LogIoError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let mut buf = vec![0u8; READ_BYTES];
    let n = file.read(&mut buf).map_err(|source| LogIoError::Read {
        path: path.display().to_string(),
        source,
    })?;
    buf.truncate(n);
    Ok(Bytes::from(buf))
}

/// Parameters driving one log's run through the pipeline, derived once
/// from `RunConfig` at startup.
pub struct RunParams {
    pub jobs: usize,
    pub chunk_size: usize,
    pub num_tests: usize,
    pub restore: bool,
}

/// Drive one log source end-to-end: optional format sniff, then blocks of
/// chunks parsed and drained until EOF or `stop` is set, finally
/// returning the `LastParse` to persist.
pub async fn run_log<F, R>(
    source: &mut LogSource,
    engine: Arc<ParserEngine>,
    classify_cfg: &ClassifyConfig,
    classifiers: &dyn Classifiers,
    flags: Arc<GlobalFlags>,
    counters: &PerLogCounters,
    params: &RunParams,
    resume_store: &R,
    stop: Arc<AtomicBool>,
    vhost_matcher: Option<&VhostMatcher>,
    mut inserter: F,
) -> Result<LastParse, RunError>
where
    F: FnMut(LogItem),
    R: ResumeStore,
{
    let saved = resume_store.get(source.log.inode);
    source.attach_last_parse(saved.clone());

    let fname_vhost = source
        .log
        .path
        .as_ref()
        .and_then(|p| p.to_str())
        .zip(vhost_matcher)
        .and_then(|(name, matcher)| matcher.extract(name));

    let mut last_ts: i64 = saved.as_ref().map(|lp| lp.ts).unwrap_or(0);
    let mut last_line: u64 = 0;

    if params.num_tests > 0 {
        let probe = read_lines(&mut source.reader, params.num_tests).await?;
        last_line += probe.len() as u64;
        if !probe.is_empty() && !pipeline::sniff_format(&probe, &engine, &flags) {
            return Err(RunError::WorkerFailed(
                "log format did not match any parsed line in the sample".to_string(),
            ));
        }
        for raw in &probe {
            process_one_line(
                raw,
                &engine,
                classify_cfg,
                classifiers,
                &flags,
                counters,
                params.restore,
                &saved,
                !source.log.is_pipe,
                source.log.size,
                last_line,
                &mut last_ts,
                fname_vhost.as_deref(),
                &mut inserter,
            );
        }
    }

    loop {
        if stop.load(Ordering::Acquire) || flags.should_stop() {
            break;
        }

        let chunks: Chunks = read_block(&mut source.reader, params.jobs, params.chunk_size).await?;
        if chunks.iter().all(|c| c.is_empty()) {
            break;
        }
        let line_total: u64 = chunks.iter().map(|c| c.len() as u64).sum();

        let block = pipeline::parse_block(chunks, Arc::clone(&engine), Arc::clone(&flags), params.jobs).await?;

        pipeline::drain_block(block, counters, |mut item| {
            last_line += 1;
            let has_inode = !source.log.is_pipe;
            let current = CurrentState {
                has_inode,
                size: source.log.size,
                line: last_line,
                ts: item_timestamp(&item),
                snippet: &source.log.snippet,
            };
            let decision = should_restore_from_disk(params.restore, saved.as_ref(), &current);
            if decision == ResumeDecision::Drop {
                return;
            }
            if item.vhost.is_none() {
                item.vhost = fname_vhost.clone();
            }
            classify(&mut item, classify_cfg, classifiers);
            let ts = item_timestamp(&item);
            if ts > last_ts {
                last_ts = ts;
            }
            counters.count_processed();
            counters.observe_timestamp(ts);
            inserter(item);
        });

        source.log.line_count += line_total;
        if line_total == 0 {
            break;
        }
    }

    Ok(LastParse {
        ts: last_ts,
        line: last_line,
        size: source.log.size,
        snippet: source.log.snippet.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
fn process_one_line<F>(
    raw: &[u8],
    engine: &ParserEngine,
    classify_cfg: &ClassifyConfig,
    classifiers: &dyn Classifiers,
    flags: &GlobalFlags,
    counters: &PerLogCounters,
    restore: bool,
    saved: &Option<LastParse>,
    has_inode: bool,
    size: u64,
    line: u64,
    last_ts: &mut i64,
    fname_vhost: Option<&str>,
    inserter: &mut F,
) where
    F: FnMut(LogItem),
{
    let Ok(mut item) = engine.parse(raw, flags) else {
        counters.count_invalid();
        return;
    };
    let current = CurrentState {
        has_inode,
        size,
        line,
        ts: item_timestamp(&item),
        snippet: &[],
    };
    if should_restore_from_disk(restore, saved.as_ref(), &current) == ResumeDecision::Drop {
        return;
    }
    if item.vhost.is_none() {
        item.vhost = fname_vhost.map(str::to_string);
    }
    classify(&mut item, classify_cfg, classifiers);
    let ts = item_timestamp(&item);
    if ts > *last_ts {
        *last_ts = ts;
    }
    counters.count_processed();
    counters.observe_timestamp(ts);
    inserter(item);
}

fn item_timestamp(item: &LogItem) -> i64 {
    item.numdate as i64
}

async fn read_lines(
    reader: &mut BufReader<DynAsyncRead>,
    max: usize,
) -> Result<Vec<Vec<u8>>, LogIoError> {
    let mut out = Vec::with_capacity(max);
    for _ in 0..max {
        let mut line = Vec::new();
        let n = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|source| LogIoError::Read {
                path: "<stream>".to_string(),
                source,
            })?;
        if n == 0 {
            break;
        }
        trim_newline(&mut line);
        out.push(line);
    }
    Ok(out)
}

async fn read_block(
    reader: &mut BufReader<DynAsyncRead>,
    jobs: usize,
    chunk_size: usize,
) -> Result<Chunks, LogIoError> {
    let mut chunks = Vec::with_capacity(jobs);
    for _ in 0..jobs.max(1) {
        let chunk = read_lines(reader, chunk_size).await?;
        let done = chunk.is_empty();
        chunks.push(chunk);
        if done {
            break;
        }
    }
    Ok(chunks)
}

fn trim_newline(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::BuiltinClassifiers;
    use crate::directive::{parse_format_string, DirectiveConfig, DirectiveEngine};
    use crate::resume::JsonFileResumeStore;

    fn engine() -> Arc<ParserEngine> {
        let tokens = parse_format_string(r#"%h %^[%d:%t %^] "%r" %s %b"#).unwrap();
        Arc::new(ParserEngine::Line(DirectiveEngine::new(
            tokens,
            DirectiveConfig {
                date_format: "%d/%b/%Y".to_string(),
                time_format: "%H:%M:%S".to_string(),
                date_num_format: "%Y%m%d".to_string(),
                double_decode: false,
                no_ip_validation: false,
                no_strict_status: false,
            },
        )))
    }

    #[tokio::test]
    async fn opens_file_and_captures_snippet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, b"127.0.0.1 - [10/Oct/2000:13:55:36 -0700] \"GET / HTTP/1.0\" 200 1\n").unwrap();
        let source = LogSource::open_file(&path).await.unwrap();
        assert!(!source.log.is_pipe);
        assert!(!source.log.snippet.is_empty());
        assert_eq!(source.log.size, std::fs::metadata(&path).unwrap().len());
    }

    #[tokio::test]
    async fn runs_full_file_and_counts_processed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let body = (0..5)
            .map(|_| r#"127.0.0.1 - [10/Oct/2000:13:55:36 -0700] "GET / HTTP/1.0" 200 1"#)
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";
        std::fs::write(&path, body).unwrap();

        let mut source = LogSource::open_file(&path).await.unwrap();
        let store = JsonFileResumeStore::load(dir.path().join("resume.json")).unwrap();
        let counters = PerLogCounters::default();
        let flags = Arc::new(GlobalFlags::default());
        let params = RunParams {
            jobs: 1,
            chunk_size: 10,
            num_tests: 0,
            restore: false,
        };
        let mut emitted = Vec::new();

        let lp = run_log(
            &mut source,
            engine(),
            &ClassifyConfig::default(),
            &BuiltinClassifiers,
            flags,
            &counters,
            &params,
            &store,
            Arc::new(AtomicBool::new(false)),
            None,
            |item| emitted.push(item),
        )
        .await
        .unwrap();

        assert_eq!(emitted.len(), 5);
        assert_eq!(lp.line, 5);
        assert_eq!(counters.snapshot().processed, 5);
    }
}
