//! Parallel pipeline (§4.6): double-buffered blocks of chunks, a worker
//! pool bounded to `conf.jobs`, and a single-threaded inserter that
//! restores chunk order before handing items downstream. `jobs == 1`
//! takes an inline fast path with no task spawned, matching the spec's "no
//! thread is created" carve-out.

use std::sync::Arc;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::Semaphore;

use crate::error::{DirectiveError, RunError};
use crate::json_directive::JsonDirectiveEngine;
use crate::metrics::GlobalFlags;
use crate::model::LogItem;
use crate::{directive::DirectiveEngine};

/// Either parsing mode, selected once at startup from `RunConfig`.
pub enum ParserEngine {
    Line(DirectiveEngine),
    Json(JsonDirectiveEngine),
}

impl ParserEngine {
    pub fn parse(&self, raw: &[u8], flags: &GlobalFlags) -> Result<LogItem, DirectiveError> {
        match self {
            ParserEngine::Line(engine) => engine.parse_line(raw, flags),
            ParserEngine::Json(engine) => {
                let value: serde_json::Value = serde_json::from_slice(raw)
                    .map_err(|_| DirectiveError::MalformedSpec)?;
                let obj = value.as_object().ok_or(DirectiveError::MalformedSpec)?;
                engine.parse_object(obj, flags)
            }
        }
    }
}

/// Outcome of parsing one raw line: a populated item, or the directive
/// error that made it unparseable (never both).
pub enum LineOutcome {
    Parsed(LogItem),
    Invalid(DirectiveError),
}

/// One block's worth of work: `conf.jobs` chunks of up to
/// `conf.chunk_size` raw lines each, in the order they were read.
pub type Chunks = Vec<Vec<Vec<u8>>>;

/// Parse every chunk in a block, restoring input order in the result even
/// though chunks may complete out of order.
///
/// With `jobs == 1` this runs entirely on the calling task; otherwise each
/// chunk is parsed on a `spawn_blocking` task, bounded by a semaphore
/// sized to `jobs`.
pub async fn parse_block(
    chunks: Chunks,
    engine: Arc<ParserEngine>,
    flags: Arc<GlobalFlags>,
    jobs: usize,
) -> Result<Vec<Vec<LineOutcome>>, RunError> {
    if jobs <= 1 {
        return Ok(chunks
            .into_iter()
            .map(|chunk| parse_chunk(&chunk, &engine, &flags))
            .collect());
    }

    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut tasks = FuturesUnordered::new();

    for (idx, chunk) in chunks.into_iter().enumerate() {
        let engine = Arc::clone(&engine);
        let flags = Arc::clone(&flags);
        let semaphore = Arc::clone(&semaphore);
        tasks.push(async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed while tasks are outstanding");
            let result = tokio::task::spawn_blocking(move || {
                let outcome = parse_chunk(&chunk, &engine, &flags);
                drop(permit);
                outcome
            })
            .await;
            (idx, result)
        });
    }

    let mut ordered: Vec<Option<Vec<LineOutcome>>> = Vec::new();
    while let Some((idx, result)) = tasks.next().await {
        let outcome = result.map_err(|e| RunError::WorkerFailed(e.to_string()))?;
        if ordered.len() <= idx {
            ordered.resize_with(idx + 1, || None);
        }
        ordered[idx] = Some(outcome);
    }

    Ok(ordered
        .into_iter()
        .map(|slot| slot.expect("every chunk index was populated exactly once"))
        .collect())
}

fn parse_chunk(chunk: &[Vec<u8>], engine: &ParserEngine, flags: &GlobalFlags) -> Vec<LineOutcome> {
    chunk
        .iter()
        .map(|line| match engine.parse(line, flags) {
            // The engine itself already enforces host/date/req presence,
            // so any `Ok` here is emittable by construction.
            Ok(item) => LineOutcome::Parsed(item),
            Err(e) => LineOutcome::Invalid(e),
        })
        .collect()
}

/// Drain a parsed block in chunk order, classifying each parsed item and
/// handing it to `inserter`; invalid lines are counted but otherwise
/// dropped. Mirrors the single-threaded "inserter" step of §4.6.
///
/// `inserter` owns the resume-gate decision for each parsed item, so it
/// — not this function — calls `counters.count_processed()`, and only
/// once it has decided not to drop the item (§8 invariant 6: a line
/// dropped by the resume gate is never counted as processed).
pub fn drain_block<F>(block: Vec<Vec<LineOutcome>>, counters: &crate::metrics::PerLogCounters, mut inserter: F)
where
    F: FnMut(LogItem),
{
    for chunk in block {
        for outcome in chunk {
            match outcome {
                LineOutcome::Parsed(item) => {
                    inserter(item);
                }
                LineOutcome::Invalid(_) => {
                    counters.count_invalid();
                }
            }
        }
    }
}

/// Format-sniffing (§4.6): read up to `num_tests` lines synchronously; if
/// none parse, the format is declared mismatched.
pub fn sniff_format(lines: &[Vec<u8>], engine: &ParserEngine, flags: &GlobalFlags) -> bool {
    lines.iter().any(|line| {
        engine
            .parse(line, flags)
            .map(|item| item.is_emittable())
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{parse_format_string, DirectiveConfig};

    fn line_engine() -> Arc<ParserEngine> {
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

    fn sample_line() -> Vec<u8> {
        br#"127.0.0.1 - [10/Oct/2000:13:55:36 -0700] "GET /x HTTP/1.0" 200 10"#.to_vec()
    }

    #[tokio::test]
    async fn inline_fast_path_preserves_order() {
        let engine = line_engine();
        let flags = Arc::new(GlobalFlags::default());
        let chunks: Chunks = vec![vec![sample_line(); 3], vec![sample_line(); 2]];
        let result = parse_block(chunks, engine, flags, 1).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].len(), 3);
        assert_eq!(result[1].len(), 2);
    }

    #[tokio::test]
    async fn parallel_path_restores_chunk_order() {
        let engine = line_engine();
        let flags = Arc::new(GlobalFlags::default());
        let chunks: Chunks = (0..8).map(|_| vec![sample_line()]).collect();
        let result = parse_block(chunks, engine, flags, 4).await.unwrap();
        assert_eq!(result.len(), 8);
        for chunk in &result {
            assert_eq!(chunk.len(), 1);
        }
    }

    #[test]
    fn sniff_declares_mismatch_when_nothing_parses() {
        let tokens = parse_format_string(r#"%h %^[%d:%t %^] "%r" %s %b"#).unwrap();
        let engine = ParserEngine::Line(DirectiveEngine::new(
            tokens,
            DirectiveConfig {
                date_format: "%d/%b/%Y".to_string(),
                time_format: "%H:%M:%S".to_string(),
                date_num_format: "%Y%m%d".to_string(),
                double_decode: false,
                no_ip_validation: false,
                no_strict_status: false,
            },
        ));
        let flags = GlobalFlags::default();
        let lines = vec![b"not a matching line at all".to_vec()];
        assert!(!sniff_format(&lines, &engine, &flags));
    }
}
