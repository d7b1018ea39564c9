//! Full-pipeline scenarios (end-to-end through `source::run_log`), using
//! real temp files rather than mocked I/O.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use logcore::classify::{BuiltinClassifiers, ClassifyConfig};
use logcore::directive::{parse_format_string, DirectiveConfig, DirectiveEngine};
use logcore::metrics::{GlobalFlags, PerLogCounters};
use logcore::pipeline::ParserEngine;
use logcore::resume::JsonFileResumeStore;
use logcore::source::{run_log, LogSource, RunParams};

fn clf_engine() -> Arc<ParserEngine> {
    let tokens = parse_format_string(r#"%h %^ %^ [%d:%t %^] "%r" %s %b"#).unwrap();
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
async fn common_log_format_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clf.log");
    std::fs::write(
        &path,
        br#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326
"#,
    )
    .unwrap();

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

    let mut items = Vec::new();
    run_log(
        &mut source,
        clf_engine(),
        &ClassifyConfig::default(),
        &BuiltinClassifiers,
        flags,
        &counters,
        &params,
        &store,
        Arc::new(AtomicBool::new(false)),
        None,
        |item| items.push(item),
    )
    .await
    .unwrap();

    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.host.as_deref(), Some("127.0.0.1"));
    assert_eq!(item.date.as_deref(), Some("20001010"));
    assert_eq!(item.time.as_deref(), Some("13:55:36"));
    assert_eq!(item.method.as_deref(), Some("GET"));
    assert_eq!(item.req.as_deref(), Some("/apache_pb.gif"));
    assert_eq!(item.protocol.as_deref(), Some("HTTP/1.0"));
    assert_eq!(item.status, 200);
    assert_eq!(item.resp_size, 2326);
}

#[tokio::test]
async fn resume_idempotence_on_unchanged_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resume.log");
    let body: String = (0..50)
        .map(|_| r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET / HTTP/1.0" 200 1"#)
        .collect::<Vec<_>>()
        .join("\n")
        + "\n";
    std::fs::write(&path, &body).unwrap();

    let resume_path = dir.path().join("resume_store.json");

    // First run: ingest everything, persist the fingerprint.
    {
        let mut source = LogSource::open_file(&path).await.unwrap();
        let mut store = JsonFileResumeStore::load(&resume_path).unwrap();
        let counters = PerLogCounters::default();
        let flags = Arc::new(GlobalFlags::default());
        let params = RunParams {
            jobs: 1,
            chunk_size: 10,
            num_tests: 0,
            restore: true,
        };
        let mut emitted = 0usize;
        let lp = run_log(
            &mut source,
            clf_engine(),
            &ClassifyConfig::default(),
            &BuiltinClassifiers,
            flags,
            &counters,
            &params,
            &store,
            Arc::new(AtomicBool::new(false)),
            None,
            |_item| emitted += 1,
        )
        .await
        .unwrap();
        assert_eq!(emitted, 50);
        store.insert(source.log.inode, lp);
        store.flush().unwrap();
    }

    // Second run on the unchanged file: nothing new should be emitted.
    {
        let mut source = LogSource::open_file(&path).await.unwrap();
        let store = JsonFileResumeStore::load(&resume_path).unwrap();
        let counters = PerLogCounters::default();
        let flags = Arc::new(GlobalFlags::default());
        let params = RunParams {
            jobs: 1,
            chunk_size: 10,
            num_tests: 0,
            restore: true,
        };
        let mut emitted = 0usize;
        run_log(
            &mut source,
            clf_engine(),
            &ClassifyConfig::default(),
            &BuiltinClassifiers,
            flags,
            &counters,
            &params,
            &store,
            Arc::new(AtomicBool::new(false)),
            None,
            |_item| emitted += 1,
        )
        .await
        .unwrap();
        assert_eq!(emitted, 0);
    }
}

#[tokio::test]
async fn pipeline_ordering_holds_across_job_counts() {
    for jobs in [1usize, 2, 4] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ordering.log");
        let body: String = (0..40)
            .map(|i| {
                format!(
                    r#"127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET /item/{i} HTTP/1.0" 200 1"#
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";
        std::fs::write(&path, &body).unwrap();

        let mut source = LogSource::open_file(&path).await.unwrap();
        let store = JsonFileResumeStore::load(dir.path().join("resume.json")).unwrap();
        let counters = PerLogCounters::default();
        let flags = Arc::new(GlobalFlags::default());
        let params = RunParams {
            jobs,
            chunk_size: 6,
            num_tests: 0,
            restore: false,
        };

        let mut items = Vec::new();
        run_log(
            &mut source,
            clf_engine(),
            &ClassifyConfig::default(),
            &BuiltinClassifiers,
            flags,
            &counters,
            &params,
            &store,
            Arc::new(AtomicBool::new(false)),
            None,
            |item| items.push(item),
        )
        .await
        .unwrap();

        let reqs: Vec<&str> = items.iter().map(|i| i.req.as_deref().unwrap()).collect();
        let expected: Vec<String> = (0..40).map(|i| format!("/item/{i}")).collect();
        assert_eq!(reqs, expected, "order diverged at jobs={jobs}");
    }
}
