//! Thin CLI driver. Parses arguments into a `RunConfig`, runs the
//! pipeline over each named log (or stdin), and exits with the status
//! code the library's own error type maps to. The report/TUI surface is
//! out of scope here — this binary exists to exercise the parsing core.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logcore::classify::{BuiltinClassifiers, ClassifyConfig};
use logcore::config::RunConfig;
use logcore::directive::{parse_format_string, verify_required, DirectiveConfig, DirectiveEngine};
use logcore::error::RunError;
use logcore::json_directive::JsonDirectiveEngine;
use logcore::metrics::{GlobalFlags, PerLogCounters};
use logcore::pipeline::ParserEngine;
use logcore::resume::JsonFileResumeStore;
use logcore::source::{LogSource, RunParams};

#[derive(Parser, Debug)]
#[command(name = "logcore", about = "Web access log parsing core")]
struct Cli {
    /// Log files to parse, or omit to read stdin.
    files: Vec<String>,

    /// Path to a TOML config file (overrides LOGCORE_CONFIG_FILE).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logcore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        std::env::set_var("LOGCORE_CONFIG_FILE", path);
    }

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let conf = RunConfig::load()?;

    let directive_cfg = DirectiveConfig {
        date_format: conf.date_format.clone(),
        time_format: conf.time_format.clone(),
        date_num_format: conf.date_num_format.clone(),
        double_decode: conf.double_decode,
        no_ip_validation: conf.no_ip_validation,
        no_strict_status: conf.no_strict_status,
    };
    let engine = Arc::new(if conf.is_json_log_format {
        ParserEngine::Json(JsonDirectiveEngine::new(
            conf.json_fields.clone(),
            directive_cfg,
        ))
    } else {
        let tokens = parse_format_string(&conf.log_format)?;
        verify_required(&tokens)?;
        ParserEngine::Line(DirectiveEngine::new(tokens, directive_cfg))
    });

    let classify_cfg = ClassifyConfig {
        ignore_crawlers: conf.ignore_crawlers,
        crawlers_only: conf.crawlers_only,
        ignore_statics: conf.ignore_statics,
        ignore_qstr: conf.ignore_qstr,
        ignore_status: conf.ignore_status.clone(),
        static_files: conf.static_files.clone(),
        all_static_files: conf.all_static_files,
        code444_as_404: conf.code444_as_404,
    };
    let classifiers = BuiltinClassifiers;

    let resume_path = conf
        .resume_store_path
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("logcore-resume.json"));
    let mut store = JsonFileResumeStore::load(&resume_path)?;

    let flags = Arc::new(GlobalFlags::default());
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl+C, finishing the current block before exiting");
                stop.store(true, std::sync::atomic::Ordering::Release);
            }
        });
    }

    let params = RunParams {
        jobs: conf.jobs,
        chunk_size: conf.chunk_size,
        num_tests: conf.num_tests,
        restore: conf.restore,
    };

    let vhost_matcher = match conf.fname_as_vhost.as_deref() {
        Some(pattern) => match logcore::filter::VhostMatcher::new(pattern) {
            Ok(m) => Some(m),
            Err(err) => {
                error!("ignoring invalid fname_as_vhost pattern: {err}");
                None
            }
        },
        None => None,
    };

    let mut sources = if cli.files.is_empty() || conf.read_stdin {
        vec![LogSource::open_stdin()]
    } else {
        let mut opened = Vec::with_capacity(cli.files.len());
        for path in &cli.files {
            opened.push(LogSource::open_file(path).await?);
        }
        opened
    };

    for source in &mut sources {
        let counters = PerLogCounters::default();
        let mut emitted = 0usize;
        let lp = logcore::source::run_log(
            source,
            Arc::clone(&engine),
            &classify_cfg,
            &classifiers,
            Arc::clone(&flags),
            &counters,
            &params,
            &store,
            Arc::clone(&stop),
            vhost_matcher.as_ref(),
            |_item| {
                emitted += 1;
            },
        )
        .await?;

        info!(
            inode = source.log.inode,
            processed = counters.snapshot().processed,
            invalid = counters.snapshot().invalid,
            emitted,
            "finished log"
        );
        store.insert(source.log.inode, lp);

        if conf.process_and_exit || stop.load(std::sync::atomic::Ordering::Acquire) {
            break;
        }
    }

    store.flush()?;
    Ok(())
}
