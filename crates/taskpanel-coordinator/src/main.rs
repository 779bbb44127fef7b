/*
[INPUT]:  CLI arguments, YAML configuration file, NDJSON commands on stdin, OS shutdown signals
[OUTPUT]: NDJSON state updates on stdout, logs on stderr or a rolling file
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use taskpanel_coordinator::{Command, PanelConfig, TaskSessionCoordinator, UpdateSink};
use taskpanel_session::{Session, WampSession};

const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "taskpanel", version, about = "Task session coordinator for a compute engine")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
    #[arg(long = "url", value_name = "URL")]
    url: Option<String>,
    #[arg(long = "check")]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = load_config(args.config_path.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(url) = args.url {
        config.session.url = url;
    }
    let _log_guard = init_tracing(&config.logging.level, config.logging.directory.as_deref())?;

    info!(
        url = %config.session.url,
        realm = %config.session.realm,
        check = args.check,
        "starting taskpanel"
    );
    config.validate().context("validate config")?;

    if args.check {
        info!("check requested; configuration validated");
        return Ok(());
    }

    let wamp = WampSession::connect(&config.session.url, &config.session.realm)
        .await
        .context("connect engine session")?;
    let session = Session::new(wamp);

    let (sink, mut updates) = UpdateSink::channel();
    let mut coordinator =
        TaskSessionCoordinator::start_with_timeout(session, sink, config.shutdown_timeout());
    let mut failures = coordinator
        .take_failures()
        .context("coordinator failures already taken")?;

    let shutdown = coordinator.shutdown_token();
    setup_signal_handlers(shutdown.clone());

    let output = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut failures_open = true;
        loop {
            let line = tokio::select! {
                update = updates.recv() => match update {
                    Some(update) => serde_json::to_string(&update),
                    None => break,
                },
                failure = failures.recv(), if failures_open => match failure {
                    Some(failure) => serde_json::to_string(&json!({
                        "type": "FLOW_FAILURE",
                        "payload": failure,
                    })),
                    None => {
                        failures_open = false;
                        continue;
                    }
                },
            };
            let line = line.context("encode output line")?;
            stdout.write_all(line.as_bytes()).await.context("write stdout")?;
            stdout.write_all(b"\n").await.context("write stdout")?;
            stdout.flush().await.context("flush stdout")?;
        }
        Ok::<(), anyhow::Error>(())
    });

    read_commands(&coordinator, &shutdown).await?;
    info!("shutdown requested");

    coordinator
        .shutdown_and_wait()
        .await
        .context("shutdown coordinator")?;
    drop(coordinator);

    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, output).await {
        Ok(joined) => joined.context("join output writer")??,
        Err(_) => warn!("output writer did not drain in time"),
    }
    info!("taskpanel stopped");
    Ok(())
}

/// Forward stdin commands until EOF or a shutdown signal.
async fn read_commands(coordinator: &TaskSessionCoordinator, shutdown: &CancellationToken) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line.context("read stdin")?,
        };
        let Some(line) = line else {
            info!("stdin closed");
            shutdown.cancel();
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        match Command::from_line(&line) {
            Ok(command) => coordinator.dispatch(command)?,
            Err(err) => warn!(error = %err, "unparseable command line skipped"),
        }
    }
}

fn init_tracing(log_level: &str, directory: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    match directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "taskpanel.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|err| anyhow!(err))
                .context("initialize tracing subscriber")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|err| anyhow!(err))
                .context("initialize tracing subscriber")?;
            Ok(None)
        }
    }
}

/// Explicit path must exist; otherwise fall back to the default location,
/// then to built-in defaults.
fn load_config(path: Option<&Path>) -> Result<PanelConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match PanelConfig::default_path().filter(|path| path.exists()) {
            Some(path) => path,
            None => return Ok(PanelConfig::default()),
        },
    };
    let path_str = path.to_str().context("config path must be valid utf-8")?;
    PanelConfig::from_file(path_str).with_context(|| format!("load config path={path_str}"))
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
