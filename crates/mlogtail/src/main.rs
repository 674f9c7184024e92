// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;
mod error;

use std::{env, future::Future, io::Write, process::ExitCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use postfix_stats::{
    listener::{create_listener, Listener, ListenerInfo},
    pipeline::consume,
    query::{send_query, QueryServer},
    source::{FollowSource, LineSource, ReaderSource},
    store::{CounterStore, SharedCounterStore},
};

use crate::config::{Command, Config, DEFAULT_LOG_LEVEL};
use crate::error::MlogtailError;

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = Config::from_env();
    let log_level = config
        .as_ref()
        .map_or(DEFAULT_LOG_LEVEL, |config| config.log_level.as_str());

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(log_filter(log_level))
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {e}");
    }

    debug!("Logging subsystem enabled");

    let result = match config {
        Ok(config) => run(&config).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Filter for the configured level. Levels are validated with the rest of the configuration.
fn log_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

async fn run(config: &Config) -> Result<(), MlogtailError> {
    let arg = env::args().nth(1).unwrap_or_default();
    let command = Command::parse(&arg)?;
    debug!("Running {:?} with {:?}", command, config);

    match command {
        Command::Tail => tail(config).await,
        Command::Replay => replay(config).await,
        Command::Query(query) => {
            let response = send_query(&config.listen, &query)
                .await
                .map_err(MlogtailError::Query)?;
            print_stdout(&response);
            Ok(())
        }
    }
}

/// Follows the log and serves queries until the process is told to stop or, for stdin, until
/// the input ends.
async fn tail(config: &Config) -> Result<(), MlogtailError> {
    let (listener, listener_info) = create_listener(&config.listen, config.socket_options())
        .await
        .map_err(MlogtailError::ListenerStart)?;
    info!("Serving counters on {}", config.listen);

    let source: Box<dyn LineSource> = if config.reads_stdin() {
        Box::new(ReaderSource::stdin())
    } else {
        Box::new(
            FollowSource::open(&config.log_file)
                .await
                .map_err(MlogtailError::LogSource)?,
        )
    };
    info!("Reading mail log {}", config.log_file);

    serve(listener, listener_info, source, wait_for_shutdown()).await
}

/// Feeds `source` into a shared store queried through `listener` until the source ends or
/// `shutdown` completes. The socket file goes away with `listener_info` on return.
async fn serve(
    listener: Listener,
    listener_info: ListenerInfo,
    mut source: Box<dyn LineSource>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), MlogtailError> {
    let store = SharedCounterStore::new();
    let cancel_token = CancellationToken::new();
    let server = QueryServer::new(listener, store.clone(), cancel_token.clone());
    let server_handle = tokio::spawn(server.spin());

    let mut sink = store;
    let result = tokio::select! {
        ingested = consume(source.as_mut(), &mut sink) => match ingested {
            Ok(summary) => {
                info!(
                    "Mail log ended after {} lines, {} events, {} skipped",
                    summary.lines, summary.events, summary.errors
                );
                Ok(())
            }
            Err(e) => Err(MlogtailError::LogSource(e)),
        },
        () = shutdown => Ok(()),
    };

    cancel_token.cancel();
    if let Err(e) = server_handle.await {
        debug!("Query server task failed: {}", e);
    }
    drop(listener_info);
    info!("Stopped");
    result
}

/// Processes the whole log once and prints the final report.
async fn replay(config: &Config) -> Result<(), MlogtailError> {
    let mut store = CounterStore::new();
    let ingested = if config.reads_stdin() {
        consume(&mut ReaderSource::stdin(), &mut store).await
    } else {
        let mut source = ReaderSource::open(&config.log_file)
            .await
            .map_err(MlogtailError::LogSource)?;
        consume(&mut source, &mut store).await
    };
    let summary = ingested.map_err(MlogtailError::LogSource)?;

    debug!(
        "Replayed {} lines, {} events, {} skipped",
        summary.lines, summary.events, summary.errors
    );
    print_stdout(&store.snapshot());
    Ok(())
}

fn print_stdout(text: &str) {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
        debug!("Failed to write to stdout: {}", e);
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => debug!("Received SIGINT"),
                _ = sigterm.recv() => debug!("Received SIGTERM"),
            }
        }
        Err(e) => {
            debug!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use postfix_stats::listener::{ListenAddr, SocketOptions};
    use tokio::time::{timeout, Duration};
    use tracing::level_filters::LevelFilter;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_serve_stops_at_end_of_input() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("mlogtail.sock");
        let (listener, listener_info) = create_listener(
            &ListenAddr::Unix(socket_path.clone()),
            SocketOptions::default(),
        )
        .await
        .unwrap();
        assert!(socket_path.exists());

        let log: &'static [u8] =
            b"Oct 19 10:15:02 mx1 postfix/smtpd[4211]: AD1: client=relay.example.com[192.0.2.10]\n";
        let source: Box<dyn LineSource> = Box::new(ReaderSource::new(log));

        // No shutdown signal ever arrives; the end of input alone must stop serving.
        let served = timeout(
            Duration::from_secs(5),
            serve(listener, listener_info, source, std::future::pending()),
        )
        .await
        .expect("serving did not stop at end of input");
        assert!(served.is_ok());
        assert!(!socket_path.exists());
    }

    #[test]
    fn test_log_filter_follows_config() {
        let config = Config::from_lookup(|key| {
            (key == "MLOGTAIL_LOG_LEVEL").then(|| "WARN".to_string())
        })
        .unwrap();
        assert_eq!(
            log_filter(&config.log_level).max_level_hint(),
            Some(LevelFilter::WARN)
        );
        assert_eq!(
            log_filter(&Config::default().log_level).max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }
}
