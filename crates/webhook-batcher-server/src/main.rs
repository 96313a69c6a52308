// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use webhook_batcher::{
    aggregator::Aggregator, config, delivery::DeliveryClient, error_sink, flusher::Flusher,
    server::LogServer,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let json_logs = env::var("LOG_FORMAT")
        .map(|val| val.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let env_filter =
        EnvFilter::try_new(env_filter).expect("could not parse log level in configuration");
    let builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let installed = if json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    #[allow(clippy::expect_used)]
    installed.expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config::Config::new() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error loading config: {e}");
            return;
        }
    };
    info!(
        port = config.port,
        post_endpoint = %config.post_endpoint,
        batch_size = config.batch_size,
        batch_interval_secs = config.batch_interval.as_secs(),
        retry_delay_secs = config.retry_delay.as_secs(),
        retry_attempts = config.retry_attempts,
        request_timeout_secs = config.request_timeout.as_secs(),
        "Configuration loaded"
    );

    let delivery_client = match DeliveryClient::new(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Error creating delivery client: {e}");
            return;
        }
    };

    let (aggregator, flush_signal) = Aggregator::new(config.batch_size);
    let aggregator = Arc::new(aggregator);
    let (error_sink, mut error_rx) = error_sink::channel();
    let cancel = CancellationToken::new();

    let flusher = Flusher::new(
        Arc::clone(&aggregator),
        flush_signal,
        delivery_client,
        error_sink,
        config.batch_interval,
    );
    let flusher_handle = tokio::spawn(flusher.run(cancel.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            cancel.cancel();
            join_flusher(flusher_handle).await;
            return;
        }
    };
    info!("Starting server on {addr}");

    let server = LogServer {
        config: Arc::clone(&config),
        aggregator,
    };
    let server_cancel = cancel.clone();
    let mut server_handle =
        tokio::spawn(async move { server.serve(listener, server_cancel).await });

    tokio::select! {
        () = shutdown_signal() => info!("Shutdown signal received"),
        Some(e) = error_rx.recv() => error!("Flush failed, shutting down: {e}"),
        res = &mut server_handle => {
            match res {
                Ok(Err(e)) => error!("Server exited with error: {e}"),
                Err(e) => error!("Server task failed: {e}"),
                Ok(Ok(())) => warn!("Server exited unexpectedly"),
            }
        }
    }

    cancel.cancel();

    if !server_handle.is_finished() {
        // serve() bounds its own drain by the shutdown timeout, this only guards a stuck task
        match tokio::time::timeout(config.shutdown_timeout * 2, &mut server_handle).await {
            Ok(Ok(Err(e))) => error!("Server shutdown error: {e}"),
            Ok(Err(e)) => error!("Server task failed: {e}"),
            Ok(Ok(Ok(()))) => {}
            Err(_) => {
                warn!("Server did not stop in time");
                server_handle.abort();
            }
        }
    }

    join_flusher(flusher_handle).await;

    info!("Server exited");
}

/// Returns whether the flusher task ran to completion.
async fn join_flusher(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!("Flusher task failed: {e}");
            false
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
