// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::http_utils::{
    create_http_response, log_and_create_http_response, verify_request_content_length,
    HttpResponse,
};
use crate::record::Record;

const LOG_ENDPOINT_PATH: &str = "/log";
const HEALTH_ENDPOINT_PATH: &str = "/healthz";
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP ingestion surface. Each valid `POST /log` body becomes one record in the aggregator.
pub struct LogServer {
    pub config: Arc<Config>,
    pub aggregator: Arc<Aggregator>,
}

impl LogServer {
    /// Serves connections from `listener` until `cancel` fires, then waits up to the configured
    /// shutdown timeout for open connections to finish.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let config = Arc::clone(&self.config);
        let aggregator = Arc::clone(&self.aggregator);
        let service = service_fn(move |req: Request<Incoming>| {
            // called for each http request
            let config = Arc::clone(&config);
            let aggregator = Arc::clone(&aggregator);
            async move { LogServer::endpoint_handler(config, aggregator, req).await }
        });

        let mut server = http1::Builder::new();
        server
            .timer(TokioTimer::new())
            .header_read_timeout(HEADER_READ_TIMEOUT);
        let mut joinset = JoinSet::new();

        loop {
            let conn = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };

            let conn = TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            let cancel = cancel.clone();
            joinset.spawn(async move {
                let conn = server.serve_connection(conn, service);
                tokio::pin!(conn);
                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    () = cancel.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(e) = result {
                    debug!("Connection error: {e}");
                }
            });
        }

        drop(listener);
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while joinset.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Timed out waiting for {} connections to close, aborting them",
                joinset.len()
            );
            joinset.abort_all();
        }

        info!("Server stopped");
        Ok(())
    }

    async fn endpoint_handler(
        config: Arc<Config>,
        aggregator: Arc<Aggregator>,
        req: Request<Incoming>,
    ) -> http::Result<HttpResponse> {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = match (&method, path.as_str()) {
            (&Method::POST, LOG_ENDPOINT_PATH) => Self::handle_log(&config, &aggregator, req).await,
            (&Method::GET, HEALTH_ENDPOINT_PATH) => create_http_response("OK", StatusCode::OK),
            (_, LOG_ENDPOINT_PATH | HEALTH_ENDPOINT_PATH) => {
                create_http_response("", StatusCode::METHOD_NOT_ALLOWED)
            }
            _ => create_http_response("", StatusCode::NOT_FOUND),
        };

        log_request(&method, &path, &response, start.elapsed());
        response
    }

    async fn handle_log(
        config: &Config,
        aggregator: &Aggregator,
        req: Request<Incoming>,
    ) -> http::Result<HttpResponse> {
        if let Some(response) = verify_request_content_length(
            req.headers(),
            config.max_request_content_length,
            "Error processing log entry",
        ) {
            return response;
        }

        let body = match Limited::new(req.into_body(), config.max_request_content_length)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return log_and_create_http_response(
                    "Error processing log entry: Payload too large",
                    StatusCode::PAYLOAD_TOO_LARGE,
                );
            }
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading request body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let record = match Record::from_slice(&body) {
            Ok(record) => record,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Invalid log entry: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        aggregator.add(record);
        create_http_response("", StatusCode::OK)
    }
}

/// Writes the access log line for one request, whether or not a response could be built.
fn log_request(
    method: &Method,
    path: &str,
    response: &http::Result<HttpResponse>,
    elapsed: Duration,
) {
    let duration_us = elapsed.as_micros() as u64;
    match response {
        Ok(response) => info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            duration_us,
            "Request completed"
        ),
        Err(e) => error!(
            method = %method,
            path = %path,
            duration_us,
            "Request failed: {e}"
        ),
    }
}
