// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_POST_ENDPOINT: &str = "localhost";
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_BATCH_INTERVAL_SECS: u64 = 300;
const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024; // 10MB in Bytes

/// Loaded once at startup and shared read-only by every component.
#[derive(Debug, Clone)]
pub struct Config {
    /// port the ingestion server listens on
    pub port: u16,
    /// downstream collector that receives each batch as a JSON array
    pub post_endpoint: String,
    /// number of pending records that triggers an early flush
    pub batch_size: usize,
    /// how often pending records are flushed regardless of count
    pub batch_interval: Duration,
    pub retry_delay: Duration,
    pub retry_attempts: u32,
    /// timeout for a single delivery attempt
    pub request_timeout: Duration,
    pub max_request_content_length: usize,
    /// how long in-flight ingestion connections may take to finish on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            post_endpoint: DEFAULT_POST_ENDPOINT.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_interval: Duration::from_secs(DEFAULT_BATCH_INTERVAL_SECS),
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_request_content_length: MAX_REQUEST_CONTENT_LENGTH,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let port = match env::var("APP_PORT") {
            Ok(port) => port.trim().parse::<u16>().map_err(|_| {
                anyhow::anyhow!("APP_PORT is not a valid port number: {port}")
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let post_endpoint =
            env::var("POST_ENDPOINT").unwrap_or_else(|_| DEFAULT_POST_ENDPOINT.to_string());

        Ok(Config {
            port,
            post_endpoint,
            batch_size: positive_from_env("BATCH_SIZE", DEFAULT_BATCH_SIZE),
            batch_interval: Duration::from_secs(positive_from_env(
                "BATCH_INTERVAL_SECONDS",
                DEFAULT_BATCH_INTERVAL_SECS,
            )),
            retry_delay: Duration::from_secs(from_env(
                "RETRY_DELAY_SECONDS",
                DEFAULT_RETRY_DELAY_SECS,
            )),
            retry_attempts: positive_from_env("RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS),
            request_timeout: Duration::from_secs(positive_from_env(
                "REQUEST_TIMEOUT_SECONDS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            ..Default::default()
        })
    }
}

/// Reads a number, falling back to `default` when unset or unparsable.
fn from_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Reads a strictly positive number, falling back to `default` when unset, unparsable or zero.
fn positive_from_env<T>(key: &str, default: T) -> T
where
    T: FromStr + PartialEq + Default,
{
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
        .filter(|val| *val != T::default())
        .unwrap_or(default)
}
