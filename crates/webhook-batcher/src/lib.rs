// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Receives webhook events over HTTP, accumulates them into batches and forwards each batch
//! to a downstream collector.
//!
//! ```text
//!  POST /log ──> Aggregator::add ──(size threshold)──┐
//!                     ▲                              v
//!                     │ drain_all          Flusher (interval | signal | cancel)
//!                     └──────────────────────────────┤
//!                                                    v
//!                                     DeliveryClient::send (fixed-delay retries)
//!                                                    │ exhausted
//!                                                    v
//!                                       ErrorSink ──> process shutdown
//! ```

pub mod aggregator;
pub mod config;
pub mod delivery;
pub mod error_sink;
pub mod errors;
pub mod flusher;
pub mod http_utils;
pub mod record;
pub mod server;
