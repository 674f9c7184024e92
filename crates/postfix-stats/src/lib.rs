// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Postfix mail log counters.
//!
//! Lines from a Postfix log are classified into message lifecycle events, correlated by queue
//! id, and folded into ten cumulative counters. The counters can be queried over a TCP or Unix
//! domain socket while the log is still being consumed.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod classifier;
pub mod constants;
pub mod counter;
pub mod errors;
pub mod listener;
pub mod pipeline;
pub mod query;
pub mod source;
pub mod store;
pub mod tracker;
