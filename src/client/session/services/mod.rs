// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Session services. Each service is an `impl Session` block in its own module.

use crate::types::StatusCode;

mod attributes;
mod method;
mod session;
pub(crate) mod subscriptions;
mod view;

/// Operation results of a response, which must number one per operation of the request.
fn one_per_operation<T>(results: Option<Vec<T>>, operations: usize) -> Result<Vec<T>, StatusCode> {
    let results = results.unwrap_or_default();
    if results.len() == operations {
        Ok(results)
    } else {
        error!("{} operations were requested but {} results came back", operations, results.len());
        Err(StatusCode::BadUnknownResponse)
    }
}
