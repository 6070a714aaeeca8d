// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! OPC UA client protocol engine for edge gateways.
//!
//! The crate opens a secure channel to an OPC UA server, creates and keeps alive a session,
//! manages subscriptions and their monitored items and keeps a balanced number of publish
//! requests outstanding so that data change and event notifications arrive in order and
//! without loss.
//!
//! * [`types`] holds the binary encoding of the built-in types, including [`types::Variant`]
//!   and its conversion to and from a dynamic JSON value.
//! * [`core`] holds message chunking, the TCP codec and the secure channel.
//! * [`crypto`] holds security policies, keys, certificates and the certificate store.
//! * [`client`] holds the transport, session, subscription and publish machinery plus the
//!   [`client::OpcUaClient`] façade used by the rest of the platform.

#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::float_cmp)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::result_unit_err)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate derivative;

/// Tracing macro for obtaining a lock on a `Mutex`. Sometimes deadlocks can happen in code,
/// and if they do, this macro is useful for finding out where they happened.
#[macro_export]
macro_rules! trace_lock {
    ( $x:expr ) => {
        {
//            trace!("Thread {:?}, {} locking at {}, line {}", std::thread::current().id(), stringify!($x), file!(), line!());
            let v = $x.lock();
//            trace!("Thread {:?}, {} lock completed", std::thread::current().id(), stringify!($x));
            v
        }
    }
}

/// Tracing macro for obtaining a read lock on a `RwLock`.
#[macro_export]
macro_rules! trace_read_lock {
    ( $x:expr ) => {
        {
            let v = $x.read();
            v
        }
    }
}

/// Tracing macro for obtaining a write lock on a `RwLock`.
#[macro_export]
macro_rules! trace_write_lock {
    ( $x:expr ) => {
        {
            let v = $x.write();
            v
        }
    }
}

/// Lock types used throughout the crate.
pub mod sync {
    pub type RwLock<T> = parking_lot::RwLock<T>;
    pub type Mutex<T> = parking_lot::Mutex<T>;
}

pub mod client;
#[cfg(feature = "console-logging")]
pub mod console_logging;
pub mod core;
pub mod crypto;
pub mod types;
