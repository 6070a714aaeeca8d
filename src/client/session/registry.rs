// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use crate::sync::RwLock;

use super::Session;

/// Sessions by their internal id. Only weak references are held, so anything that resolves
/// its session through the registry never keeps a session alive.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u32, Weak<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the session under [`Session::session_id`].
    pub fn register(&self, session: &Arc<Session>) {
        let mut sessions = trace_write_lock!(self.sessions);
        sessions.retain(|_, s| s.strong_count() > 0);
        sessions.insert(session.session_id(), Arc::downgrade(session));
    }

    /// The session with the id, if it still exists.
    pub fn get(&self, session_id: u32) -> Option<Arc<Session>> {
        let sessions = trace_read_lock!(self.sessions);
        sessions.get(&session_id).and_then(Weak::upgrade)
    }

    pub fn remove(&self, session_id: u32) -> bool {
        let mut sessions = trace_write_lock!(self.sessions);
        sessions.remove(&session_id).is_some()
    }

    /// Drops the entries of sessions that no longer exist, returning how many were dropped.
    pub fn prune(&self) -> usize {
        let mut sessions = trace_write_lock!(self.sessions);
        let before = sessions.len();
        sessions.retain(|_, s| s.strong_count() > 0);
        before - sessions.len()
    }

    /// The number of entries, including any for sessions dropped since the last prune.
    pub fn len(&self) -> usize {
        trace_read_lock!(self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
