// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leader lease held in the coordination store.

use crate::ids::HolderId;
use chrono::{DateTime, Utc};

/// A lease acquired by one orchestrator instance via the coordination store.
#[derive(Debug, Clone)]
pub struct LeaderLease {
    pub holder_id: HolderId,
    pub term: u64,
    pub expires_at: DateTime<Utc>,
}

impl LeaderLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Local state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Follower,
    Candidate,
    Leader,
}
