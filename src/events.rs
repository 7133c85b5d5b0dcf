// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Branch and conflict notifications.
//!
//! The branch store and merge engine publish [`BranchEvent`]s on an
//! [`EventBus`]. Consumers either subscribe to a broadcast receiver (for
//! async tasks) or register a synchronous handler. Delivery is
//! fire-and-forget: a bus with no listeners drops events silently and the
//! engine's own state never depends on them.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{MergeConflict, MergeResolution, VirtualBranch};

/// Capacity of the broadcast channel before slow receivers start lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A notification emitted by the branch store or merge engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum BranchEvent {
    #[serde(rename = "branch:created")]
    BranchCreated {
        branch: VirtualBranch,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "branch:merged")]
    BranchMerged {
        branch: VirtualBranch,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "branch:abandoned")]
    BranchAbandoned {
        branch: VirtualBranch,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "conflict:detected")]
    ConflictDetected {
        conflicts: Vec<MergeConflict>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "conflict:resolved")]
    ConflictResolved {
        resolution: MergeResolution,
        timestamp: DateTime<Utc>,
    },
}

impl BranchEvent {
    /// Wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BranchCreated { .. } => "branch:created",
            Self::BranchMerged { .. } => "branch:merged",
            Self::BranchAbandoned { .. } => "branch:abandoned",
            Self::ConflictDetected { .. } => "conflict:detected",
            Self::ConflictResolved { .. } => "conflict:resolved",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::BranchCreated { timestamp, .. }
            | Self::BranchMerged { timestamp, .. }
            | Self::BranchAbandoned { timestamp, .. }
            | Self::ConflictDetected { timestamp, .. }
            | Self::ConflictResolved { timestamp, .. } => *timestamp,
        }
    }
}

/// Synchronous event handler.
pub type EventHandler = Arc<dyn Fn(&BranchEvent) + Send + Sync>;

/// Publish/subscribe hub for [`BranchEvent`]s.
///
/// Cloning is cheap; clones share the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BranchEvent>,
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sender,
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<BranchEvent> {
        self.sender.subscribe()
    }

    /// Register a handler invoked synchronously on every emit.
    pub fn on<F>(&self, handler: F)
    where
        F: Fn(&BranchEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Publish an event to handlers and subscribers.
    pub fn emit(&self, event: BranchEvent) {
        tracing::debug!(event = event.event_type(), "Emitting event");

        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(&event);
        }

        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Number of live broadcast receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish_non_exhaustive()
    }
}
