//! Audit trail for reconcile operations
//!
//! Every step the reconciler takes (create, update, destroy, skip, ...) is appended
//! as an [`AuditEntry`]. The logger is a bounded buffer behind a mutex: once full,
//! the oldest entries are dropped. Clones share the same buffer, so one trail can
//! span several reconcilers.

use crate::core::resource::ResourceKind;
use crate::core::validation::LogicalName;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Single audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub resource: LogicalName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ResourceKind>,
    /// Free-form context (error message, blocking resource, new state)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    /// Create a new audit entry with current timestamp
    pub fn new(operation: Operation, resource: LogicalName) -> Self {
        AuditEntry {
            timestamp: Utc::now(),
            operation,
            resource,
            kind: None,
            detail: None,
        }
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Operation types for audit logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Destroy,
    /// Fingerprint matched the materialized resource
    Unchanged,
    /// A reference target was not materialized yet
    Defer,
    /// A dependency failed
    Skip,
    /// The provisioner returned an error
    Fail,
    /// Identity lifecycle transition
    Bind,
}

#[derive(Debug)]
struct Buffer {
    entries: VecDeque<AuditEntry>,
    written: usize,
}

/// Bounded, shareable audit logger
#[derive(Debug, Clone)]
pub struct AuditLogger {
    buffer: Arc<Mutex<Buffer>>,
    capacity: usize,
}

impl AuditLogger {
    /// Create a logger retaining at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        AuditLogger {
            buffer: Arc::new(Mutex::new(Buffer {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                written: 0,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest one when full
    pub fn log(&self, entry: AuditEntry) {
        let mut buffer = self.buffer.lock();
        if buffer.entries.len() == self.capacity {
            buffer.entries.pop_front();
        }
        buffer.entries.push_back(entry);
        buffer.written += 1;
    }

    /// Convenience method to log an operation on a resource
    pub fn log_resource_op(
        &self,
        operation: Operation,
        resource: &LogicalName,
        kind: ResourceKind,
        detail: Option<String>,
    ) {
        let mut entry = AuditEntry::new(operation, resource.clone()).with_kind(kind);
        entry.detail = detail;
        self.log(entry);
    }

    /// Snapshot of the retained entries, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer.lock().entries.iter().cloned().collect()
    }

    /// Remove and return the retained entries
    pub fn drain(&self) -> Vec<AuditEntry> {
        self.buffer.lock().entries.drain(..).collect()
    }

    /// Entries retained for one resource
    pub fn for_resource(&self, resource: &LogicalName) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .entries
            .iter()
            .filter(|e| &e.resource == resource)
            .cloned()
            .collect()
    }

    /// (total written, currently retained)
    pub fn stats(&self) -> (usize, usize) {
        let buffer = self.buffer.lock();
        (buffer.written, buffer.entries.len())
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(4096)
    }
}
