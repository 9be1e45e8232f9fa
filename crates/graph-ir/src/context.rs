// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-request execution context and device tracing.
//!
//! An [`ExecutionContext`] is owned by exactly one party at a time: the
//! caller builds it, ownership transfers to the runtime on submission, and
//! the completion callback hands it back. The [`TraceContext`] inside is a
//! cheap clonable handle so device managers can record events concurrently.

use crate::Bindings;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// One recorded trace event.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub name: String,
    /// Event source, e.g. a device name or `"host"`.
    pub source: String,
    pub timestamp: Instant,
}

/// A shared sink for trace events.
///
/// Cloning produces another handle to the same event buffer.
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl TraceContext {
    /// Creates an empty trace context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event.
    pub fn record(&self, name: impl Into<String>, source: impl Into<String>) {
        let event = TraceEvent {
            name: name.into(),
            source: source.into(),
            timestamp: Instant::now(),
        };
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Returns a snapshot of the recorded events.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns `true` if no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a single inference run carries: input/output bindings, an
/// optional trace handle, and request metadata.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    bindings: Bindings,
    trace: Option<TraceContext>,
}

impl ExecutionContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context around existing bindings.
    pub fn with_bindings(bindings: Bindings) -> Self {
        Self {
            bindings,
            trace: None,
        }
    }

    /// Attaches a trace handle.
    pub fn set_trace(&mut self, trace: TraceContext) {
        self.trace = Some(trace);
    }

    /// Returns the attached trace handle, if any.
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Returns the bindings.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Returns the bindings mutably.
    pub fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }

    /// Moves the bindings out, leaving an empty map behind.
    pub fn take_bindings(&mut self) -> Bindings {
        std::mem::take(&mut self.bindings)
    }
}
