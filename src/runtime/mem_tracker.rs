// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A resizable byte reservation against a tracker.
///
/// Join buffers hold one of these and call [`MemReservation::resize`] whenever
/// their retained size changes. Dropping the reservation returns every byte.
#[derive(Debug)]
pub struct MemReservation {
    bytes: i64,
    tracker: Arc<MemTracker>,
}

impl MemReservation {
    pub fn new(tracker: Arc<MemTracker>) -> Self {
        Self { bytes: 0, tracker }
    }

    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    pub fn tracker(&self) -> &Arc<MemTracker> {
        &self.tracker
    }

    pub fn resize(&mut self, bytes: usize) {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        if bytes > self.bytes {
            self.tracker.consume(bytes - self.bytes);
        } else if bytes < self.bytes {
            self.tracker.release(self.bytes - bytes);
        }
        self.bytes = bytes;
    }

    pub fn transfer_to(&mut self, tracker: Arc<MemTracker>) {
        if Arc::ptr_eq(&self.tracker, &tracker) {
            return;
        }
        self.tracker.release(self.bytes);
        tracker.consume(self.bytes);
        self.tracker = tracker;
    }
}

impl Drop for MemReservation {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

/// Tracks logical memory usage for a component and its ancestors.
///
/// Only bytes explicitly reported by the caller are recorded; this is not a
/// view of process RSS.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    parent: Option<Arc<MemTracker>>,
    current: AtomicI64,
    peak: AtomicI64,
    children: Mutex<Vec<Weak<MemTracker>>>,
}

impl MemTracker {
    pub fn new_root(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            parent: None,
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn new_child(label: impl Into<String>, parent: &Arc<MemTracker>) -> Arc<Self> {
        let child = Arc::new(Self {
            label: label.into(),
            parent: Some(Arc::clone(parent)),
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            children: Mutex::new(Vec::new()),
        });
        parent
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(&child));
        child
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn children(&self) -> Vec<Arc<MemTracker>> {
        let guard = self.children.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().filter_map(Weak::upgrade).collect()
    }

    /// `label=current/peak`, followed by live children in brackets.
    pub fn usage_summary(&self) -> String {
        let mut out = format!("{}={}/{}", self.label, self.current(), self.peak());
        let children = self.children();
        if !children.is_empty() {
            let parts: Vec<String> = children.iter().map(|c| c.usage_summary()).collect();
            out.push_str(&format!(" [{}]", parts.join(", ")));
        }
        out
    }

    /// Increase consumption for this tracker and all ancestors.
    pub fn consume(&self, bytes: i64) {
        if bytes > 0 {
            self.walk_up(|tracker| {
                let value = tracker.current.fetch_add(bytes, Ordering::AcqRel) + bytes;
                tracker.peak.fetch_max(value, Ordering::AcqRel);
            });
        }
    }

    /// Decrease consumption for this tracker and all ancestors.
    pub fn release(&self, bytes: i64) {
        if bytes > 0 {
            self.walk_up(|tracker| {
                tracker.current.fetch_sub(bytes, Ordering::AcqRel);
            });
        }
    }

    fn walk_up(&self, mut f: impl FnMut(&MemTracker)) {
        let mut tracker = Some(self);
        while let Some(current) = tracker {
            f(current);
            tracker = current.parent.as_deref();
        }
    }
}
