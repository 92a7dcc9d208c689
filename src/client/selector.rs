//! Coordinator URL selection
//!
//! The selection method decides which coordinator instance receives the
//! next load-balanced request. Only `round-robin` and `sticky` are
//! handled in-process; any other method name disables load balancing and
//! every selection fails.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Picks the coordinator URL for the next load-balanced request.
pub trait Selector: Send + Sync {
    /// The URL to try next, or `None` when no instance is selectable.
    fn next(&self) -> Option<String>;

    /// Reports that a request against `url` failed.
    fn mark_failed(&self, url: &str);

    /// Whether this selector actually balances across instances.
    fn is_load_balancing(&self) -> bool {
        true
    }
}

/// Monotonic counter modulo the instance count.
pub struct RoundRobin {
    urls: Vec<String>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Selector for RoundRobin {
    fn next(&self) -> Option<String> {
        if self.urls.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(self.urls[n % self.urls.len()].clone())
    }

    fn mark_failed(&self, _url: &str) {
        // The wrapping cursor already moves past a failing instance.
    }
}

/// First selection is pinned and reused; a failure of the pinned
/// instance fails closed rather than promoting another one.
pub struct Sticky {
    urls: Vec<String>,
    pinned: Mutex<Option<usize>>,
    failed: AtomicBool,
}

impl Sticky {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            pinned: Mutex::new(None),
            failed: AtomicBool::new(false),
        }
    }
}

impl Selector for Sticky {
    fn next(&self) -> Option<String> {
        if self.urls.is_empty() || self.failed.load(Ordering::Acquire) {
            return None;
        }
        let mut pinned = self.pinned.lock().unwrap_or_else(|e| e.into_inner());
        let index = *pinned.get_or_insert(0);
        Some(self.urls[index].clone())
    }

    fn mark_failed(&self, url: &str) {
        let pinned = self.pinned.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = *pinned {
            if self.urls.get(index).map(String::as_str) == Some(url) {
                self.failed.store(true, Ordering::Release);
            }
        }
    }
}

/// Stands in for an unrecognized selection method: nothing is selectable
/// and the client reports load balancing as disabled.
pub struct Rejecting {
    method: String,
}

impl Rejecting {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }

    /// The unrecognized method name, for error messages.
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Selector for Rejecting {
    fn next(&self) -> Option<String> {
        None
    }

    fn mark_failed(&self, _url: &str) {}

    fn is_load_balancing(&self) -> bool {
        false
    }
}

/// Builds the selector for a configured method name.
pub fn selector_for(method: &str, urls: Vec<String>) -> Box<dyn Selector> {
    match method {
        "round-robin" => Box::new(RoundRobin::new(urls)),
        "sticky" => Box::new(Sticky::new(urls)),
        other => Box::new(Rejecting::new(other)),
    }
}
