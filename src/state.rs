//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request
//! handlers and WebSocket actors simultaneously. This is one of the most complex parts
//! of the application from a Rust perspective.
//!
//! ## Key Rust Concepts (IMPORTANT for beginners):
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: Many device connections run simultaneously and all need access to the same state
//! - **Memory safety**: Automatically cleans up data when the last reference is dropped
//! - **Thread safety**: Safe to share between threads
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Why needed**: The hello endpoint can read the counters while sessions update them
//! - **Performance**: Reading is fast (no blocking), writing blocks everything else
//! - **Deadlock prevention**: Rust's type system helps prevent common locking mistakes
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (every connection actor can hold a reference)
//! - **RwLock**: Thread-safe read/write access
//! - **T**: The actual data type being protected (here: `IngestMetrics`)
//! - **Result**: Thread-safe shared mutable state - the "holy grail" of concurrent programming
//!
//! ### Arc<dyn Trait> (trait objects)
//! - The uploader is stored as `Arc<dyn ObjectUploader>`: the state doesn't know or
//!   care whether it talks to S3 or does nothing, only that it satisfies the capability
//!
//! ## What does NOT live here:
//! Per-session protocol state never enters this module — each connection's actor owns
//! its own `IngestSession`, so sessions need no synchronization with each other. The
//! uploader is the one collaborator shared across sessions.

use crate::config::AppConfig;         // Our configuration types
use crate::upload::ObjectUploader;    // The shared upload capability
use std::sync::{Arc, RwLock};         // Thread-safe shared ownership and locking
use std::time::Instant;               // For tracking server uptime

/// The main application state that's shared across all handlers and actors.
///
/// ## Thread Safety Pattern:
/// - `config` and `uploader` are read-only after startup, so they're shared directly
///   (cloning an `Arc` is cheap - it just bumps a reference count)
/// - `metrics` is the only mutable data, protected by Arc<RwLock<T>>
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: Every worker thread and actor gets its own cheap copy
/// - **Instant**: A point in time (for measuring duration); Copy, so shared directly
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed at startup.
    pub config: AppConfig,

    /// Upload capability shared by all sessions.
    /// Arc<dyn ObjectUploader> means: shared ownership of "something that can upload".
    pub uploader: Arc<dyn ObjectUploader>,

    /// Ingest counters across all sessions (constantly updated by connections).
    /// This needs Arc<RwLock<>> because every session start/finish mutates it.
    pub metrics: Arc<RwLock<IngestMetrics>>,

    /// When the server started (never changes, so no Arc<RwLock> needed).
    pub start_time: Instant,
}

/// Ingest counters collected across all device connections.
///
/// ## Rust Concepts:
/// - **#[derive(Debug, Default, Clone)]**: Automatically implements:
///   - `Debug`: Can be printed with {:?} for debugging
///   - `Default`: Can create with IngestMetrics::default() (all zeros)
///   - `Clone`: Snapshots are plain copies handed to the hello endpoint
/// - **u64**: 64-bit unsigned integer (can count up to 18 quintillion)
/// - **u32**: 32-bit unsigned integer (sufficient for concurrent sessions)
///
/// ## Why these metrics matter:
/// - **sessions_started/active**: How many devices connected, how many stream now
/// - **frames_received/bytes_received**: Ingest volume (for capacity monitoring)
#[derive(Debug, Default, Clone)]
pub struct IngestMetrics {
    /// Sessions opened since startup.
    pub sessions_started: u64,

    /// Sessions currently streaming.
    pub sessions_active: u32,

    /// Frames accepted across all sessions.
    pub frames_received: u64,

    /// Wire bytes accepted across all sessions.
    pub bytes_received: u64,
}

impl AppState {
    /// Create fresh application state at startup.
    pub fn new(config: AppConfig, uploader: Arc<dyn ObjectUploader>) -> Self {
        Self {
            config,
            uploader,
            metrics: Arc::new(RwLock::new(IngestMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Record a new ingest connection.
    ///
    /// ## Thread Safety:
    /// Uses a write lock so only one thread updates the counters at a time.
    pub fn session_started(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.sessions_started += 1;
        metrics.sessions_active += 1;
    }

    /// Fold one finished session's totals back into the global counters.
    ///
    /// ## Why totals arrive at the end:
    /// Sessions keep their own counters while streaming (no lock traffic per
    /// frame) and report once on teardown.
    pub fn session_finished(&self, frames: u64, bytes: u64) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.sessions_active = metrics.sessions_active.saturating_sub(1);
        metrics.frames_received += frames;
        metrics.bytes_received += bytes;
    }

    /// Get a point-in-time copy of the counters.
    ///
    /// ## Rust Concepts:
    /// - **read()**: Shared lock - many readers can snapshot concurrently
    /// - **clone()**: The snapshot is independent of the live counters
    pub fn metrics_snapshot(&self) -> IngestMetrics {
        self.metrics.read().unwrap().clone()
    }

    /// Seconds since the server started.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::DisabledUploader;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), Arc::new(DisabledUploader))
    }

    /// Counters follow sessions through their lifecycle.
    #[test]
    fn test_session_lifecycle_counters() {
        let state = state();
        state.session_started();
        state.session_started();

        let snapshot = state.metrics_snapshot();
        assert_eq!(snapshot.sessions_started, 2);
        assert_eq!(snapshot.sessions_active, 2);

        state.session_finished(10, 3320);
        let snapshot = state.metrics_snapshot();
        assert_eq!(snapshot.sessions_active, 1);
        assert_eq!(snapshot.frames_received, 10);
        assert_eq!(snapshot.bytes_received, 3320);
    }

    /// A stray finish must not wrap the active count below zero.
    #[test]
    fn test_active_count_never_underflows() {
        let state = state();
        state.session_finished(0, 0);
        assert_eq!(state.metrics_snapshot().sessions_active, 0);
    }
}
