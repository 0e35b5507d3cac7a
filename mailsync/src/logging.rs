//! # Logging
//!
//! The surrounding process can toggle extra sync and protocol logging
//! at runtime. Flags are shared with the supervisor, the scheduler
//! and every worker through [`LogSettings`].

use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use tracing::info;

/// The logging flags bitmask.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogFlags(u32);

impl LogFlags {
    /// Verbose orchestration logs (worker lifecycle, scheduling).
    ///
    /// Read by the supervisor, the scheduler and the scans. Warnings
    /// and failures are logged regardless.
    pub const SYNC: Self = Self(1 << 0);
    /// Protocol-level traces, left to workers through
    /// [`WorkerContext::log`](crate::worker::WorkerContext).
    pub const PROTOCOL: Self = Self(1 << 1);
    /// Include message content in protocol traces.
    pub const VERBOSE: Self = Self(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for LogFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for LogFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06b}", self.0)
    }
}

/// The logging settings shared between the orchestrator and its
/// workers.
#[derive(Clone, Debug, Default)]
pub struct LogSettings(Arc<AtomicU32>);

impl LogSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, flags: LogFlags) {
        let prev = self.0.swap(flags.bits(), Ordering::Relaxed);
        if prev != flags.bits() {
            info!(from = %LogFlags::from_bits(prev), to = %flags, "logging flags changed");
        }
    }

    pub fn get(&self) -> LogFlags {
        LogFlags::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn sync_enabled(&self) -> bool {
        self.get().contains(LogFlags::SYNC)
    }

    pub fn protocol_enabled(&self) -> bool {
        self.get().contains(LogFlags::PROTOCOL)
    }
}
