//! Search Router
//!
//! Per-request A/B gate between the legacy retrieval path (keyword-only,
//! no query understanding) and the unified hybrid pipeline. The decision is
//! `use_unified OR (stable_hash(user_id) mod 100) < rollout_percentage`,
//! with FNV-1a as the stable hash so the same user always lands on the same
//! side for a given configuration - across calls, restarts, and builds.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// FNV-1a 64-bit. Deliberately hand-rolled: routing must not depend on the
/// standard library's unstable-across-versions default hasher.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn stable_hash(input: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// The routing verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Take the unified pipeline?
    pub unified: bool,
    /// The user's stable bucket in [0, 100)
    pub bucket: u8,
}

/// Current router configuration, as exposed by `/migration/status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouterStatus {
    pub use_unified: bool,
    pub rollout_percentage: u8,
}

/// The rollout gate. Configuration fields are atomics so operators can move
/// the rollout while requests are in flight.
pub struct SearchRouter {
    use_unified: AtomicBool,
    rollout_percentage: AtomicU8,
}

impl SearchRouter {
    pub fn new(use_unified: bool, rollout_percentage: u8) -> Self {
        Self {
            use_unified: AtomicBool::new(use_unified),
            rollout_percentage: AtomicU8::new(rollout_percentage.min(100)),
        }
    }

    /// Decide the pipeline for a user. Deterministic for a fixed
    /// configuration and user id.
    pub fn decide(&self, user_id: &str) -> RouteDecision {
        let bucket = (stable_hash(user_id) % 100) as u8;
        let unified = self.use_unified.load(Ordering::Relaxed)
            || bucket < self.rollout_percentage.load(Ordering::Relaxed);
        RouteDecision { unified, bucket }
    }

    /// Current configuration (the `/migration/status` payload).
    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            use_unified: self.use_unified.load(Ordering::Relaxed),
            rollout_percentage: self.rollout_percentage.load(Ordering::Relaxed),
        }
    }

    /// Move the rollout. Percentage is clamped to [0, 100].
    pub fn configure(&self, use_unified: bool, rollout_percentage: u8) {
        self.use_unified.store(use_unified, Ordering::Relaxed);
        self.rollout_percentage.store(rollout_percentage.min(100), Ordering::Relaxed);
    }
}

// ============================================================================
// TESTS
// ============================================================================
