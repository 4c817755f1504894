//! Reservation hold — a single-slot, single-holder, time-limited claim.
//!
//! A `SlotHold` is created when a session locks a slot and carries the
//! one authoritative deadline for that claim. Every party that needs to
//! know whether the hold is still live (the countdown task, `confirm`,
//! the snapshot) asks this deadline against a single clock reading —
//! there are never two independently-racing timers.
//!
//! Lifecycle, driven by the session: HELD → CONFIRMED (payment success
//! before the deadline), HELD → EXPIRED (deadline reached), or
//! HELD → RELEASED (reselect, provider/date change, cancel, payment
//! failure). A new hold always starts with the full TTL; nothing is
//! carried over.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::slots::TimeSlot;

// ═══════════════════════════════════════════════════════════
// SlotHold
// ═══════════════════════════════════════════════════════════

/// An exclusive, TTL-bound claim on one slot by one session.
#[derive(Debug, Clone)]
pub struct SlotHold {
    /// Generation id: a late countdown firing checks this before acting,
    /// so a timer for a superseded hold can never touch its successor.
    id: Uuid,
    slot: TimeSlot,
    acquired_at: Instant,
    ttl: Duration,
}

impl SlotHold {
    /// Start a fresh hold on `slot`, full TTL from now.
    pub fn new(slot: TimeSlot, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot,
            acquired_at: Instant::now(),
            ttl,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn slot(&self) -> TimeSlot {
        self.slot
    }

    /// The instant at which this hold lapses.
    pub fn deadline(&self) -> Instant {
        self.acquired_at + self.ttl
    }

    /// Whether the hold has lapsed as of `now`. The deadline itself
    /// counts as expired: confirmation must be observed strictly before.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.deadline()
    }

    /// Whole seconds left before the deadline, saturating at zero.
    pub fn remaining_secs_at(&self, now: Instant) -> u64 {
        self.deadline().saturating_duration_since(now).as_secs()
    }
}

// ═══════════════════════════════════════════════════════════
// Release reasons
// ═══════════════════════════════════════════════════════════

/// Why a hold left the HELD state. Logged with each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Countdown reached the deadline with no confirmation.
    Expired,
    /// The session moved its claim to a different slot.
    Reselected,
    /// The provider selection changed.
    ProviderChanged,
    /// The date selection changed.
    DateChanged,
    /// The session was cancelled.
    Cancelled,
    /// The payment collaborator declined the confirmation.
    PaymentFailed,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Expired => "expired",
            Self::Reselected => "reselected",
            Self::ProviderChanged => "provider_changed",
            Self::DateChanged => "date_changed",
            Self::Cancelled => "cancelled",
            Self::PaymentFailed => "payment_failed",
        };
        f.write_str(label)
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
