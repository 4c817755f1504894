//! Availability ledger — the authoritative record of consumed slots.
//!
//! Tracks, per (provider, calendar date), which slots are permanently
//! booked plus a separate overlay of transient holds. All checks and
//! mutations for a ledger go through one interior lock, so a
//! read-then-write race between "select slot" and an external booking
//! can never leave two holders believing they own the same slot.
//!
//! Booked state grows monotonically within a session (no cancellation
//! is modeled); holds come and go as sessions acquire and release them.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::NaiveDate;
use rand::Rng;
use uuid::Uuid;

use crate::slots::TimeSlot;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Key for one provider's calendar day.
type DayKey = (Uuid, NaiveDate);

/// Availability state for one (provider, date).
#[derive(Debug, Default)]
struct DayState {
    /// Permanently consumed slots. Grows, never shrinks.
    booked: HashSet<TimeSlot>,
    /// Transient holds: slot → owning session. At most one holder per slot.
    holds: HashMap<TimeSlot, Uuid>,
    /// Whether synthetic pre-existing load has been applied.
    seeded: bool,
}

/// Read-only copy of one day's state, for rendering and candidate
/// filtering without holding the ledger lock.
#[derive(Debug, Clone, Default)]
pub struct DayView {
    pub booked: HashSet<TimeSlot>,
    pub holds: HashMap<TimeSlot, Uuid>,
}

impl DayView {
    /// Whether `slot` is free for `session` to take or keep.
    pub fn available_to(&self, slot: TimeSlot, session: Uuid) -> bool {
        if self.booked.contains(&slot) {
            return false;
        }
        match self.holds.get(&slot) {
            Some(holder) => *holder == session,
            None => true,
        }
    }
}

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Slot {0} is already booked or held")]
    SlotTaken(TimeSlot),
    #[error("No hold on slot {0} for this session")]
    HoldMissing(TimeSlot),
}

// ═══════════════════════════════════════════════════════════
// AvailabilityLedger
// ═══════════════════════════════════════════════════════════

/// Shared availability state across booking sessions and the external
/// booking generator. Cheap to share behind an `Arc`; every operation
/// is atomic with respect to every other.
#[derive(Debug, Default)]
pub struct AvailabilityLedger {
    days: Mutex<HashMap<DayKey, DayState>>,
}

impl AvailabilityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Reads ───────────────────────────────────────────

    /// Whether `slot` is available to `session`: not booked and not held
    /// by a different session. A poisoned lock reads as unavailable.
    pub fn is_available(
        &self,
        provider: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        session: Uuid,
    ) -> bool {
        self.days
            .lock()
            .map(|days| match days.get(&(provider, date)) {
                Some(day) => {
                    !day.booked.contains(&slot)
                        && day.holds.get(&slot).map_or(true, |holder| *holder == session)
                }
                None => true,
            })
            .unwrap_or(false)
    }

    /// Copy of one day's state for rendering.
    pub fn day_view(&self, provider: Uuid, date: NaiveDate) -> DayView {
        self.days
            .lock()
            .map(|days| match days.get(&(provider, date)) {
                Some(day) => DayView {
                    booked: day.booked.clone(),
                    holds: day.holds.clone(),
                },
                None => DayView::default(),
            })
            .unwrap_or_default()
    }

    // ── Mutations ───────────────────────────────────────

    /// Permanently consume a slot. Idempotent. Any transient hold on the
    /// slot is dropped so a hold never coexists with a booked entry.
    pub fn mark_unavailable(
        &self,
        provider: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
    ) -> Result<(), LedgerError> {
        let mut days = self.days.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let day = days.entry((provider, date)).or_default();
        if let Some(holder) = day.holds.remove(&slot) {
            tracing::warn!(%slot, %holder, "booked over an active hold");
        }
        day.booked.insert(slot);
        Ok(())
    }

    /// Acquire a hold on `slot` for `session`, releasing any hold the
    /// session already had (on any provider or date) first.
    ///
    /// Single-slot constraint: after this call the session holds either
    /// exactly the requested slot (Ok) or nothing at all (Err). The
    /// release-then-check-then-insert sequence happens under one lock.
    pub fn try_hold(
        &self,
        provider: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        session: Uuid,
    ) -> Result<(), LedgerError> {
        let mut days = self.days.lock().map_err(|_| LedgerError::LockPoisoned)?;
        for day in days.values_mut() {
            day.holds.retain(|_, holder| *holder != session);
        }
        let day = days.entry((provider, date)).or_default();
        if day.booked.contains(&slot) || day.holds.contains_key(&slot) {
            return Err(LedgerError::SlotTaken(slot));
        }
        day.holds.insert(slot, session);
        Ok(())
    }

    /// Drop every hold owned by `session`. No-op if it holds nothing.
    pub fn release_hold(&self, session: Uuid) -> Result<(), LedgerError> {
        let mut days = self.days.lock().map_err(|_| LedgerError::LockPoisoned)?;
        for day in days.values_mut() {
            day.holds.retain(|_, holder| *holder != session);
        }
        Ok(())
    }

    /// Convert `session`'s hold on `slot` into a permanent booking.
    ///
    /// Fails with `HoldMissing` if the session does not currently hold
    /// the slot — confirming without a live hold is a sequencing error.
    pub fn confirm_hold(
        &self,
        provider: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        session: Uuid,
    ) -> Result<(), LedgerError> {
        let mut days = self.days.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let day = days.entry((provider, date)).or_default();
        match day.holds.get(&slot) {
            Some(holder) if *holder == session => {
                day.holds.remove(&slot);
                day.booked.insert(slot);
                Ok(())
            }
            _ => Err(LedgerError::HoldMissing(slot)),
        }
    }

    // ── Simulated external load ─────────────────────────

    /// Apply synthetic pre-existing bookings the first time a
    /// (provider, date) is opened: each catalog slot is independently
    /// consumed with `probability`. Subsequent calls are no-ops, keeping
    /// booked state monotonic within a session.
    ///
    /// Returns the number of slots consumed by this call.
    pub fn seed_if_new(
        &self,
        provider: Uuid,
        date: NaiveDate,
        catalog: &[TimeSlot],
        probability: f64,
        rng: &mut impl Rng,
    ) -> Result<usize, LedgerError> {
        let probability = probability.clamp(0.0, 1.0);
        let mut days = self.days.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let day = days.entry((provider, date)).or_default();
        if day.seeded {
            return Ok(0);
        }
        day.seeded = true;
        let mut seeded = 0;
        for slot in catalog {
            if rng.gen_bool(probability) && day.booked.insert(*slot) {
                seeded += 1;
            }
        }
        tracing::debug!(%provider, %date, seeded, "seeded pre-existing bookings");
        Ok(seeded)
    }

    /// Ingest one externally-originated booking: pick a uniformly-random
    /// slot that is neither booked nor held and consume it. Models a
    /// concurrent, uncoordinated writer.
    ///
    /// Returns the consumed slot, or `None` when nothing is free — a
    /// fully-booked day is a quiet no-op, never an error.
    pub fn ingest_external_event(
        &self,
        provider: Uuid,
        date: NaiveDate,
        catalog: &[TimeSlot],
        rng: &mut impl Rng,
    ) -> Result<Option<TimeSlot>, LedgerError> {
        let mut days = self.days.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let day = days.entry((provider, date)).or_default();
        let free: Vec<TimeSlot> = catalog
            .iter()
            .copied()
            .filter(|slot| !day.booked.contains(slot) && !day.holds.contains_key(slot))
            .collect();
        if free.is_empty() {
            return Ok(None);
        }
        let slot = free[rng.gen_range(0..free.len())];
        day.booked.insert(slot);
        Ok(Some(slot))
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
