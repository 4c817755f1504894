//! Slot catalog — derives the bookable time-of-day slots for a provider.
//!
//! A `ScheduleConfig` describes a provider's operating-hour blocks and the
//! slot granularity. `generate()` is a pure function of the config: same
//! config, same ordered slot sequence, every time. The real-time cutoff
//! for "today" lives here too so the policy has exactly one home.

use std::fmt;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// TimeSlot — immutable value type
// ═══════════════════════════════════════════════════════════

/// A bookable point in time within a day. Generated, never mutated.
///
/// Ordering is chronological (derived lexicographic on hour then minute).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeSlot {
    /// Hour of day, 0–23.
    pub hour: u8,
    /// Minute within the hour, 0–59.
    pub minute: u8,
}

impl TimeSlot {
    pub const fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    /// Minutes elapsed since midnight.
    pub fn minutes_since_midnight(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

impl fmt::Display for TimeSlot {
    /// Renders as 12-hour clock time, e.g. "09:00 AM" or "06:45 PM".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meridiem = if self.hour >= 12 { "PM" } else { "AM" };
        let display_hour = match self.hour {
            0 => 12,
            h if h > 12 => h - 12,
            h => h,
        };
        write!(f, "{display_hour:02}:{:02} {meridiem}", self.minute)
    }
}

// ═══════════════════════════════════════════════════════════
// ScheduleConfig — operating-hour blocks + granularity
// ═══════════════════════════════════════════════════════════

/// One contiguous operating-hour window, half-open `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingBlock {
    pub start: TimeSlot,
    pub end: TimeSlot,
}

impl OperatingBlock {
    pub const fn new(start: TimeSlot, end: TimeSlot) -> Self {
        Self { start, end }
    }

    /// Whole-hour convenience, e.g. `from_hours(9, 13)` for 09:00–13:00.
    pub const fn from_hours(start_hour: u8, end_hour: u8) -> Self {
        Self {
            start: TimeSlot::new(start_hour, 0),
            end: TimeSlot::new(end_hour, 0),
        }
    }

    fn duration_minutes(&self) -> i32 {
        self.end.minutes_since_midnight() as i32 - self.start.minutes_since_midnight() as i32
    }
}

/// A provider's bookable schedule: ordered operating blocks and the
/// granularity at which consultations are offered.
///
/// Invariants (checked by `validate`): blocks are in ascending order and
/// do not overlap; the granularity evenly divides each block's duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub blocks: Vec<OperatingBlock>,
    /// Slot length in minutes.
    pub granularity_minutes: u16,
}

impl ScheduleConfig {
    pub fn new(blocks: Vec<OperatingBlock>, granularity_minutes: u16) -> Self {
        Self {
            blocks,
            granularity_minutes,
        }
    }

    /// Standard clinical hours: 09:00–13:00 and 15:00–19:00, 15-minute
    /// slots. Yields 32 slots, "09:00 AM" through "06:45 PM".
    pub fn standard_clinical_hours() -> Self {
        Self {
            blocks: vec![
                OperatingBlock::from_hours(9, 13),
                OperatingBlock::from_hours(15, 19),
            ],
            granularity_minutes: 15,
        }
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.granularity_minutes == 0 {
            return Err(ScheduleError::ZeroGranularity);
        }
        let mut prev_end: Option<TimeSlot> = None;
        for block in &self.blocks {
            let duration = block.duration_minutes();
            if duration <= 0 {
                return Err(ScheduleError::EmptyBlock {
                    start: block.start,
                    end: block.end,
                });
            }
            if duration % self.granularity_minutes as i32 != 0 {
                return Err(ScheduleError::GranularityMismatch {
                    start: block.start,
                    end: block.end,
                    granularity_minutes: self.granularity_minutes,
                });
            }
            if let Some(end) = prev_end {
                if block.start < end {
                    return Err(ScheduleError::OverlappingBlocks {
                        first_end: end,
                        second_start: block.start,
                    });
                }
            }
            prev_end = Some(block.end);
        }
        Ok(())
    }

    /// Generate the ordered slot sequence for this schedule.
    ///
    /// For each block `[start, end)` emits `start + k * granularity` for
    /// every multiple strictly below `end`, in block order. Pure and
    /// deterministic: identical config always yields the identical
    /// sequence.
    pub fn generate(&self) -> Result<Vec<TimeSlot>, ScheduleError> {
        self.validate()?;
        let step = self.granularity_minutes;
        let mut slots = Vec::new();
        for block in &self.blocks {
            let mut at = block.start.minutes_since_midnight();
            let end = block.end.minutes_since_midnight();
            while at < end {
                slots.push(TimeSlot::new((at / 60) as u8, (at % 60) as u8));
                at += step;
            }
        }
        Ok(slots)
    }
}

/// Errors from schedule validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Slot granularity must be non-zero")]
    ZeroGranularity,
    #[error("Operating block {start}–{end} is empty or inverted")]
    EmptyBlock { start: TimeSlot, end: TimeSlot },
    #[error("Granularity of {granularity_minutes} minutes does not evenly divide block {start}–{end}")]
    GranularityMismatch {
        start: TimeSlot,
        end: TimeSlot,
        granularity_minutes: u16,
    },
    #[error("Operating block starting {second_start} overlaps previous block ending {first_end}")]
    OverlappingBlocks {
        first_end: TimeSlot,
        second_start: TimeSlot,
    },
}

// ═══════════════════════════════════════════════════════════
// Real-time cutoff
// ═══════════════════════════════════════════════════════════

/// Whether a slot is past or at the current wall-clock time.
///
/// Policy for "today": a slot strictly before `now` is gone, and a slot
/// equal to the current hour-and-minute is also excluded — no booking
/// "right now". Seconds are ignored. Slots on future dates are never
/// passed through this check.
pub fn past_or_current(slot: TimeSlot, now: NaiveTime) -> bool {
    let now_minutes = (now.hour() * 60 + now.minute()) as u16;
    slot.minutes_since_midnight() <= now_minutes
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
