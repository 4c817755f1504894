//! Booking session — orchestrates one user's reservation flow.
//!
//! A session walks provider → date → slot → confirmation. Selecting a
//! slot takes a TTL-bound exclusive hold (see `hold`); a countdown task
//! expires it automatically, and a background generator keeps feeding
//! simulated external bookings into the shared ledger while a
//! provider/date view is open. Confirmation is delegated to the opaque
//! payment collaborator: success converts the hold into a permanent
//! ledger entry and emits a `BookingRecord`, anything else releases it.
//!
//! One session is one logical actor: methods take `&mut self` and the
//! only shared mutable state is the ledger plus the small inner state
//! the countdown task needs to reach.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::directory::{ProviderDirectory, ProviderRecord};
use crate::hold::{ReleaseReason, SlotHold};
use crate::ledger::{AvailabilityLedger, DayView, LedgerError};
use crate::payment::PaymentCollaborator;
use crate::slots::{past_or_current, ScheduleError, TimeSlot};

// ═══════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════

/// Tuning for a booking session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a selected slot stays locked without confirmation.
    /// Default: 300 s.
    pub hold_ttl: Duration,
    /// Cadence of simulated external bookings while a provider/date
    /// view is open. Default: 8 s.
    pub external_booking_interval: Duration,
    /// Probability that a catalog slot is pre-booked when a
    /// (provider, date) is first opened. Default: 0.2.
    pub seed_unavailable_probability: f64,
    /// Bookable dates: today plus the following days. Default: 7.
    pub booking_window_days: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(300),
            external_booking_interval: Duration::from_secs(8),
            seed_unavailable_probability: 0.2,
            booking_window_days: 7,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Public types
// ═══════════════════════════════════════════════════════════

/// Finalized booking, emitted exactly once per confirmed hold.
#[derive(Debug, Clone, Serialize)]
pub struct BookingRecord {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub provider_name: String,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub fee_amount: u32,
    pub session_started_at: DateTime<Utc>,
    pub confirmed_at: DateTime<Utc>,
}

/// One candidate slot in the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot: TimeSlot,
    /// Pre-rendered "HH:MM AM/PM" label.
    pub display: String,
    pub available: bool,
}

/// User-visible notice produced by an automatic transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionNotice {
    /// The countdown reached zero and the held slot was given back.
    HoldExpired,
}

/// Read-only view of the session for rendering.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub provider_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    /// Candidate slots after the real-time cutoff, availability marked.
    pub available_slots: Vec<SlotStatus>,
    pub held_slot: Option<TimeSlot>,
    pub remaining_hold_secs: Option<u64>,
    pub notice: Option<SessionNotice>,
}

/// Errors from booking session operations. All are session-local and
/// recoverable by restarting the selection flow.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Slot {0} is no longer available")]
    SlotUnavailable(TimeSlot),
    #[error("The reservation hold has expired")]
    HoldExpired,
    #[error("Payment confirmation failed: {0}")]
    ConfirmationFailed(String),
    #[error("No active hold to confirm")]
    NoActiveHold,
    #[error("Unknown provider {0}")]
    UnknownProvider(Uuid),
    #[error("Date index {0} is outside the booking window")]
    DateOutsideWindow(usize),
    #[error("Slot {0} is not offered in the current context")]
    SlotNotOffered(TimeSlot),
    #[error("No provider selected")]
    NoProviderSelected,
    #[error("Invalid provider schedule: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("Availability ledger error: {0}")]
    Ledger(LedgerError),
}

// ═══════════════════════════════════════════════════════════
// BookingSession
// ═══════════════════════════════════════════════════════════

/// Session state the countdown task must be able to reach.
#[derive(Debug, Default)]
struct SessionInner {
    provider: Option<ProviderRecord>,
    catalog: Vec<TimeSlot>,
    date_index: usize,
    hold: Option<SlotHold>,
    notice: Option<SessionNotice>,
}

/// One user's booking flow over a shared availability ledger.
pub struct BookingSession<D, P> {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    config: SessionConfig,
    directory: Arc<D>,
    payment: Arc<P>,
    ledger: Arc<AvailabilityLedger>,
    inner: Arc<TokioMutex<SessionInner>>,
    /// Expires the active hold when its deadline passes.
    countdown_task: Option<JoinHandle<()>>,
    /// Feeds simulated external bookings for the open provider/date.
    generator_task: Option<JoinHandle<()>>,
}

impl<D, P> BookingSession<D, P>
where
    D: ProviderDirectory,
    P: PaymentCollaborator,
{
    pub fn new(
        directory: Arc<D>,
        payment: Arc<P>,
        ledger: Arc<AvailabilityLedger>,
        config: SessionConfig,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
            directory,
            payment,
            ledger,
            inner: Arc::new(TokioMutex::new(SessionInner::default())),
            countdown_task: None,
            generator_task: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // ── Selection ───────────────────────────────────────

    /// Select a provider. Releases any active hold, resets the date to
    /// today, seeds the day if unseen, and restarts the external
    /// booking generator for the new view.
    pub async fn select_provider(&mut self, provider_id: Uuid) -> Result<(), BookingError> {
        let provider = self
            .directory
            .find(provider_id)
            .ok_or(BookingError::UnknownProvider(provider_id))?;
        let catalog = provider.operating_hours.generate()?;

        self.release_active_hold(ReleaseReason::ProviderChanged).await;

        let inner_arc = Arc::clone(&self.inner);
        {
            let mut inner = inner_arc.lock().await;
            inner.provider = Some(provider.clone());
            inner.catalog = catalog.clone();
            inner.date_index = 0;
            inner.notice = None;
        }
        self.open_day(provider.id, 0, catalog)?;
        tracing::info!(provider = %provider.name, "provider selected");
        Ok(())
    }

    /// Select a date by index into the booking window (0 = today).
    /// Releases any active hold before recomputing the candidate view.
    pub async fn select_date(&mut self, index: usize) -> Result<(), BookingError> {
        if index >= self.config.booking_window_days {
            return Err(BookingError::DateOutsideWindow(index));
        }
        let inner_arc = Arc::clone(&self.inner);
        let (provider_id, catalog) = {
            let inner = inner_arc.lock().await;
            let provider = inner
                .provider
                .as_ref()
                .ok_or(BookingError::NoProviderSelected)?;
            (provider.id, inner.catalog.clone())
        };

        self.release_active_hold(ReleaseReason::DateChanged).await;

        {
            let mut inner = inner_arc.lock().await;
            inner.date_index = index;
            inner.notice = None;
        }
        self.open_day(provider_id, index, catalog)?;
        Ok(())
    }

    /// Lock a slot for this session, starting the countdown at the full
    /// TTL. Reselecting releases the prior hold first — a session never
    /// holds two slots. On `SlotUnavailable` the selection is cleared.
    pub async fn select_slot(&mut self, slot: TimeSlot) -> Result<(), BookingError> {
        let inner_arc = Arc::clone(&self.inner);
        let mut inner = inner_arc.lock().await;

        let provider = inner
            .provider
            .clone()
            .ok_or(BookingError::NoProviderSelected)?;
        if !inner.catalog.contains(&slot) {
            return Err(BookingError::SlotNotOffered(slot));
        }
        if inner.date_index == 0 && past_or_current(slot, Local::now().time()) {
            return Err(BookingError::SlotNotOffered(slot));
        }
        let date = date_for_index(inner.date_index);

        // Committed: the prior hold (if any) does not survive this call.
        if let Some(task) = self.countdown_task.take() {
            task.abort();
        }
        let prior = inner.hold.take();
        inner.notice = None;

        match self.ledger.try_hold(provider.id, date, slot, self.session_id) {
            Ok(()) => {
                if let Some(prior) = prior {
                    tracing::info!(
                        slot = %prior.slot(),
                        reason = %ReleaseReason::Reselected,
                        "hold released"
                    );
                }
                let hold = SlotHold::new(slot, self.config.hold_ttl);
                let hold_id = hold.id();
                let deadline = hold.deadline();
                inner.hold = Some(hold);
                drop(inner);

                self.spawn_countdown(hold_id, deadline);
                tracing::info!(
                    %slot,
                    %date,
                    ttl_secs = self.config.hold_ttl.as_secs(),
                    "slot locked"
                );
                Ok(())
            }
            // try_hold already dropped this session's prior claim
            Err(LedgerError::SlotTaken(_)) => Err(BookingError::SlotUnavailable(slot)),
            Err(err) => Err(BookingError::Ledger(err)),
        }
    }

    // ── Confirmation ────────────────────────────────────

    /// Request external confirmation for the held slot.
    ///
    /// The payment runs without the session lock; afterwards the hold is
    /// re-validated against its own deadline in a single clock check.
    /// CONFIRMED wins only if the approval is observed strictly before
    /// the deadline — a countdown firing mid-payment means `HoldExpired`.
    pub async fn confirm(&mut self) -> Result<BookingRecord, BookingError> {
        let inner_arc = Arc::clone(&self.inner);

        let (hold_id, slot, provider, date) = {
            let mut inner = inner_arc.lock().await;
            let provider = inner
                .provider
                .clone()
                .ok_or(BookingError::NoActiveHold)?;
            let Some(hold) = inner.hold.as_ref() else {
                // Distinguish "the hold lapsed" from "there never was one"
                return Err(match inner.notice {
                    Some(SessionNotice::HoldExpired) => BookingError::HoldExpired,
                    None => BookingError::NoActiveHold,
                });
            };
            if hold.is_expired_at(Instant::now()) {
                // Countdown has not fired yet; settle the expiry here.
                settle_expiry(&mut inner, &self.ledger, self.session_id);
                if let Some(task) = self.countdown_task.take() {
                    task.abort();
                }
                return Err(BookingError::HoldExpired);
            }
            (hold.id(), hold.slot(), provider, date_for_index(inner.date_index))
        };

        let outcome = self.payment.request_confirmation(provider.fee_amount).await;

        let mut inner = inner_arc.lock().await;
        let still_mine = matches!(&inner.hold, Some(h) if h.id() == hold_id);
        if !still_mine {
            // The hold lapsed (or was torn down) while the payment ran.
            return Err(BookingError::HoldExpired);
        }

        if !outcome.success {
            if let Some(task) = self.countdown_task.take() {
                task.abort();
            }
            inner.hold = None;
            self.ledger
                .release_hold(self.session_id)
                .map_err(BookingError::Ledger)?;
            tracing::info!(%slot, reason = %ReleaseReason::PaymentFailed, "hold released");
            return Err(BookingError::ConfirmationFailed(
                outcome
                    .failure_reason
                    .unwrap_or_else(|| "payment declined".into()),
            ));
        }

        if matches!(&inner.hold, Some(h) if h.is_expired_at(Instant::now())) {
            settle_expiry(&mut inner, &self.ledger, self.session_id);
            if let Some(task) = self.countdown_task.take() {
                task.abort();
            }
            return Err(BookingError::HoldExpired);
        }

        self.ledger
            .confirm_hold(provider.id, date, slot, self.session_id)
            .map_err(|err| match err {
                LedgerError::HoldMissing(_) => BookingError::HoldExpired,
                other => BookingError::Ledger(other),
            })?;
        inner.hold = None;
        if let Some(task) = self.countdown_task.take() {
            task.abort();
        }

        let record = BookingRecord {
            id: Uuid::new_v4(),
            provider_id: provider.id,
            provider_name: provider.name.clone(),
            date,
            slot,
            fee_amount: provider.fee_amount,
            session_started_at: self.started_at,
            confirmed_at: Utc::now(),
        };
        tracing::info!(%slot, %date, provider = %provider.name, "booking confirmed");
        Ok(record)
    }

    /// Abort the session: release any hold, stop both background tasks,
    /// and clear the selection. The ledger keeps everything already
    /// booked; nothing else is mutated.
    pub async fn cancel(&mut self) {
        if let Some(task) = self.generator_task.take() {
            task.abort();
        }
        if let Some(task) = self.countdown_task.take() {
            task.abort();
        }
        let inner_arc = Arc::clone(&self.inner);
        let mut inner = inner_arc.lock().await;
        if let Some(hold) = inner.hold.take() {
            if let Err(err) = self.ledger.release_hold(self.session_id) {
                tracing::warn!(%err, "hold release on cancel failed");
            }
            tracing::info!(slot = %hold.slot(), reason = %ReleaseReason::Cancelled, "hold released");
        }
        inner.provider = None;
        inner.catalog.clear();
        inner.date_index = 0;
        inner.notice = None;
    }

    // ── Rendering ───────────────────────────────────────

    /// Read-only state for rendering. Empty when no provider is open.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        let Some(provider) = inner.provider.as_ref() else {
            return SessionSnapshot::default();
        };
        let date = date_for_index(inner.date_index);
        let day = self.ledger.day_view(provider.id, date);
        let available_slots = candidate_slots(
            &inner.catalog,
            inner.date_index == 0,
            Local::now().time(),
            &day,
            self.session_id,
        );
        let now = Instant::now();
        let (held_slot, remaining_hold_secs) = match &inner.hold {
            Some(hold) if !hold.is_expired_at(now) => {
                (Some(hold.slot()), Some(hold.remaining_secs_at(now)))
            }
            _ => (None, None),
        };
        SessionSnapshot {
            provider_id: Some(provider.id),
            date: Some(date),
            available_slots,
            held_slot,
            remaining_hold_secs,
            notice: inner.notice,
        }
    }

    // ── Internals ───────────────────────────────────────

    /// Release the active hold (if any) outside of reselection.
    async fn release_active_hold(&mut self, reason: ReleaseReason) {
        if let Some(task) = self.countdown_task.take() {
            task.abort();
        }
        let inner_arc = Arc::clone(&self.inner);
        let mut inner = inner_arc.lock().await;
        if let Some(hold) = inner.hold.take() {
            if let Err(err) = self.ledger.release_hold(self.session_id) {
                tracing::warn!(%err, "hold release failed");
            }
            tracing::info!(slot = %hold.slot(), %reason, "hold released");
        }
    }

    /// Seed a freshly opened (provider, date) and restart the external
    /// booking generator scoped to that view.
    fn open_day(
        &mut self,
        provider_id: Uuid,
        date_index: usize,
        catalog: Vec<TimeSlot>,
    ) -> Result<(), BookingError> {
        let date = date_for_index(date_index);
        self.ledger
            .seed_if_new(
                provider_id,
                date,
                &catalog,
                self.config.seed_unavailable_probability,
                &mut rand::thread_rng(),
            )
            .map_err(BookingError::Ledger)?;

        if let Some(task) = self.generator_task.take() {
            task.abort();
        }
        let ledger = Arc::clone(&self.ledger);
        let interval = self.config.external_booking_interval;
        self.generator_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match ledger.ingest_external_event(
                    provider_id,
                    date,
                    &catalog,
                    &mut rand::thread_rng(),
                ) {
                    Ok(Some(slot)) => {
                        tracing::debug!(%slot, %date, "external booking ingested");
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(%err, "external ingestion failed, generator stopping");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Arm the countdown for a freshly acquired hold. The task checks
    /// the hold's generation id and deadline before acting, so a firing
    /// that lost the race to confirm/reselect is a no-op.
    fn spawn_countdown(&mut self, hold_id: Uuid, deadline: Instant) {
        let inner = Arc::clone(&self.inner);
        let ledger = Arc::clone(&self.ledger);
        let session_id = self.session_id;
        self.countdown_task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut inner = inner.lock().await;
            let lapsed =
                matches!(&inner.hold, Some(h) if h.id() == hold_id && h.is_expired_at(Instant::now()));
            if lapsed {
                settle_expiry(&mut inner, &ledger, session_id);
            }
        }));
    }
}

impl<D, P> Drop for BookingSession<D, P> {
    fn drop(&mut self) {
        if let Some(task) = self.generator_task.take() {
            task.abort();
        }
        if let Some(task) = self.countdown_task.take() {
            task.abort();
        }
        let _ = self.ledger.release_hold(self.session_id);
    }
}

// ═══════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════

/// Calendar date for a booking-window index (0 = today).
fn date_for_index(index: usize) -> NaiveDate {
    Local::now().date_naive() + chrono::Duration::days(index as i64)
}

/// HELD → EXPIRED: clear the hold, give the slot back, raise the notice.
fn settle_expiry(inner: &mut SessionInner, ledger: &AvailabilityLedger, session_id: Uuid) {
    if let Some(hold) = inner.hold.take() {
        inner.notice = Some(SessionNotice::HoldExpired);
        if let Err(err) = ledger.release_hold(session_id) {
            tracing::warn!(%err, "hold release after expiry failed");
        }
        tracing::info!(slot = %hold.slot(), reason = %ReleaseReason::Expired, "hold released");
    }
}

/// Candidate slots for a catalog and day view: the cutoff filter drops
/// past-or-current slots for today only, and availability treats the
/// session's own hold as available (it is the user's selection).
fn candidate_slots(
    catalog: &[TimeSlot],
    is_today: bool,
    now: NaiveTime,
    day: &DayView,
    session: Uuid,
) -> Vec<SlotStatus> {
    catalog
        .iter()
        .copied()
        .filter(|slot| !(is_today && past_or_current(*slot, now)))
        .map(|slot| SlotStatus {
            slot,
            display: slot.to_string(),
            available: day.available_to(slot, session),
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::payment::PaymentOutcome;
    use crate::slots::ScheduleConfig;

    const TTL: Duration = Duration::from_secs(300);

    /// Deterministic test tuning: no synthetic load, generator far away.
    fn quiet_config() -> SessionConfig {
        SessionConfig {
            hold_ttl: TTL,
            external_booking_interval: Duration::from_secs(3600),
            seed_unavailable_probability: 0.0,
            booking_window_days: 7,
        }
    }

    struct Approve;
    impl PaymentCollaborator for Approve {
        async fn request_confirmation(&self, _amount: u32) -> PaymentOutcome {
            PaymentOutcome::approved()
        }
    }

    struct Decline;
    impl PaymentCollaborator for Decline {
        async fn request_confirmation(&self, _amount: u32) -> PaymentOutcome {
            PaymentOutcome::declined("bank rejected the transaction")
        }
    }

    /// Approves after a fixed delay — for deadline races under a paused
    /// clock.
    struct SlowApprove(Duration);
    impl PaymentCollaborator for SlowApprove {
        async fn request_confirmation(&self, _amount: u32) -> PaymentOutcome {
            tokio::time::sleep(self.0).await;
            PaymentOutcome::approved()
        }
    }

    fn setup<P: PaymentCollaborator>(
        payment: P,
        config: SessionConfig,
    ) -> (
        BookingSession<StaticDirectory, P>,
        Arc<AvailabilityLedger>,
        ProviderRecord,
    ) {
        let directory = Arc::new(StaticDirectory::sample());
        let provider = directory.list_providers("riverside-general")[0].clone();
        let ledger = Arc::new(AvailabilityLedger::new());
        let session = BookingSession::new(
            directory,
            Arc::new(payment),
            Arc::clone(&ledger),
            config,
        );
        (session, ledger, provider)
    }

    /// Open provider + tomorrow (index 1), so the cutoff filter never
    /// interferes with wall-clock test runs.
    async fn open_tomorrow<P: PaymentCollaborator>(
        session: &mut BookingSession<StaticDirectory, P>,
        provider: &ProviderRecord,
    ) {
        session.select_provider(provider.id).await.unwrap();
        session.select_date(1).await.unwrap();
    }

    fn tomorrow() -> NaiveDate {
        date_for_index(1)
    }

    async fn settle_tasks() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    // ── Selection validation ────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unknown_provider_rejected() {
        let (mut session, _, _) = setup(Approve, quiet_config());
        let err = session.select_provider(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BookingError::UnknownProvider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn date_outside_window_rejected() {
        let (mut session, _, provider) = setup(Approve, quiet_config());
        session.select_provider(provider.id).await.unwrap();
        let err = session.select_date(7).await.unwrap_err();
        assert!(matches!(err, BookingError::DateOutsideWindow(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn date_without_provider_rejected() {
        let (mut session, _, _) = setup(Approve, quiet_config());
        let err = session.select_date(1).await.unwrap_err();
        assert!(matches!(err, BookingError::NoProviderSelected));
    }

    #[tokio::test(start_paused = true)]
    async fn slot_without_provider_rejected() {
        let (mut session, _, _) = setup(Approve, quiet_config());
        let err = session.select_slot(TimeSlot::new(9, 0)).await.unwrap_err();
        assert!(matches!(err, BookingError::NoProviderSelected));
    }

    #[tokio::test(start_paused = true)]
    async fn slot_outside_catalog_rejected() {
        let (mut session, _, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        // 13:00 falls in the midday gap of standard clinical hours
        let err = session.select_slot(TimeSlot::new(13, 0)).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotNotOffered(_)));
    }

    // ── Hold acquisition ────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn selecting_a_slot_locks_it_for_others() {
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(9, 0);

        session.select_slot(slot).await.unwrap();

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.held_slot, Some(slot));
        assert_eq!(snapshot.remaining_hold_secs, Some(300));
        assert!(!ledger.is_available(provider.id, tomorrow(), slot, Uuid::new_v4()));
        // The holder still sees its own selection as available
        let status = snapshot
            .available_slots
            .iter()
            .find(|s| s.slot == slot)
            .unwrap();
        assert!(status.available);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrently_taken_slot_clears_selection() {
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(9, 0);

        // An external writer consumes the slot first
        ledger.mark_unavailable(provider.id, tomorrow(), slot).unwrap();

        let err = session.select_slot(slot).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotUnavailable(_)));
        assert!(session.snapshot().await.held_slot.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reselection_moves_the_hold() {
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot_a = TimeSlot::new(9, 0);
        let slot_b = TimeSlot::new(9, 15);
        let other = Uuid::new_v4();

        session.select_slot(slot_a).await.unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;
        session.select_slot(slot_b).await.unwrap();

        // A is free for others again, B is locked, TTL restarted in full
        assert!(ledger.is_available(provider.id, tomorrow(), slot_a, other));
        assert!(!ledger.is_available(provider.id, tomorrow(), slot_b, other));
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.held_slot, Some(slot_b));
        assert_eq!(snapshot.remaining_hold_secs, Some(300));
    }

    #[tokio::test(start_paused = true)]
    async fn reselecting_the_same_slot_restarts_the_ttl() {
        let (mut session, _, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(10, 30);

        session.select_slot(slot).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        session.select_slot(slot).await.unwrap();

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.held_slot, Some(slot));
        assert_eq!(snapshot.remaining_hold_secs, Some(300));
    }

    #[tokio::test(start_paused = true)]
    async fn fully_seeded_day_offers_nothing() {
        let config = SessionConfig {
            seed_unavailable_probability: 1.0,
            ..quiet_config()
        };
        let (mut session, _, provider) = setup(Approve, config);
        open_tomorrow(&mut session, &provider).await;

        let snapshot = session.snapshot().await;
        assert!(snapshot.available_slots.iter().all(|s| !s.available));

        let err = session.select_slot(TimeSlot::new(9, 0)).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotUnavailable(_)));
    }

    // ── Expiry ──────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn hold_expires_at_ttl_and_frees_the_slot() {
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(9, 0);
        session.select_slot(slot).await.unwrap();

        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        settle_tasks().await;

        let snapshot = session.snapshot().await;
        assert!(snapshot.held_slot.is_none(), "selection reset on expiry");
        assert_eq!(snapshot.notice, Some(SessionNotice::HoldExpired));
        assert!(
            ledger.is_available(provider.id, tomorrow(), slot, Uuid::new_v4()),
            "slot is bookable by others again"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_after_expiry_reports_hold_expired() {
        let (mut session, _, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        session.select_slot(TimeSlot::new(9, 0)).await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        settle_tasks().await;

        let err = session.confirm().await.unwrap_err();
        assert!(matches!(err, BookingError::HoldExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_notice_clears_on_next_selection() {
        let (mut session, _, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        session.select_slot(TimeSlot::new(9, 0)).await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        settle_tasks().await;
        assert_eq!(
            session.snapshot().await.notice,
            Some(SessionNotice::HoldExpired)
        );

        session.select_slot(TimeSlot::new(9, 15)).await.unwrap();
        assert!(session.snapshot().await.notice.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lazy_expiry_when_countdown_has_not_fired() {
        // Confirm observes an expired deadline itself, without relying
        // on the countdown task having run first.
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(9, 0);
        session.select_slot(slot).await.unwrap();

        // Advance time without yielding to background tasks
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        let err = session.confirm().await.unwrap_err();
        assert!(matches!(err, BookingError::HoldExpired));
        assert!(ledger.is_available(provider.id, tomorrow(), slot, Uuid::new_v4()));
    }

    // ── Confirmation ────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn confirm_emits_record_and_books_the_slot() {
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(15, 30);
        session.select_slot(slot).await.unwrap();

        let record = session.confirm().await.unwrap();
        assert_eq!(record.provider_id, provider.id);
        assert_eq!(record.provider_name, provider.name);
        assert_eq!(record.slot, slot);
        assert_eq!(record.date, tomorrow());
        assert_eq!(record.fee_amount, provider.fee_amount);
        assert_eq!(record.session_started_at, session.started_at());

        // Hold converted into a permanent entry
        let view = ledger.day_view(provider.id, tomorrow());
        assert!(view.booked.contains(&slot));
        assert!(view.holds.is_empty());
        assert!(session.snapshot().await.held_slot.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_without_hold_rejected() {
        let (mut session, _, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let err = session.confirm().await.unwrap_err();
        assert!(matches!(err, BookingError::NoActiveHold));
    }

    #[tokio::test(start_paused = true)]
    async fn double_confirm_yields_one_record_and_one_booking() {
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(15, 30);
        session.select_slot(slot).await.unwrap();

        assert!(session.confirm().await.is_ok());
        let err = session.confirm().await.unwrap_err();
        assert!(matches!(err, BookingError::NoActiveHold));
        assert_eq!(ledger.day_view(provider.id, tomorrow()).booked.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_payment_releases_the_hold() {
        let (mut session, ledger, provider) = setup(Decline, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(9, 0);
        session.select_slot(slot).await.unwrap();

        let err = session.confirm().await.unwrap_err();
        assert!(matches!(err, BookingError::ConfirmationFailed(_)));

        // No reservation is retained across a failed payment
        assert!(session.snapshot().await.held_slot.is_none());
        assert!(ledger.is_available(provider.id, tomorrow(), slot, Uuid::new_v4()));
        assert!(ledger.day_view(provider.id, tomorrow()).booked.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_approval_within_ttl_still_confirms() {
        let (mut session, _, provider) =
            setup(SlowApprove(Duration::from_secs(100)), quiet_config());
        open_tomorrow(&mut session, &provider).await;
        session.select_slot(TimeSlot::new(9, 0)).await.unwrap();

        assert!(session.confirm().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn approval_after_deadline_loses_to_expiry() {
        // Payment takes longer than the TTL: the countdown fires while
        // the payment is in flight and the confirmation must not win.
        let (mut session, ledger, provider) =
            setup(SlowApprove(TTL + Duration::from_secs(100)), quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(9, 0);
        session.select_slot(slot).await.unwrap();

        let err = session.confirm().await.unwrap_err();
        assert!(matches!(err, BookingError::HoldExpired));
        assert!(ledger.day_view(provider.id, tomorrow()).booked.is_empty());
        assert!(ledger.is_available(provider.id, tomorrow(), slot, Uuid::new_v4()));
    }

    // ── Selection changes release the hold ──────────────

    #[tokio::test(start_paused = true)]
    async fn changing_date_releases_the_hold() {
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(9, 0);
        session.select_slot(slot).await.unwrap();

        session.select_date(2).await.unwrap();

        assert!(session.snapshot().await.held_slot.is_none());
        assert!(ledger.is_available(provider.id, tomorrow(), slot, Uuid::new_v4()));
    }

    #[tokio::test(start_paused = true)]
    async fn changing_provider_releases_the_hold() {
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(9, 0);
        session.select_slot(slot).await.unwrap();

        let other_provider = session.directory.list_providers("riverside-general")[1].clone();
        session.select_provider(other_provider.id).await.unwrap();

        assert!(ledger.is_available(provider.id, tomorrow(), slot, Uuid::new_v4()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_releases_hold_and_clears_selection() {
        let (mut session, ledger, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        let slot = TimeSlot::new(9, 0);
        session.select_slot(slot).await.unwrap();

        session.cancel().await;

        let snapshot = session.snapshot().await;
        assert!(snapshot.provider_id.is_none());
        assert!(snapshot.available_slots.is_empty());
        assert!(ledger.is_available(provider.id, tomorrow(), slot, Uuid::new_v4()));
        assert!(ledger.day_view(provider.id, tomorrow()).booked.is_empty());
    }

    // ── External booking generator ──────────────────────

    #[tokio::test(start_paused = true)]
    async fn generator_ingests_on_its_interval() {
        let config = SessionConfig {
            external_booking_interval: Duration::from_secs(8),
            ..quiet_config()
        };
        let (mut session, ledger, provider) = setup(Approve, config);
        open_tomorrow(&mut session, &provider).await;

        tokio::time::advance(Duration::from_secs(8)).await;
        settle_tasks().await;
        assert_eq!(ledger.day_view(provider.id, tomorrow()).booked.len(), 1);

        tokio::time::advance(Duration::from_secs(8)).await;
        settle_tasks().await;
        tokio::time::advance(Duration::from_secs(8)).await;
        settle_tasks().await;
        assert_eq!(ledger.day_view(provider.id, tomorrow()).booked.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn generator_stops_when_session_cancels() {
        let config = SessionConfig {
            external_booking_interval: Duration::from_secs(8),
            ..quiet_config()
        };
        let (mut session, ledger, provider) = setup(Approve, config);
        open_tomorrow(&mut session, &provider).await;
        session.cancel().await;

        tokio::time::advance(Duration::from_secs(80)).await;
        settle_tasks().await;
        assert!(ledger.day_view(provider.id, tomorrow()).booked.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn generator_never_touches_the_held_slot() {
        // Catalog reduced to two slots: hold one, let ingestion drain
        // the rest — the held slot must survive.
        let config = SessionConfig {
            external_booking_interval: Duration::from_secs(8),
            ..quiet_config()
        };
        let directory = Arc::new(StaticDirectory::new(vec![ProviderRecord {
            id: Uuid::new_v4(),
            facility_id: "test".into(),
            name: "Dr. Two Slots".into(),
            specialization: "Testing".into(),
            fee_amount: 100,
            operating_hours: ScheduleConfig::new(
                vec![crate::slots::OperatingBlock::new(
                    TimeSlot::new(9, 0),
                    TimeSlot::new(9, 30),
                )],
                15,
            ),
        }]));
        let provider = directory.list_providers("test")[0].clone();
        let ledger = Arc::new(AvailabilityLedger::new());
        let mut session = BookingSession::new(
            directory,
            Arc::new(Approve),
            Arc::clone(&ledger),
            config,
        );
        open_tomorrow(&mut session, &provider).await;
        let held = TimeSlot::new(9, 0);
        session.select_slot(held).await.unwrap();

        tokio::time::advance(Duration::from_secs(80)).await;
        settle_tasks().await;

        let view = ledger.day_view(provider.id, tomorrow());
        assert!(!view.booked.contains(&held));
        assert!(view.booked.contains(&TimeSlot::new(9, 15)));
        assert_eq!(session.snapshot().await.held_slot, Some(held));
    }

    // ── Snapshot + candidates ───────────────────────────

    #[tokio::test(start_paused = true)]
    async fn snapshot_without_provider_is_empty() {
        let (session, _, _) = setup(Approve, quiet_config());
        let snapshot = session.snapshot().await;
        assert!(snapshot.provider_id.is_none());
        assert!(snapshot.available_slots.is_empty());
        assert!(snapshot.held_slot.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_serializes_for_rendering() {
        let (mut session, _, provider) = setup(Approve, quiet_config());
        open_tomorrow(&mut session, &provider).await;
        session.select_slot(TimeSlot::new(9, 0)).await.unwrap();

        let json = serde_json::to_string(&session.snapshot().await).unwrap();
        assert!(json.contains("\"held_slot\""));
        assert!(json.contains("\"09:00 AM\""));
    }

    #[test]
    fn candidates_apply_cutoff_only_for_today() {
        let catalog = ScheduleConfig::standard_clinical_hours().generate().unwrap();
        let day = DayView::default();
        let session = Uuid::new_v4();
        let now = NaiveTime::from_hms_opt(10, 5, 0).unwrap();

        let today = candidate_slots(&catalog, true, now, &day, session);
        let slots: Vec<TimeSlot> = today.iter().map(|s| s.slot).collect();
        assert!(!slots.contains(&TimeSlot::new(10, 0)), "10:00 AM is past");
        assert!(slots.contains(&TimeSlot::new(10, 15)), "10:15 AM remains");

        let future = candidate_slots(&catalog, false, now, &day, session);
        assert_eq!(future.len(), catalog.len(), "future dates are unfiltered");
    }

    #[test]
    fn candidates_mark_booked_and_foreign_holds_unavailable() {
        let catalog = ScheduleConfig::standard_clinical_hours().generate().unwrap();
        let session = Uuid::new_v4();
        let mut day = DayView::default();
        day.booked.insert(TimeSlot::new(9, 0));
        day.holds.insert(TimeSlot::new(9, 15), Uuid::new_v4());
        day.holds.insert(TimeSlot::new(9, 30), session);

        let now = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let candidates = candidate_slots(&catalog, false, now, &day, session);
        let status =
            |slot: TimeSlot| candidates.iter().find(|s| s.slot == slot).unwrap().available;

        assert!(!status(TimeSlot::new(9, 0)), "booked");
        assert!(!status(TimeSlot::new(9, 15)), "held by another session");
        assert!(status(TimeSlot::new(9, 30)), "own hold stays selectable");
        assert!(status(TimeSlot::new(9, 45)), "untouched slot is free");
    }
}
