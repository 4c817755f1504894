//! Demo driver: runs one booking flow end to end against the simulated
//! gateway and prints the resulting record.

use std::sync::Arc;

use slotline::directory::{ProviderDirectory, StaticDirectory};
use slotline::ledger::AvailabilityLedger;
use slotline::payment::{GatewayConfig, SimulatedGateway};
use slotline::session::{BookingError, BookingSession, SessionConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    slotline::init_tracing();

    let directory = Arc::new(StaticDirectory::sample());
    let ledger = Arc::new(AvailabilityLedger::new());
    let payment = Arc::new(SimulatedGateway::new(GatewayConfig::default()));

    let providers = directory.list_providers("riverside-general");
    let provider = providers
        .first()
        .ok_or("no providers at riverside-general")?;
    tracing::info!(
        name = %provider.name,
        specialization = %provider.specialization,
        fee = provider.fee_amount,
        "booking with"
    );

    let mut session = BookingSession::new(
        Arc::clone(&directory),
        payment,
        ledger,
        SessionConfig::default(),
    );
    session.select_provider(provider.id).await?;
    session.select_date(1).await?;

    // Walk the day's candidates until a confirmation sticks. A slot can
    // vanish between snapshot and selection, and the gateway can
    // decline; both just move on to the next candidate.
    let candidates = session.snapshot().await.available_slots;
    for candidate in candidates.into_iter().filter(|c| c.available) {
        match session.select_slot(candidate.slot).await {
            Ok(()) => {}
            Err(BookingError::SlotUnavailable(slot)) => {
                tracing::info!(%slot, "slot taken in the meantime, trying the next");
                continue;
            }
            Err(err) => return Err(err.into()),
        }
        tracing::info!(slot = %candidate.display, "slot locked, confirming");

        match session.confirm().await {
            Ok(record) => {
                println!("{}", serde_json::to_string_pretty(&record)?);
                return Ok(());
            }
            Err(BookingError::ConfirmationFailed(reason)) => {
                tracing::warn!(%reason, "payment failed, trying the next slot");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err("no slot could be booked".into())
}
