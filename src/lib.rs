//! Slotline — appointment slot reservation engine.
//!
//! Generates per-provider slot catalogs, tracks shared availability
//! under concurrent external bookings, grants TTL-bound exclusive holds,
//! and drives the selection-to-confirmation booking flow.

pub mod directory; // provider catalog behind a trait
pub mod hold; // TTL-bound exclusive claim
pub mod ledger; // shared availability state
pub mod payment; // opaque confirmation collaborator
pub mod session; // booking flow orchestration
pub mod slots; // catalog generation + cutoff

use tracing_subscriber::EnvFilter;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "slotline=info";

/// Initialize tracing for binaries. `RUST_LOG` overrides the default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();
}
