//! Provider directory — the external catalog of bookable specialists.
//!
//! The engine only needs lookups; where the records come from (a real
//! facility backend, a fixture set) is behind the `ProviderDirectory`
//! trait. `StaticDirectory` is the in-memory implementation used by the
//! demo binary and tests.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::slots::ScheduleConfig;

// ═══════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════

/// One bookable specialist at a facility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: Uuid,
    pub facility_id: String,
    pub name: String,
    pub specialization: String,
    /// Consultation fee in the smallest currency unit.
    pub fee_amount: u32,
    pub operating_hours: ScheduleConfig,
}

// ═══════════════════════════════════════════════════════════
// Directory interface
// ═══════════════════════════════════════════════════════════

/// Read-only access to provider records.
pub trait ProviderDirectory: Send + Sync {
    /// All providers practicing at a facility, in directory order.
    fn list_providers(&self, facility_id: &str) -> Vec<ProviderRecord>;

    /// Look up one provider by id.
    fn find(&self, provider_id: Uuid) -> Option<ProviderRecord>;
}

// ═══════════════════════════════════════════════════════════
// StaticDirectory
// ═══════════════════════════════════════════════════════════

/// In-memory directory over a fixed set of records.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    providers: Vec<ProviderRecord>,
}

impl StaticDirectory {
    pub fn new(providers: Vec<ProviderRecord>) -> Self {
        Self { providers }
    }

    /// Small fixture catalog for the demo binary: two facilities, three
    /// specialists, all on standard clinical hours.
    pub fn sample() -> Self {
        let hours = ScheduleConfig::standard_clinical_hours;
        Self::new(vec![
            ProviderRecord {
                id: Uuid::new_v4(),
                facility_id: "riverside-general".into(),
                name: "Dr. Asha Pillai".into(),
                specialization: "Cardiologist".into(),
                fee_amount: 1200,
                operating_hours: hours(),
            },
            ProviderRecord {
                id: Uuid::new_v4(),
                facility_id: "riverside-general".into(),
                name: "Dr. Tomas Keller".into(),
                specialization: "Neurologist".into(),
                fee_amount: 1500,
                operating_hours: hours(),
            },
            ProviderRecord {
                id: Uuid::new_v4(),
                facility_id: "lakeview-clinic".into(),
                name: "Dr. Maria Ortiz".into(),
                specialization: "Internal Medicine".into(),
                fee_amount: 800,
                operating_hours: hours(),
            },
        ])
    }
}

impl ProviderDirectory for StaticDirectory {
    fn list_providers(&self, facility_id: &str) -> Vec<ProviderRecord> {
        self.providers
            .iter()
            .filter(|p| p.facility_id == facility_id)
            .cloned()
            .collect()
    }

    fn find(&self, provider_id: Uuid) -> Option<ProviderRecord> {
        self.providers.iter().find(|p| p.id == provider_id).cloned()
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
