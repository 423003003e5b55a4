use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The canonical revenue sources tracked by the dashboard.
///
/// Declaration order is display order. Every aggregate iterates
/// [`ServiceCategory::ALL`] so categories with no data still show up as zero rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "PascalCase")]
pub enum ServiceCategory {
    #[schemars(description = "Resident and business parking authorizations ('Autorizzazioni')")]
    Authorizations,

    #[schemars(description = "Periodic parking subscriptions ('Abbonamenti')")]
    Subscriptions,

    #[schemars(description = "Pay-and-display parking meters ('Parcometri')")]
    ParkingMeters,

    #[schemars(
        description = "App-based payments collected through the parking hub, summed over the EasyPark and MyCicero channels ('Hub Sosta (App)')"
    )]
    HubApp,

    #[schemars(description = "Tap&Park top-up recharges ('Tap&Park (ricariche)')")]
    TapAndPark,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 5] = [
        ServiceCategory::Authorizations,
        ServiceCategory::Subscriptions,
        ServiceCategory::ParkingMeters,
        ServiceCategory::HubApp,
        ServiceCategory::TapAndPark,
    ];

    /// Label used by the reporting tables.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceCategory::Authorizations => "Autorizzazioni",
            ServiceCategory::Subscriptions => "Abbonamenti",
            ServiceCategory::ParkingMeters => "Parcometri",
            ServiceCategory::HubApp => "Hub Sosta (App)",
            ServiceCategory::TapAndPark => "Tap&Park (ricariche)",
        }
    }

    pub fn aggregate(&self) -> AggregateCategory {
        match self {
            ServiceCategory::Authorizations => AggregateCategory::Authorizations,
            ServiceCategory::Subscriptions => AggregateCategory::Subscriptions,
            ServiceCategory::ParkingMeters
            | ServiceCategory::HubApp
            | ServiceCategory::TapAndPark => AggregateCategory::OccasionalParking,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Coarser partition layered over [`ServiceCategory`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "PascalCase")]
pub enum AggregateCategory {
    Authorizations,
    Subscriptions,
    /// Parking meters, app payments and Tap&Park recharges.
    OccasionalParking,
}

impl AggregateCategory {
    pub const ALL: [AggregateCategory; 3] = [
        AggregateCategory::Authorizations,
        AggregateCategory::Subscriptions,
        AggregateCategory::OccasionalParking,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AggregateCategory::Authorizations => "Autorizzazioni",
            AggregateCategory::Subscriptions => "Abbonamenti",
            AggregateCategory::OccasionalParking => "Sosta Occasionale",
        }
    }

    pub fn services(&self) -> impl Iterator<Item = ServiceCategory> + '_ {
        ServiceCategory::ALL
            .into_iter()
            .filter(move |s| s.aggregate() == *self)
    }
}

impl fmt::Display for AggregateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordOrigin {
    /// Read from a source table
    Sourced { source_id: String },
    /// Fixed manual correction for a known capture gap
    Backfill,
    /// Synthetic share of the proportional leap-year correction
    LeapYearCorrection,
}

impl RecordOrigin {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, RecordOrigin::LeapYearCorrection)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub year: i32,
    /// 1-based calendar month
    pub month: u32,
    pub service: ServiceCategory,
    pub amount: f64,
    /// `None` when the source schema does not track titles.
    pub title_count: Option<u64>,
    pub entry_timestamp: NaiveDateTime,
    pub origin: RecordOrigin,
}

impl CanonicalRecord {
    /// Title contribution to aggregates; untracked counts contribute nothing.
    pub fn titles(&self) -> u64 {
        self.title_count.unwrap_or(0)
    }

    pub fn is_in(&self, year: i32, month: u32) -> bool {
        self.year == year && self.month == month
    }
}
