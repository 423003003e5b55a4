use crate::error::{Result, RevenueError};
use crate::schema::ServiceCategory;
use crate::utils::validate_month;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A fixed, audited revenue entry appended to every load to cover a month the
/// source system failed to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BackfillEntry {
    pub year: i32,

    #[schemars(description = "Calendar month (1-12) the backfill is attributed to")]
    pub month: u32,

    pub service: ServiceCategory,

    #[schemars(description = "Amount to add for the month. Always counted as one title.")]
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LeapYearCorrectionConfig {
    #[schemars(description = "Year of the reference month whose revenue split drives the allocation")]
    pub year: i32,

    #[schemars(description = "Reference month (1-12)")]
    pub month: u32,

    #[schemars(
        description = "Total correction to distribute across services. Negative values remove revenue."
    )]
    pub total: f64,
}

/// Inclusive range of calendar months shown in the monthly comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MonthWindow {
    pub first: u32,
    pub last: u32,
}

impl MonthWindow {
    pub fn contains(&self, month: u32) -> bool {
        (self.first..=self.last).contains(&month)
    }

    pub fn months(&self) -> impl Iterator<Item = u32> {
        self.first..=self.last
    }
}

impl Default for MonthWindow {
    fn default() -> Self {
        // First-half-year reporting
        Self { first: 1, last: 6 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    #[schemars(
        description = "Maps the service token found in a sheet or file name to its canonical service. Tokens are matched exactly after trimming."
    )]
    pub service_vocabulary: BTreeMap<String, ServiceCategory>,

    #[serde(default)]
    pub backfills: Vec<BackfillEntry>,

    #[serde(default)]
    pub leap_year_correction: Option<LeapYearCorrectionConfig>,

    #[serde(default)]
    pub display_months: MonthWindow,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let service_vocabulary = [
            ("AUTORIZZAZIONI 1SEM", ServiceCategory::Authorizations),
            ("ABBONAMENTI 1SEM", ServiceCategory::Subscriptions),
            ("PARCOMETRI 1SEM", ServiceCategory::ParkingMeters),
            ("HUB_SOSTA 1SEM", ServiceCategory::HubApp),
            ("TAP&PARK 1SEM", ServiceCategory::TapAndPark),
            ("Autorizzazioni", ServiceCategory::Authorizations),
            ("Abbonamenti", ServiceCategory::Subscriptions),
            ("Parcometro", ServiceCategory::ParkingMeters),
            ("ParkingHUB", ServiceCategory::HubApp),
            ("Tap&Park", ServiceCategory::TapAndPark),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let backfills = (1..=3)
            .map(|month| BackfillEntry {
                year: 2024,
                month,
                service: ServiceCategory::HubApp,
                amount: 3130.5,
            })
            .collect();

        Self {
            service_vocabulary,
            backfills,
            leap_year_correction: Some(LeapYearCorrectionConfig {
                year: 2024,
                month: 2,
                total: -1350.84,
            }),
            display_months: MonthWindow::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_vocabulary.is_empty() {
            return Err(RevenueError::InvalidConfig(
                "service vocabulary is empty".to_string(),
            ));
        }

        for entry in &self.backfills {
            validate_month(entry.month)?;
        }

        if let Some(correction) = &self.leap_year_correction {
            validate_month(correction.month)?;
        }

        validate_month(self.display_months.first)?;
        validate_month(self.display_months.last)?;
        if self.display_months.first > self.display_months.last {
            return Err(RevenueError::InvalidConfig(format!(
                "display window starts at month {} after it ends at month {}",
                self.display_months.first, self.display_months.last
            )));
        }

        Ok(())
    }

    pub fn resolve_service(&self, token: &str) -> Option<ServiceCategory> {
        self.service_vocabulary.get(token.trim()).copied()
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PipelineConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backfills.len(), 3);
        assert!(config
            .backfills
            .iter()
            .all(|b| b.service == ServiceCategory::HubApp && b.amount == 3130.5));
        assert_eq!(
            config.resolve_service("HUB_SOSTA 1SEM"),
            Some(ServiceCategory::HubApp)
        );
        assert_eq!(
            config.resolve_service(" Parcometro "),
            Some(ServiceCategory::ParkingMeters)
        );
        assert_eq!(config.resolve_service("Sanzioni"), None);
    }

    #[test]
    fn test_json_round_trip_keeps_correction() {
        let json = serde_json::to_string(&PipelineConfig::default()).unwrap();
        let parsed = PipelineConfig::from_json_str(&json).unwrap();
        let correction = parsed.leap_year_correction.unwrap();
        assert_eq!((correction.year, correction.month), (2024, 2));
        assert!((correction.total + 1350.84).abs() < 1e-9);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{ "service_vocabulary": { "Abbonamenti": "Subscriptions" } }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        assert!(config.backfills.is_empty());
        assert!(config.leap_year_correction.is_none());
        assert_eq!(config.display_months, MonthWindow { first: 1, last: 6 });
    }

    #[test]
    fn test_invalid_months_rejected() {
        let mut config = PipelineConfig::default();
        config.display_months = MonthWindow { first: 7, last: 3 };
        assert!(matches!(
            config.validate(),
            Err(RevenueError::InvalidConfig(_))
        ));

        let mut config = PipelineConfig::default();
        config.backfills[0].month = 13;
        assert!(matches!(config.validate(), Err(RevenueError::InvalidMonth(13))));
    }

    #[test]
    fn test_schema_generation() {
        let schema = PipelineConfig::schema_as_json().unwrap();
        assert!(schema.contains("service_vocabulary"));
        assert!(schema.contains("leap_year_correction"));
    }
}
