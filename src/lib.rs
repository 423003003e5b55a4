//! # Parking Revenue
//!
//! A library for turning heterogeneous parking revenue exports into a single
//! reconciled monthly table, plus the year-over-year views built on top of it.
//!
//! ## Core Concepts
//!
//! - **Sources**: Sheets or CSV files named either `{YYYY}_{SERVICE}` (one row per
//!   transaction) or `Riepilogo_{SERVICE}_Mensile` (one row per month)
//! - **Canonical Records**: `(year, month, service, amount, titles)` rows over a
//!   fixed, ordered set of service categories
//! - **Backfills**: Audited fixed entries appended to every load
//! - **Leap-Year Correction**: A synthetic adjustment spread across services in
//!   proportion to their revenue in a reference month, included only on request
//! - **Views**: Comparison tables whose TOTAL rows always resum their group rows
//!
//! ## Example
//!
//! ```rust,ignore
//! use parking_revenue::*;
//!
//! let tables = read_csv_sources(&["data/Riepilogo_Abbonamenti_Mensile.csv"])?;
//! let config = PipelineConfig::default();
//!
//! let table = process_revenue_sources(&tables, &config)?;
//! let view = table.view(CorrectionMode::Included);
//!
//! let revenue = compare_services(view, 2024, 2025, Metric::Amount);
//! for row in revenue.all_rows() {
//!     println!("{}: {:.2} -> {:.2} ({:+.2}%)", row.label, row.base, row.current, row.percent_change);
//! }
//! ```

pub mod aggregates;
pub mod annotations;
pub mod cache;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod normalizer;
pub mod reconciler;
pub mod schema;
pub mod utils;

pub use aggregates::{
    compare_categories, compare_months, compare_profitability, compare_services, grand_total,
    month_name, monthly_service_pivot, year_breakdown, ComparisonRow, ComparisonTable, Metric,
    MonthServiceRow, ServiceFilter, ServiceShare, ServiceYearTotals, Totals, YearBreakdown,
    TOTAL_LABEL,
};
pub use annotations::{
    AnnotationSession, AnnotationStore, Annotations, CsvSheetStore, MemoryStore, NoteRow,
};
pub use cache::{InputFingerprint, LoadCache};
pub use config::{BackfillEntry, LeapYearCorrectionConfig, MonthWindow, PipelineConfig};
pub use error::{Result, RevenueError};
pub use ingestion::{parse_source_id, CellValue, RawTable, SourceContext, SourceLayout};
pub use normalizer::{load_sources, normalize_table, AmountRule, LoadOutcome, LoadWarning};
pub use reconciler::{CanonicalTable, CorrectionMode, Reconciler, TableView};
pub use schema::*;

use log::{debug, info};
use std::path::Path;

pub struct RevenuePipeline;

impl RevenuePipeline {
    pub fn process(tables: &[RawTable], config: &PipelineConfig) -> Result<CanonicalTable> {
        config.validate()?;

        info!("Processing {} revenue source(s)", tables.len());
        debug!(
            "Configuration has {} vocabulary key(s), {} backfill(s), correction {}",
            config.service_vocabulary.len(),
            config.backfills.len(),
            if config.leap_year_correction.is_some() {
                "configured"
            } else {
                "disabled"
            }
        );

        let outcome = load_sources(tables, config)?;
        let table = Reconciler::new(config).reconcile(outcome)?;

        if !table.warnings().is_empty() {
            info!(
                "Load finished with {} warning(s)",
                table.warnings().len()
            );
        }

        Ok(table)
    }

    pub fn process_with_verification(
        tables: &[RawTable],
        config: &PipelineConfig,
        tolerance: f64,
    ) -> Result<CanonicalTable> {
        let table = Self::process(tables, config)?;

        verify_reconciliation(&table, config, tolerance)?;

        Ok(table)
    }

    /// Like [`RevenuePipeline::process`], but reuses a table already built from
    /// identical inputs.
    pub fn process_cached(
        cache: &mut LoadCache,
        tables: &[RawTable],
        config: &PipelineConfig,
    ) -> Result<std::sync::Arc<CanonicalTable>> {
        cache.get_or_load(tables, config, Self::process)
    }
}

pub fn process_revenue_sources(
    tables: &[RawTable],
    config: &PipelineConfig,
) -> Result<CanonicalTable> {
    RevenuePipeline::process(tables, config)
}

pub fn process_with_verification(
    tables: &[RawTable],
    config: &PipelineConfig,
    tolerance: f64,
) -> Result<CanonicalTable> {
    RevenuePipeline::process_with_verification(tables, config, tolerance)
}

/// Reads CSV exports; each file name is used as its source identifier.
pub fn read_csv_sources<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<RawTable>> {
    paths.iter().map(RawTable::from_csv_path).collect()
}

/// Checks that per-service-per-year totals resum to the grand total in both
/// correction modes, and that the correction adds exactly the configured amount.
pub fn verify_reconciliation(
    table: &CanonicalTable,
    config: &PipelineConfig,
    tolerance: f64,
) -> Result<()> {
    for mode in [CorrectionMode::Excluded, CorrectionMode::Included] {
        let view = table.view(mode);
        let per_service = ServiceYearTotals::compute_all_years(view);
        let resummed: f64 = per_service
            .years
            .iter()
            .map(|year| per_service.year_total(*year).amount)
            .sum();
        let direct = grand_total(view).amount;

        if (resummed - direct).abs() > tolerance {
            return Err(RevenueError::VerificationFailed(format!(
                "{:?} view: service totals sum to {:.2} but records sum to {:.2}",
                mode, resummed, direct
            )));
        }
    }

    if let Some(settings) = &config.leap_year_correction {
        if !table.correction_records().is_empty()
            && (table.correction_total() - settings.total).abs() > tolerance
        {
            return Err(RevenueError::VerificationFailed(format!(
                "correction records sum to {:.2}, expected {:.2}",
                table.correction_total(),
                settings.total
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn year_sheet(source_id: &str, rows: &[(&str, f64)]) -> RawTable {
        RawTable::new(
            source_id,
            vec![
                "DATA_ORA_INSERIMENTO".to_string(),
                "Targa".to_string(),
                "Importo".to_string(),
            ],
            rows.iter()
                .map(|(ts, amount)| {
                    vec![
                        CellValue::from(*ts),
                        CellValue::from("AB123CD"),
                        CellValue::Number(*amount),
                    ]
                })
                .collect(),
        )
    }

    #[test]
    fn test_end_to_end_processing() {
        let tables = vec![
            year_sheet(
                "2024_ABBONAMENTI 1SEM",
                &[("2024-01-15 10:00:00", 100.0), ("2024-02-10 09:30:00", 50.0)],
            ),
            year_sheet("2025_ABBONAMENTI 1SEM", &[("2025-01-20 08:00:00", 120.0)]),
        ];
        let config = PipelineConfig {
            backfills: Vec::new(),
            ..PipelineConfig::default()
        };

        let table = process_revenue_sources(&tables, &config).unwrap();
        assert_eq!(table.base_records().len(), 3);
        assert!(table.warnings().is_empty());

        let view = table.view(CorrectionMode::Excluded);
        let comparison = compare_services(view, 2024, 2025, Metric::Amount);
        let subs = comparison.row("Abbonamenti").unwrap();
        assert_eq!((subs.base, subs.current), (150.0, 120.0));
        assert!((subs.percent_change + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_config_rejected_before_loading() {
        let config = PipelineConfig {
            display_months: MonthWindow { first: 0, last: 6 },
            ..PipelineConfig::default()
        };
        let result = process_revenue_sources(&[], &config);
        assert!(matches!(result, Err(RevenueError::InvalidMonth(0))));
    }

    #[test]
    fn test_no_sources_is_fatal() {
        let tables = vec![year_sheet("Foglio1", &[("2024-01-15 10:00:00", 1.0)])];
        let result = process_revenue_sources(&tables, &PipelineConfig::default());
        assert!(matches!(result, Err(RevenueError::NoSources(1))));
    }

    #[test]
    fn test_process_with_verification() {
        let tables = vec![year_sheet(
            "2024_PARCOMETRI 1SEM",
            &[("2024-02-01 12:00:00", 2000.0), ("2024-03-01 12:00:00", 500.0)],
        )];
        let table = process_with_verification(&tables, &PipelineConfig::default(), 0.01).unwrap();
        assert!((table.correction_total() + 1350.84).abs() < 1e-9);
    }

    #[test]
    fn test_process_cached_reuses_table() {
        let tables = vec![year_sheet(
            "2024_ABBONAMENTI 1SEM",
            &[("2024-01-15 10:00:00", 100.0)],
        )];
        let config = PipelineConfig::default();
        let mut cache = LoadCache::new();

        let first = RevenuePipeline::process_cached(&mut cache, &tables, &config).unwrap();
        let second = RevenuePipeline::process_cached(&mut cache, &tables, &config).unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }
}
