use crate::config::{LeapYearCorrectionConfig, PipelineConfig};
use crate::error::Result;
use crate::normalizer::{LoadOutcome, LoadWarning};
use crate::schema::{CanonicalRecord, RecordOrigin, ServiceCategory};
use crate::utils::end_of_month_timestamp;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a view includes the synthetic leap-year correction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrectionMode {
    #[default]
    Excluded,
    Included,
}

impl From<bool> for CorrectionMode {
    fn from(include: bool) -> Self {
        if include {
            CorrectionMode::Included
        } else {
            CorrectionMode::Excluded
        }
    }
}

/// The merged result of a load: sourced records plus backfills, with the
/// leap-year correction kept apart until a view asks for it.
#[derive(Debug, Clone, Default)]
pub struct CanonicalTable {
    records: Vec<CanonicalRecord>,
    correction: Vec<CanonicalRecord>,
    warnings: Vec<LoadWarning>,
}

impl CanonicalTable {
    pub fn base_records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn correction_records(&self) -> &[CanonicalRecord] {
        &self.correction
    }

    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    pub fn view(&self, mode: CorrectionMode) -> TableView<'_> {
        let correction: &[CanonicalRecord] = match mode {
            CorrectionMode::Excluded => &[],
            CorrectionMode::Included => &self.correction,
        };
        TableView {
            base: &self.records,
            correction,
        }
    }

    /// Sum of the correction records, i.e. the exact difference between an
    /// included and an excluded view.
    pub fn correction_total(&self) -> f64 {
        self.correction.iter().map(|r| r.amount).sum()
    }
}

/// Read-only window over a [`CanonicalTable`].
#[derive(Debug, Clone, Copy)]
pub struct TableView<'a> {
    base: &'a [CanonicalRecord],
    correction: &'a [CanonicalRecord],
}

impl<'a> TableView<'a> {
    pub fn from_records(records: &'a [CanonicalRecord]) -> Self {
        Self {
            base: records,
            correction: &[],
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &'a CanonicalRecord> + 'a {
        let (base, correction) = (self.base, self.correction);
        base.iter().chain(correction.iter())
    }

    pub fn len(&self) -> usize {
        self.base.len() + self.correction.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct years present, ascending.
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.records().map(|r| r.year).collect();
        years.sort_unstable();
        years.dedup();
        years
    }

    /// Services present in the data, in canonical order.
    pub fn services(&self) -> Vec<ServiceCategory> {
        ServiceCategory::ALL
            .into_iter()
            .filter(|s| self.records().any(|r| r.service == *s))
            .collect()
    }
}

pub struct Reconciler<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn reconcile(&self, outcome: LoadOutcome) -> Result<CanonicalTable> {
        let LoadOutcome {
            mut records,
            warnings,
            sources_loaded,
        } = outcome;

        let backfills = self.backfill_records()?;
        debug!("Appending {} backfill record(s)", backfills.len());
        records.extend(backfills);

        let correction = match &self.config.leap_year_correction {
            Some(settings) => proportional_correction(&records, settings)?,
            None => Vec::new(),
        };

        info!(
            "Reconciled {} record(s) from {} source(s); {} correction record(s) available",
            records.len(),
            sources_loaded,
            correction.len()
        );

        Ok(CanonicalTable {
            records,
            correction,
            warnings,
        })
    }

    /// The configured backfills; each one counts as a single real title.
    pub fn backfill_records(&self) -> Result<Vec<CanonicalRecord>> {
        self.config
            .backfills
            .iter()
            .map(|entry| {
                Ok(CanonicalRecord {
                    year: entry.year,
                    month: entry.month,
                    service: entry.service,
                    amount: entry.amount,
                    title_count: Some(1),
                    entry_timestamp: end_of_month_timestamp(entry.year, entry.month)?,
                    origin: RecordOrigin::Backfill,
                })
            })
            .collect()
    }
}

/// Spreads `settings.total` over the services of the reference month in
/// proportion to their revenue there.
///
/// Returns no records when the reference month's revenue is not positive.
/// Generated records carry zero titles.
pub fn proportional_correction(
    records: &[CanonicalRecord],
    settings: &LeapYearCorrectionConfig,
) -> Result<Vec<CanonicalRecord>> {
    let timestamp = end_of_month_timestamp(settings.year, settings.month)?;

    let mut per_service: BTreeMap<ServiceCategory, f64> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.is_in(settings.year, settings.month))
    {
        *per_service.entry(record.service).or_default() += record.amount;
    }

    let month_total: f64 = per_service.values().sum();
    if month_total <= 0.0 {
        debug!(
            "No leap-year correction: {}-{:02} revenue is {}",
            settings.year, settings.month, month_total
        );
        return Ok(Vec::new());
    }

    Ok(per_service
        .into_iter()
        .map(|(service, amount)| CanonicalRecord {
            year: settings.year,
            month: settings.month,
            service,
            amount: settings.total * (amount / month_total),
            title_count: Some(0),
            entry_timestamp: timestamp,
            origin: RecordOrigin::LeapYearCorrection,
        })
        .collect())
}
