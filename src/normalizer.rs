use crate::config::PipelineConfig;
use crate::error::{Result, RevenueError};
use crate::ingestion::{parse_source_id, RawTable, SourceLayout};
use crate::schema::{CanonicalRecord, RecordOrigin, ServiceCategory};
use crate::utils::{first_of_month, parse_period};
use chrono::Datelike;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub const TIMESTAMP_COLUMN: &str = "DATA_ORA_INSERIMENTO";
pub const PERIOD_COLUMN: &str = "Mese";
pub const TITLE_COLUMNS: &[&str] = &["Numero Titoli", "Numero Transazioni"];

const DEFAULT_AMOUNT_RULE: AmountRule = AmountRule::NamedColumn {
    contains: "Importo",
    fallback_index: 2,
};

/// How the monetary total of a row is read for a given service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountRule {
    /// Sum of two payment-channel columns, each coerced to zero on its own.
    ChannelSum([&'static str; 2]),
    /// First header containing `contains`, else the column at `fallback_index`.
    NamedColumn {
        contains: &'static str,
        fallback_index: usize,
    },
}

impl AmountRule {
    pub fn for_service(service: ServiceCategory) -> Self {
        match service {
            ServiceCategory::HubApp => AmountRule::ChannelSum(["EasyPark", "MyCicero"]),
            ServiceCategory::Authorizations
            | ServiceCategory::Subscriptions
            | ServiceCategory::ParkingMeters
            | ServiceCategory::TapAndPark => DEFAULT_AMOUNT_RULE,
        }
    }

    fn resolve(&self, table: &RawTable) -> Result<AmountColumns> {
        match *self {
            AmountRule::ChannelSum([first, second]) => {
                let first = table.column_index(first);
                let second = table.column_index(second);
                if first.is_none() && second.is_none() {
                    debug!(
                        "'{}' has no payment-channel columns, using the amount column",
                        table.source_id
                    );
                    return DEFAULT_AMOUNT_RULE.resolve(table);
                }
                Ok(AmountColumns::Channels(first, second))
            }
            AmountRule::NamedColumn {
                contains,
                fallback_index,
            } => {
                if let Some(idx) = table.find_column(|h| h.contains(contains)) {
                    return Ok(AmountColumns::Single(idx));
                }
                if fallback_index < table.column_count() {
                    return Ok(AmountColumns::Single(fallback_index));
                }
                Err(RevenueError::schema(
                    &table.source_id,
                    format!(
                        "no column containing '{}' and no column at position {}",
                        contains, fallback_index
                    ),
                ))
            }
        }
    }
}

enum AmountColumns {
    Channels(Option<usize>, Option<usize>),
    Single(usize),
}

impl AmountColumns {
    fn amount(&self, table: &RawTable, row: usize) -> f64 {
        let read = |col: Option<usize>| col.map(|c| table.cell(row, c).as_amount()).unwrap_or(0.0);
        match *self {
            AmountColumns::Channels(first, second) => read(first) + read(second),
            AmountColumns::Single(col) => read(Some(col)),
        }
    }
}

/// Records produced from one source table.
#[derive(Debug, Clone)]
pub struct NormalizedSource {
    pub source_id: String,
    pub service: ServiceCategory,
    pub records: Vec<CanonicalRecord>,
    /// Rows skipped because their period could not be read.
    pub dropped_rows: usize,
}

/// Normalizes a single source table into canonical records.
pub fn normalize_table(table: &RawTable, config: &PipelineConfig) -> Result<NormalizedSource> {
    let context =
        parse_source_id(&table.source_id).ok_or_else(|| RevenueError::UnrecognizedSource {
            source_id: table.source_id.clone(),
            details: "name matches neither '{YYYY}_{SERVICE}' nor 'Riepilogo_{SERVICE}_Mensile'"
                .to_string(),
        })?;

    let service = config.resolve_service(&context.service_token).ok_or_else(|| {
        RevenueError::UnrecognizedSource {
            source_id: table.source_id.clone(),
            details: format!("unknown service '{}'", context.service_token),
        }
    })?;

    let amounts = AmountRule::for_service(service).resolve(table)?;

    let (records, dropped_rows) = match context.layout {
        SourceLayout::YearSheet { year } => normalize_year_sheet(table, service, year, &amounts)?,
        SourceLayout::MonthlyReport => normalize_monthly_report(table, service, &amounts)?,
    };

    if !table.rows.is_empty() && records.is_empty() {
        return Err(RevenueError::schema(
            &table.source_id,
            "no row has a readable period",
        ));
    }

    debug!(
        "Normalized '{}' as {}: {} records, {} rows dropped",
        table.source_id,
        service,
        records.len(),
        dropped_rows
    );

    Ok(NormalizedSource {
        source_id: table.source_id.clone(),
        service,
        records,
        dropped_rows,
    })
}

fn required_column(table: &RawTable, name: &str) -> Result<usize> {
    table.column_index(name).ok_or_else(|| {
        RevenueError::schema(&table.source_id, format!("missing '{}' column", name))
    })
}

fn title_column(table: &RawTable) -> Option<usize> {
    TITLE_COLUMNS
        .iter()
        .find_map(|name| table.column_index(name))
}

/// Non-numeric and negative counts read as zero.
fn read_title_count(table: &RawTable, row: usize, col: usize) -> u64 {
    let count = table.cell(row, col).as_amount();
    if count > 0.0 {
        count.round() as u64
    } else {
        0
    }
}

fn normalize_year_sheet(
    table: &RawTable,
    service: ServiceCategory,
    year: i32,
    amounts: &AmountColumns,
) -> Result<(Vec<CanonicalRecord>, usize)> {
    let ts_col = required_column(table, TIMESTAMP_COLUMN)?;
    let title_col = title_column(table);

    let mut records = Vec::with_capacity(table.rows.len());
    let mut dropped = 0;

    for row in 0..table.rows.len() {
        let Some(timestamp) = table.cell(row, ts_col).as_timestamp() else {
            dropped += 1;
            continue;
        };

        records.push(CanonicalRecord {
            year,
            month: timestamp.month(),
            service,
            amount: amounts.amount(table, row),
            // Without a count column one row is one title
            title_count: Some(title_col.map_or(1, |col| read_title_count(table, row, col))),
            entry_timestamp: timestamp,
            origin: RecordOrigin::Sourced {
                source_id: table.source_id.clone(),
            },
        });
    }

    Ok((records, dropped))
}

fn normalize_monthly_report(
    table: &RawTable,
    service: ServiceCategory,
    amounts: &AmountColumns,
) -> Result<(Vec<CanonicalRecord>, usize)> {
    let period_col = required_column(table, PERIOD_COLUMN)?;
    let title_col = title_column(table);

    let mut records = Vec::with_capacity(table.rows.len());
    let mut dropped = 0;

    for row in 0..table.rows.len() {
        let period = table
            .cell(row, period_col)
            .as_text()
            .and_then(|raw| parse_period(&raw));
        let Some(((year, month), timestamp)) =
            period.and_then(|(y, m)| first_of_month(y, m).map(|ts| ((y, m), ts)))
        else {
            dropped += 1;
            continue;
        };

        let title_count = title_col.map(|col| read_title_count(table, row, col));

        records.push(CanonicalRecord {
            year,
            month,
            service,
            amount: amounts.amount(table, row),
            title_count,
            entry_timestamp: timestamp,
            origin: RecordOrigin::Sourced {
                source_id: table.source_id.clone(),
            },
        });
    }

    Ok((records, dropped))
}

/// A non-fatal problem met while loading, surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadWarning {
    pub source_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub records: Vec<CanonicalRecord>,
    pub warnings: Vec<LoadWarning>,
    pub sources_loaded: usize,
}

/// Normalizes every table, skipping the ones that cannot be read.
///
/// Fails only when not a single table could be used.
pub fn load_sources(tables: &[RawTable], config: &PipelineConfig) -> Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();

    for table in tables {
        match normalize_table(table, config) {
            Ok(source) => {
                if source.dropped_rows > 0 {
                    let message = format!(
                        "{} row(s) dropped: period could not be parsed",
                        source.dropped_rows
                    );
                    warn!("Source '{}': {}", source.source_id, message);
                    outcome.warnings.push(LoadWarning {
                        source_id: source.source_id.clone(),
                        message,
                    });
                }
                outcome.records.extend(source.records);
                outcome.sources_loaded += 1;
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping source '{}': {}", table.source_id, e);
                outcome.warnings.push(LoadWarning {
                    source_id: table.source_id.clone(),
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    if outcome.sources_loaded == 0 {
        return Err(RevenueError::NoSources(tables.len()));
    }

    Ok(outcome)
}
