//! Read-only views over a reconciled table.
//!
//! Every view is a pure function of a [`TableView`]. Totals rows are always the
//! sum of the group rows shown above them, so a rendered table reconciles with
//! its own breakdown.

use crate::config::MonthWindow;
use crate::reconciler::TableView;
use crate::schema::{AggregateCategory, CanonicalRecord, ServiceCategory};
use crate::utils::{percent_change, ratio_or_zero, share_percent};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const TOTAL_LABEL: &str = "TOTALE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    Amount,
    Titles,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Amount => "Incasso Totale",
            Metric::Titles => "Numero Titoli",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub amount: f64,
    pub titles: u64,
}

impl Totals {
    pub fn add_record(&mut self, record: &CanonicalRecord) {
        self.amount += record.amount;
        self.titles += record.titles();
    }

    pub fn add(&mut self, other: &Totals) {
        self.amount += other.amount;
        self.titles += other.titles;
    }

    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Amount => self.amount,
            Metric::Titles => self.titles as f64,
        }
    }

    /// Average revenue per title, zero when no titles were recorded.
    pub fn profitability(&self) -> f64 {
        ratio_or_zero(self.amount, self.titles as f64)
    }
}

impl FromIterator<Totals> for Totals {
    fn from_iter<I: IntoIterator<Item = Totals>>(iter: I) -> Self {
        let mut sum = Totals::default();
        for t in iter {
            sum.add(&t);
        }
        sum
    }
}

impl<'a> FromIterator<&'a Totals> for Totals {
    fn from_iter<I: IntoIterator<Item = &'a Totals>>(iter: I) -> Self {
        let mut sum = Totals::default();
        for t in iter {
            sum.add(t);
        }
        sum
    }
}

/// Direct resummation of every record in the view.
pub fn grand_total(view: TableView<'_>) -> Totals {
    let mut totals = Totals::default();
    for record in view.records() {
        totals.add_record(record);
    }
    totals
}

/// Which records a monthly comparison looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceFilter {
    All,
    Category(AggregateCategory),
    Service(ServiceCategory),
}

impl ServiceFilter {
    pub fn matches(&self, service: ServiceCategory) -> bool {
        match self {
            ServiceFilter::All => true,
            ServiceFilter::Category(category) => service.aggregate() == *category,
            ServiceFilter::Service(s) => *s == service,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ServiceFilter::All => "Tutti i Servizi".to_string(),
            ServiceFilter::Category(category) => format!("{} (Aggregato)", category.label()),
            ServiceFilter::Service(service) => service.label().to_string(),
        }
    }
}

/// Amounts and titles per (service, year), zero-filled over every canonical
/// service and every requested year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceYearTotals {
    pub years: Vec<i32>,
    cells: BTreeMap<ServiceCategory, BTreeMap<i32, Totals>>,
}

impl ServiceYearTotals {
    pub fn compute(view: TableView<'_>, years: &[i32]) -> Self {
        let mut years = years.to_vec();
        years.sort_unstable();
        years.dedup();

        let mut cells: BTreeMap<ServiceCategory, BTreeMap<i32, Totals>> = ServiceCategory::ALL
            .into_iter()
            .map(|s| (s, years.iter().map(|y| (*y, Totals::default())).collect()))
            .collect();

        for record in view.records() {
            if let Some(cell) = cells
                .get_mut(&record.service)
                .and_then(|row| row.get_mut(&record.year))
            {
                cell.add_record(record);
            }
        }

        Self { years, cells }
    }

    /// Every year present in the view.
    pub fn compute_all_years(view: TableView<'_>) -> Self {
        Self::compute(view, &view.years())
    }

    pub fn get(&self, service: ServiceCategory, year: i32) -> Totals {
        self.cells
            .get(&service)
            .and_then(|row| row.get(&year))
            .copied()
            .unwrap_or_default()
    }

    /// Rows in canonical service order.
    pub fn rows(&self) -> impl Iterator<Item = (ServiceCategory, &BTreeMap<i32, Totals>)> {
        self.cells.iter().map(|(s, row)| (*s, row))
    }

    pub fn category_total(&self, category: AggregateCategory, year: i32) -> Totals {
        category.services().map(|s| self.get(s, year)).collect()
    }

    pub fn year_total(&self, year: i32) -> Totals {
        ServiceCategory::ALL
            .into_iter()
            .map(|s| self.get(s, year))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub label: String,
    pub base: f64,
    pub current: f64,
    pub delta: f64,
    /// Zero when `base` is zero.
    pub percent_change: f64,
}

impl ComparisonRow {
    pub fn new(label: impl Into<String>, base: f64, current: f64) -> Self {
        Self {
            label: label.into(),
            base,
            current,
            delta: current - base,
            percent_change: percent_change(base, current),
        }
    }
}

/// A year-over-year table: one row per group plus a TOTAL row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonTable {
    pub base_year: i32,
    pub current_year: i32,
    pub rows: Vec<ComparisonRow>,
    pub total: ComparisonRow,
}

impl ComparisonTable {
    fn summed(base_year: i32, current_year: i32, rows: Vec<ComparisonRow>) -> Self {
        let base = rows.iter().map(|r| r.base).sum();
        let current = rows.iter().map(|r| r.current).sum();
        Self {
            base_year,
            current_year,
            rows,
            total: ComparisonRow::new(TOTAL_LABEL, base, current),
        }
    }

    pub fn row(&self, label: &str) -> Option<&ComparisonRow> {
        self.rows
            .iter()
            .chain(std::iter::once(&self.total))
            .find(|r| r.label == label)
    }

    /// Group rows followed by the TOTAL row.
    pub fn all_rows(&self) -> impl Iterator<Item = &ComparisonRow> {
        self.rows.iter().chain(std::iter::once(&self.total))
    }

    pub fn to_csv_string(&self) -> crate::error::Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            String::new(),
            self.base_year.to_string(),
            self.current_year.to_string(),
            "Variazione Assoluta".to_string(),
            "Variazione %".to_string(),
        ])?;
        for row in self.all_rows() {
            writer.write_record([
                row.label.clone(),
                format!("{:.2}", row.base),
                format!("{:.2}", row.current),
                format!("{:.2}", row.delta),
                format!("{:.2}", row.percent_change),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| crate::error::RevenueError::IoError(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Year-over-year comparison per canonical service.
pub fn compare_services(
    view: TableView<'_>,
    base_year: i32,
    current_year: i32,
    metric: Metric,
) -> ComparisonTable {
    let totals = ServiceYearTotals::compute(view, &[base_year, current_year]);
    let rows = ServiceCategory::ALL
        .into_iter()
        .map(|s| {
            ComparisonRow::new(
                s.label(),
                totals.get(s, base_year).value(metric),
                totals.get(s, current_year).value(metric),
            )
        })
        .collect();
    ComparisonTable::summed(base_year, current_year, rows)
}

/// Year-over-year comparison after rolling services up into aggregate categories.
pub fn compare_categories(
    view: TableView<'_>,
    base_year: i32,
    current_year: i32,
    metric: Metric,
) -> ComparisonTable {
    let totals = ServiceYearTotals::compute(view, &[base_year, current_year]);
    let rows = AggregateCategory::ALL
        .into_iter()
        .map(|c| {
            ComparisonRow::new(
                c.label(),
                totals.category_total(c, base_year).value(metric),
                totals.category_total(c, current_year).value(metric),
            )
        })
        .collect();
    ComparisonTable::summed(base_year, current_year, rows)
}

/// Average revenue per title, per service and year.
///
/// The TOTAL row divides the summed service amounts by the summed service titles.
pub fn compare_profitability(
    view: TableView<'_>,
    base_year: i32,
    current_year: i32,
) -> ComparisonTable {
    let totals = ServiceYearTotals::compute(view, &[base_year, current_year]);

    let mut base_sum = Totals::default();
    let mut current_sum = Totals::default();
    let mut rows = Vec::with_capacity(ServiceCategory::ALL.len());

    for service in ServiceCategory::ALL {
        let base = totals.get(service, base_year);
        let current = totals.get(service, current_year);
        base_sum.add(&base);
        current_sum.add(&current);
        rows.push(ComparisonRow::new(
            service.label(),
            base.profitability(),
            current.profitability(),
        ));
    }

    ComparisonTable {
        base_year,
        current_year,
        rows,
        total: ComparisonRow::new(
            TOTAL_LABEL,
            base_sum.profitability(),
            current_sum.profitability(),
        ),
    }
}

/// Month-by-month comparison of two years, restricted to `window`.
///
/// Rows are the months inside the window that have data for the filter in any
/// year; months outside the window never appear.
pub fn compare_months(
    view: TableView<'_>,
    filter: ServiceFilter,
    base_year: i32,
    current_year: i32,
    metric: Metric,
    window: MonthWindow,
) -> ComparisonTable {
    let mut months: BTreeSet<u32> = BTreeSet::new();
    let mut cells: BTreeMap<(u32, i32), Totals> = BTreeMap::new();

    for record in view
        .records()
        .filter(|r| filter.matches(r.service) && window.contains(r.month))
    {
        months.insert(record.month);
        cells
            .entry((record.month, record.year))
            .or_default()
            .add_record(record);
    }

    let value = |month: u32, year: i32| {
        cells
            .get(&(month, year))
            .map(|t| t.value(metric))
            .unwrap_or(0.0)
    };

    let rows = months
        .into_iter()
        .map(|m| ComparisonRow::new(month_name(m), value(m, base_year), value(m, current_year)))
        .collect();

    ComparisonTable::summed(base_year, current_year, rows)
}

pub fn month_name(month: u32) -> &'static str {
    match month {
        1 => "Gennaio",
        2 => "Febbraio",
        3 => "Marzo",
        4 => "Aprile",
        5 => "Maggio",
        6 => "Giugno",
        7 => "Luglio",
        8 => "Agosto",
        9 => "Settembre",
        10 => "Ottobre",
        11 => "Novembre",
        12 => "Dicembre",
        _ => "",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceShare {
    pub service: ServiceCategory,
    pub totals: Totals,
    /// Percentage of the year's revenue, zero when the year total is not positive.
    pub share_percent: f64,
    pub profitability: f64,
}

/// Single-year summary used by the per-year detail pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearBreakdown {
    pub year: i32,
    pub first_entry: NaiveDateTime,
    pub last_entry: NaiveDateTime,
    pub services: Vec<ServiceShare>,
    pub total: Totals,
}

impl YearBreakdown {
    pub fn total_profitability(&self) -> f64 {
        self.total.profitability()
    }

    /// Share column of the TOTAL row: 100 whenever the year has positive revenue.
    pub fn total_share_percent(&self) -> f64 {
        self.services.iter().map(|s| s.share_percent).sum()
    }
}

/// Per-service breakdown of one year; `None` when the year has no records.
pub fn year_breakdown(view: TableView<'_>, year: i32) -> Option<YearBreakdown> {
    let mut in_year = view.records().filter(|r| r.year == year).peekable();
    in_year.peek()?;

    let mut per_service: BTreeMap<ServiceCategory, Totals> = ServiceCategory::ALL
        .into_iter()
        .map(|s| (s, Totals::default()))
        .collect();
    let mut first_entry = NaiveDateTime::MAX;
    let mut last_entry = NaiveDateTime::MIN;

    for record in in_year {
        per_service.entry(record.service).or_default().add_record(record);
        first_entry = first_entry.min(record.entry_timestamp);
        last_entry = last_entry.max(record.entry_timestamp);
    }

    let total: Totals = per_service.values().collect();

    let services = per_service
        .into_iter()
        .map(|(service, totals)| ServiceShare {
            service,
            totals,
            share_percent: share_percent(totals.amount, total.amount),
            profitability: totals.profitability(),
        })
        .collect();

    Some(YearBreakdown {
        year,
        first_entry,
        last_entry,
        services,
        total,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthServiceRow {
    pub month: u32,
    /// `(service, amount, share of the month in percent)` in canonical order.
    pub services: Vec<(ServiceCategory, f64, f64)>,
    pub total: f64,
}

/// Month × service amounts for one year, for the per-service trend chart.
pub fn monthly_service_pivot(view: TableView<'_>, year: i32) -> Vec<MonthServiceRow> {
    let mut grid: BTreeMap<u32, BTreeMap<ServiceCategory, f64>> = BTreeMap::new();
    for record in view.records().filter(|r| r.year == year) {
        *grid
            .entry(record.month)
            .or_default()
            .entry(record.service)
            .or_default() += record.amount;
    }

    grid.into_iter()
        .map(|(month, amounts)| {
            let cells: Vec<(ServiceCategory, f64)> = ServiceCategory::ALL
                .into_iter()
                .map(|s| (s, amounts.get(&s).copied().unwrap_or(0.0)))
                .collect();
            let total: f64 = cells.iter().map(|(_, amount)| amount).sum();
            MonthServiceRow {
                month,
                services: cells
                    .into_iter()
                    .map(|(s, amount)| (s, amount, ratio_or_zero(amount, total) * 100.0))
                    .collect(),
                total,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecordOrigin;
    use crate::utils::first_of_month;

    fn record(
        year: i32,
        month: u32,
        service: ServiceCategory,
        amount: f64,
        titles: Option<u64>,
    ) -> CanonicalRecord {
        CanonicalRecord {
            year,
            month,
            service,
            amount,
            title_count: titles,
            entry_timestamp: first_of_month(year, month).unwrap(),
            origin: RecordOrigin::Sourced {
                source_id: "test".to_string(),
            },
        }
    }

    fn sample() -> Vec<CanonicalRecord> {
        vec![
            record(2024, 1, ServiceCategory::ParkingMeters, 1000.0, Some(400)),
            record(2024, 2, ServiceCategory::ParkingMeters, 800.0, Some(300)),
            record(2024, 2, ServiceCategory::Subscriptions, 600.0, Some(12)),
            record(2024, 9, ServiceCategory::HubApp, 50.0, None),
            record(2025, 1, ServiceCategory::ParkingMeters, 1200.0, Some(450)),
            record(2025, 2, ServiceCategory::TapAndPark, 90.0, Some(30)),
            record(2025, 7, ServiceCategory::Subscriptions, 700.0, Some(14)),
        ]
    }

    #[test]
    fn test_service_totals_include_every_category() {
        let records = sample();
        let table = compare_services(TableView::from_records(&records), 2024, 2025, Metric::Amount);

        let labels: Vec<&str> = table.rows.iter().map(|r| r.label.as_str()).collect();
        let expected: Vec<&str> = ServiceCategory::ALL.iter().map(|s| s.label()).collect();
        assert_eq!(labels, expected);

        let auth = table.row("Autorizzazioni").unwrap();
        assert_eq!((auth.base, auth.current, auth.percent_change), (0.0, 0.0, 0.0));

        let tap = table.row("Tap&Park (ricariche)").unwrap();
        assert_eq!(tap.base, 0.0);
        assert_eq!(tap.current, 90.0);
        assert_eq!(tap.percent_change, 0.0);
    }

    #[test]
    fn test_total_row_is_sum_of_rows() {
        let records = sample();
        let view = TableView::from_records(&records);
        for metric in [Metric::Amount, Metric::Titles] {
            for table in [
                compare_services(view, 2024, 2025, metric),
                compare_categories(view, 2024, 2025, metric),
            ] {
                let base: f64 = table.rows.iter().map(|r| r.base).sum();
                let current: f64 = table.rows.iter().map(|r| r.current).sum();
                assert!((table.total.base - base).abs() < 1e-9);
                assert!((table.total.current - current).abs() < 1e-9);
            }
        }

        let amounts = compare_services(view, 2024, 2025, Metric::Amount);
        assert!((amounts.total.base - 2450.0).abs() < 1e-9);
        assert!((amounts.total.current - 1990.0).abs() < 1e-9);
        assert!((amounts.total.delta + 460.0).abs() < 1e-9);
    }

    #[test]
    fn test_category_rollup() {
        let records = sample();
        let table =
            compare_categories(TableView::from_records(&records), 2024, 2025, Metric::Amount);
        assert_eq!(table.rows.len(), 3);
        let occasional = table.row("Sosta Occasionale").unwrap();
        assert!((occasional.base - 1850.0).abs() < 1e-9);
        assert!((occasional.current - 1290.0).abs() < 1e-9);
    }

    #[test]
    fn test_titles_metric_treats_missing_counts_as_zero() {
        let records = sample();
        let table = compare_services(TableView::from_records(&records), 2024, 2025, Metric::Titles);
        let hub = table.row("Hub Sosta (App)").unwrap();
        assert_eq!(hub.base, 0.0);
        assert_eq!(table.total.base, 712.0);
    }

    #[test]
    fn test_profitability_zero_when_no_titles() {
        let records = sample();
        let table = compare_profitability(TableView::from_records(&records), 2024, 2025);

        let hub = table.row("Hub Sosta (App)").unwrap();
        assert_eq!(hub.base, 0.0);

        let subs = table.row("Abbonamenti").unwrap();
        assert!((subs.base - 50.0).abs() < 1e-9);
        assert!((subs.current - 50.0).abs() < 1e-9);

        // 2450 / 712 titles
        assert!((table.total.base - 2450.0 / 712.0).abs() < 1e-9);
    }

    #[test]
    fn test_monthly_window_excludes_outside_months() {
        let records = sample();
        let table = compare_months(
            TableView::from_records(&records),
            ServiceFilter::All,
            2024,
            2025,
            Metric::Amount,
            MonthWindow::default(),
        );
        let labels: Vec<&str> = table.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Gennaio", "Febbraio"]);
        assert!((table.total.base - 2400.0).abs() < 1e-9);
        assert!((table.total.current - 1290.0).abs() < 1e-9);
    }

    #[test]
    fn test_monthly_filter_by_category_and_service() {
        let records = sample();
        let view = TableView::from_records(&records);

        let occasional = compare_months(
            view,
            ServiceFilter::Category(AggregateCategory::OccasionalParking),
            2024,
            2025,
            Metric::Amount,
            MonthWindow::default(),
        );
        let feb = occasional.row("Febbraio").unwrap();
        assert_eq!((feb.base, feb.current), (800.0, 90.0));

        let subs = compare_months(
            view,
            ServiceFilter::Service(ServiceCategory::Subscriptions),
            2024,
            2025,
            Metric::Titles,
            MonthWindow::default(),
        );
        assert_eq!(subs.rows.len(), 1);
        let feb = subs.row("Febbraio").unwrap();
        assert_eq!((feb.base, feb.current), (12.0, 0.0));
    }

    #[test]
    fn test_year_breakdown() {
        let records = sample();
        let view = TableView::from_records(&records);
        let breakdown = year_breakdown(view, 2024).unwrap();

        assert_eq!(breakdown.services.len(), ServiceCategory::ALL.len());
        assert!((breakdown.total.amount - 2450.0).abs() < 1e-9);
        assert!((breakdown.total_share_percent() - 100.0).abs() < 1e-9);
        assert!((breakdown.total_profitability() - 2450.0 / 712.0).abs() < 1e-9);
        assert_eq!(breakdown.first_entry, first_of_month(2024, 1).unwrap());
        assert_eq!(breakdown.last_entry, first_of_month(2024, 9).unwrap());

        assert!(year_breakdown(view, 2019).is_none());
    }

    #[test]
    fn test_monthly_service_pivot_shares() {
        let records = sample();
        let pivot = monthly_service_pivot(TableView::from_records(&records), 2024);
        let months: Vec<u32> = pivot.iter().map(|r| r.month).collect();
        assert_eq!(months, vec![1, 2, 9]);

        let feb = &pivot[1];
        assert_eq!(feb.total, 1400.0);
        let (_, amount, share) = feb.services[2];
        assert_eq!(amount, 800.0);
        assert!((share - 800.0 / 1400.0 * 100.0).abs() < 1e-9);
        let (_, amount, share) = feb.services[0];
        assert_eq!((amount, share), (0.0, 0.0));
    }

    #[test]
    fn test_conservation_against_grand_total() {
        let records = sample();
        let view = TableView::from_records(&records);
        let per_service = ServiceYearTotals::compute_all_years(view);
        let summed: f64 = view
            .years()
            .iter()
            .map(|y| per_service.year_total(*y).amount)
            .sum();
        assert!((summed - grand_total(view).amount).abs() < 1e-9);
    }

    #[test]
    fn test_csv_export_contains_total_row() {
        let records = sample();
        let table = compare_services(TableView::from_records(&records), 2024, 2025, Metric::Amount);
        let csv = table.to_csv_string().unwrap();
        assert!(csv.starts_with(",2024,2025,Variazione Assoluta,Variazione %"));
        assert!(csv.contains("TOTALE,2450.00,1990.00,-460.00"));
    }
}
