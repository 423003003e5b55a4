use crate::error::Result;
use crate::utils::parse_timestamp;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// A single spreadsheet cell as handed over by the input layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn from_text(raw: &str) -> Self {
        if raw.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(raw.to_string())
        }
    }

    /// Numeric value of the cell, `None` for anything that is not a finite number.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            CellValue::Number(n) => *n,
            CellValue::Text(s) => s.trim().parse::<f64>().ok()?,
            CellValue::Empty | CellValue::DateTime(_) => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Numeric value with non-numeric and missing cells coerced to zero.
    pub fn as_amount(&self) -> f64 {
        self.as_f64().unwrap_or(0.0)
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::DateTime(ts) => Some(*ts),
            CellValue::Text(s) => parse_timestamp(s),
            CellValue::Empty | CellValue::Number(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Text(s) => Some(s.trim().to_string()),
            CellValue::DateTime(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::from_text(value)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(value: NaiveDateTime) -> Self {
        CellValue::DateTime(value)
    }
}

static EMPTY_CELL: CellValue = CellValue::Empty;

/// One sheet or file of an export, identified by its sheet or file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub source_id: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawTable {
    pub fn new(
        source_id: impl Into<String>,
        headers: Vec<String>,
        rows: Vec<Vec<CellValue>>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            headers: headers.into_iter().map(|h| h.trim().to_string()).collect(),
            rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn find_column(&self, predicate: impl Fn(&str) -> bool) -> Option<usize> {
        self.headers.iter().position(|h| predicate(h))
    }

    pub fn cell(&self, row: usize, column: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn column_count(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(self.headers.len())
    }

    pub fn from_csv_reader<R: Read>(source_id: impl Into<String>, reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

        let mut rows: Vec<Vec<CellValue>> = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(CellValue::from_text).collect());
        }

        Ok(Self::new(source_id, headers, rows))
    }

    /// Reads a CSV export; the file name becomes the source identifier.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source_id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(source_id, file)
    }
}

/// How a source encodes its period and title information, decided by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLayout {
    /// `"{YYYY}_{SERVICE}"`: one row per transaction, timestamped.
    YearSheet { year: i32 },
    /// `"Riepilogo_{SERVICE}_Mensile"`: one row per month.
    MonthlyReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContext {
    pub layout: SourceLayout,
    pub service_token: String,
}

const REPORT_PREFIX: &str = "riepilogo_";
const REPORT_SUFFIX: &str = "_mensile";
const KNOWN_EXTENSIONS: &[&str] = &[".xlsx", ".xls", ".csv"];

/// Decodes a sheet or file name into its layout and service token. Directory
/// components and a known spreadsheet extension are ignored.
/// Returns `None` when the name follows neither naming convention.
pub fn parse_source_id(source_id: &str) -> Option<SourceContext> {
    let name = source_id
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_id)
        .trim();
    let stem = KNOWN_EXTENSIONS
        .iter()
        .find_map(|ext| strip_suffix_ignore_case(name, ext))
        .unwrap_or(name);

    parse_monthly_report(stem).or_else(|| parse_year_sheet(stem))
}

fn parse_monthly_report(stem: &str) -> Option<SourceContext> {
    let rest = strip_prefix_ignore_case(stem, REPORT_PREFIX)?;
    let token = strip_suffix_ignore_case(rest, REPORT_SUFFIX)?;
    if token.trim().is_empty() {
        return None;
    }

    Some(SourceContext {
        layout: SourceLayout::MonthlyReport,
        service_token: token.to_string(),
    })
}

fn parse_year_sheet(name: &str) -> Option<SourceContext> {
    let (year_part, token) = name.split_once('_')?;
    if year_part.len() != 4 || !year_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if token.trim().is_empty() {
        return None;
    }
    let year = year_part.parse().ok()?;

    Some(SourceContext {
        layout: SourceLayout::YearSheet { year },
        service_token: token.to_string(),
    })
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    let tail = s.get(split..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &s[..split])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_year_sheet_names() {
        let ctx = parse_source_id("2024_HUB_SOSTA 1SEM").unwrap();
        assert_eq!(ctx.layout, SourceLayout::YearSheet { year: 2024 });
        assert_eq!(ctx.service_token, "HUB_SOSTA 1SEM");

        let ctx = parse_source_id("2025_TAP&PARK 1SEM").unwrap();
        assert_eq!(ctx.layout, SourceLayout::YearSheet { year: 2025 });
        assert_eq!(ctx.service_token, "TAP&PARK 1SEM");
    }

    #[test]
    fn test_parse_year_sheet_file_names() {
        let ctx = parse_source_id("2024_ABBONAMENTI 1SEM.csv").unwrap();
        assert_eq!(ctx.layout, SourceLayout::YearSheet { year: 2024 });
        assert_eq!(ctx.service_token, "ABBONAMENTI 1SEM");

        let ctx = parse_source_id("exports/2025_PARCOMETRI 1SEM.XLSX").unwrap();
        assert_eq!(ctx.layout, SourceLayout::YearSheet { year: 2025 });
        assert_eq!(ctx.service_token, "PARCOMETRI 1SEM");

        assert!(parse_source_id("2024_.csv").is_none());
    }

    #[test]
    fn test_parse_monthly_report_names() {
        let ctx = parse_source_id("Riepilogo_ParkingHUB_Mensile.xlsx").unwrap();
        assert_eq!(ctx.layout, SourceLayout::MonthlyReport);
        assert_eq!(ctx.service_token, "ParkingHUB");

        let ctx = parse_source_id("data_sources/riepilogo_Tap&Park_MENSILE.csv").unwrap();
        assert_eq!(ctx.service_token, "Tap&Park");

        let ctx = parse_source_id("Riepilogo_Abbonamenti_Mensile").unwrap();
        assert_eq!(ctx.service_token, "Abbonamenti");
    }

    #[test]
    fn test_unrecognized_names() {
        assert!(parse_source_id("Foglio1").is_none());
        assert!(parse_source_id("24_ABBONAMENTI").is_none());
        assert!(parse_source_id("2024_").is_none());
        assert!(parse_source_id("Riepilogo__Mensile.xlsx").is_none());
        assert!(parse_source_id("Riepilogo_Parcometro_Settimanale.xlsx").is_none());
    }

    #[test]
    fn test_cell_coercion() {
        assert_eq!(CellValue::from("12.5").as_f64(), Some(12.5));
        assert_eq!(CellValue::from(" 3 ").as_amount(), 3.0);
        assert_eq!(CellValue::from("n/d").as_amount(), 0.0);
        assert_eq!(CellValue::Empty.as_amount(), 0.0);
        assert_eq!(CellValue::Number(f64::NAN).as_f64(), None);
        assert_eq!(CellValue::from(""), CellValue::Empty);
    }

    #[test]
    fn test_from_csv_reader_trims_headers() {
        let data = "DATA_ORA_INSERIMENTO , Importo \n2024-01-10 10:00:00,5.5\n2024-01-11 11:00:00,\n";
        let table = RawTable::from_csv_reader("2024_ABBONAMENTI 1SEM", data.as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["DATA_ORA_INSERIMENTO", "Importo"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(0, 1).as_amount(), 5.5);
        assert_eq!(table.cell(1, 1), &CellValue::Empty);
        assert_eq!(table.cell(9, 9), &CellValue::Empty);
        assert_eq!(table.column_index("Importo"), Some(1));
    }
}
