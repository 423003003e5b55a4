use parking_revenue::{
    annotations, compare_categories, compare_months, compare_profitability, compare_services,
    month_name, monthly_service_pivot, read_csv_sources, year_breakdown, AnnotationSession,
    CellValue, ComparisonTable, CorrectionMode, CsvSheetStore, Metric, PipelineConfig, RawTable,
    RevenuePipeline, ServiceFilter,
};
use std::error::Error;

const BASE_YEAR: i32 = 2024;
const CURRENT_YEAR: i32 = 2025;

fn sample_sources() -> Vec<RawTable> {
    let sheet = |name: &str, rows: &[(&str, f64)]| {
        RawTable::new(
            name,
            vec![
                "ID".to_string(),
                "DATA_ORA_INSERIMENTO".to_string(),
                "Importo".to_string(),
            ],
            rows.iter()
                .enumerate()
                .map(|(i, (ts, amount))| {
                    vec![
                        CellValue::Number(i as f64 + 1.0),
                        CellValue::from(*ts),
                        CellValue::Number(*amount),
                    ]
                })
                .collect(),
        )
    };

    vec![
        sheet(
            "2024_PARCOMETRI 1SEM",
            &[
                ("2024-01-09 08:30:00", 2.4),
                ("2024-02-12 10:15:00", 3.6),
                ("2024-02-28 16:40:00", 1.2),
                ("2024-04-03 09:05:00", 4.8),
            ],
        ),
        sheet(
            "2025_PARCOMETRI 1SEM",
            &[
                ("2025-01-10 08:30:00", 2.8),
                ("2025-02-11 11:00:00", 3.2),
                ("2025-04-22 17:20:00", 5.0),
            ],
        ),
        sheet(
            "2024_ABBONAMENTI 1SEM",
            &[("2024-01-02 09:00:00", 45.0), ("2024-02-01 09:00:00", 45.0)],
        ),
        sheet(
            "2025_ABBONAMENTI 1SEM",
            &[("2025-01-02 09:00:00", 50.0), ("2025-02-03 09:00:00", 50.0)],
        ),
        sheet("2025_SANZIONI 1SEM", &[("2025-03-01 09:00:00", 80.0)]),
    ]
}

fn print_table(
    title: &str,
    table: &ComparisonTable,
    notes_key: Option<&str>,
    notes: &AnnotationSession<CsvSheetStore>,
) {
    println!("\n{}", title);
    println!(
        "{:<28} {:>12} {:>12} {:>12} {:>9}",
        "", table.base_year, table.current_year, "Var. Ass.", "Var. %"
    );
    for row in table.all_rows() {
        let note = notes_key
            .and_then(|key| notes.get(key, &row.label))
            .unwrap_or("");
        println!(
            "{:<28} {:>12.2} {:>12.2} {:>+12.2} {:>+8.2}%  {}",
            row.label, row.base, row.current, row.delta, row.percent_change, note
        );
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match std::env::var("PARKING_REVENUE_CONFIG") {
        Ok(path) => PipelineConfig::from_json_file(path)?,
        Err(_) => PipelineConfig::default(),
    };

    let tables = if args.is_empty() {
        println!("No CSV exports given, using built-in sample data");
        sample_sources()
    } else {
        read_csv_sources(&args)?
    };

    let table = RevenuePipeline::process_with_verification(&tables, &config, 0.01)?;
    for warning in table.warnings() {
        println!("⚠️  {}: {}", warning.source_id, warning.message);
    }

    let notes_path = std::env::temp_dir().join("parking_revenue_notes.csv");
    let mut notes = AnnotationSession::open(CsvSheetStore::new(&notes_path));

    let include_correction = std::env::var("APPLY_LEAP_YEAR_CORRECTION").is_ok();
    let view = table.view(CorrectionMode::from(include_correction));
    println!(
        "Leap-year correction {} ({:.2})",
        if include_correction { "applied" } else { "not applied" },
        table.correction_total()
    );

    for year in [BASE_YEAR, CURRENT_YEAR] {
        match year_breakdown(view, year) {
            Some(breakdown) => {
                println!(
                    "\nAnno {} (dal {} al {}): {:.2} incassati, {} titoli",
                    year,
                    breakdown.first_entry.format("%d/%m"),
                    breakdown.last_entry.format("%d/%m"),
                    breakdown.total.amount,
                    breakdown.total.titles
                );
                for share in &breakdown.services {
                    println!(
                        "  {:<24} {:>10.2} {:>6.2}%  {:>6.2} €/titolo",
                        share.service.label(),
                        share.totals.amount,
                        share.share_percent,
                        share.profitability
                    );
                }
                for month in monthly_service_pivot(view, year) {
                    println!("  {:<12} {:>10.2}", month_name(month.month), month.total);
                }
            }
            None => println!("\nNessun dato disponibile per l'anno {}", year),
        }
    }

    let revenue = compare_services(view, BASE_YEAR, CURRENT_YEAR, Metric::Amount);
    if revenue.total.delta < 0.0 {
        notes.set(
            annotations::REVENUE_TABLE_KEY,
            parking_revenue::TOTAL_LABEL,
            "Calo complessivo da verificare",
        );
    }

    print_table("Incassi", &revenue, Some(annotations::REVENUE_TABLE_KEY), &notes);
    print_table(
        "Numero Titoli",
        &compare_services(view, BASE_YEAR, CURRENT_YEAR, Metric::Titles),
        Some(annotations::TITLES_TABLE_KEY),
        &notes,
    );
    print_table(
        "Redditività Media per Titolo",
        &compare_profitability(view, BASE_YEAR, CURRENT_YEAR),
        Some(annotations::PROFITABILITY_TABLE_KEY),
        &notes,
    );
    print_table(
        "Macro-categorie",
        &compare_categories(view, BASE_YEAR, CURRENT_YEAR, Metric::Amount),
        None,
        &notes,
    );

    let filter = ServiceFilter::All;
    let monthly_key = annotations::monthly_table_key(filter, Metric::Amount);
    print_table(
        &format!("Confronto mensile: {}", filter.label()),
        &compare_months(
            view,
            filter,
            BASE_YEAR,
            CURRENT_YEAR,
            Metric::Amount,
            config.display_months,
        ),
        Some(&monthly_key),
        &notes,
    );

    if notes.is_dirty() {
        match notes.save() {
            Ok(()) => println!("\n✅ Notes saved to {}", notes_path.display()),
            Err(e) => println!("\n❌ Notes not saved: {}", e),
        }
    }

    println!("\nCSV export of the revenue table:\n{}", revenue.to_csv_string()?);

    Ok(())
}
