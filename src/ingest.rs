// 📂 Ingestion - SJR-style CSV exports → per-period records
//
// One file per period, semicolon separated, with a header row. Only the id
// and quartile columns feed the engine; the descriptive columns are carried
// through untouched for the journal lookup view.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::FlowError;
use crate::period::{Period, PeriodSequence};
use crate::timeline::PeriodRecords;

// ============================================================================
// CSV LAYOUT
// ============================================================================

/// Column names and delimiter of the source files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvLayout {
    pub delimiter: char,
    pub id_column: String,
    pub category_column: String,
    pub title_column: String,
    pub issn_column: String,
    pub publisher_column: String,
    pub categories_column: String,
    pub areas_column: String,
}

impl Default for CsvLayout {
    fn default() -> Self {
        CsvLayout {
            delimiter: ';',
            id_column: "Sourceid".to_string(),
            category_column: "SJR Best Quartile".to_string(),
            title_column: "Title".to_string(),
            issn_column: "Issn".to_string(),
            publisher_column: "Publisher".to_string(),
            categories_column: "Categories".to_string(),
            areas_column: "Areas".to_string(),
        }
    }
}

// ============================================================================
// JOURNAL METADATA
// ============================================================================

/// Descriptive columns for one journal, as found in the source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalMetadata {
    pub id: String,
    pub title: String,
    pub issn: String,
    pub publisher: String,
    pub subject_categories: String,
    pub areas: String,
}

/// Result of reading one period file
#[derive(Debug, Clone)]
pub struct LoadedPeriod {
    pub records: PeriodRecords,
    pub metadata: Vec<JournalMetadata>,

    /// Rows dropped because the id cell was blank
    pub skipped_rows: usize,
}

/// Column positions resolved from the header row
struct Columns {
    id: usize,
    category: Option<usize>,
    title: Option<usize>,
    issn: Option<usize>,
    publisher: Option<usize>,
    categories: Option<usize>,
    areas: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord, layout: &CsvLayout, source: &str) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);

        let id = find(&layout.id_column).with_context(|| {
            format!("Missing id column '{}' in {}", layout.id_column, source)
        })?;

        let category = find(&layout.category_column);
        if category.is_none() {
            warn!(
                column = %layout.category_column,
                source,
                "category column missing, every journal resolves to the sentinel"
            );
        }

        Ok(Columns {
            id,
            category,
            title: find(&layout.title_column),
            issn: find(&layout.issn_column),
            publisher: find(&layout.publisher_column),
            categories: find(&layout.categories_column),
            areas: find(&layout.areas_column),
        })
    }
}

fn cell(record: &csv::StringRecord, column: Option<usize>) -> String {
    column
        .and_then(|i| record.get(i))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

// ============================================================================
// LOADERS
// ============================================================================

/// Read one period's records from any reader
pub fn read_period<R: Read>(
    reader: R,
    period: Period,
    layout: &CsvLayout,
    source: &str,
) -> Result<LoadedPeriod> {
    let delimiter = u8::try_from(layout.delimiter)
        .with_context(|| format!("Delimiter {:?} is not a single-byte character", layout.delimiter))?;

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read header row of {}", source))?
        .clone();
    let columns = Columns::resolve(&headers, layout, source)?;

    let mut records = PeriodRecords::new(period);
    let mut metadata = Vec::new();
    let mut skipped_rows = 0;

    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| {
            format!("Failed to parse CSV line {} in {}", line_num + 2, source)
        })?;

        let id = cell(&record, Some(columns.id));
        if id.is_empty() {
            warn!(line = line_num + 2, source, "row without journal id skipped");
            skipped_rows += 1;
            continue;
        }

        records.push(id.clone(), cell(&record, columns.category));
        metadata.push(JournalMetadata {
            id,
            title: cell(&record, columns.title),
            issn: cell(&record, columns.issn),
            publisher: cell(&record, columns.publisher),
            subject_categories: cell(&record, columns.categories),
            areas: cell(&record, columns.areas),
        });
    }

    debug!(%period, rows = records.len(), skipped_rows, source, "loaded period");

    Ok(LoadedPeriod {
        records,
        metadata,
        skipped_rows,
    })
}

/// Read one period's CSV file
pub fn load_period_csv(path: &Path, period: Period, layout: &CsvLayout) -> Result<LoadedPeriod> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    read_period(file, period, layout, &path.display().to_string())
}

/// Records for every declared period plus the metadata catalog
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub batches: Vec<PeriodRecords>,
    pub catalog: JournalCatalog,
}

/// Load every declared period from its configured file, in sequence order.
/// A source for a period outside the sequence is an error, not skipped.
pub fn load_dataset(
    periods: &PeriodSequence,
    sources: &BTreeMap<Period, PathBuf>,
    layout: &CsvLayout,
) -> Result<Dataset> {
    if let Some(period) = sources.keys().find(|p| periods.position(**p).is_none()) {
        return Err(FlowError::UndeclaredPeriod {
            period: *period,
            declared: periods.as_slice().to_vec(),
        }
        .into());
    }

    let mut dataset = Dataset::default();

    for period in periods.iter() {
        let path = sources
            .get(&period)
            .ok_or(FlowError::MissingSource { period })?;

        let loaded = load_period_csv(path, period, layout)?;
        dataset.catalog.insert_period(period, loaded.metadata);
        dataset.batches.push(loaded.records);
    }

    Ok(dataset)
}

// ============================================================================
// CATALOG
// ============================================================================

/// Journal metadata keyed by id; the most recent period's row wins
#[derive(Debug, Clone, Default)]
pub struct JournalCatalog {
    entries: HashMap<String, (Period, JournalMetadata)>,
}

impl JournalCatalog {
    pub fn insert_period(&mut self, period: Period, rows: Vec<JournalMetadata>) {
        for row in rows {
            match self.entries.get(&row.id) {
                // First row within a period wins, like the timeline resolver
                Some((seen, _)) if *seen >= period => {}
                _ => {
                    self.entries.insert(row.id.clone(), (period, row));
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&JournalMetadata> {
        self.entries.get(id).map(|(_, meta)| meta)
    }

    /// Period the stored metadata was taken from
    pub fn source_period(&self, id: &str) -> Option<Period> {
        self.entries.get(id).map(|(period, _)| *period)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"Rank;Sourceid;Title;Type;Issn;SJR;SJR Best Quartile;Publisher;Categories;Areas
1;28773;Ca-A Cancer Journal for Clinicians;journal;15424863, 00079235;62,937;Q1;Wiley-Blackwell;"Hematology (Q1); Oncology (Q1)";Medicine
2;19434;MMWR Recommendations and Reports;journal;10575987;40,949;q1 ;CDC;Epidemiology (Q1);Medicine
3;;Orphan Row;journal;;;Q2;;;
4;5000;Unranked Journal;journal;12345678;;-;Nobody;;Arts
"#;

    #[test]
    fn test_read_period_extracts_records_and_metadata() {
        let loaded = read_period(SAMPLE.as_bytes(), Period(2022), &CsvLayout::default(), "sample").unwrap();

        assert_eq!(loaded.records.period, Period(2022));
        assert_eq!(loaded.records.len(), 3);
        assert_eq!(loaded.skipped_rows, 1);

        assert_eq!(loaded.records.records[0].entity_id, "28773");
        assert_eq!(loaded.records.records[0].raw_category, "Q1");
        assert_eq!(loaded.records.records[1].raw_category, "q1");
        assert_eq!(loaded.records.records[2].raw_category, "-");

        let meta = &loaded.metadata[0];
        assert_eq!(meta.title, "Ca-A Cancer Journal for Clinicians");
        assert_eq!(meta.issn, "15424863, 00079235");
        assert_eq!(meta.publisher, "Wiley-Blackwell");
    }

    #[test]
    fn test_missing_id_column_is_an_error() {
        let data = "Title;SJR Best Quartile\nSome Journal;Q1\n";
        let err = read_period(data.as_bytes(), Period(2022), &CsvLayout::default(), "bad.csv")
            .unwrap_err();

        assert!(err.to_string().contains("Sourceid"));
    }

    #[test]
    fn test_missing_category_column_degrades_to_blank() {
        let data = "Sourceid;Title\n7;Some Journal\n";
        let loaded = read_period(data.as_bytes(), Period(2023), &CsvLayout::default(), "x").unwrap();

        assert_eq!(loaded.records.records[0].raw_category, "");
    }

    #[test]
    fn test_custom_layout() {
        let data = "id,quartile\nA,Q3\n";
        let layout = CsvLayout {
            delimiter: ',',
            id_column: "id".to_string(),
            category_column: "quartile".to_string(),
            ..CsvLayout::default()
        };
        let loaded = read_period(data.as_bytes(), Period(2024), &layout, "x").unwrap();

        assert_eq!(loaded.records.records[0].raw_category, "Q3");
        assert_eq!(loaded.metadata[0].title, "");
    }

    #[test]
    fn test_load_dataset_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = BTreeMap::new();

        for (year, body) in [
            (2022, "Sourceid;SJR Best Quartile;Title\n1;Q1;Old Title\n2;Q2;Two\n"),
            (2023, "Sourceid;SJR Best Quartile;Title\n1;Q2;New Title\n"),
        ] {
            let path = dir.path().join(format!("{}.csv", year));
            let mut file = File::create(&path).unwrap();
            file.write_all(body.as_bytes()).unwrap();
            sources.insert(Period(year), path);
        }

        let periods = PeriodSequence::new(vec![Period(2022), Period(2023)]).unwrap();
        let dataset = load_dataset(&periods, &sources, &CsvLayout::default()).unwrap();

        assert_eq!(dataset.batches.len(), 2);
        assert_eq!(dataset.catalog.len(), 2);
        assert_eq!(dataset.catalog.get("1").unwrap().title, "New Title");
        assert_eq!(dataset.catalog.source_period("1"), Some(Period(2023)));
        assert_eq!(dataset.catalog.get("2").unwrap().title, "Two");
    }

    #[test]
    fn test_load_dataset_requires_every_source() {
        let periods = PeriodSequence::new(vec![Period(2022)]).unwrap();
        let err = load_dataset(&periods, &BTreeMap::new(), &CsvLayout::default()).unwrap_err();

        assert_eq!(
            err.downcast_ref::<FlowError>(),
            Some(&FlowError::MissingSource { period: Period(2022) })
        );
    }

    #[test]
    fn test_load_dataset_rejects_undeclared_source() {
        let periods = PeriodSequence::new(vec![Period(2022)]).unwrap();
        let sources: BTreeMap<Period, PathBuf> = [
            (Period(2021), PathBuf::from("2021.csv")),
            (Period(2022), PathBuf::from("2022.csv")),
        ]
        .into_iter()
        .collect();

        let err = load_dataset(&periods, &sources, &CsvLayout::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FlowError>(),
            Some(FlowError::UndeclaredPeriod { period: Period(2021), .. })
        ));
    }

    #[test]
    fn test_catalog_keeps_first_row_within_period() {
        let mut catalog = JournalCatalog::default();
        let row = |title: &str| JournalMetadata {
            id: "9".to_string(),
            title: title.to_string(),
            ..JournalMetadata::default()
        };

        catalog.insert_period(Period(2022), vec![row("first"), row("second")]);
        assert_eq!(catalog.get("9").unwrap().title, "first");

        catalog.insert_period(Period(2021), vec![row("older")]);
        assert_eq!(catalog.get("9").unwrap().title, "first");
    }
}
