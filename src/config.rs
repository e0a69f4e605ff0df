// ⚙️ Configuration - everything the engine and its front ends are parameterized by
//
// Stored as JSON. Every section has a default, so a partial file only needs
// to name what it changes. Relative source paths resolve against the
// directory of the config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::category::CategorySet;
use crate::error::{FlowError, FlowResult};
use crate::flow::{build_flow, FlowRun, SourceRule};
use crate::ingest::{load_dataset, CsvLayout, Dataset};
use crate::period::{Period, PeriodSequence};
use crate::render::{Layout, Palette};
use crate::timeline::PeriodRecords;

pub const DEFAULT_SENTINEL: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub closed: Vec<String>,
    pub sentinel: String,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        CategoryConfig {
            closed: ["Q1", "Q2", "Q3", "Q4"].iter().map(|q| q.to_string()).collect(),
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub periods: Vec<Period>,
    pub categories: CategoryConfig,
    pub source_rule: SourceRule,
    pub palette: Palette,
    pub layout: Layout,
    pub csv: CsvLayout,

    /// CSV file per period
    pub sources: BTreeMap<Period, PathBuf>,

    pub server: ServerConfig,

    /// Directory relative source paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// `<year>.csv` for every period
fn default_sources(periods: &[Period]) -> BTreeMap<Period, PathBuf> {
    periods
        .iter()
        .map(|p| (*p, PathBuf::from(format!("{}.csv", p))))
        .collect()
}

impl Default for FlowConfig {
    fn default() -> Self {
        let periods = vec![Period(2022), Period(2023), Period(2024)];
        let sources = default_sources(&periods);

        FlowConfig {
            periods,
            categories: CategoryConfig::default(),
            source_rule: SourceRule::default(),
            palette: Palette::quartiles(DEFAULT_SENTINEL),
            layout: Layout::quartiles(DEFAULT_SENTINEL),
            csv: CsvLayout::default(),
            sources,
            server: ServerConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl FlowConfig {
    /// Parse and validate a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        let mut config: FlowConfig = serde_json::from_value(value.clone())
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        // Default file names follow the declared periods
        if value.get("sources").is_none() {
            config.sources = default_sources(&config.periods);
        }

        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        config.validate()?;
        info!(path = %path.display(), periods = config.periods.len(), "configuration loaded");
        Ok(config)
    }

    /// Config file if given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Check that the core types can be built from this config
    pub fn validate(&self) -> FlowResult<()> {
        let periods = self.period_sequence()?;
        self.category_set()?;

        if let Some(period) = self
            .sources
            .keys()
            .find(|p| periods.position(**p).is_none())
        {
            return Err(FlowError::UndeclaredPeriod {
                period: *period,
                declared: self.periods.clone(),
            });
        }
        Ok(())
    }

    pub fn period_sequence(&self) -> FlowResult<PeriodSequence> {
        PeriodSequence::new(self.periods.clone())
    }

    pub fn category_set(&self) -> FlowResult<CategorySet> {
        CategorySet::new(
            self.categories.closed.clone(),
            self.categories.sentinel.clone(),
        )
    }

    /// Source paths with relative entries resolved against `base_dir`
    pub fn resolved_sources(&self) -> BTreeMap<Period, PathBuf> {
        self.sources
            .iter()
            .map(|(period, path)| {
                let path = if path.is_relative() {
                    self.base_dir.join(path)
                } else {
                    path.clone()
                };
                (*period, path)
            })
            .collect()
    }

    /// Read every configured CSV file
    pub fn load_dataset(&self) -> Result<Dataset> {
        load_dataset(&self.period_sequence()?, &self.resolved_sources(), &self.csv)
    }

    /// Run the engine over already loaded records
    pub fn run(&self, batches: &[PeriodRecords]) -> FlowResult<FlowRun> {
        build_flow(
            &self.period_sequence()?,
            &self.category_set()?,
            self.source_rule,
            batches,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = FlowConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.periods.len(), 3);
        assert_eq!(config.category_set().unwrap().len(), 5);
        assert_eq!(config.source_rule, SourceRule::RequirePresence);
        assert_eq!(config.palette.color(DEFAULT_SENTINEL), "rgba(80, 130, 200, 0.8)");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{
                "periods": [2023, 2024],
                "source_rule": "sentinel_for_absent",
                "sources": {{ "2023": "a.csv", "2024": "/data/b.csv" }}
            }}"#
        )
        .unwrap();

        let config = FlowConfig::from_file(&path).unwrap();

        assert_eq!(config.periods, vec![Period(2023), Period(2024)]);
        assert_eq!(config.source_rule, SourceRule::SentinelForAbsent);
        assert_eq!(config.csv, CsvLayout::default());

        let sources = config.resolved_sources();
        assert_eq!(sources[&Period(2023)], dir.path().join("a.csv"));
        assert_eq!(sources[&Period(2024)], PathBuf::from("/data/b.csv"));
    }

    #[test]
    fn test_invalid_categories_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");
        fs::write(
            &path,
            r#"{ "categories": { "closed": ["Q1", "q1"], "sentinel": "None" } }"#,
        )
        .unwrap();

        let err = FlowConfig::from_file(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FlowError>(),
            Some(FlowError::DuplicateCategory { .. })
        ));
    }

    #[test]
    fn test_source_for_undeclared_period_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");
        fs::write(
            &path,
            r#"{
                "periods": [2022, 2023],
                "sources": { "2021": "2021.csv", "2022": "2022.csv", "2023": "2023.csv" }
            }"#,
        )
        .unwrap();

        let err = FlowConfig::from_file(&path).unwrap_err();
        assert_eq!(
            err.downcast_ref::<FlowError>(),
            Some(&FlowError::UndeclaredPeriod {
                period: Period(2021),
                declared: vec![Period(2022), Period(2023)],
            })
        );
    }

    #[test]
    fn test_default_sources_follow_declared_periods() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");
        fs::write(&path, r#"{ "periods": [2023, 2024] }"#).unwrap();

        let config = FlowConfig::from_file(&path).unwrap();
        let sources = config.resolved_sources();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[&Period(2023)], dir.path().join("2023.csv"));
    }

    #[test]
    fn test_run_rejects_undeclared_period() {
        let config = FlowConfig::default();
        let batches = [PeriodRecords::from_pairs(Period(2019), [("A", "Q1")])];

        assert!(matches!(
            config.run(&batches),
            Err(FlowError::UndeclaredPeriod { .. })
        ));
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let config = FlowConfig::load(None).unwrap();
        assert_eq!(config, FlowConfig::default());
    }
}
