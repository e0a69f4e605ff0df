// 🧭 Entity Timeline Resolver
//
// Turns raw per-period (entity id, raw category) records into one timeline
// per entity. A timeline has one slot per declared period:
//   Some(category) → the entity has a record in that period (possibly sentinel)
//   None           → the entity is absent from that period's data
// The aggregator treats these two cases differently, so absence is never
// folded into the sentinel here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::category::{Category, CategorySet};
use crate::error::{FlowError, FlowResult};
use crate::period::{Period, PeriodSequence};

// ============================================================================
// RAW INPUT
// ============================================================================

/// One raw observation as delivered by the ingestion layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub entity_id: String,
    pub raw_category: String,
}

impl RawRecord {
    pub fn new(entity_id: impl Into<String>, raw_category: impl Into<String>) -> Self {
        RawRecord {
            entity_id: entity_id.into(),
            raw_category: raw_category.into(),
        }
    }
}

/// All records one period contributes, in source order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRecords {
    pub period: Period,
    pub records: Vec<RawRecord>,
}

impl PeriodRecords {
    pub fn new(period: Period) -> Self {
        PeriodRecords {
            period,
            records: Vec::new(),
        }
    }

    /// Build from (id, raw category) pairs
    pub fn from_pairs<I, S, T>(period: Period, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        PeriodRecords {
            period,
            records: pairs
                .into_iter()
                .map(|(id, raw)| RawRecord::new(id, raw))
                .collect(),
        }
    }

    pub fn push(&mut self, entity_id: impl Into<String>, raw_category: impl Into<String>) {
        self.records.push(RawRecord::new(entity_id, raw_category));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// TIMELINE
// ============================================================================

/// One entity's period → category history, indexed by period position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    slots: Vec<Option<Category>>,
}

impl Timeline {
    fn absent(period_count: usize) -> Self {
        Timeline {
            slots: vec![None; period_count],
        }
    }

    /// Category at a period position; None when absent
    pub fn get(&self, index: usize) -> Option<Category> {
        self.slots.get(index).copied().flatten()
    }

    pub fn is_present(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Number of periods the entity has a record in
    pub fn present_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn slots(&self) -> &[Option<Category>] {
        &self.slots
    }
}

/// Timelines for the union of all entity ids, in id order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineSet {
    periods: PeriodSequence,
    timelines: BTreeMap<String, Timeline>,
}

impl TimelineSet {
    pub fn get(&self, entity_id: &str) -> Option<&Timeline> {
        self.timelines.get(entity_id)
    }

    /// Category of an entity at a period, None if the entity or the record is missing
    pub fn category_at(&self, entity_id: &str, period: Period) -> Option<Category> {
        let index = self.periods.position(period)?;
        self.timelines.get(entity_id)?.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Timeline)> {
        self.timelines.iter().map(|(id, t)| (id.as_str(), t))
    }

    pub fn periods(&self) -> &PeriodSequence {
        &self.periods
    }

    /// Number of entities with a record at a period position
    pub fn present_at(&self, index: usize) -> usize {
        self.timelines.values().filter(|t| t.is_present(index)).count()
    }

    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }
}

// ============================================================================
// RESOLVE REPORT
// ============================================================================

/// Data-quality counters collected while resolving
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReport {
    pub records_seen: usize,
    pub duplicates_dropped: usize,

    /// Non-blank raw values that matched no closed category
    pub unrecognized: usize,

    /// Blank raw values (resolved to the sentinel)
    pub blank: usize,

    pub entities: usize,
    pub entities_per_period: Vec<(Period, usize)>,
}

impl ResolveReport {
    pub fn summary(&self) -> String {
        format!(
            "{} records, {} entities, {} duplicates dropped, {} unrecognized, {} blank",
            self.records_seen, self.entities, self.duplicates_dropped, self.unrecognized, self.blank
        )
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct TimelineResolver<'a> {
    periods: &'a PeriodSequence,
    categories: &'a CategorySet,
}

impl<'a> TimelineResolver<'a> {
    pub fn new(periods: &'a PeriodSequence, categories: &'a CategorySet) -> Self {
        TimelineResolver { periods, categories }
    }

    /// Resolve all batches into timelines.
    ///
    /// Fails only when a batch cites a period outside the declared sequence.
    /// Batches citing the same period are read as one stream, so the first
    /// record for an entity in that period wins across them.
    pub fn resolve(&self, batches: &[PeriodRecords]) -> FlowResult<(TimelineSet, ResolveReport)> {
        // Check every batch before touching any record
        let positions = batches
            .iter()
            .map(|batch| {
                self.periods
                    .position(batch.period)
                    .ok_or_else(|| FlowError::UndeclaredPeriod {
                        period: batch.period,
                        declared: self.periods.as_slice().to_vec(),
                    })
            })
            .collect::<FlowResult<Vec<usize>>>()?;

        let period_count = self.periods.len();
        let mut timelines: BTreeMap<String, Timeline> = BTreeMap::new();
        let mut report = ResolveReport::default();

        for (batch, index) in batches.iter().zip(positions) {
            let mut dropped_here = 0usize;

            for record in &batch.records {
                report.records_seen += 1;

                let timeline = timelines
                    .entry(record.entity_id.clone())
                    .or_insert_with(|| Timeline::absent(period_count));

                if timeline.slots[index].is_some() {
                    dropped_here += 1;
                    continue;
                }

                let category = self.categories.normalize(&record.raw_category);
                if category.is_sentinel() {
                    if record.raw_category.trim().is_empty() {
                        report.blank += 1;
                    } else {
                        report.unrecognized += 1;
                    }
                }
                timeline.slots[index] = Some(category);
            }

            report.duplicates_dropped += dropped_here;
            debug!(
                period = %batch.period,
                records = batch.records.len(),
                duplicates = dropped_here,
                "resolved period batch"
            );
        }

        report.entities = timelines.len();
        report.entities_per_period = self
            .periods
            .iter()
            .enumerate()
            .map(|(i, p)| (p, timelines.values().filter(|t| t.is_present(i)).count()))
            .collect();

        info!("Resolved timelines: {}", report.summary());

        Ok((
            TimelineSet {
                periods: self.periods.clone(),
                timelines,
            },
            report,
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
