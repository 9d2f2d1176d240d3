#![forbid(unsafe_code)]

//! Work plan: the cross product of search terms and duration classes, cut into
//! batches that are bound to rotation groups by position.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sink::output_file_name;

pub const DEFAULT_QUERIES_PER_BATCH: usize = 10;

/// Upstream `videoDuration` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationClass {
    Any,
    Short,
    Medium,
    Long,
}

impl DurationClass {
    pub const DEFAULTS: [DurationClass; 2] = [DurationClass::Medium, DurationClass::Long];

    pub fn as_str(self) -> &'static str {
        match self {
            DurationClass::Any => "any",
            DurationClass::Short => "short",
            DurationClass::Medium => "medium",
            DurationClass::Long => "long",
        }
    }
}

impl fmt::Display for DurationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurationClass {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(DurationClass::Any),
            "short" => Ok(DurationClass::Short),
            "medium" => Ok(DurationClass::Medium),
            "long" => Ok(DurationClass::Long),
            _ => bail!("unknown duration class: {value}"),
        }
    }
}

/// One `(query, duration class)` unit of crawl work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchUnit {
    pub query: String,
    pub duration: DurationClass,
}

impl SearchUnit {
    pub fn new(query: impl Into<String>, duration: DurationClass) -> Self {
        Self {
            query: query.into(),
            duration,
        }
    }
}

impl fmt::Display for SearchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.query, self.duration)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkBatch {
    pub index: usize,
    /// Rotation group serving this batch, `index mod group_count`.
    pub group_index: usize,
    pub queries: Vec<String>,
    pub durations: Vec<DurationClass>,
}

impl WorkBatch {
    /// Units in crawl order: every duration class of a query before the next
    /// query.
    pub fn units(&self) -> impl Iterator<Item = SearchUnit> + '_ {
        self.queries.iter().flat_map(move |query| {
            self.durations
                .iter()
                .map(move |duration| SearchUnit::new(query.clone(), *duration))
        })
    }
}

/// A search unit tagged with where it sits in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
    pub batch_index: usize,
    pub group_index: usize,
    pub unit: SearchUnit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPlan {
    batches: Vec<WorkBatch>,
}

impl WorkPlan {
    pub fn batches(&self) -> &[WorkBatch] {
        &self.batches
    }

    pub fn units(&self) -> Vec<PlannedUnit> {
        self.batches
            .iter()
            .flat_map(|batch| {
                batch.units().map(|unit| PlannedUnit {
                    batch_index: batch.index,
                    group_index: batch.group_index,
                    unit,
                })
            })
            .collect()
    }

    /// Pairs of units whose batches would land in the same output file; the
    /// later unit of each pair overwrites the earlier one.
    pub fn file_name_collisions(&self) -> Vec<(SearchUnit, SearchUnit)> {
        let mut first_by_name: HashMap<String, SearchUnit> = HashMap::new();
        let mut collisions = Vec::new();
        for planned in self.units() {
            let name = output_file_name(&planned.unit);
            match first_by_name.get(&name) {
                Some(first) => collisions.push((first.clone(), planned.unit)),
                None => {
                    first_by_name.insert(name, planned.unit);
                }
            }
        }
        collisions
    }

    pub fn unit_count(&self) -> usize {
        self.batches
            .iter()
            .map(|batch| batch.queries.len() * batch.durations.len())
            .sum()
    }
}

/// Builds the plan. Blank queries are skipped; everything else keeps its input
/// order, duplicates included.
pub fn build_plan(
    queries: &[String],
    durations: &[DurationClass],
    queries_per_batch: usize,
    group_count: usize,
) -> Result<WorkPlan> {
    if queries_per_batch == 0 {
        bail!("queries per batch must be at least 1");
    }
    if group_count == 0 {
        bail!("at least one rotation group is required");
    }
    if durations.is_empty() {
        bail!("at least one duration class is required");
    }

    let queries: Vec<String> = queries
        .iter()
        .map(|query| query.trim())
        .filter(|query| !query.is_empty())
        .map(str::to_string)
        .collect();

    let batches = queries
        .chunks(queries_per_batch)
        .enumerate()
        .map(|(index, chunk)| WorkBatch {
            index,
            group_index: index % group_count,
            queries: chunk.to_vec(),
            durations: durations.to_vec(),
        })
        .collect();
    let plan = WorkPlan { batches };
    for (first, later) in plan.file_name_collisions() {
        warn!(
            first = %first,
            later = %later,
            file = %output_file_name(&later),
            "units share an output file; the later batch overwrites the earlier"
        );
    }
    Ok(plan)
}
