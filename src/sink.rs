#![forbid(unsafe_code)]

//! CSV persistence, one file per search unit.
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written batch. A unit with no records still gets a
//! header-only file, which distinguishes "ran, found nothing" from "never ran".

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use crate::metadata::VideoRecord;
use crate::plan::SearchUnit;

pub const DEFAULT_OUTPUT_DIR: &str = "output";
const OUTPUT_EXTENSION: &str = "csv";
#[cfg(unix)]
const OUTPUT_MODE: u32 = 0o644;

/// `Cooking Recipes` + `medium` → `Cooking_Recipes_medium.csv`.
///
/// Whitespace and characters that are unsafe in file names become `_`;
/// everything else, including non-ASCII letters, is kept.
pub fn output_file_name(unit: &SearchUnit) -> String {
    let stem: String = unit
        .query
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_whitespace()
                || ch.is_control()
                || matches!(ch, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else {
                ch
            }
        })
        .collect();
    format!("{stem}_{}.{OUTPUT_EXTENSION}", unit.duration)
}

#[derive(Debug, Clone)]
pub struct BatchSink {
    dir: PathBuf,
}

impl BatchSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the output directory. Safe to call repeatedly.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| format!("creating {}", self.dir.display()))
    }

    pub fn path_for(&self, unit: &SearchUnit) -> PathBuf {
        self.dir.join(output_file_name(unit))
    }

    /// Writes `records` for `unit`, replacing any earlier file with the same
    /// name.
    pub fn write(&self, unit: &SearchUnit, records: &[VideoRecord]) -> Result<PathBuf> {
        self.prepare()?;
        let path = self.path_for(unit);
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("creating temporary file in {}", self.dir.display()))?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer
                .write_record(VideoRecord::COLUMNS)
                .context("writing CSV header")?;
            for record in records {
                writer
                    .serialize(record)
                    .with_context(|| format!("writing record {}", record.video_id))?;
            }
            writer.flush().context("flushing CSV batch")?;
        }
        // Temporary files are created owner-only; batches are shared output.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tmp.as_file().metadata()?.permissions();
            perms.set_mode(OUTPUT_MODE);
            tmp.as_file()
                .set_permissions(perms)
                .with_context(|| format!("setting permissions on {}", path.display()))?;
        }
        tmp.persist(&path)
            .with_context(|| format!("persisting {}", path.display()))?;
        Ok(path)
    }
}
