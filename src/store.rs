// The JSON files written here are the only interface to the map frontend, and the only state
// shared between pipeline stages. Stages run one after another, each loading the file, doing its
// work and writing the file back.

use crate::{
    merge,
    models::{Record, Summary},
};
use anyhow::{Context, Result};
use chrono::Utc;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, trace, warn};

static RECORDS_FILE: &str = "burgers.json";
static SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn records_path(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    /// Load persisted records. A missing file is an empty snapshot.
    pub fn load(&self) -> Result<Vec<Record>> {
        let path = self.records_path();
        if !path.exists() {
            debug!(path = %path.display(), "No data file yet");
            return Ok(Vec::new());
        }
        let f = BufReader::new(
            File::open(&path).with_context(|| format!("failed to open {}", path.display()))?,
        );
        let records: Vec<Record> = serde_json::from_reader(f)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        trace!("Loaded {} records", records.len());
        Ok(records)
    }

    /// Like [`Store::load`], but a file that can't be read is logged and treated as empty, so a
    /// fresh scrape is able to replace it.
    pub fn load_or_empty(&self) -> Vec<Record> {
        self.load().unwrap_or_else(|err| {
            warn!(err = %err, "Could not load existing data, starting from scratch");
            Vec::new()
        })
    }

    /// Write all records, sorted, with duplicates of the same key removed (first one wins), and
    /// recompute the summary.
    pub fn save(&self, records: Vec<Record>) -> Result<Summary> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let mut seen = HashSet::new();
        let mut records: Vec<Record> = records
            .into_iter()
            .filter(|r| seen.insert((r.restaurant_name.clone(), r.burger_name.clone())))
            .collect();
        merge::sort_records(&mut records);

        write_json(&self.records_path(), &records)?;

        let summary = Summary::from_records(&records, Utc::now());
        write_json(&self.summary_path(), &summary)?;
        debug!(
            total = summary.total_restaurants,
            geocoded = summary.geocoded_restaurants,
            "Saved records and summary"
        );
        Ok(summary)
    }

    /// Re-read the persisted file and replace the records that have an updated version in
    /// `updates`, keeping everything else as is.
    pub fn update(&self, updates: &[Record]) -> Result<Summary> {
        let current = self.load()?;
        self.save(merge::apply_updates(current, updates))
    }

    /// Copy the current data file to a timestamped sibling
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        let path = self.records_path();
        if !path.exists() {
            return Ok(None);
        }
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".backup.{}", Utc::now().timestamp_millis()));
        let backup = PathBuf::from(name);
        fs::copy(&path, &backup)
            .with_context(|| format!("failed to back up {}", path.display()))?;
        Ok(Some(backup))
    }
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    // write next to the target and rename, so readers never see a half written file
    let tmp = path.with_extension("json.tmp");
    {
        let mut f = BufWriter::new(
            File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?,
        );
        serde_json::to_writer_pretty(&mut f, value)?;
        f.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
