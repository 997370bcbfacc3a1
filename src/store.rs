use crate::config::{
    EDITORS_DIR, LANGUAGES_DIR, OUTBOX_DIR, REPORTS_DIR, SQL_RESULTS_DIR, STATE_FILE,
};
use crate::db::Row;
use crate::tally::EditorTally;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory layout for one run's artifacts and state.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn languages_dir(&self) -> PathBuf {
        self.root.join(LANGUAGES_DIR)
    }

    pub fn editors_dir(&self) -> PathBuf {
        self.root.join(EDITORS_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join(REPORTS_DIR)
    }

    pub fn sql_results_dir(&self) -> PathBuf {
        self.root.join(SQL_RESULTS_DIR)
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.root.join(OUTBOX_DIR)
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.languages_dir(),
            self.editors_dir(),
            self.reports_dir(),
            self.sql_results_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }
        Ok(())
    }
}

/// Writes JSON through a temp file and rename so readers never observe a
/// half-written artifact.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", tmp_path))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, value)
        .with_context(|| format!("Failed to serialize: {:?}", path))?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temp file to: {:?}", path))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open: {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON: {:?}", path))
}

pub fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    fs::write(path, text).with_context(|| format!("Failed to write: {:?}", path))
}

pub fn save_language_titles(layout: &OutputLayout, lang: &str, titles: &[String]) -> Result<()> {
    let path = layout.languages_dir().join(format!("{lang}.json"));
    write_json_atomic(&path, &titles)?;
    debug!(language = lang, titles = titles.len(), "Saved language titles");
    Ok(())
}

/// `Ok(None)` when no title list was retrieved for the language.
pub fn try_load_language_titles(layout: &OutputLayout, lang: &str) -> Result<Option<Vec<String>>> {
    let path = layout.languages_dir().join(format!("{lang}.json"));
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(read_json(&path)?))
}

/// Language codes with saved `.json` artifacts in `dir`, sorted.
pub fn available_languages(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut languages = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list: {:?}", dir))? {
        let entry = entry.with_context(|| format!("Failed to read entry in: {:?}", dir))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(lang) = name.strip_suffix(".json") {
            languages.push(lang.to_string());
        }
    }
    languages.sort();
    Ok(languages)
}

pub fn save_editor_counts(layout: &OutputLayout, lang: &str, tally: &EditorTally) -> Result<()> {
    let path = layout.editors_dir().join(format!("{lang}.json"));
    write_json_atomic(&path, tally)?;
    debug!(language = lang, editors = tally.len(), "Saved editor counts");
    Ok(())
}

pub fn try_load_editor_counts(layout: &OutputLayout, lang: &str) -> Result<Option<EditorTally>> {
    let path = layout.editors_dir().join(format!("{lang}.json"));
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(read_json(&path)?))
}

pub fn save_db_mapping(layout: &OutputLayout, entries: &FxHashMap<String, String>) -> Result<()> {
    let path = layout.sql_results_dir().join("db_mapping.json");
    write_json_atomic(&path, entries)?;
    debug!(entries = entries.len(), "Saved database mapping");
    Ok(())
}

/// `Ok(None)` when the mapping has not been fetched yet.
pub fn try_load_db_mapping(layout: &OutputLayout) -> Result<Option<FxHashMap<String, String>>> {
    let path = layout.sql_results_dir().join("db_mapping.json");
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(read_json(&path)?))
}

/// Raw title rows as returned by the replica, kept for diagnosis.
pub fn save_raw_title_rows(layout: &OutputLayout, rows: &[Row]) -> Result<()> {
    let path = layout.sql_results_dir().join("medicine_titles.json");
    write_json_atomic(&path, &rows)?;
    debug!(rows = rows.len(), "Saved raw title rows");
    Ok(())
}
