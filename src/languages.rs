use crate::config::EXTENDED_QUERY_TIMEOUT_SECS;
use crate::db::Connector;
use crate::mapping::DbMapping;
use crate::processor;
use crate::queries;
use crate::state::StateManager;
use crate::store::{self, OutputLayout};
use crate::workflow::{RunOptions, Step};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-language outcome, recorded in the step's partial checkpoint so a
/// resumed run picks up after the last finished language.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageStats {
    pub editors: usize,
    pub edits: u64,
}

/// Step artifact: which languages produced tallies and which were skipped.
/// The tallies themselves live in `editors/{lang}.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LanguagesArtifact {
    pub processed: BTreeMap<String, LanguageStats>,
    pub skipped: Vec<String>,
}

/// Step 2: run the editors query for every selected language, one language
/// at a time, checkpointing after each so an interrupted run resumes at the
/// next unfinished language.
pub fn run(
    connector: &dyn Connector,
    mapping: &DbMapping,
    layout: &OutputLayout,
    state: &mut StateManager,
    opts: &RunOptions,
) -> Result<LanguagesArtifact> {
    info!("Step 2: Processing editor statistics by language");

    let available = store::available_languages(&layout.languages_dir())?;
    let selected = select_languages(&available, opts.languages.as_deref());
    info!(languages = selected.len(), "Languages selected");

    let mut skipped = Vec::new();
    let mut gathered: Vec<(String, Vec<String>)> = Vec::new();
    for lang in &selected {
        match store::try_load_language_titles(layout, lang)? {
            Some(titles) => gathered.push((lang.clone(), titles)),
            None => {
                warn!(language = %lang, "No title list on disk, skipping");
                skipped.push(lang.clone());
            }
        }
    }

    if opts.sort_descending {
        // Largest languages first: they are the slowest and most
        // failure-prone, so their problems surface early in the run.
        gathered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    }

    let step = Step::ProcessLanguages.number();
    let mut processed: BTreeMap<String, LanguageStats> = match state.get_partial_data(step) {
        Some(value) => serde_json::from_value(value.clone())
            .context("Corrupt partial data for the process-languages step")?,
        None => BTreeMap::new(),
    };
    if !processed.is_empty() {
        info!(done = processed.len(), "Resuming mid-step from partial checkpoint");
    }

    let bar = progress_bar(gathered.len() as u64);
    for (index, (lang, titles)) in gathered.iter().enumerate() {
        if processed.contains_key(lang) {
            debug!(language = %lang, "Already processed in a previous attempt");
            bar.inc(1);
            continue;
        }

        info!(
            language = %lang,
            position = index + 1,
            total = gathered.len(),
            titles = titles.len(),
            "Processing language"
        );

        if titles.is_empty() && !queries::uses_direct_query(lang) {
            warn!(language = %lang, "Empty title list, skipping");
            skipped.push(lang.clone());
            bar.inc(1);
            continue;
        }

        let mut target = mapping.target(lang);
        if queries::uses_direct_query(lang) {
            // The project-scoped queries scan far more rows than any batch.
            target = target.with_read_timeout(Duration::from_secs(EXTENDED_QUERY_TIMEOUT_SECS));
        }

        let tally = processor::process_language(
            connector,
            &target,
            lang,
            titles,
            &opts.year,
            opts.batch_size,
        )
        .with_context(|| format!("Failed to process language '{lang}'"))?;

        store::save_editor_counts(layout, lang, &tally)?;
        processed.insert(
            lang.clone(),
            LanguageStats {
                editors: tally.len(),
                edits: tally.total_edits(),
            },
        );
        state.set_partial_data(step, serde_json::to_value(&processed)?)?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    info!(
        processed = processed.len(),
        skipped = skipped.len(),
        "Step 2 complete"
    );

    Ok(LanguagesArtifact { processed, skipped })
}

fn select_languages(available: &[String], requested: Option<&[String]>) -> Vec<String> {
    match requested {
        Some(requested) => {
            let selected: Vec<String> = requested
                .iter()
                .filter(|lang| available.contains(lang))
                .cloned()
                .collect();
            if selected.len() < requested.len() {
                let missing: Vec<&String> = requested
                    .iter()
                    .filter(|lang| !available.contains(lang))
                    .collect();
                warn!(?missing, "Requested languages not found");
            }
            selected
        }
        None => available.to_vec(),
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("    {spinner:.cyan} Languages [{bar:30.cyan/blue}] {pos}/{len}")
            .unwrap()
            .progress_chars("=> "),
    );
    bar
}
