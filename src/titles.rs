use crate::db::{row_str, Connector, Row};
use crate::mapping::DbMapping;
use crate::queries;
use crate::reports;
use crate::store::{self, OutputLayout};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Step artifact: the shape of the retrieved title set. The title lists
/// themselves live in `languages/{lang}.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TitlesArtifact {
    pub languages: usize,
    pub rows: usize,
    pub titles_per_language: BTreeMap<String, usize>,
}

/// Step 1: fetch the project's articles and their language links from the
/// English edition, then fan the titles out into per-language files.
pub fn run(
    connector: &dyn Connector,
    mapping: &DbMapping,
    layout: &OutputLayout,
) -> Result<TitlesArtifact> {
    info!("Step 1: Retrieving project article titles");

    let target = mapping.target("en");
    let mut replica = connector.connect(&target)?;
    let rows = replica.query(&queries::titles_query(), &[])?;
    info!(rows = rows.len(), "Retrieved article-language pairs");

    store::save_raw_title_rows(layout, &rows)?;

    let titles_by_language = organize_titles_by_language(&rows);
    for (lang, titles) in &titles_by_language {
        store::save_language_titles(layout, lang, titles)?;
    }

    let titles_per_language: BTreeMap<String, usize> = titles_by_language
        .iter()
        .map(|(lang, titles)| (lang.clone(), titles.len()))
        .collect();

    let summary = reports::render_titles_summary(&titles_per_language);
    store::write_text(
        &layout.reports_dir().join("language_titles_summary.wiki"),
        &summary,
    )?;

    info!(
        languages = titles_by_language.len(),
        rows = rows.len(),
        "Step 1 complete"
    );

    Ok(TitlesArtifact {
        languages: titles_by_language.len(),
        rows: rows.len(),
        titles_per_language,
    })
}

/// Language links map straight through; English titles come from the page
/// column and are deduplicated, since every language link repeats them.
fn organize_titles_by_language(rows: &[Row]) -> BTreeMap<String, Vec<String>> {
    let mut titles: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut en_titles: BTreeSet<String> = BTreeSet::new();

    for row in rows {
        let lang = row_str(row, "ll_lang");
        let title = row_str(row, "ll_title");
        if !lang.is_empty() && !title.is_empty() {
            titles
                .entry(lang.to_string())
                .or_default()
                .push(title.to_string());
        }

        let en_title = row_str(row, "page_title");
        if !en_title.is_empty() {
            en_titles.insert(en_title.to_string());
        }
    }

    titles.insert("en".to_string(), en_titles.into_iter().collect());
    titles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;

    fn link_row(page_title: &str, ll_lang: &str, ll_title: &str) -> Row {
        let mut row = Row::default();
        row.insert(
            "page_title".to_string(),
            SqlValue::Text(page_title.to_string()),
        );
        row.insert("ll_lang".to_string(), SqlValue::Text(ll_lang.to_string()));
        row.insert("ll_title".to_string(), SqlValue::Text(ll_title.to_string()));
        row
    }

    #[test]
    fn language_links_group_by_language() {
        let rows = vec![
            link_row("Medicine", "fr", "Médecine"),
            link_row("Medicine", "de", "Medizin"),
            link_row("Vaccine", "fr", "Vaccin"),
        ];

        let organized = organize_titles_by_language(&rows);

        assert_eq!(organized["fr"], vec!["Médecine", "Vaccin"]);
        assert_eq!(organized["de"], vec!["Medizin"]);
    }

    #[test]
    fn english_titles_deduplicate_across_link_rows() {
        let rows = vec![
            link_row("Medicine", "fr", "Médecine"),
            link_row("Medicine", "de", "Medizin"),
            link_row("Medicine", "ar", "طب"),
        ];

        let organized = organize_titles_by_language(&rows);
        assert_eq!(organized["en"], vec!["Medicine"]);
    }

    #[test]
    fn pages_without_langlinks_still_count_for_english() {
        // LEFT JOIN yields null link columns for untranslated pages.
        let mut row = Row::default();
        row.insert(
            "page_title".to_string(),
            SqlValue::Text("Rare_disease".to_string()),
        );
        row.insert("ll_lang".to_string(), SqlValue::Null);
        row.insert("ll_title".to_string(), SqlValue::Null);

        let organized = organize_titles_by_language(&[row]);

        assert_eq!(organized["en"], vec!["Rare_disease"]);
        assert_eq!(organized.len(), 1);
    }
}
