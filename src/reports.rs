use crate::config::REPORT_RANK_LIMIT;
use crate::store::{self, OutputLayout};
use crate::tally::{aggregate_global, best_languages, display_name, EditorTally};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Step artifact: how many reports were rendered.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportsArtifact {
    pub language_reports: usize,
    pub global_report: bool,
}

/// Step 3: render per-language and global wikitext reports from the tallies
/// step 2 saved to disk.
pub fn run(layout: &OutputLayout, year: &str) -> Result<ReportsArtifact> {
    info!("Step 3: Generating reports");

    let languages = store::available_languages(&layout.editors_dir())?;
    let mut all: BTreeMap<String, EditorTally> = BTreeMap::new();

    for lang in &languages {
        let Some(tally) = store::try_load_editor_counts(layout, lang)? else {
            continue;
        };
        let article_count = store::try_load_language_titles(layout, lang)?.map(|t| t.len());

        let text = render_language_report(lang, &tally, year, article_count);
        store::write_text(&layout.reports_dir().join(format!("{lang}.wiki")), &text)?;
        info!(language = %lang, "Generated language report");

        all.insert(lang.clone(), tally);
    }

    let global = render_global_report(&all, year);
    store::write_text(&layout.reports_dir().join("total_report.wiki"), &global)?;
    info!(language_reports = all.len(), "Step 3 complete");

    Ok(ReportsArtifact {
        language_reports: all.len(),
        global_report: true,
    })
}

/// Thousands separator, matching the published report format.
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Top editors of one language edition as a sortable wikitext table.
pub fn render_language_report(
    lang: &str,
    tally: &EditorTally,
    year: &str,
    article_count: Option<usize>,
) -> String {
    let mut text = String::new();
    text.push_str("{{:WPM:WikiProject Medicine/Total medical articles}}\n");
    text.push_str(&format!("{{{{Top medical editors by lang|{year}}}}}\n"));

    // The Arabic report carries no article-count line; its query is not
    // title-scoped, so the number would be misleading.
    if lang != "ar" {
        if let Some(count) = article_count {
            text.push_str(&format!(
                "Numbers of {year}. There are {} articles in {lang}\n",
                format_count(count as u64)
            ));
        }
    }

    text.push_str("{| class=\"sortable wikitable\"\n!#\n!User\n!Count\n|-");
    for (rank, (editor, count)) in tally
        .ranked()
        .into_iter()
        .take(REPORT_RANK_LIMIT)
        .enumerate()
    {
        let user = display_name(editor);
        text.push_str(&format!(
            "\n|-\n!{}\n|[[:w:{lang}:user:{user}|{user}]]\n|{}",
            rank + 1,
            format_count(count)
        ));
    }
    text.push_str("\n|}");
    text
}

/// Global report: the top editors by total count across all editions, each
/// shown with their best-represented wiki and their count there.
pub fn render_global_report(all: &BTreeMap<String, EditorTally>, year: &str) -> String {
    let global = aggregate_global(all);
    let best = best_languages(all);

    let mut entries: Vec<(String, String, u64)> = global
        .ranked()
        .into_iter()
        .take(REPORT_RANK_LIMIT)
        .filter_map(|(editor, _total)| {
            best.get(editor)
                .map(|(site, count)| (editor.to_string(), site.clone(), *count))
        })
        .collect();
    entries.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    let mut text = String::new();
    text.push_str("{{:WPM:WikiProject Medicine/Total medical articles}}\n");
    text.push_str(&format!("{{{{Top medical editors by lang|{year}}}}}\n"));
    text.push_str(&format!("Numbers of {year}.\n"));

    let mut table = String::from("{| class=\"sortable wikitable\"\n!#\n!User\n!Count\n!Wiki\n");
    let mut targets = String::new();
    for (rank, (editor, site, count)) in entries.iter().enumerate() {
        let user = display_name(editor);
        targets.push_str(&format!("#{{{{#target:User:{user}|{site}.wikipedia.org}}}}\n"));
        table.push_str(&format!(
            "|-\n!{}\n|[[:w:{site}:user:{user}|{user}]]\n|{}\n|{site}\n",
            rank + 1,
            format_count(*count)
        ));
        // The published list stops once counts drop to single digits.
        if *count < 10 {
            break;
        }
    }
    table.push_str("\n|}");

    text.push_str("{| class=\"sortable wikitable floatright\"\n|\n");
    text.push_str(
        "<div style=\"max-height:250px; overflow: auto;vertical-align:top;font-size:90%;max-width:400px\">\n",
    );
    text.push_str("<pre>\n");
    text.push_str(&targets);
    text.push_str("\n</pre>");
    text.push_str("\n</div>");
    text.push_str("\n|-\n|}");
    text.push_str(&format!("\n==users==\n{table}"));
    text
}

/// Per-language title counts as a wikitext table, largest first.
pub fn render_titles_summary(counts: &BTreeMap<String, usize>) -> String {
    let mut ordered: Vec<(&String, &usize)> = counts.iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut text = String::from(
        "Language Titles Summary:\n{| class=\"wikitable\"\n! Language !! Number of Titles\n",
    );
    for (lang, count) in ordered {
        text.push_str(&format!(
            "|-\n| [https://{lang}.wikipedia.org/wiki/ {lang}] || {count}\n"
        ));
    }
    text.push_str("|}\n");
    text
}
