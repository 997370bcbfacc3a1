use crate::config::PUBLISH_BASE_PAGE;
use crate::store::OutputLayout;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Seam for the remote wiki. The shipped implementation writes to a local
/// outbox; a MediaWiki API client plugs in here without touching the steps.
pub trait Publisher {
    fn exists(&mut self, page: &str) -> Result<bool>;
    fn publish(&mut self, page: &str, text: &str, summary: &str) -> Result<()>;
}

/// Publishes pages as files under an outbox directory, one file per page id.
pub struct OutboxPublisher {
    dir: PathBuf,
}

impl OutboxPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn page_path(&self, page: &str) -> PathBuf {
        // Page ids contain '/' and ':'; flatten to a single file name.
        let name = page.replace(['/', ':'], "_");
        self.dir.join(format!("{name}.wiki"))
    }
}

impl Publisher for OutboxPublisher {
    fn exists(&mut self, page: &str) -> Result<bool> {
        Ok(self.page_path(page).exists())
    }

    fn publish(&mut self, page: &str, text: &str, summary: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create outbox: {:?}", self.dir))?;
        let path = self.page_path(page);
        fs::write(&path, text).with_context(|| format!("Failed to write page: {:?}", path))?;
        info!(page, summary, "Published report to outbox");
        Ok(())
    }
}

/// Page id for a report page, derived from language code and year.
pub fn page_title(lang: &str, year: &str, is_global: bool) -> String {
    if is_global {
        format!("{PUBLISH_BASE_PAGE}_{year}_(all)")
    } else {
        format!("{PUBLISH_BASE_PAGE}_{year}/{lang}")
    }
}

/// Step artifact: upload statistics.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UploadArtifact {
    pub success: u32,
    pub failed: u32,
    pub total: u32,
}

/// Step 4: publish every rendered report. Per-page failures are counted and
/// logged; they do not abort the step.
pub fn run(
    publisher: &mut dyn Publisher,
    layout: &OutputLayout,
    year: &str,
) -> Result<UploadArtifact> {
    info!("Step 4: Uploading reports");

    let reports_dir = layout.reports_dir();
    if !reports_dir.exists() {
        warn!(dir = ?reports_dir, "Reports directory does not exist");
        return Ok(UploadArtifact::default());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(&reports_dir)
        .with_context(|| format!("Failed to list reports directory: {:?}", reports_dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "wiki"))
        .collect();
    files.sort();

    let mut stats = UploadArtifact {
        total: files.len() as u32,
        ..Default::default()
    };

    for path in &files {
        match upload_report(publisher, path, year) {
            Ok(()) => stats.success += 1,
            Err(e) => {
                stats.failed += 1;
                warn!("Upload failed for {:?}: {:#}", path, e);
            }
        }
    }

    if stats.failed > 0 {
        warn!(failed = stats.failed, total = stats.total, "Some uploads failed");
    }
    info!(
        success = stats.success,
        failed = stats.failed,
        total = stats.total,
        "Step 4 complete"
    );

    Ok(stats)
}

fn upload_report(publisher: &mut dyn Publisher, path: &Path, year: &str) -> Result<()> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let is_global = stem == "total_report";
    let page = page_title(&stem, year, is_global);

    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read report: {:?}", path))?;

    let summary = if is_global {
        format!("Update global medical editors statistics for {year}")
    } else {
        format!("Update {stem} medical editors statistics for {year}")
    };

    if publisher.exists(&page)? {
        info!(page, "Page exists, updating");
    } else {
        info!(page, "Page does not exist, creating");
    }
    publisher.publish(&page, &content, &summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[test]
    fn page_titles_follow_the_naming_scheme() {
        assert_eq!(
            page_title("ar", "2025", false),
            "WikiProjectMed:WikiProject_Medicine/Stats/Top_medical_editors_2025/ar"
        );
        assert_eq!(
            page_title("", "2025", true),
            "WikiProjectMed:WikiProject_Medicine/Stats/Top_medical_editors_2025_(all)"
        );
    }

    #[test]
    fn outbox_publisher_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut publisher = OutboxPublisher::new(dir.path().join("outbox"));

        let page = page_title("fr", "2024", false);
        assert!(!publisher.exists(&page).unwrap());

        publisher.publish(&page, "report body", "summary").unwrap();
        assert!(publisher.exists(&page).unwrap());
    }

    struct RecordingPublisher {
        published: Rc<RefCell<Vec<(String, String)>>>,
        fail_page_containing: Option<String>,
    }

    impl Publisher for RecordingPublisher {
        fn exists(&mut self, _page: &str) -> Result<bool> {
            Ok(false)
        }

        fn publish(&mut self, page: &str, _text: &str, summary: &str) -> Result<()> {
            if let Some(marker) = &self.fail_page_containing {
                if page.contains(marker.as_str()) {
                    anyhow::bail!("remote API error");
                }
            }
            self.published
                .borrow_mut()
                .push((page.to_string(), summary.to_string()));
            Ok(())
        }
    }

    fn seeded_layout(dir: &TempDir) -> OutputLayout {
        let layout = OutputLayout::new(dir.path());
        fs::create_dir_all(layout.reports_dir()).unwrap();
        fs::write(layout.reports_dir().join("fr.wiki"), "fr report").unwrap();
        fs::write(layout.reports_dir().join("total_report.wiki"), "global").unwrap();
        fs::write(layout.reports_dir().join("notes.txt"), "ignored").unwrap();
        layout
    }

    #[test]
    fn uploads_every_wiki_file_with_derived_pages() {
        let dir = TempDir::new().unwrap();
        let layout = seeded_layout(&dir);
        let published = Rc::new(RefCell::new(Vec::new()));
        let mut publisher = RecordingPublisher {
            published: Rc::clone(&published),
            fail_page_containing: None,
        };

        let stats = run(&mut publisher, &layout, "2024").unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failed, 0);

        let published = published.borrow();
        assert!(published
            .iter()
            .any(|(page, _)| page.ends_with("Top_medical_editors_2024/fr")));
        assert!(published
            .iter()
            .any(|(page, _)| page.ends_with("Top_medical_editors_2024_(all)")));
        assert!(published
            .iter()
            .any(|(_, summary)| summary == "Update global medical editors statistics for 2024"));
    }

    #[test]
    fn per_page_failures_do_not_abort_the_step() {
        let dir = TempDir::new().unwrap();
        let layout = seeded_layout(&dir);
        let published = Rc::new(RefCell::new(Vec::new()));
        let mut publisher = RecordingPublisher {
            published: Rc::clone(&published),
            fail_page_containing: Some("(all)".to_string()),
        };

        let stats = run(&mut publisher, &layout, "2024").unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn empty_reports_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path());
        let mut publisher = OutboxPublisher::new(dir.path().join("outbox"));

        let stats = run(&mut publisher, &layout, "2024").unwrap();
        assert_eq!(stats.total, 0);
    }
}
