//! End-to-end workflow tests over a scripted replica and a recording
//! publisher: full runs, resume after failure, skip and force directives,
//! and dependency enforcement.

use icarus::db::{Connector, DbError, DbTarget, Replica, Row, SqlValue};
use icarus::state::StateManager;
use icarus::store::{self, OutputLayout};
use icarus::upload::Publisher;
use icarus::workflow::{Orchestrator, RunOptions, Step};
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

#[derive(Default)]
struct ScriptState {
    queries: Vec<(String, Vec<String>, String)>,
    fail_param_marker: Option<String>,
}

#[derive(Clone)]
struct MockConnector {
    state: Rc<RefCell<ScriptState>>,
}

impl MockConnector {
    fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ScriptState::default())),
        }
    }

    fn failing_on(marker: &str) -> Self {
        let connector = Self::new();
        connector.state.borrow_mut().fail_param_marker = Some(marker.to_string());
        connector
    }

    fn query_count(&self) -> usize {
        self.state.borrow().queries.len()
    }

    fn editors_queries(&self) -> Vec<(String, Vec<String>, String)> {
        self.state
            .borrow()
            .queries
            .iter()
            .filter(|(sql, _, _)| sql.contains("actor_name"))
            .cloned()
            .collect()
    }
}

struct MockReplica {
    state: Rc<RefCell<ScriptState>>,
    database: String,
}

impl Connector for MockConnector {
    fn connect(&self, target: &DbTarget) -> Result<Box<dyn Replica>, DbError> {
        Ok(Box::new(MockReplica {
            state: Rc::clone(&self.state),
            database: target.database.clone(),
        }))
    }
}

impl Replica for MockReplica {
    fn query(&mut self, sql: &str, params: &[String]) -> Result<Vec<Row>, DbError> {
        let mut state = self.state.borrow_mut();
        state
            .queries
            .push((sql.to_string(), params.to_vec(), self.database.clone()));

        if let Some(marker) = &state.fail_param_marker {
            if params.iter().any(|p| p == marker) {
                return Err(DbError::Transient("connection reset by peer".into()));
            }
        }

        if sql.contains("langlinks") {
            Ok(title_rows())
        } else if sql.contains("FROM wiki") {
            Ok(mapping_rows())
        } else {
            Ok(editor_rows())
        }
    }
}

fn text_row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), SqlValue::Text(v.to_string())))
        .collect()
}

fn title_rows() -> Vec<Row> {
    vec![
        text_row(&[
            ("page_title", "Medicine"),
            ("ll_lang", "fr"),
            ("ll_title", "Médecine"),
        ]),
        text_row(&[
            ("page_title", "Medicine"),
            ("ll_lang", "de"),
            ("ll_title", "Medizin"),
        ]),
        text_row(&[
            ("page_title", "Vaccine"),
            ("ll_lang", "fr"),
            ("ll_title", "Vaccin"),
        ]),
    ]
}

fn mapping_rows() -> Vec<Row> {
    vec![
        text_row(&[
            ("lang", "en"),
            ("dbname", "enwiki"),
            ("url", "https://en.wikipedia.org"),
        ]),
        text_row(&[
            ("lang", "fr"),
            ("dbname", "frwiki"),
            ("url", "https://fr.wikipedia.org"),
        ]),
        text_row(&[
            ("lang", "de"),
            ("dbname", "dewiki"),
            ("url", "https://de.wikipedia.org"),
        ]),
    ]
}

fn editor_rows() -> Vec<Row> {
    let mut alice = Row::default();
    alice.insert("actor_name".to_string(), SqlValue::Text("Alice".into()));
    alice.insert("count".to_string(), SqlValue::Int(10));

    let mut anon = Row::default();
    anon.insert("actor_name".to_string(), SqlValue::Text("192.0.2.1".into()));
    anon.insert("count".to_string(), SqlValue::Int(5));

    let mut bot = Row::default();
    bot.insert("actor_name".to_string(), SqlValue::Text("CleanupBot".into()));
    bot.insert("count".to_string(), SqlValue::Int(7));

    vec![alice, anon, bot]
}

#[derive(Clone, Default)]
struct RecordingPublisher {
    published: Rc<RefCell<Vec<String>>>,
}

impl RecordingPublisher {
    fn pages(&self) -> Vec<String> {
        self.published.borrow().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn exists(&mut self, page: &str) -> anyhow::Result<bool> {
        Ok(self.published.borrow().iter().any(|p| p == page))
    }

    fn publish(&mut self, page: &str, _text: &str, _summary: &str) -> anyhow::Result<()> {
        self.published.borrow_mut().push(page.to_string());
        Ok(())
    }
}

fn orchestrator_in(
    dir: &TempDir,
    connector: &MockConnector,
    publisher: &RecordingPublisher,
) -> Orchestrator {
    let layout = OutputLayout::new(dir.path());
    let state = StateManager::load(layout.state_file()).unwrap();
    Orchestrator::new(
        layout,
        state,
        Box::new(connector.clone()),
        Box::new(publisher.clone()),
    )
}

fn options() -> RunOptions {
    RunOptions {
        year: "2024".to_string(),
        ..RunOptions::default()
    }
}

#[test]
fn full_workflow_completes_and_checkpoints_every_step() {
    let dir = TempDir::new().unwrap();
    let connector = MockConnector::new();
    let publisher = RecordingPublisher::default();
    let layout = OutputLayout::new(dir.path());

    let mut orchestrator = orchestrator_in(&dir, &connector, &publisher);
    orchestrator.run(&options()).unwrap();

    let state = StateManager::load(layout.state_file()).unwrap();
    assert!(state.is_step_completed(1));
    assert!(state.is_step_completed(2));
    assert!(state.is_step_completed(3));
    assert!(state.is_step_completed(4));
    assert_eq!(state.get_resume_point(), 5);
    assert!(state.state().errors.is_empty());
    assert!(state.get_partial_data(2).is_none());

    // Step 1 artifacts: one title file per language.
    let en_titles = store::try_load_language_titles(&layout, "en").unwrap().unwrap();
    assert_eq!(en_titles, vec!["Medicine", "Vaccine"]);
    let fr_titles = store::try_load_language_titles(&layout, "fr").unwrap().unwrap();
    assert_eq!(fr_titles, vec!["Médecine", "Vaccin"]);

    // Step 2 artifacts: IP and bot rows never reach a tally.
    let en_tally = store::try_load_editor_counts(&layout, "en").unwrap().unwrap();
    assert_eq!(en_tally.get("Alice"), 10);
    assert_eq!(en_tally.len(), 1);

    // English uses the direct project-scoped query: year only, no titles.
    let editors = connector.editors_queries();
    let en_query = editors.iter().find(|(_, _, db)| db == "enwiki_p").unwrap();
    assert_eq!(en_query.1, vec!["2024".to_string()]);

    // French batches its two titles into one query ending with the year.
    let fr_query = editors.iter().find(|(_, _, db)| db == "frwiki_p").unwrap();
    assert_eq!(
        fr_query.1,
        vec!["Médecine".to_string(), "Vaccin".to_string(), "2024".to_string()]
    );

    // Step 3 artifacts.
    assert!(layout.reports_dir().join("fr.wiki").exists());
    assert!(layout.reports_dir().join("total_report.wiki").exists());
    let global = std::fs::read_to_string(layout.reports_dir().join("total_report.wiki")).unwrap();
    assert!(global.contains("Alice"));
    assert!(!global.contains("CleanupBot"));

    // Step 4 published the language pages and the global page.
    let pages = publisher.pages();
    assert!(pages.iter().any(|p| p.ends_with("_2024/fr")));
    assert!(pages.iter().any(|p| p.ends_with("_2024_(all)")));
}

#[test]
fn second_run_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let connector = MockConnector::new();
    let publisher = RecordingPublisher::default();

    orchestrator_in(&dir, &connector, &publisher)
        .run(&options())
        .unwrap();
    let queries_after_first = connector.query_count();
    let pages_after_first = publisher.pages().len();

    // Fresh orchestrator over the same directory: everything is checkpointed.
    orchestrator_in(&dir, &connector, &publisher)
        .run(&options())
        .unwrap();

    assert_eq!(connector.query_count(), queries_after_first);
    assert_eq!(publisher.pages().len(), pages_after_first);
}

#[test]
fn failure_mid_step_resumes_at_the_next_unfinished_language() {
    let dir = TempDir::new().unwrap();
    let layout = OutputLayout::new(dir.path());
    let publisher = RecordingPublisher::default();

    // French's batch carries "Vaccin"; fail it after English succeeds.
    // Languages process largest-first with ties in code order: en, fr, de.
    let failing = MockConnector::failing_on("Vaccin");
    let result = orchestrator_in(&dir, &failing, &publisher).run(&options());
    assert!(result.is_err());

    let state = StateManager::load(layout.state_file()).unwrap();
    assert!(state.is_step_completed(1));
    assert!(!state.is_step_completed(2));
    assert!(!state.state().errors.is_empty());
    assert_eq!(state.state().errors.last().unwrap().step, 2);

    // English finished before the failure and is in the partial checkpoint.
    let partial = state.get_partial_data(2).unwrap();
    assert!(partial.get("en").is_some());
    assert!(partial.get("fr").is_none());

    // Retry with a healthy connector: only fr and de are re-queried.
    let healthy = MockConnector::new();
    orchestrator_in(&dir, &healthy, &publisher)
        .run(&options())
        .unwrap();

    let editors = healthy.editors_queries();
    assert_eq!(editors.len(), 2);
    assert!(editors.iter().all(|(_, _, db)| db != "enwiki_p"));

    let state = StateManager::load(layout.state_file()).unwrap();
    assert!(state.is_step_completed(4));
    assert!(state.get_partial_data(2).is_none());
}

#[test]
fn skip_directives_bypass_steps_and_waive_dependencies() {
    let dir = TempDir::new().unwrap();
    let layout = OutputLayout::new(dir.path());
    let connector = MockConnector::new();
    let publisher = RecordingPublisher::default();

    let opts = RunOptions {
        skip_steps: vec![1, 2],
        ..options()
    };
    orchestrator_in(&dir, &connector, &publisher)
        .run(&opts)
        .unwrap();

    // No replica traffic at all: both data steps were skipped.
    assert_eq!(connector.query_count(), 0);

    let state = StateManager::load(layout.state_file()).unwrap();
    assert!(!state.is_step_completed(1));
    assert!(!state.is_step_completed(2));
    assert!(state.is_step_completed(3));
    assert!(state.is_step_completed(4));

    // With no tallies on disk, only the global report exists and uploads.
    assert!(layout.reports_dir().join("total_report.wiki").exists());
    assert_eq!(publisher.pages().len(), 1);
}

#[test]
fn single_step_with_unmet_dependency_is_fatal() {
    let dir = TempDir::new().unwrap();
    let layout = OutputLayout::new(dir.path());
    let connector = MockConnector::new();
    let publisher = RecordingPublisher::default();

    let mut orchestrator = orchestrator_in(&dir, &connector, &publisher);
    let result = orchestrator.run_single_step(Step::GenerateReports, &options());

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("step 2"));

    // The violation lands in the persisted error log before propagating.
    let state = StateManager::load(layout.state_file()).unwrap();
    assert_eq!(state.state().errors.len(), 1);
    assert_eq!(state.state().errors[0].step, 3);
    assert!(!state.is_step_completed(3));
}

#[test]
fn single_step_without_dependencies_runs_alone() {
    let dir = TempDir::new().unwrap();
    let layout = OutputLayout::new(dir.path());
    let connector = MockConnector::new();
    let publisher = RecordingPublisher::default();

    let mut orchestrator = orchestrator_in(&dir, &connector, &publisher);
    orchestrator
        .run_single_step(Step::RetrieveTitles, &options())
        .unwrap();

    let state = StateManager::load(layout.state_file()).unwrap();
    assert!(state.is_step_completed(1));
    assert!(!state.is_step_completed(2));
    assert!(layout.languages_dir().join("fr.json").exists());
}

#[test]
fn force_from_step_reruns_only_the_tail() {
    let dir = TempDir::new().unwrap();
    let connector = MockConnector::new();
    let publisher = RecordingPublisher::default();

    orchestrator_in(&dir, &connector, &publisher)
        .run(&options())
        .unwrap();
    let queries_after_first = connector.query_count();
    let pages_after_first = publisher.pages().len();

    let opts = RunOptions {
        force_from_step: Some(3),
        ..options()
    };
    orchestrator_in(&dir, &connector, &publisher)
        .run(&opts)
        .unwrap();

    // Reporting and upload repeat without touching the replicas.
    assert_eq!(connector.query_count(), queries_after_first);
    assert_eq!(publisher.pages().len(), pages_after_first * 2);

    let state = StateManager::load(OutputLayout::new(dir.path()).state_file()).unwrap();
    assert_eq!(state.get_resume_point(), 5);
}

#[test]
fn requested_language_filter_limits_processing() {
    let dir = TempDir::new().unwrap();
    let layout = OutputLayout::new(dir.path());
    let connector = MockConnector::new();
    let publisher = RecordingPublisher::default();

    let opts = RunOptions {
        languages: Some(vec!["fr".to_string(), "xx".to_string()]),
        skip_steps: vec![4],
        ..options()
    };
    orchestrator_in(&dir, &connector, &publisher)
        .run(&opts)
        .unwrap();

    let editors = connector.editors_queries();
    assert_eq!(editors.len(), 1);
    assert_eq!(editors[0].2, "frwiki_p");

    assert!(store::try_load_editor_counts(&layout, "fr").unwrap().is_some());
    assert!(store::try_load_editor_counts(&layout, "en").unwrap().is_none());
    assert!(publisher.pages().is_empty());
}
