use crate::config::{ANALYTICS_HOST_SUFFIX, META_DATABASE, META_HOST};
use crate::db::{row_str, Connector, DbTarget};
use crate::queries;
use crate::store::{self, OutputLayout};
use anyhow::Result;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// Language codes whose database name does not follow the `{code}wiki`
/// convention, or that the catalog lists under a different code.
const DB_NAME_EXCEPTIONS: &[(&str, &str)] = &[
    ("gsw", "alswiki"),
    ("sgs", "bat_smgwiki"),
    ("bat-smg", "bat_smgwiki"),
    ("be-tarask", "be_x_oldwiki"),
    ("bho", "bhwiki"),
    ("cbk", "cbk_zamwiki"),
    ("cbk-zam", "cbk_zamwiki"),
    ("vro", "fiu_vrowiki"),
    ("fiu-vro", "fiu_vrowiki"),
    ("map-bms", "map_bmswiki"),
    ("nds-nl", "nds_nlwiki"),
    ("nb", "nowiki"),
    ("rup", "roa_rupwiki"),
    ("roa-rup", "roa_rupwiki"),
    ("roa-tara", "roa_tarawiki"),
    ("lzh", "zh_classicalwiki"),
    ("zh-classical", "zh_classicalwiki"),
    ("nan", "zh_min_nanwiki"),
    ("zh-min-nan", "zh_min_nanwiki"),
    ("yue", "zh_yuewiki"),
    ("zh-yue", "zh_yuewiki"),
];

/// Language-to-database catalog, fetched from the metadata wiki once and
/// cached to disk. Constructed by the orchestrator and passed down; there is
/// no process-global copy.
#[derive(Debug, Clone, Default)]
pub struct DbMapping {
    entries: FxHashMap<String, String>,
}

impl DbMapping {
    pub fn from_entries(entries: FxHashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Loads the cached mapping, fetching from the metadata catalog on a
    /// cache miss and saving the result for later runs.
    pub fn load_or_fetch(layout: &OutputLayout, connector: &dyn Connector) -> Result<Self> {
        if let Some(entries) = store::try_load_db_mapping(layout)? {
            info!(entries = entries.len(), "Loaded database mapping from cache");
            return Ok(Self::from_entries(entries));
        }

        let entries = fetch_mapping(connector)?;
        store::save_db_mapping(layout, &entries)?;
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolution is total: exception table, then the catalog, then the
    /// `{code}wiki` convention. A wrong guess surfaces later as a connection
    /// failure, never as a resolution failure.
    pub fn database_name(&self, language: &str) -> String {
        if let Some((_, dbname)) = DB_NAME_EXCEPTIONS.iter().find(|(code, _)| *code == language) {
            return (*dbname).to_string();
        }

        let code = normalize_code(language);
        match self.entries.get(&code).or_else(|| self.entries.get(language)) {
            Some(dbname) => dbname.clone(),
            None => {
                debug!(language, "No catalog entry, using naming convention");
                format!("{}wiki", code.replace('-', "_"))
            }
        }
    }

    /// Replica target for a language: the `_p` view of its database, hosted
    /// on the matching analytics replica.
    pub fn target(&self, language: &str) -> DbTarget {
        let dbname = self.database_name(language);
        let base = dbname.strip_suffix("_p").unwrap_or(&dbname).to_string();
        let host = format!("{base}{ANALYTICS_HOST_SUFFIX}");
        DbTarget::new(host, format!("{base}_p"))
    }

    /// The metadata catalog itself.
    pub fn meta_target() -> DbTarget {
        DbTarget::new(META_HOST.to_string(), META_DATABASE.to_string())
    }
}

/// Site codes occasionally arrive as `enwiki` or mixed case; reduce them to
/// the bare language code.
fn normalize_code(language: &str) -> String {
    let code = language.trim().to_ascii_lowercase();
    match code.strip_suffix("wiki") {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => code,
    }
}

fn fetch_mapping(connector: &dyn Connector) -> Result<FxHashMap<String, String>> {
    info!("Retrieving database name mappings from the metadata catalog");

    let mut replica = connector.connect(&DbMapping::meta_target())?;
    let rows = replica.query(&queries::mapping_query(), &[])?;

    let mut entries = FxHashMap::default();
    for row in &rows {
        let lang = row_str(row, "lang");
        let dbname = row_str(row, "dbname");
        let url = row_str(row, "url");

        if dbname.is_empty() {
            continue;
        }
        if !lang.is_empty() {
            entries.insert(lang.to_string(), dbname.to_string());
        }
        // Subdomains and language codes diverge for a handful of wikis;
        // index both so either form resolves.
        let url_lang = url.strip_prefix("https://").and_then(|u| u.split('.').next());
        if let Some(url_lang) = url_lang {
            if !url_lang.is_empty() {
                entries.insert(url_lang.to_string(), dbname.to_string());
            }
        }
    }

    // The catalog carries a test-wiki row under "en"; pin the real one.
    entries.insert("en".to_string(), "enwiki".to_string());

    info!(entries = entries.len(), "Retrieved database mappings");
    Ok(entries)
}
