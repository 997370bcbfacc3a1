use crate::db::{row_i64, row_str, Connector, DbError, DbTarget, Row};
use crate::queries;
use crate::tally::{is_bot_name, is_ip_address, EditorTally};
use tracing::{debug, info};

/// Runs the editors query for one language and folds the rows into a tally.
///
/// Languages with server-side project scoping get a single direct query; all
/// others batch the title list, one query per batch over the same open
/// connection. A failed batch fails the whole language: batching bounds
/// payload size, it is not a unit of partial success.
pub fn process_language(
    connector: &dyn Connector,
    target: &DbTarget,
    lang: &str,
    titles: &[String],
    year: &str,
    batch_size: usize,
) -> Result<EditorTally, DbError> {
    info!(language = lang, titles = titles.len(), year, "Processing language");

    let mut replica = connector.connect(target)?;
    let mut tally = EditorTally::new();

    if queries::uses_direct_query(lang) {
        let (sql, params) = queries::editors_query(lang, &[], year);
        fold_rows(&mut tally, &replica.query(&sql, &params)?);
    } else {
        for (batch_index, batch) in titles.chunks(batch_size.max(1)).enumerate() {
            debug!(
                language = lang,
                batch = batch_index,
                size = batch.len(),
                "Processing batch"
            );
            let (sql, params) = queries::editors_query(lang, batch, year);
            fold_rows(&mut tally, &replica.query(&sql, &params)?);
        }
    }

    info!(
        language = lang,
        editors = tally.len(),
        edits = tally.total_edits(),
        "Language complete"
    );
    Ok(tally)
}

fn fold_rows(tally: &mut EditorTally, rows: &[Row]) {
    for row in rows {
        let actor = row_str(row, "actor_name");
        if actor.is_empty() {
            continue;
        }
        if is_ip_address(actor) {
            debug!(actor, "Skipped IP address");
            continue;
        }
        if is_bot_name(actor) {
            debug!(actor, "Skipped bot account");
            continue;
        }
        let count = row_i64(row, "count").max(0) as u64;
        tally.add(actor, count);
    }
}
