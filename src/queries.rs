//! SQL text for the replica queries. The rest of the crate treats these as
//! opaque `(text, params)` pairs; placeholders are always bound, never
//! spliced into the text.

/// Project articles on the English edition with their language links.
const TITLES_QUERY: &str = "\
SELECT page_title, ll_lang, ll_title
FROM page
JOIN page_assessments ON pa_page_id = page_id
JOIN page_assessments_projects ON pa_project_id = pap_project_id
LEFT JOIN langlinks ON ll_from = page_id
WHERE pap_project_title = 'Medicine'
  AND page_is_redirect = 0
  AND page_namespace = 0";

/// Open Wikipedia editions from the metadata catalog.
const MAPPING_QUERY: &str = "\
SELECT lang, dbname, url
FROM wiki
WHERE is_closed = 0
  AND family = 'wikipedia'";

/// The Arabic edition tags project articles server-side, so the query scopes
/// by assessment membership instead of a client-supplied title list.
const ARABIC_EDITORS_QUERY: &str = "\
SELECT actor_name, COUNT(*) AS count
FROM revision
JOIN actor ON rev_actor = actor_id
JOIN page ON rev_page = page_id
WHERE page_id IN (
    SELECT DISTINCT pa_page_id
    FROM page_assessments, page_assessments_projects
    WHERE pa_project_id = pap_project_id
      AND pap_project_title = 'طب'
)
  AND page_namespace = 0
  AND YEAR(rev_timestamp) = ?
  AND LOWER(CAST(actor_name AS CHAR)) NOT LIKE '%bot%'
GROUP BY actor_id
ORDER BY count DESC
LIMIT 100";

/// The English edition scopes by the WikiProject banner on talk pages.
const ENGLISH_EDITORS_QUERY: &str = "\
SELECT actor_name, COUNT(*) AS count
FROM revision
JOIN actor ON rev_actor = actor_id
JOIN page ON rev_page = page_id
WHERE page_title IN (
    SELECT page_title
    FROM (
        SELECT tl_from, rd_from
        FROM templatelinks
        LEFT JOIN redirect
            ON rd_from = tl_from
            AND rd_title = 'WikiProject_Medicine'
            AND (rd_interwiki = '' OR rd_interwiki IS NULL)
            AND rd_namespace = 10
        JOIN page ON tl_from = page_id
        JOIN linktarget ON tl_target_id = lt_id
        WHERE lt_namespace = 10
          AND lt_title = 'WikiProject_Medicine'
        ORDER BY tl_from
    ) temp
    JOIN page ON tl_from = page_id
    WHERE page_namespace = 1
)
  AND page_namespace = 0
  AND YEAR(rev_timestamp) = ?
  AND LOWER(CAST(actor_name AS CHAR)) NOT LIKE '%bot%'
GROUP BY actor_id
ORDER BY count DESC
LIMIT 100";

pub fn titles_query() -> String {
    TITLES_QUERY.to_string()
}

pub fn mapping_query() -> String {
    MAPPING_QUERY.to_string()
}

/// Languages whose editors query is scoped server-side and ignores the
/// client-supplied title list.
pub fn uses_direct_query(lang: &str) -> bool {
    matches!(lang, "ar" | "en")
}

/// Editors query for one language. Direct variants take only the year;
/// the standard variant binds every title plus the year.
pub fn editors_query(lang: &str, titles: &[String], year: &str) -> (String, Vec<String>) {
    match lang {
        "ar" => (ARABIC_EDITORS_QUERY.to_string(), vec![year.to_string()]),
        "en" => (ENGLISH_EDITORS_QUERY.to_string(), vec![year.to_string()]),
        _ => standard_editors_query(titles, year),
    }
}

fn standard_editors_query(titles: &[String], year: &str) -> (String, Vec<String>) {
    debug_assert!(!titles.is_empty(), "caller filters empty title lists");

    let placeholders = vec!["?"; titles.len()].join(", ");
    let query = format!(
        "SELECT actor_name, COUNT(*) AS count\n\
         FROM revision\n\
         JOIN actor ON rev_actor = actor_id\n\
         JOIN page ON rev_page = page_id\n\
         WHERE page_title IN ({placeholders})\n\
           AND page_namespace = 0\n\
           AND YEAR(rev_timestamp) = ?\n\
           AND LOWER(CAST(actor_name AS CHAR)) NOT LIKE '%bot%'\n\
         GROUP BY actor_id\n\
         ORDER BY count DESC"
    );

    let mut params = titles.to_vec();
    params.push(year.to_string());
    (query, params)
}
