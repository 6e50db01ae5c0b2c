use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::{
    error::DbError,
    query::TableQuery,
    supabase::{decode_rows, Database},
};

pub const DEFAULT_PAGE_SIZE: usize = 1000;
/// PostgREST's default `db-max-rows`. A larger range still comes back
/// truncated to this many rows, which would read as a short final page.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Reads every row matching `query`, one `page_size` range at a time.
///
/// Pages are requested sequentially; the scan stops at the first empty or
/// short page. A failed page aborts the whole scan. `page_size` is clamped
/// to `1..=MAX_PAGE_SIZE`.
pub async fn fetch_all(
    db: &dyn Database,
    query: &TableQuery,
    page_size: usize,
) -> Result<Vec<Value>, DbError> {
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let mut rows = Vec::new();
    let mut from = 0usize;
    let mut pages = 0usize;

    loop {
        let page = db.select(&query.range(from, from + page_size - 1)).await?;
        pages += 1;
        let fetched = page.len();
        rows.extend(page);

        if fetched < page_size {
            break;
        }
        from += page_size;
    }

    debug!(table = %query.table, pages, rows = rows.len(), "Paginated scan finished");
    Ok(rows)
}

pub async fn fetch_all_as<T: DeserializeOwned>(
    db: &dyn Database,
    query: &TableQuery,
    page_size: usize,
) -> Result<Vec<T>, DbError> {
    let rows = fetch_all(db, query, page_size).await?;
    decode_rows(&query.table, rows)
}
