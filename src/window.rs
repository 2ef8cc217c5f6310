//! Page window arithmetic: expand a retrieved page index into the clamped
//! neighbourhood `[n - 1, n + 1]` within the document bounds.

use serde::Serialize;

use crate::error::{PipelineError, Result};

/// Pages before and after the hit that are pulled in as context.
pub const WINDOW_RADIUS: u32 = 1;

/// Returns the inclusive range `[max(n - 1, min_page), min(n + 1, max_page)]`.
///
/// For any `min_page <= page_index <= max_page` the result is contiguous,
/// strictly increasing, contains `page_index` and has at most three entries.
/// Out-of-bounds input yields whatever part of the neighbourhood survives
/// clamping, possibly nothing.
pub fn window(page_index: u32, min_page: u32, max_page: u32) -> Vec<u32> {
    let start = page_index.saturating_sub(WINDOW_RADIUS).max(min_page);
    let end = page_index.saturating_add(WINDOW_RADIUS).min(max_page);
    if start > end {
        return Vec::new();
    }
    (start..=end).collect()
}

/// Parses a page id as stored in the vector index.
pub fn parse_page_id(id: &str) -> Result<u32> {
    id.trim()
        .parse::<u32>()
        .map_err(|_| PipelineError::InvalidPageId(id.to_string()))
}

/// Maps [`window`] over one query's result ids.
pub fn expand_pages<S: AsRef<str>>(ids: &[S], min_page: u32, max_page: u32) -> Result<Vec<Vec<u32>>> {
    ids.iter()
        .map(|id| parse_page_id(id.as_ref()).map(|page| window(page, min_page, max_page)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryWindows {
    pub query: String,
    pub ids: Vec<String>,
    pub windows: Vec<Vec<u32>>,
}

/// Associates each query string with the windows of its result list.
///
/// `results` holds one id list per query, in query order.
pub fn pair_windows(
    queries: &[String],
    results: Vec<Vec<String>>,
    min_page: u32,
    max_page: u32,
) -> Result<Vec<QueryWindows>> {
    queries
        .iter()
        .zip(results)
        .map(|(query, ids)| {
            let windows = expand_pages(&ids, min_page, max_page)?;
            Ok(QueryWindows {
                query: query.clone(),
                ids,
                windows,
            })
        })
        .collect()
}

/// Union of several windows, ascending and without duplicates.
pub fn merge_windows(windows: &[Vec<u32>]) -> Vec<u32> {
    let mut pages = windows.iter().flatten().copied().collect::<Vec<u32>>();
    pages.sort_unstable();
    pages.dedup();
    pages
}

/// Splits ascending, deduplicated pages into inclusive runs of consecutive
/// pages: `[1, 2, 4]` becomes `[(1, 2), (4, 4)]`.
pub fn contiguous_runs(pages: &[u32]) -> Vec<(u32, u32)> {
    let mut runs = Vec::<(u32, u32)>::new();
    for &page in pages {
        match runs.last_mut() {
            Some((_, last)) if last.checked_add(1) == Some(page) => *last = page,
            _ => runs.push((page, page)),
        }
    }
    runs
}
