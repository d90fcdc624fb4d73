//! Page-following for list endpoints.
//!
//! Every list call on every adapter goes through [`paginate`] (lazy) or
//! [`collect_pages`] (eager), so none of them can hand back a partial result.

use std::future::Future;

use anyhow::Result;
use futures_util::Stream;
use futures_util::TryStreamExt as _;
use futures_util::stream;

/// Items per page requested from upstream list endpoints.
pub const PAGE_SIZE: u32 = 100;

/// One page of results and the number of the page after it, if any.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<u32>,
}

/// Lazily fetch pages starting at page 1 until the upstream reports no next
/// page. A next-page marker that does not move forward ends the sequence.
pub fn paginate<T, F, Fut>(fetch: F) -> impl Stream<Item = Result<Vec<T>>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    stream::try_unfold((fetch, Some(1u32)), |(mut fetch, page)| async move {
        let Some(page) = page else {
            return Ok(None);
        };
        let Page { items, next } = fetch(page).await?;
        let next = next.filter(|n| *n > page);
        Ok(Some((items, (fetch, next))))
    })
}

/// Fetch and concatenate all pages. Fails if any page fails.
pub async fn collect_pages<T, F, Fut>(fetch: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    paginate(fetch).try_concat().await
}

/// Fetch pages until at least `limit` items are collected, then truncate.
/// Later pages are never requested.
pub async fn collect_limited<T, F, Fut>(fetch: F, limit: usize) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    if limit == 0 {
        return Ok(items);
    }

    let mut pages = std::pin::pin!(paginate(fetch));
    while let Some(page) = pages.try_next().await? {
        items.extend(page);
        if items.len() >= limit {
            break;
        }
    }
    items.truncate(limit);
    Ok(items)
}
