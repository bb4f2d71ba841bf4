//! Generic walker for paginated API resources.
//!
//! The service pages every collection endpoint with the same envelope:
//! `items`, `page` (0-based), `pages`, `size`, `total`. [`PageReader`]
//! turns that into either a single-page fetch or a full ordered walk.

use std::future::Future;

use serde::Deserialize;

use crate::error::ApiResult;

/// One bounded slice of a remote collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Page<T> {
    /// Items on this page, in server order.
    pub items: Vec<T>,
    /// Total number of items in the collection.
    pub total: u64,
    /// 0-based index of this page.
    pub page: u32,
    /// Number of pages in the collection; 0 means empty.
    pub pages: u32,
    /// Maximum number of items per page.
    pub size: u32,
}

/// Reads paginated resources page-by-page or as a full walk.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageReader;

impl PageReader {
    /// Fetch exactly one page.
    pub async fn get_single<T, F, Fut>(fetch: F, page_index: u32) -> ApiResult<Page<T>>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = ApiResult<Page<T>>>,
    {
        fetch(page_index).await
    }

    /// Fetch every page in order and concatenate the items.
    ///
    /// The page count reported by page 0 bounds the walk; a later page
    /// reporting fewer pages shrinks it, a later page reporting more does
    /// not grow it. Page 0 is never re-fetched.
    pub async fn get_all<T, F, Fut>(fetch: F) -> ApiResult<Vec<T>>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = ApiResult<Page<T>>>,
    {
        let first = fetch(0).await?;
        let bound = first.pages;
        let mut known_pages = bound;
        let mut items = first.items;

        for index in 1..bound {
            if index >= known_pages {
                break;
            }
            let page = fetch(index).await?;
            known_pages = page.pages.min(bound);
            items.extend(page.items);
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ApiError;

    fn page(items: Vec<u32>, index: u32, pages: u32, size: u32, total: u64) -> Page<u32> {
        Page {
            items,
            total,
            page: index,
            pages,
            size,
        }
    }

    /// Split `0..total` into pages of `size`, serving them by index.
    fn chunked(total: u32, size: u32) -> impl Fn(u32) -> Vec<u32> {
        move |index| {
            let start = index * size;
            let end = (start + size).min(total);
            (start..end).collect()
        }
    }

    #[tokio::test]
    async fn test_get_all_empty_collection() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let items = PageReader::get_all(|index| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(page(vec![], index, 0, 10, 0)) }
        })
        .await
        .unwrap();

        assert!(items.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_all_exact_single_page() {
        // total == S
        let chunk = chunked(10, 10);
        let items = PageReader::get_all(|index| {
            let items = chunk(index);
            async move { Ok(page(items, index, 1, 10, 10)) }
        })
        .await
        .unwrap();

        assert_eq!(items, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_get_all_one_item_overflow() {
        // total == S + 1: a full page plus a partial one
        let chunk = chunked(11, 10);
        let items = PageReader::get_all(|index| {
            let items = chunk(index);
            async move { Ok(page(items, index, 2, 10, 11)) }
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 11);
        assert_eq!(items, (0..11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_get_all_almost_full_last_page() {
        // total == N * S - 1 with N = 3, S = 4
        let chunk = chunked(11, 4);
        let items = PageReader::get_all(|index| {
            let items = chunk(index);
            async move { Ok(page(items, index, 3, 4, 11)) }
        })
        .await
        .unwrap();

        assert_eq!(items, (0..11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_get_all_preserves_server_order() {
        let sequences = [vec![5_u32, 3, 9], vec![1, 8], vec![2, 7]];
        let items = PageReader::get_all(|index| {
            let items = sequences[index as usize].clone();
            async move { Ok(page(items, index, 3, 3, 7)) }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![5, 3, 9, 1, 8, 2, 7]);
    }

    #[tokio::test]
    async fn test_get_all_bounded_when_pages_inflates() {
        // Page 0 says 2 pages; page 1 claims 5. The walk must not exceed
        // the originally stated bound.
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let items = PageReader::get_all(|index| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let pages = if index == 0 { 2 } else { 5 };
                Ok(page(vec![index], index, pages, 1, 2))
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![0, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_all_stops_early_when_pages_shrinks() {
        // Page 0 says 4 pages; page 1 reports the collection shrank to 2.
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let items = PageReader::get_all(|index| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let pages = if index == 0 { 4 } else { 2 };
                Ok(page(vec![index], index, pages, 1, 2))
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![0, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_all_propagates_mid_walk_errors() {
        let result = PageReader::get_all(|index| async move {
            if index == 1 {
                Err(ApiError::Api {
                    status: 500,
                    message: "boom".into(),
                })
            } else {
                Ok(page(vec![index], index, 3, 1, 3))
            }
        })
        .await;

        assert!(matches!(result, Err(ApiError::Api { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_get_single_fetches_requested_index() {
        let fetched = PageReader::get_single(
            |index| async move { Ok(page(vec![index * 10], index, 5, 1, 5)) },
            3,
        )
        .await
        .unwrap();

        assert_eq!(fetched.page, 3);
        assert_eq!(fetched.items, vec![30]);
    }

    #[test]
    fn test_page_rejects_unknown_fields() {
        let result: Result<Page<u32>, _> = serde_json::from_str(
            r#"{"items": [], "total": 0, "page": 0, "pages": 0, "size": 10, "cursor": "x"}"#,
        );
        assert!(result.is_err());
    }
}
