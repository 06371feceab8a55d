//! Backward paging through conversation history
//!
//! The cursor is the created-at of the oldest loaded message and only ever
//! moves backward. Each phase is split into `begin_*` / `finish_*` so the
//! in-flight flag stays consistent whatever happens to the request.

use crate::api::{ChatApi, MessagePage, PageQuery, RequestMode};
use crate::error::SyncResult;
use crate::store::{MergeReport, MessageStore};
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct PaginationController {
    page_size: usize,
    cursor: Option<DateTime<Utc>>,
    has_more: bool,
    in_flight: bool,
}

impl PaginationController {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            cursor: None,
            has_more: false,
            in_flight: false,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    pub fn begin_load_initial(&mut self) -> PageQuery {
        self.in_flight = true;
        PageQuery::latest(self.page_size)
    }

    /// Replaces the store contents and recomputes the cursor
    pub fn finish_load_initial(&mut self, page: MessagePage, store: &mut MessageStore) {
        self.in_flight = false;
        self.has_more = page.has_more;
        store.load_initial(page.items);
        self.cursor = store.oldest_confirmed().map(|m| m.created_at);
        if self.cursor.is_none() {
            self.has_more = false;
        }
        debug!(cursor = ?self.cursor, has_more = self.has_more, "initial page loaded");
    }

    /// `None` when there is nothing to load or a load is already running
    pub fn begin_load_older(&mut self) -> Option<PageQuery> {
        if self.in_flight || !self.has_more {
            return None;
        }
        let cursor = self.cursor?;
        self.in_flight = true;
        Some(PageQuery::older_than(self.page_size, cursor))
    }

    pub fn finish_load_older(&mut self, page: MessagePage, store: &mut MessageStore) -> MergeReport {
        self.in_flight = false;

        let boundary = match (page.next_before, page.oldest()) {
            (Some(next), Some(oldest)) => Some(next.min(oldest)),
            (next, oldest) => next.or(oldest),
        };
        self.has_more = page.has_more && !page.items.is_empty();
        if let Some(boundary) = boundary {
            self.cursor = Some(self.cursor.map_or(boundary, |c| c.min(boundary)));
        }

        let report = store.merge_backfill(page.items);
        debug!(
            added = report.added,
            cursor = ?self.cursor,
            has_more = self.has_more,
            "older page merged"
        );
        report
    }

    /// Seeds the cursor after a first page was merged by a resync instead
    /// of [`load_initial`](Self::load_initial)
    pub fn adopt_first_page(&mut self, has_more: bool, store: &MessageStore) {
        if self.cursor.is_some() {
            return;
        }
        self.cursor = store.oldest_confirmed().map(|m| m.created_at);
        self.has_more = has_more && self.cursor.is_some();
    }

    /// Clears the in-flight flag after a failed request; cursor untouched
    pub fn fail_load(&mut self) {
        self.in_flight = false;
    }

    pub async fn load_initial(&mut self, api: &dyn ChatApi, store: &mut MessageStore) -> SyncResult<()> {
        let query = self.begin_load_initial();
        match api.fetch_messages(query, RequestMode::Foreground).await {
            Ok(page) => {
                self.finish_load_initial(page, store);
                Ok(())
            }
            Err(e) => {
                self.fail_load();
                Err(e)
            }
        }
    }

    /// Fetches one page older than the cursor. `Ok(None)` means no request
    /// was made.
    pub async fn load_older(
        &mut self,
        api: &dyn ChatApi,
        store: &mut MessageStore,
    ) -> SyncResult<Option<MergeReport>> {
        let Some(query) = self.begin_load_older() else {
            trace!(has_more = self.has_more, in_flight = self.in_flight, "load older skipped");
            return Ok(None);
        };

        match api.fetch_messages(query, RequestMode::Foreground).await {
            Ok(page) => Ok(Some(self.finish_load_older(page, store))),
            Err(e) => {
                self.fail_load();
                Err(e)
            }
        }
    }
}

/// Keeps the viewport on the same message when older content is prepended
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    distance_from_bottom: f64,
}

impl ScrollAnchor {
    pub fn capture(content_height: f64, scroll_offset: f64) -> Self {
        Self {
            distance_from_bottom: (content_height - scroll_offset).max(0.0),
        }
    }

    /// Offset to apply once the content grew to `new_content_height`
    pub fn restore(&self, new_content_height: f64) -> f64 {
        (new_content_height - self.distance_from_bottom).max(0.0)
    }
}
