//! Reconnect resynchronization
//!
//! Live events sent while the socket was down are never replayed, so every
//! transition into `Connected` (the first connect included) triggers a
//! forward fetch from the newest confirmed message. The merge is additive:
//! optimistic entries and anything already held stay in place.
//!
//! A resync cut short by the page limit remembers where it stopped. The next
//! one resumes from there rather than from the newest message, which a live
//! event may since have moved past the hole.

use super::pagination::PaginationController;
use crate::api::{ChatApi, PageQuery, RequestMode};
use crate::error::SyncResult;
use crate::store::{MergeReport, MessageStore};
use crate::transport::ConnectionStatus;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub pages: usize,
    pub merge: MergeReport,
    /// Hit the page limit with the server still reporting more
    pub truncated: bool,
}

impl ResyncReport {
    fn absorb(&mut self, merge: MergeReport) {
        self.pages += 1;
        self.merge.added += merge.added;
        self.merge.updated += merge.updated;
        self.merge.reconciled += merge.reconciled;
    }
}

#[derive(Debug)]
pub struct Reconciler {
    last_status: ConnectionStatus,
    max_pages: usize,
    completed: u64,
    /// Created-at of the last message fetched by a truncated resync
    gap_after: Option<DateTime<Utc>>,
}

impl Reconciler {
    pub fn new(max_pages: usize) -> Self {
        Self {
            last_status: ConnectionStatus::Disconnected,
            max_pages: max_pages.max(1),
            completed: 0,
            gap_after: None,
        }
    }

    /// Records a status change; `true` when it calls for a resync
    pub fn on_status(&mut self, status: ConnectionStatus) -> bool {
        let previous = std::mem::replace(&mut self.last_status, status);
        let trigger = status == ConnectionStatus::Connected && previous != ConnectionStatus::Connected;
        if trigger {
            debug!(from = previous.as_str(), "connected, resync due");
        }
        trigger
    }

    pub fn last_status(&self) -> ConnectionStatus {
        self.last_status
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Where the next resync resumes, while a truncated one left a hole
    pub fn pending_gap(&self) -> Option<DateTime<Utc>> {
        self.gap_after
    }

    /// Fetches everything newer than the newest confirmed message (or the
    /// pending gap, when older), or a fresh first page into an empty store
    pub async fn resync(
        &mut self,
        api: &dyn ChatApi,
        store: &mut MessageStore,
        pager: &mut PaginationController,
    ) -> SyncResult<ResyncReport> {
        let mut report = ResyncReport::default();
        let limit = pager.page_size();

        let Some(newest) = store.newest_confirmed().map(|m| m.created_at) else {
            let page = api
                .fetch_messages(PageQuery::latest(limit), RequestMode::Background)
                .await?;
            let has_more = page.has_more;
            report.absorb(store.merge_backfill(page.items));
            pager.adopt_first_page(has_more, store);
            self.gap_after = None;
            self.finish(&report);
            return Ok(report);
        };

        let mut after = self.gap_after.map_or(newest, |gap| gap.min(newest));
        if self.gap_after.is_some() {
            debug!(%after, "resuming truncated resync");
        }

        loop {
            let page = api
                .fetch_messages(PageQuery::newer_than(limit, after), RequestMode::Background)
                .await?;
            let newest = page.newest();
            let has_more = page.has_more;
            report.absorb(store.merge_backfill(page.items));

            match newest {
                Some(newest) if has_more && newest > after => after = newest,
                _ => break,
            }
            if report.pages >= self.max_pages {
                report.truncated = true;
                break;
            }
        }

        self.gap_after = report.truncated.then_some(after);
        self.finish(&report);
        Ok(report)
    }

    fn finish(&mut self, report: &ResyncReport) {
        self.completed += 1;
        info!(
            pages = report.pages,
            added = report.merge.added,
            updated = report.merge.updated,
            truncated = report.truncated,
            gap = ?self.gap_after,
            "resync complete"
        );
    }
}
