// SPDX-License-Identifier: Apache-2.0

use crate::store::{Store, StoreError};
use async_trait::async_trait;
use loopcast_model::{Email, MailingList, Paginated};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// In-memory store backing handler tests. Tracking follows the same
/// distinct-session counting contract as the Postgres implementation.
#[derive(Default)]
pub struct FakeStore {
    lists: Vec<MailingList>,
    emails: Vec<Email>,
    views: Mutex<HashMap<String, HashSet<String>>>,
    clicks: Mutex<HashMap<String, HashSet<(String, i32)>>>,
}

impl FakeStore {
    #[must_use]
    pub fn new(lists: Vec<MailingList>, emails: Vec<Email>) -> Self {
        Self {
            lists,
            emails,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn recorded_clicks(&self, email_id: &str) -> usize {
        self.clicks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(email_id)
            .map_or(0, HashSet::len)
    }
}

fn paginate<T: Clone>(items: &[T], limit: i64, offset: i64) -> Paginated<T> {
    let start = usize::try_from(offset).unwrap_or(0).min(items.len());
    let take = usize::try_from(limit).unwrap_or(0);
    let page: Vec<T> = items[start..].iter().take(take).cloned().collect();
    let next_offset = (page.len() as i64 == limit).then_some(offset + limit);
    Paginated {
        items: page,
        next_offset,
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn list_mailing_lists(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Paginated<MailingList>, StoreError> {
        Ok(paginate(&self.lists, limit, offset))
    }

    async fn list_emails(
        &self,
        mailing_list_id: Option<&str>,
        limit: i64,
        offset: i64,
        _base_url: &str,
    ) -> Result<Paginated<Email>, StoreError> {
        let filtered: Vec<Email> = self
            .emails
            .iter()
            .filter(|e| mailing_list_id.is_none_or(|id| e.mailing_list_id == id))
            .cloned()
            .collect();
        Ok(paginate(&filtered, limit, offset))
    }

    async fn track_email_view(&self, session_id: &str, email_id: &str) -> Result<(), StoreError> {
        self.views
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(email_id.to_string())
            .or_default()
            .insert(session_id.to_string());
        Ok(())
    }

    async fn track_link_click(
        &self,
        session_id: &str,
        email_id: &str,
        _link_url: &str,
        link_index: i32,
    ) -> Result<(), StoreError> {
        self.clicks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(email_id.to_string())
            .or_default()
            .insert((session_id.to_string(), link_index));
        Ok(())
    }

    async fn email_view_count(&self, email_id: &str) -> Result<i64, StoreError> {
        Ok(self
            .views
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(email_id)
            .map_or(0, |sessions| sessions.len() as i64))
    }

    async fn email_click_count(&self, email_id: &str) -> Result<i64, StoreError> {
        Ok(self.recorded_clicks(email_id) as i64)
    }
}
