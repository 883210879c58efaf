// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use loopcast_model::{Email, MailingList, Paginated};

pub mod fake;
pub mod postgres;

pub use fake::FakeStore;
pub use postgres::PgStore;

#[derive(Debug)]
pub enum StoreError {
    /// Deadline exceeded or a wrapped network timeout; surfaces as 504.
    Timeout(String),
    Database(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(cause) => write!(f, "upstream timeout: {cause}"),
            Self::Database(cause) => write!(f, "database error: {cause}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => Self::Timeout(err.to_string()),
            sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                Self::Timeout(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Typed query seam over the content and metrics backends. Handlers only see
/// this trait; the Postgres implementation composes warehouse rows into wire
/// shapes and the fake backs handler tests.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn list_mailing_lists(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Paginated<MailingList>, StoreError>;

    async fn list_emails(
        &self,
        mailing_list_id: Option<&str>,
        limit: i64,
        offset: i64,
        base_url: &str,
    ) -> Result<Paginated<Email>, StoreError>;

    /// Best-effort, deduplicated view write. Success includes the case where
    /// the event collapsed into an existing one inside the dedup window.
    async fn track_email_view(&self, session_id: &str, email_id: &str) -> Result<(), StoreError>;

    async fn track_link_click(
        &self,
        session_id: &str,
        email_id: &str,
        link_url: &str,
        link_index: i32,
    ) -> Result<(), StoreError>;

    /// Combined view count: warehouse opens plus distinct live sessions.
    async fn email_view_count(&self, email_id: &str) -> Result<i64, StoreError>;

    /// Combined click count: warehouse clicks plus distinct live
    /// (session, link) pairs.
    async fn email_click_count(&self, email_id: &str) -> Result<i64, StoreError>;
}
