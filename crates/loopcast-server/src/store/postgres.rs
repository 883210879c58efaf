// SPDX-License-Identifier: Apache-2.0

use crate::rewrite::rewrite_email_links;
use crate::store::{Store, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loopcast_model::{preview_text, slugify, Email, EmailStats, ListRef, MailingList, Paginated};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const CONTENT_MAX_CONNS: u32 = 10;
const METRICS_MAX_CONNS: u32 = 5;
const STARTUP_PING_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_LIST_COLOR: &str = "#000000";

const LIST_MAILING_LISTS_SQL: &str = r"
WITH sent_counts AS (
  SELECT mailing_list_id, COUNT(*) AS sent_email_count, MAX(sent_at) AS last_sent_at
  FROM loops.campaigns
  WHERE status = 'Sent' AND mailing_list_id IS NOT NULL AND ai_publishable = true
  GROUP BY mailing_list_id
),
sub_counts AS (
  SELECT mailing_list_id, COUNT(*)::bigint AS subscriber_count
  FROM loops.audience_mailing_lists
  GROUP BY mailing_list_id
)
SELECT ml.id,
       ml.friendly_name,
       ml.description,
       COALESCE(ml.is_public, false) AS is_public,
       COALESCE(ml.color_scheme, '#000000') AS color_scheme,
       ml.last_updated_at,
       COALESCE(sc.subscriber_count, 0) AS subscriber_count,
       COALESCE(se.sent_email_count, 0) AS sent_email_count,
       se.last_sent_at
FROM loops.mailing_lists ml
LEFT JOIN sub_counts sc ON sc.mailing_list_id = ml.id
LEFT JOIN sent_counts se ON se.mailing_list_id = ml.id
WHERE COALESCE(se.sent_email_count, 0) > 0
ORDER BY (se.last_sent_at IS NULL) ASC, se.last_sent_at DESC NULLS LAST, ml.friendly_name ASC
LIMIT $1 OFFSET $2
";

const METRICS_MIGRATIONS: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS email_views (
        time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        session_id TEXT NOT NULL,
        email_id TEXT NOT NULL
    )",
    r"SELECT create_hypertable('email_views', 'time', if_not_exists => TRUE)",
    r"CREATE UNIQUE INDEX IF NOT EXISTS idx_email_views_dedup
        ON email_views (session_id, email_id, time_bucket('5 minutes', time), time)",
    r"CREATE MATERIALIZED VIEW IF NOT EXISTS email_view_counts
        WITH (timescaledb.continuous) AS
        SELECT
            time_bucket('1 hour', time) AS bucket,
            email_id,
            COUNT(DISTINCT session_id) AS view_count
        FROM email_views
        GROUP BY bucket, email_id
        WITH NO DATA",
    r"SELECT add_continuous_aggregate_policy('email_view_counts',
        start_offset => INTERVAL '1 day',
        end_offset => INTERVAL '1 hour',
        schedule_interval => INTERVAL '1 hour',
        if_not_exists => TRUE)",
    r"CREATE INDEX IF NOT EXISTS idx_email_views_email_id
        ON email_views(email_id, time DESC)",
    r"CREATE TABLE IF NOT EXISTS email_link_clicks (
        time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        session_id TEXT NOT NULL,
        email_id TEXT NOT NULL,
        link_url TEXT NOT NULL,
        link_index INT NOT NULL
    )",
    r"SELECT create_hypertable('email_link_clicks', 'time', if_not_exists => TRUE)",
    r"CREATE UNIQUE INDEX IF NOT EXISTS idx_email_link_clicks_dedup
        ON email_link_clicks (session_id, email_id, link_index, time_bucket('5 minutes', time), time)",
    r"CREATE INDEX IF NOT EXISTS idx_email_link_clicks_email_id
        ON email_link_clicks(email_id, time DESC)",
];

/// Store over the content warehouse plus an optional metrics time-series
/// database. Without a metrics database every metrics method degrades to
/// zero instead of failing.
pub struct PgStore {
    pool: PgPool,
    metrics_pool: Option<PgPool>,
}

/// Require TLS on the content database unless explicitly overridden.
fn ensure_tls_requirement(url: &str, allow_insecure: bool) -> String {
    if allow_insecure || url.contains("sslmode=") {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}sslmode=require")
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

impl PgStore {
    pub async fn connect(
        database_url: &str,
        metrics_database_url: Option<&str>,
        allow_db_insecure: bool,
    ) -> Result<Self, String> {
        let url = ensure_tls_requirement(database_url, allow_db_insecure);
        let pool = PgPoolOptions::new()
            .max_connections(CONTENT_MAX_CONNS)
            .min_connections(1)
            .max_lifetime(Duration::from_secs(55 * 60))
            .idle_timeout(Duration::from_secs(10 * 60))
            .test_before_acquire(true)
            .connect(&url)
            .await
            .map_err(|err| format!("content db connect: {err}"))?;
        timeout(STARTUP_PING_TIMEOUT, sqlx::query("SELECT 1").execute(&pool))
            .await
            .map_err(|_| "content db ping timed out".to_string())?
            .map_err(|err| format!("content db ping: {err}"))?;

        let metrics_pool = match metrics_database_url {
            Some(metrics_url) if !metrics_url.is_empty() => {
                let pool = PgPoolOptions::new()
                    .max_connections(METRICS_MAX_CONNS)
                    .min_connections(1)
                    .connect(metrics_url)
                    .await
                    .map_err(|err| format!("metrics db connect: {err}"))?;
                timeout(STARTUP_PING_TIMEOUT, sqlx::query("SELECT 1").execute(&pool))
                    .await
                    .map_err(|_| "metrics db ping timed out".to_string())?
                    .map_err(|err| format!("metrics db ping: {err}"))?;
                Some(pool)
            }
            _ => None,
        };

        Ok(Self { pool, metrics_pool })
    }

    /// Idempotent bootstrap of the metrics hypertables, dedup indexes, and
    /// the hourly continuous aggregate. A no-op without a metrics database.
    pub async fn run_metrics_migrations(&self) -> Result<(), String> {
        let Some(metrics) = &self.metrics_pool else {
            info!("metrics database not configured, skipping migrations");
            return Ok(());
        };
        info!("running metrics database migrations");
        for (i, migration) in METRICS_MIGRATIONS.iter().enumerate() {
            sqlx::query(migration)
                .execute(metrics)
                .await
                .map_err(|err| format!("metrics migration {} failed: {err}", i + 1))?;
        }
        info!("metrics database migrations completed");
        Ok(())
    }

    pub async fn metrics_view_count(&self, email_id: &str) -> i64 {
        let Some(metrics) = &self.metrics_pool else {
            return 0;
        };
        match sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT session_id) FROM email_views WHERE email_id = $1",
        )
        .bind(email_id)
        .fetch_one(metrics)
        .await
        {
            Ok(count) => count,
            Err(err) => {
                debug!(email_id, "metrics view count degraded to zero: {err}");
                0
            }
        }
    }

    pub async fn metrics_click_count(&self, email_id: &str) -> i64 {
        let Some(metrics) = &self.metrics_pool else {
            return 0;
        };
        match sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT (session_id, link_index)) FROM email_link_clicks WHERE email_id = $1",
        )
        .bind(email_id)
        .fetch_one(metrics)
        .await
        {
            Ok(count) => count,
            Err(err) => {
                debug!(email_id, "metrics click count degraded to zero: {err}");
                0
            }
        }
    }

    async fn warehouse_scalar(&self, sql: &str, email_id: &str) -> i64 {
        match sqlx::query_scalar::<_, i64>(sql)
            .bind(email_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(value) => value.unwrap_or(0),
            Err(err) => {
                warn!(email_id, "warehouse aggregate read failed: {err}");
                0
            }
        }
    }

    fn email_from_row(&self, row: &PgRow, base_url: &str) -> Result<Email, StoreError> {
        let id: String = row.try_get("id")?;
        let subject: String = row
            .try_get::<Option<String>, _>("subject")?
            .unwrap_or_default();
        let sent_at: Option<DateTime<Utc>> = row.try_get("sent_at")?;
        let mailing_list_id: String = row.try_get("mailing_list_id")?;
        let list_name: String = row
            .try_get::<Option<String>, _>("friendly_name")?
            .unwrap_or_default();
        let list_description: String = row
            .try_get::<Option<String>, _>("description")?
            .unwrap_or_default();
        let list_color: String = row.try_get("color_scheme")?;
        let html: Option<String> = row.try_get("html")?;
        let markdown: Option<String> = row.try_get("markdown")?;
        let ai_slug: Option<String> = row.try_get("ai_slug")?;
        let excerpt: Option<String> = row.try_get("excerpt")?;

        let html = match html {
            Some(h) if !h.is_empty() => Some(rewrite_email_links(&h, &id, base_url)),
            other => other,
        };
        let slug = match ai_slug {
            Some(s) if !s.is_empty() => s,
            _ if !subject.is_empty() => slugify(&subject),
            _ => id.clone(),
        };
        let preview = preview_text(markdown.as_deref(), html.as_deref());

        Ok(Email {
            mailing_list: ListRef {
                id: mailing_list_id.clone(),
                slug: slugify(&list_name),
                name: list_name,
                description: list_description,
                color: list_color,
            },
            id,
            slug,
            subject,
            excerpt,
            sent_at,
            mailing_list_id,
            stats: EmailStats::default(),
            html,
            markdown,
            preview_text: preview,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_mailing_lists(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Paginated<MailingList>, StoreError> {
        let rows = sqlx::query(LIST_MAILING_LISTS_SQL)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row
                .try_get::<Option<String>, _>("friendly_name")?
                .unwrap_or_default();
            items.push(MailingList {
                id: row.try_get("id")?,
                slug: slugify(&name),
                description: row
                    .try_get::<Option<String>, _>("description")?
                    .unwrap_or_default(),
                color: row
                    .try_get::<Option<String>, _>("color_scheme")?
                    .unwrap_or_else(|| DEFAULT_LIST_COLOR.to_string()),
                is_public: row.try_get("is_public")?,
                subscriber_count: row.try_get("subscriber_count")?,
                last_updated_at: row.try_get("last_updated_at")?,
                last_sent_at: row.try_get("last_sent_at")?,
                sent_email_count: row.try_get("sent_email_count")?,
                name,
            });
        }
        let next_offset = (items.len() as i64 == limit).then_some(offset + limit);
        Ok(Paginated { items, next_offset })
    }

    async fn list_emails(
        &self,
        mailing_list_id: Option<&str>,
        limit: i64,
        offset: i64,
        base_url: &str,
    ) -> Result<Paginated<Email>, StoreError> {
        let mut where_clause = String::from(
            "WHERE c.status = 'Sent' AND c.mailing_list_id IS NOT NULL AND c.ai_publishable = true",
        );
        let filtered = mailing_list_id.is_some_and(|id| !id.is_empty());
        let (limit_param, offset_param) = if filtered {
            where_clause.push_str(" AND c.mailing_list_id = $1");
            ("$2", "$3")
        } else {
            ("$1", "$2")
        };
        let sql = format!(
            r"
SELECT
  c.id,
  c.ai_publishable_response_json->>'title' AS subject,
  c.sent_at,
  c.mailing_list_id,
  ml.friendly_name,
  ml.description,
  COALESCE(ml.color_scheme, '#000000') AS color_scheme,
  COALESCE(c.clicks, 0)::bigint AS warehouse_clicks,
  COALESCE(c.opens, 0)::bigint AS warehouse_opens,
  c.ai_publishable_content_html AS html,
  c.ai_publishable_content_markdown AS markdown,
  c.ai_publishable_slug AS ai_slug,
  c.ai_publishable_response_json->>'excerpt' AS excerpt
FROM loops.campaigns c
JOIN loops.mailing_lists ml ON ml.id = c.mailing_list_id
{where_clause}
ORDER BY c.sent_at DESC NULLS LAST, c.created_at DESC
LIMIT {limit_param} OFFSET {offset_param}
"
        );

        let mut query = sqlx::query(&sql);
        if filtered {
            query = query.bind(mailing_list_id.unwrap_or_default());
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut email = self.email_from_row(row, base_url)?;
            let warehouse_clicks: i64 = row.try_get("warehouse_clicks")?;
            let warehouse_opens: i64 = row.try_get("warehouse_opens")?;
            email.stats = EmailStats {
                clicks: warehouse_clicks + self.metrics_click_count(&email.id).await,
                views: warehouse_opens + self.metrics_view_count(&email.id).await,
            };
            items.push(email);
        }
        let next_offset = (items.len() as i64 == limit).then_some(offset + limit);
        Ok(Paginated { items, next_offset })
    }

    async fn track_email_view(&self, session_id: &str, email_id: &str) -> Result<(), StoreError> {
        let Some(metrics) = &self.metrics_pool else {
            return Ok(());
        };
        // One round trip: insert only when the (session, email) pair has no
        // event inside the rolling window. Advisory, not strict; the unique
        // bucket index catches the boundary race.
        let result = sqlx::query(
            r"
INSERT INTO email_views (session_id, email_id)
SELECT $1, $2
WHERE NOT EXISTS (
    SELECT 1 FROM email_views
    WHERE session_id = $1
      AND email_id = $2
      AND time > NOW() - INTERVAL '5 minutes'
)
",
        )
        .bind(session_id)
        .bind(email_id)
        .execute(metrics)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn track_link_click(
        &self,
        session_id: &str,
        email_id: &str,
        link_url: &str,
        link_index: i32,
    ) -> Result<(), StoreError> {
        let Some(metrics) = &self.metrics_pool else {
            return Ok(());
        };
        let result = sqlx::query(
            r"
INSERT INTO email_link_clicks (session_id, email_id, link_url, link_index)
SELECT $1, $2, $3, $4
WHERE NOT EXISTS (
    SELECT 1 FROM email_link_clicks
    WHERE session_id = $1
      AND email_id = $2
      AND link_index = $4
      AND time > NOW() - INTERVAL '5 minutes'
)
",
        )
        .bind(session_id)
        .bind(email_id)
        .bind(link_url)
        .bind(link_index)
        .execute(metrics)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn email_view_count(&self, email_id: &str) -> Result<i64, StoreError> {
        let live = self.metrics_view_count(email_id).await;
        let warehouse = self
            .warehouse_scalar(
                "SELECT COALESCE(opens, 0)::bigint FROM loops.campaigns WHERE id = $1",
                email_id,
            )
            .await;
        Ok(live + warehouse)
    }

    async fn email_click_count(&self, email_id: &str) -> Result<i64, StoreError> {
        let live = self.metrics_click_count(email_id).await;
        let warehouse = self
            .warehouse_scalar(
                "SELECT COALESCE(clicks, 0)::bigint FROM loops.campaigns WHERE id = $1",
                email_id,
            )
            .await;
        Ok(live + warehouse)
    }
}
