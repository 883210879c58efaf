// SPDX-License-Identifier: Apache-2.0

use crate::http::{json_cached, request_base_url};
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::header::HeaderMap;
use axum::http::{Method, Uri};
use axum::response::Response;
use loopcast_api::{parse_grouped_params, parse_limit_offset, DEFAULT_LIMIT};
use loopcast_model::GroupedEmails;
use std::collections::HashMap;

const GROUPED_LIST_CAP: i64 = 1000;

pub async fn list_mailing_lists(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let (limit, offset) = parse_limit_offset(&query, DEFAULT_LIMIT);
    let store = state.store.clone();
    json_cached(&state, &method, &uri, &headers, || async move {
        store.list_mailing_lists(limit, offset).await
    })
    .await
}

pub async fn list_emails(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let (limit, offset) = parse_limit_offset(&query, DEFAULT_LIMIT);
    let mailing_list_id = query
        .get("mailing_list_id")
        .filter(|v| !v.is_empty())
        .cloned();
    let base_url = request_base_url(&headers);
    let store = state.store.clone();
    json_cached(&state, &method, &uri, &headers, || async move {
        store
            .list_emails(mailing_list_id.as_deref(), limit, offset, &base_url)
            .await
    })
    .await
}

/// Index-page convenience: the latest emails of every list, one per list
/// unless `group_all` is set. Lists without eligible emails are omitted.
pub async fn grouped_emails(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let params = parse_grouped_params(&query);
    let base_url = request_base_url(&headers);
    let store = state.store.clone();
    json_cached(&state, &method, &uri, &headers, || async move {
        let lists = store.list_mailing_lists(GROUPED_LIST_CAP, 0).await?.items;
        let mut out = Vec::with_capacity(lists.len());
        for mailing_list in lists {
            let emails = store
                .list_emails(
                    Some(&mailing_list.id),
                    params.limit_per_list,
                    0,
                    &base_url,
                )
                .await?
                .items;
            if emails.is_empty() {
                continue;
            }
            let emails = if params.group_all {
                emails
            } else {
                emails.into_iter().take(1).collect()
            };
            out.push(GroupedEmails {
                mailing_list,
                emails,
            });
        }
        Ok(out)
    })
    .await
}
