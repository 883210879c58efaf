// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 200;
pub const DEFAULT_LIMIT_PER_LIST: i64 = 1;
pub const MAX_LIMIT_PER_LIST: i64 = 50;

/// Parse `limit` and `offset` from a query map. Values outside the accepted
/// range (or unparseable) fall back to the defaults rather than erroring, so
/// cached URLs stay forgiving.
#[must_use]
pub fn parse_limit_offset(query: &HashMap<String, String>, default_limit: i64) -> (i64, i64) {
    let mut limit = default_limit;
    let mut offset = 0;
    if let Some(raw) = query.get("limit") {
        if let Ok(n) = raw.parse::<i64>() {
            if n > 0 && n <= MAX_LIMIT {
                limit = n;
            }
        }
    }
    if let Some(raw) = query.get("offset") {
        if let Ok(n) = raw.parse::<i64>() {
            if n >= 0 {
                offset = n;
            }
        }
    }
    (limit, offset)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupedParams {
    pub group_all: bool,
    pub limit_per_list: i64,
}

#[must_use]
pub fn parse_grouped_params(query: &HashMap<String, String>) -> GroupedParams {
    let group_all = query.get("group_all").is_some_and(|v| v == "true");
    let mut limit_per_list = DEFAULT_LIMIT_PER_LIST;
    if let Some(raw) = query.get("limit_per_list") {
        if let Ok(n) = raw.parse::<i64>() {
            if n > 0 && n <= MAX_LIMIT_PER_LIST {
                limit_per_list = n;
            }
        }
    }
    GroupedParams {
        group_all,
        limit_per_list,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn limit_and_offset_defaults() {
        assert_eq!(parse_limit_offset(&query(&[]), DEFAULT_LIMIT), (50, 0));
    }

    #[test]
    fn limit_in_range_is_accepted() {
        let q = query(&[("limit", "2"), ("offset", "7")]);
        assert_eq!(parse_limit_offset(&q, DEFAULT_LIMIT), (2, 7));
    }

    #[test]
    fn out_of_range_values_fall_back() {
        let q = query(&[("limit", "201"), ("offset", "-1")]);
        assert_eq!(parse_limit_offset(&q, DEFAULT_LIMIT), (50, 0));
        let q = query(&[("limit", "0")]);
        assert_eq!(parse_limit_offset(&q, DEFAULT_LIMIT).0, 50);
        let q = query(&[("limit", "abc"), ("offset", "abc")]);
        assert_eq!(parse_limit_offset(&q, DEFAULT_LIMIT), (50, 0));
    }

    #[test]
    fn grouped_params_defaults_and_clamps() {
        let got = parse_grouped_params(&query(&[]));
        assert_eq!(
            got,
            GroupedParams {
                group_all: false,
                limit_per_list: 1
            }
        );
        let got = parse_grouped_params(&query(&[("group_all", "true"), ("limit_per_list", "5")]));
        assert_eq!(
            got,
            GroupedParams {
                group_all: true,
                limit_per_list: 5
            }
        );
        let got = parse_grouped_params(&query(&[("group_all", "1"), ("limit_per_list", "51")]));
        assert_eq!(
            got,
            GroupedParams {
                group_all: false,
                limit_per_list: 1
            }
        );
    }
}
