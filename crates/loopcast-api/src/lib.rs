// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

mod errors;
mod params;

pub use errors::ApiError;
pub use params::{
    parse_grouped_params, parse_limit_offset, GroupedParams, DEFAULT_LIMIT, DEFAULT_LIMIT_PER_LIST,
    MAX_LIMIT, MAX_LIMIT_PER_LIST,
};

pub const CRATE_NAME: &str = "loopcast-api";
