//! Shared helpers used by resources and the engine.
//!
//! - [`retry`]: polling loop for eventually consistent reads
//! - [`destroy`]: retry-until-gone destroy checks
//! - [`ids`]: composite import id parsing
//! - [`json`]: JSON map helpers
//! - [`tags`]: tag sorting, default tags and metric names

pub mod destroy;
pub mod ids;
pub mod json;
pub mod retry;
pub mod tags;

pub use destroy::{check_destroyed, GoneCheck};
pub use ids::account_name_and_channel_name_from_id;
pub use json::{
    convert_response_bytes_to_map, delete_key_in_map, get_string_slice, json_semantic_equal,
    remove_empty_values_in_map,
};
pub use retry::{exhausted, retry, retry_with_timeout, Deadline, RetryError};
pub use tags::{merge_default_tags, normalize_metric_name, sorted_tags, strip_default_tags};
