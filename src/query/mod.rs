//! Query string -> ORM arguments.

mod features;
pub mod operators;

pub use features::{
    has_filter_keys, reject_deprecated, requested_filter_mode, ApiFeatures, ComputedQuery, FeatureSettings,
    FilterMode, META_KEYS,
};
