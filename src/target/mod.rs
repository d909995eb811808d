pub mod matcher;
pub mod options;
pub mod selector;

pub use matcher::{match_bundle, TargetMatch, TargetSelector};
pub use options::{deployment_id, merge_options, options_hash};
pub use selector::selector_matches;
