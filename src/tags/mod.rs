//! # Tags
//!
//! Computing the desired tag set for a PVC.
//!
//! - [`validator`] rejects tag names reserved by Kubernetes and the clouds
//! - [`template`] renders `{{ .Name }}` style placeholders in tag values
//! - [`builder`] merges defaults, copied labels and the tags annotation

pub mod builder;
pub mod template;
pub mod validator;

use std::collections::BTreeMap;

/// Tag name to tag value
///
/// Ordered so that logs and diffs are stable.
pub type Tags = BTreeMap<String, String>;

pub use builder::build_tags;
pub use template::{render_tag_templates, TagTemplate};
pub use validator::is_valid_tag_name;
