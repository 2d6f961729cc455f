//! # Tag Sanitizers
//!
//! Each cloud has its own rules for tag names and values. These functions map
//! a computed tag set onto what the target API accepts.
//!
//! - **AWS**: keys and values pass through, truncated to 128 / 256 characters
//! - **GCP**: keys are lowercased, `/` becomes `_`, `.` becomes `-`, at most 63
//!   characters, no trailing `-` or `_`; values are only truncated to 63
//!   characters
//! - **Azure**: at most 50 tags, `<>%&\?/` stripped from keys, keys truncated to
//!   512 characters, values over 256 characters rejected
//!
//! All sanitizers are idempotent.

use crate::constants::{
    AWS_MAX_TAG_KEY_LENGTH, AWS_MAX_TAG_VALUE_LENGTH, AZURE_INVALID_TAG_KEY_CHARS,
    AZURE_MAX_TAGS, AZURE_MAX_TAG_KEY_LENGTH, AZURE_MAX_TAG_VALUE_LENGTH, GCP_MAX_LABEL_LENGTH,
};
use crate::tags::Tags;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("only up to 50 tags can be set on an Azure resource, got {0}")]
    TooManyTags(usize),
    #[error("tag {key:?} has a value longer than 256 characters")]
    ValueTooLong { key: String },
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// AWS tag set, truncated to the EC2/EFS/FSx limits
#[must_use]
pub fn sanitize_tags_for_aws(tags: &Tags) -> Tags {
    tags.iter()
        .map(|(key, value)| {
            (
                truncate_chars(key, AWS_MAX_TAG_KEY_LENGTH),
                truncate_chars(value, AWS_MAX_TAG_VALUE_LENGTH),
            )
        })
        .collect()
}

/// AWS tag keys, for removal requests
#[must_use]
pub fn sanitize_keys_for_aws(keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|key| truncate_chars(key, AWS_MAX_TAG_KEY_LENGTH))
        .collect()
}

/// GCP label key
#[must_use]
pub fn sanitize_key_for_gcp(key: &str) -> String {
    let replaced = key.to_lowercase().replace('/', "_").replace('.', "-");
    // Truncate before trimming so the result never ends in a separator
    truncate_chars(&replaced, GCP_MAX_LABEL_LENGTH)
        .trim_end_matches(['-', '_'])
        .to_string()
}

/// GCP label value, truncated to 63 characters and otherwise left as is
#[must_use]
pub fn sanitize_value_for_gcp(value: &str) -> String {
    truncate_chars(value, GCP_MAX_LABEL_LENGTH)
}

/// GCP label set
#[must_use]
pub fn sanitize_labels_for_gcp(labels: &Tags) -> Tags {
    labels
        .iter()
        .map(|(key, value)| (sanitize_key_for_gcp(key), sanitize_value_for_gcp(value)))
        .collect()
}

/// GCP label keys, for removal requests
#[must_use]
pub fn sanitize_keys_for_gcp(keys: &[String]) -> Vec<String> {
    keys.iter().map(|key| sanitize_key_for_gcp(key)).collect()
}

/// Azure tag name
#[must_use]
pub fn sanitize_key_for_azure(key: &str) -> String {
    let stripped: String = key
        .chars()
        .filter(|c| !AZURE_INVALID_TAG_KEY_CHARS.contains(c))
        .collect();
    truncate_chars(&stripped, AZURE_MAX_TAG_KEY_LENGTH)
}

/// Azure tag value
///
/// # Errors
/// Returns [`SanitizeError::ValueTooLong`] when the value exceeds 256 characters
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn sanitize_value_for_azure(key: &str, value: &str) -> Result<String, SanitizeError> {
    if value.chars().count() > AZURE_MAX_TAG_VALUE_LENGTH {
        return Err(SanitizeError::ValueTooLong {
            key: key.to_string(),
        });
    }
    Ok(value.to_string())
}

/// Azure tag set
///
/// The tag count is checked before any key or value is looked at.
///
/// # Errors
/// Returns [`SanitizeError::TooManyTags`] for more than 50 tags and
/// [`SanitizeError::ValueTooLong`] for an over-long value
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn sanitize_labels_for_azure(tags: &Tags) -> Result<Tags, SanitizeError> {
    if tags.len() > AZURE_MAX_TAGS {
        return Err(SanitizeError::TooManyTags(tags.len()));
    }
    tags.iter()
        .map(|(key, value)| {
            Ok((
                sanitize_key_for_azure(key),
                sanitize_value_for_azure(key, value)?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_sanitize_key_for_gcp() {
        let long = "a".repeat(70);
        let expected_long = "a".repeat(63);
        let cases = vec![
            ("simple", "simple"),
            ("UPPERCASE", "uppercase"),
            ("with/slash", "with_slash"),
            ("with.dot", "with-dot"),
            ("app.kubernetes.io/name", "app-kubernetes-io_name"),
            ("trailing-", "trailing"),
            ("trailing_", "trailing"),
            ("trailing./", "trailing"),
            (long.as_str(), expected_long.as_str()),
        ];

        for (input, expected) in cases {
            assert_eq!(sanitize_key_for_gcp(input), expected, "key {input:?}");
        }
    }

    #[test]
    fn test_sanitize_value_for_gcp() {
        let long = "V".repeat(70);
        let expected_long = "V".repeat(63);
        let cases = vec![
            ("Value", "Value"),
            ("v1.2.3", "v1.2.3"),
            ("team/a", "team/a"),
            ("my-pvc-", "my-pvc-"),
            ("", ""),
            (long.as_str(), expected_long.as_str()),
        ];

        for (input, expected) in cases {
            assert_eq!(sanitize_value_for_gcp(input), expected, "value {input:?}");
        }
    }

    #[test]
    fn test_sanitize_for_gcp_is_idempotent() {
        let inputs = vec![
            "Kubernetes.IO/Created-For/PVC/Name".to_string(),
            format!("{}-b", "a".repeat(62)),
            "x".repeat(100),
            "___".to_string(),
        ];

        for input in inputs {
            let once = sanitize_key_for_gcp(&input);
            assert!(once.chars().count() <= 63, "length of {once:?}");
            assert!(!once.ends_with('-') && !once.ends_with('_'), "suffix of {once:?}");
            assert_eq!(sanitize_key_for_gcp(&once), once, "idempotence of {input:?}");

            let value = sanitize_value_for_gcp(&input);
            assert_eq!(sanitize_value_for_gcp(&value), value, "value idempotence of {input:?}");
        }
    }

    #[test]
    fn test_sanitize_labels_for_gcp() {
        let sanitized = sanitize_labels_for_gcp(&tags(&[("Team/Name", "Storage.Ops")]));
        assert_eq!(sanitized, tags(&[("team_name", "Storage.Ops")]));

        let keys = sanitize_keys_for_gcp(&["Team/Name".to_string(), "env".to_string()]);
        assert_eq!(keys, vec!["team_name".to_string(), "env".to_string()]);
    }

    #[test]
    fn test_sanitize_key_for_azure() {
        let long = "k".repeat(600);
        let cases = vec![
            ("simple".to_string(), "simple".to_string()),
            ("a<b>c%d&e\\f?g/h".to_string(), "abcdefgh".to_string()),
            ("kubernetes.io/name".to_string(), "kubernetes.ioname".to_string()),
            (long, "k".repeat(512)),
        ];

        for (input, expected) in cases {
            assert_eq!(sanitize_key_for_azure(&input), expected, "key {input:?}");
        }
    }

    #[test]
    fn test_sanitize_labels_for_azure() {
        let ok = sanitize_labels_for_azure(&tags(&[("team/name", "storage")]))
            .expect("valid tags");
        assert_eq!(ok, tags(&[("teamname", "storage")]));

        let max_value = "v".repeat(256);
        assert!(sanitize_labels_for_azure(&tags(&[("k", max_value.as_str())])).is_ok());

        let long_value = "v".repeat(257);
        assert_eq!(
            sanitize_labels_for_azure(&tags(&[("k", long_value.as_str())])),
            Err(SanitizeError::ValueTooLong {
                key: "k".to_string()
            })
        );
    }

    #[test]
    fn test_sanitize_labels_for_azure_too_many_tags_checked_first() {
        let mut many: Tags = (0..51).map(|i| (format!("key{i}"), "v".to_string())).collect();
        assert_eq!(
            sanitize_labels_for_azure(&many),
            Err(SanitizeError::TooManyTags(51))
        );

        // Count wins even when a value is also too long
        many.insert("long".to_string(), "v".repeat(300));
        assert_eq!(
            sanitize_labels_for_azure(&many),
            Err(SanitizeError::TooManyTags(52))
        );

        let fifty: Tags = (0..50).map(|i| (format!("key{i}"), "v".to_string())).collect();
        assert!(sanitize_labels_for_azure(&fifty).is_ok());
    }

    #[test]
    fn test_sanitize_tags_for_aws() {
        let long_key = "k".repeat(200);
        let long_value = "v".repeat(300);
        let sanitized = sanitize_tags_for_aws(&tags(&[
            ("Team/Name", "Storage.Ops"),
            (long_key.as_str(), long_value.as_str()),
        ]));

        assert_eq!(
            sanitized.get("Team/Name").map(String::as_str),
            Some("Storage.Ops")
        );
        assert_eq!(sanitized.get(&"k".repeat(128)), Some(&"v".repeat(256)));
    }
}
