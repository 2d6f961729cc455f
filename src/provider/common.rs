//! # Common Provider Utilities
//!
//! Helpers shared by the cloud taggers.

use super::ProviderError;
use crate::tags::Tags;
use std::future::Future;
use std::time::Duration;

/// Run a cloud call with an upper bound on its duration
///
/// # Errors
/// Returns [`ProviderError::Timeout`] when `limit` elapses, otherwise the call's own error
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ProviderError::Api),
        Err(_elapsed) => Err(ProviderError::Timeout { operation, limit }),
    }
}

/// Live tags after merging `add` and dropping `removed`
///
/// Keys present in both `add` and `removed` are kept with the `add` value.
#[must_use]
pub fn merge_tags(current: &Tags, add: &Tags, removed: &[String]) -> Tags {
    let mut merged = current.clone();
    merged.extend(add.iter().map(|(k, v)| (k.clone(), v.clone())));
    for key in removed {
        if !add.contains_key(key) {
            merged.remove(key);
        }
    }
    merged
}

/// Entries of `add` that are missing from or differ in `current`
#[must_use]
pub fn changed_tags(current: &Tags, add: &Tags) -> Tags {
    add.iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Keys of `removed` that exist in `current` and are not being re-added
#[must_use]
pub fn present_keys(current: &Tags, add: &Tags, removed: &[String]) -> Vec<String> {
    removed
        .iter()
        .filter(|key| current.contains_key(*key) && !add.contains_key(*key))
        .cloned()
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
    fn test_merge_tags() {
        let current = tags(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let add = tags(&[("a", "10"), ("d", "4")]);
        let removed = vec!["b".to_string(), "d".to_string(), "missing".to_string()];

        assert_eq!(
            merge_tags(&current, &add, &removed),
            tags(&[("a", "10"), ("c", "3"), ("d", "4")])
        );
    }

    #[test]
    fn test_changed_tags() {
        let current = tags(&[("a", "1"), ("b", "2")]);
        let add = tags(&[("a", "1"), ("b", "20"), ("c", "3")]);

        assert_eq!(changed_tags(&current, &add), tags(&[("b", "20"), ("c", "3")]));
        assert!(changed_tags(&current, &tags(&[("a", "1")])).is_empty());
    }

    #[test]
    fn test_present_keys() {
        let current = tags(&[("a", "1"), ("b", "2")]);
        let add = tags(&[("b", "3")]);
        let removed = vec!["a".to_string(), "b".to_string(), "z".to_string()];

        assert_eq!(present_keys(&current, &add, &removed), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let ok = with_timeout("fast", Duration::from_secs(1), async { Ok(5) }).await;
        assert_eq!(ok.ok(), Some(5));

        let slow = with_timeout("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            slow,
            Err(ProviderError::Timeout {
                operation: "slow",
                ..
            })
        ));

        let failed: Result<(), _> = with_timeout("failing", Duration::from_secs(1), async {
            Err(anyhow::anyhow!("boom"))
        })
        .await;
        assert!(matches!(failed, Err(ProviderError::Api(_))));
    }
}
