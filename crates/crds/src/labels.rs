//! Label, annotation and taint keys shared by the scheduler and its collaborators

use std::collections::BTreeMap;

/// Set on a machine while it is bound to a request
pub const LEASED_LABEL: &str = "dcops.microscaler.io/leased";

/// Name of the request a leased machine is bound to
pub const LEASED_BY_LABEL: &str = "dcops.microscaler.io/leased-by";

/// Pool a machine belongs to
pub const POOL_LABEL: &str = "dcops.microscaler.io/pool";

/// OOB label marking its host as under maintenance
pub const MAINTENANCE_LABEL: &str = "dcops.microscaler.io/maintenance";

/// Taint key mirrored onto a machine while its OOB is under maintenance
pub const MAINTENANCE_TAINT_KEY: &str = MAINTENANCE_LABEL;

/// Request annotation set by the compute layer once the workload is up
pub const RUNNING_ANNOTATION: &str = "dcops.microscaler.io/running";

/// Prefix of the machine class labels (`size-<class>=true`)
pub const SIZE_LABEL_PREFIX: &str = "size-";

/// Value used for boolean labels and annotations
pub const TRUE_VALUE: &str = "true";

/// Class label key for `class`
pub fn size_label(class: &str) -> String {
    format!("{SIZE_LABEL_PREFIX}{class}")
}

/// Classes advertised by a label set (`size-<class>=true`)
pub fn classes(labels: &BTreeMap<String, String>) -> Vec<&str> {
    labels
        .iter()
        .filter(|(_, value)| value.as_str() == TRUE_VALUE)
        .filter_map(|(key, _)| key.strip_prefix(SIZE_LABEL_PREFIX))
        .filter(|class| !class.is_empty())
        .collect()
}

/// True when `key` is set to "true" in `labels`
pub fn is_true(labels: Option<&BTreeMap<String, String>>, key: &str) -> bool {
    labels
        .and_then(|l| l.get(key))
        .is_some_and(|v| v == TRUE_VALUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_label() {
        assert_eq!(size_label("m5.metal"), "size-m5.metal");
    }

    #[test]
    fn test_classes_only_true_size_labels() {
        let labels = BTreeMap::from([
            ("size-m5.metal".to_string(), "true".to_string()),
            ("size-c5.metal".to_string(), "false".to_string()),
            (POOL_LABEL.to_string(), "rack-a".to_string()),
        ]);
        assert_eq!(classes(&labels), vec!["m5.metal"]);
    }
}
