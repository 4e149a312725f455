use std::fmt::Display;

pub(crate) const DEFAULT_NODEPOOL: &str = "core";

/// A nodepool name as declared in the infrastructure repositories, e.g. "core", "core-spot" or
/// "prometheus-spot"
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub(crate) struct Nodepool(pub(crate) String);

/// The scheduling label value derived from a nodepool, used for both the workload-type node
/// affinity requirement and the workload-type toleration
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub(crate) struct WorkloadType(pub(crate) String);

impl Nodepool {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub(crate) fn fallback() -> Self {
        Self::new(DEFAULT_NODEPOOL)
    }

    /// Everything before the first hyphen is the workload type, the rest (commonly "-spot") is a
    /// qualifier that doesn't affect scheduling labels
    pub(crate) fn workload_type(&self) -> WorkloadType {
        if self.0.is_empty() {
            return WorkloadType(DEFAULT_NODEPOOL.to_string());
        }

        match self.0.split_once('-') {
            Some((prefix, _qualifier)) => WorkloadType(prefix.to_string()),
            None => WorkloadType(self.0.clone()),
        }
    }
}

impl WorkloadType {
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Nodepool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Display for WorkloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_type() {
        for (nodepool, expected) in [
            ("core-spot", "core"),
            ("prometheus", "prometheus"),
            ("prometheus-spot", "prometheus"),
            ("gpu-spot-large", "gpu"),
            ("", "core"),
        ] {
            assert_eq!(Nodepool::new(nodepool).workload_type(), WorkloadType(expected.to_string()), "{nodepool}");
        }
    }

    #[test]
    fn test_fallback() {
        assert_eq!(Nodepool::fallback().workload_type().as_str(), "core");
    }
}
