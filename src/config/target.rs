use anyhow::{ensure, Context, Result};
use lazy_regex::regex_is_match;
use std::fmt::Display;

/// A single deployment requested on the command line as <namespace>/<deployment>
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DeploymentTarget {
    pub(crate) namespace: String,
    pub(crate) name: String,
}

impl DeploymentTarget {
    pub(crate) fn parse(value: &str) -> Result<Self> {
        let (namespace, name) = value
            .split_once('/')
            .context("expected <namespace>/<deployment>, e.g. billing/api")?;

        for (what, part) in [("namespace", namespace), ("deployment", name)] {
            // RFC 1123 label, which is what Kubernetes demands of both
            ensure!(
                regex_is_match!(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$", part),
                "invalid {} name {:?} in {:?}",
                what,
                part,
                value
            );
        }

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl Display for DeploymentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl serde::Serialize for DeploymentTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
