use anyhow::{Context, Result};
use itertools::Itertools;
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// The deployment environments of the fleet. Each one has its own variables file in every
/// infrastructure repository and its own set of GKE clusters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter, AsRefStr, serde::Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub(crate) enum Environment {
    Daily,
    Staging,
    Production,
}

impl Environment {
    pub(crate) fn parse(value: &str) -> Result<Self> {
        Environment::from_str(value).with_context(|| {
            format!(
                "invalid environment {:?}, expected one of {}",
                value,
                Environment::iter().map(|environment| environment.to_string()).join("|")
            )
        })
    }

    /// The kubectl contexts of the clusters that belong to this environment
    pub(crate) fn default_contexts(&self) -> Vec<String> {
        match self {
            Environment::Daily => vec!["gke_atlantis-daily_europe-west1_daily"],
            Environment::Staging => vec!["gke_atlantis-staging_europe-west1_staging"],
            Environment::Production => vec![
                "gke_atlantis-production_europe-west1_production",
                "gke_atlantis-production_us-central1_production-us",
            ],
        }
        .into_iter()
        .map(str::to_string)
        .collect()
    }

    /// File name of this environment's variables file inside an infrastructure repository
    pub(crate) fn tfvars_file_name(&self) -> String {
        format!("{}.tfvars", self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() -> Result<()> {
        assert_eq!(Environment::parse("daily")?, Environment::Daily);
        assert_eq!(Environment::parse("staging")?, Environment::Staging);
        assert_eq!(Environment::parse("production")?, Environment::Production);

        let err = Environment::parse("prod").unwrap_err();
        assert!(format!("{err:#}").contains("daily|staging|production"));

        Ok(())
    }

    #[test]
    fn test_tfvars_file_name() {
        assert_eq!(Environment::Staging.tfvars_file_name(), "staging.tfvars");
    }

    #[test]
    fn test_every_environment_has_contexts() {
        assert!(Environment::iter().all(|environment| !environment.default_contexts().is_empty()));
    }
}
