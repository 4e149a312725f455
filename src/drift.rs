use crate::{inspect::ObservedState, nodepool::WorkloadType};
use itertools::Itertools;
use std::fmt::Display;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub(crate) enum DriftReason {
    /// The required workload-type node affinity is missing or points at another workload type
    AffinityMismatch { observed: Option<String> },
    /// The workload-type toleration is missing or tolerates another workload type
    TolerationMismatch { observed: Option<String> },
    /// The deployment prefers spot nodes but can't actually tolerate them
    MissingSpotToleration,
    /// The deployment tolerates spot nodes without preferring them. Legacy leftover, reported
    /// only.
    SpotTolerationWithoutAffinity,
}

impl DriftReason {
    pub(crate) fn forces_patch(&self) -> bool {
        !matches!(self, DriftReason::SpotTolerationWithoutAffinity)
    }
}

impl Display for DriftReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftReason::AffinityMismatch { observed } => {
                write!(f, "affinity is {}", observed.as_deref().unwrap_or("missing"))
            }
            DriftReason::TolerationMismatch { observed } => {
                write!(f, "toleration is {}", observed.as_deref().unwrap_or("missing"))
            }
            DriftReason::MissingSpotToleration => write!(f, "spot affinity without spot toleration"),
            DriftReason::SpotTolerationWithoutAffinity => write!(f, "spot toleration without spot affinity"),
        }
    }
}

/// The result of comparing the expected workload type of a deployment with what the cluster has
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub(crate) struct Drift {
    pub(crate) expected: WorkloadType,
    pub(crate) affinity_correct: bool,
    pub(crate) toleration_correct: bool,
    pub(crate) spot_affinity_present: bool,
    pub(crate) spot_toleration_present: bool,
    pub(crate) reasons: Vec<DriftReason>,
    pub(crate) needs_patch: bool,
}

pub(crate) fn classify(expected: &WorkloadType, observed: &ObservedState) -> Drift {
    let affinity_correct = observed.affinity_workload_type.as_ref() == Some(expected);
    let toleration_correct = observed.toleration_workload_type.as_ref() == Some(expected);

    let mut reasons = vec![];

    if !affinity_correct {
        reasons.push(DriftReason::AffinityMismatch {
            observed: observed.affinity_workload_type.as_ref().map(ToString::to_string),
        });
    }

    if !toleration_correct {
        reasons.push(DriftReason::TolerationMismatch {
            observed: observed.toleration_workload_type.as_ref().map(ToString::to_string),
        });
    }

    match (observed.has_spot_affinity, observed.has_spot_toleration) {
        (true, false) => reasons.push(DriftReason::MissingSpotToleration),
        (false, true) => reasons.push(DriftReason::SpotTolerationWithoutAffinity),
        _ => {}
    }

    let needs_patch = reasons.iter().any(DriftReason::forces_patch);

    Drift {
        expected: expected.clone(),
        affinity_correct,
        toleration_correct,
        spot_affinity_present: observed.has_spot_affinity,
        spot_toleration_present: observed.has_spot_toleration,
        reasons,
        needs_patch,
    }
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "WRONG"
    }
}

impl Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "expected={} affinity={} toleration={} spot-affinity={} spot-toleration={}",
            self.expected,
            mark(self.affinity_correct),
            mark(self.toleration_correct),
            if self.spot_affinity_present { "yes" } else { "no" },
            if self.spot_toleration_present { "yes" } else { "no" },
        )?;

        if !self.reasons.is_empty() {
            write!(f, " [{}]", self.reasons.iter().join("; "))?;
        }

        Ok(())
    }
}
