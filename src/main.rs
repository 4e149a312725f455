use anyhow::{bail, Context, Result};
use batch::{RunReport, RunSettings};
use config::PatcherConfig;
use kubectl::KubectlCli;
use operator::TerminalOperator;
use timing::{PhaseTimer, RunTimes};

mod batch;
mod config;
mod drift;
mod environment;
mod inspect;
mod k8s;
mod kubectl;
mod logging;
mod nodepool;
mod operator;
mod patch;
mod rules;
mod runtime;
mod tfvars;
mod timing;

fn main() -> Result<()> {
    let patcher_config = PatcherConfig::new()?;

    logging::init().context("initializing logging")?;

    let mut timer = PhaseTimer::start();

    let runtime = runtime::prepare_tokio_runtime()?;
    let startup_run_time = timer.finish_phase();

    let run_result = runtime.block_on(patch_environment(&patcher_config));
    let patching_run_time = timer.finish_phase();

    let run_times = RunTimes {
        startup_run_time,
        patching_run_time,
        total_run_time: timer.total(),
    };

    match run_result {
        Ok(report) => {
            logging::generate_summary(&patcher_config, Some(&report), Some(run_times)).context("generating summary")?;

            if let Some(reason) = report.aborted {
                bail!("run aborted: {}", reason);
            }

            Ok(())
        }
        Err(err) => {
            log::error!("{:#}", err);
            logging::generate_summary(&patcher_config, None, Some(run_times)).context("generating summary")?;
            Err(err)
        }
    }
}

async fn patch_environment(patcher_config: &PatcherConfig) -> Result<RunReport> {
    let settings = RunSettings::from(patcher_config);

    log::info!(
        "{} {} environment, nodepools from {}",
        if settings.dry_run { "dry run of" } else { "patching" },
        settings.environment,
        patcher_config.atlantis_path
    );

    let kubectl = KubectlCli::new(patcher_config.kubectl.clone());
    let operator = TerminalOperator::new(patcher_config.assume_yes);

    let report = batch::run(&settings, &kubectl, &operator).await?;

    let (patched, unchanged, skipped, failed) = report.clusters.iter().fold((0, 0, 0, 0), |totals, cluster| {
        (
            totals.0 + cluster.patched(),
            totals.1 + cluster.unchanged(),
            totals.2 + cluster.skipped(),
            totals.3 + cluster.failed(),
        )
    });

    log::info!(
        "{} clusters: {} {}, {} unchanged, {} skipped, {} failed",
        report.clusters.len(),
        patched,
        if report.dry_run { "to patch" } else { "patched" },
        unchanged,
        skipped,
        failed
    );

    Ok(report)
}
