use crate::{batch::RunReport, config::PatcherConfig, timing::RunTimes};
use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::{Level, LevelFilter, Metadata, Record};
use std::sync::{Arc, Mutex};

struct PatcherLogger;

static LOGGER: PatcherLogger = PatcherLogger;

pub fn init() -> Result<()> {
    match log::set_logger(&LOGGER) {
        Ok(_) => log::set_max_level(LevelFilter::Info),
        Err(_) => bail!("Logger initalization failed"),
    };

    Ok(())
}

lazy_static! {
    pub(crate) static ref LOG_RECORDS: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
}

fn format_record(record: &Record) -> String {
    format!(
        "{} - {} - {}:{}: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.args()
    )
}

impl log::Log for PatcherLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_string = format_record(record);

            {
                let mut log_records = match LOG_RECORDS.lock() {
                    Ok(log_records) => log_records,
                    Err(err) => {
                        println!("Failed to lock log records: {}", err);
                        return;
                    }
                };
                log_records.push(log_string.clone());
            }

            println!("{}", log_string);
        }
    }

    fn flush(&self) {}
}

#[derive(serde::Serialize)]
struct Summary<'a> {
    patcher_config: &'a PatcherConfig,
    report: Option<&'a RunReport>,
    logs: Vec<String>,
    run_times: Option<RunTimes>,
}

/// Write everything about the run to the configured summary file, if there is one. A run that
/// failed outright still gets a summary, just without a report.
pub(crate) fn generate_summary(patcher_config: &PatcherConfig, report: Option<&RunReport>, run_times: Option<RunTimes>) -> Result<()> {
    let Some(summary_file) = patcher_config.summary_file.clone() else {
        return Ok(());
    };

    let logs = match LOG_RECORDS.lock() {
        Ok(logs) => logs.clone(),
        Err(err) => {
            vec![format!("Failed to lock log records: {}", err)]
        }
    };

    let summary = Summary {
        patcher_config,
        report,
        logs,
        run_times,
    };

    let summary_file = summary_file.0.create().context("opening summary file for writing")?;
    serde_yaml::to_writer(summary_file, &summary).context("serializing run report into summary file")?;

    Ok(())
}
