use std::time::Instant;

#[derive(Clone)]
pub(crate) struct RunTime {
    start: Instant,
    end: Instant,
}

impl RunTime {
    pub(crate) fn since_start(start: Instant) -> Self {
        Self { start, end: Instant::now() }
    }
}

impl serde::Serialize for RunTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let duration = self.end - self.start;
        serializer.serialize_str(&format!("{}.{:03}s", duration.as_secs(), duration.subsec_millis()))
    }
}

/// Wall clock time of each phase of a run, written to the summary file
#[derive(serde::Serialize, Clone)]
pub(crate) struct RunTimes {
    pub(crate) startup_run_time: RunTime,
    pub(crate) patching_run_time: RunTime,
    pub(crate) total_run_time: RunTime,
}

/// Measures consecutive phases against a single starting instant
pub(crate) struct PhaseTimer {
    run_start: Instant,
    phase_start: Instant,
}

impl PhaseTimer {
    pub(crate) fn start() -> Self {
        let now = Instant::now();
        Self {
            run_start: now,
            phase_start: now,
        }
    }

    pub(crate) fn finish_phase(&mut self) -> RunTime {
        let run_time = RunTime::since_start(self.phase_start);
        self.phase_start = run_time.end;
        run_time
    }

    pub(crate) fn total(&self) -> RunTime {
        RunTime::since_start(self.run_start)
    }
}
