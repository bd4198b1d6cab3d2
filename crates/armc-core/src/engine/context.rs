use super::progress::{Progress, ProgressReporter};

/// Counters describing what a run has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub iterations: usize,
    pub acceptances: usize,
    pub evaluations: u64,
    pub cache_hits: u64,
    pub failures: u64,
}

/// Per-run mutable bookkeeping threaded through the orchestrator: job numbering, statistics and
/// the progress sink. Created when a run starts and consumed when it finishes.
pub struct RunContext<'a> {
    pub reporter: &'a ProgressReporter<'a>,
    pub stats: RunStats,
    next_job_id: u64,
}

impl<'a> RunContext<'a> {
    pub fn new(reporter: &'a ProgressReporter<'a>) -> Self {
        Self::starting_at(reporter, 0)
    }

    /// A context whose first job id is `first_job_id`, so a resumed run does not reuse the ids
    /// of the run it continues.
    pub fn starting_at(reporter: &'a ProgressReporter<'a>, first_job_id: u64) -> Self {
        Self {
            reporter,
            stats: RunStats::default(),
            next_job_id: first_job_id,
        }
    }

    pub fn next_job_id(&mut self) -> u64 {
        let id = self.next_job_id;
        self.next_job_id += 1;
        id
    }

    pub fn report(&self, event: Progress) {
        self.reporter.report(event);
    }
}
