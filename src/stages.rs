use crate::{Messenger, StrError};
use russell_lab::Stopwatch;
use tracing::debug;

const MAIN_STAGE: &str = "Main Stage";

/// Holds the timing and flop count of a named stage
struct Stage {
    name: String,
    nanoseconds: u128, // accumulated wall time
    flops: f64,        // accumulated flops on this process
}

/// Records wall time and floating point operations per named stage
///
/// The "Main Stage" (index 0) is always present and active when no other stage is pushed.
/// Time spent in a pushed stage is not counted in the stages below it.
pub struct LogStages {
    stages: Vec<Stage>,
    active: Vec<(usize, Stopwatch)>, // stack of (stage index, stopwatch)
}

/// Holds the reduced numbers of one stage
#[derive(Clone, Debug, PartialEq)]
pub struct StageSummary {
    pub name: String,
    pub seconds: f64, // maximum over processes
    pub flops: f64,   // sum over processes
}

impl LogStages {
    /// Allocates a new instance and starts the main stage
    pub fn new() -> Self {
        LogStages {
            stages: vec![Stage {
                name: MAIN_STAGE.to_string(),
                nanoseconds: 0,
                flops: 0.0,
            }],
            active: vec![(0, Stopwatch::new(""))],
        }
    }

    /// Registers a stage and returns its index
    ///
    /// Registering an existing name returns the existing index.
    pub fn register(&mut self, name: &str) -> usize {
        if let Some(index) = self.stages.iter().position(|s| s.name == name) {
            return index;
        }
        self.stages.push(Stage {
            name: name.to_string(),
            nanoseconds: 0,
            flops: 0.0,
        });
        self.stages.len() - 1
    }

    /// Makes a stage the active one
    pub fn push(&mut self, index: usize) -> Result<(), StrError> {
        if index >= self.stages.len() {
            return Err("stage has not been registered");
        }
        if let Some((current, stopwatch)) = self.active.last_mut() {
            self.stages[*current].nanoseconds += stopwatch.stop();
        }
        debug!(stage = %self.stages[index].name, "push");
        self.active.push((index, Stopwatch::new("")));
        Ok(())
    }

    /// Returns to the previously active stage
    pub fn pop(&mut self) -> Result<(), StrError> {
        if self.active.len() < 2 {
            return Err("cannot pop the main stage");
        }
        if let Some((current, mut stopwatch)) = self.active.pop() {
            self.stages[current].nanoseconds += stopwatch.stop();
            debug!(stage = %self.stages[current].name, "pop");
        }
        if let Some((_, stopwatch)) = self.active.last_mut() {
            stopwatch.reset();
        }
        Ok(())
    }

    /// Adds floating point operations to the active stage
    pub fn add_flops(&mut self, flops: f64) {
        if let Some((current, _)) = self.active.last() {
            self.stages[*current].flops += flops;
        }
    }

    /// Returns the name of the active stage
    pub fn active_stage(&self) -> &str {
        match self.active.last() {
            Some((current, _)) => &self.stages[*current].name,
            None => MAIN_STAGE,
        }
    }

    /// Reduces the numbers over all processes
    ///
    /// Must be called by all processes. The time of the active stage is accounted up to now.
    pub fn summary<C: Messenger>(&mut self, comm: &mut C) -> Result<Vec<StageSummary>, StrError> {
        if let Some((current, stopwatch)) = self.active.last_mut() {
            self.stages[*current].nanoseconds += stopwatch.stop();
            stopwatch.reset();
        }
        let mut seconds: Vec<f64> = self.stages.iter().map(|s| (s.nanoseconds as f64) * 1e-9).collect();
        let mut flops: Vec<f64> = self.stages.iter().map(|s| s.flops).collect();
        comm.allreduce_max(&mut seconds)?;
        comm.allreduce_sum(&mut flops)?;
        Ok(self
            .stages
            .iter()
            .zip(seconds.iter().zip(&flops))
            .map(|(s, (t, f))| StageSummary {
                name: s.name.clone(),
                seconds: *t,
                flops: *f,
            })
            .collect())
    }
}

/// Formats the summary as a table
///
/// Each stage line contains `"<name>: "`; the last line starts with `"Flops: "`.
pub fn format_summary(summary: &[StageSummary], nproc: usize) -> String {
    let total_time: f64 = summary.iter().map(|s| s.seconds).sum();
    let total_flops: f64 = summary.iter().map(|s| s.flops).sum();
    let percent = |part: f64, total: f64| if total > 0.0 { 100.0 * part / total } else { 0.0 };
    let mut buffer = String::new();
    buffer.push_str(&format!("Summary of Stages on {} processes:\n", nproc));
    buffer.push_str("                          ----- Time -----   ----- Flop -----\n");
    for (index, stage) in summary.iter().enumerate() {
        buffer.push_str(&format!(
            "{:>3}: {:>18}: {:10.4e} {:5.1}%  {:10.4e} {:5.1}%\n",
            index,
            stage.name,
            stage.seconds,
            percent(stage.seconds, total_time),
            stage.flops,
            percent(stage.flops, total_flops),
        ));
    }
    let rate = if total_time > 0.0 { total_flops / total_time } else { 0.0 };
    buffer.push_str(&format!("Flops:  {:10.4e}  Flop/sec: {:10.4e}", total_flops, rate));
    buffer
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
