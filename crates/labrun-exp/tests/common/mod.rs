#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use labrun_core::LabError;
use labrun_exp::{Experiment, ExperimentFamily, Task, TaskArgs, TaskFactory, TaskResult};

/// Divides `num` by `den` for every listed pair; a zero denominator is a
/// recorded method failure, a negative one makes the task body panic.
#[derive(Clone)]
pub struct Ratio {
    pub points: Vec<(i64, i64)>,
    pub generated: Arc<AtomicUsize>,
}

impl Ratio {
    pub fn new(points: Vec<(i64, i64)>) -> Self {
        Self {
            points,
            generated: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn generate_calls(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

impl ExperimentFamily for Ratio {
    fn define_task_args(&self, args: &mut TaskArgs) {
        args.add("num");
        args.add("den");
    }

    fn generate_tasks(&self, factory: &mut TaskFactory) -> Result<Vec<Task>, LabError> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .points
            .iter()
            .map(|(num, den)| {
                let mut task = factory.create_task();
                task.set("num", *num).set("den", *den);
                task
            })
            .collect())
    }

    fn do_task(&self, task: &Task) -> Result<TaskResult, LabError> {
        let num = task.get_f64("num").unwrap_or_default();
        let den = task.get_f64("den").unwrap_or_default();
        if den < 0.0 {
            panic!("negative denominator");
        }
        let mut result = TaskResult::for_task(task);
        result.set_elapsed("ratio", 0.0);
        if den == 0.0 {
            result.record_failure("ratio", "divide by zero");
        } else {
            result.set_error_status("ratio", 0);
            result.set_scalar("ratio", num / den)?;
        }
        Ok(result)
    }
}

/// Experiment `ws/exp` below `root` running `family`.
pub fn experiment(root: &Path, family: &Ratio, njobs: Option<usize>) -> Experiment {
    let mut experiment = Experiment::new("ws", "exp", root.join("ws").join("exp"));
    experiment.install(family.clone());
    if let Some(njobs) = njobs {
        experiment.set_njobs(njobs);
    }
    experiment
}

/// `n` successful points.
pub fn points(n: i64) -> Vec<(i64, i64)> {
    (0..n).map(|i| (i, 1)).collect()
}
