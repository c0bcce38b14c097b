//! Experiment definitions compiled into the binary. A workspace opts in by
//! listing the `demo` script in its `auto_run.json`.

use std::time::Instant;

use labrun_core::LabError;
use labrun_exp::{
    Catalog, ExperimentFamily, GridParameter, Task, TaskArgs, TaskFactory, TaskResult,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn catalog() -> Catalog {
    Catalog::new()
        .with("demo", "auto_run_power", |exp| {
            exp.install(PowerGrid);
            exp.set_njobs(4);
            Ok(())
        })
        .with("demo", "auto_run_uniform", |exp| {
            exp.install(UniformSample);
            exp.set_njobs(2);
            exp.set_job_memory_mb(256);
            Ok(())
        })
}

/// `base ^ exponent` over a small grid; a zero base with a negative exponent
/// is recorded as a failure.
struct PowerGrid;

impl ExperimentFamily for PowerGrid {
    fn define_task_args(&self, args: &mut TaskArgs) {
        args.add("base");
        args.add("exponent");
    }

    fn generate_tasks(&self, factory: &mut TaskFactory) -> Result<Vec<Task>, LabError> {
        Ok(factory.grid(&[
            GridParameter::new("base", [0, 1, 2, 3]),
            GridParameter::new("exponent", [-1, 0, 1, 2]),
        ]))
    }

    fn do_task(&self, task: &Task) -> Result<TaskResult, LabError> {
        let start = Instant::now();
        let base = task.get_f64("base").unwrap_or_default();
        let exponent = task.get_f64("exponent").unwrap_or_default() as i32;
        let mut result = TaskResult::for_task(task);
        if base == 0.0 && exponent < 0 {
            result.record_failure("power", "divide by zero");
        } else {
            result.set_error_status("power", 0);
            result.set_scalar("power", base.powi(exponent))?;
        }
        result.set_elapsed("power", start.elapsed().as_secs_f64());
        Ok(result)
    }
}

/// Seeded uniform draws, one vector per task.
struct UniformSample;

impl ExperimentFamily for UniformSample {
    fn define_task_args(&self, args: &mut TaskArgs) {
        args.add("seed");
        args.add("nsamples");
    }

    fn generate_tasks(&self, factory: &mut TaskFactory) -> Result<Vec<Task>, LabError> {
        Ok(factory.grid(&[
            GridParameter::new("seed", [1, 2, 3]),
            GridParameter::new("nsamples", [10, 100]),
        ]))
    }

    fn do_task(&self, task: &Task) -> Result<TaskResult, LabError> {
        let start = Instant::now();
        let seed = task.get("seed").and_then(|v| v.as_u64()).unwrap_or_default();
        let nsamples = task
            .get("nsamples")
            .and_then(|v| v.as_u64())
            .unwrap_or_default();
        let mut rng = StdRng::seed_from_u64(seed);
        let draws: Vec<f64> = (0..nsamples).map(|_| rng.gen::<f64>()).collect();
        let mut result = TaskResult::for_task(task);
        result.set_vector("uniform", draws)?;
        result.set_error_status("uniform", 0);
        result.set_elapsed("uniform", start.elapsed().as_secs_f64());
        Ok(result)
    }
}
