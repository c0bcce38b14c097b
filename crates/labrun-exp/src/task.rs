//! Tasks, the task argument schema and the per-task result envelope.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use labrun_core::errors::{ErrorInfo, LabError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method name under which a failing task body is recorded.
pub const TASK_METHOD: &str = "task";

/// One atomic unit of parameterised work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: u64,
    pub workspace_id: String,
    pub experiment_id: String,
    /// Experiment defined parameters.
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
}

impl Task {
    pub fn new(workspace_id: &str, experiment_id: &str, task_id: u64) -> Self {
        Self {
            task_id,
            workspace_id: workspace_id.to_string(),
            experiment_id: experiment_id.to_string(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }
}

/// Ordered, append-only list of the task attribute names that make up the
/// experiment design.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskArgs {
    names: Vec<String>,
}

impl TaskArgs {
    pub fn add(&mut self, name: impl Into<String>) {
        self.names.push(name.into());
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Named list of values spanning one axis of a grid sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridParameter {
    pub name: String,
    pub values: Vec<Value>,
}

impl GridParameter {
    pub fn new<V: Into<Value>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Hands out dense task ids `0, 1, 2, ...` for one experiment.
#[derive(Debug, Clone)]
pub struct TaskFactory {
    workspace_id: String,
    experiment_id: String,
    next_id: u64,
}

impl TaskFactory {
    pub fn new(workspace_id: &str, experiment_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            experiment_id: experiment_id.to_string(),
            next_id: 0,
        }
    }

    /// Creates an empty task with the next id.
    pub fn create_task(&mut self) -> Task {
        let task = Task::new(&self.workspace_id, &self.experiment_id, self.next_id);
        self.next_id += 1;
        task
    }

    /// One task per point of the cross product of `parameters`, the last
    /// parameter varying fastest.
    pub fn grid(&mut self, parameters: &[GridParameter]) -> Vec<Task> {
        let mut points = Vec::new();
        expand_grid(parameters, 0, BTreeMap::new(), &mut points);
        points
            .into_iter()
            .map(|attrs| {
                let mut task = self.create_task();
                task.attrs = attrs;
                task
            })
            .collect()
    }

    pub fn issued(&self) -> u64 {
        self.next_id
    }
}

fn expand_grid(
    params: &[GridParameter],
    idx: usize,
    current: BTreeMap<String, Value>,
    outputs: &mut Vec<BTreeMap<String, Value>>,
) {
    if idx == params.len() {
        outputs.push(current);
        return;
    }
    let param = &params[idx];
    for value in &param.values {
        let mut next = current.clone();
        next.insert(param.name.clone(), value.clone());
        expand_grid(params, idx + 1, next, outputs);
    }
}

/// Family specific payload carried next to the common result envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "values", rename_all = "snake_case")]
pub enum ResultPayload {
    #[default]
    None,
    /// One estimate per method.
    Scalar(BTreeMap<String, f64>),
    /// One vector of values (e.g. p-values) per method.
    Vector(BTreeMap<String, Vec<f64>>),
}

/// Outcome of one task: timing and error status per method plus a family
/// specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub workspace_id: String,
    pub experiment_id: String,
    pub task_id: u64,
    /// Wall time of the whole task in seconds, set by the job runner.
    #[serde(default)]
    pub total_elapsed: Option<f64>,
    #[serde(default)]
    elapsed: BTreeMap<String, f64>,
    #[serde(default)]
    error_status: BTreeMap<String, i32>,
    #[serde(default)]
    error_msg: BTreeMap<String, String>,
    #[serde(default)]
    methods: BTreeSet<String>,
    #[serde(default)]
    payload: ResultPayload,
}

impl TaskResult {
    pub fn new(workspace_id: &str, experiment_id: &str, task_id: u64) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            experiment_id: experiment_id.to_string(),
            task_id,
            total_elapsed: None,
            elapsed: BTreeMap::new(),
            error_status: BTreeMap::new(),
            error_msg: BTreeMap::new(),
            methods: BTreeSet::new(),
            payload: ResultPayload::None,
        }
    }

    pub fn for_task(task: &Task) -> Self {
        Self::new(&task.workspace_id, &task.experiment_id, task.task_id)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(String::as_str)
    }

    pub fn elapsed(&self, method: &str) -> Option<f64> {
        self.elapsed.get(method).copied()
    }

    pub fn error_status(&self, method: &str) -> Option<i32> {
        self.error_status.get(method).copied()
    }

    pub fn error_msg(&self, method: &str) -> Option<&str> {
        self.error_msg.get(method).map(String::as_str)
    }

    pub fn set_elapsed(&mut self, method: &str, seconds: f64) {
        self.add_method(method);
        self.elapsed.insert(method.to_string(), seconds);
    }

    pub fn set_error_status(&mut self, method: &str, status: i32) {
        self.add_method(method);
        self.error_status.insert(method.to_string(), status);
    }

    pub fn set_error_msg(&mut self, method: &str, message: impl Into<String>) {
        self.add_method(method);
        self.error_msg.insert(method.to_string(), message.into());
    }

    /// Records a failure (status 1) with its message.
    pub fn record_failure(&mut self, method: &str, message: impl Into<String>) {
        self.set_error_status(method, 1);
        self.set_error_msg(method, message);
    }

    /// A method succeeded when its status is absent or zero.
    pub fn succeeded(&self, method: &str) -> bool {
        self.error_status(method).unwrap_or(0) == 0
    }

    pub fn is_success(&self) -> bool {
        self.error_status.values().all(|status| *status == 0)
    }

    pub fn payload(&self) -> &ResultPayload {
        &self.payload
    }

    /// Attaches a scalar estimate for `method`.
    pub fn set_scalar(&mut self, method: &str, value: f64) -> Result<(), LabError> {
        if matches!(self.payload, ResultPayload::None) {
            self.payload = ResultPayload::Scalar(BTreeMap::new());
        }
        match &mut self.payload {
            ResultPayload::Scalar(values) => {
                values.insert(method.to_string(), value);
                self.add_method(method);
                Ok(())
            }
            other => Err(payload_mismatch("scalar", other)),
        }
    }

    pub fn scalar(&self, method: &str) -> Option<f64> {
        match &self.payload {
            ResultPayload::Scalar(values) => values.get(method).copied(),
            _ => None,
        }
    }

    /// Attaches a vector of values for `method`.
    pub fn set_vector(&mut self, method: &str, values: Vec<f64>) -> Result<(), LabError> {
        if matches!(self.payload, ResultPayload::None) {
            self.payload = ResultPayload::Vector(BTreeMap::new());
        }
        match &mut self.payload {
            ResultPayload::Vector(map) => {
                map.insert(method.to_string(), values);
                self.add_method(method);
                Ok(())
            }
            other => Err(payload_mismatch("vector", other)),
        }
    }

    pub fn vector(&self, method: &str) -> Option<&[f64]> {
        match &self.payload {
            ResultPayload::Vector(map) => map.get(method).map(Vec::as_slice),
            _ => None,
        }
    }

    fn add_method(&mut self, method: &str) {
        if !self.methods.contains(method) {
            self.methods.insert(method.to_string());
        }
    }
}

fn payload_mismatch(wanted: &str, payload: &ResultPayload) -> LabError {
    let found = match payload {
        ResultPayload::None => "none",
        ResultPayload::Scalar(_) => "scalar",
        ResultPayload::Vector(_) => "vector",
    };
    LabError::Setup(
        ErrorInfo::new("payload_family", "result payload already holds another family")
            .with_context("wanted", wanted)
            .with_context("found", found),
    )
}

/// Success and failure counts for one method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodTally {
    pub successes: usize,
    pub failures: usize,
}

/// Counts successes and failures per method across `results`.
pub fn tally_methods<'a>(
    results: impl IntoIterator<Item = &'a TaskResult>,
) -> BTreeMap<String, MethodTally> {
    let mut tallies: BTreeMap<String, MethodTally> = BTreeMap::new();
    for result in results {
        for method in result.methods() {
            let tally = tallies.entry(method.to_string()).or_default();
            if result.succeeded(method) {
                tally.successes += 1;
            } else {
                tally.failures += 1;
            }
        }
    }
    tallies
}

/// Distinct error messages per method among failed results.
pub fn method_errors<'a>(
    results: impl IntoIterator<Item = &'a TaskResult>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut errors: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for result in results {
        for method in result.methods() {
            let messages = errors.entry(method.to_string()).or_default();
            if !result.succeeded(method) {
                messages.insert(result.error_msg(method).unwrap_or_default().to_string());
            }
        }
    }
    errors
}

/// For every declared argument name, the sorted distinct values taken by
/// `tasks`. Numbers sort numerically, everything else by its JSON text.
pub fn summarize_tasks<'a>(
    args: &TaskArgs,
    tasks: impl IntoIterator<Item = &'a Task>,
) -> BTreeMap<String, Vec<Value>> {
    let mut names: Vec<&String> = args.names().iter().collect();
    names.sort();
    let mut summary: BTreeMap<String, Vec<Value>> =
        names.iter().map(|name| ((*name).clone(), Vec::new())).collect();
    for task in tasks {
        for name in &names {
            let Some(value) = task.get(name) else {
                continue;
            };
            if let Some(values) = summary.get_mut(*name) {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
    }
    for values in summary.values_mut() {
        values.sort_by(compare_values);
    }
    summary
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_string().cmp(&b.to_string()),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}
