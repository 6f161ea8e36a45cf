use std::collections::BTreeMap;
use std::path::PathBuf;

use model::Stage;

/// A unit of scheduled work: one named external job bound to one direction.
///
/// Immutable once constructed. The parameter bundle is built from the
/// direction's and bands' state at construction time; results flow back as
/// named output-file references in the `OpResult`.
#[derive(Debug)]
pub struct Operation {
    /// Operation name (the stage name, or a run-level name like "makemosaic").
    pub name: String,
    /// Stage this operation advances, if it is a per-direction stage.
    pub stage: Option<Stage>,
    /// Name of the bound direction ("field" for run-level operations).
    pub direction: String,
    /// Named parameter bundle handed to the external job.
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Named output-file references the job is expected to produce.
    pub outputs: BTreeMap<String, PathBuf>,
    /// Directory for the job's artifacts (parameters, logs, outputs).
    pub work_dir: PathBuf,
    /// Completed in a previous run; skip the launch but reproduce outputs.
    pub resumed: bool,
}

impl Operation {
    pub fn new(stage: Stage, direction: &str, work_dir: PathBuf) -> Self {
        Self {
            name: stage.name().to_owned(),
            stage: Some(stage),
            direction: direction.to_owned(),
            params: serde_json::Map::new(),
            outputs: BTreeMap::new(),
            work_dir,
            resumed: false,
        }
    }

    pub fn run_level(name: &str, work_dir: PathBuf) -> Self {
        Self {
            name: name.to_owned(),
            stage: None,
            direction: "field".to_owned(),
            params: serde_json::Map::new(),
            outputs: BTreeMap::new(),
            work_dir,
            resumed: false,
        }
    }

    /// "facetselfcal/D0", for logs and error messages.
    pub fn label(&self) -> String {
        format!("{}/{}", self.name, self.direction)
    }

    pub fn param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    /// Declare an expected output file below the work dir and record it in
    /// the parameter bundle so the job knows where to put it.
    pub fn output(mut self, key: &str, file_name: &str) -> Self {
        let path = self.work_dir.join(file_name);
        self.params
            .insert(key.to_owned(), path.display().to_string().into());
        self.outputs.insert(key.to_owned(), path);
        self
    }

    pub fn resumed(mut self, resumed: bool) -> Self {
        self.resumed = resumed;
        self
    }
}

/// Terminal status of a scheduled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Succeeded,
    Failed,
    /// Completed in a previous run; no job was launched.
    Skipped,
}

/// What came back from one operation.
#[derive(Debug)]
pub struct OpResult {
    pub name: String,
    pub stage: Option<Stage>,
    pub direction: String,
    pub status: OpStatus,
    /// Subtraction quality verdict, read back for selfcal operations only.
    pub verify_ok: Option<bool>,
    /// Named output-file references to write back onto the direction.
    pub outputs: BTreeMap<String, PathBuf>,
}

impl OpResult {
    pub fn ok(&self) -> bool {
        matches!(self.status, OpStatus::Succeeded | OpStatus::Skipped)
    }
}
