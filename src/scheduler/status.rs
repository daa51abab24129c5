//! # Status Mapping
//!
//! Maps a scheduler's raw `(status, exit code)` pair to an `Outcome`:
//!
//! | raw status        | exit code          | Outcome             |
//! |-------------------|--------------------|---------------------|
//! | in `running`      | any                | Running             |
//! | in `exited`       | in `memory_limit_exit_codes` | MemoryLimitExceeded |
//! | in `finished`     | 0 or not reported  | Succeeded           |
//! | anything else     | anything else      | Failed              |
//!
//! Exit-code conventions differ between schedulers and sites, so the table is
//! data, loadable from JSON:
//!
//! ```json
//! { "running": ["RUN", "PEND"], "exited": ["EXIT"], "finished": ["DONE"],
//!   "memory_limit_exit_codes": [130] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::{Outcome, RawStatus};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusTable {
    pub running: Vec<String>,
    pub exited: Vec<String>,
    pub finished: Vec<String>,
    #[serde(default)]
    pub memory_limit_exit_codes: Vec<i32>,
}

impl Default for StatusTable {
    /// IBM Spectrum LSF (`bjobs -o stat`). TERM_MEMLIMIT jobs exit with 130.
    fn default() -> Self {
        Self {
            running: ["RUN", "PEND", "PSUSP", "USUSP", "SSUSP", "WAIT", "PROV"]
                .into_iter()
                .map(String::from)
                .collect(),
            exited: vec!["EXIT".to_string()],
            finished: vec!["DONE".to_string()],
            memory_limit_exit_codes: vec![130],
        }
    }
}

impl StatusTable {
    /// Load a table from a JSON file
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Replace the memory-limit exit codes
    pub fn with_memory_limit_codes(mut self, codes: Vec<i32>) -> Self {
        self.memory_limit_exit_codes = codes;
        self
    }

    pub fn classify(&self, raw: &RawStatus) -> Outcome {
        let status = raw.status.trim();
        let is = |set: &[String]| set.iter().any(|s| s == status);

        if is(&self.running) {
            return Outcome::Running;
        }
        if is(&self.exited)
            && raw
                .exit_code
                .is_some_and(|c| self.memory_limit_exit_codes.contains(&c))
        {
            return Outcome::MemoryLimitExceeded;
        }
        if is(&self.finished) && matches!(raw.exit_code, None | Some(0)) {
            return Outcome::Succeeded;
        }
        Outcome::Failed(raw.clone())
    }
}
