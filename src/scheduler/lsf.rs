//! # LSF Adapter
//!
//! `SchedulerClient` backed by IBM Spectrum LSF command-line tools.
//!
//! - submit: `bsub -J {name} -M {mem} -R "rusage[mem={mem}]" -o {out} -e {err} [-q queue] argv…`,
//!   acknowledged as `Job <12345> is submitted to queue <normal>.`
//! - query: `bjobs -noheader -o "stat exit_code" 12345`, answered as `EXIT 130`
//!   or `DONE -`.

use std::process::{Command, Output};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::data::{JobHandle, RawStatus};
use crate::error::{ChunkjobError, Result};
use crate::scheduler::{JobSpec, SchedulerClient};

static JOB_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"Job <(\d+)>").expect("static job id pattern"));

#[derive(Clone, Debug)]
pub struct LsfClient {
    bsub: String,
    bjobs: String,
    queue: Option<String>,
    extra_args: Vec<String>,
}

impl Default for LsfClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LsfClient {
    pub fn new() -> Self {
        Self {
            bsub: "bsub".to_string(),
            bjobs: "bjobs".to_string(),
            queue: None,
            extra_args: Vec::new(),
        }
    }

    /// Override the `bsub`/`bjobs` executables
    pub fn with_programs(mut self, bsub: impl Into<String>, bjobs: impl Into<String>) -> Self {
        self.bsub = bsub.into();
        self.bjobs = bjobs.into();
        self
    }

    pub fn with_queue(mut self, queue: Option<String>) -> Self {
        self.queue = queue;
        self
    }

    /// Extra `bsub` options inserted before the job command
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn submit_command(&self, job: &JobSpec) -> Command {
        let mem = job.resources.memory_mb.to_string();
        let mut cmd = Command::new(&self.bsub);
        cmd.arg("-J")
            .arg(&job.name)
            .arg("-M")
            .arg(&mem)
            .arg("-R")
            .arg(format!("rusage[mem={}]", mem))
            .arg("-o")
            .arg(&job.stdout)
            .arg("-e")
            .arg(&job.stderr);
        if let Some(queue) = &self.queue {
            cmd.arg("-q").arg(queue);
        }
        cmd.args(&self.extra_args);
        cmd.args(&job.command);
        cmd
    }
}

fn run(program: &str, mut cmd: Command) -> Result<Output> {
    cmd.output()
        .map_err(|e| ChunkjobError::command(program, e.to_string()))
}

/// Extract the job id from a `bsub` acknowledgment
pub fn parse_submission(text: &str) -> Result<JobHandle> {
    JOB_ID
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(JobHandle)
        .ok_or_else(|| ChunkjobError::SubmissionParse {
            output: text.trim().to_string(),
        })
}

/// Parse `bjobs -noheader -o "stat exit_code"` output
pub fn parse_status(handle: JobHandle, text: &str) -> Result<RawStatus> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ChunkjobError::query(handle.0, "empty bjobs output"))?;

    let mut fields = line.split_whitespace();
    let status = fields
        .next()
        .ok_or_else(|| ChunkjobError::query(handle.0, "missing status field"))?;
    let exit_code = match fields.next() {
        None | Some("-") => None,
        Some(code) => Some(code.parse::<i32>().map_err(|_| {
            ChunkjobError::query(handle.0, format!("invalid exit code {:?}", code))
        })?),
    };
    Ok(RawStatus::new(status, exit_code))
}

impl SchedulerClient for LsfClient {
    fn submit(&self, job: &JobSpec) -> Result<JobHandle> {
        let output = run(&self.bsub, self.submit_command(job))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(job = %job.name, ack = %stdout.trim(), "bsub");
        if !output.status.success() {
            return Err(ChunkjobError::command(
                &self.bsub,
                format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        parse_submission(&stdout)
    }

    fn query(&self, handle: JobHandle) -> Result<RawStatus> {
        let mut cmd = Command::new(&self.bjobs);
        cmd.args(["-noheader", "-o", "stat exit_code"])
            .arg(handle.to_string());
        let output = run(&self.bjobs, cmd)?;
        if !output.status.success() {
            return Err(ChunkjobError::query(
                handle.0,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        parse_status(handle, &String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ResourceSpec;
    use std::path::PathBuf;

    fn job() -> JobSpec {
        JobSpec {
            name: "chr1.2".to_string(),
            command: vec!["impute2".to_string(), "-int".to_string(), "5000000".to_string()],
            resources: ResourceSpec { memory_mb: 9000 },
            stdout: PathBuf::from("/out/logs/chr1.2.1.out"),
            stderr: PathBuf::from("/out/logs/chr1.2.1.err"),
        }
    }

    #[test]
    fn test_parse_submission() {
        let h = parse_submission("Job <4711> is submitted to queue <normal>.\n").unwrap();
        assert_eq!(h, JobHandle(4711));
    }

    #[test]
    fn test_parse_submission_failure() {
        let err = parse_submission("Request aborted by esub. Job not submitted.").unwrap_err();
        assert!(matches!(err, ChunkjobError::SubmissionParse { .. }));
        assert!(parse_submission("").is_err());
    }

    #[test]
    fn test_parse_status() {
        let h = JobHandle(1);
        assert_eq!(parse_status(h, "EXIT 130\n").unwrap(), RawStatus::new("EXIT", Some(130)));
        assert_eq!(parse_status(h, "\nDONE -\n").unwrap(), RawStatus::new("DONE", None));
        assert_eq!(parse_status(h, "RUN").unwrap(), RawStatus::new("RUN", None));
        assert!(parse_status(h, "   \n").is_err());
        assert!(parse_status(h, "EXIT abc").is_err());
    }

    #[test]
    fn test_submit_command_line() {
        let client = LsfClient::new().with_queue(Some("long".to_string()));
        let cmd = client.submit_command(&job());
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.get_program(), "bsub");
        assert_eq!(
            args,
            vec![
                "-J",
                "chr1.2",
                "-M",
                "9000",
                "-R",
                "rusage[mem=9000]",
                "-o",
                "/out/logs/chr1.2.1.out",
                "-e",
                "/out/logs/chr1.2.1.err",
                "-q",
                "long",
                "impute2",
                "-int",
                "5000000",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_submit_parses_acknowledgment_from_program_output() {
        // `echo` repeats its arguments, so the job command doubles as the acknowledgment
        let client = LsfClient::new().with_programs("echo", "false");
        let mut spec = job();
        spec.command = vec!["Job".to_string(), "<321>".to_string(), "is".to_string(), "submitted".to_string()];
        assert_eq!(client.submit(&spec).unwrap(), JobHandle(321));

        let err = client.query(JobHandle(321)).unwrap_err();
        assert!(matches!(err, ChunkjobError::SchedulerQuery { handle: 321, .. }));
    }

    #[test]
    fn test_missing_program_is_command_error() {
        let client = LsfClient::new().with_programs("/nonexistent/bsub", "/nonexistent/bjobs");
        let err = client.submit(&job()).unwrap_err();
        assert!(matches!(err, ChunkjobError::SchedulerCommand { .. }));
    }
}
