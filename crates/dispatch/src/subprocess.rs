//! Subprocess (CLI) simulation backend
//!
//! Runs an external simulation as a child process: expands a parameter
//! template into the command line, waits under the call deadline, then
//! parses stdout or a declared output file into the standard result form.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use sim_optimizer_types::{DispatchError, ParameterVector, SimulationResult};

use crate::context::RunContext;
use crate::parse::{parse_csv, parse_json};
use crate::runner::SimulationRunner;

/// Expected shape of the simulation's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Csv,
    Json,
}

/// Subprocess backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubprocessConfig {
    /// Base command, shell-interpreted
    pub command: String,
    /// Per-parameter fragment with `{name}` and `{value}` placeholders
    #[serde(default = "default_param_format")]
    pub param_format: String,
    /// Shape of stdout or the output file
    pub output_format: OutputFormat,
    /// If set, the simulation writes here; the file is read then deleted
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    /// Working directory for the child process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the child
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

fn default_param_format() -> String {
    "--{name} {value}".to_string()
}

impl SubprocessConfig {
    pub fn new(command: impl Into<String>, output_format: OutputFormat) -> Self {
        Self {
            command: command.into(),
            param_format: default_param_format(),
            output_format,
            output_file: None,
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_param_format(mut self, format: impl Into<String>) -> Self {
        self.param_format = format.into();
        self
    }

    pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Dispatch backend spawning one child process per call
pub struct SubprocessRunner {
    config: SubprocessConfig,
}

impl SubprocessRunner {
    pub fn new(config: SubprocessConfig) -> Self {
        Self { config }
    }

    /// Materialize the full command line for one parameter vector
    ///
    /// Values serialize through their canonical display form: floats
    /// shortest round-trip, integers decimal, booleans lower-case,
    /// categoricals as their text.
    pub fn build_command(&self, params: &ParameterVector) -> String {
        let fragments: Vec<String> = params
            .iter()
            .map(|(name, value)| {
                self.config
                    .param_format
                    .replace("{name}", name)
                    .replace("{value}", &value.to_string())
            })
            .collect();

        if fragments.is_empty() {
            self.config.command.clone()
        } else {
            format!("{} {}", self.config.command, fragments.join(" "))
        }
    }
}

#[async_trait]
impl SimulationRunner for SubprocessRunner {
    async fn run(
        &self,
        params: &ParameterVector,
        ctx: &RunContext,
    ) -> Result<SimulationResult, DispatchError> {
        let command_line = self.build_command(params);
        debug!(command = %command_line, attempt = ctx.attempt, "spawning simulation process");

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| DispatchError::SpawnFailed(e.to_string()))?;

        // Dropping the wait future kills the whole process group via
        // kill_on_drop, so timeout and cancel need no explicit reaping.
        let wait = child.wait_with_output();
        let waited = match ctx.deadline {
            Some(deadline) => tokio::select! {
                waited = wait => waited,
                _ = tokio::time::sleep(deadline) => {
                    warn!(command = %command_line, "simulation exceeded its deadline, killing");
                    return Err(DispatchError::Timeout);
                }
                _ = ctx.cancel.cancelled() => return Err(DispatchError::Cancelled),
            },
            None => tokio::select! {
                waited = wait => waited,
                _ = ctx.cancel.cancelled() => return Err(DispatchError::Cancelled),
            },
        };

        let output = waited.map_err(|e| DispatchError::SpawnFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(DispatchError::ExitNonZero {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let raw = match &self.config.output_file {
            Some(path) => {
                let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                    DispatchError::ParseFailed(format!(
                        "cannot read output file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(path = %path.display(), "failed to delete output file: {}", e);
                }
                text
            }
            None => String::from_utf8_lossy(&output.stdout).into_owned(),
        };

        let (table, kpis) = match self.config.output_format {
            OutputFormat::Csv => (parse_csv(&raw).map_err(DispatchError::ParseFailed)?, Default::default()),
            OutputFormat::Json => parse_json(&raw).map_err(DispatchError::ParseFailed)?,
        };

        Ok(SimulationResult::new(table, params.clone()).with_kpis(kpis))
    }
}
