// src/exec/command.rs

//! Subprocess stage runner.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::dag::{DependencyGraph, StageId};
use crate::errors::StagedagError;
use crate::exec::runner::{RunFuture, StageContext, StageOutcome, StageRunner};

/// Number of trailing stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs each stage's configured `cmd` through the platform shell.
///
/// The child is spawned with `kill_on_drop(true)`, so when the executor
/// drops the run future at its deadline the process is killed.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    commands: HashMap<StageId, String>,
    workdir: Option<PathBuf>,
}

impl CommandRunner {
    /// Build a runner from every stage's `cmd`.
    ///
    /// Fails if any stage has no command, since nothing else could run it.
    pub fn from_graph(graph: &DependencyGraph) -> crate::errors::Result<Self> {
        let mut commands = HashMap::new();
        for stage in graph.stages() {
            match &stage.cmd {
                Some(cmd) if !cmd.trim().is_empty() => {
                    commands.insert(stage.id.clone(), cmd.clone());
                }
                _ => {
                    return Err(StagedagError::ConfigError(format!(
                        "stage '{}' has no `cmd` to run",
                        stage.id
                    )));
                }
            }
        }
        Ok(Self {
            commands,
            workdir: None,
        })
    }

    /// Run commands from this directory instead of the current one.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    async fn run_inner(&self, ctx: &StageContext, cmd_line: &str) -> Result<StageOutcome> {
        info!(
            stage = %ctx.stage_id,
            reason = %ctx.reason,
            cmd = %cmd_line,
            "starting stage process"
        );

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(cmd_line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(cmd_line);
            c
        };

        cmd.env("STAGEDAG_STAGE", &ctx.stage_id)
            .env("STAGEDAG_TRIGGER", ctx.reason.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for stage '{}'", ctx.stage_id))?;

        // Always consume stdout so buffers don't fill; log at debug.
        if let Some(stdout) = child.stdout.take() {
            let stage = ctx.stage_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(stage = %stage, "stdout: {}", line);
                }
            });
        }

        // Keep the tail of stderr for the failure message.
        let stderr_tail = child.stderr.take().map(|stderr| {
            let stage = ctx.stage_id.clone();
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(stage = %stage, "stderr: {}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for process of stage '{}'", ctx.stage_id))?;

        let code = status.code().unwrap_or(-1);
        info!(
            stage = %ctx.stage_id,
            exit_code = code,
            success = status.success(),
            "stage process exited"
        );

        if status.success() {
            return Ok(StageOutcome::Completed);
        }

        // A grandchild may still hold stderr open; don't wait past the deadline.
        let stderr = match stderr_tail {
            Some(handle) => tokio::time::timeout(ctx.remaining(), handle)
                .await
                .ok()
                .and_then(|joined| joined.ok())
                .unwrap_or_default(),
            None => String::new(),
        };

        let msg = if stderr.trim().is_empty() {
            format!("exit code {code}")
        } else {
            format!("exit code {code}: {}", stderr.trim())
        };
        Ok(StageOutcome::Failed(msg))
    }
}

impl StageRunner for CommandRunner {
    fn run(&self, ctx: StageContext) -> RunFuture<'_> {
        Box::pin(async move {
            let Some(cmd_line) = self.commands.get(&ctx.stage_id) else {
                return StageOutcome::failed(format!("no command configured for stage '{}'", ctx.stage_id));
            };

            match self.run_inner(&ctx, cmd_line).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(stage = %ctx.stage_id, error = %err, "stage execution error");
                    StageOutcome::Failed(format!("{err:#}"))
                }
            }
        })
    }
}
