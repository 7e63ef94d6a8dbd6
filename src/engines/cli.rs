//! Subprocess engine
//!
//! Spawns the configured tool in its own process group, feeds it the prompt,
//! and collects stdout/stderr under a hard timeout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

use crate::errors::{GatekeeperError, Result};
use crate::evidence::EvidenceStore;
use crate::schemas::{EngineConfig, PromptMode, Verdict};

use super::parser::parse_output;
use super::{render_engine_prompt, EngineRequest, RunResult, ValidatorEngine};

/// Time between SIGTERM and SIGKILL on timeout
pub const TERM_GRACE: Duration = Duration::from_secs(5);

/// How long to drain the pipes once the group has been killed
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Argument vector for one run (program first)
pub fn build_argv(config: &EngineConfig, prompt: &str) -> Vec<String> {
    let mut argv = vec![config.command.clone()];
    argv.extend(config.pre_flags.iter().cloned());

    let mut prompt_inserted = false;
    if let Some(subcommand) = &config.subcommand {
        argv.push(subcommand.clone());
        if config.subcommand_takes_prompt {
            argv.push(prompt.to_string());
            prompt_inserted = true;
        }
    }

    argv.extend(config.output_flags.iter().cloned());

    if config.prompt_mode == PromptMode::Argument && !prompt_inserted {
        argv.push(prompt.to_string());
    }
    argv
}

/// Engine backed by a CLI tool
#[derive(Debug, Clone)]
pub struct CliEngine {
    id: String,
    config: EngineConfig,
}

impl CliEngine {
    pub fn new(id: impl Into<String>, config: EngineConfig) -> Self {
        CliEngine {
            id: id.into(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn writes_stdin(&self) -> bool {
        self.config.prompt_mode == PromptMode::Stdin && !self.config.subcommand_takes_prompt
    }
}

#[async_trait]
impl ValidatorEngine for CliEngine {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, request: &EngineRequest, _evidence: &EvidenceStore) -> Result<RunResult> {
        let prompt = render_engine_prompt(&request.prompt);
        let argv = build_argv(&self.config, &prompt);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .envs(&self.config.env)
            .current_dir(&request.worktree)
            .stdin(if self.writes_stdin() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GatekeeperError::EngineError(format!("Failed to spawn {}: {}", self.config.command, e))
        })?;
        let pid = child.id();
        let deadline = Instant::now() + request.timeout;

        tracing::info!(
            validator = %request.validator.id,
            engine = %self.id,
            pid = pid.unwrap_or_default(),
            "validator started"
        );

        // Written beside the wait: a tool may never read its stdin.
        let writer = child.stdin.take().map(|mut stdin| {
            let mut payload = prompt.into_bytes();
            if let Some(terminator) = &self.config.stdin_terminator {
                payload.extend_from_slice(terminator.as_bytes());
            }
            let validator = request.validator.id.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::warn!(validator = %validator, "failed to write prompt: {}", e);
                }
                // stdin is dropped here, closing it
            })
        });

        let stdout_handle = tokio::spawn(read_lines(child.stdout.take()));
        let stderr_handle = tokio::spawn(read_lines(child.stderr.take()));

        let waited = timeout_at(deadline, child.wait()).await;
        if let Some(writer) = writer {
            writer.abort();
        }
        let (exit_code, timed_out) = match waited {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                return Err(GatekeeperError::EngineError(format!(
                    "Failed to wait for {}: {}",
                    self.config.command, e
                )))
            }
            Err(_) => {
                tracing::warn!(
                    validator = %request.validator.id,
                    timeout_secs = request.timeout.as_secs(),
                    "validator timed out, terminating process group"
                );
                terminate_group(&mut child, pid).await;
                (None, true)
            }
        };

        // Leftover group members can keep the pipes open after the leader exits.
        let output_deadline = if timed_out { Instant::now() } else { deadline };
        let (stdout_output, stderr_output) =
            collect_output(stdout_handle, stderr_handle, output_deadline, pid).await;

        if timed_out {
            let mut result = RunResult::pending(format!(
                "timed out after {}s",
                request.timeout.as_secs()
            ));
            result.raw_output = stdout_output;
            result.timed_out = true;
            result.process_id = pid;
            return Ok(result);
        }

        let parsed = parse_output(&self.config.response_parser, &self.id, &stdout_output);
        let verdict = match exit_code {
            Some(0) => parsed.verdict,
            _ if parsed.explicit => parsed.verdict,
            _ => Verdict::Pending,
        };
        let rationale = if verdict == Verdict::Pending && exit_code != Some(0) && !parsed.explicit {
            let stderr_tail: String = stderr_output.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            format!("exited with {:?}: {}", exit_code, stderr_tail)
        } else {
            parsed.rationale
        };

        tracing::info!(
            validator = %request.validator.id,
            verdict = %verdict,
            exit_code = exit_code.unwrap_or(-1),
            "validator finished"
        );

        Ok(RunResult {
            verdict,
            rationale,
            confidence: parsed.confidence,
            raw_output: stdout_output,
            exit_code,
            timed_out: false,
            delegated: false,
            process_id: pid,
        })
    }
}

async fn read_lines<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut out = String::new();
    if let Some(pipe) = pipe {
        let mut reader = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

fn group_id(pid: Option<u32>) -> Option<libc::pid_t> {
    pid.and_then(|p| libc::pid_t::try_from(p).ok())
}

fn kill_group(pgid: libc::pid_t, signal: libc::c_int) {
    // SAFETY: killpg only sends a signal; pgid is the group created at spawn.
    unsafe {
        libc::killpg(pgid, signal);
    }
}

/// Join the pipe readers by `deadline`; past it, SIGKILL the group and drain briefly
async fn collect_output(
    stdout: JoinHandle<String>,
    stderr: JoinHandle<String>,
    deadline: Instant,
    pid: Option<u32>,
) -> (String, String) {
    let aborts = [stdout.abort_handle(), stderr.abort_handle()];
    let readers = futures::future::join(stdout, stderr);
    tokio::pin!(readers);

    let joined = match timeout_at(deadline, &mut readers).await {
        Ok(joined) => Some(joined),
        Err(_) => {
            tracing::warn!(pid = pid.unwrap_or_default(), "output pipes still open, killing process group");
            if let Some(pgid) = group_id(pid) {
                kill_group(pgid, libc::SIGKILL);
            }
            timeout(DRAIN_GRACE, &mut readers).await.ok()
        }
    };

    match joined {
        Some((out, err)) => (out.unwrap_or_default(), err.unwrap_or_default()),
        None => {
            for handle in aborts {
                handle.abort();
            }
            (String::new(), String::new())
        }
    }
}

/// SIGTERM the child's process group, then SIGKILL after the grace period
async fn terminate_group(child: &mut Child, pid: Option<u32>) {
    let Some(pgid) = group_id(pid) else {
        let _ = child.kill().await;
        return;
    };

    kill_group(pgid, libc::SIGTERM);
    if timeout(TERM_GRACE, child.wait()).await.is_ok() {
        // Leader is gone; sweep stragglers in the group.
        kill_group(pgid, libc::SIGKILL);
        return;
    }

    kill_group(pgid, libc::SIGKILL);
    let _ = child.wait().await;
}
