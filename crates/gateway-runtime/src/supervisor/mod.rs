//! Tool Supervisor (spec.md §4.1): turns a [`ToolRequest`] plus a
//! [`ToolDescriptor`] into a [`ToolResult`], running the spawned process out
//! of the library's own control — no shell, no side effects beyond the
//! child's own lifetime.
//!
//! Grounded on `cli_executor::executor::CliExecutor`'s spawn/monitor/kill
//! structure and `sandbox::native::NativeRunner`'s resource-limit +
//! allow-list shape, generalized from "one executable" to "one
//! allow-listed flag set per descriptor" plus the mode/tokenization/default-
//! injection/target-placement steps those teacher modules never needed.

pub mod resources;
pub mod tokenizer;
pub mod watchdog;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::target::validate_target;
use crate::types::{GatewayError, TargetKind, ToolDescriptor, ToolRequest, ToolResult};
use watchdog::OutputWatchdog;

const MAX_STDOUT_BYTES: usize = 1024 * 1024;
const MAX_STDERR_BYTES: usize = 256 * 1024;

pub struct ToolSupervisor;

impl ToolSupervisor {
    /// Run the full pipeline. Never panics and never returns `Err` — a
    /// pipeline failure becomes a [`ToolResult`] carrying its `error_type`
    /// (spec.md §7), so callers always get a result to serialize.
    /// `max_args_length` is the configured `security.max_args_length` bound
    /// (spec.md §3, §6) applied to `req.extra_args` after trimming.
    pub async fn execute(
        desc: &ToolDescriptor,
        req: &ToolRequest,
        max_args_length: u32,
    ) -> ToolResult {
        let correlation_id = req.correlation_id_or_generate();
        let start = Instant::now();

        match Self::try_execute(desc, req, max_args_length, &correlation_id).await {
            Ok(result) => result,
            Err(err) => {
                let elapsed = start.elapsed().as_secs_f64();
                ToolResult::from_error(correlation_id, &err, elapsed)
            }
        }
    }

    async fn try_execute(
        desc: &ToolDescriptor,
        req: &ToolRequest,
        max_args_length: u32,
        correlation_id: &str,
    ) -> Result<ToolResult, GatewayError> {
        let start = Instant::now();

        // Step 1: target validation.
        let target = validate_target(&req.target, desc.max_cidr_hosts)?;

        let trimmed_len = req.extra_args.trim().len();
        if trimmed_len > max_args_length as usize {
            return Err(GatewayError::Validation(format!(
                "extra_args length {trimmed_len} exceeds the configured maximum of {max_args_length}"
            )));
        }

        // Steps 2-3: mode extraction + flag allow-listing.
        let mut parsed = tokenizer::tokenize(desc, &req.extra_args)
            .map_err(|e| GatewayError::Validation(e.to_string()))?;

        let target_kind = match &parsed.mode {
            Some(mode) => {
                match mode.target_kind {
                    TargetKind::DnsFlag if target.had_url_scheme => {
                        return Err(GatewayError::Validation(
                            "DNS-mode target must not be a URL".to_string(),
                        ));
                    }
                    TargetKind::UrlFlag if !target.had_url_scheme => {
                        return Err(GatewayError::Validation(
                            "URL-mode target must begin with http:// or https://".to_string(),
                        ));
                    }
                    _ => {}
                }
                mode.target_kind.clone()
            }
            None => desc.default_target_kind.clone(),
        };

        // Step 4: default injection.
        tokenizer::inject_defaults(desc, parsed.mode.as_ref(), &mut parsed.tokens);

        // Step 5: target placement.
        tokenizer::place_target(target_kind, &target.raw, &mut parsed.tokens);

        let mut argv = Vec::with_capacity(parsed.tokens.len() + 1);
        if let Some(mode) = &parsed.mode {
            argv.push(mode.token.clone());
        }
        argv.extend(parsed.tokens);

        // Step 6: command resolution.
        let resolved = resolve_on_path(&desc.command)
            .ok_or_else(|| GatewayError::NotFound(desc.command.clone()))?;

        // Step 7: spawn and supervise.
        let deadline = effective_deadline(desc, req);
        let outcome = spawn_and_supervise(&resolved, &argv, deadline).await?;

        let elapsed = start.elapsed().as_secs_f64();
        let result = if outcome.timed_out {
            ToolResult::timed_out(
                correlation_id.to_string(),
                outcome.stdout,
                outcome.stderr,
                elapsed,
            )
        } else {
            ToolResult::completed(
                correlation_id.to_string(),
                outcome.stdout,
                outcome.stderr,
                outcome.return_code,
                outcome.stdout_truncated,
                outcome.stderr_truncated,
                elapsed,
            )
        };
        Ok(result.with_metadata("tool", desc.name.clone()))
    }
}

fn effective_deadline(desc: &ToolDescriptor, req: &ToolRequest) -> Duration {
    let descriptor_default = desc.default_timeout();
    match req.timeout_seconds {
        Some(secs) if secs > 0.0 => Duration::from_secs_f64(secs).min(descriptor_default),
        _ => descriptor_default,
    }
}

/// Whether `command` resolves on `PATH` — used by the health monitor's
/// dependency/tool checks without needing to spawn anything.
pub fn is_on_path(command: &str) -> bool {
    resolve_on_path(command).is_some()
}

/// Search `PATH` for an executable named `command`; also accepts an
/// already-qualified path. No `which`-style crate — this is a handful of
/// lines and the behavior needs to match exactly what we then `exec`.
fn resolve_on_path(command: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(command);
    if candidate.is_absolute() || command.contains('/') {
        return is_executable(&candidate).then_some(candidate);
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let full = dir.join(command);
        is_executable(&full).then_some(full)
    })
}

#[cfg(unix)]
fn is_executable(path: &PathBuf) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &PathBuf) -> bool {
    path.is_file()
}

struct SupervisedOutcome {
    stdout: String,
    stderr: String,
    return_code: i32,
    timed_out: bool,
    stdout_truncated: bool,
    stderr_truncated: bool,
}

async fn spawn_and_supervise(
    resolved: &PathBuf,
    argv: &[String],
    deadline: Duration,
) -> Result<SupervisedOutcome, GatewayError> {
    let mut command = Command::new(resolved);
    command.args(argv);
    command.env_clear();
    command.env("PATH", std::env::var("PATH").unwrap_or_default());
    command.env("LANG", "C.UTF-8");
    command.env("LC_ALL", "C.UTF-8");
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    #[cfg(unix)]
    {
        unsafe {
            command.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
    }
    resources::apply(&mut command, deadline.as_secs().max(1));

    let mut child = command.spawn().map_err(|e| {
        GatewayError::Execution(format!("failed to spawn '{}': {e}", resolved.display()))
    })?;

    let mut child_stdout = child.stdout.take();
    let mut child_stderr = child.stderr.take();

    let raced = tokio::time::timeout(deadline, async {
        let stdout_watchdog = OutputWatchdog::new(deadline, MAX_STDOUT_BYTES);
        let stderr_watchdog = OutputWatchdog::new(deadline, MAX_STDERR_BYTES);

        let stdout_fut = async {
            match child_stdout.as_mut() {
                Some(out) => stdout_watchdog.read_with_idle_detection(out).await,
                None => watchdog::WatchdogOutput {
                    data: String::new(),
                    truncated: false,
                    idle_timeout_triggered: false,
                },
            }
        };
        let stderr_fut = async {
            match child_stderr.as_mut() {
                Some(err) => stderr_watchdog.read_with_idle_detection(err).await,
                None => watchdog::WatchdogOutput {
                    data: String::new(),
                    truncated: false,
                    idle_timeout_triggered: false,
                },
            }
        };

        let (stdout_out, stderr_out) = tokio::join!(stdout_fut, stderr_fut);
        let status = child.wait().await;
        (stdout_out, stderr_out, status)
    })
    .await;

    match raced {
        Ok((stdout_out, stderr_out, status)) => {
            let return_code = status
                .ok()
                .and_then(|s| s.code())
                .unwrap_or(-1);
            Ok(SupervisedOutcome {
                stdout: stdout_out.data,
                stderr: stderr_out.data,
                return_code,
                timed_out: false,
                stdout_truncated: stdout_out.truncated,
                stderr_truncated: stderr_out.truncated,
            })
        }
        Err(_) => {
            kill_process_group(&mut child).await;
            Ok(SupervisedOutcome {
                stdout: String::new(),
                stderr: String::new(),
                return_code: crate::types::ErrorKind::Timeout.default_return_code(),
                timed_out: true,
                stdout_truncated: false,
                stderr_truncated: false,
            })
        }
    }
}

async fn kill_process_group(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(id) = child.id() {
            unsafe {
                libc::killpg(id as i32, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;

    const TEST_MAX_ARGS_LENGTH: u32 = 2048;

    fn echo_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "network_mapper".into(),
            command: "echo".into(),
            allowed_flags: vec!["-n".into()],
            allowed_modes: vec![],
            concurrency_limit: 2,
            default_timeout_seconds: 5.0,
            circuit_breaker_config: CircuitBreakerConfig::default(),
            optimizer_defaults: vec![],
            default_target_kind: TargetKind::Positional,
            max_cidr_hosts: None,
        }
    }

    #[tokio::test]
    async fn happy_path_completes() {
        let desc = echo_descriptor();
        let req = ToolRequest::new("192.168.1.1");
        let result = ToolSupervisor::execute(&desc, &req, TEST_MAX_ARGS_LENGTH).await;
        assert!(result.is_success());
        assert!(result.stdout.contains("192.168.1.1"));
    }

    #[tokio::test]
    async fn invalid_target_is_validation_error() {
        let desc = echo_descriptor();
        let req = ToolRequest::new("8.8.8.8");
        let result = ToolSupervisor::execute(&desc, &req, TEST_MAX_ARGS_LENGTH).await;
        assert_eq!(
            result.error_kind,
            Some(crate::types::ErrorKind::ValidationError)
        );
    }

    #[tokio::test]
    async fn unknown_command_is_not_found() {
        let mut desc = echo_descriptor();
        desc.command = "definitely-not-a-real-binary-xyz".into();
        let req = ToolRequest::new("192.168.1.1");
        let result = ToolSupervisor::execute(&desc, &req, TEST_MAX_ARGS_LENGTH).await;
        assert_eq!(result.error_kind, Some(crate::types::ErrorKind::NotFound));
        assert_eq!(result.return_code, 127);
    }

    #[tokio::test]
    async fn wall_clock_timeout_sets_124() {
        // A script ignores argv entirely, so appending the target positional
        // is harmless — this exercises the timeout path, not sleep(1)'s own
        // argument grammar.
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("stall.sh");
        std::fs::write(&script_path, "#!/bin/sh\nsleep 10\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut desc = echo_descriptor();
        desc.command = script_path.to_string_lossy().to_string();
        desc.default_timeout_seconds = 0.2;
        let req = ToolRequest::new("192.168.1.1");
        let result = ToolSupervisor::execute(&desc, &req, TEST_MAX_ARGS_LENGTH).await;
        assert!(result.timed_out);
        assert_eq!(result.return_code, 124);
    }

    #[tokio::test]
    async fn disallowed_flag_rejected_before_spawn() {
        let desc = echo_descriptor();
        let mut req = ToolRequest::new("192.168.1.1");
        req.extra_args = "--not-allowed".to_string();
        let result = ToolSupervisor::execute(&desc, &req, TEST_MAX_ARGS_LENGTH).await;
        assert_eq!(
            result.error_kind,
            Some(crate::types::ErrorKind::ValidationError)
        );
    }

    #[tokio::test]
    async fn oversized_extra_args_rejected_before_tokenizing() {
        let desc = echo_descriptor();
        let mut req = ToolRequest::new("192.168.1.1");
        req.extra_args = "-n".repeat(20);
        let result = ToolSupervisor::execute(&desc, &req, 10).await;
        assert_eq!(
            result.error_kind,
            Some(crate::types::ErrorKind::ValidationError)
        );
    }
}
