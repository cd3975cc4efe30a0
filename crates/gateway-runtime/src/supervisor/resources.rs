//! Resource limits applied to spawned tool processes (Unix, `native-sandbox`
//! feature only). Adapted from the teacher's `NativeRunner::apply_resource_limits`:
//! direct `rlimit` syscalls in a `pre_exec` closure, no shell wrapping.

use tokio::process::Command;

/// Default virtual-memory cap for a scanning subprocess.
const MAX_MEMORY_MB: u64 = 1024;
/// Default file-size cap — scanning tools should never need large output files.
const MAX_FSIZE_BYTES: u64 = 100 * 1024 * 1024;

#[cfg(all(unix, feature = "native-sandbox"))]
pub fn apply(command: &mut Command, max_cpu_seconds: u64) {
    let mem_bytes = MAX_MEMORY_MB * 1024 * 1024;
    // SAFETY: pre_exec runs between fork() and exec() in the child; setrlimit
    // is async-signal-safe.
    unsafe {
        command.pre_exec(move || {
            rlimit::setrlimit(rlimit::Resource::AS, mem_bytes, mem_bytes)
                .map_err(|e| std::io::Error::other(format!("RLIMIT_AS: {e}")))?;
            rlimit::setrlimit(rlimit::Resource::CPU, max_cpu_seconds, max_cpu_seconds)
                .map_err(|e| std::io::Error::other(format!("RLIMIT_CPU: {e}")))?;
            rlimit::setrlimit(rlimit::Resource::FSIZE, MAX_FSIZE_BYTES, MAX_FSIZE_BYTES)
                .map_err(|e| std::io::Error::other(format!("RLIMIT_FSIZE: {e}")))?;
            Ok(())
        });
    }
}

#[cfg(not(all(unix, feature = "native-sandbox")))]
pub fn apply(_command: &mut Command, _max_cpu_seconds: u64) {
    tracing::debug!("native-sandbox resource limits not active on this build");
}
