//! Capped, idle-aware output draining for a spawned tool's stdout/stderr.

use tokio::io::AsyncReadExt;
use tokio::time::Duration;

/// Reads one stream up to a byte cap, never blocking past `idle_timeout`
/// between reads (a tool that stalls mid-scan is killed by the caller once
/// `idle_timeout_triggered` comes back true).
pub struct OutputWatchdog {
    idle_timeout: Duration,
    max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct WatchdogOutput {
    pub data: String,
    pub truncated: bool,
    pub idle_timeout_triggered: bool,
}

impl OutputWatchdog {
    pub fn new(idle_timeout: Duration, max_bytes: usize) -> Self {
        Self {
            idle_timeout,
            max_bytes,
        }
    }

    /// Once `max_bytes` is reached, keeps reading into a throwaway buffer
    /// instead of stopping — the child's pipe would otherwise fill and block
    /// its write(), hanging it until the wall-clock deadline kills it. Only
    /// EOF, a read error, or the idle timeout ends the drain.
    pub async fn read_with_idle_detection<R: AsyncReadExt + Unpin>(
        &self,
        reader: &mut R,
    ) -> WatchdogOutput {
        let mut buf = vec![0u8; self.max_bytes];
        let mut total = 0usize;
        let mut truncated = false;
        let mut idle_triggered = false;
        let mut discard = [0u8; 8192];

        loop {
            let target: &mut [u8] = if total < self.max_bytes {
                &mut buf[total..]
            } else {
                truncated = true;
                &mut discard
            };
            match tokio::time::timeout(self.idle_timeout, reader.read(target)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    if total < self.max_bytes {
                        total += n;
                    }
                }
                Ok(Err(_)) => break,
                Err(_) => {
                    idle_triggered = true;
                    break;
                }
            }
        }

        let data = String::from_utf8_lossy(&buf[..total]).to_string();

        WatchdogOutput {
            data,
            truncated,
            idle_timeout_triggered: idle_triggered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_to_eof_without_truncation() {
        let (mut writer, mut reader) = duplex(1024);
        let watchdog = OutputWatchdog::new(Duration::from_secs(5), 4096);

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(b"hello world").await.unwrap();
            drop(writer);
        });

        let out = watchdog.read_with_idle_detection(&mut reader).await;
        assert!(!out.truncated);
        assert_eq!(out.data, "hello world");
    }

    #[tokio::test]
    async fn truncates_at_cap() {
        let (mut writer, mut reader) = duplex(1024);
        let watchdog = OutputWatchdog::new(Duration::from_secs(5), 10);

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(b"abcdefghijklmnop").await.unwrap();
            drop(writer);
        });

        let out = watchdog.read_with_idle_detection(&mut reader).await;
        assert!(out.truncated);
        assert_eq!(out.data.len(), 10);
    }

    #[tokio::test]
    async fn idle_timeout_flagged_not_truncation() {
        let (_writer, mut reader) = duplex(1024);
        let watchdog = OutputWatchdog::new(Duration::from_millis(30), 4096);

        let out = watchdog.read_with_idle_detection(&mut reader).await;
        assert!(out.idle_timeout_triggered);
        assert!(!out.truncated);
    }
}
