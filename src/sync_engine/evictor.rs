//! External evictor invocation.
//!
//! Eviction from local storage is delegated to a provider-specific command
//! line tool (`cloudfile` on macOS), expected to live alongside the
//! application. The tool only kicks off the provider's background eviction,
//! so callers wrap invocations in settle delays; this module owns the
//! subprocess protocol and its bounded timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Invocation protocol for the external eviction tool.
///
/// The delays are provider- and bandwidth-dependent, so they are tunable
/// rather than constants. Defaults match observed Dropbox/iCloud behavior.
#[derive(Debug, Clone)]
pub struct EvictorConfig {
    /// Executable invoked as `<command> evict <target_path>`.
    pub command: PathBuf,
    /// Hard deadline for one invocation.
    pub timeout: Duration,
    /// Delay before the first eviction attempt, so the provider's uploader
    /// can observe the freshly copied file.
    pub settle_before: Duration,
    /// Delay after a successful first attempt.
    pub settle_after: Duration,
    /// Shorter delay used after a successful retry.
    pub retry_settle: Duration,
}

impl Default for EvictorConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("./cloudfile"),
            timeout: Duration::from_secs(5),
            settle_before: Duration::from_secs(3),
            settle_after: Duration::from_secs(3),
            retry_settle: Duration::from_secs(2),
        }
    }
}

/// A retryable eviction failure. The copy has already succeeded by the time
/// eviction runs, so none of these are fatal to the file.
#[derive(Debug, Error)]
pub enum EvictError {
    #[error("evictor timed out after {0:?}")]
    Timeout(Duration),
    #[error("evictor exited with {0}")]
    Failed(std::process::ExitStatus),
    #[error("failed to launch evictor: {0}")]
    Io(#[from] std::io::Error),
}

impl EvictorConfig {
    /// Runs one bounded eviction attempt against `target`.
    pub async fn evict(&self, target: &Path) -> Result<(), EvictError> {
        let mut child = Command::new(&self.command)
            .arg("evict")
            .arg(target)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        match timeout(self.timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(EvictError::Failed(status))
                }
            }
            Err(_) => {
                let _ = child.kill().await;
                Err(EvictError::Timeout(self.timeout))
            }
        }
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::testutil::stub_evictor;
    use super::*;
    use tempfile::TempDir;

    fn config(command: PathBuf, timeout: Duration) -> EvictorConfig {
        EvictorConfig {
            command,
            timeout,
            ..EvictorConfig::default()
        }
    }

    #[tokio::test]
    async fn successful_exit_is_ok() {
        let dir = TempDir::new().unwrap();
        let command = stub_evictor(dir.path(), "exit 0");
        let cfg = config(command, Duration::from_secs(5));
        assert!(cfg.evict(Path::new("/tmp/whatever")).await.is_ok());
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let command = stub_evictor(dir.path(), "exit 3");
        let cfg = config(command, Duration::from_secs(5));
        match cfg.evict(Path::new("/tmp/whatever")).await {
            Err(EvictError::Failed(status)) => assert_eq!(status.code(), Some(3)),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_evictor_hits_the_timeout() {
        let dir = TempDir::new().unwrap();
        let command = stub_evictor(dir.path(), "sleep 5");
        let cfg = config(command, Duration::from_millis(200));
        match cfg.evict(Path::new("/tmp/whatever")).await {
            Err(EvictError::Timeout(_)) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_executable_is_an_io_error() {
        let cfg = config(PathBuf::from("/nonexistent/cloudfile"), Duration::from_secs(1));
        match cfg.evict(Path::new("/tmp/whatever")).await {
            Err(EvictError::Io(_)) => {}
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
