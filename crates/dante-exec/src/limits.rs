//! POSIX resource limits for script subprocesses.
//!
//! Limits are installed in a `pre_exec` hook, so they apply in the child after
//! `fork()` and before the interpreter starts. Non-Unix targets log a warning
//! and run without limits.
use serde::{Deserialize, Serialize};
use tokio::process::Command;
#[cfg(not(unix))]
use tracing::warn;

/// Optional rlimits applied to every script the daemon runs. `None` leaves the
/// inherited limit untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`; exceeding it delivers `SIGXFSZ`.
    pub max_file_size_bytes: Option<u64>,
    /// `RLIMIT_CPU` in seconds of CPU time.
    pub max_cpu_seconds: Option<u64>,
    /// Sets `RLIMIT_CORE` to zero.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none()
            && self.max_file_size_bytes.is_none()
            && self.max_cpu_seconds.is_none()
            && !self.disable_core_dumps
    }
}

pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    if config.is_empty() {
        return;
    }

    #[cfg(unix)]
    unix_impl::attach(cmd, config.clone());

    #[cfg(not(unix))]
    {
        let _ = cmd;
        warn!(target: "dante.exec.limits", ?config, "rlimits are not supported on this platform; ignoring");
    }
}

#[cfg(unix)]
mod unix_impl {
    use std::io;

    use tokio::process::Command;

    use super::RlimitConfig;

    // Resource constants differ in integer type across libcs.
    macro_rules! set {
        ($resource:expr, $value:expr) => {{
            let rlim = libc::rlimit {
                rlim_cur: $value as libc::rlim_t,
                rlim_max: $value as libc::rlim_t,
            };
            if libc::setrlimit($resource, &rlim) != 0 {
                return Err(io::Error::last_os_error());
            }
        }};
    }

    pub(super) fn attach(cmd: &mut Command, config: RlimitConfig) {
        // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                if let Some(n) = config.max_open_files {
                    set!(libc::RLIMIT_NOFILE, n);
                }
                if let Some(n) = config.max_file_size_bytes {
                    set!(libc::RLIMIT_FSIZE, n);
                }
                if let Some(n) = config.max_cpu_seconds {
                    set!(libc::RLIMIT_CPU, n);
                }
                if config.disable_core_dumps {
                    set!(libc::RLIMIT_CORE, 0u64);
                }
                Ok(())
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        assert!(RlimitConfig::default().is_empty());
        let cfg = RlimitConfig {
            max_cpu_seconds: Some(60),
            ..Default::default()
        };
        assert!(!cfg.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn limits_apply_in_child() {
        let cfg = RlimitConfig {
            max_open_files: Some(64),
            ..Default::default()
        };
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("ulimit -n");
        attach_rlimits(&mut cmd, &cfg);
        let out = cmd.output().await.unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "64");
    }
}
