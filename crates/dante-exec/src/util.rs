use std::{path::Path, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Child,
};
use tracing::trace;

/// Stops `child`: SIGTERM to its process group, then SIGKILL once `grace`
/// has elapsed. Returns after the child has been reaped.
#[cfg(unix)]
pub async fn kill_graceful(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGTERM);
    }
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return Ok(());
    }
    trace!(target: "dante.exec", "grace period elapsed; killing");
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGKILL);
    }
    child.kill().await
}

#[cfg(not(unix))]
pub async fn kill_graceful(child: &mut Child, _grace: Duration) -> std::io::Result<()> {
    child.kill().await
}

/// Signals the whole process group led by `pid`, falling back to the process
/// alone when it is not a group leader.
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe {
        if libc::kill(-pid, signal) != 0 {
            libc::kill(pid, signal);
        }
    }
}

/// Reads `pipe` to EOF, keeping at most `cap` bytes.
pub(crate) async fn read_capped<R>(pipe: Option<R>, cap: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8 * 1024];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

/// Sleeps for `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_deadline(deadline: Option<Duration>) {
    match deadline {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

/// Writes `content` to `path` with mode `0755`.
pub(crate) async fn write_executable(path: &Path, content: &str) -> std::io::Result<()> {
    tokio::fs::write(path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

/// Appends `bytes` to `buf` without letting it grow past `cap` bytes.
pub(crate) fn push_capped(buf: &mut Vec<u8>, bytes: &[u8], cap: usize) {
    let room = cap.saturating_sub(buf.len());
    buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_capped_truncates_but_drains() {
        let data: &[u8] = b"abcdefghij";
        let out = read_capped(Some(data), 4).await;
        assert_eq!(out, "abcd");
        assert_eq!(read_capped(None::<&[u8]>, 4).await, "");
    }

    #[test]
    fn push_capped_stops_at_cap() {
        let mut buf = Vec::new();
        push_capped(&mut buf, b"hello", 3);
        push_capped(&mut buf, b"world", 3);
        assert_eq!(buf, b"hel");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_graceful_reaps_term_ignoring_child() {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 30")
            .process_group(0)
            .spawn()
            .unwrap();
        kill_graceful(&mut child, Duration::from_millis(200)).await.unwrap();
        assert!(child.try_wait().unwrap().is_some());
    }
}
