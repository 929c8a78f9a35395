//! Signal handling for installer commands and the daemon launcher

use colored::Colorize;
use tokio::process::Child;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, warn};

/// Resolves on the first SIGINT. Installer commands race their work
/// against this; dropping the work kills any in-flight child.
/// Never resolves if the handler cannot be installed.
pub async fn interrupted() {
    match signal(SignalKind::interrupt()) {
        Ok(mut sigint) => {
            sigint.recv().await;
            eprintln!("{} Received SIGINT (cancelling)", "↓".cyan());
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    }
}

/// Wait for `child`, forwarding SIGINT/SIGTERM to it as SIGTERM.
/// Returns the child's exit code (128 + signal when killed by one).
pub async fn wait_forwarding(child: &mut Child) -> std::io::Result<i32> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            status = child.wait() => return Ok(exit_code_of(status?)),
            _ = sigint.recv() => forward_terminate(child, "SIGINT"),
            _ = sigterm.recv() => forward_terminate(child, "SIGTERM"),
        }
    }
}

fn forward_terminate(child: &Child, received: &str) {
    let Some(pid) = child.id() else {
        return;
    };
    debug!(pid, received, "forwarding SIGTERM to daemon");
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
        warn!(error = %e, "failed to forward signal to daemon");
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn mirrors_child_exit_code() {
        let mut child = Command::new("sh")
            .args(["-c", "exit 7"])
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        assert_eq!(wait_forwarding(&mut child).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn killed_child_reports_signal_code() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let pid = nix::unistd::Pid::from_raw(child.id().unwrap() as i32);
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM).unwrap();
        assert_eq!(wait_forwarding(&mut child).await.unwrap(), 128 + 15);
    }
}
