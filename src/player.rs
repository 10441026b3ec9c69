//! Foreground playback of downloaded files through an external media player.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, ExitStatus, Stdio};

use anyhow::{Context, Result, anyhow};
use tracing::info;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use crate::error::EngineError;

pub(crate) trait Player: Send + Sync {
    /// Plays `file` and returns once the player exits.
    fn play(&self, file: &Path) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
pub(crate) struct ExternalPlayer {
    bin: PathBuf,
}

impl ExternalPlayer {
    pub(crate) fn new(bin: PathBuf) -> Self {
        Self { bin }
    }
}

impl Player for ExternalPlayer {
    fn play(&self, file: &Path) -> Result<(), EngineError> {
        let mut cmd = ProcessCommand::new(&self.bin);
        cmd.arg(file)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        info!(player = %self.bin.display(), file = %file.display(), "starting playback");
        let status = with_sigint_ignored(|| run_interactive_cmd(cmd)).map_err(|err| {
            let not_found = err
                .chain()
                .filter_map(|cause| cause.downcast_ref::<io::Error>())
                .any(|cause| cause.kind() == io::ErrorKind::NotFound);
            if not_found {
                EngineError::ExternalToolFailure(format!(
                    "{} is not installed or not in PATH",
                    self.bin.display()
                ))
            } else {
                EngineError::ExternalToolFailure(format!("{err:#}"))
            }
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::ExternalToolFailure(format!(
                "{} exited with status {status}",
                self.bin.display()
            )))
        }
    }
}

#[cfg(unix)]
struct ScopedSigaction {
    signum: libc::c_int,
    old_action: libc::sigaction,
}

#[cfg(unix)]
impl ScopedSigaction {
    fn ignore(signum: libc::c_int) -> Result<Self> {
        unsafe {
            let mut new_action: libc::sigaction = std::mem::zeroed();
            new_action.sa_sigaction = libc::SIG_IGN;
            libc::sigemptyset(&mut new_action.sa_mask);
            new_action.sa_flags = 0;

            let mut old_action: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &new_action, &mut old_action) != 0 {
                return Err(anyhow!("failed to update signal action for {signum}"));
            }

            Ok(Self { signum, old_action })
        }
    }
}

#[cfg(unix)]
impl Drop for ScopedSigaction {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::sigaction(self.signum, &self.old_action, std::ptr::null_mut());
        }
    }
}

/// Gives the terminal back to our process group when the player exits.
#[cfg(unix)]
struct TerminalForegroundGuard {
    stdin_fd: libc::c_int,
    parent_pgrp: libc::pid_t,
    child_foreground: bool,
}

#[cfg(unix)]
impl TerminalForegroundGuard {
    fn new(stdin_fd: libc::c_int, parent_pgrp: libc::pid_t) -> Self {
        Self {
            stdin_fd,
            parent_pgrp,
            child_foreground: false,
        }
    }

    fn handoff_to_child(&mut self, child_pgrp: libc::pid_t) {
        self.child_foreground = unsafe { libc::tcsetpgrp(self.stdin_fd, child_pgrp) == 0 };
    }
}

#[cfg(unix)]
impl Drop for TerminalForegroundGuard {
    fn drop(&mut self) {
        if !self.child_foreground {
            return;
        }
        unsafe {
            let _ = libc::tcsetpgrp(self.stdin_fd, self.parent_pgrp);
        }
    }
}

#[cfg(unix)]
fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let _sigint_guard = ScopedSigaction::ignore(libc::SIGINT)?;
    f()
}

#[cfg(not(unix))]
fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    f()
}

#[cfg(unix)]
fn run_interactive_cmd(mut cmd: ProcessCommand) -> Result<ExitStatus> {
    let stdin_fd = libc::STDIN_FILENO;
    let parent_pgrp = unsafe { libc::tcgetpgrp(stdin_fd) };
    if parent_pgrp == -1 {
        return cmd.status().context("failed to launch player");
    }

    let _sigttou_guard = ScopedSigaction::ignore(libc::SIGTTOU)?;
    let mut terminal_guard = TerminalForegroundGuard::new(stdin_fd, parent_pgrp);

    unsafe {
        cmd.pre_exec(|| {
            libc::signal(libc::SIGINT, libc::SIG_DFL);
            libc::signal(libc::SIGQUIT, libc::SIG_DFL);
            libc::signal(libc::SIGTSTP, libc::SIG_DFL);
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().context("failed to spawn player")?;
    terminal_guard.handoff_to_child(child.id() as libc::pid_t);
    child.wait().context("failed waiting on player")
}

#[cfg(not(unix))]
fn run_interactive_cmd(mut cmd: ProcessCommand) -> Result<ExitStatus> {
    cmd.status().context("failed to launch player")
}
