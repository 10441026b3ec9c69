//! Non-interactive ani-cli invocations used for downloads.

use std::env;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use tracing::{debug, info, warn};

use crate::catalog::Mode;
use crate::error::EngineError;

const STDERR_TAIL_CHARS: usize = 240;
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EpisodeRange {
    Single(u32),
    Span { first: u32, last: u32 },
}

impl EpisodeRange {
    pub(crate) fn as_arg(self) -> String {
        match self {
            Self::Single(episode) => episode.to_string(),
            Self::Span { first, last } => format!("{first}-{last}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DownloadRequest {
    pub(crate) query: String,
    pub(crate) select_index: u32,
    pub(crate) episodes: EpisodeRange,
    pub(crate) mode: Mode,
}

/// Runs one download to completion. Implementations block for the whole transfer.
pub(crate) trait Downloader: Send + Sync {
    fn download(&self, request: &DownloadRequest) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
pub(crate) struct AniCli {
    bin: PathBuf,
    download_dir: PathBuf,
    timeout: Duration,
}

impl AniCli {
    pub(crate) fn new(bin: PathBuf, download_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            bin,
            download_dir,
            timeout,
        }
    }

    pub(crate) fn build_command(&self, request: &DownloadRequest) -> ProcessCommand {
        let mut cmd = ProcessCommand::new(&self.bin);
        cmd.arg("-d")
            .arg("-S")
            .arg(request.select_index.to_string())
            .arg("-e")
            .arg(request.episodes.as_arg());
        if request.mode == Mode::Dub {
            cmd.arg("--dub");
        }
        cmd.arg(&request.query)
            .env("ANI_CLI_DOWNLOAD_DIR", &self.download_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        cmd
    }
}

impl Downloader for AniCli {
    fn download(&self, request: &DownloadRequest) -> Result<(), EngineError> {
        fs::create_dir_all(&self.download_dir).map_err(|err| {
            EngineError::io(
                format!("failed to create {}", self.download_dir.display()),
                err,
            )
        })?;

        let capture = StderrCapture::new()
            .map_err(|err| EngineError::io("failed to create ani-cli log file", err))?;
        let mut cmd = self.build_command(request);
        cmd.stderr(Stdio::from(capture.file().map_err(|err| {
            EngineError::io("failed to open ani-cli log file", err)
        })?));

        info!(
            query = %request.query,
            select = request.select_index,
            episodes = %request.episodes.as_arg(),
            mode = %request.mode,
            "launching ani-cli download"
        );
        let status = run_with_timeout(cmd, &self.bin, self.timeout)?;
        if status.success() {
            return Ok(());
        }

        let tail = capture.tail(STDERR_TAIL_CHARS);
        let detail = if tail.is_empty() {
            format!("exited with status {status}")
        } else {
            format!("exited with status {status} ({tail})")
        };
        Err(EngineError::ExternalToolFailure(detail))
    }
}

pub(crate) fn resolve_ani_cli_bin_from_env(env_value: Option<OsString>) -> PathBuf {
    match env_value {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from("ani-cli"),
    }
}

/// Spawns `cmd` in its own process group and waits at most `timeout` for it.
pub(crate) fn run_with_timeout(
    mut cmd: ProcessCommand,
    bin: &Path,
    timeout: Duration,
) -> Result<ExitStatus, EngineError> {
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => EngineError::ExternalToolFailure(format!(
            "{} is not installed or not in PATH",
            bin.display()
        )),
        _ => EngineError::ExternalToolFailure(format!(
            "failed to launch {}: {err}",
            bin.display()
        )),
    })?;
    let pid = child.id();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(child.wait());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(status)) => {
            debug!(pid, %status, "ani-cli exited");
            Ok(status)
        }
        Ok(Err(err)) => Err(EngineError::ExternalToolFailure(format!(
            "failed waiting on {}: {err}",
            bin.display()
        ))),
        Err(RecvTimeoutError::Timeout) => {
            warn!(pid, timeout_secs = timeout.as_secs(), "ani-cli timed out; terminating");
            terminate_process_group(pid);
            if rx.recv_timeout(KILL_GRACE).is_err() {
                warn!(pid, "ani-cli did not exit after being killed");
            }
            Err(EngineError::Timeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(EngineError::ExternalToolFailure(format!(
            "lost track of {} while waiting for it",
            bin.display()
        ))),
    }
}

#[cfg(unix)]
fn terminate_process_group(pid: u32) {
    let pgid = pid as libc::pid_t;
    unsafe {
        if libc::kill(-pgid, libc::SIGTERM) != 0 {
            let _ = libc::kill(pgid, libc::SIGTERM);
        }
    }
    thread::sleep(Duration::from_millis(200));
    unsafe {
        let _ = libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_process_group(pid: u32) {
    let _ = ProcessCommand::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

/// Temp file collecting ani-cli's stderr for failure messages.
#[derive(Debug)]
struct StderrCapture {
    path: PathBuf,
}

impl StderrCapture {
    fn new() -> io::Result<Self> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = env::temp_dir().join(format!(
            "anishelf-ani-cli-{}-{ts}.log",
            std::process::id()
        ));
        File::create(&path)?;
        Ok(Self { path })
    }

    fn file(&self) -> io::Result<File> {
        File::options().append(true).open(&self.path)
    }

    fn tail(&self, max_chars: usize) -> String {
        let Ok(mut file) = File::open(&self.path) else {
            return String::new();
        };
        let len = file.metadata().map(|meta| meta.len()).unwrap_or(0);
        let window = (max_chars as u64).saturating_mul(4);
        if file.seek(SeekFrom::Start(len.saturating_sub(window))).is_err() {
            return String::new();
        }
        let mut raw = Vec::new();
        if file.read_to_end(&mut raw).is_err() {
            return String::new();
        }
        let text = String::from_utf8_lossy(&raw);
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let skip = collapsed.chars().count().saturating_sub(max_chars);
        collapsed.chars().skip(skip).collect()
    }
}

impl Drop for StderrCapture {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn request(mode: Mode, episodes: EpisodeRange) -> DownloadRequest {
        DownloadRequest {
            query: "naruto".to_string(),
            select_index: 2,
            episodes,
            mode,
        }
    }

    fn args_of(cmd: &ProcessCommand) -> Vec<String> {
        cmd.get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn builds_single_episode_download_command() {
        let ani_cli = AniCli::new(
            PathBuf::from("ani-cli"),
            PathBuf::from("/tmp/dl"),
            Duration::from_secs(60),
        );
        let cmd = ani_cli.build_command(&request(Mode::Sub, EpisodeRange::Single(5)));

        assert_eq!(args_of(&cmd), vec!["-d", "-S", "2", "-e", "5", "naruto"]);
        let download_dir = cmd
            .get_envs()
            .find(|(key, _)| *key == "ANI_CLI_DOWNLOAD_DIR")
            .and_then(|(_, value)| value);
        assert_eq!(download_dir, Some(Path::new("/tmp/dl").as_os_str()));
    }

    #[test]
    fn builds_dubbed_season_range_command() {
        let ani_cli = AniCli::new(
            PathBuf::from("ani-cli"),
            PathBuf::from("/tmp/dl"),
            Duration::from_secs(60),
        );
        let cmd = ani_cli.build_command(&request(
            Mode::Dub,
            EpisodeRange::Span { first: 1, last: 12 },
        ));

        assert_eq!(
            args_of(&cmd),
            vec!["-d", "-S", "2", "-e", "1-12", "--dub", "naruto"]
        );
    }

    #[test]
    fn resolve_ani_cli_bin_uses_default_when_env_is_missing_or_empty() {
        assert_eq!(resolve_ani_cli_bin_from_env(None), PathBuf::from("ani-cli"));
        assert_eq!(
            resolve_ani_cli_bin_from_env(Some(OsString::new())),
            PathBuf::from("ani-cli")
        );
        assert_eq!(
            resolve_ani_cli_bin_from_env(Some(OsString::from("/opt/ani-cli"))),
            PathBuf::from("/opt/ani-cli")
        );
    }

    #[test]
    fn missing_binary_is_reported_as_tool_failure() {
        let bin = PathBuf::from("anishelf-definitely-missing-binary");
        let err = run_with_timeout(ProcessCommand::new(&bin), &bin, Duration::from_secs(1))
            .expect_err("spawn should fail");
        assert!(err.to_string().contains("not installed"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_status_is_returned() {
        let bin = PathBuf::from("sh");
        let mut cmd = ProcessCommand::new(&bin);
        cmd.args(["-c", "exit 3"]);
        let status = run_with_timeout(cmd, &bin, Duration::from_secs(5)).expect("sh runs");
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[test]
    fn slow_process_is_killed_at_the_ceiling() {
        let bin = PathBuf::from("sh");
        let mut cmd = ProcessCommand::new(&bin);
        cmd.args(["-c", "sleep 30"]);
        let started = Instant::now();

        let err = run_with_timeout(cmd, &bin, Duration::from_millis(150)).expect_err("timeout");

        assert_eq!(err, EngineError::Timeout(Duration::from_millis(150)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn stderr_tail_keeps_last_characters() {
        let capture = StderrCapture::new().expect("capture");
        fs::write(&capture.path, "line one\nsecond line\nfinal error: no episodes\n")
            .expect("write");
        assert_eq!(capture.tail(24), "final error: no episodes");
    }
}
