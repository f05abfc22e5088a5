use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::stream::{CpcReader, CpcStream, CpcWriter};

/// How long [`CpcProcess::close`] waits for a voluntary exit before killing.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How to launch an emulator in raw mode.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Path to the emulator executable.
    pub program: PathBuf,
    /// Arguments passed before any data directory. Default: `--raw`.
    pub args: Vec<String>,
    /// Optional data directory, passed as `-d <dir>`.
    pub data_dir: Option<PathBuf>,
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    /// Raw-mode launch of `program` with default arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["--raw".to_string()],
            data_dir: None,
            cwd: None,
        }
    }

    /// Full argument vector, including the data directory flag.
    pub fn command_args(&self) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = self.args.iter().map(Into::into).collect();
        if let Some(dir) = &self.data_dir {
            args.push("-d".into());
            args.push(dir.clone().into_os_string());
        }
        args
    }
}

/// Handle to a spawned emulator process.
pub struct CpcProcess {
    child: Child,
    stderr_pump: Option<JoinHandle<()>>,
}

impl CpcProcess {
    /// OS process id.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().map_err(Into::into)
    }

    /// Wait up to `grace` for the process to exit on its own, then kill it.
    ///
    /// The caller is expected to have closed stdin first (see
    /// `CpcWriter::shutdown`). Returns the exit status, and whether the
    /// process had to be killed.
    pub fn close(mut self, grace: Duration) -> Result<(ExitStatus, bool)> {
        let deadline = Instant::now() + grace;
        let mut killed = false;
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!(
                    pid = self.child.id(),
                    "emulator did not exit in time; killing (unsaved changes may be lost)"
                );
                self.child.kill()?;
                killed = true;
                break self.child.wait()?;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        };

        if let Some(pump) = self.stderr_pump.take() {
            let _ = pump.join();
        }
        info!(code = ?status.code(), killed, "emulator process exited");
        Ok((status, killed))
    }
}

impl std::fmt::Debug for CpcProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpcProcess")
            .field("pid", &self.child.id())
            .finish()
    }
}

/// Launch an emulator process and attach to its standard streams.
///
/// stdout carries inbound frames, stdin outbound frames. stderr is forwarded
/// line by line to the log at debug level.
pub fn spawn_process(spec: &ProcessSpec) -> Result<CpcStream> {
    let mut command = Command::new(&spec.program);
    command
        .args(spec.command_args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|e| TransportError::Spawn {
        program: spec.program.clone(),
        source: e,
    })?;

    let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or(TransportError::MissingPipe("stdout"))?;
    let stderr_pump = child.stderr.take().map(|stderr| {
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) => debug!(target: "cpc::emulator", "{line}"),
                    Err(_) => break,
                }
            }
        })
    });

    info!(program = ?spec.program, pid = child.id(), "spawned emulator process");

    Ok(CpcStream::new(
        CpcReader::from_process(stdout),
        CpcWriter::from_process(stdin),
        Some(CpcProcess { child, stderr_pump }),
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn default_spec_requests_raw_mode() {
        let mut spec = ProcessSpec::new("craftos");
        assert_eq!(spec.command_args(), vec![std::ffi::OsString::from("--raw")]);

        spec.data_dir = Some(PathBuf::from("/data"));
        assert_eq!(
            spec.command_args(),
            vec![
                std::ffi::OsString::from("--raw"),
                std::ffi::OsString::from("-d"),
                std::ffi::OsString::from("/data"),
            ]
        );
    }

    #[test]
    fn spawn_missing_program_fails() {
        let spec = ProcessSpec::new("/nonexistent/cpc-emulator-binary");
        let err = spawn_process(&spec).unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[test]
    fn stdio_roundtrip_through_cat() {
        let spec = ProcessSpec {
            program: PathBuf::from("cat"),
            args: Vec::new(),
            data_dir: None,
            cwd: None,
        };
        let (mut reader, mut writer, process) = spawn_process(&spec).unwrap().into_parts();
        let process = process.expect("process transport carries a handle");

        writer.write_all(b"!CPC\n").unwrap();
        writer.flush().unwrap();
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"!CPC\n");

        writer.shutdown().unwrap();
        assert!(writer.write(b"x").is_err());

        let (status, killed) = process.close(Duration::from_secs(5)).unwrap();
        assert!(status.success());
        assert!(!killed);
    }

    #[test]
    fn close_kills_unresponsive_process() {
        let spec = ProcessSpec {
            program: PathBuf::from("sleep"),
            args: vec!["30".to_string()],
            data_dir: None,
            cwd: None,
        };
        let (_reader, _writer, process) = spawn_process(&spec).unwrap().into_parts();
        let (_status, killed) = process
            .unwrap()
            .close(Duration::from_millis(50))
            .unwrap();
        assert!(killed);
    }
}
