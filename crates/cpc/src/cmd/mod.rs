use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use cpc_peer::{ConnectionConfig, HandshakeConfig, Session};
use cpc_transport::ProcessSpec;

use crate::exit::{peer_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod attach;
pub mod decode;
pub mod fs;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a peer and print window and notification events.
    Attach(AttachArgs),
    /// Run one file-system operation on a peer computer.
    Fs(FsArgs),
    /// Decode a captured raw stream and print every message.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Attach(args) => attach::run(args, format),
        Command::Fs(args) => fs::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the raw-mode peer lives. `--tcp` wins over `--unix`, which wins
/// over `--exec`, so an exported `CPC_EXECUTABLE` never blocks a socket.
#[derive(Args, Debug, Clone)]
pub struct PeerArgs {
    /// Emulator executable to launch in raw mode.
    #[arg(long = "exec", value_name = "PATH", env = "CPC_EXECUTABLE")]
    pub executable: Option<PathBuf>,
    /// Data directory passed to the launched emulator.
    #[arg(long, value_name = "DIR", env = "CPC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
    /// Connect to a raw-mode peer over TCP (host:port).
    #[arg(long, value_name = "ADDR")]
    pub tcp: Option<String>,
    /// Connect to a raw-mode peer over a Unix domain socket.
    #[arg(long, value_name = "PATH")]
    pub unix: Option<PathBuf>,
    /// File-system request timeout (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub timeout: String,
    /// How long to wait for the capability reply.
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
}

impl PeerArgs {
    pub fn config(&self) -> CliResult<ConnectionConfig> {
        Ok(ConnectionConfig {
            request_timeout: parse_duration(&self.timeout)?,
            handshake: HandshakeConfig {
                timeout: parse_duration(&self.handshake_timeout)?,
                ..HandshakeConfig::default()
            },
            ..ConnectionConfig::default()
        })
    }

    /// Open a session on the selected transport. The capability request is
    /// already on the wire when this returns.
    pub fn open(&self) -> CliResult<Session> {
        let config = self.config()?;
        let session = if let Some(addr) = &self.tcp {
            cpc_peer::connect_tcp(addr.as_str(), config)
        } else if let Some(path) = &self.unix {
            connect_unix(path, config)
        } else if let Some(program) = &self.executable {
            let mut spec = ProcessSpec::new(program);
            spec.data_dir = self.data_dir.clone();
            cpc_peer::connect_process(&spec, config)
        } else {
            return Err(CliError::new(
                USAGE,
                "no peer selected: pass --exec, --tcp or --unix (or set CPC_EXECUTABLE)",
            ));
        };
        session.map_err(|err| peer_error("connect failed", err))
    }
}

#[cfg(unix)]
fn connect_unix(path: &Path, config: ConnectionConfig) -> cpc_peer::Result<Session> {
    cpc_peer::connect_unix(path, config)
}

#[cfg(not(unix))]
fn connect_unix(path: &Path, _config: ConnectionConfig) -> cpc_peer::Result<Session> {
    Err(cpc_transport::TransportError::Connect {
        target: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::Unsupported),
    }
    .into())
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    #[command(flatten)]
    pub peer: PeerArgs,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Also print an event for every terminal redraw.
    #[arg(long)]
    pub redraws: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum FsOp {
    Exists,
    IsDir,
    IsReadOnly,
    Size,
    Drive,
    Capacity,
    FreeSpace,
    List,
    Find,
    Stat,
    Read,
    Write,
    Append,
    Mkdir,
    Delete,
    Rename,
    Copy,
}

impl FsOp {
    pub fn needs_dest(self) -> bool {
        matches!(self, FsOp::Rename | FsOp::Copy)
    }

    pub fn needs_payload(self) -> bool {
        matches!(self, FsOp::Write | FsOp::Append)
    }
}

#[derive(Args, Debug)]
pub struct FsArgs {
    #[command(flatten)]
    pub peer: PeerArgs,
    /// Operation to run.
    pub op: FsOp,
    /// Path on the peer computer (a glob pattern for `find`).
    pub path: String,
    /// Destination path for `rename` and `copy`.
    pub dest: Option<String>,
    /// Target computer id.
    #[arg(long, default_value = "0")]
    pub computer: u8,
    /// Payload for `write`/`append`.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the `write`/`append` payload from a local file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Open the file in binary mode.
    #[arg(long)]
    pub binary: bool,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file. Reads stdin when omitted.
    pub file: Option<PathBuf>,
    /// Decode payloads as client requests instead of peer messages.
    #[arg(long)]
    pub requests: bool,
    /// Start in binary-checksum mode instead of waiting for a capability message.
    #[arg(long)]
    pub binary_checksum: bool,
    /// Accept `!CPD` frames from the start.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
