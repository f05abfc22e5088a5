use std::fs;

use bytes::Bytes;
use cpc_peer::{Connection, PeerError};
use cpc_transport::CpcWriter;
use serde_json::json;

use crate::cmd::{FsArgs, FsOp};
use crate::exit::{io_error, peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{preview, print_raw, print_record, OutputFormat, Record};

pub fn run(args: FsArgs, format: OutputFormat) -> CliResult<i32> {
    check_args(&args)?;
    let payload = resolve_payload(&args)?;

    let session = args.peer.open()?;
    let capabilities = session
        .capabilities()
        .map_err(|err| peer_error("handshake failed", err))?;
    if !capabilities.filesystem {
        let _ = session.close();
        return Err(peer_error("fs", PeerError::FilesystemUnsupported));
    }

    let outcome = execute(session.connection(), &args, payload);
    if let Err(err) = session.close() {
        tracing::warn!(%err, "session close failed");
    }
    let result = outcome.map_err(|err| peer_error(op_name(args.op), err))?;

    match result {
        FsOutput::Content(data) if matches!(format, OutputFormat::Pretty) => print_raw(&data),
        FsOutput::Content(data) => {
            let record = Record::new(
                op_name(args.op),
                Some(args.computer),
                format!("{} bytes {}", data.len(), preview(&data)),
            )
            .with_detail(json!({
                "path": args.path,
                "size": data.len(),
                "content": String::from_utf8_lossy(&data),
            }));
            print_record(&record, format);
        }
        FsOutput::Value { summary, value } => {
            let record = Record::new(op_name(args.op), Some(args.computer), summary)
                .with_detail(json!({
                    "path": args.path,
                    "dest": args.dest,
                    "result": value,
                }));
            print_record(&record, format);
        }
    }
    Ok(SUCCESS)
}

enum FsOutput {
    Value {
        summary: String,
        value: serde_json::Value,
    },
    Content(Bytes),
}

impl FsOutput {
    fn value(summary: impl ToString, value: serde_json::Value) -> Self {
        FsOutput::Value {
            summary: summary.to_string(),
            value,
        }
    }

    fn done() -> Self {
        Self::value("ok", json!(true))
    }
}

fn execute(
    connection: &Connection<CpcWriter>,
    args: &FsArgs,
    payload: Bytes,
) -> cpc_peer::Result<FsOutput> {
    let cid = args.computer;
    let path = args.path.as_str();
    let dest = args.dest.as_deref().unwrap_or_default();

    Ok(match args.op {
        FsOp::Exists => {
            let found = connection.exists(cid, path)?;
            FsOutput::value(found, json!(found))
        }
        FsOp::IsDir => {
            let dir = connection.is_directory(cid, path)?;
            FsOutput::value(dir, json!(dir))
        }
        FsOp::IsReadOnly => {
            let read_only = connection.is_read_only(cid, path)?;
            FsOutput::value(read_only, json!(read_only))
        }
        FsOp::Size => {
            let size = connection.size(cid, path)?;
            FsOutput::value(size, json!(size))
        }
        FsOp::Drive => {
            let drive = connection.drive(cid, path)?;
            FsOutput::value(&drive, json!(drive))
        }
        FsOp::Capacity => {
            let capacity = connection.capacity(cid, path)?;
            FsOutput::value(capacity, json!(capacity))
        }
        FsOp::FreeSpace => {
            let free = connection.free_space(cid, path)?;
            FsOutput::value(free, json!(free))
        }
        FsOp::List => {
            let entries = connection.list(cid, path)?;
            FsOutput::value(entries.join("  "), json!(entries))
        }
        FsOp::Find => {
            let matches = connection.find(cid, path)?;
            FsOutput::value(matches.join("  "), json!(matches))
        }
        FsOp::Stat => match connection.stat(cid, path)? {
            Some(stat) => {
                let kind = if stat.is_dir { "dir" } else { "file" };
                let access = if stat.is_read_only { "ro" } else { "rw" };
                FsOutput::value(
                    format!("{kind} {access} {} bytes modified={}", stat.size, stat.modified),
                    json!(stat),
                )
            }
            None => FsOutput::value("not found", serde_json::Value::Null),
        },
        FsOp::Read => FsOutput::Content(connection.read(cid, path, args.binary)?),
        FsOp::Write => {
            connection.write(cid, path, payload, args.binary)?;
            FsOutput::done()
        }
        FsOp::Append => {
            connection.append(cid, path, payload, args.binary)?;
            FsOutput::done()
        }
        FsOp::Mkdir => {
            connection.create_directory(cid, path)?;
            FsOutput::done()
        }
        FsOp::Delete => {
            connection.delete(cid, path)?;
            FsOutput::done()
        }
        FsOp::Rename => {
            connection.rename(cid, path, dest)?;
            FsOutput::done()
        }
        FsOp::Copy => {
            connection.copy(cid, path, dest)?;
            FsOutput::done()
        }
    })
}

fn check_args(args: &FsArgs) -> CliResult<()> {
    let name = op_name(args.op);
    if args.op.needs_dest() != args.dest.is_some() {
        let message = if args.op.needs_dest() {
            format!("{name} needs a destination path")
        } else {
            format!("{name} takes a single path")
        };
        return Err(CliError::new(USAGE, message));
    }
    let has_payload = args.data.is_some() || args.file.is_some();
    if has_payload && !args.op.needs_payload() {
        return Err(CliError::new(
            USAGE,
            format!("--data/--file only apply to write and append, not {name}"),
        ));
    }
    Ok(())
}

fn resolve_payload(args: &FsArgs) -> CliResult<Bytes> {
    if let Some(data) = &args.data {
        return Ok(Bytes::from(data.clone().into_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map(Bytes::from)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Bytes::new())
}

fn op_name(op: FsOp) -> &'static str {
    match op {
        FsOp::Exists => "exists",
        FsOp::IsDir => "is-dir",
        FsOp::IsReadOnly => "is-read-only",
        FsOp::Size => "size",
        FsOp::Drive => "drive",
        FsOp::Capacity => "capacity",
        FsOp::FreeSpace => "free-space",
        FsOp::List => "list",
        FsOp::Find => "find",
        FsOp::Stat => "stat",
        FsOp::Read => "read",
        FsOp::Write => "write",
        FsOp::Append => "append",
        FsOp::Mkdir => "mkdir",
        FsOp::Delete => "delete",
        FsOp::Rename => "rename",
        FsOp::Copy => "copy",
    }
}
