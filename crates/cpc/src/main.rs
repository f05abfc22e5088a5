mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "cpc", version, about = "CraftOS-PC raw protocol client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::FsOp;

    #[test]
    fn parses_fs_subcommand() {
        let cli = Cli::try_parse_from([
            "cpc",
            "fs",
            "rename",
            "/a.lua",
            "/b.lua",
            "--tcp",
            "127.0.0.1:9000",
            "--computer",
            "2",
        ])
        .expect("fs args should parse");

        let Command::Fs(args) = cli.command else {
            panic!("expected fs command");
        };
        assert_eq!(args.op, FsOp::Rename);
        assert_eq!(args.dest.as_deref(), Some("/b.lua"));
        assert_eq!(args.computer, 2);
        assert_eq!(args.peer.tcp.as_deref(), Some("127.0.0.1:9000"));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "cpc",
            "fs",
            "write",
            "/a.lua",
            "--data",
            "x",
            "--file",
            "/tmp/a.lua",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_kebab_case_operations() {
        let cli = Cli::try_parse_from(["cpc", "fs", "free-space", "/", "--unix", "/tmp/cpc.sock"])
            .expect("kebab-case op should parse");
        assert!(matches!(cli.command, Command::Fs(args) if args.op == FsOp::FreeSpace));
    }

    #[test]
    fn parses_attach_and_decode() {
        let cli = Cli::try_parse_from(["cpc", "attach", "--tcp", "localhost:1", "--count", "3"])
            .expect("attach args should parse");
        assert!(matches!(cli.command, Command::Attach(ref args) if args.count == Some(3)));

        let cli = Cli::try_parse_from(["cpc", "--format", "json", "decode", "capture.raw"])
            .expect("decode args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(matches!(cli.command, Command::Decode(_)));
    }
}
