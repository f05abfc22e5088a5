use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("cpc {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("CPC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("os: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    println!(
        "features: peer={}, async={}, cli=true",
        cfg!(feature = "peer"),
        cfg!(feature = "async")
    );
    println!("protocol: raw terminal, !CPC/!CPD framing, capability bits 0x0007");

    Ok(SUCCESS)
}
