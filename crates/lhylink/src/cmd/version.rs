use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("lhylink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: lhylink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", env!("LHYLINK_BUILD_TARGET"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "payload: {} bytes, wire: {} bytes",
        lhylink_frame::PAYLOAD_LEN,
        lhylink_frame::WIRE_LEN
    );
    println!("transports: socket={}, sim=true", cfg!(unix));

    Ok(SUCCESS)
}
