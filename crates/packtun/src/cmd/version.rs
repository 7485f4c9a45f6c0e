use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("packtun {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: packtun");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("PACKTUN_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: command={}, http={}, async={}, cli=true",
        cfg!(feature = "command"),
        cfg!(feature = "http"),
        cfg!(feature = "async")
    );
    println!(
        "protocols: tunnel={}/v{}, command={}/v{}",
        String::from_utf8_lossy(&packtun_http::TUNNEL_MAGIC),
        packtun_http::TUNNEL_VERSION,
        String::from_utf8_lossy(&packtun_command::COMMAND_MAGIC),
        packtun_command::COMMAND_VERSION
    );

    Ok(SUCCESS)
}
