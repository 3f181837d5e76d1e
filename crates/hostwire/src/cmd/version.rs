use hostwire_protocol::{HIGHEST_SUPPORTED_VERSION, MINIMUM_VERSION_WITH_DEBUG_SUPPORT};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("hostwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: hostwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("HOSTWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("protocol_max_version: {HIGHEST_SUPPORTED_VERSION}");
    println!("protocol_debug_min_version: {MINIMUM_VERSION_WITH_DEBUG_SUPPORT}");
    println!("features: host={}, cli=true", cfg!(feature = "host"));

    Ok(SUCCESS)
}
