use clap::Parser;
use re_server::config::Config;
use re_server::App;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "re-server")]
#[command(about = "Remote execution / remote cache API server", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "re-server.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config).await?;

    re_util::tracing_init::init(&config.debug.log_level)
        .map_err(|e| anyhow::anyhow!("initializing tracing: {e}"))?;

    raise_file_limit();

    let server_cfg = config
        .server
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("config is missing a [server] section"))?;

    let app = App::build(&config).await?;
    app.serve(server_cfg).await?;
    Ok(())
}

/// Raise the open-file soft limit toward `TARGET_FILE_ULIMIT`; a failure
/// here is non-fatal, it just leaves the default (usually lower) ceiling.
fn raise_file_limit() {
    let target = re_core::constants::TARGET_FILE_ULIMIT;
    let mut limits = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limits` is a plain-old-data struct fully initialized above,
    // and `RLIMIT_NOFILE` is a valid resource constant for this platform.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limits) } != 0 {
        return;
    }
    limits.rlim_cur = target.min(limits.rlim_max);
    // SAFETY: `limits` was populated by the successful `getrlimit` call above.
    unsafe {
        libc::setrlimit(libc::RLIMIT_NOFILE, &limits);
    }
}
