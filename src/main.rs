use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use purge::cli::Cli;
use purge::clock::SystemClock;
use purge::config::{Config, ConfigFile};
use purge::scheduling::listing_pool_size;
use purge::Phase;

fn build_config(cli: &Cli) -> purge::Result<Config> {
    let mut config = Config::default();

    let config_file_path = cli
        .config
        .clone()
        .or_else(|| ConfigFile::find_ancestor(&cli.path));
    if let Some(path) = config_file_path {
        ConfigFile::load(&path)?.apply_to(&mut config);
    }

    cli.apply_to(&mut config);

    if !config.root.is_absolute() {
        let cwd = std::env::current_dir()?;
        config.root = cwd.join(&config.root);
    }

    Ok(config)
}

async fn run(config: Config) -> ExitCode {
    purge::logging::init(config.log_level);

    match purge::purge(config, Arc::new(SystemClock)).await {
        Ok(snapshot) if snapshot.phase == Phase::Aborted => ExitCode::from(2),
        Ok(_) => ExitCode::from(0),
        Err(_) => ExitCode::from(1),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{{\"level\":\"error\",\"message\":\"{err}\"}}");
            return ExitCode::from(1);
        }
    };

    // spawn_blocking calls (directory listing, stat, unlink, rmdir) are the vast majority
    // of the work this binary does; size the blocking pool off subdir_slots rather than
    // trusting tokio's small default, or deep trees serialize on pool exhaustion.
    let blocking_threads = listing_pool_size(config.subdir_slots);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(blocking_threads)
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{{\"level\":\"error\",\"message\":\"failed to start runtime: {err}\"}}");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(run(config))
}
