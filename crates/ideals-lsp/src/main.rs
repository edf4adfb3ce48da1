use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use ideals_config::{IdealsConfig, IDEALS_CONFIG_ENV_VAR};
use ideals_engine::PlainTextEngine;
use lsp_server::Connection;

fn main() -> anyhow::Result<()> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        eprintln!(
            "ideals-lsp {version}\n\nUsage:\n  ideals-lsp [--stdio] [--config <path>]\n",
            version = env!("CARGO_PKG_VERSION")
        );
        return Ok(());
    }

    let config = load_config_from_args(&args);
    ideals_config::init_tracing(&config.logging);
    tracing::info!(
        target = "ideals.lsp",
        version = env!("CARGO_PKG_VERSION"),
        "starting ideals-lsp"
    );

    // Only the stdio transport exists; `--stdio` is accepted for editor templates.
    let (connection, io_threads) = Connection::stdio();
    ideals_lsp::serve(&connection, config, Arc::new(PlainTextEngine::new()))?;
    drop(connection);
    io_threads.join()?;

    tracing::info!(target = "ideals.lsp", "ideals-lsp stopped");
    Ok(())
}

fn load_config_from_args(args: &[String]) -> IdealsConfig {
    if let Some(path) = parse_config_arg(args) {
        ideals_config::with_config_env_lock(|| env::set_var(IDEALS_CONFIG_ENV_VAR, &path));
        match IdealsConfig::load_from_path(&path) {
            Ok(config) => return config,
            Err(err) => {
                eprintln!("ideals-lsp: failed to load config from {}: {err}", path.display());
                return IdealsConfig::default();
            }
        }
    }

    let cwd = match env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("ideals-lsp: failed to determine current directory: {err}");
            return IdealsConfig::default();
        }
    };

    match ideals_config::load_for_workspace(&cwd) {
        Ok((config, _)) => config,
        Err(err) => {
            eprintln!(
                "ideals-lsp: failed to load workspace config from {}: {err}",
                cwd.display()
            );
            IdealsConfig::default()
        }
    }
}

fn parse_config_arg(args: &[String]) -> Option<PathBuf> {
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg == "--config" {
            let next = args.get(i + 1)?;
            return Some(PathBuf::from(next));
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        i += 1;
    }
    None
}
