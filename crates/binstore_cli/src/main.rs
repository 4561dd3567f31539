//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `binstore_core` linkage and store bootstrap end to end.
//! - Print approximate counts for the sets named on the command line.

use binstore_core::{
    core_version, init_logging, load_config, Record, Repository, SqliteStore, StoreConfig,
};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "binstore_cli", version, about = "Bin store smoke check")]
struct Cli {
    /// JSON store config; defaults to an in-memory store
    #[arg(long, env = "BINSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Sets to count in the default namespace
    sets: Vec<String>,
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("binstore_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => load_config(path).map_err(|err| err.to_string())?,
        None => StoreConfig::default(),
    };

    let file_logging = init_logging(&config).map_err(|err| err.to_string())?;
    let store = Arc::new(SqliteStore::open(&config).map_err(|err| err.to_string())?);
    info!(
        "event=cli_start module=cli status=ok namespace={} file_logging={} sets={}",
        config.default_namespace,
        file_logging,
        cli.sets.len()
    );

    println!("binstore_core version={}", core_version());
    println!("binstore namespace={}", config.default_namespace);
    for set_name in &cli.sets {
        let repo: Repository<Record, SqliteStore> =
            Repository::with_location(Arc::clone(&store), "", set_name)
                .map_err(|err| err.to_string())?;
        let count = repo.count().map_err(|err| err.to_string())?;
        println!("binstore set={} count={}", repo.set_name(), count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn config_flag_and_sets_parse() {
        let cli = Cli::try_parse_from(["binstore_cli", "--config", "/etc/store.json", "User", "Car"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/store.json")));
        assert_eq!(cli.sets, vec!["User", "Car"]);
    }

    #[test]
    fn sets_alone_use_default_config() {
        let cli = Cli::try_parse_from(["binstore_cli", "User"]).unwrap();
        assert_eq!(cli.sets, vec!["User"]);
    }
}
