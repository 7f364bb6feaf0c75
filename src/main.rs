//! Trial Monitor CLI entry point.

use clap::Parser;

use trial_monitor::cli::{self, commands, Cli, Commands};
use trial_monitor::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli.command, cli.config, cli.json).await {
        cli::handle_error(err, cli.json);
    }
}

async fn run(command: Commands, config_path: Option<std::path::PathBuf>, json_mode: bool) -> anyhow::Result<()> {
    let mut config = cli::load_config(config_path.as_ref())?;
    if let Commands::Run(ref args) = command {
        if args.verbose {
            config.logging.level = "debug".to_string();
        }
    }

    let _logger = LoggerImpl::init(&LogConfig::from_settings(&config.logging)?)?;

    match command {
        Commands::Run(args) => commands::run::execute(args, config, json_mode).await,
        Commands::Studies(args) => commands::studies::execute(args, config, json_mode).await,
        Commands::Note(args) => commands::note::execute(args, config, json_mode).await,
        Commands::Config => commands::config::execute(&config, json_mode),
    }
}
