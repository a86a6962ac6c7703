//! lockctl entry point

use clap::Parser;
use lockctl_cli::{Cli, ExitCode, OutputFormatter};
use lockctl_core::config::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            OutputFormatter::new(cli.output, cli.verbose).print_error(&e, ExitCode::from(&e));
            return ExitCode::InvalidInput.to_exit_code();
        }
    };

    // RUST_LOG wins, then --debug / --verbose, then the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else if cli.verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"))
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.execute_with_config(config).await {
        Ok(code) => code.to_exit_code(),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::GeneralError.to_exit_code()
        }
    }
}
