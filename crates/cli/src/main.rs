// parlance CLI entry point.

use clap::Parser;
use parlance_client::config::ClientConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_code;
mod output;
mod session;

use exit_code::ExitCode;

#[derive(Parser)]
#[command(name = "parlance", about = "Realtime chat from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let config = ClientConfig::load();

    // Logs go to stderr so stdout stays machine-readable.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match commands::run(cli.command, config) {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => ExitCode::from_error(&error).into(),
    }
}
