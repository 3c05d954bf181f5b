mod cleanup;
mod cli;
mod config;
mod environment;
mod error;
mod gist;
mod pipeline;
mod prompt;
mod shell;

use clap::Parser;
use cli::Cli;
use config::{load_settings, resolve_config_path};
use environment::AmbientEnv;
use error::Result;
use pipeline::Outcome;
use shell::BashRunner;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CMSGIST_LOG";

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(Outcome::Completed) => {}
        Ok(Outcome::Declined) => tracing::debug!("exiting without running the gist"),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<Outcome> {
    let config_path = resolve_config_path(cli.config.as_ref());
    let settings = load_settings(&config_path)?;
    let ambient = AmbientEnv::from_process();
    let runner = BashRunner::from_settings(&settings);
    pipeline::run(&cli.run, &ambient, &settings, &runner, prompt::confirm_run)
}
