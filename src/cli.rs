use clap::{Args, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cmsgist",
    version,
    about = "Fetch a gist and run it inside a CMSSW environment"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Local script path or gist id.
    pub gist: String,
    #[arg(short = 'v', long = "cmssw-version")]
    pub cmssw_version: Option<String>,
    #[arg(short = 'a', long = "scram-arch")]
    pub scram_arch: Option<String>,
    #[arg(short = 'd', long = "checkout-dir", default_value = ".")]
    pub checkout_dir: PathBuf,
    #[arg(short = 'g', long = "gist-dir", default_value = ".")]
    pub gist_dir: PathBuf,
    /// Script sourced after the environment and before the gist runs.
    #[arg(short = 's', long = "setup-file")]
    pub setup_file: Option<String>,
    /// Remove everything this run created once it finishes.
    #[arg(short = 'c', long)]
    pub cleanup: bool,
    /// Work in a fresh temporary directory (implies --cleanup).
    #[arg(short = 't', long)]
    pub temporary: bool,
    #[arg(short = 'e', long, default_value = "python")]
    pub executable: String,
    /// Skip the confirmation prompt.
    #[arg(short = 'f', long = "force-run")]
    pub force_run: bool,
    /// Print commands instead of running them.
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,
}
