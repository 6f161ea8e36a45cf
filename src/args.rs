use clap::Parser;

const CMD_NAME: &str = "ff";
const DEFAULT_PARSET: &str = "facetflow.toml";
const DEFAULT_WORKING_DIR: &str = "run";

/// Stores our command-line args format.
#[derive(Parser)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    /// Run-configuration (parset) file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_PARSET)]
    #[arg(env = "FACETFLOW_PARSET")]
    pub parset: String,

    /// Working directory for state, regions, and results
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_WORKING_DIR)]
    #[arg(env = "FACETFLOW_WORKDIR")]
    pub working_dir: String,

    /// Name of target direction
    #[arg(short, long = "direction", value_name = "DIRECTION")]
    pub directions: Vec<String>,

    /// Reset selfcal state for the specified directions
    #[arg(short = 'x', long)]
    pub reset: bool,

    /// Bypass user confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Dry run; validate configuration but don't launch any jobs.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}
