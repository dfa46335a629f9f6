use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::timespec::parse_timespec;

#[derive(Parser, Debug)]
#[command(name = "relay", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Optional relay config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Frame output file (DCA framing); overrides the config
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Directory for staged segment files; overrides the config
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read control lines from stdin (`play <url> [start] [duration|end=<time>]`, pause, resume,
    /// skip, clear). At end of input the queued tracks play out before exit
    Run,

    /// Play one source and exit when it ends
    Play {
        /// Source URL handed to the resolver
        url: String,

        /// Start offset, e.g. 90, 1m30s
        #[arg(long, value_parser = parse_timespec)]
        start: Option<Duration>,

        /// Length to play (default: to the end of the source)
        #[arg(long, value_parser = parse_timespec)]
        duration: Option<Duration>,

        /// Absolute source offset to stop at, e.g. 3m
        #[arg(long, value_parser = parse_timespec, conflicts_with = "duration")]
        end: Option<Duration>,
    },
}
