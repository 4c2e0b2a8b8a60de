use clap::{Parser, Subcommand};
use utils::version;

use crate::config::track::TrackArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Track pod lifecycles and report short-lived pods
    Track(Box<TrackArgs>),
}
