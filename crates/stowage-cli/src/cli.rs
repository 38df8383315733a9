use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stowage",
    about = "Copy files and everything they reference between local disk, GCS, S3, and HTTP",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "STOWAGE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Localize a file (and, recursively, the files it references) into a target directory
    Localize(LocalizeArgs),
    /// Copy one object, skipping the copy if the destination already matches
    Cp(CpArgs),
    /// Show size, modification time, and digest of an object
    Stat(UriArgs),
    /// Print an object to stdout
    Cat(UriArgs),
    /// Remove an object
    Rm(UriArgs),
    /// Print a time-limited public URL for an object
    Presign(PresignArgs),
    /// Take the lock on a destination and leave it held
    Lock(LockArgs),
    /// Remove the lock on a destination regardless of its owner
    Unlock(UriArgs),
}

#[derive(Args)]
pub struct LocalizeArgs {
    pub source: String,
    /// Target directory; defaults to `localize.target_dir` from the config
    pub target_dir: Option<String>,
    /// Also localize files referenced from TSV, CSV, and JSON files
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Args)]
pub struct CpArgs {
    pub source: String,
    pub destination: String,
}

#[derive(Args)]
pub struct UriArgs {
    pub uri: String,
}

#[derive(Args)]
pub struct PresignArgs {
    pub uri: String,
    /// Lifetime in seconds; defaults to `localize.presign_duration_secs`
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Args)]
pub struct LockArgs {
    pub uri: String,
    /// Seconds after which the lock may be taken over
    #[arg(long)]
    pub ttl: Option<u64>,
    /// Seconds to wait for a current holder
    #[arg(long)]
    pub timeout: Option<u64>,
}
