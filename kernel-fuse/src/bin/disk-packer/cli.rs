use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Build and inspect kernel disk images.
#[derive(Parser)]
pub struct Cli {
    /// Disk image to operate on
    #[arg(long, short)]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the image and format a fresh file system onto it
    Format,
    /// Copy a host file into the file system
    CopyIn {
        /// Host file to read
        source: PathBuf,
        /// Destination path inside the image
        dest: String,
    },
    /// Wrap a host binary in an executable image and copy it in
    PackExec {
        /// Host file holding raw code bytes
        source: PathBuf,
        /// Destination path inside the image
        dest: String,
        /// Zero-initialized bytes to reserve above the code
        #[arg(long, default_value_t = 0)]
        uninit: u32,
    },
    /// List every path in the file system
    List,
    /// Run the consistency check
    Check,
}
