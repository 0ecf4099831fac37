use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "waveplayer", version, about = "Chunked HTTP audio player")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a playlist (JSON) through the output device
    Play {
        /// Path to a playlist JSON file
        playlist: PathBuf,

        /// Player config (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use a specific output device by substring match
        #[arg(long)]
        device: Option<String>,

        /// Start with shuffle on
        #[arg(long)]
        shuffle: bool,

        /// Loop the whole playlist
        #[arg(long)]
        repeat: bool,

        /// Bytes per range request
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Max decoded bytes held by the buffer pool
        #[arg(long)]
        max_pool_size: Option<u64>,
    },

    /// Load a URL once and print what was decoded as JSON
    Probe {
        url: String,

        /// Player config (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List output devices and exit
    ListDevices,
}
