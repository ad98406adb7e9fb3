use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use framecap_core::video::seek::SeekOrigin;

#[derive(Parser)]
#[command(name = "framecap", about = "Frame-indexed video seeking over ffmpeg")]
pub struct Cli {
    /// ffmpeg executable, looked up on PATH unless it contains a separator.
    #[arg(long, global = true, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// ffprobe executable, looked up on PATH unless it contains a separator.
    #[arg(long, global = true, default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Open a video and print its frame metadata.
    Probe {
        /// Path to the input video file.
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Seek and report where the decoder actually landed.
    Seek {
        /// Path to the input video file.
        #[arg(short, long)]
        input: PathBuf,

        /// Frame offset relative to the origin (may be negative).
        #[arg(long, allow_hyphen_values = true)]
        offset: i64,

        #[arg(long, value_enum, default_value_t = Origin::Start)]
        origin: Origin,
    },

    /// Seek to a frame and save the frame the decoder lands on as PNG.
    Grab {
        /// Path to the input video file.
        #[arg(short, long)]
        input: PathBuf,

        /// Frame index to seek to.
        #[arg(short, long, default_value_t = 0)]
        frame: u64,

        /// Path to write the PNG snapshot.
        #[arg(short, long)]
        output: PathBuf,

        /// TTF/OTF font for the frame label; no label without it.
        #[arg(long)]
        font: Option<PathBuf>,
    },

    /// List files in a directory matching any of the given patterns.
    Find {
        /// Directory to search.
        #[arg(short, long)]
        dir: PathBuf,

        /// File name pattern such as `*.mp4` or `.mkv`; repeatable.
        #[arg(short, long = "pattern", required = true)]
        patterns: Vec<String>,

        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,

        /// Print paths relative to this directory, skipping files outside it.
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Origin {
    Start,
    Current,
    End,
}

impl From<Origin> for SeekOrigin {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::Start => SeekOrigin::Start,
            Origin::Current => SeekOrigin::Current,
            Origin::End => SeekOrigin::End,
        }
    }
}
