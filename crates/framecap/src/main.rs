mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use framecap_core::paths::{enumerate_files, is_subfolder, relative_file_path};
use framecap_core::snapshot::SnapshotRenderer;
use framecap_core::video::ffmpeg::FfmpegDecoder;
use framecap_core::video::runtime::{self, DecoderConfig};
use framecap_core::video::seek::SeekOrigin;
use framecap_core::video::stream::SeekableFrameStream;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    let config = DecoderConfig {
        ffmpeg: cli.ffmpeg,
        ffprobe: cli.ffprobe,
    };

    let result = run(cli.command, &config);
    runtime::shutdown();
    result
}

fn run(command: cli::Command, config: &DecoderConfig) -> Result<()> {
    match command {
        cli::Command::Probe { input } => {
            let stream = open_stream(&input, config)?;
            println!("path:        {}", input.display());
            println!("position:    {}", stream.position());
            match stream.frame_count() {
                Some(n) => println!("frame count: {n}"),
                None => println!("frame count: unknown"),
            }
            println!("fps:         {:.3}", stream.fps());
            if let Some((width, height)) = stream.dimensions() {
                println!("dimensions:  {width}x{height}");
            }
            Ok(())
        }
        cli::Command::Seek {
            input,
            offset,
            origin,
        } => {
            let mut stream = open_stream(&input, config)?;
            let origin = SeekOrigin::from(origin);
            let landed = stream
                .seek(offset, origin)
                .with_context(|| format!("failed to seek {offset} frames from {origin:?}"))?;
            println!("requested: {offset} from {origin:?}");
            println!("landed:    {landed}");
            Ok(())
        }
        cli::Command::Grab {
            input,
            frame,
            output,
            font,
        } => {
            let mut stream = open_stream(&input, config)?;
            let offset = i64::try_from(frame).context("frame index too large")?;
            let landed = stream
                .seek(offset, SeekOrigin::Start)
                .with_context(|| format!("failed to seek to frame {frame}"))?;
            if landed != frame {
                warn!(requested = frame, landed, "landed on an earlier key-frame");
            }

            let decoded = stream
                .read_frame()
                .context("failed to decode frame")?
                .with_context(|| format!("no frame available at {landed}"))?;

            let renderer = SnapshotRenderer::new(font.as_deref());
            let path = renderer.save(&decoded, Some(frame), &output)?;
            info!(?path, frame_number = decoded.frame_number, "snapshot written");
            println!("{}", path.display());
            Ok(())
        }
        cli::Command::Find {
            dir,
            patterns,
            recursive,
            root,
        } => {
            let files = enumerate_files(&dir, patterns.as_slice(), recursive)
                .with_context(|| format!("failed to list {}", dir.display()))?;

            if let Some(root) = &root {
                if dir != *root && !is_subfolder(&dir, root) {
                    warn!(?dir, ?root, "search directory is not below root");
                }
            }

            for file in &files {
                match &root {
                    Some(root) => {
                        let relative = relative_file_path(file, root);
                        if !relative.is_empty() {
                            println!("{relative}");
                        }
                    }
                    None => println!("{}", file.display()),
                }
            }
            info!(count = files.len(), ?dir, "file search complete");
            Ok(())
        }
    }
}

fn open_stream(input: &Path, config: &DecoderConfig) -> Result<SeekableFrameStream<FfmpegDecoder>> {
    let runtime = runtime::init(config)?;
    let mut stream = SeekableFrameStream::new(FfmpegDecoder::new(runtime));
    stream
        .open(input)
        .with_context(|| format!("failed to open {}", input.display()))?;
    Ok(stream)
}
