//! [`NativeDecoder`] backed by the ffmpeg and ffprobe command-line tools.
//!
//! Frames are piped out of ffmpeg as raw RGB24. Repositioning restarts the
//! ffmpeg process at the nearest key-frame at or before the requested frame,
//! so seeks are only key-frame accurate.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::frame::Frame;
use super::native::{CaptureProperty, NativeDecoder};
use super::runtime::{HandleLease, Runtime};

#[derive(Deserialize)]
struct ProbeOutput {
    streams: Option<Vec<ProbeStream>>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    start_time: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    start_time: Option<String>,
}

/// Video metadata obtained by probing with ffprobe.
#[derive(Debug)]
struct ProbeResult {
    width: u32,
    height: u32,
    fps: f64,
    frame_count: Option<u64>,
    /// Timestamp of the first video frame.
    start_time: f64,
    /// Offset of the first video frame from the container start, which `-ss` counts from.
    seek_offset: f64,
}

fn probe(ffprobe: &Path, path: &Path) -> Result<ProbeResult> {
    info!(?path, "probing video metadata with ffprobe");

    let output = Command::new(ffprobe)
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,nb_frames,start_time:format=duration,start_time",
            "-of", "json",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        bail!("ffprobe failed: {stderr}");
    }

    let result = parse_probe(&String::from_utf8_lossy(&output.stdout))?;
    info!(
        width = result.width,
        height = result.height,
        fps = result.fps,
        frame_count = ?result.frame_count,
        start_time = result.start_time,
        "probe completed"
    );
    Ok(result)
}

fn parse_probe(json: &str) -> Result<ProbeResult> {
    let probe: ProbeOutput = serde_json::from_str(json).context("failed to parse ffprobe output")?;

    let stream = probe
        .streams
        .as_ref()
        .and_then(|streams| streams.first())
        .context("no video stream found")?;

    let width = stream.width.context("ffprobe reported no width")?;
    let height = stream.height.context("ffprobe reported no height")?;

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);
    if fps <= 0.0 {
        warn!(fps, "video has non-positive fps, seeking is disabled");
    }

    // Containers like mkv omit nb_frames; estimate from duration instead.
    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| {
            let duration: f64 = probe.format.as_ref()?.duration.as_deref()?.parse().ok()?;
            let estimate = (duration * fps).round();
            (estimate > 0.0).then_some(estimate as u64)
        });

    let parse_seconds = |value: Option<&String>| value.and_then(|v| v.parse::<f64>().ok());
    let format_start = parse_seconds(probe.format.as_ref().and_then(|f| f.start_time.as_ref()));
    let start_time = parse_seconds(stream.start_time.as_ref())
        .or(format_start)
        .unwrap_or(0.0);
    let seek_offset = (start_time - format_start.unwrap_or(start_time)).max(0.0);

    Ok(ProbeResult {
        width,
        height,
        fps,
        frame_count,
        start_time,
        seek_offset,
    })
}

/// Parse a frame rate string like "30/1", "30000/1001" or "29.97".
fn parse_frame_rate(rate: &str) -> Option<f64> {
    if let Some((num, den)) = rate.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den > 0.0).then(|| num / den);
    }
    rate.parse().ok()
}

fn probe_keyframes(ffprobe: &Path, path: &Path, fps: f64, start_time: f64) -> Result<Vec<u64>> {
    info!(?path, "probing key-frame positions with ffprobe");

    let output = Command::new(ffprobe)
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-skip_frame", "nokey",
            "-show_entries", "frame=best_effort_timestamp_time",
            "-of", "csv=p=0",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe key-frame scan failed");
        bail!("ffprobe key-frame scan failed: {stderr}");
    }

    let keyframes = parse_keyframes(&String::from_utf8_lossy(&output.stdout), fps, start_time);
    info!(count = keyframes.len(), "key-frame scan completed");
    Ok(keyframes)
}

/// Convert one timestamp per line into sorted frame indices counted from
/// `start_time`, the timestamp of frame 0. Frame 0 is always included.
fn parse_keyframes(csv: &str, fps: f64, start_time: f64) -> Vec<u64> {
    let mut keyframes: Vec<u64> = csv
        .lines()
        .filter_map(|line| line.trim().trim_end_matches(',').parse::<f64>().ok())
        .map(|seconds| ((seconds - start_time) * fps).round())
        .filter(|index| *index >= 0.0)
        .map(|index| index as u64)
        .collect();
    keyframes.push(0);
    keyframes.sort_unstable();
    keyframes.dedup();
    keyframes
}

/// Greatest key-frame at or before `target`.
fn nearest_keyframe(keyframes: &[u64], target: u64) -> u64 {
    let idx = keyframes.partition_point(|k| *k <= target);
    keyframes[..idx].last().copied().unwrap_or(0)
}

/// A running ffmpeg process piping raw frames. Killed on drop.
///
/// Only `-v error` output reaches stderr, so it is drained after stdout closes.
struct Reader {
    child: Child,
}

impl Reader {
    fn spawn(ffmpeg: &Path, path: &Path, start_seconds: Option<f64>) -> Result<Self> {
        info!(?path, ?start_seconds, "spawning ffmpeg decoder process");

        let mut command = Command::new(ffmpeg);
        command.args(["-v", "error"]);
        if let Some(seconds) = start_seconds {
            command
                .args(["-noaccurate_seek", "-ss"])
                .arg(format!("{seconds:.6}"));
        }
        let child = command
            .arg("-i")
            .arg(path)
            .args([
                "-map", "0:v:0",
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn ffmpeg")?;

        Ok(Self { child })
    }

    /// Fill `buf` with the next frame. Returns `false` on a clean end of stream;
    /// an ffmpeg failure is an error even when it produced no output.
    fn read_frame(&mut self, buf: &mut [u8], frame_number: u64) -> Result<bool> {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .context("ffmpeg stdout not available")?;

        let mut read = 0;
        while read < buf.len() {
            match stdout.read(&mut buf[read..]) {
                Ok(0) => {
                    self.finish()?;
                    if read == 0 {
                        return Ok(false);
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = buf.len(),
                        frame_number,
                        "ffmpeg stream ended mid-frame"
                    );
                    bail!("ffmpeg stream ended mid-frame (read {read}/{} bytes)", buf.len());
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(frame_number, %e, "failed to read from ffmpeg pipe");
                    return Err(e).context("failed to read from ffmpeg pipe");
                }
            }
        }
        Ok(true)
    }

    /// Reap the process after stdout closed and fail if ffmpeg did.
    fn finish(&mut self) -> Result<()> {
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }

        let status = self.child.wait().context("failed to wait for ffmpeg")?;
        if status.success() {
            return Ok(());
        }

        let stderr = stderr.trim();
        error!(%status, %stderr, "ffmpeg exited with failure");
        bail!("ffmpeg exited with {status}: {stderr}");
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One open ffmpeg decoding session.
pub struct FfmpegCapture {
    path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    frame_count: Option<u64>,
    start_time: f64,
    seek_offset: f64,
    position: u64,
    keyframes: Option<Vec<u64>>,
    reader: Option<Reader>,
    _lease: HandleLease,
}

impl FfmpegCapture {
    fn frame_bytes(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 3
    }

    fn keyframes(&mut self, ffprobe: &Path) -> Result<&[u64]> {
        if self.keyframes.is_none() {
            let found = probe_keyframes(ffprobe, &self.path, self.fps, self.start_time)?;
            self.keyframes = Some(found);
        }
        Ok(self.keyframes.as_deref().unwrap_or_default())
    }

    /// Seconds to hand to `-ss` so ffmpeg lands on the key-frame at `position`.
    fn start_seconds(&self) -> Option<f64> {
        // Half a frame past the key-frame absorbs timestamp rounding.
        (self.position > 0 && self.fps > 0.0)
            .then(|| self.seek_offset + (self.position as f64 + 0.5) / self.fps)
    }
}

pub struct FfmpegDecoder {
    runtime: Arc<Runtime>,
}

impl FfmpegDecoder {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }
}

impl NativeDecoder for FfmpegDecoder {
    type Handle = FfmpegCapture;

    fn create_capture(&self, path: &Path) -> Option<FfmpegCapture> {
        let info = match probe(self.runtime.ffprobe(), path) {
            Ok(info) => info,
            Err(e) => {
                error!(?path, error = %format!("{e:#}"), "failed to probe media file");
                return None;
            }
        };

        if info.width == 0 || info.height == 0 {
            error!(?path, width = info.width, height = info.height, "invalid video dimensions");
            return None;
        }

        info!(?path, "ffmpeg capture created");

        Some(FfmpegCapture {
            path: path.to_path_buf(),
            width: info.width,
            height: info.height,
            fps: info.fps,
            frame_count: info.frame_count,
            start_time: info.start_time,
            seek_offset: info.seek_offset,
            position: 0,
            keyframes: None,
            reader: None,
            _lease: self.runtime.lease(),
        })
    }

    fn get_property(&self, capture: &FfmpegCapture, prop: CaptureProperty) -> i64 {
        match prop {
            CaptureProperty::PosFrames => capture.position as i64,
            CaptureProperty::FrameCount => capture.frame_count.map_or(0, |n| n as i64),
            CaptureProperty::FrameWidth => i64::from(capture.width),
            CaptureProperty::FrameHeight => i64::from(capture.height),
        }
    }

    fn fps(&self, capture: &FfmpegCapture) -> f64 {
        capture.fps
    }

    fn set_property(&self, capture: &mut FfmpegCapture, prop: CaptureProperty, value: i64) -> bool {
        if prop != CaptureProperty::PosFrames {
            warn!(?prop, "property is read-only");
            return false;
        }

        let Ok(target) = u64::try_from(value) else {
            warn!(value, "negative frame position");
            return false;
        };

        if let Some(frame_count) = capture.frame_count {
            if target >= frame_count {
                warn!(target, frame_count, "seek past end of stream");
                return false;
            }
        }

        if capture.fps <= 0.0 {
            warn!(path = ?capture.path, "stream has no frame rate, cannot seek");
            return false;
        }

        let landed = match capture.keyframes(self.runtime.ffprobe()) {
            Ok(keyframes) => nearest_keyframe(keyframes, target),
            Err(e) => {
                error!(
                    path = ?capture.path,
                    error = %format!("{e:#}"),
                    "failed to locate key-frames"
                );
                return false;
            }
        };

        capture.reader = None;
        capture.position = landed;
        debug!(target, landed, "ffmpeg reader repositioned");
        true
    }

    fn read_frame(&self, capture: &mut FfmpegCapture) -> Result<Option<Frame>> {
        if capture.reader.is_none() {
            let start = capture.start_seconds();
            capture.reader = Some(Reader::spawn(self.runtime.ffmpeg(), &capture.path, start)?);
        }

        let mut buf = vec![0u8; capture.frame_bytes()];
        let frame_number = capture.position;
        let reader = capture
            .reader
            .as_mut()
            .context("ffmpeg reader not available")?;

        if !reader.read_frame(&mut buf, frame_number)? {
            info!(frame_number, "video stream ended");
            return Ok(None);
        }

        let image = RgbImage::from_raw(capture.width, capture.height, buf)
            .context("failed to create RgbImage from raw frame data")?;
        capture.position += 1;

        debug!(frame_number, "decoded frame");
        Ok(Some(Frame::new(image, frame_number, capture.fps)))
    }

    fn release(&self, capture: FfmpegCapture) {
        info!(path = ?capture.path, position = capture.position, "releasing ffmpeg capture");
        drop(capture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_rate_fraction() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn parse_frame_rate_invalid() {
        assert!(parse_frame_rate("invalid").is_none());
        assert!(parse_frame_rate("30/0").is_none());
        assert!((parse_frame_rate("60").unwrap() - 60.0).abs() < 0.01);
    }

    #[test]
    fn metadata_with_frame_count() {
        let json = r#"{
            "programs": [],
            "streams": [{"width": 1920, "height": 1080, "r_frame_rate": "60/1",
                         "nb_frames": "3600"}],
            "format": {"duration": "60.000000"}
        }"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!((probe.width, probe.height), (1920, 1080));
        assert!((probe.fps - 60.0).abs() < 0.01);
        assert_eq!(probe.frame_count, Some(3600));
    }

    #[test]
    fn metadata_estimates_frame_count_from_duration() {
        let json = r#"{
            "streams": [{"width": 640, "height": 360, "r_frame_rate": "25/1"}],
            "format": {"duration": "4.000000"}
        }"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!(probe.frame_count, Some(100));
    }

    #[test]
    fn metadata_without_length() {
        let json = r#"{"streams": [{"width": 640, "height": 360, "r_frame_rate": "25/1"}]}"#;
        assert_eq!(parse_probe(json).unwrap().frame_count, None);
    }

    #[test]
    fn metadata_requires_a_stream() {
        assert!(parse_probe(r#"{"streams": []}"#).is_err());
        assert!(parse_probe("not json").is_err());
    }

    #[test]
    fn parse_keyframes_converts_and_sorts() {
        let csv = "2.000000\n0.000000\nN/A\n1.000000,\n";
        assert_eq!(parse_keyframes(csv, 25.0, 0.0), vec![0, 25, 50]);
    }

    #[test]
    fn parse_keyframes_always_has_first_frame() {
        assert_eq!(parse_keyframes("", 25.0, 0.0), vec![0]);
        assert_eq!(parse_keyframes("0.5\n", 30.0, 0.0), vec![0, 15]);
    }

    #[test]
    fn parse_keyframes_counts_from_stream_start() {
        assert_eq!(parse_keyframes("1.400000\n2.400000\n", 25.0, 1.4), vec![0, 25]);
        assert_eq!(parse_keyframes("1.399000\n", 25.0, 1.4), vec![0]);
    }

    #[test]
    fn metadata_reads_start_times() {
        let json = r#"{
            "streams": [{"width": 640, "height": 360, "r_frame_rate": "25/1",
                         "nb_frames": "100", "start_time": "1.400000"}],
            "format": {"duration": "4.000000", "start_time": "1.000000"}
        }"#;
        let probe = parse_probe(json).unwrap();
        assert!((probe.start_time - 1.4).abs() < 1e-9);
        assert!((probe.seek_offset - 0.4).abs() < 1e-9);
    }

    #[test]
    fn metadata_start_defaults_to_zero() {
        let json = r#"{"streams": [{"width": 640, "height": 360, "r_frame_rate": "25/1"}]}"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!(probe.start_time, 0.0);
        assert_eq!(probe.seek_offset, 0.0);
    }

    #[test]
    fn seek_start_includes_stream_offset() {
        let runtime = Arc::new(Runtime::new("ffmpeg".into(), "ffprobe".into()));
        let mut capture = capture_with(&runtime);
        capture.seek_offset = 0.4;
        assert_eq!(capture.start_seconds(), None);

        capture.position = 25;
        let seconds = capture.start_seconds().unwrap();
        assert!((seconds - (0.4 + 25.5 / 25.0)).abs() < 1e-9);
    }

    fn capture_with(runtime: &Arc<Runtime>) -> FfmpegCapture {
        FfmpegCapture {
            path: PathBuf::from("clip.mp4"),
            width: 4,
            height: 2,
            fps: 25.0,
            frame_count: Some(100),
            start_time: 0.0,
            seek_offset: 0.0,
            position: 0,
            keyframes: None,
            reader: None,
            _lease: runtime.lease(),
        }
    }

    /// Decoder whose "ffmpeg" is a stand-in program that writes nothing.
    fn decoder_running(program: &str) -> Option<FfmpegDecoder> {
        let binary = which::which(program).ok()?;
        Some(FfmpegDecoder::new(Arc::new(Runtime::new(binary, "ffprobe".into()))))
    }

    #[test]
    fn failing_ffmpeg_is_an_error_not_end_of_stream() {
        let Some(decoder) = decoder_running("false") else {
            println!("skipping: no `false` program");
            return;
        };
        let mut capture = capture_with(&decoder.runtime);

        let err = decoder.read_frame(&mut capture).unwrap_err();
        assert!(format!("{err:#}").contains("ffmpeg exited with"));
        assert_eq!(capture.position, 0);
    }

    #[test]
    fn successful_exit_without_output_is_end_of_stream() {
        let Some(decoder) = decoder_running("true") else {
            println!("skipping: no `true` program");
            return;
        };
        let mut capture = capture_with(&decoder.runtime);

        assert!(decoder.read_frame(&mut capture).unwrap().is_none());
        assert_eq!(capture.position, 0);
    }

    #[test]
    fn nearest_keyframe_rounds_down() {
        let keyframes = [0, 25, 50, 75];
        assert_eq!(nearest_keyframe(&keyframes, 0), 0);
        assert_eq!(nearest_keyframe(&keyframes, 24), 0);
        assert_eq!(nearest_keyframe(&keyframes, 25), 25);
        assert_eq!(nearest_keyframe(&keyframes, 99), 75);
    }
}
