//! Process-wide state of the ffmpeg decoder: resolved tool binaries and a
//! count of open captures.
//!
//! [`init`] resolves the tools once per process; [`shutdown`] drops the
//! cached state so the next [`init`] starts fresh.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

static RUNTIME: Mutex<Option<Arc<Runtime>>> = Mutex::new(None);

/// Where to find the decoder tools. Bare names are looked up on `PATH`.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug)]
pub struct Runtime {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    live_handles: AtomicUsize,
}

impl Runtime {
    pub(crate) fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            live_handles: AtomicUsize::new(0),
        }
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> &Path {
        &self.ffprobe
    }

    /// Number of captures currently holding a lease.
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    pub(crate) fn lease(self: &Arc<Self>) -> HandleLease {
        self.live_handles.fetch_add(1, Ordering::SeqCst);
        HandleLease {
            runtime: Arc::clone(self),
        }
    }
}

/// Counts one open capture against its runtime until dropped.
#[derive(Debug)]
pub(crate) struct HandleLease {
    runtime: Arc<Runtime>,
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.runtime.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolve the decoder tools, or return the runtime resolved earlier.
pub fn init(config: &DecoderConfig) -> Result<Arc<Runtime>> {
    let mut slot = RUNTIME
        .lock()
        .map_err(|_| anyhow!("native runtime lock poisoned"))?;

    if let Some(runtime) = slot.as_ref() {
        debug!("native runtime already initialized");
        return Ok(Arc::clone(runtime));
    }

    let ffmpeg = which::which(&config.ffmpeg).with_context(|| {
        format!(
            "failed to locate {} — is ffmpeg installed?",
            config.ffmpeg.display()
        )
    })?;
    let ffprobe = which::which(&config.ffprobe).with_context(|| {
        format!(
            "failed to locate {} — is ffmpeg installed?",
            config.ffprobe.display()
        )
    })?;

    info!(?ffmpeg, ?ffprobe, "native runtime initialized");

    let runtime = Arc::new(Runtime::new(ffmpeg, ffprobe));
    *slot = Some(Arc::clone(&runtime));
    Ok(runtime)
}

/// Drop the process-wide runtime. Captures still open keep their own reference.
pub fn shutdown() {
    let taken = match RUNTIME.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => {
            warn!("native runtime lock poisoned, skipping shutdown");
            return;
        }
    };

    let Some(runtime) = taken else {
        return;
    };

    let live = runtime.live_handles();
    if live > 0 {
        warn!(live, "shutting down native runtime with captures still open");
    }
    info!("native runtime shut down");
}
