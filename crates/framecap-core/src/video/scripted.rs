//! In-memory [`NativeDecoder`] with key-frame seeking, used by the stream tests.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use image::RgbImage;

use super::frame::Frame;
use super::native::{CaptureProperty, NativeDecoder, INVALID_PROPERTY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Create,
    SetPosition(i64),
    Release,
}

#[derive(Debug, Default)]
pub(crate) struct Script {
    pub frame_count: Option<i64>,
    pub keyframes: Vec<i64>,
    pub refuse_open: bool,
    pub refuse_seeks: bool,
    /// Report the sentinel for the next this-many position queries.
    pub invalid_position_reads: u32,
    pub calls: Vec<Call>,
}

#[derive(Clone)]
pub(crate) struct ScriptedDecoder {
    pub script: Rc<RefCell<Script>>,
}

pub(crate) struct ScriptedHandle {
    position: i64,
}

impl ScriptedDecoder {
    pub fn new(frame_count: Option<i64>, keyframes: &[i64]) -> Self {
        Self {
            script: Rc::new(RefCell::new(Script {
                frame_count,
                keyframes: keyframes.to_vec(),
                ..Script::default()
            })),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.borrow().calls.clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.script.borrow().calls.iter().filter(|c| **c == call).count()
    }
}

impl NativeDecoder for ScriptedDecoder {
    type Handle = ScriptedHandle;

    fn create_capture(&self, _path: &Path) -> Option<ScriptedHandle> {
        let mut script = self.script.borrow_mut();
        script.calls.push(Call::Create);
        if script.refuse_open {
            return None;
        }
        Some(ScriptedHandle { position: 0 })
    }

    fn get_property(&self, handle: &ScriptedHandle, prop: CaptureProperty) -> i64 {
        let mut script = self.script.borrow_mut();
        match prop {
            CaptureProperty::PosFrames => {
                if script.invalid_position_reads > 0 {
                    script.invalid_position_reads -= 1;
                    return INVALID_PROPERTY;
                }
                handle.position
            }
            CaptureProperty::FrameCount => script.frame_count.unwrap_or(0),
            CaptureProperty::FrameWidth | CaptureProperty::FrameHeight => 2,
        }
    }

    fn fps(&self, _handle: &ScriptedHandle) -> f64 {
        25.0
    }

    fn set_property(&self, handle: &mut ScriptedHandle, prop: CaptureProperty, value: i64) -> bool {
        let mut script = self.script.borrow_mut();
        if prop != CaptureProperty::PosFrames {
            return false;
        }
        script.calls.push(Call::SetPosition(value));
        if script.refuse_seeks || value < 0 {
            return false;
        }
        if script.frame_count.is_some_and(|n| value >= n) {
            return false;
        }
        handle.position = script
            .keyframes
            .iter()
            .copied()
            .filter(|k| *k <= value)
            .max()
            .unwrap_or(0);
        true
    }

    fn read_frame(&self, handle: &mut ScriptedHandle) -> Result<Option<Frame>> {
        let script = self.script.borrow();
        if script.frame_count.is_some_and(|n| handle.position >= n) {
            return Ok(None);
        }
        let frame = Frame::new(RgbImage::new(2, 2), handle.position as u64, 25.0);
        handle.position += 1;
        Ok(Some(frame))
    }

    fn release(&self, _handle: ScriptedHandle) {
        self.script.borrow_mut().calls.push(Call::Release);
    }
}
