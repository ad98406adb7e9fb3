use crate::error::{Result, StreamError};

/// Reference point for a relative seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// Compute the absolute frame index a seek request refers to.
///
/// `length` is the stream's total frame count when known. End-relative
/// requests without it fail with [`StreamError::UnsupportedSeek`]; targets
/// before frame 0 or outside the `i64` range fail with [`StreamError::Seek`].
pub fn resolve_seek_target(
    current: i64,
    offset: i64,
    origin: SeekOrigin,
    length: Option<i64>,
) -> Result<i64> {
    let base = match origin {
        SeekOrigin::Start => 0,
        SeekOrigin::Current => current,
        SeekOrigin::End => length.ok_or(StreamError::UnsupportedSeek)?,
    };

    let target = base.checked_add(offset).ok_or_else(|| StreamError::Seek {
        target: if offset < 0 { i64::MIN } else { i64::MAX },
        reason: format!("offset {offset} from {origin:?} overflows"),
    })?;

    if target < 0 {
        return Err(StreamError::Seek {
            target,
            reason: "target is before the first frame".to_string(),
        });
    }

    Ok(target)
}
