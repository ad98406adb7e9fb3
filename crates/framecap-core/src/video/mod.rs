pub mod ffmpeg;
pub mod frame;
pub mod native;
pub mod runtime;
pub mod seek;
pub mod stream;

#[cfg(test)]
pub(crate) mod scripted;
