pub mod error;
pub mod paths;
pub mod snapshot;
pub mod video;
