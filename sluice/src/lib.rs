#[cfg(feature = "sluice-base")]
pub use sluice_base as base;

#[cfg(feature = "sluice-streamer")]
pub use sluice_streamer as streamer;
