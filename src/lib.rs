//! Streaming audio processing core: ring buffers, delay lines and a lookahead limiter.
//! buffer : includes modular index, circular buffer, circular buffer group, and planar block buffer.
//! dsp : includes delay, fractionally interpolated delay, DC blocker, and lookahead limiter.
//! processor : includes the host-facing processor trait.
//! config : includes serializable processor settings.
//! error : includes the error type shared by every module.

//! # License
//! The library is offered under GPLv3.0 license for non-commercial use.

/// includes modular index, circular buffer and planar block buffer.
pub mod buffer;
/// includes serializable processor settings.
pub mod config;
/// includes delay lines and lookahead limiter.
pub mod dsp;
/// includes error type.
pub mod error;
/// includes processor trait.
pub mod processor;

/// Sample type processed by every component.
pub type Sample = f64;

pub use buffer::{Buffer, CircularBuffer, CircularBufferGroup, ModularIndex};
pub use config::{DelayConfig, LimiterConfig};
pub use dsp::{DcBlock, Delay, DelayWithLinearInterpolation, Limiter, LimiterMode};
pub use error::DspError;
pub use processor::Processor;
