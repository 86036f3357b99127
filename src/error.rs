//! Error type shared by the buffers and processors.
//!
//! Only conditions a caller can meaningfully react to are reported here.
//! Contract violations on the streaming path (writing a block larger than the
//! ring, reading a window wider than the ring) panic instead.

use std::collections::TryReserveError;

/// Errors returned by buffer construction, resizing and processor dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DspError
{
    /// A ring buffer or buffer group was asked for a capacity of zero.
    #[error("capacity must be greater than zero")]
    ZeroCapacity,

    /// Storage for a buffer could not be reserved.
    #[error("failed to allocate buffer storage: {0}")]
    Allocation(#[from] TryReserveError),

    /// A channel index outside the configured channel count.
    #[error("channel {channel} out of range ({channels} channels)")]
    ChannelOutOfRange
    {
        /// Requested channel.
        channel : usize,
        /// Configured channel count.
        channels : usize
    },

    /// Channels handed to [`Buffer::from_channels`](crate::buffer::Buffer::from_channels) differ in length.
    #[error("channel length mismatch: expected {expected} frames, found {found}")]
    ChannelLengthMismatch
    {
        /// Frame count of the first channel.
        expected : usize,
        /// Frame count of the offending channel.
        found : usize
    },

    /// The lookahead ring needs room for at least one sample of delay.
    #[error("max lookahead must be at least 2 samples, got {max_lookahead}")]
    InvalidLookahead
    {
        /// Rejected ring size.
        max_lookahead : usize
    },

    /// The processor only works on whole blocks.
    #[error("{processor} cannot process single samples")]
    SingleSampleUnsupported
    {
        /// Name of the processor that rejected the call.
        processor : &'static str
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_channel_out_of_range_display()
    {
        let err = DspError::ChannelOutOfRange { channel : 3, channels : 2 };
        assert_eq!(err.to_string(), "channel 3 out of range (2 channels)");
    }

    #[test]
    fn test_single_sample_display()
    {
        let err = DspError::SingleSampleUnsupported { processor : "Limiter" };
        assert_eq!(err.to_string(), "Limiter cannot process single samples");
    }

    #[test]
    fn test_allocation_from_try_reserve()
    {
        let mut storage = Vec::<f64>::new();
        let source = storage.try_reserve_exact(usize::MAX).unwrap_err();
        let err : DspError = source.into();
        assert!(err.to_string().starts_with("failed to allocate buffer storage"));
    }
}
