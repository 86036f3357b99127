//! Digital signal processing components for real-time audio.
//!
//! This module provides:
//!
//! - **Utility functions** - dB/ratio and millisecond/sample conversion
//! - **Delay** - integer delay line, write-then-read per sample
//! - **DelayWithLinearInterpolation** - fractional delay line processed in blocks
//! - **DcBlock** - first-order DC blocking filter
//! - **Limiter** - lookahead peak limiter
//!
//! Every processor keeps its history in rings, so any sequence of block sizes
//! produces the same output as one long block. Block loops run with
//! denormals flushed to zero.
//!
//! ## Example: Fractional delay
//!
//! ```
//! use mkaudiocore::buffer::Buffer;
//! use mkaudiocore::dsp::DelayWithLinearInterpolation;
//!
//! let mut delay = DelayWithLinearInterpolation::new(16, 1).unwrap();
//! delay.set_size(2.5).unwrap();
//!
//! let input = Buffer::from_channels(&[&[1.0, 0.0, 0.0, 0.0, 0.0][..]]).unwrap();
//! let mut output = Buffer::new(1, 5);
//! delay.process(&input, &mut output).unwrap();
//! assert_eq!(output.channel(0), &[0.0, 0.0, 0.5, 0.5, 0.0]);
//! ```
//!
//! ## Example: Lookahead limiting
//!
//! ```
//! use mkaudiocore::buffer::Buffer;
//! use mkaudiocore::dsp::Limiter;
//!
//! let mut limiter = Limiter::new(1, 64, 48000.0).unwrap();
//! limiter.set_lookahead(8);
//! limiter.set_threshold(0.5);
//! limiter.set_block_dc(false);
//!
//! let input = Buffer::from_channels(&[&[1.0; 32][..]]).unwrap();
//! let mut output = Buffer::new(1, 32);
//! limiter.process(&input, &mut output).unwrap();
//! assert!(output.channel(0).iter().all(|sample| sample.abs() <= 0.5));
//! ```

use no_denormals::no_denormals;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::Sample;
use crate::buffer::{Buffer, CircularBuffer, CircularBufferGroup, ModularIndex};
use crate::config::{DEFAULT_LOOKAHEAD, DEFAULT_RELEASE, DEFAULT_SAMPLE_RATE, DelayConfig, LimiterConfig};
use crate::error::DspError;

// ==========================================
// Utility Functions
// ==========================================

/// Convert a linear ratio to decibels.
///
/// Formula: `dB = 20 * log10(ratio)`
#[inline]
pub fn ratio_to_db(ratio : f64) -> f64 { 20.0 * ratio.log10() }

/// Convert decibels to a linear ratio.
///
/// Formula: `ratio = 10^(dB / 20)`
#[inline]
pub fn db_to_ratio(db : f64) -> f64 { 10.0f64.powf(db / 20.0) }

/// Convert milliseconds to a (fractional) number of samples.
#[inline]
pub fn ms_to_samples(ms : f64, sample_rate : f64) -> f64 { ms * 0.001 * sample_rate }

/// Convert a number of samples to milliseconds.
#[inline]
pub fn samples_to_ms(samples : f64, sample_rate : f64) -> f64 { samples * 1000.0 / sample_rate }

/// Clamps a parameter into `[min, max]`. NaN keeps `current`.
fn clamp_parameter(name : &'static str, value : f64, min : f64, max : f64, current : f64) -> f64
{
    let applied = if value.is_nan() { current } else { value.clamp(min, max) };
    if applied != value { debug!(parameter = name, requested = value, applied, "parameter clamped"); }
    applied
}

// ==========================================
// Delay
// ==========================================

/// Integer delay line.
///
/// Each channel owns a ring of `size + 1` samples. Every incoming sample is
/// written before the tail is read, so a size of 0 passes the input through
/// and a size of `n` returns each sample `n` calls later. The ring cursor
/// carries over between blocks, so delays longer than a block stay seamless.
///
/// # Parameters
/// - `size` - Delay in samples, clamped to `[0, max_delay]`
/// - `max_delay` - Longest delay the line accepts
/// - `sample_rate` - Used only to convert delay times given in milliseconds
pub struct Delay
{
    buffers : CircularBufferGroup<Sample>,
    size : usize,
    max_delay : usize,
    sample_rate : f64
}
impl Delay
{
    /// Create a delay line of zero samples for `channels` channels.
    pub fn new(max_delay : usize, channels : usize) -> Result<Self, DspError>
    {
        Ok(Self
        {
            buffers : CircularBufferGroup::new(channels, 1)?,
            size : 0,
            max_delay,
            sample_rate : DEFAULT_SAMPLE_RATE
        })
    }

    /// Create a delay line from a configuration record.
    ///
    /// The configured delay is rounded to whole samples.
    pub fn from_config(config : &DelayConfig) -> Result<Self, DspError>
    {
        let mut delay = Self::new(config.max_delay, config.channels)?;
        delay.set_sample_rate(config.sample_rate);
        delay.set_size(config.delay.round().max(0.0) as usize)?;
        Ok(delay)
    }

    /// Delay in samples.
    pub fn size(&self) -> usize { self.size }

    /// Set the delay in samples. Values above `max_delay` are clamped.
    ///
    /// Shrinking drops the oldest history, growing inserts silence.
    pub fn set_size(&mut self, size : usize) -> Result<(), DspError>
    {
        let applied = size.min(self.max_delay);
        if applied != size { debug!(requested = size, applied, "delay size clamped"); }
        self.buffers.set_capacity(applied + 1)?;
        self.size = applied;
        Ok(())
    }

    /// Longest delay in samples.
    pub fn max_delay(&self) -> usize { self.max_delay }

    /// Set the longest accepted delay, shortening the current delay if needed.
    pub fn set_max_delay(&mut self, max_delay : usize) -> Result<(), DspError>
    {
        self.max_delay = max_delay;
        if self.size > max_delay { self.set_size(max_delay)?; }
        Ok(())
    }

    /// Delay in milliseconds at the current sample rate.
    pub fn delay_time(&self) -> f64 { samples_to_ms(self.size as f64, self.sample_rate) }

    /// Set the delay in milliseconds, rounded to whole samples.
    pub fn set_delay_time(&mut self, ms : f64) -> Result<(), DspError>
    {
        self.set_size(ms_to_samples(ms, self.sample_rate).round().max(0.0) as usize)
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 { self.sample_rate }

    /// Set the sample rate. The delay in samples is kept.
    pub fn set_sample_rate(&mut self, sample_rate : f64)
    {
        self.sample_rate = clamp_parameter("sample_rate", sample_rate, 1.0, f64::MAX, self.sample_rate);
    }

    /// Number of channels.
    pub fn channels(&self) -> usize { self.buffers.channels() }

    /// Set the number of channels. Surviving channels keep their history.
    pub fn set_channels(&mut self, channels : usize) -> Result<(), DspError>
    {
        self.buffers.set_channels(channels)
    }

    #[inline]
    fn tick(buffer : &mut CircularBuffer<Sample>, input : Sample) -> Sample
    {
        let mut delayed = [0.0];
        buffer.write(&[input]);
        buffer.tail(&mut delayed);
        delayed[0]
    }

    /// Process a single sample of one channel.
    #[inline]
    pub fn process_sample(&mut self, channel : usize, input : Sample) -> Result<Sample, DspError>
    {
        let channels = self.channels();
        let buffer = self.buffers.channel_mut(channel).ok_or(DspError::ChannelOutOfRange { channel, channels })?;
        Ok(Self::tick(buffer, input))
    }

    /// Process a block. The channel count follows the input block and
    /// `output` is reshaped to match it.
    pub fn process(&mut self, input : &Buffer<Sample>, output : &mut Buffer<Sample>) -> Result<(), DspError>
    {
        self.set_channels(input.channels())?;
        output.resize(input.channels(), input.frames());
        let buffers = &mut self.buffers;

        no_denormals(||
        {
            for (channel, buffer) in buffers.iter_mut().enumerate()
            {
                let target = output.channel_mut(channel);
                for (delayed, sample) in target.iter_mut().zip(input.channel(channel))
                {
                    *delayed = Self::tick(buffer, *sample);
                }
            }
        });
        Ok(())
    }

    /// Zero the history of every channel.
    pub fn clear(&mut self) { self.buffers.clear(); }
}

// ==========================================
// Delay With Linear Interpolation
// ==========================================

/// Delay split into whole samples and a fractional remainder.
///
/// Replaced as a unit so the three parts never disagree.
#[derive(Clone, Copy, Debug, PartialEq)]
struct FractionalDelay
{
    samples : f64,
    whole : usize,
    fraction : f64,
    complement : f64
}
impl FractionalDelay
{
    fn new(samples : f64) -> Self
    {
        let whole = samples.floor();
        let fraction = samples - whole;
        Self { samples, whole : whole as usize, fraction, complement : 1.0 - fraction }
    }
}

/// Fractional delay line with linear interpolation between adjacent taps.
///
/// For a delay `d = whole + fraction` the output is
/// `fraction * x[n - whole - 1] + (1 - fraction) * x[n - whole]`.
///
/// Blocks are written whole: each channel ring holds `whole + block` samples
/// and the integer taps for the block are read back in one `tail` call. The
/// older tap of the first output sample was overwritten by that write, so it
/// is captured from the ring beforehand (`tail_before_write`). The ring is
/// resized whenever the block size changes; history survives the resize.
///
/// # Parameters
/// - `size` - Delay in samples, clamped to `[0, max_delay]`
/// - `max_delay` - Longest delay the line accepts
/// - `sample_rate` - Used only to convert delay times given in milliseconds
pub struct DelayWithLinearInterpolation
{
    buffers : CircularBufferGroup<Sample>,
    delay : FractionalDelay,
    max_delay : usize,
    block_size : usize,
    sample_rate : f64
}
impl DelayWithLinearInterpolation
{
    /// Create a delay line of zero samples for `channels` channels.
    pub fn new(max_delay : usize, channels : usize) -> Result<Self, DspError>
    {
        Ok(Self
        {
            buffers : CircularBufferGroup::new(channels, 1)?,
            delay : FractionalDelay::new(0.0),
            max_delay,
            block_size : 1,
            sample_rate : DEFAULT_SAMPLE_RATE
        })
    }

    /// Create a delay line from a configuration record.
    pub fn from_config(config : &DelayConfig) -> Result<Self, DspError>
    {
        let mut delay = Self::new(config.max_delay, config.channels)?;
        delay.set_sample_rate(config.sample_rate);
        delay.set_size(config.delay)?;
        Ok(delay)
    }

    /// Delay in samples.
    pub fn size(&self) -> f64 { self.delay.samples }

    /// Fractional part of the delay.
    pub fn fraction(&self) -> f64 { self.delay.fraction }

    /// Set the delay in samples, clamped to `[0, max_delay]`.
    pub fn set_size(&mut self, samples : f64) -> Result<(), DspError>
    {
        let applied = clamp_parameter("delay", samples, 0.0, self.max_delay as f64, 0.0);
        let delay = FractionalDelay::new(applied);
        self.buffers.set_capacity(delay.whole + self.block_size)?;
        self.delay = delay;
        Ok(())
    }

    /// Longest delay in samples.
    pub fn max_delay(&self) -> usize { self.max_delay }

    /// Set the longest accepted delay, shortening the current delay if needed.
    pub fn set_max_delay(&mut self, max_delay : usize) -> Result<(), DspError>
    {
        self.max_delay = max_delay;
        if self.delay.samples > max_delay as f64 { self.set_size(max_delay as f64)?; }
        Ok(())
    }

    /// Delay in milliseconds at the current sample rate.
    pub fn delay_time(&self) -> f64 { samples_to_ms(self.delay.samples, self.sample_rate) }

    /// Set the delay in milliseconds.
    pub fn set_delay_time(&mut self, ms : f64) -> Result<(), DspError>
    {
        self.set_size(ms_to_samples(ms, self.sample_rate))
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 { self.sample_rate }

    /// Set the sample rate. The delay in samples is kept.
    pub fn set_sample_rate(&mut self, sample_rate : f64)
    {
        self.sample_rate = clamp_parameter("sample_rate", sample_rate, 1.0, f64::MAX, self.sample_rate);
    }

    /// Number of channels.
    pub fn channels(&self) -> usize { self.buffers.channels() }

    /// Set the number of channels. Surviving channels keep their history.
    pub fn set_channels(&mut self, channels : usize) -> Result<(), DspError>
    {
        self.buffers.set_channels(channels)
    }

    fn prepare_block(&mut self, frames : usize) -> Result<(), DspError>
    {
        if frames != self.block_size
        {
            self.buffers.set_capacity(self.delay.whole + frames)?;
            self.block_size = frames;
        }
        Ok(())
    }

    /// Delay one channel's block. `target` must be as long as `source`, and
    /// the ring must hold `whole + source.len()` samples.
    #[inline]
    fn run_block(buffer : &mut CircularBuffer<Sample>, delay : FractionalDelay, source : &[Sample], target : &mut [Sample])
    {
        // target doubles as scratch for the pre-write read
        buffer.tail(target);
        let tail_before_write = target[target.len() - 1];

        buffer.write(source);
        buffer.tail(target);

        let mut older = tail_before_write;
        for sample in target.iter_mut()
        {
            let current = *sample;
            *sample = delay.fraction * older + delay.complement * current;
            older = current;
        }
    }

    /// Process a single sample of one channel.
    ///
    /// Equivalent to a block of one frame; alternating with larger blocks
    /// resizes the rings each time the block size changes.
    pub fn process_sample(&mut self, channel : usize, input : Sample) -> Result<Sample, DspError>
    {
        let channels = self.channels();
        if channel >= channels { return Err(DspError::ChannelOutOfRange { channel, channels }); }
        self.prepare_block(1)?;

        let mut output = [0.0];
        Self::run_block(&mut self.buffers[channel], self.delay, &[input], &mut output);
        Ok(output[0])
    }

    /// Process a block. The channel count follows the input block and
    /// `output` is reshaped to match it.
    pub fn process(&mut self, input : &Buffer<Sample>, output : &mut Buffer<Sample>) -> Result<(), DspError>
    {
        self.set_channels(input.channels())?;
        output.resize(input.channels(), input.frames());
        if input.frames() == 0 { return Ok(()); }
        self.prepare_block(input.frames())?;

        let delay = self.delay;
        let buffers = &mut self.buffers;
        no_denormals(||
        {
            for (channel, buffer) in buffers.iter_mut().enumerate()
            {
                Self::run_block(buffer, delay, input.channel(channel), output.channel_mut(channel));
            }
        });
        Ok(())
    }

    /// Zero the history of every channel.
    pub fn clear(&mut self) { self.buffers.clear(); }
}

// ==========================================
// DC Blocker
// ==========================================

const DC_POLE : f64 = 0.9997;

/// First-order DC blocking filter.
///
/// `y[n] = x[n] - x[n-1] + 0.9997 * y[n-1]`, one state pair per channel.
#[derive(Clone, Debug)]
pub struct DcBlock
{
    // (previous input, previous output)
    state : Vec<(Sample, Sample)>
}
impl DcBlock
{
    /// Create a filter for `channels` channels.
    pub fn new(channels : usize) -> Self { Self { state : vec![(0.0, 0.0); channels] } }

    /// Number of channels.
    pub fn channels(&self) -> usize { self.state.len() }

    /// Set the number of channels. New channels start at rest.
    pub fn set_channels(&mut self, channels : usize) { self.state.resize(channels, (0.0, 0.0)); }

    /// Filter one sample of one channel. Panics if `channel` is out of range.
    #[inline]
    pub fn process(&mut self, channel : usize, input : Sample) -> Sample
    {
        let (previous_input, previous_output) = self.state[channel];
        let output = input - previous_input + DC_POLE * previous_output;
        self.state[channel] = (input, output);
        output
    }

    /// Reset every channel to rest.
    pub fn clear(&mut self) { self.state.fill((0.0, 0.0)); }
}

// ==========================================
// Limiter
// ==========================================

/// Shape of the limiter's release and of its pre-peak gain ramp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterMode
{
    /// Gain recovers by a constant step; ramps are straight lines.
    Linear,
    /// Gain recovers in proportion to itself; ramps are parabolic.
    #[default]
    Exponential
}
impl LimiterMode
{
    fn recover_scale(self) -> f64
    {
        match self
        {
            LimiterMode::Linear => 0.5,
            LimiterMode::Exponential => 0.707
        }
    }
}

/// One moment in time: the frame that arrived and the gain it will leave with.
#[derive(Clone, Debug)]
struct LookaheadSlot
{
    samples : Vec<Sample>,
    gain : f64
}

/// Ring of [`LookaheadSlot`]s. The cursor wraps over the lookahead window,
/// not the whole allocation.
#[derive(Clone, Debug)]
struct LookaheadRing
{
    slots : Vec<LookaheadSlot>,
    cursor : ModularIndex
}
impl LookaheadRing
{
    fn new(max_lookahead : usize, lookahead : usize, channels : usize) -> Result<Self, DspError>
    {
        let mut slots = Vec::new();
        slots.try_reserve_exact(max_lookahead)?;
        slots.resize(max_lookahead, LookaheadSlot { samples : vec![0.0; channels], gain : 1.0 });
        Ok(Self { slots, cursor : ModularIndex::new(lookahead) })
    }

    fn set_channels(&mut self, channels : usize)
    {
        for slot in self.slots.iter_mut() { slot.samples.resize(channels, 0.0); }
    }

    fn set_window(&mut self, lookahead : usize)
    {
        self.cursor = ModularIndex::new(lookahead);
        self.clear();
    }

    fn clear(&mut self)
    {
        for slot in self.slots.iter_mut()
        {
            slot.samples.fill(0.0);
            slot.gain = 1.0;
        }
        self.cursor.reset();
    }
}

/// Lookahead peak limiter.
///
/// Output runs `lookahead` samples behind the input. When a frame arrives
/// whose peak would exceed the threshold at the current gain, the gain of
/// that frame is cut to `threshold / peak` and a ramp down to it is written
/// into the frames still waiting in the ring, so the reduction starts before
/// the peak is emitted. After the peak the gain recovers toward unity at a
/// rate set by `release`.
///
/// Gain is shared by all channels; the peak of a frame is the largest
/// magnitude across channels.
///
/// # Parameters
/// - `threshold` - Linear ceiling for the output (before `preamp`)
/// - `lookahead` - Latency in samples, clamped to `[1, max_lookahead - 1]`
/// - `release` - Seconds to recover from full reduction
/// - `mode` - Linear or exponential release and ramp
/// - `postamp` - Linear gain applied to the input before analysis
/// - `preamp` - Linear gain applied to the delayed output
/// - `block_dc` - Remove DC from the input before analysis
///
/// Only whole blocks can be processed; see [`Limiter::process`].
pub struct Limiter
{
    ring : LookaheadRing,
    dc_block : DcBlock,
    channels : usize,
    max_lookahead : usize,
    threshold : f64,
    preamp : f64,
    postamp : f64,
    release : f64,
    mode : LimiterMode,
    block_dc : bool,
    sample_rate : f64,
    recover : f64,
    last : f64
}
impl Limiter
{
    /// Create a limiter with a ring of `max_lookahead` frames.
    ///
    /// Defaults: 100 samples lookahead (or `max_lookahead - 1` if smaller),
    /// threshold 1.0, 1s exponential release, unity pre/postamp, DC blocking on.
    pub fn new(channels : usize, max_lookahead : usize, sample_rate : f64) -> Result<Self, DspError>
    {
        if max_lookahead < 2 { return Err(DspError::InvalidLookahead { max_lookahead }); }

        let lookahead = DEFAULT_LOOKAHEAD.min(max_lookahead - 1);
        let mut limiter = Self
        {
            ring : LookaheadRing::new(max_lookahead, lookahead, channels)?,
            dc_block : DcBlock::new(channels),
            channels,
            max_lookahead,
            threshold : 1.0,
            preamp : 1.0,
            postamp : 1.0,
            release : DEFAULT_RELEASE,
            mode : LimiterMode::default(),
            block_dc : true,
            sample_rate : DEFAULT_SAMPLE_RATE,
            recover : 0.0,
            last : 1.0
        };
        limiter.set_sample_rate(sample_rate);
        Ok(limiter)
    }

    /// Create a limiter from a configuration record.
    pub fn from_config(config : &LimiterConfig) -> Result<Self, DspError>
    {
        let mut limiter = Self::new(config.channels, config.max_lookahead, config.sample_rate)?;
        limiter.set_lookahead(config.lookahead);
        limiter.set_threshold(config.threshold);
        limiter.set_preamp(config.preamp);
        limiter.set_postamp(config.postamp);
        limiter.set_release(config.release);
        limiter.set_mode(config.mode);
        limiter.set_block_dc(config.block_dc);
        Ok(limiter)
    }

    /// Current settings, after clamping.
    pub fn config(&self) -> LimiterConfig
    {
        LimiterConfig
        {
            channels : self.channels,
            max_lookahead : self.max_lookahead,
            lookahead : self.lookahead(),
            threshold : self.threshold,
            preamp : self.preamp,
            postamp : self.postamp,
            release : self.release,
            mode : self.mode,
            block_dc : self.block_dc,
            sample_rate : self.sample_rate
        }
    }

    /// Lookahead (and latency) in samples.
    pub fn lookahead(&self) -> usize { self.ring.cursor.modulus() }

    /// Set the lookahead, clamped to `[1, max_lookahead - 1]`.
    ///
    /// A new window starts empty: the ring is cleared.
    pub fn set_lookahead(&mut self, samples : usize)
    {
        let applied = samples.clamp(1, self.max_lookahead - 1);
        if applied != samples { debug!(requested = samples, applied, "lookahead clamped"); }
        if applied != self.lookahead() { self.ring.set_window(applied); }
    }

    /// Size of the lookahead ring.
    pub fn max_lookahead(&self) -> usize { self.max_lookahead }

    /// Linear output ceiling.
    pub fn threshold(&self) -> f64 { self.threshold }

    /// Set the linear output ceiling (at least 1e-6).
    pub fn set_threshold(&mut self, threshold : f64)
    {
        self.threshold = clamp_parameter("threshold", threshold, 1e-6, f64::MAX, self.threshold);
    }

    /// Linear output gain.
    pub fn preamp(&self) -> f64 { self.preamp }

    /// Set the linear output gain (non-negative).
    pub fn set_preamp(&mut self, gain : f64)
    {
        self.preamp = clamp_parameter("preamp", gain, 0.0, f64::MAX, self.preamp);
    }

    /// Linear input gain, applied before analysis.
    pub fn postamp(&self) -> f64 { self.postamp }

    /// Set the linear input gain (non-negative).
    pub fn set_postamp(&mut self, gain : f64)
    {
        self.postamp = clamp_parameter("postamp", gain, 0.0, f64::MAX, self.postamp);
    }

    /// Release time in seconds.
    pub fn release(&self) -> f64 { self.release }

    /// Set the release time in seconds (at least 0.1 ms).
    pub fn set_release(&mut self, seconds : f64)
    {
        self.release = clamp_parameter("release", seconds, 1e-4, f64::MAX, self.release);
        self.update_recover();
    }

    /// Release and ramp shape.
    pub fn mode(&self) -> LimiterMode { self.mode }

    /// Set the release and ramp shape.
    pub fn set_mode(&mut self, mode : LimiterMode)
    {
        self.mode = mode;
        self.update_recover();
    }

    /// Whether DC is removed before analysis.
    pub fn block_dc(&self) -> bool { self.block_dc }

    /// Enable or disable DC removal before analysis.
    pub fn set_block_dc(&mut self, enabled : bool)
    {
        if enabled && !self.block_dc { self.dc_block.clear(); }
        self.block_dc = enabled;
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 { self.sample_rate }

    /// Set the sample rate (at least 1 Hz).
    pub fn set_sample_rate(&mut self, sample_rate : f64)
    {
        self.sample_rate = clamp_parameter("sample_rate", sample_rate, 1.0, f64::MAX, self.sample_rate);
        self.update_recover();
    }

    /// Number of channels.
    pub fn channels(&self) -> usize { self.channels }

    /// Set the number of channels. New channels enter the ring silent.
    pub fn set_channels(&mut self, channels : usize)
    {
        if channels == self.channels { return; }
        debug!(from = self.channels, to = channels, "limiter channel count changed");
        self.ring.set_channels(channels);
        self.dc_block.set_channels(channels);
        self.channels = channels;
    }

    /// Gain computed for the most recent input frame.
    pub fn gain(&self) -> f64 { self.last }

    fn update_recover(&mut self)
    {
        // release is in seconds, not milliseconds: no factor of 1000
        self.recover = self.mode.recover_scale() / (self.release * self.sample_rate);
    }

    /// Gain the newest frame gets if nothing needs limiting.
    #[inline]
    fn recovered_gain(&self) -> f64
    {
        let gain = match self.mode
        {
            LimiterMode::Linear => self.last + self.recover,
            LimiterMode::Exponential if self.last > 0.01 => self.last + self.recover * self.last,
            LimiterMode::Exponential => self.last + self.recover
        };
        gain.min(1.0)
    }

    /// Ramp the gain of the newest `lookahead` slots down to `threshold / peak`.
    ///
    /// Walks from the newest slot toward the oldest and stops at the first
    /// slot already at or below the ramp. That slot, and every older one,
    /// was shaped by a nearer peak.
    fn propagate_peak(&mut self, peak : f64)
    {
        let lookahead = self.lookahead();
        let target = self.threshold / peak;
        let rise = 1.0 - target;
        let step = 1.0 / lookahead as f64;

        let mut acc = 0.0;
        for age in 0..lookahead
        {
            let ramp = match self.mode
            {
                LimiterMode::Linear => target + rise * acc,
                LimiterMode::Exponential => target + rise * acc * acc
            };
            let position = self.ring.cursor.back(age);
            let slot = &mut self.ring.slots[position];
            if ramp < slot.gain { slot.gain = ramp; } else { break; }
            acc += step;
        }
    }

    #[inline]
    fn step(&mut self, input : &Buffer<Sample>, output : &mut Buffer<Sample>, frame : usize)
    {
        let gain = self.recovered_gain();
        let position = self.ring.cursor.get();
        let slot = &mut self.ring.slots[position];

        // The slot under the cursor was filled `lookahead` frames ago.
        let delayed_gain = slot.gain * self.preamp;
        let mut peak = 0.0f64;
        for channel in 0..self.channels
        {
            output.channel_mut(channel)[frame] = slot.samples[channel] * delayed_gain;

            let mut sample = input.channel(channel)[frame];
            if self.block_dc { sample = self.dc_block.process(channel, sample); }
            sample *= self.postamp;
            slot.samples[channel] = sample;
            peak = peak.max(sample.abs());
        }
        slot.gain = gain;

        if peak * gain > self.threshold { self.propagate_peak(peak); }
        self.last = self.ring.slots[position].gain;
        self.ring.cursor.advance(1);
    }

    /// Process a block. The channel count follows the input block and
    /// `output` is reshaped to match it.
    pub fn process(&mut self, input : &Buffer<Sample>, output : &mut Buffer<Sample>) -> Result<(), DspError>
    {
        self.set_channels(input.channels());
        output.resize(input.channels(), input.frames());

        no_denormals(||
        {
            for frame in 0..input.frames() { self.step(input, output, frame); }
        });
        Ok(())
    }

    /// Always fails: limiting needs the frames of a block together.
    pub fn process_sample(&mut self, _channel : usize, _input : Sample) -> Result<Sample, DspError>
    {
        Err(DspError::SingleSampleUnsupported { processor : "Limiter" })
    }

    /// Silence the ring, return to unity gain and reset the DC blocker.
    pub fn clear(&mut self)
    {
        trace!("clearing limiter");
        self.ring.clear();
        self.dc_block.clear();
        self.last = 1.0;
    }
}
