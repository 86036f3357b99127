//! Host-facing processor interface.
//!
//! A host holds processors as `Box<dyn Processor>` and drives them block by
//! block from its audio thread.
//!
//! ### Use
//! ```
//! use mkaudiocore::buffer::Buffer;
//! use mkaudiocore::dsp::{Delay, Limiter};
//! use mkaudiocore::processor::Processor;
//!
//! let mut chain : Vec<Box<dyn Processor>> = vec![Box::new(Delay::new(64, 2).unwrap()) as Box<dyn Processor>, Box::new(Limiter::new(2, 64, 48000.0).unwrap())];
//! for processor in chain.iter_mut() { processor.set_sample_rate(48000.0); }
//!
//! let mut block = Buffer::new(2, 128);
//! let mut scratch = Buffer::new(2, 128);
//! for processor in chain.iter_mut()
//! {
//!     processor.process(&block, &mut scratch).unwrap();
//!     std::mem::swap(&mut block, &mut scratch);
//! }
//! assert_eq!(block.frames(), 128);
//! ```

use crate::Sample;
use crate::buffer::Buffer;
use crate::dsp::{Delay, DelayWithLinearInterpolation, Limiter};
use crate::error::DspError;

pub trait Processor : Send
{
    ///Returns name.
    fn name(&self) -> &'static str;
    ///Number of channels the processor currently holds state for.
    fn channels(&self) -> usize;
    ///Set the channel count. Surviving channels keep their state.
    fn set_channels(&mut self, channels : usize) -> Result<(), DspError>;
    ///Set the sample rate in Hz.
    fn set_sample_rate(&mut self, sample_rate : f64);
    ///Process one sample of one channel.
    fn process_sample(&mut self, channel : usize, input : Sample) -> Result<Sample, DspError>;
    ///Process a block. Adapts to the channel and frame count of `input`; `output` is reshaped to match.
    fn process(&mut self, input : &Buffer<Sample>, output : &mut Buffer<Sample>) -> Result<(), DspError>;
    ///Reset to the freshly constructed state, keeping parameters.
    fn clear(&mut self);
}

impl Processor for Delay
{
    fn name(&self) -> &'static str { "Delay" }
    fn channels(&self) -> usize { Delay::channels(self) }
    fn set_channels(&mut self, channels : usize) -> Result<(), DspError> { Delay::set_channels(self, channels) }
    fn set_sample_rate(&mut self, sample_rate : f64) { Delay::set_sample_rate(self, sample_rate) }
    fn process_sample(&mut self, channel : usize, input : Sample) -> Result<Sample, DspError> { Delay::process_sample(self, channel, input) }
    fn process(&mut self, input : &Buffer<Sample>, output : &mut Buffer<Sample>) -> Result<(), DspError> { Delay::process(self, input, output) }
    fn clear(&mut self) { Delay::clear(self) }
}

impl Processor for DelayWithLinearInterpolation
{
    fn name(&self) -> &'static str { "DelayWithLinearInterpolation" }
    fn channels(&self) -> usize { DelayWithLinearInterpolation::channels(self) }
    fn set_channels(&mut self, channels : usize) -> Result<(), DspError> { DelayWithLinearInterpolation::set_channels(self, channels) }
    fn set_sample_rate(&mut self, sample_rate : f64) { DelayWithLinearInterpolation::set_sample_rate(self, sample_rate) }
    fn process_sample(&mut self, channel : usize, input : Sample) -> Result<Sample, DspError>
    {
        DelayWithLinearInterpolation::process_sample(self, channel, input)
    }
    fn process(&mut self, input : &Buffer<Sample>, output : &mut Buffer<Sample>) -> Result<(), DspError>
    {
        DelayWithLinearInterpolation::process(self, input, output)
    }
    fn clear(&mut self) { DelayWithLinearInterpolation::clear(self) }
}

impl Processor for Limiter
{
    fn name(&self) -> &'static str { "Limiter" }
    fn channels(&self) -> usize { Limiter::channels(self) }
    fn set_channels(&mut self, channels : usize) -> Result<(), DspError>
    {
        Limiter::set_channels(self, channels);
        Ok(())
    }
    fn set_sample_rate(&mut self, sample_rate : f64) { Limiter::set_sample_rate(self, sample_rate) }
    fn process_sample(&mut self, channel : usize, input : Sample) -> Result<Sample, DspError> { Limiter::process_sample(self, channel, input) }
    fn process(&mut self, input : &Buffer<Sample>, output : &mut Buffer<Sample>) -> Result<(), DspError> { Limiter::process(self, input, output) }
    fn clear(&mut self) { Limiter::clear(self) }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn processors() -> Vec<Box<dyn Processor>>
    {
        vec!
        [
            Box::new(Delay::new(32, 2).unwrap()) as Box<dyn Processor>,
            Box::new(DelayWithLinearInterpolation::new(32, 2).unwrap()),
            Box::new(Limiter::new(2, 32, 1000.0).unwrap())
        ]
    }

    #[test]
    fn test_names()
    {
        let names : Vec<&str> = processors().iter().map(|processor| processor.name()).collect();
        assert_eq!(names, ["Delay", "DelayWithLinearInterpolation", "Limiter"]);
    }

    #[test]
    fn test_process_follows_input_shape()
    {
        for mut processor in processors()
        {
            let input = Buffer::new(3, 7);
            let mut output = Buffer::new(1, 1);
            processor.process(&input, &mut output).unwrap();
            assert_eq!(processor.channels(), 3, "{}", processor.name());
            assert_eq!((output.channels(), output.frames()), (3, 7), "{}", processor.name());
        }
    }

    #[test]
    fn test_set_channels()
    {
        for mut processor in processors()
        {
            processor.set_channels(5).unwrap();
            assert_eq!(processor.channels(), 5, "{}", processor.name());
        }
    }

    #[test]
    fn test_single_sample_paths()
    {
        let mut processors = processors();
        // zero delay passes input straight through
        assert_eq!(processors[0].process_sample(0, 1.0).unwrap(), 1.0);
        assert_eq!(processors[1].process_sample(1, 1.0).unwrap(), 1.0);
        assert!(matches!(processors[0].process_sample(2, 1.0), Err(DspError::ChannelOutOfRange { channel : 2, channels : 2 })));
        assert!(matches!(processors[2].process_sample(0, 1.0), Err(DspError::SingleSampleUnsupported { processor : "Limiter" })));
    }

    #[test]
    fn test_boxed_processor_is_send()
    {
        let mut delay = Delay::new(4, 1).unwrap();
        delay.set_size(2).unwrap();
        let mut processor : Box<dyn Processor> = Box::new(delay);
        let handle = std::thread::spawn(move ||
        {
            processor.clear();
            [1.0, 2.0, 3.0].map(|sample| processor.process_sample(0, sample).unwrap())
        });
        assert_eq!(handle.join().unwrap(), [0.0, 0.0, 1.0]);
    }
}
