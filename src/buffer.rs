//! Buffers for streaming audio.
//!
//! - [`ModularIndex`] - wrap-around cursor shared by every ring in the crate
//! - [`CircularBuffer`] - fixed capacity ring with block writes and windowed reads
//! - [`CircularBufferGroup`] - one ring per channel, resized in lockstep
//! - [`Buffer`] - planar block of `channels × frames` handed to processors
//!
//! ## Example: delaying a stream by the ring capacity
//!
//! ```
//! use mkaudiocore::buffer::CircularBuffer;
//!
//! let mut ring = CircularBuffer::<f64>::new(4).unwrap();
//! let mut delayed = [0.0];
//! let mut output = Vec::new();
//! for sample in [1.0, 2.0, 3.0, 4.0, 5.0]
//! {
//!     ring.write(&[sample]);
//!     ring.tail(&mut delayed);
//!     output.push(delayed[0]);
//! }
//! assert_eq!(output, [0.0, 0.0, 0.0, 1.0, 2.0]);
//! ```

use std::cell::Cell;
use std::marker::PhantomData;

use tracing::{debug, trace};

use crate::error::DspError;

// ==========================================
// Modular Index
// ==========================================

/// Cursor into a ring of `modulus` slots.
///
/// Holds `value < modulus` at all times. Steps are reduced once, added and
/// wrapped with a single compare-and-subtract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModularIndex
{
    value : usize,
    modulus : usize
}
impl ModularIndex
{
    /// New index at 0. Panics if `modulus` is zero.
    #[inline]
    pub fn new(modulus : usize) -> Self
    {
        assert!(modulus > 0, "modular index needs a non-zero modulus");
        Self { value : 0, modulus }
    }
    /// Current position.
    #[inline]
    pub fn get(&self) -> usize { self.value }
    /// Number of slots the index wraps over.
    #[inline]
    pub fn modulus(&self) -> usize { self.modulus }
    /// Position `steps` ahead, without moving.
    #[inline]
    pub fn forward(&self, steps : usize) -> usize
    {
        let next = self.value + steps % self.modulus;
        if next >= self.modulus { next - self.modulus } else { next }
    }
    /// Position `steps` behind, without moving.
    #[inline]
    pub fn back(&self, steps : usize) -> usize
    {
        let steps = steps % self.modulus;
        if steps > self.value { self.value + self.modulus - steps } else { self.value - steps }
    }
    /// Moves the index `steps` ahead.
    #[inline]
    pub fn advance(&mut self, steps : usize) { self.value = self.forward(steps); }
    /// Moves the index back to 0.
    #[inline]
    pub fn reset(&mut self) { self.value = 0; }
    /// Changes the modulus, wrapping the current position into the new range.
    #[inline]
    pub fn set_modulus(&mut self, modulus : usize)
    {
        assert!(modulus > 0, "modular index needs a non-zero modulus");
        self.modulus = modulus;
        self.value %= modulus;
    }
}

// ==========================================
// Circular Buffer
// ==========================================

/// Fixed capacity ring buffer with a single owner.
///
/// Blocks are appended with [`write`](Self::write); reads never move the
/// cursor. [`head`](Self::head) returns the newest `k` elements and
/// [`tail`](Self::tail) the oldest `k` of the last `capacity` writes, which is
/// the read a delay line needs.
///
/// Storage starts zeroed (`T::default()`), so history that was never written
/// reads as silence.
///
/// The buffer has no internal synchronisation. It can be moved to another
/// thread (an audio callback, say) but never shared between threads:
///
/// ```compile_fail
/// fn shared<T : Sync>() {}
/// shared::<mkaudiocore::buffer::CircularBuffer<f64>>();
/// ```
#[derive(Clone, Debug)]
pub struct CircularBuffer<T>
{
    storage : Vec<T>,
    index : ModularIndex,
    _unshared : PhantomData<Cell<()>>
}
impl<T : Copy + Default> CircularBuffer<T>
{
    /// New buffer holding `capacity` elements.
    pub fn new(capacity : usize) -> Result<Self, DspError>
    {
        Ok(Self
        {
            storage : zeroed(capacity)?,
            index : ModularIndex::new(capacity),
            _unshared : PhantomData
        })
    }
    /// Number of elements the ring retains.
    #[inline]
    pub fn capacity(&self) -> usize { self.storage.len() }
    /// Physical storage, in slot order rather than time order.
    #[inline]
    pub fn as_slice(&self) -> &[T] { &self.storage }
    /// Appends `block`, overwriting the oldest elements.
    ///
    /// A block that runs past the end of storage is split and the remainder
    /// written from slot 0. Panics if the block is longer than the capacity.
    #[inline]
    pub fn write(&mut self, block : &[T])
    {
        let capacity = self.capacity();
        assert!(block.len() <= capacity, "write of {} elements into ring of {}", block.len(), capacity);

        let start = self.index.get();
        let first = block.len().min(capacity - start);
        self.storage[start..start + first].copy_from_slice(&block[..first]);
        self.storage[..block.len() - first].copy_from_slice(&block[first..]);
        self.index.advance(block.len());
    }
    /// Fills `output` with the `output.len()` most recently written elements,
    /// oldest first.
    #[inline]
    pub fn head(&self, output : &mut [T])
    {
        self.copy_window(self.index.back(output.len()), output);
    }
    /// Fills `output` with the oldest `output.len()` elements of the last
    /// `capacity` writes.
    ///
    /// Writing one element and then reading a tail of one yields the input
    /// delayed by `capacity - 1` samples.
    #[inline]
    pub fn tail(&self, output : &mut [T])
    {
        self.copy_window(self.index.get(), output);
    }
    /// Changes the capacity, keeping the most recent `min(old, new)` elements.
    ///
    /// Older slots are zeroed when growing. The cursor restarts at 0 with the
    /// retained history laid out as the newest elements of the new ring.
    pub fn resize(&mut self, capacity : usize) -> Result<(), DspError>
    {
        if capacity == self.capacity() { return Ok(()); }
        *self = self.resized(capacity)?;
        Ok(())
    }
    /// Copy of this ring at a new capacity, as [`resize`](Self::resize) would leave it.
    fn resized(&self, capacity : usize) -> Result<Self, DspError>
    {
        let mut storage = zeroed(capacity)?;
        let keep = capacity.min(self.capacity());
        self.head(&mut storage[capacity - keep..]);
        debug!(from = self.capacity(), to = capacity, kept = keep, "resized circular buffer");

        Ok(Self { storage, index : ModularIndex::new(capacity), _unshared : PhantomData })
    }
    /// Zeroes all storage and rewinds the cursor.
    pub fn clear(&mut self)
    {
        self.storage.fill(T::default());
        self.index.reset();
    }

    #[inline]
    fn copy_window(&self, start : usize, output : &mut [T])
    {
        let capacity = self.capacity();
        let len = output.len();
        assert!(len <= capacity, "read of {} elements from ring of {}", len, capacity);

        let first = len.min(capacity - start);
        output[..first].copy_from_slice(&self.storage[start..start + first]);
        output[first..].copy_from_slice(&self.storage[..len - first]);
    }
}

fn zeroed<T : Copy + Default>(capacity : usize) -> Result<Vec<T>, DspError>
{
    if capacity == 0 { return Err(DspError::ZeroCapacity); }
    let mut storage = Vec::new();
    storage.try_reserve_exact(capacity)?;
    storage.resize(capacity, T::default());
    Ok(storage)
}

// ==========================================
// Circular Buffer Group
// ==========================================

/// One [`CircularBuffer`] per audio channel, all of the same capacity.
#[derive(Clone, Debug)]
pub struct CircularBufferGroup<T>
{
    buffers : Vec<CircularBuffer<T>>,
    capacity : usize
}
impl<T : Copy + Default> CircularBufferGroup<T>
{
    /// New group of `channels` rings, each holding `capacity` elements.
    pub fn new(channels : usize, capacity : usize) -> Result<Self, DspError>
    {
        let mut group = Self { buffers : Vec::new(), capacity : 0 };
        group.resize(channels, capacity)?;
        Ok(group)
    }
    /// Number of channels.
    #[inline]
    pub fn channels(&self) -> usize { self.buffers.len() }
    /// Capacity shared by every channel.
    #[inline]
    pub fn capacity(&self) -> usize { self.capacity }
    /// Ring of one channel.
    #[inline]
    pub fn channel(&self, channel : usize) -> Option<&CircularBuffer<T>> { self.buffers.get(channel) }
    /// Mutable ring of one channel.
    #[inline]
    pub fn channel_mut(&mut self, channel : usize) -> Option<&mut CircularBuffer<T>> { self.buffers.get_mut(channel) }
    /// Iterates the rings in channel order.
    pub fn iter(&self) -> std::slice::Iter<'_, CircularBuffer<T>> { self.buffers.iter() }
    /// Iterates the rings mutably in channel order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, CircularBuffer<T>> { self.buffers.iter_mut() }
    /// Sets channel count and capacity together.
    ///
    /// Channels beyond the new count are dropped, new channels start silent
    /// and surviving channels keep their most recent history.
    ///
    /// A new capacity is allocated for every channel before any ring is
    /// replaced, so on error the group is left as it was.
    pub fn resize(&mut self, channels : usize, capacity : usize) -> Result<(), DspError>
    {
        if capacity == 0 { return Err(DspError::ZeroCapacity); }

        if capacity != self.capacity
        {
            let mut buffers = Vec::new();
            buffers.try_reserve_exact(channels)?;
            for buffer in self.buffers.iter().take(channels) { buffers.push(buffer.resized(capacity)?); }
            while buffers.len() < channels { buffers.push(CircularBuffer::new(capacity)?); }
            self.buffers = buffers;
            self.capacity = capacity;
            return Ok(());
        }

        self.buffers.truncate(channels);
        while self.buffers.len() < channels { self.buffers.push(CircularBuffer::new(capacity)?); }
        Ok(())
    }
    /// Changes the channel count, keeping the capacity.
    pub fn set_channels(&mut self, channels : usize) -> Result<(), DspError>
    {
        if channels != self.channels() { debug!(from = self.channels(), to = channels, "channel count changed"); }
        self.resize(channels, self.capacity)
    }
    /// Changes the capacity of every channel.
    pub fn set_capacity(&mut self, capacity : usize) -> Result<(), DspError>
    {
        self.resize(self.channels(), capacity)
    }
    /// Clears every channel.
    pub fn clear(&mut self)
    {
        trace!(channels = self.channels(), "clearing buffer group");
        self.buffers.iter_mut().for_each(CircularBuffer::clear);
    }
}
impl<T> std::ops::Index<usize> for CircularBufferGroup<T>
{
    type Output = CircularBuffer<T>;

    #[inline]
    fn index(&self, channel : usize) -> &Self::Output { &self.buffers[channel] }
}
impl<T> std::ops::IndexMut<usize> for CircularBufferGroup<T>
{
    #[inline]
    fn index_mut(&mut self, channel : usize) -> &mut Self::Output { &mut self.buffers[channel] }
}

// ==========================================
// Buffer
// ==========================================

/// Planar audio block: `channels` runs of `frames` samples each.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Buffer<T>
{
    data : Vec<T>,
    channels : usize,
    frames : usize
}
impl<T : Copy + Default> Buffer<T>
{
    /// New silent block.
    pub fn new(channels : usize, frames : usize) -> Self
    {
        Self { data : vec![T::default(); channels * frames], channels, frames }
    }
    /// Block copied from per-channel slices, which must share one length.
    pub fn from_channels(channels : &[&[T]]) -> Result<Self, DspError>
    {
        let frames = channels.first().map_or(0, |channel| channel.len());
        let mut data = Vec::with_capacity(channels.len() * frames);
        for channel in channels
        {
            if channel.len() != frames
            {
                return Err(DspError::ChannelLengthMismatch { expected : frames, found : channel.len() });
            }
            data.extend_from_slice(channel);
        }
        Ok(Self { data, channels : channels.len(), frames })
    }
    /// Number of channels.
    #[inline]
    pub fn channels(&self) -> usize { self.channels }
    /// Samples per channel.
    #[inline]
    pub fn frames(&self) -> usize { self.frames }
    /// Samples of one channel. Panics if `channel` is out of range.
    #[inline]
    pub fn channel(&self, channel : usize) -> &[T]
    {
        assert!(channel < self.channels, "channel {} of {}", channel, self.channels);
        &self.data[channel * self.frames..(channel + 1) * self.frames]
    }
    /// Mutable samples of one channel. Panics if `channel` is out of range.
    #[inline]
    pub fn channel_mut(&mut self, channel : usize) -> &mut [T]
    {
        assert!(channel < self.channels, "channel {} of {}", channel, self.channels);
        &mut self.data[channel * self.frames..(channel + 1) * self.frames]
    }
    /// Reshapes the block. Contents are reset to silence when the shape
    /// changes; existing storage is reused where it is large enough.
    pub fn resize(&mut self, channels : usize, frames : usize)
    {
        if channels == self.channels && frames == self.frames { return; }
        self.data.clear();
        self.data.resize(channels * frames, T::default());
        self.channels = channels;
        self.frames = frames;
    }
    /// Sets every sample to `value`.
    pub fn fill(&mut self, value : T) { self.data.fill(value); }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn head_of(ring : &CircularBuffer<f64>, len : usize) -> Vec<f64>
    {
        let mut output = vec![0.0; len];
        ring.head(&mut output);
        output
    }

    fn tail_of(ring : &CircularBuffer<f64>, len : usize) -> Vec<f64>
    {
        let mut output = vec![0.0; len];
        ring.tail(&mut output);
        output
    }

    #[test]
    fn test_modular_index_wraps()
    {
        let mut index = ModularIndex::new(5);
        index.advance(3);
        assert_eq!(index.get(), 3);
        index.advance(4);
        assert_eq!(index.get(), 2);
        assert_eq!(index.back(3), 4);
        assert_eq!(index.back(12), 0);
        assert_eq!(index.forward(13), 0);

        index.set_modulus(2);
        assert_eq!(index.get(), 0);
        index.reset();
        assert_eq!(index.get(), 0);
    }

    #[test]
    fn test_zero_capacity_rejected()
    {
        assert!(matches!(CircularBuffer::<f64>::new(0), Err(DspError::ZeroCapacity)));
        let mut ring = CircularBuffer::<f64>::new(4).unwrap();
        assert!(matches!(ring.resize(0), Err(DspError::ZeroCapacity)));
        assert_eq!(ring.capacity(), 4);
    }

    #[test]
    fn test_wrap_around_head_and_tail()
    {
        let mut ring = CircularBuffer::<f64>::new(8).unwrap();
        ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        ring.write(&[6.0, 7.0, 8.0, 9.0, 10.0]);

        assert_eq!(ring.as_slice(), &[9.0, 10.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(head_of(&ring, 3), [8.0, 9.0, 10.0]);
        assert_eq!(tail_of(&ring, 3), [3.0, 4.0, 5.0]);

        ring.write(&[20.0, 21.0, 22.0]);
        assert_eq!(head_of(&ring, 3), [20.0, 21.0, 22.0]);
        assert_eq!(tail_of(&ring, 3), [6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_full_capacity_write()
    {
        let mut ring = CircularBuffer::<f64>::new(4).unwrap();
        ring.write(&[1.0, 2.0]);
        ring.write(&[3.0, 4.0, 5.0, 6.0]);
        assert_eq!(head_of(&ring, 4), [3.0, 4.0, 5.0, 6.0]);
        assert_eq!(tail_of(&ring, 4), [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    #[should_panic(expected = "write of 5 elements into ring of 4")]
    fn test_oversized_write_panics()
    {
        let mut ring = CircularBuffer::<f64>::new(4).unwrap();
        ring.write(&[0.0; 5]);
    }

    #[test]
    #[should_panic(expected = "read of 5 elements from ring of 4")]
    fn test_oversized_read_panics()
    {
        let ring = CircularBuffer::<f64>::new(4).unwrap();
        tail_of(&ring, 5);
    }

    #[test]
    fn test_tail_delays_by_capacity_and_resize_keeps_recent()
    {
        let mut ring = CircularBuffer::<f64>::new(16).unwrap();
        let blocks : Vec<Vec<f64>> = (0..5).map(|block| (1..=4).map(|n| (block * 4 + n) as f64).collect()).collect();

        for block in &blocks[..3]
        {
            ring.write(block);
            assert_eq!(tail_of(&ring, 4), [0.0; 4]);
        }
        ring.write(&blocks[3]);
        assert_eq!(tail_of(&ring, 4), [1.0, 2.0, 3.0, 4.0]);
        ring.write(&blocks[4]);
        assert_eq!(tail_of(&ring, 4), [5.0, 6.0, 7.0, 8.0]);

        // 11..=20 survive the shrink, 1..=10 are gone.
        ring.resize(10).unwrap();
        assert_eq!(head_of(&ring, 10), (11..=20).map(f64::from).collect::<Vec<_>>());
        ring.write(&[21.0, 22.0, 23.0, 24.0]);
        assert_eq!(tail_of(&ring, 4), [15.0, 16.0, 17.0, 18.0]);
        ring.write(&[25.0, 26.0, 27.0, 28.0]);
        assert_eq!(tail_of(&ring, 4), [19.0, 20.0, 21.0, 22.0]);
    }

    #[test]
    fn test_resize_grow_pads_with_silence()
    {
        let mut ring = CircularBuffer::<f64>::new(4).unwrap();
        ring.write(&[1.0, 2.0, 3.0, 4.0]);
        ring.write(&[5.0]);
        ring.resize(6).unwrap();

        assert_eq!(head_of(&ring, 6), [0.0, 0.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(tail_of(&ring, 2), [0.0, 0.0]);
        ring.write(&[6.0, 7.0]);
        assert_eq!(tail_of(&ring, 2), [2.0, 3.0]);
    }

    #[test]
    fn test_clear_matches_fresh_buffer()
    {
        let mut ring = CircularBuffer::<f64>::new(5).unwrap();
        ring.write(&[1.0, 2.0, 3.0]);
        ring.clear();

        let mut fresh = CircularBuffer::<f64>::new(5).unwrap();
        for target in [&mut ring, &mut fresh] { target.write(&[9.0, 8.0]); }
        assert_eq!(ring.as_slice(), fresh.as_slice());
        assert_eq!(tail_of(&ring, 5), tail_of(&fresh, 5));
    }

    #[test]
    fn test_buffer_moves_to_another_thread()
    {
        let mut ring = CircularBuffer::<f64>::new(3).unwrap();
        ring.write(&[1.0, 2.0, 3.0]);
        let ring = std::thread::spawn(move ||
        {
            ring.write(&[4.0]);
            ring
        }).join().unwrap();
        assert_eq!(head_of(&ring, 3), [2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_group_resizes_in_lockstep()
    {
        let mut group = CircularBufferGroup::<f64>::new(2, 4).unwrap();
        group[0].write(&[1.0, 2.0, 3.0]);
        group[1].write(&[4.0, 5.0, 6.0]);

        group.resize(3, 2).unwrap();
        assert_eq!(group.channels(), 3);
        assert!(group.iter().all(|ring| ring.capacity() == 2));
        assert_eq!(head_of(&group[0], 2), [2.0, 3.0]);
        assert_eq!(head_of(&group[1], 2), [5.0, 6.0]);
        assert_eq!(head_of(&group[2], 2), [0.0, 0.0]);

        group.set_channels(1).unwrap();
        assert_eq!(group.channels(), 1);
        assert!(group.channel(1).is_none());

        group.clear();
        assert_eq!(head_of(&group[0], 2), [0.0, 0.0]);
    }

    #[test]
    fn test_failed_group_resize_keeps_rings()
    {
        let mut group = CircularBufferGroup::<f64>::new(2, 4).unwrap();
        group[0].write(&[1.0, 2.0]);
        group[1].write(&[3.0, 4.0]);

        assert!(matches!(group.resize(3, usize::MAX), Err(DspError::Allocation(_))));
        assert_eq!(group.channels(), 2);
        assert_eq!(group.capacity(), 4);
        assert!(group.iter().all(|ring| ring.capacity() == 4));
        assert_eq!(head_of(&group[0], 2), [1.0, 2.0]);
        assert_eq!(head_of(&group[1], 2), [3.0, 4.0]);
    }

    #[test]
    fn test_planar_buffer_layout()
    {
        let left = [1.0, 2.0, 3.0];
        let right = [4.0, 5.0, 6.0];
        let mut block = Buffer::from_channels(&[&left[..], &right[..]]).unwrap();
        assert_eq!(block.channels(), 2);
        assert_eq!(block.frames(), 3);
        assert_eq!(block.channel(1), &right);

        block.channel_mut(0)[2] = 7.0;
        assert_eq!(block.channel(0), &[1.0, 2.0, 7.0]);

        block.resize(1, 4);
        assert_eq!(block.channel(0), &[0.0; 4]);
    }

    #[test]
    fn test_ragged_channels_rejected()
    {
        let result = Buffer::from_channels(&[&[1.0, 2.0][..], &[3.0][..]]);
        assert!(matches!(result, Err(DspError::ChannelLengthMismatch { expected : 2, found : 1 })));
    }
}
