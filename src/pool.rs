//! Fixed-count, fixed-size slot pool exchanged between a device and the application.
//!
//! A [`BufferSlot`] is an owned value: while it is held outside the pool the
//! pool keeps no copy of it, so a slot can never be in two states at once.
//! Every successful [`BufferPool::acquire`] must be paired with exactly one
//! [`BufferPool::release`]; a leaked slot starves the pool and eventually
//! stalls the pipeline.

use std::collections::VecDeque;

use crate::compositor::SurfaceMut;
use crate::error::{PipelineError, Result};
use crate::traits::Dimensions;

/// Who currently holds a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Queued in the pool, available to the next acquire.
    Free,
    /// Held by the side writing into the slot.
    Producer,
    /// Held by the side reading from the slot.
    Consumer,
}

/// Counts of slots per state. Always sums to the pool capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolOccupancy {
    /// Slots waiting in the pool.
    pub free: usize,
    /// Slots held by a producer.
    pub producer: usize,
    /// Slots held by a consumer.
    pub consumer: usize,
}

impl PoolOccupancy {
    /// Total number of slots accounted for.
    pub const fn total(&self) -> usize {
        self.free + self.producer + self.consumer
    }

    /// Slots currently outside the pool.
    pub const fn held(&self) -> usize {
        self.producer + self.consumer
    }
}

/// One fixed-size memory region owned by a [`BufferPool`].
#[derive(Debug)]
pub struct BufferSlot {
    index: usize,
    data: Vec<u8>,
    bytes_used: usize,
    usage: u64,
    sequence: u32,
    dimensions: Dimensions,
}

impl BufferSlot {
    /// Position of the slot inside its pool.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Whole slot memory.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whole slot memory, writable.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes holding valid payload.
    pub fn payload(&self) -> &[u8] {
        self.data.get(..self.bytes_used).unwrap_or(&self.data)
    }

    /// Bytes holding valid payload.
    pub const fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Record how many bytes of the slot carry payload; clamped to the slot size.
    pub fn set_bytes_used(&mut self, bytes: usize) {
        self.bytes_used = bytes.min(self.data.len());
    }

    /// Slot size in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of times this slot has been acquired.
    pub const fn usage(&self) -> u64 {
        self.usage
    }

    /// Driver sequence number of the payload.
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Record the driver sequence number of the payload.
    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    /// Geometry of the pixels held in the slot.
    pub const fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    /// The slot memory as an ARGB surface for the compositor.
    pub fn surface_mut(&mut self) -> SurfaceMut<'_> {
        SurfaceMut::new(&mut self.data, self.dimensions)
    }

    /// Copy `source` into the slot, truncating to the slot size, and mark it used.
    pub fn fill_from(&mut self, source: &[u8]) -> usize {
        let len = source.len().min(self.data.len());
        if let (Some(dst), Some(src)) = (self.data.get_mut(..len), source.get(..len)) {
            dst.copy_from_slice(src);
        }
        self.bytes_used = len;
        len
    }
}

/// Fixed set of equally sized slots handed out in FIFO order.
#[derive(Debug)]
pub struct BufferPool {
    slots: Vec<Option<BufferSlot>>,
    states: Vec<SlotState>,
    free: VecDeque<usize>,
    slot_size: usize,
}

impl BufferPool {
    /// Allocate `count` zeroed slots of `slot_size` bytes.
    pub fn new(count: usize, slot_size: usize) -> Self {
        Self::with_dimensions(count, slot_size, Dimensions::default())
    }

    /// Allocate `count` zeroed slots describing pixels laid out as `dimensions`.
    pub fn with_dimensions(count: usize, slot_size: usize, dimensions: Dimensions) -> Self {
        let slots = (0..count)
            .map(|index| {
                Some(BufferSlot {
                    index,
                    data: vec![0; slot_size],
                    bytes_used: 0,
                    usage: 0,
                    sequence: 0,
                    dimensions,
                })
            })
            .collect();

        Self {
            slots,
            states: vec![SlotState::Free; count],
            free: (0..count).collect(),
            slot_size,
        }
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Size of every slot in bytes.
    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Take the longest-waiting free slot and mark it held by `holder`.
    pub fn acquire(&mut self, holder: SlotState) -> Result<BufferSlot> {
        let exhausted = PipelineError::ResourceExhaustion {
            capacity: self.capacity(),
        };
        let index = self.free.pop_front().ok_or(exhausted)?;

        let Some(mut slot) = self.slots.get_mut(index).and_then(Option::take) else {
            return Err(PipelineError::ForeignSlot { index });
        };
        if let Some(state) = self.states.get_mut(index) {
            *state = if holder == SlotState::Free {
                SlotState::Consumer
            } else {
                holder
            };
        }
        slot.usage += 1;
        Ok(slot)
    }

    /// Move a held slot to another holder without returning it.
    pub fn transfer(&mut self, slot: &BufferSlot, holder: SlotState) -> Result<()> {
        let index = slot.index;
        match self.states.get_mut(index) {
            Some(state) if *state != SlotState::Free && holder != SlotState::Free => {
                *state = holder;
                Ok(())
            }
            _ => Err(PipelineError::ForeignSlot { index }),
        }
    }

    /// Return a held slot to the back of the free queue.
    pub fn release(&mut self, mut slot: BufferSlot) -> Result<()> {
        let index = slot.index;
        let held = matches!(
            self.states.get(index),
            Some(SlotState::Producer | SlotState::Consumer)
        );
        let vacant = matches!(self.slots.get(index), Some(None));
        if !held || !vacant || slot.data.len() != self.slot_size {
            return Err(PipelineError::ForeignSlot { index });
        }

        slot.bytes_used = 0;
        if let (Some(entry), Some(state)) = (self.slots.get_mut(index), self.states.get_mut(index))
        {
            *entry = Some(slot);
            *state = SlotState::Free;
        }
        self.free.push_back(index);
        Ok(())
    }

    /// State of the slot at `index`.
    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.states.get(index).copied()
    }

    /// Per-state slot counts.
    pub fn occupancy(&self) -> PoolOccupancy {
        self.states
            .iter()
            .fold(PoolOccupancy::default(), |mut acc, state| {
                match state {
                    SlotState::Free => acc.free += 1,
                    SlotState::Producer => acc.producer += 1,
                    SlotState::Consumer => acc.consumer += 1,
                }
                acc
            })
    }
}
