use delaycam_types::Result;

use crate::buffer_error;

/// Fixed-capacity circular buffer overwritten oldest-first.
///
/// The write cursor doubles as the read cursor: once the ring is full, the
/// slot about to be overwritten is the oldest live sample, which is exactly
/// `capacity` pushes behind the write position.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<Option<T>>,
    cursor: usize,
    len: usize,
}

impl<T> FrameRing<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(buffer_error("ring capacity must be greater than zero"));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            cursor: 0,
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Stores the newest sample, overwriting the oldest once full.
    pub fn push(&mut self, item: T) {
        self.slots[self.cursor] = Some(item);
        self.advance();
    }

    /// The sample pushed exactly `capacity` pushes ago, if that many exist.
    pub fn read_delayed(&self) -> Option<&T> {
        if !self.is_full() {
            return None;
        }
        self.slots[self.cursor].as_ref()
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.slots.len();
        if self.len < self.slots.len() {
            self.len += 1;
        }
    }
}
