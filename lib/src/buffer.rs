//! Fixed capacity byte buffer
//!
//! Bytes are appended at `end` with [`Buffer::fill`] after being written in
//! [`Buffer::space`], and removed from `position` with [`Buffer::consume`]
//! after being read from [`Buffer::used`]. The memory is allocated once and
//! never grows: a full buffer is the backpressure signal of the relay.
use std::{cmp, fmt, io};

pub struct Buffer {
    memory: Vec<u8>,
    position: usize,
    end: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            memory: vec![0; capacity],
            position: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// number of bytes that can be consumed
    pub fn available_data(&self) -> usize {
        self.end - self.position
    }

    /// number of bytes that can still be written, counting the ones
    /// freed at the start of the buffer
    pub fn available_space(&self) -> usize {
        self.capacity() - self.available_data()
    }

    pub fn is_empty(&self) -> bool {
        self.position == self.end
    }

    pub fn is_full(&self) -> bool {
        self.available_data() == self.capacity()
    }

    /// the bytes waiting to be consumed
    pub fn used(&self) -> &[u8] {
        &self.memory[self.position..self.end]
    }

    /// the free part of the buffer, call [`Buffer::fill`] with the number of
    /// bytes written in it
    pub fn space(&mut self) -> &mut [u8] {
        self.shift();
        let capacity = self.capacity();
        &mut self.memory[self.end..capacity]
    }

    /// mark `count` bytes of the space as data, returns how many were accepted
    pub fn fill(&mut self, count: usize) -> usize {
        let count = cmp::min(count, self.capacity() - self.end);
        self.end += count;
        count
    }

    /// drop `count` bytes of data, returns how many were dropped
    pub fn consume(&mut self, count: usize) -> usize {
        let count = cmp::min(count, self.available_data());
        self.position += count;
        if self.position == self.end {
            self.position = 0;
            self.end = 0;
        }
        count
    }

    /// copy as much of `data` as fits, returns the number of bytes copied
    pub fn extend_from_slice(&mut self, data: &[u8]) -> usize {
        let space = self.space();
        let count = cmp::min(space.len(), data.len());
        space[..count].copy_from_slice(&data[..count]);
        self.fill(count)
    }

    pub fn clear(&mut self) {
        self.position = 0;
        self.end = 0;
    }

    /// move the data to the start of the memory
    fn shift(&mut self) {
        if self.position > 0 {
            let length = self.available_data();
            self.memory.copy_within(self.position..self.end, 0);
            self.position = 0;
            self.end = length;
        }
    }
}

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.extend_from_slice(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for Buffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = cmp::min(self.available_data(), buf.len());
        buf[..count].copy_from_slice(&self.used()[..count]);
        Ok(self.consume(count))
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("position", &self.position)
            .field("end", &self.end)
            .finish()
    }
}
