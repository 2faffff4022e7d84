use alloc::vec::Vec;
use core::fmt;

/// An owned network buffer.
///
/// The buffer is a single contiguous allocation with a movable payload window, so headers can
/// be stripped or prepended without copying the payload.
/// ```text
/// |<-- headroom -->|<-- payload (head..tail) -->|<-- tailroom -->|
/// 0              head                         tail         capacity
/// ```
/// A [NetBuffer] is move-only. Handing it to another component transfers ownership, and the
/// allocation is released when the last owner drops it.
pub struct NetBuffer {
    storage: Vec<u8>,
    head: usize,
    tail: usize,
}
impl NetBuffer {
    /// Try to allocate a zeroed buffer with the specified capacity.
    ///
    /// Returns [None], if the allocation fails, instead of aborting.
    pub fn try_with_capacity(capacity: usize) -> Option<Self> {
        let mut storage = Vec::new();
        storage.try_reserve_exact(capacity).ok()?;
        storage.resize(capacity, 0);
        Some(Self {
            storage,
            head: 0,
            tail: 0,
        })
    }
    /// Try to allocate a buffer, which contains a copy of `data`.
    pub fn try_from_slice(data: &[u8]) -> Option<Self> {
        let mut buffer = Self::try_with_capacity(data.len())?;
        buffer.storage.copy_from_slice(data);
        buffer.tail = data.len();
        Some(buffer)
    }
    /// The size of the underlying allocation.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }
    /// The length of the payload window.
    pub fn len(&self) -> usize {
        self.tail - self.head
    }
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }
    /// The offset of the payload window from the start of the allocation.
    pub fn headroom(&self) -> usize {
        self.head
    }
    pub fn payload(&self) -> &[u8] {
        &self.storage[self.head..self.tail]
    }
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.head..self.tail]
    }
    /// Overwrite the buffer with `data`, starting at offset zero.
    ///
    /// This is how a DMA producer fills a buffer. Returns `false` if `data` doesn't fit.
    pub fn fill(&mut self, data: &[u8]) -> bool {
        let Some(dst) = self.storage.get_mut(..data.len()) else {
            return false;
        };
        dst.copy_from_slice(data);
        self.head = 0;
        self.tail = data.len();
        true
    }
    /// Append `data` to the end of the payload.
    ///
    /// Returns `false` if the tailroom is too small, in which case the buffer is left unchanged.
    pub fn append(&mut self, data: &[u8]) -> bool {
        let Some(dst) = self.storage.get_mut(self.tail..self.tail + data.len()) else {
            return false;
        };
        dst.copy_from_slice(data);
        self.tail += data.len();
        true
    }
    /// Move the start of the payload forward by `len` bytes, hiding a header.
    pub fn advance(&mut self, len: usize) -> bool {
        if len > self.len() {
            return false;
        }
        self.head += len;
        true
    }
    /// Move the start of the payload back by `len` bytes, exposing headroom.
    pub fn retreat(&mut self, len: usize) -> bool {
        if len > self.head {
            return false;
        }
        self.head -= len;
        true
    }
    /// Shorten the payload to `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.tail = self.head + len;
        }
    }
    /// Cut `len` bytes out of the payload at offset `at`.
    ///
    /// The `at` bytes in front of the removed region are moved forward, so the cost is
    /// proportional to `at` and not to the payload length.
    pub fn remove(&mut self, at: usize, len: usize) -> bool {
        if at + len > self.len() {
            return false;
        }
        self.storage
            .copy_within(self.head..self.head + at, self.head + len);
        self.head += len;
        true
    }
}
impl fmt::Debug for NetBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBuffer")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish()
    }
}

/// A source of fresh [NetBuffers](NetBuffer).
///
/// Allocation may fail, in which case callers are expected to drop work and try again later.
pub trait BufferAllocator {
    fn allocate(&self, capacity: usize) -> Option<NetBuffer>;
}
/// Allocates buffers from the global heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapAllocator;
impl BufferAllocator for HeapAllocator {
    fn allocate(&self, capacity: usize) -> Option<NetBuffer> {
        NetBuffer::try_with_capacity(capacity)
    }
}
impl<A: BufferAllocator + ?Sized> BufferAllocator for &A {
    fn allocate(&self, capacity: usize) -> Option<NetBuffer> {
        (**self).allocate(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::NetBuffer;

    #[test]
    fn header_strip_and_restore() {
        let mut buffer = NetBuffer::try_from_slice(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert!(buffer.advance(2));
        assert_eq!(buffer.payload(), &[3, 4, 5, 6]);
        assert_eq!(buffer.headroom(), 2);
        assert!(!buffer.advance(5));
        assert!(buffer.retreat(1));
        assert_eq!(buffer.payload(), &[2, 3, 4, 5, 6]);
        assert!(!buffer.retreat(2));
    }

    #[test]
    fn fill_respects_capacity() {
        let mut buffer = NetBuffer::try_with_capacity(4).unwrap();
        assert!(buffer.is_empty());
        assert!(!buffer.fill(&[0; 5]));
        assert!(buffer.fill(&[9, 8, 7]));
        assert_eq!(buffer.payload(), &[9, 8, 7]);
        buffer.truncate(1);
        assert_eq!(buffer.payload(), &[9]);
        assert!(buffer.append(&[1, 2]));
        assert!(!buffer.append(&[3, 4]));
        assert_eq!(buffer.payload(), &[9, 1, 2]);
    }

    #[test]
    fn remove_keeps_leading_bytes() {
        let mut buffer = NetBuffer::try_from_slice(&[0xa, 0xb, 0, 0, 0, 0xc, 0xd]).unwrap();
        assert!(buffer.remove(2, 3));
        assert_eq!(buffer.payload(), &[0xa, 0xb, 0xc, 0xd]);
        assert!(!buffer.remove(3, 2));
    }
}
