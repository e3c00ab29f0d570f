//! Growable byte buffer with transactional read semantics.
//!
//! [`ElasticBuffer`] is the staging area between a session's socket and its
//! read handler sequence. Three cursors track buffer state: `save` (the last
//! commit point), `read` (the next byte to deliver), and `write` (the next
//! free byte), maintaining `save <= read <= write <= capacity`.
//!
//! The commit/rollback pair gives protocol decoders transactional framing: a
//! handler may optimistically [`consume`](ElasticBuffer::consume) bytes while
//! parsing and, if the frame turns out to be incomplete, restore the `read`
//! cursor to the last known-good boundary with
//! [`rollback`](ElasticBuffer::rollback) without losing or duplicating bytes.
//!
//! Views returned by [`data`](ElasticBuffer::data) and
//! [`writable`](ElasticBuffer::writable) must not be held across any call
//! that may grow the buffer; growth can relocate the backing storage. The
//! borrow checker enforces this.

/// Default initial capacity for session buffers.
pub const DEFAULT_CAPACITY: usize = 4096;

/// A variable-sized byte buffer with read, write, commit, and rollback
/// operations.
#[derive(Debug)]
pub struct ElasticBuffer {
    buf: Vec<u8>,
    save: usize,
    read: usize,
    write: usize,
}

impl Default for ElasticBuffer {
    fn default() -> Self { Self::new() }
}

impl ElasticBuffer {
    /// Create a buffer with the default initial capacity.
    #[must_use]
    pub fn new() -> Self { Self::with_capacity(DEFAULT_CAPACITY) }

    /// Create a buffer with the given initial capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            save: 0,
            read: 0,
            write: 0,
        }
    }

    /// Current capacity of the backing storage.
    #[must_use]
    pub fn capacity(&self) -> usize { self.buf.len() }

    /// Number of bytes available to read: `write - read`.
    #[must_use]
    pub fn readable_len(&self) -> usize { self.write - self.read }

    /// Whether the readable window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.read == self.write }

    /// Zero-copy view of the readable window `[read, write)`.
    #[must_use]
    pub fn data(&self) -> &[u8] { &self.buf[self.read..self.write] }

    /// Advance the `read` cursor after inspecting [`data`](Self::data).
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`readable_len`](Self::readable_len). Consuming
    /// past the write cursor is a programming error in the calling decoder,
    /// not a recoverable condition.
    pub fn consume(&mut self, n: usize) {
        self.read += n;
        assert!(self.read <= self.write, "buffer over-consumed");
    }

    /// Guarantee at least `need` free bytes after the `write` cursor.
    ///
    /// Space is reclaimed by compaction first: the live region
    /// `[save, write)` is shifted to offset zero, discarding committed bytes.
    /// Only when compaction alone cannot satisfy the request is the backing
    /// storage reallocated, at double the capacity or whatever larger size
    /// the request demands.
    pub fn reserve(&mut self, need: usize) {
        if need > self.buf.len() - self.write {
            self.grow(need);
        }
    }

    /// Append `data`, growing as required and advancing the `write` cursor.
    pub fn write(&mut self, data: &[u8]) {
        self.reserve(data.len());
        self.buf[self.write..self.write + data.len()].copy_from_slice(data);
        self.write += data.len();
    }

    /// Mutable view of the free region `[write, capacity)`.
    ///
    /// Call [`reserve`](Self::reserve) first to size the region, then
    /// [`advance_write`](Self::advance_write) with the number of bytes
    /// actually filled in.
    pub fn writable(&mut self) -> &mut [u8] { &mut self.buf[self.write..] }

    /// Advance the `write` cursor after filling [`writable`](Self::writable).
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the free trailing space.
    pub fn advance_write(&mut self, n: usize) {
        self.write += n;
        assert!(self.write <= self.buf.len(), "buffer overflow");
    }

    /// Commit the bytes consumed since the last commit.
    ///
    /// Advances `save` to `read`; everything below the new `save` becomes
    /// eligible for reclamation on the next growth cycle.
    pub fn commit(&mut self) { self.save = self.read; }

    /// Undo all `consume` calls since the last commit, resetting `read` to
    /// `save`.
    pub fn rollback(&mut self) { self.read = self.save; }

    /// Reset all cursors, discarding every buffered byte.
    pub fn flush(&mut self) {
        self.save = 0;
        self.read = 0;
        self.write = 0;
    }

    // `need` is the full free trailing space the caller requires, not the
    // shortfall; compaction is sufficient only when the capacity minus the
    // live region `[save, write)` covers it.
    fn grow(&mut self, need: usize) {
        let live = self.write - self.save;
        if self.buf.len() - live >= need {
            self.buf.copy_within(self.save..self.write, 0);
        } else {
            let new_cap = (self.buf.len() * 2).max(live + need);
            let mut next = vec![0; new_cap];
            next[..live].copy_from_slice(&self.buf[self.save..self.write]);
            self.buf = next;
        }
        self.write -= self.save;
        self.read -= self.save;
        self.save = 0;
    }
}
