//! Bounded per-session scrollback. A session's Ring History never grows
//! past its configured capacity; the oldest bytes are evicted as a single
//! contiguous prefix, never torn mid-append.

/// A fixed-capacity circular byte buffer.
///
/// The backing store is sized to the next power of two above the logical
/// capacity so wrap-around indexing can use a bitmask instead of a modulo;
/// the logical capacity itself (the `H` of the append/evict algorithm) is
/// tracked separately and is not necessarily a power of two.
pub struct Ring {
    cap: usize,
    buf: Vec<u8>,
    mask: usize,
    head: usize,
    size: usize,
    total_written: u64,
}

impl Ring {
    pub fn new(cap: usize) -> Self {
        let buf_len = cap.max(1).next_power_of_two();
        Ring { cap, buf: vec![0u8; buf_len], mask: buf_len - 1, head: 0, size: 0, total_written: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.total_written
    }

    /// Append `bytes`, evicting the oldest prefix as needed to keep
    /// `len() <= capacity()`. A zero-length append is a no-op.
    pub fn append(&mut self, bytes: &[u8]) {
        let n = bytes.len();
        if n == 0 {
            return;
        }
        self.total_written += n as u64;

        if n >= self.cap {
            let tail = &bytes[n - self.cap..];
            self.write_wrapped(0, tail);
            self.head = 0;
            self.size = self.cap;
            return;
        }

        let write_pos = (self.head + self.size) & self.mask;
        if self.size + n <= self.cap {
            self.write_wrapped(write_pos, bytes);
            self.size += n;
        } else {
            self.write_wrapped(write_pos, bytes);
            let advance = self.size + n - self.cap;
            self.head = (self.head + advance) & self.mask;
            self.size = self.cap;
        }
    }

    /// Write `bytes` into the backing buffer starting at `pos`, wrapping at
    /// most once. `bytes.len()` must be `<= buf.len()`.
    fn write_wrapped(&mut self, pos: usize, bytes: &[u8]) {
        let buf_len = self.buf.len();
        let first = buf_len - pos;
        if bytes.len() <= first {
            self.buf[pos..pos + bytes.len()].copy_from_slice(bytes);
        } else {
            self.buf[pos..buf_len].copy_from_slice(&bytes[..first]);
            self.buf[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        }
    }

    /// A copy of the current contents, oldest byte first.
    pub fn snapshot(&self) -> Vec<u8> {
        if self.size == 0 {
            return Vec::new();
        }
        let buf_len = self.buf.len();
        let mut out = Vec::with_capacity(self.size);
        let first = (buf_len - self.head).min(self.size);
        out.extend_from_slice(&self.buf[self.head..self.head + first]);
        if first < self.size {
            out.extend_from_slice(&self.buf[..self.size - first]);
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_ring_snapshot_is_empty() {
        let ring = Ring::new(16);
        assert!(ring.snapshot().is_empty());
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn zero_length_append_is_noop() {
        let mut ring = Ring::new(16);
        ring.append(b"abc");
        ring.append(b"");
        assert_eq!(ring.snapshot(), b"abc");
        assert_eq!(ring.total_bytes_written(), 3);
    }

    #[test]
    fn append_under_capacity_keeps_everything() {
        let mut ring = Ring::new(16);
        ring.append(b"hello");
        assert_eq!(ring.snapshot(), b"hello");
        assert_eq!(ring.len(), 5);
    }

    #[test]
    fn append_past_capacity_evicts_oldest_prefix() {
        let mut ring = Ring::new(16);
        let data = b"abcdefghijklmnopqrstuvwxyz0123456789ABCD";
        ring.append(data);
        assert_eq!(ring.len(), 16);
        assert!(ring.len() <= ring.capacity());
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 16);
        assert_eq!(snap, data[data.len() - 16..]);
    }

    #[test]
    fn single_write_larger_than_capacity_keeps_last_h_bytes() {
        let mut ring = Ring::new(4);
        ring.append(b"0123456789");
        assert_eq!(ring.snapshot(), b"6789");
    }

    #[test]
    fn incremental_appends_match_one_big_append() {
        let mut a = Ring::new(8);
        let mut b = Ring::new(8);
        let data = b"the quick brown fox jumps";
        a.append(data);
        for byte in data {
            b.append(&[*byte]);
        }
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn snapshot_is_always_a_suffix_of_everything_written() {
        let mut ring = Ring::new(10);
        let mut all = Vec::new();
        for chunk in [&b"aa"[..], &b"bbbb"[..], &b"cccccccc"[..], &b"d"[..]] {
            ring.append(chunk);
            all.extend_from_slice(chunk);
        }
        let snap = ring.snapshot();
        assert!(all.ends_with(&snap));
        assert!(snap.len() <= ring.capacity());
    }
}
