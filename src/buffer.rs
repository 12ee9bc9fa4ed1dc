//! Owned byte buffers exchanged with the device process.
//!
//! Each direction has one buffer. The bytes below `offset` are transport
//! framing owned by the worker; the Chaos packet (header + data + trailer)
//! lives above it. The cursor only moves forward, except on an explicit
//! reset: `cursor - offset` is always the number of packet bytes staged.

/// A fixed-capacity packet buffer with a transport-framing prefix.
#[derive(Debug)]
pub struct PacketBuffer {
    bytes: Box<[u8]>,
    offset: usize,
    cursor: usize,
}

impl PacketBuffer {
    /// Allocates a buffer with `capacity` bytes of packet space above a
    /// `offset`-byte framing prefix.
    pub fn new(capacity: usize, offset: usize) -> PacketBuffer {
        PacketBuffer {
            bytes: vec![0u8; offset + capacity].into_boxed_slice(),
            offset,
            cursor: offset,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of packet bytes currently staged.
    pub fn staged(&self) -> usize {
        self.cursor - self.offset
    }

    /// Rewinds the cursor to the start of the packet area.
    pub fn reset(&mut self) {
        self.cursor = self.offset;
    }

    /// Appends a big-endian word at the cursor. Fails without moving the
    /// cursor if the buffer is full.
    pub fn push_word(&mut self, val: u16) -> Result<(), BufferFull> {
        if self.cursor + 2 > self.bytes.len() {
            return Err(BufferFull);
        }
        self.bytes[self.cursor] = (val >> 8) as u8;
        self.bytes[self.cursor + 1] = (val & 0xff) as u8;
        self.cursor += 2;
        Ok(())
    }

    /// Pops the next big-endian word and advances the cursor. Reads past
    /// the end of the buffer return zero without moving the cursor.
    pub fn pop_word(&mut self) -> u16 {
        if self.cursor + 2 > self.bytes.len() {
            return 0;
        }
        let val = u16::from_be_bytes([self.bytes[self.cursor], self.bytes[self.cursor + 1]]);
        self.cursor += 2;
        val
    }

    /// The staged packet bytes, without the framing prefix.
    pub fn packet(&self) -> &[u8] {
        &self.bytes[self.offset..self.cursor]
    }

    /// The staged bytes including the framing prefix, as handed to the
    /// worker.
    pub fn framed(&self) -> &[u8] {
        &self.bytes[..self.cursor]
    }

    /// Rewinds the buffer and exposes a `len`-byte window at the packet
    /// start for an inbound packet to be copied into. `None` if the packet
    /// cannot fit.
    pub fn inbound_window(&mut self, len: usize) -> Option<&mut [u8]> {
        // One extra byte so an odd-length packet can be padded out to a
        // full word before the host drains it.
        if self.offset + len + 1 > self.bytes.len() {
            return None;
        }
        self.cursor = self.offset;
        Some(&mut self.bytes[self.offset..self.offset + len + 1])
    }

    /// The first `len` packet bytes, independent of the cursor.
    pub fn packet_prefix(&self, len: usize) -> &[u8] {
        &self.bytes[self.offset..self.offset + len]
    }
}

/// Returned when an append would run past the end of the buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferFull;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_tracks_staged_bytes() {
        let mut buf = PacketBuffer::new(16, 4);
        assert_eq!(buf.staged(), 0);
        buf.push_word(0xaabb).unwrap();
        buf.push_word(0xccdd).unwrap();
        assert_eq!(buf.staged(), 4);
        assert_eq!(buf.packet(), &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(buf.framed().len(), 8);
        buf.reset();
        assert_eq!(buf.staged(), 0);
    }

    #[test]
    fn push_past_capacity_fails_cleanly() {
        let mut buf = PacketBuffer::new(2, 0);
        buf.push_word(0x0102).unwrap();
        assert_eq!(buf.push_word(0x0304), Err(BufferFull));
        assert_eq!(buf.staged(), 2);
    }

    #[test]
    fn inbound_window_then_drain() {
        let mut buf = PacketBuffer::new(32, 4);
        let window = buf.inbound_window(4).unwrap();
        window[..4].copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buf.pop_word(), 0x0102);
        assert_eq!(buf.pop_word(), 0x0304);
        assert_eq!(buf.staged(), 4);
    }

    #[test]
    fn inbound_window_rejects_oversize() {
        let mut buf = PacketBuffer::new(8, 0);
        assert!(buf.inbound_window(16).is_none());
    }
}
