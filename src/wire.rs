//! Chaosnet packet wire layout as seen by the interface hardware.
//!
//! A packet is a 16-byte header of big-endian words, up to 488 data bytes,
//! and a 6-byte hardware trailer (destination, source, checksum) appended
//! below the protocol layer. The checksum covers the entire span.

use num_enum::TryFromPrimitive;

/// Size of the protocol header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Size of the hardware trailer in bytes.
pub const TRAILER_SIZE: usize = 6;

/// Maximum number of data bytes in a packet.
pub const MAX_DATA_SIZE: usize = 488;

/// Largest complete packet the interface will stage.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_DATA_SIZE + TRAILER_SIZE;

/// Chaosnet packet opcodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Rfc = 0o1,
    Opn = 0o2,
    Cls = 0o3,
    Fwd = 0o4,
    Ans = 0o5,
    Sns = 0o6,
    Sts = 0o7,
    Rut = 0o10,
    Los = 0o11,
    Lsn = 0o12,
    Mnt = 0o13,
    Eof = 0o14,
    Unc = 0o15,
    Brd = 0o16,
    Dat = 0o200,
    Dwd = 0o300,
}

/// Mnemonic for an opcode byte, for packet dumps.
pub fn opcode_mnemonic(op: u8) -> &'static str {
    match Opcode::try_from(op) {
        Ok(Opcode::Rfc) => "RFC",
        Ok(Opcode::Opn) => "OPN",
        Ok(Opcode::Cls) => "CLS",
        Ok(Opcode::Fwd) => "FWD",
        Ok(Opcode::Ans) => "ANS",
        Ok(Opcode::Sns) => "SNS",
        Ok(Opcode::Sts) => "STS",
        Ok(Opcode::Rut) => "RUT",
        Ok(Opcode::Los) => "LOS",
        Ok(Opcode::Lsn) => "LSN",
        Ok(Opcode::Mnt) => "MNT",
        Ok(Opcode::Eof) => "EOF",
        Ok(Opcode::Unc) => "UNC",
        Ok(Opcode::Brd) => "BRD",
        Ok(Opcode::Dat) => "DAT",
        Ok(Opcode::Dwd) => "DWD",
        Err(_) => "bogus",
    }
}

/// A borrowed view of one complete packet span (header + data + trailer).
pub struct Packet<'a>(&'a [u8]);

impl<'a> Packet<'a> {
    /// Wraps `span` if it is at least large enough to hold a full header.
    /// The trailer accessors read the final six bytes, which overlap the
    /// header on runt spans, matching what the hardware would latch.
    pub fn new(span: &'a [u8]) -> Option<Packet<'a>> {
        (span.len() >= HEADER_SIZE).then_some(Packet(span))
    }

    fn word(&self, at: usize) -> u16 {
        u16::from_be_bytes([self.0[at], self.0[at + 1]])
    }

    pub fn opcode(&self) -> u8 {
        self.0[0]
    }

    /// Forwarding count, in the high nibble of byte 2.
    pub fn forward_count(&self) -> u8 {
        self.0[2] >> 4
    }

    /// The 12-bit data byte count from the header.
    pub fn data_len(&self) -> usize {
        ((usize::from(self.0[2]) & 0xf) << 8) | usize::from(self.0[3])
    }

    pub fn dest_addr(&self) -> u16 {
        self.word(4)
    }

    pub fn dest_index(&self) -> u16 {
        self.word(6)
    }

    pub fn src_addr(&self) -> u16 {
        self.word(8)
    }

    pub fn src_index(&self) -> u16 {
        self.word(10)
    }

    pub fn packet_number(&self) -> u16 {
        self.word(12)
    }

    pub fn ack_number(&self) -> u16 {
        self.word(14)
    }

    pub fn trailer_dest(&self) -> u16 {
        self.word(self.0.len() - 6)
    }

    pub fn trailer_src(&self) -> u16 {
        self.word(self.0.len() - 4)
    }

    pub fn trailer_checksum(&self) -> u16 {
        self.word(self.0.len() - 2)
    }

    /// The span length implied by the header, for cross-checking against
    /// the byte count actually received.
    pub fn expected_len(&self) -> usize {
        HEADER_SIZE + self.data_len() + TRAILER_SIZE
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    /// Logs a decode of the packet at trace level, in the style of the
    /// front-panel packet dumps.
    pub fn dump(&self, direction: &str) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        let bytes = self.as_bytes();
        log::trace!("{} pkt dump, len {}", direction, bytes.len());
        log::trace!(
            "opcode {:#o} ({}), fc {}, nbytes {}",
            self.opcode(),
            opcode_mnemonic(self.opcode()),
            self.forward_count(),
            self.data_len()
        );
        log::trace!(
            "dest {:#o} idx {:#o}, source {:#o} idx {:#o}, pkt #{:o}, ack #{:o}",
            self.dest_addr(),
            self.dest_index(),
            self.src_addr(),
            self.src_index(),
            self.packet_number(),
            self.ack_number()
        );
        let end = bytes.len().saturating_sub(TRAILER_SIZE).max(HEADER_SIZE);
        let data = &bytes[HEADER_SIZE.min(end)..end];
        for row in data.chunks(16) {
            let mut line = String::new();
            for byte in row {
                line.push_str(&format!(" {byte:02x}"));
            }
            log::trace!(" {line}");
        }
        log::trace!(
            "trailer: dest {:#o}, source {:#o}, checksum {:#x}",
            self.trailer_dest(),
            self.trailer_src(),
            self.trailer_checksum()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut pkt = vec![0u8; HEADER_SIZE + 4 + TRAILER_SIZE];
        pkt[0] = 0o200; // DAT
        pkt[2] = 0x10; // fc 1, length 0x004
        pkt[3] = 0x04;
        pkt[4] = 0x12; // dest 0o011064
        pkt[5] = 0x34;
        pkt[8] = 0x56; // source
        pkt[9] = 0x78;
        let len = pkt.len();
        pkt[len - 6] = 0x12; // trailer dest
        pkt[len - 5] = 0x34;
        pkt[len - 2] = 0xbe; // stored checksum
        pkt[len - 1] = 0xef;
        pkt
    }

    #[test]
    fn header_fields() {
        let bytes = sample();
        let pkt = Packet::new(&bytes).unwrap();
        assert_eq!(pkt.opcode(), 0o200);
        assert_eq!(opcode_mnemonic(pkt.opcode()), "DAT");
        assert_eq!(pkt.forward_count(), 1);
        assert_eq!(pkt.data_len(), 4);
        assert_eq!(pkt.dest_addr(), 0x1234);
        assert_eq!(pkt.src_addr(), 0x5678);
        assert_eq!(pkt.expected_len(), bytes.len());
    }

    #[test]
    fn trailer_fields() {
        let bytes = sample();
        let pkt = Packet::new(&bytes).unwrap();
        assert_eq!(pkt.trailer_dest(), 0x1234);
        assert_eq!(pkt.trailer_src(), 0);
        assert_eq!(pkt.trailer_checksum(), 0xbeef);
    }

    #[test]
    fn rejects_runt_span() {
        let runt = [0u8; HEADER_SIZE - 1];
        assert!(Packet::new(&runt).is_none());
        assert!(Packet::new(&[0u8; HEADER_SIZE]).is_some());
    }

    #[test]
    fn unknown_opcode_is_bogus() {
        assert_eq!(opcode_mnemonic(0o177), "bogus");
    }
}
