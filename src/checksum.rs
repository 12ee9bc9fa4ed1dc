//! The Chaosnet hardware checksum: a 16-bit one's-complement sum in the
//! style of RFC 1071, taken over big-endian words.
//!
//! The same routine serves both directions. Transmission appends
//! `checksum(header..trailer-without-checksum)` as the final trailer word;
//! verification recomputes over the whole packet including the stored
//! checksum, which folds to zero for an intact packet.

/// Computes the 16-bit one's-complement checksum of `data`.
///
/// A trailing odd byte contributes as a single byte-sized term, not a
/// zero-padded word.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last);
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_span() {
        assert_eq!(checksum(&[]), 0xffff);
    }

    #[test]
    fn folds_carries() {
        // 0xffff + 0x0001 wraps around through the carry fold.
        assert_eq!(checksum(&[0xff, 0xff, 0x00, 0x01]), !0x0001u16 & 0xffff);
    }

    #[test]
    fn odd_length_consumes_final_byte() {
        // 0x0102 + 0x03 = 0x0105
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), !0x0105u16);
    }

    #[test]
    fn round_trip_folds_to_zero() {
        let spans: [&[u8]; 4] = [
            &[],
            &[0x12, 0x34],
            &[0xaa, 0xaa, 0xbb, 0xbb, 0x0c, 0x22],
            &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
        ];
        for span in spans {
            let mut pkt = span.to_vec();
            pkt.extend_from_slice(&checksum(span).to_be_bytes());
            assert_eq!(checksum(&pkt), 0, "span {span:x?}");
        }
    }

    #[test]
    fn detects_corruption() {
        let span = [0x01, 0x02, 0x03, 0x04];
        let mut pkt = span.to_vec();
        pkt.extend_from_slice(&checksum(&span).to_be_bytes());
        pkt[1] ^= 0x40;
        assert_ne!(checksum(&pkt), 0);
    }
}
