//! The CH11's single command/status register and its bus address decode.
//!
//! The register layout follows AIM 628 chapter 7 as corrected by the ITS
//! sources: bit 0 is "transmit busy" (not "timer interrupt enable"), and
//! several bits documented as read/write are in fact write-actions.

use arbitrary_int::u4;
use bitfield::bitfield;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::macros::{action_bit, impl_to_from_u16};

/// Number of bytes of bus address space the device decodes.
pub const REGISTER_SPAN: u32 = 0o20;

/// Bus-addressable register slots, as byte offsets from the configured base
/// address. Offsets 0o10, 0o14 and 0o16 do not decode to anything.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum BusAddress {
    /// Command/status register (read/write).
    Csr = 0o0,
    /// Reads return the interface's own Chaos address; writes append a word
    /// to the outgoing packet buffer.
    MyAddress = 0o2,
    /// Pops the next word of a received packet (read only).
    ReadBuffer = 0o4,
    /// Receive bit counter (read only).
    BitCount = 0o6,
    /// Reading this slot initiates transmission (read only).
    Transmit = 0o12,
}

bitfield! {
    /// The 16-bit command/status register.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct ControlStatus(u16);
    impl Debug;
    pub busy, set_busy: 0;
    pub loopback, set_loopback: 1;
    pub spy, set_spy: 2;
    _rcl, _set_rcl: 3;
    pub rx_enable, set_rx_enable: 4;
    pub tx_enable, set_tx_enable: 5;
    pub tx_abort, set_tx_abort: 6;
    pub tx_done, set_tx_done: 7;
    _tcl, _set_tcl: 8;
    u8, _lost, _set_lost: 12, 9;
    _rst, _set_rst: 13;
    pub crc_error, set_crc_error: 14;
    pub rx_done, set_rx_done: 15;
}

impl ControlStatus {
    /// Transmit busy (read only from the bus).
    pub const BSY: u16 = 0o1;
    /// Loopback request.
    pub const LUP: u16 = 0o2;
    /// Spy (promiscuous) request.
    pub const SPY: u16 = 0o4;
    /// Receiver clear (write action).
    pub const RCL: u16 = 0o10;
    /// Receive interrupt enable.
    pub const REN: u16 = 0o20;
    /// Transmit interrupt enable.
    pub const TEN: u16 = 0o40;
    /// Transmit aborted (read only).
    pub const TAB: u16 = 0o100;
    /// Transmit done.
    pub const TDN: u16 = 0o200;
    /// Transmitter clear (write action).
    pub const TCL: u16 = 0o400;
    /// Lost count field (read only).
    pub const LOS: u16 = 0o17000;
    /// I/O reset (write action).
    pub const RST: u16 = 0o20000;
    /// CRC error (read only).
    pub const ERR: u16 = 0o40000;
    /// Receive done.
    pub const RDN: u16 = 0o100000;

    /// Bits the bus side may never write. Attempting to is a programming
    /// violation by the host, not a user error.
    pub const READ_ONLY: u16 = Self::BSY | Self::TAB | Self::LOS | Self::ERR;

    action_bit!(rcl, clear_rcl);
    action_bit!(tcl, clear_tcl);
    action_bit!(rst, clear_rst);

    /// The lost-message counter as seen through the CSR's 4-bit field.
    pub fn lost_count(&self) -> u4 {
        u4::new(self._lost())
    }

    pub fn set_lost_count(&mut self, count: u4) {
        self._set_lost(count.value());
    }

    /// Composes the register value returned by a bus read: the live bits
    /// with the current lost counter inserted into the LOS field.
    pub fn composed_with_lost(&self, lost: u16) -> u16 {
        let mut reg = *self;
        reg.set_lost_count(u4::new((lost & 0o17) as u8));
        reg.0
    }
}

impl_to_from_u16!(ControlStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_masks() {
        let mut reg = ControlStatus(0);
        reg.set_busy(true);
        assert_eq!(reg.0, ControlStatus::BSY);

        let mut reg = ControlStatus(0);
        reg.set_rx_enable(true);
        reg.set_tx_enable(true);
        assert_eq!(reg.0, ControlStatus::REN | ControlStatus::TEN);

        let mut reg = ControlStatus(0);
        reg.set_rx_done(true);
        assert_eq!(reg.0, ControlStatus::RDN);

        assert!(ControlStatus(ControlStatus::RST).rst());
        assert!(ControlStatus(ControlStatus::RCL).rcl());
        assert!(ControlStatus(ControlStatus::TCL).tcl());
    }

    #[test]
    fn action_bits_are_consumed() {
        let mut req = ControlStatus(ControlStatus::RCL | ControlStatus::REN);
        assert!(req.rcl());
        req.clear_rcl();
        assert!(!req.rcl());
        assert!(req.rx_enable());
        assert_eq!(req.0, ControlStatus::REN);
    }

    #[test]
    fn lost_count_composes_into_los_field() {
        let reg = ControlStatus(ControlStatus::RDN);
        // Counter wider than the field is masked, not saturated.
        assert_eq!(
            reg.composed_with_lost(0o23),
            ControlStatus::RDN | (0o3 << 9)
        );
        assert_eq!(reg.composed_with_lost(0o17), ControlStatus::RDN | ControlStatus::LOS);
    }

    #[test]
    fn bus_address_decode() {
        assert_eq!(BusAddress::try_from(0o0), Ok(BusAddress::Csr));
        assert_eq!(BusAddress::try_from(0o12), Ok(BusAddress::Transmit));
        assert!(BusAddress::try_from(0o10).is_err());
        assert!(BusAddress::try_from(0o16).is_err());
    }
}
