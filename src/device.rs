//! The CH11 register and interrupt state machine.
//!
//! The host processor talks to the interface through five register slots;
//! real network I/O is delegated to a device process behind the
//! [`DevProcess`] seam. The transmit side stages outgoing words, appends
//! the source address and checksum on the transmit-trigger read, and hands
//! the finished packet off. The receive side stages one packet at a time
//! and lets the host drain it a word per read.

use crate::buffer::PacketBuffer;
use crate::checksum::checksum;
use crate::csr::{BusAddress, ControlStatus, REGISTER_SPAN};
use crate::dp::{transport_offset, ArpEntry, DevProcess, DpCommand, DpFrame, ARP_MAX_AGE_SECS};
use crate::interrupt::{InterruptState, IrqLine};
use crate::settings::{ConfigError, Settings, TransportMethod};
use crate::wire::{Packet, MAX_PACKET_SIZE};

use std::fmt::Write;

// Room for the largest packet plus the word-alignment pad byte.
const BUFFER_CAPACITY: usize = MAX_PACKET_SIZE + 2;

/// Fatal programming violations by the hosting processor. The bus
/// framework treats these as emulator bugs, not recoverable I/O errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Access to a bus offset that does not decode to a register.
    UnknownRegister(u32),
    /// Write to a register slot that is read only.
    ReadOnlyRegister(BusAddress),
    /// CSR write that tries to set read-only status bits.
    ReadOnlyBits(u16),
    /// The staged outbound packet ran past the end of the buffer.
    TransmitOverflow,
}

/// What the bus framework needs from a plugged-in device.
pub trait UnibusDevice {
    /// Reads the 16-bit register at `offset` from the device's base
    /// address.
    fn read(&mut self, offset: u32) -> Result<u16, Error>;

    /// Writes the 16-bit register at `offset`.
    fn write(&mut self, offset: u32, value: u16) -> Result<(), Error>;

    /// Bus initialization / power-on reset.
    fn reset(&mut self);

    /// Permanent shutdown; the device will not be accessed again.
    fn power_off(&mut self);

    /// Acknowledges the interrupt and returns the vector to take.
    fn acknowledge_interrupt(&mut self) -> u16;

    /// Front-panel diagnostic command; returns the text to display.
    fn command(&mut self, cmd: &str) -> String;
}

/// One emulated CH11 interface.
pub struct Ch11<D: DevProcess, L: IrqLine> {
    settings: Settings,
    my_addr: u16,
    csr: ControlStatus,
    /// Packets dropped because the receiver was busy. Only the low four
    /// bits are visible through the CSR.
    lost: u16,
    ints: InterruptState,
    line: L,
    dp: D,
    dp_ready: bool,
    /// Receiver armed for the next packet.
    rx_active: bool,
    /// Transmitter free to hand off another packet.
    tx_active: bool,
    obuf: PacketBuffer,
    ibuf: PacketBuffer,
    /// Byte count of the packet staged for draining, if any.
    rcnt: Option<usize>,
}

impl<D: DevProcess, L: IrqLine> Ch11<D, L> {
    pub fn new(settings: Settings, dp: D, line: L) -> Result<Ch11<D, L>, ConfigError> {
        settings.validate()?;
        let offset = transport_offset(settings.transport);
        let my_addr = settings.chaos_address.value();
        let mut ch = Ch11 {
            settings,
            my_addr,
            csr: ControlStatus::from(0),
            lost: 0,
            ints: InterruptState::default(),
            line,
            dp,
            dp_ready: false,
            rx_active: true,
            tx_active: true,
            obuf: PacketBuffer::new(BUFFER_CAPACITY, offset),
            ibuf: PacketBuffer::new(BUFFER_CAPACITY, offset),
            rcnt: None,
        };
        ch.clear();
        Ok(ch)
    }

    /// Number of bytes of bus address space this device decodes.
    pub fn register_span(&self) -> u32 {
        REGISTER_SPAN
    }

    /// The device process handle, for host-level control.
    pub fn device_process_mut(&mut self) -> &mut D {
        &mut self.dp
    }

    fn debug(&self) -> u32 {
        self.settings.debug
    }

    /// Starts the device process if it is not running. Any register access
    /// triggers this, so the worker comes up with the first OS probe.
    fn ensure_started(&mut self) {
        if self.dp.running() {
            return;
        }
        if self.debug() > 0 {
            log::debug!("[ch11: starting device process]");
        }
        match self.dp.start() {
            Ok(()) => {
                self.csr.set_rx_enable(true);
                self.input_interrupt();
            }
            Err(err) => {
                log::debug!("[ch11: device process start failed: {err}]");
            }
        }
    }

    fn input_interrupt(&mut self) {
        self.ints.raise_input(
            self.csr.rx_enable(),
            &mut self.line,
            self.settings.bus_priority,
        );
    }

    fn output_interrupt(&mut self) {
        self.ints.raise_output(
            self.csr.tx_enable(),
            &mut self.line,
            self.settings.bus_priority,
        );
    }

    /// Receiver clear: re-arm for the next packet. Re-enabling the
    /// receiver also resets the lost count.
    fn iclear(&mut self) {
        self.ints.input_off(&mut self.line);
        self.ibuf.reset();
        self.rcnt = None;
        self.lost = 0;
        self.rx_active = true;
        self.csr.set_crc_error(false);
        self.csr.set_rx_done(false);
    }

    /// Transmitter clear: drop any staged output and mark the transmitter
    /// ready again.
    fn oclear(&mut self) {
        self.ints.output_off(&mut self.line);
        self.obuf.reset();
        self.csr.set_tx_abort(false);
        if self.tx_active {
            self.csr.set_tx_done(true);
        }
    }

    /// Full device clear: stop the worker (a later access restarts it) and
    /// reset both sides.
    fn clear(&mut self) {
        self.dp.stop();
        self.dp_ready = false;
        self.tx_active = true;
        self.iclear();
        self.oclear();
    }

    /// Checks the worker's posted message. Init and stray messages are
    /// consumed here; returns true when a received packet is waiting.
    fn incheck(&mut self) -> bool {
        let cmd = match self.dp.posted() {
            Some(frame) => frame.cmd,
            None => return false,
        };
        match cmd {
            DpCommand::Init => {
                self.dp_ready = true;
                self.dp.ack();
                false
            }
            DpCommand::RecvPacket => true,
            DpCommand::SendPacket => {
                if self.debug() > 0 {
                    log::debug!("[ch11: stray message flushed]");
                }
                self.dp.ack();
                false
            }
        }
    }

    /// Copies the worker's posted packet into the receive buffer, applies
    /// the destination filter and checksum, and raises receive-done.
    fn stage_inbound(&mut self) {
        let data = match self.dp.posted() {
            Some(frame) => frame.data.clone(),
            None => return,
        };
        let cnt = data.len();
        if self.debug() > 0 {
            log::debug!("[ch11: in {cnt}]");
        }

        let window = match self.ibuf.inbound_window(cnt) {
            Some(window) => window,
            None => {
                self.lost = self.lost.wrapping_add(1);
                self.dp.ack();
                return;
            }
        };
        window[..cnt].copy_from_slice(&data);
        if cnt & 1 == 1 {
            // Pad so the host can drain the packet in whole words.
            window[cnt] = 0;
        }

        let pkt = match Packet::new(self.ibuf.packet_prefix(cnt)) {
            Some(pkt) => pkt,
            None => {
                if self.settings.debug > 0 {
                    log::debug!("[ch11: runt of {cnt} bytes flushed]");
                }
                self.dp.ack();
                return;
            }
        };
        pkt.dump("PKTIN");
        if self.settings.debug > 0 && pkt.expected_len() != cnt {
            log::debug!(
                "[ch11: expected len {}, got {}]",
                pkt.expected_len(),
                cnt
            );
        }

        let trailer_dest = pkt.trailer_dest();
        let header_dest = pkt.dest_addr();
        let stored = pkt.trailer_checksum();
        if trailer_dest != 0
            && trailer_dest != self.my_addr
            && header_dest != 0
            && header_dest != self.my_addr
            && !self.csr.spy()
        {
            if self.settings.debug > 0 {
                log::debug!(
                    "[ch11: not for my address: trailer dest {trailer_dest:#o}, header dest {header_dest:#o}]"
                );
            }
            self.dp.ack();
            return;
        }

        if stored != 0 {
            let folded = checksum(self.ibuf.packet_prefix(cnt));
            if folded != 0 {
                if self.settings.debug > 0 {
                    log::debug!("[ch11: bad checksum {folded:#x}]");
                }
                self.csr.set_crc_error(true);
            }
        }

        self.rcnt = Some(cnt);
        self.csr.set_rx_done(true);
        self.rx_active = false;
        self.input_interrupt();
    }

    /// Arms the receive side and services any packet already waiting.
    fn igo(&mut self) {
        self.rx_active = true;
        if self.incheck() {
            self.stage_inbound();
        }
    }

    /// Hands the staged outbound packet to the worker. Fails without
    /// side effects when the worker's slot is still occupied.
    fn outxfer(&mut self) -> bool {
        if !self.dp.send_free() {
            if self.debug() > 0 {
                log::debug!("[ch11: worker output blocked]");
            }
            return false;
        }
        self.tx_active = false;

        let cnt = self.obuf.staged();
        if let Some(pkt) = Packet::new(self.obuf.packet()) {
            if self.settings.debug > 0 && pkt.expected_len() > cnt {
                log::debug!(
                    "[ch11: sending less than packet: sending {cnt}, expected {}]",
                    pkt.expected_len()
                );
            }
            pkt.dump("PKTOUT");
        }

        self.csr.set_tx_abort(false);
        self.csr.set_tx_done(false);
        self.dp.send(DpFrame {
            cmd: DpCommand::SendPacket,
            data: self.obuf.framed().to_vec(),
        });
        if self.debug() > 0 {
            log::debug!("[ch11: out {cnt}]");
        }
        true
    }

    /// Services the transmit side: pushes staged output to the worker, or
    /// aborts the transfer when the worker is still busy.
    fn ogo(&mut self) {
        if self.tx_active && self.obuf.staged() > 0 {
            if !self.outxfer() {
                self.csr.set_tx_abort(true);
                self.csr.set_tx_done(true);
                if self.debug() > 0 {
                    log::debug!("[ch11: out err - overrun]");
                }
            }
        }
        self.output_interrupt();
    }

    /// The worker finished transmitting: recycle the buffer, flag done.
    fn odone(&mut self) {
        self.obuf.reset();
        self.csr.set_tx_done(true);
        self.tx_active = true;
        self.output_interrupt();
    }

    /// Host event loop entry for [`Wake::SendDone`](crate::dp::Wake).
    pub fn dp_send_done(&mut self) {
        if self.debug() > 0 {
            log::debug!("[ch11: send done, free {}]", self.dp.send_free());
        }
        if self.dp.send_free() {
            self.odone();
        }
    }

    /// Host event loop entry for [`Wake::ReceiveReady`](crate::dp::Wake).
    /// A packet arriving while the receiver is busy is counted as lost and
    /// acknowledged so the worker's slot comes free again.
    pub fn dp_receive_wakeup(&mut self) {
        if self.incheck() {
            if !self.rx_active {
                self.lost = self.lost.wrapping_add(1);
                self.dp.ack();
            } else {
                self.stage_inbound();
            }
        }
    }

    /// Pops the next word of the staged packet. Draining past the packet's
    /// last word clears receive-done, re-arms the receiver, and releases
    /// the worker's slot.
    fn drain_word(&mut self) -> u16 {
        let Some(cnt) = self.rcnt else {
            return 0;
        };
        let val = self.ibuf.pop_word();
        if self.ibuf.staged() >= cnt {
            if self.debug() > 4 {
                log::debug!("[ch11: last word read, clearing rx done]");
            }
            self.rcnt = None;
            self.csr.set_rx_done(false);
            self.rx_active = true;
            self.dp.ack();
        }
        val
    }

    /// The host wrote header, data, and destination; append the source
    /// address and the checksum over everything so far, then hand off.
    fn initiate_transmit(&mut self) -> Result<u16, Error> {
        let len = self.obuf.staged() + 2;
        self.obuf
            .push_word(self.my_addr)
            .map_err(|_| Error::TransmitOverflow)?;
        let cks = checksum(self.obuf.packet_prefix(len));
        self.obuf
            .push_word(cks)
            .map_err(|_| Error::TransmitOverflow)?;
        // A blocked worker leaves the packet staged; a later enable write
        // retries the hand-off.
        self.outxfer();
        Ok(self.my_addr)
    }

    fn write_csr(&mut self, value: u16) -> Result<(), Error> {
        if value & ControlStatus::READ_ONLY != 0 {
            return Err(Error::ReadOnlyBits(value));
        }
        let mut req = ControlStatus::from(value);

        if req.loopback() || req.spy() {
            // Maintenance modes; accepted but never latched.
            if self.debug() > 0 {
                log::debug!("[ch11: loopback/spy requested - not implemented]");
            }
            req.set_loopback(false);
            req.set_spy(false);
        }

        if req.rst() {
            self.clear();
            if self.debug() > 4 {
                log::debug!("[ch11: new csr contents {:#o}]", u16::from(self.csr));
            }
            return Ok(());
        }

        if req.rcl() {
            req.clear_rcl();
            req.set_rx_done(false);
            self.iclear();
        }
        if req.tcl() {
            req.clear_tcl();
            req.set_tx_done(true);
        }
        if req.rx_done() {
            // Writing receive-done re-arms the receiver like a clear.
            req.set_rx_done(false);
            self.iclear();
        }

        self.csr = ControlStatus::from(u16::from(self.csr) | u16::from(req));

        if req.tx_done() {
            self.oclear();
        }

        let ten = req.tx_enable();
        let ren = req.rx_enable();
        if ten && ren {
            if !self.dp.send_free() {
                // A transmission is in flight: let the sender finish first.
                self.ogo();
                self.igo();
            } else {
                self.igo();
                self.ogo();
            }
        } else if ten {
            self.csr.set_rx_enable(false);
            self.ints.input_off(&mut self.line);
            self.ogo();
        } else if ren {
            self.csr.set_tx_enable(false);
            self.ints.output_off(&mut self.line);
            self.igo();
        } else {
            self.csr.set_rx_enable(false);
            self.csr.set_tx_enable(false);
            self.ints.input_off(&mut self.line);
            self.ints.output_off(&mut self.line);
        }

        if self.debug() > 4 {
            log::debug!("[ch11: new csr contents {:#o}]", u16::from(self.csr));
        }
        Ok(())
    }

    fn status_text(&self) -> String {
        let mut out = String::new();
        let reg = self.csr.composed_with_lost(self.lost);
        let _ = writeln!(out, "My CHAOS address: {:#o}", self.my_addr);
        if self.settings.transport == TransportMethod::ChaosUdp {
            let _ = writeln!(out, " CHUDP port: {}.", self.settings.udp_port);
        }
        let _ = writeln!(out, "Status register: {reg:#o}");
        for (mask, name) in [
            (ControlStatus::BSY, "Transmit busy"),
            (ControlStatus::LUP, "Loopback"),
            (ControlStatus::SPY, "Spy (promiscuous)"),
            (ControlStatus::REN, "Receive enabled"),
            (ControlStatus::TEN, "Transmit enabled"),
            (ControlStatus::TAB, "Transmit aborted"),
            (ControlStatus::TDN, "Transmit done"),
            (ControlStatus::RDN, "Receive done"),
            (ControlStatus::ERR, "CRC error"),
        ] {
            if reg & mask != 0 {
                let _ = writeln!(out, "  {name}");
            }
        }
        let _ = writeln!(out, "  Lost count: {}", self.lost);
        let _ = writeln!(
            out,
            "PI request: input {}, output {}",
            self.ints.input_pending(),
            self.ints.output_pending()
        );
        let _ = writeln!(
            out,
            "Input possible: {}, Output possible: {}",
            self.rx_active, self.tx_active
        );
        let _ = writeln!(
            out,
            "DP running: {}, ready: {}, send free: {}",
            self.dp.running(),
            self.dp_ready,
            self.dp.send_free()
        );
        let _ = writeln!(out, "DP debug level: {}", self.dp.debug_level());
        let _ = writeln!(out, "Input buffer: {} chars", self.ibuf.staged());
        let _ = writeln!(out, "Output buffer: {} chars", self.obuf.staged());
        match self.rcnt {
            Some(cnt) => {
                let _ = writeln!(out, "Receive count: {cnt}");
            }
            None => {
                let _ = writeln!(out, "Receive count: none");
            }
        }
        out
    }

    fn mapping_table_text(&self) -> String {
        let mut out = String::new();
        let mappings = self.dp.mapping_status();
        let _ = writeln!(
            out,
            "Currently {} entries in Chaos/IP table",
            mappings.len()
        );
        if !mappings.is_empty() {
            let _ = writeln!(out, "Chaos   IP               Port    Last received");
            for entry in &mappings {
                let last = match entry.last_received.and_then(|at| at.elapsed().ok()) {
                    Some(age) => format!("{}s ago", age.as_secs()),
                    None => "[static]".to_string(),
                };
                let _ = writeln!(
                    out,
                    "{:6o}  {:<15}  {}.  {}",
                    entry.mapping.chaos_addr,
                    entry.mapping.ip_addr.to_string(),
                    entry.mapping.port,
                    last
                );
            }
        }
        out
    }

    fn arp_table_text(&self) -> String {
        let entries = self.dp.arp_entries();
        if entries.is_empty() {
            return "Chaos ARP table empty\n".to_string();
        }
        let mut out = String::from("Chaos ARP table:\nChaos\tEther\t\t\tAge (s)\n");
        for ArpEntry {
            chaos_addr,
            hw_addr: hw,
            last_seen,
        } in &entries
        {
            let age = last_seen
                .elapsed()
                .map(|age| age.as_secs())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{:#o}\t{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}\t{}\t{}",
                chaos_addr,
                hw[0],
                hw[1],
                hw[2],
                hw[3],
                hw[4],
                hw[5],
                age,
                if age > ARP_MAX_AGE_SECS { "(old)" } else { "" }
            );
        }
        out
    }
}

impl<D: DevProcess, L: IrqLine> UnibusDevice for Ch11<D, L> {
    fn read(&mut self, offset: u32) -> Result<u16, Error> {
        if self.debug() > 4 {
            log::debug!("[ch11: read {offset:#o}]");
        }
        self.ensure_started();

        let reg =
            BusAddress::try_from(offset).map_err(|_| Error::UnknownRegister(offset))?;
        let val = match reg {
            BusAddress::Csr => self.csr.composed_with_lost(self.lost),
            BusAddress::MyAddress => self.my_addr,
            BusAddress::ReadBuffer => self.drain_word(),
            BusAddress::BitCount => match self.rcnt {
                Some(cnt) => (cnt * 8 - 1) as u16,
                None => 0o7777,
            },
            BusAddress::Transmit => self.initiate_transmit()?,
        };
        if self.debug() > 4 {
            log::debug!("[ch11: read {offset:#o} => {val:#o}]");
        }
        Ok(val)
    }

    fn write(&mut self, offset: u32, value: u16) -> Result<(), Error> {
        if self.debug() > 4 {
            log::debug!("[ch11: write {offset:#o} <= {value:#o}]");
        }
        self.ensure_started();

        match BusAddress::try_from(offset) {
            Ok(BusAddress::Csr) => self.write_csr(value),
            Ok(BusAddress::MyAddress) => {
                // Writing a word into the outgoing buffer clears
                // transmit-done.
                self.csr.set_tx_done(false);
                self.obuf
                    .push_word(value)
                    .map_err(|_| Error::TransmitOverflow)
            }
            Ok(reg) => Err(Error::ReadOnlyRegister(reg)),
            Err(_) => Err(Error::UnknownRegister(offset)),
        }
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn power_off(&mut self) {
        self.dp_ready = false;
        self.dp.kill();
    }

    fn acknowledge_interrupt(&mut self) -> u16 {
        self.line.clear();
        self.settings.interrupt_vector
    }

    fn command(&mut self, cmd: &str) -> String {
        let cmd = cmd.trim();
        if cmd == "chiptable" {
            return self.mapping_table_text();
        }
        if cmd == "arptable" || cmd == "arp" {
            return self.arp_table_text();
        }
        if cmd == "status" {
            return self.status_text();
        }
        if let Some(arg) = cmd.strip_prefix("dpdebug") {
            return match arg.trim().parse::<u32>() {
                Ok(level) => {
                    self.dp.set_debug_level(level);
                    format!("DP debug level set to {level}\n")
                }
                Err(_) => format!("Couldn't grok argument: \"{}\"\n", arg.trim()),
            };
        }
        if cmd.is_empty() {
            let mut out = self.status_text();
            if self.settings.transport == TransportMethod::ChaosUdp {
                out.push_str(&self.mapping_table_text());
            } else {
                out.push_str(&self.arp_table_text());
            }
            return out;
        }
        format!(
            "Unknown command \"{cmd}\"\nCommands:\n \
             \"chiptable\" to show the Chaos/IP table\n \
             \"arptable\" to show the Chaos ARP table\n \
             \"status\" to show device status\n \
             \"dpdebug x\" to set the device process debug level to x\n"
        )
    }
}
