//! The seam between the CH11 core and the device process that owns the
//! real network socket.
//!
//! The original shared-memory handshake becomes a pair of single-depth
//! channel slots: one command slot toward the worker, one message slot
//! back. Exactly one side owns a buffer's contents at a time; ownership
//! transfers with the command in one direction and with the acknowledgment
//! in the other. Asynchronous wake-ups travel over a separate notification
//! channel drained by the host's event loop.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::settings::{AddressMapping, Settings, TransportMethod};

/// Handshake protocol version carried in the shared configuration record.
pub const DP_VERSION: u32 = 1;

/// Bytes of transport framing reserved below the packet in each buffer
/// when the CHUDP transport is in use.
pub const CHUDP_HEADER_SIZE: usize = 4;

/// Learned hardware associations older than this are reported as stale.
pub const ARP_MAX_AGE_SECS: u64 = 1800;

/// Commands exchanged across the handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DpCommand {
    /// Worker finished its startup handshake; carries no packet.
    Init = 1,
    /// Device hands the worker a completed outbound packet.
    SendPacket = 2,
    /// Worker posts a received packet for the device to stage.
    RecvPacket = 3,
}

/// Wake-up notifications the worker sends to the host event loop, which
/// relays them to [`Ch11::dp_send_done`](crate::Ch11::dp_send_done) and
/// [`Ch11::dp_receive_wakeup`](crate::Ch11::dp_receive_wakeup).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Wake {
    /// The worker finished transmitting the handed-off buffer.
    SendDone,
    /// The worker posted a message (init, packet, or otherwise).
    ReceiveReady,
}

/// One handshake message: a command plus the buffer contents that travel
/// with it. Outbound frames include the transport framing prefix; inbound
/// packet frames carry the bare packet (the worker strips its framing).
#[derive(Debug, Clone)]
pub struct DpFrame {
    pub cmd: DpCommand,
    pub data: Vec<u8>,
}

/// The configuration record handed to the worker at startup.
#[derive(Debug, Clone)]
pub struct DpConfig {
    pub version: u32,
    pub attrs: u32,
    /// Max input messages to queue in the kernel, 0 for the system default.
    pub backlog: u32,
    /// Whether the native interface is dedicated to the emulator.
    pub dedicated: bool,
    pub interface_name: Option<String>,
    pub transport: TransportMethod,
    pub my_addr: u16,
    pub udp_port: u16,
    pub mappings: Vec<AddressMapping>,
    pub debug: u32,
}

impl DpConfig {
    pub fn from_settings(settings: &Settings) -> DpConfig {
        DpConfig {
            version: DP_VERSION,
            attrs: 0,
            backlog: 0,
            dedicated: false,
            interface_name: None,
            transport: settings.transport,
            my_addr: settings.chaos_address.value(),
            udp_port: settings.udp_port,
            mappings: settings.address_map.clone(),
            debug: settings.dp_debug,
        }
    }

    /// Bytes of framing the transport needs below each packet.
    pub fn buffer_offset(&self) -> usize {
        transport_offset(self.transport)
    }
}

/// Bytes of framing a transport needs below each packet buffer.
pub fn transport_offset(transport: TransportMethod) -> usize {
    match transport {
        TransportMethod::ChaosUdp => CHUDP_HEADER_SIZE,
        TransportMethod::RawLink => 0,
    }
}

/// One static mapping together with the worker-maintained receive time.
#[derive(Debug, Clone)]
pub struct MappingStatus {
    pub mapping: AddressMapping,
    pub last_received: Option<SystemTime>,
}

/// A learned (Chaos address, hardware address) association.
#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub chaos_addr: u16,
    pub hw_addr: [u8; 6],
    pub last_seen: SystemTime,
}

/// The record the worker keeps updated for diagnostic display.
#[derive(Debug, Default)]
pub struct DpStatus {
    pub debug: u32,
    pub mappings: Vec<MappingStatus>,
    pub arp: Vec<ArpEntry>,
}

/// What the core needs from a device process. The channel-backed
/// [`DpChannel`] is the production implementation; tests substitute a
/// scripted one.
pub trait DevProcess {
    /// Launches the worker. Called lazily from register access when the
    /// worker is found not running.
    fn start(&mut self) -> io::Result<()>;

    fn running(&self) -> bool;

    /// Stops the worker but allows a later restart.
    fn stop(&mut self);

    /// Terminates the worker permanently (power-off).
    fn kill(&mut self);

    /// Whether the outbound slot is free for another send.
    fn send_free(&self) -> bool;

    /// Hands a frame to the worker, taking the outbound slot.
    fn send(&mut self, frame: DpFrame);

    /// Non-blocking look at the worker's posted message, if any.
    fn posted(&mut self) -> Option<&DpFrame>;

    /// Acknowledges and discards the posted message, freeing the worker's
    /// slot for the next one.
    fn ack(&mut self);

    fn debug_level(&self) -> u32;

    fn set_debug_level(&mut self, level: u32);

    fn mapping_status(&self) -> Vec<MappingStatus>;

    fn arp_entries(&self) -> Vec<ArpEntry>;
}

/// Called with the worker's end of the handshake when the device starts
/// its device process; typically spawns a thread or subprocess around it.
pub type Launcher = Box<dyn FnMut(WorkerPort) -> io::Result<()> + Send>;

/// Channel-backed device-process handle, the device side of the handshake.
pub struct DpChannel {
    cfg: DpConfig,
    wake_tx: Sender<Wake>,
    launcher: Launcher,
    link: Option<Link>,
    status: Arc<Mutex<DpStatus>>,
}

struct Link {
    cmd_tx: Sender<DpFrame>,
    msg_rx: Receiver<DpFrame>,
    ack_tx: Sender<()>,
    send_free: Arc<AtomicBool>,
    staged: Option<DpFrame>,
}

/// The worker's end of the handshake.
pub struct WorkerPort {
    cfg: DpConfig,
    cmd_rx: Receiver<DpFrame>,
    msg_tx: Sender<DpFrame>,
    ack_rx: Receiver<()>,
    send_free: Arc<AtomicBool>,
    wake_tx: Sender<Wake>,
    status: Arc<Mutex<DpStatus>>,
}

impl DpChannel {
    /// Creates an idle handle. `wake_tx` feeds the host event loop;
    /// `launcher` is invoked on (re)start with a fresh [`WorkerPort`].
    pub fn new(cfg: DpConfig, wake_tx: Sender<Wake>, launcher: Launcher) -> DpChannel {
        let status = Arc::new(Mutex::new(DpStatus {
            debug: cfg.debug,
            mappings: cfg
                .mappings
                .iter()
                .map(|mapping| MappingStatus {
                    mapping: mapping.clone(),
                    last_received: None,
                })
                .collect(),
            arp: Vec::new(),
        }));
        DpChannel {
            cfg,
            wake_tx,
            launcher,
            link: None,
            status,
        }
    }
}

impl DevProcess for DpChannel {
    fn start(&mut self) -> io::Result<()> {
        if self.link.is_some() {
            return Ok(());
        }

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (msg_tx, msg_rx) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::channel();
        let send_free = Arc::new(AtomicBool::new(true));

        (self.launcher)(WorkerPort {
            cfg: self.cfg.clone(),
            cmd_rx,
            msg_tx,
            ack_rx,
            send_free: send_free.clone(),
            wake_tx: self.wake_tx.clone(),
            status: self.status.clone(),
        })?;

        self.link = Some(Link {
            cmd_tx,
            msg_rx,
            ack_tx,
            send_free,
            staged: None,
        });
        Ok(())
    }

    fn running(&self) -> bool {
        self.link.is_some()
    }

    fn stop(&mut self) {
        // Dropping our channel ends disconnects the worker, which exits on
        // the next receive.
        self.link = None;
    }

    fn kill(&mut self) {
        self.link = None;
    }

    fn send_free(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.send_free.load(Ordering::Acquire))
    }

    fn send(&mut self, frame: DpFrame) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        link.send_free.store(false, Ordering::Release);
        if link.cmd_tx.send(frame).is_err() {
            log::debug!("[ch11: device process went away on send]");
        }
    }

    fn posted(&mut self) -> Option<&DpFrame> {
        let link = self.link.as_mut()?;
        if link.staged.is_none() {
            link.staged = link.msg_rx.try_recv().ok();
        }
        link.staged.as_ref()
    }

    fn ack(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if link.staged.take().is_some() {
            let _ = link.ack_tx.send(());
        }
    }

    fn debug_level(&self) -> u32 {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).debug
    }

    fn set_debug_level(&mut self, level: u32) {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).debug = level;
    }

    fn mapping_status(&self) -> Vec<MappingStatus> {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mappings
            .clone()
    }

    fn arp_entries(&self) -> Vec<ArpEntry> {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .arp
            .clone()
    }
}

impl WorkerPort {
    pub fn config(&self) -> &DpConfig {
        &self.cfg
    }

    /// Shared status record the worker keeps updated (debug level, mapping
    /// receive times, learned associations).
    pub fn status(&self) -> Arc<Mutex<DpStatus>> {
        self.status.clone()
    }

    /// Announces completion of the startup handshake.
    pub fn announce_ready(&self) {
        let _ = self.msg_tx.send(DpFrame {
            cmd: DpCommand::Init,
            data: Vec::new(),
        });
        let _ = self.wake_tx.send(Wake::ReceiveReady);
    }

    /// Blocks for the next outbound command from the device. `None` when
    /// the device side has shut down.
    pub fn next_command(&self) -> Option<DpFrame> {
        self.cmd_rx.recv().ok()
    }

    /// Marks the outbound slot free again and wakes the host.
    pub fn complete_send(&self) {
        self.send_free.store(true, Ordering::Release);
        let _ = self.wake_tx.send(Wake::SendDone);
    }

    /// Posts a received packet (framing already stripped) and wakes the
    /// host. The inbound slot stays owned by the device until
    /// [`WorkerPort::wait_ack`] returns.
    pub fn post_packet(&self, data: Vec<u8>) {
        let _ = self.msg_tx.send(DpFrame {
            cmd: DpCommand::RecvPacket,
            data,
        });
        let _ = self.wake_tx.send(Wake::ReceiveReady);
    }

    /// Blocks until the device acknowledges the posted message. `None`
    /// when the device side has shut down.
    pub fn wait_ack(&self) -> Option<()> {
        self.ack_rx.recv().ok()
    }
}
