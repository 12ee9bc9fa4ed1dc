//! Emulation of the CH11 Chaosnet interface card: the register and
//! interrupt state machine the hosting bus framework talks to, plus the
//! hand-off protocol toward the device process that owns the real
//! network socket.

pub(crate) mod macros;

pub mod buffer;
pub mod checksum;
pub mod csr;
pub mod device;
pub mod dp;
pub mod interrupt;
pub mod settings;
pub mod wire;

pub use device::Ch11;
pub use device::Error;
pub use device::UnibusDevice;
pub use dp::{DevProcess, DpChannel, Wake, WorkerPort};
pub use interrupt::IrqLine;
pub use settings::{ChaosAddress, ConfigError, Settings};
