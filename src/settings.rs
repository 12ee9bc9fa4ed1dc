//! Typed configuration the CH11 core consumes at construction time.

use std::net::Ipv4Addr;

/// Default UDP port for CHUDP (Chaosnet-over-UDP) transport.
pub const CHUDP_PORT: u16 = 42042;

/// Maximum number of static Chaos/IP mapping entries.
pub const MAPPING_TABLE_MAX: usize = 10;

/// Default bus base address for the CH11.
pub const DEFAULT_BUS_ADDRESS: u32 = 0o764140;

#[derive(Debug)]
pub enum ConfigError {
    /// Subnet and host octets must both be non-zero.
    InvalidChaosAddress(u16),
    /// BR priority must be one of 4, 5, 6, 7.
    InvalidBusPriority(u8),
    /// Interrupt vector must be a multiple of 4 in 4..=0o400.
    InvalidVector(u16),
    /// Bus address must be aligned to a 0o40-byte boundary.
    InvalidBusAddress(u32),
    /// UDP port must be non-zero.
    InvalidUdpPort(u16),
    /// The static mapping table holds at most [`MAPPING_TABLE_MAX`] entries.
    MappingTableFull,
}

/// A validated 16-bit Chaosnet node address: subnet in the upper octet,
/// host in the lower, both required non-zero.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChaosAddress(u16);

impl ChaosAddress {
    pub fn new(addr: u16) -> Result<ChaosAddress, ConfigError> {
        if addr & 0xff00 == 0 || addr & 0x00ff == 0 {
            return Err(ConfigError::InvalidChaosAddress(addr));
        }
        Ok(ChaosAddress(addr))
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn subnet(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn host(&self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

/// How the device process reaches the real network.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportMethod {
    /// Chaosnet packets encapsulated in UDP datagrams.
    ChaosUdp,
    /// Raw link-layer capture on a native interface.
    RawLink,
}

/// One static Chaos-address-to-IP-endpoint mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMapping {
    pub chaos_addr: u16,
    pub ip_addr: Ipv4Addr,
    pub port: u16,
}

/// Configuration the CH11 core consumes at construction time. Parameter
/// string parsing happens upstream; this is the already-typed result.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Diagnostic verbosity; levels above 4 dump register traffic.
    pub debug: u32,
    /// BR interrupt priority level (4..=7).
    pub bus_priority: u8,
    /// Interrupt vector returned on acknowledge.
    pub interrupt_vector: u16,
    /// Base bus address of the register file.
    pub bus_address: u32,
    /// This interface's own Chaosnet address.
    pub chaos_address: ChaosAddress,
    /// Transport the device process should use.
    pub transport: TransportMethod,
    /// UDP port for the CHUDP transport.
    pub udp_port: u16,
    /// Static Chaos/IP mappings handed to the device process.
    pub address_map: Vec<AddressMapping>,
    /// Initial device-process debug level.
    pub dp_debug: u32,

    // Tracks whether the transport was chosen explicitly, so supplying
    // CHUDP parameters can imply the CHUDP transport the way the original
    // configuration layer did.
    transport_explicit: bool,
}

impl Settings {
    pub fn new(chaos_address: ChaosAddress) -> Settings {
        Settings {
            debug: 0,
            bus_priority: 6,
            interrupt_vector: 0o270,
            bus_address: DEFAULT_BUS_ADDRESS,
            chaos_address,
            transport: TransportMethod::RawLink,
            udp_port: CHUDP_PORT,
            address_map: Vec::new(),
            dp_debug: 0,
            transport_explicit: false,
        }
    }

    pub fn with_debug(mut self, debug: u32) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_bus_priority(mut self, bus_priority: u8) -> Self {
        self.bus_priority = bus_priority;
        self
    }

    pub fn with_interrupt_vector(mut self, interrupt_vector: u16) -> Self {
        self.interrupt_vector = interrupt_vector;
        self
    }

    pub fn with_bus_address(mut self, bus_address: u32) -> Self {
        self.bus_address = bus_address;
        self
    }

    pub fn with_transport(mut self, transport: TransportMethod) -> Self {
        self.transport = transport;
        self.transport_explicit = true;
        self
    }

    /// Selects the CHUDP port; implies the CHUDP transport unless a
    /// transport was chosen explicitly.
    pub fn with_udp_port(mut self, udp_port: u16) -> Self {
        self.udp_port = udp_port;
        if !self.transport_explicit {
            self.transport = TransportMethod::ChaosUdp;
        }
        self
    }

    pub fn with_dp_debug(mut self, dp_debug: u32) -> Self {
        self.dp_debug = dp_debug;
        self
    }

    /// Appends one static mapping; implies the CHUDP transport unless a
    /// transport was chosen explicitly.
    pub fn with_mapping(mut self, mapping: AddressMapping) -> Result<Self, ConfigError> {
        if self.address_map.len() >= MAPPING_TABLE_MAX {
            return Err(ConfigError::MappingTableFull);
        }
        self.address_map.push(mapping);
        if !self.transport_explicit {
            self.transport = TransportMethod::ChaosUdp;
        }
        Ok(self)
    }

    /// Follow-up checks after all parameters are in, mirroring the
    /// configuration-time validation of the original device.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(4..=7).contains(&self.bus_priority) {
            return Err(ConfigError::InvalidBusPriority(self.bus_priority));
        }
        if self.interrupt_vector < 4
            || self.interrupt_vector > 0o400
            || self.interrupt_vector % 4 != 0
        {
            return Err(ConfigError::InvalidVector(self.interrupt_vector));
        }
        if self.bus_address == 0 || self.bus_address & 0o37 != 0 {
            return Err(ConfigError::InvalidBusAddress(self.bus_address));
        }
        if self.udp_port == 0 {
            return Err(ConfigError::InvalidUdpPort(self.udp_port));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chaos_address_requires_both_octets() {
        assert!(ChaosAddress::new(0).is_err());
        assert!(ChaosAddress::new(0x0034).is_err());
        assert!(ChaosAddress::new(0x1200).is_err());
        let addr = ChaosAddress::new(0o1234).unwrap();
        assert_eq!(addr.value(), 0o1234);
        assert_eq!(addr.subnet(), 0o2);
        assert_eq!(addr.host(), 0o234);
    }

    #[test]
    fn defaults_validate() {
        let settings = Settings::new(ChaosAddress::new(0o1234).unwrap());
        settings.validate().unwrap();
        assert_eq!(settings.transport, TransportMethod::RawLink);
        assert_eq!(settings.udp_port, CHUDP_PORT);
    }

    #[test]
    fn chudp_parameters_imply_chudp_transport() {
        let settings = Settings::new(ChaosAddress::new(0o1234).unwrap()).with_udp_port(42043);
        assert_eq!(settings.transport, TransportMethod::ChaosUdp);

        // An explicit transport choice wins over the implication.
        let settings = Settings::new(ChaosAddress::new(0o1234).unwrap())
            .with_transport(TransportMethod::RawLink)
            .with_udp_port(42043);
        assert_eq!(settings.transport, TransportMethod::RawLink);
    }

    #[test]
    fn mapping_table_is_bounded() {
        let mut settings = Settings::new(ChaosAddress::new(0o1234).unwrap());
        for host in 1..=MAPPING_TABLE_MAX as u16 {
            settings = settings
                .with_mapping(AddressMapping {
                    chaos_addr: 0o400 + host,
                    ip_addr: Ipv4Addr::new(10, 0, 0, host as u8),
                    port: CHUDP_PORT,
                })
                .unwrap();
        }
        assert!(matches!(
            settings.with_mapping(AddressMapping {
                chaos_addr: 0o777,
                ip_addr: Ipv4Addr::new(10, 0, 0, 99),
                port: CHUDP_PORT,
            }),
            Err(ConfigError::MappingTableFull)
        ));
    }

    #[test]
    fn rejects_bad_bus_parameters() {
        let base = Settings::new(ChaosAddress::new(0o1234).unwrap());
        assert!(base.clone().with_bus_priority(3).validate().is_err());
        assert!(base.clone().with_interrupt_vector(0o271).validate().is_err());
        assert!(base.clone().with_bus_address(0o764141).validate().is_err());
        assert!(base.clone().with_udp_port(0).validate().is_err());
    }
}
