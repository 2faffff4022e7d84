use portable_atomic::{AtomicI8, AtomicU32, Ordering};
use smoltcp::wire::EthernetAddress;

use crate::{buffer::NetBuffer, descriptor::BssType, MaybeSync};

/// The amount of logical interfaces, that can be bound.
pub const MAX_INTERFACES: usize = 3;

/// The IP stack side of a logical interface.
pub trait StackInterface: MaybeSync {
    /// Hand a finished Ethernet frame to the stack.
    ///
    /// If the stack can't accept the frame, it returns ownership of it.
    fn input(&self, frame: NetBuffer) -> Result<(), NetBuffer>;
}

/// A read-only snapshot of [InterfaceCounters].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterfaceStats {
    pub rx_packets: u32,
    pub rx_dropped: u32,
    pub rx_overrun: u32,
    pub tx_packets: u32,
    pub tx_errors: u32,
    pub tx_overrun: u32,
    /// Frames swallowed, while data TX was blocked.
    pub tx_blocked: u32,
    /// SNR of the last data frame.
    pub last_snr: i8,
    /// Noise floor of the last data frame.
    pub last_noise_floor: i8,
}

/// Diagnostic counters of one interface.
#[derive(Default)]
pub struct InterfaceCounters {
    rx_packets: AtomicU32,
    rx_dropped: AtomicU32,
    rx_overrun: AtomicU32,
    tx_packets: AtomicU32,
    tx_errors: AtomicU32,
    tx_overrun: AtomicU32,
    tx_blocked: AtomicU32,
    last_snr: AtomicI8,
    last_noise_floor: AtomicI8,
}
impl InterfaceCounters {
    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rx_packet(&self) {
        Self::bump(&self.rx_packets);
    }
    pub(crate) fn rx_drop(&self) {
        Self::bump(&self.rx_dropped);
    }
    pub(crate) fn rx_overrun(&self) {
        Self::bump(&self.rx_overrun);
    }
    pub(crate) fn tx_packet(&self) {
        Self::bump(&self.tx_packets);
    }
    pub(crate) fn tx_error(&self) {
        Self::bump(&self.tx_errors);
    }
    pub(crate) fn tx_overrun(&self) {
        Self::bump(&self.tx_overrun);
    }
    pub(crate) fn tx_blocked(&self) {
        Self::bump(&self.tx_blocked);
    }
    pub(crate) fn record_signal(&self, snr: i8, noise_floor: i8) {
        self.last_snr.store(snr, Ordering::Relaxed);
        self.last_noise_floor.store(noise_floor, Ordering::Relaxed);
    }
    pub fn snapshot(&self) -> InterfaceStats {
        InterfaceStats {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            rx_overrun: self.rx_overrun.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            tx_overrun: self.tx_overrun.load(Ordering::Relaxed),
            tx_blocked: self.tx_blocked.load(Ordering::Relaxed),
            last_snr: self.last_snr.load(Ordering::Relaxed),
            last_noise_floor: self.last_noise_floor.load(Ordering::Relaxed),
        }
    }
}

/// A logical interface bound to its stack counterpart.
pub struct InterfaceBinding<'a> {
    role: BssType,
    hardware_address: EthernetAddress,
    stack: &'a dyn StackInterface,
    counters: InterfaceCounters,
}
impl<'a> InterfaceBinding<'a> {
    pub fn role(&self) -> BssType {
        self.role
    }
    pub fn hardware_address(&self) -> EthernetAddress {
        self.hardware_address
    }
    pub fn stack(&self) -> &'a dyn StackInterface {
        self.stack
    }
    pub fn counters(&self) -> &InterfaceCounters {
        &self.counters
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BindError {
    /// The role doesn't map to a registry slot.
    UnknownRole,
    /// Another stack interface is already bound to this role.
    AlreadyBound,
}

/// Maps wire interface identifiers to their bound stack interfaces.
///
/// Bindings are made during bring-up, where the registry is still exclusively owned. Afterwards
/// it is only read.
pub struct InterfaceRegistry<'a> {
    bindings: [Option<InterfaceBinding<'a>>; MAX_INTERFACES],
}
impl<'a> InterfaceRegistry<'a> {
    pub const fn new() -> Self {
        Self {
            bindings: [const { None }; MAX_INTERFACES],
        }
    }
    /// Bind a stack interface to a role.
    pub fn bind(
        &mut self,
        role: BssType,
        hardware_address: EthernetAddress,
        stack: &'a dyn StackInterface,
    ) -> Result<&InterfaceBinding<'a>, BindError> {
        let index = role.index().ok_or(BindError::UnknownRole)?;
        let entry = &mut self.bindings[index];
        if entry.is_some() {
            return Err(BindError::AlreadyBound);
        }
        debug!("Bound interface {:?}.", role);
        Ok(entry.insert(InterfaceBinding {
            role,
            hardware_address,
            stack,
            counters: InterfaceCounters::default(),
        }))
    }
    pub fn get(&self, role: BssType) -> Option<&InterfaceBinding<'a>> {
        self.bindings.get(role.index()?)?.as_ref()
    }
    /// Look up the binding for the raw identifier found in a firmware descriptor.
    pub fn get_by_wire_id(&self, id: u8) -> Option<&InterfaceBinding<'a>> {
        self.get(BssType::from_bits(id))
    }
    pub fn iter(&self) -> impl Iterator<Item = &InterfaceBinding<'a>> + '_ {
        self.bindings.iter().flatten()
    }
}
impl Default for InterfaceRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullStack;
    impl StackInterface for NullStack {
        fn input(&self, _frame: NetBuffer) -> Result<(), NetBuffer> {
            Ok(())
        }
    }

    const STA_ADDRESS: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 1]);

    #[test]
    fn bind_once_then_lookup() {
        let stack = NullStack;
        let mut registry = InterfaceRegistry::new();
        registry
            .bind(BssType::Station, STA_ADDRESS, &stack)
            .unwrap();
        assert_eq!(
            registry
                .bind(BssType::Station, STA_ADDRESS, &stack)
                .err(),
            Some(BindError::AlreadyBound)
        );
        assert_eq!(
            registry
                .bind(BssType::from_bits(9), STA_ADDRESS, &stack)
                .err(),
            Some(BindError::UnknownRole)
        );
        let binding = registry.get_by_wire_id(0).unwrap();
        assert_eq!(binding.role(), BssType::Station);
        assert_eq!(binding.hardware_address(), STA_ADDRESS);
        assert!(registry.get(BssType::AccessPoint).is_none());
        assert!(registry.get_by_wire_id(200).is_none());
        assert_eq!(registry.iter().count(), 1);
    }

    #[test]
    fn counters_snapshot() {
        let counters = InterfaceCounters::default();
        counters.rx_packet();
        counters.rx_packet();
        counters.rx_drop();
        counters.tx_overrun();
        counters.record_signal(30, -90);
        let stats = counters.snapshot();
        assert_eq!(stats.rx_packets, 2);
        assert_eq!(stats.rx_dropped, 1);
        assert_eq!(stats.tx_overrun, 1);
        assert_eq!(stats.last_snr, 30);
        assert_eq!(stats.last_noise_floor, -90);
    }
}
