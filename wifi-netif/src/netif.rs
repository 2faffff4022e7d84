use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex;
use portable_atomic::{AtomicBool, Ordering};
use smoltcp::wire::{EthernetAddress, Ipv4Address, Ipv6Address};

use crate::{
    buffer::{BufferAllocator, HeapAllocator, NetBuffer},
    config::NetifConfig,
    descriptor::BssType,
    interface::{BindError, InterfaceCounters, InterfaceRegistry, InterfaceStats, StackInterface},
    multicast::{FilterError, MacFilterAction, McastFilterTable, MulticastRegistry},
    ring::{Ownership, RingError, RxRing},
    rx::{frame_role, EapolSink, Handler, ManagementSink, RxClassifier},
    sync::RxReadySignal,
    tx::{self, RetryPolicy, TxError, TxFirmware, TxResult},
    DefaultRawMutex,
};

/// Everything the adapter needs from the firmware.
pub trait Firmware: TxFirmware + McastFilterTable {}
impl<T: TxFirmware + McastFilterTable + ?Sized> Firmware for T {}

/// A Wi-Fi network adapter with an RX ring of `N` slots.
///
/// Interfaces are bound through [WifiNetif::bind_interface], while the adapter is still
/// exclusively owned. Afterwards it's shared between the RX task, the firmware producer and the
/// stack.
pub struct WifiNetif<'a, F: Firmware, const N: usize, A: BufferAllocator = HeapAllocator> {
    config: NetifConfig,
    firmware: F,
    allocator: A,
    registry: InterfaceRegistry<'a>,
    ring: blocking_mutex::Mutex<DefaultRawMutex, RefCell<RxRing<N>>>,
    rx_signal: RxReadySignal,
    multicast: blocking_mutex::Mutex<DefaultRawMutex, RefCell<MulticastRegistry>>,
    management_sink: blocking_mutex::Mutex<DefaultRawMutex, Cell<Handler<&'a dyn ManagementSink>>>,
    eapol_sink: blocking_mutex::Mutex<DefaultRawMutex, Cell<Handler<&'a dyn EapolSink>>>,
    tx_blocked: AtomicBool,
    unattributed: InterfaceCounters,
}
impl<'a, F: Firmware, const N: usize> WifiNetif<'a, F, N> {
    /// Create an adapter, which allocates RX buffers from the heap.
    pub fn new(firmware: F, config: NetifConfig) -> Self {
        Self::with_allocator(firmware, HeapAllocator, config)
    }
}
impl<'a, F: Firmware, const N: usize, A: BufferAllocator> WifiNetif<'a, F, N, A> {
    /// Create an adapter and fill the RX ring with buffers from `allocator`.
    pub fn with_allocator(firmware: F, allocator: A, config: NetifConfig) -> Self {
        let mut ring = RxRing::new(config.rx_buffer_size);
        let replenished = ring.replenish(&allocator);
        debug!("Initialized RX ring with {} of {} slots.", replenished, N);
        Self {
            config,
            firmware,
            allocator,
            registry: InterfaceRegistry::new(),
            ring: blocking_mutex::Mutex::new(RefCell::new(ring)),
            rx_signal: RxReadySignal::new(),
            multicast: blocking_mutex::Mutex::new(RefCell::new(MulticastRegistry::new())),
            management_sink: blocking_mutex::Mutex::new(Cell::new(Handler::Unregistered)),
            eapol_sink: blocking_mutex::Mutex::new(Cell::new(Handler::Unregistered)),
            tx_blocked: AtomicBool::new(false),
            unattributed: InterfaceCounters::default(),
        }
    }
    pub fn config(&self) -> &NetifConfig {
        &self.config
    }
    pub fn firmware(&self) -> &F {
        &self.firmware
    }
    pub fn registry(&self) -> &InterfaceRegistry<'a> {
        &self.registry
    }
    /// Bind a stack interface to a role.
    ///
    /// This also subscribes the interface to the IPv6 all nodes group, so neighbour discovery
    /// passes the hardware filter.
    pub fn bind_interface(
        &mut self,
        role: BssType,
        hardware_address: EthernetAddress,
        stack: &'a dyn StackInterface,
    ) -> Result<(), BindError> {
        self.registry.bind(role, hardware_address, stack)?;
        if self
            .mld_filter(Ipv6Address::LINK_LOCAL_ALL_NODES, MacFilterAction::Add)
            .is_err()
        {
            warn!("Couldn't subscribe {:?} to the all nodes group.", role);
        }
        info!("Interface {:?} up.", role);
        Ok(())
    }

    // RX

    /// Place a frame into the RX ring and wake the RX task, like the firmware does.
    ///
    /// If the ring can't take the frame, it's dropped and accounted on the interface it was
    /// received on.
    pub fn firmware_deliver(&self, frame: &[u8]) -> Result<(), RingError> {
        let result = self.ring.lock(|ring| ring.borrow_mut().produce(frame));
        match result {
            Ok(()) => self.rx_signal.notify(),
            Err(err) => {
                let counters = frame_role(frame)
                    .and_then(|role| self.registry.get(role))
                    .map_or(&self.unattributed, |binding| binding.counters());
                match err {
                    RingError::Full | RingError::NoBuffer => counters.rx_overrun(),
                    _ => counters.rx_drop(),
                }
                debug!("RX ring rejected frame: {:?}.", err);
            }
        }
        result
    }
    /// The signal the RX task waits on.
    pub fn rx_signal(&self) -> &RxReadySignal {
        &self.rx_signal
    }
    fn classifier(&self) -> RxClassifier<'_, 'a> {
        RxClassifier {
            config: &self.config,
            registry: &self.registry,
            management_sink: self.management_sink.lock(Cell::get),
            eapol_sink: self.eapol_sink.lock(Cell::get),
            unattributed: &self.unattributed,
            allocator: &self.allocator,
        }
    }
    /// Process every frame, that's currently ready in the RX ring.
    ///
    /// Returns the amount of buffers taken from the ring. This never replenishes the ring.
    pub fn drain_rx(&self) -> usize {
        let classifier = self.classifier();
        let mut taken = 0;
        while let Some(buffer) = self.ring.lock(|ring| ring.borrow_mut().take_ready()) {
            classifier.process(buffer);
            taken += 1;
        }
        if taken != 0 {
            trace!("Drained {} frames.", taken);
        }
        taken
    }
    /// Attach fresh buffers to all consumed RX slots.
    pub fn replenish(&self) -> usize {
        self.ring
            .lock(|ring| ring.borrow_mut().replenish(&self.allocator))
    }
    /// The number of RX slots in the specified state.
    pub fn rx_slots(&self, ownership: Ownership) -> usize {
        self.ring.lock(|ring| ring.borrow().count(ownership))
    }
    /// Drop all frames waiting in the RX ring.
    pub fn clear_rx_queue(&self) {
        self.ring.lock(|ring| {
            let mut ring = ring.borrow_mut();
            ring.clear();
            ring.replenish(&self.allocator);
        });
        self.rx_signal.reset();
    }
    /// The RX task.
    ///
    /// Waits for the firmware to report frames, drains the ring and replenishes it afterwards.
    /// This never returns.
    pub async fn run_rx(&self) {
        loop {
            let notifications = self.rx_signal.wait().await;
            trace!("RX woken by {} notifications.", notifications);
            self.drain_rx();
            self.replenish();
        }
    }
    pub fn set_management_sink(&self, sink: &'a dyn ManagementSink) {
        self.management_sink
            .lock(|handler| handler.set(Handler::Registered(sink)));
    }
    pub fn clear_management_sink(&self) {
        self.management_sink
            .lock(|handler| handler.set(Handler::Unregistered));
    }
    pub fn set_eapol_sink(&self, sink: &'a dyn EapolSink) {
        self.eapol_sink
            .lock(|handler| handler.set(Handler::Registered(sink)));
    }
    pub fn clear_eapol_sink(&self) {
        self.eapol_sink.lock(|handler| handler.set(Handler::Unregistered));
    }

    // TX

    /// Block or unblock data TX.
    ///
    /// While blocked, frames from the stack are swallowed and counted.
    pub fn set_tx_blocked(&self, blocked: bool) {
        self.tx_blocked.store(blocked, Ordering::Relaxed);
    }
    pub fn is_tx_blocked(&self) -> bool {
        self.tx_blocked.load(Ordering::Relaxed)
    }
    async fn send(&self, role: BssType, frame: NetBuffer, policy: RetryPolicy) -> TxResult<()> {
        let binding = self.registry.get(role).ok_or(TxError::InterfaceNotBound)?;
        if self.is_tx_blocked() {
            binding.counters().tx_blocked();
            return Ok(());
        }
        tx::transmit(
            &self.firmware,
            binding,
            self.config.tx_payload_mode,
            policy,
            frame,
        )
        .await
    }
    /// Send a frame from the stack.
    ///
    /// If the output queue is paused, the calling task yields before trying again.
    pub async fn transmit(&self, role: BssType, frame: NetBuffer) -> TxResult<()> {
        self.send(
            role,
            frame,
            RetryPolicy {
                budget: self.config.tx_retry_budget,
                yield_on_pause: true,
            },
        )
        .await
    }
    /// Forward a frame received by the access point back to the air.
    ///
    /// Unlike [WifiNetif::transmit], this never yields.
    pub async fn forward(&self, frame: NetBuffer) -> TxResult<()> {
        self.send(
            BssType::AccessPoint,
            frame,
            RetryPolicy {
                budget: self.config.ap_forward_retry_budget,
                yield_on_pause: false,
            },
        )
        .await
    }

    // Multicast

    /// The IGMP filter hook of the stack.
    pub fn igmp_filter(&self, group: Ipv4Address, action: MacFilterAction) -> Result<(), FilterError> {
        self.multicast.lock(|multicast| {
            multicast
                .borrow_mut()
                .ipv4
                .apply(group, action, &self.firmware)
        })
    }
    /// The MLD filter hook of the stack.
    pub fn mld_filter(&self, group: Ipv6Address, action: MacFilterAction) -> Result<(), FilterError> {
        self.multicast.lock(|multicast| {
            multicast
                .borrow_mut()
                .ipv6
                .apply(group, action, &self.firmware)
        })
    }
    pub fn is_ipv4_member(&self, group: Ipv4Address) -> bool {
        self.multicast
            .lock(|multicast| multicast.borrow().ipv4.contains(&group))
    }
    pub fn is_ipv6_member(&self, group: Ipv6Address) -> bool {
        self.multicast
            .lock(|multicast| multicast.borrow().ipv6.contains(&group))
    }

    // Diagnostics

    pub fn interface_stats(&self, role: BssType) -> Option<InterfaceStats> {
        self.registry
            .get(role)
            .map(|binding| binding.counters().snapshot())
    }
    /// Counters of frames, that couldn't be attributed to a bound interface.
    pub fn unattributed_stats(&self) -> InterfaceStats {
        self.unattributed.snapshot()
    }
}
