//! # `wifi-netif`
//! This is the network interface layer between the packet interface of a Wi-Fi firmware and a
//! host IP stack. It's `no_std`, but requires an allocator for network buffers.
//! ## Overview
//! This chapter gives a short overview of how frames move through the adapter.
//!
//! ### Receive (RX)
//! The firmware writes received frames into a fixed ring of buffers, the [RxRing]. Every slot
//! is either vacant, owned by the firmware (an empty buffer is attached) or owned by the host (a
//! frame was written). After placing a frame, the firmware notifies the [RxReadySignal], on
//! which the RX task waits in [WifiNetif::run_rx]. The task then takes all ready buffers out of
//! the ring, classifies them and replenishes the ring afterwards. A buffer taken out of the
//! ring is never handed back to the firmware, instead a fresh one is allocated, since the stack
//! may still hold on to the old one.
//!
//! Every buffer starts with the interface header and the [RxPd]. Depending on the packet type
//! in the descriptor, the payload is either a management frame, which goes to the
//! [ManagementSink], a single 802.3 frame or an AMSDU. 802.3 frames carrying an LLC/SNAP header
//! are converted to Ethernet II in place, by moving the addresses over the LLC header. AMSDUs
//! are split into their sub-frames. The resulting Ethernet frames are handed to the
//! [StackInterface] of the interface they were received on, unless they're EAPOL frames, which
//! go to the [EapolSink].
//!
//! ### Transmit (TX)
//! Outbound frames are classified into one of four access categories, based on the DSCP field
//! of the IP header. Control plane frames (EAPOL, ARP and DHCP) are first offered to a bypass
//! queue. Everything else needs an [OutBuffer] from the queue of its access category. If the
//! queue has no buffer available, or the firmware paused it, we retry a limited number of
//! times. Only a paused queue makes the calling task yield. Into the acquired buffer, we write
//! the interface header, the [TxPd] and then the Ethernet frame, which is either copied or
//! referenced until the firmware gathered it.
//!
//! ### Multicast
//! The hardware filters multicast frames by MAC address, but the stack subscribes to IP groups.
//! Since multiple groups can map to the same MAC address, the adapter tracks every group and only
//! removes a hardware filter, once no group maps to it anymore.

#![no_std]
#![allow(unexpected_cfgs)]
pub(crate) mod fmt;

extern crate alloc;
#[cfg(test)]
extern crate std;

mod buffer;
mod config;
mod descriptor;
mod interface;
mod multicast;
mod netif;
mod qos;
mod ring;
mod rx;
mod sync;
mod tx;

pub use buffer::{BufferAllocator, HeapAllocator, NetBuffer};
pub use config::{NetifConfig, TxPayloadMode, MGMT_PASSTHROUGH_ALL};
pub use descriptor::*;
pub use interface::{
    BindError, InterfaceBinding, InterfaceCounters, InterfaceRegistry, InterfaceStats,
    StackInterface, MAX_INTERFACES,
};
pub use multicast::{
    FilterError, GroupAddress, GroupList, MacFilterAction, McastFilterTable, MulticastRegistry,
};
pub use netif::{Firmware, WifiNetif};
pub use qos::{classify, frame_tid, is_control_plane, receiver_address, AccessCategory};
pub use ring::{Ownership, RingError, RxRing};
pub use rx::{EapolSink, Handler, ManagementSink};
pub use sync::RxReadySignal;
pub use tx::{AcquireError, OutBuffer, SubmitError, TxError, TxFirmware, TxResult};

cfg_if::cfg_if! {
    if #[cfg(feature = "critical_section")] {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

        /// Bound of everything the adapter calls into from the RX task.
        ///
        /// With `critical_section` enabled, the adapter is shared between contexts, so this
        /// requires [Sync].
        pub trait MaybeSync: Sync {}
        impl<T: Sync + ?Sized> MaybeSync for T {}
    } else {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;

        /// Bound of everything the adapter calls into from the RX task.
        ///
        /// With `critical_section` enabled, the adapter is shared between contexts, so this
        /// requires [Sync].
        pub trait MaybeSync {}
        impl<T: ?Sized> MaybeSync for T {}
    }
}
