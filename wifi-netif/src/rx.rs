//! Classification of received frames.
//!
//! Every buffer taken from the RX ring results in at most one frame per contained data unit
//! reaching the stack. Everything else is handed to one of the optional sinks or dropped and
//! counted. Nothing in here blocks or reports errors to the firmware.

use core::ops::Range;

use smoltcp::wire::{EthernetAddress, EthernetFrame, EthernetProtocol};

use crate::{
    buffer::{BufferAllocator, NetBuffer},
    config::NetifConfig,
    descriptor::{
        is_llc_snap, BssType, InterfaceHeader, RxPacketType, RxPd, ETHERTYPE_EAPOL,
        ETH_HEADER_LEN, INTF_HEADER_LEN, INTF_TYPE_DATA, LLC_SNAP_LEN,
    },
    interface::{InterfaceBinding, InterfaceCounters, InterfaceRegistry},
    MaybeSync,
};

/// Receives management frames, which never enter the data path.
pub trait ManagementSink: MaybeSync {
    /// `frame` is the complete 802.11 frame, as reported by the firmware.
    fn receive_management(&self, role: BssType, frame: &[u8]);
}
/// Receives EAPOL frames for the link security handshake.
pub trait EapolSink: MaybeSync {
    fn receive_eapol(&self, role: BssType, frame: NetBuffer);
}

/// An optional handler, that an upper layer may register and clear at runtime.
#[derive(Clone, Copy, Debug)]
pub enum Handler<T> {
    Unregistered,
    Registered(T),
}
impl<T> Handler<T> {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered(_))
    }
}
impl<T> Default for Handler<T> {
    fn default() -> Self {
        Self::Unregistered
    }
}

/// The length of the 802.11 header of management frames delivered by the firmware.
///
/// The firmware always includes the fourth address.
const MGMT_HEADER_LEN: usize = 30;
const MGMT_SUBTYPE_ACTION: u16 = 13;
const ACTION_CATEGORY_BLOCK_ACK: u8 = 3;
/// Sub-frames of an AMSDU start on a four byte boundary.
const AMSDU_SUBFRAME_ALIGNMENT: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum DropReason {
    Malformed,
    Unbound,
    UnsupportedKind,
    NotForUs,
    Filtered,
    NoSink,
    OwnSource,
    UnsupportedType,
    NoMemory,
    StackRejected,
}

/// Parse the headers in front of a received frame.
fn parse_descriptor(bytes: &[u8]) -> Option<RxPd> {
    let header = InterfaceHeader::parse(bytes)?;
    if header.kind() != INTF_TYPE_DATA {
        return None;
    }
    RxPd::parse(&bytes[INTF_HEADER_LEN..])
}
/// The location of the payload described by `rx_pd`, relative to the start of the buffer.
fn payload_window(rx_pd: &RxPd, buffer_len: usize) -> Option<Range<usize>> {
    let offset = rx_pd.pkt_offset as usize;
    let length = rx_pd.pkt_length as usize;
    if offset < RxPd::LEN || length == 0 {
        return None;
    }
    let start = INTF_HEADER_LEN + offset;
    let end = start + length;
    (end <= buffer_len).then_some(start..end)
}

/// Attribute a raw frame to the role it was received on.
pub(crate) fn frame_role(bytes: &[u8]) -> Option<BssType> {
    parse_descriptor(bytes).map(|rx_pd| rx_pd.bss_type)
}

/// Check if a source address is an echo of our own transmission.
///
/// The firmware may rewrite the locally administered bit and the OUI, so those are ignored for
/// locally administered sources.
fn is_own_source(source: EthernetAddress, own: EthernetAddress) -> bool {
    source == own || (source.is_local() && source.0[3..] == own.0[3..])
}

/// Strip the LLC/SNAP header of an 802.3 frame in place.
///
/// Moving the addresses over the header leaves the EtherType from inside the SNAP header in the
/// type field.
fn unwrap_snap(buffer: &mut NetBuffer) {
    let wrapped = buffer
        .payload()
        .get(ETH_HEADER_LEN..ETH_HEADER_LEN + LLC_SNAP_LEN)
        .is_some_and(is_llc_snap);
    if wrapped {
        buffer.remove(ETH_HEADER_LEN - 2, LLC_SNAP_LEN);
    }
}

struct AmsduSubframe<'f> {
    /// Destination and source address.
    addresses: &'f [u8],
    body: &'f [u8],
}
/// Iterates over the sub-frames of an AMSDU, until one fails the bounds checks.
struct AmsduSubframes<'f> {
    amsdu: &'f [u8],
    offset: usize,
}
impl<'f> Iterator for AmsduSubframes<'f> {
    type Item = AmsduSubframe<'f>;
    fn next(&mut self) -> Option<Self::Item> {
        let header = self.amsdu.get(self.offset..self.offset + ETH_HEADER_LEN)?;
        let length = u16::from_be_bytes([header[12], header[13]]) as usize;
        let body_start = self.offset + ETH_HEADER_LEN;
        let body = self.amsdu.get(body_start..body_start + length)?;
        self.offset = (body_start + length).next_multiple_of(AMSDU_SUBFRAME_ALIGNMENT);
        Some(AmsduSubframe {
            addresses: &header[..12],
            body,
        })
    }
}

/// Everything needed to classify received frames.
pub(crate) struct RxClassifier<'c, 'a> {
    pub config: &'c NetifConfig,
    pub registry: &'c InterfaceRegistry<'a>,
    pub management_sink: Handler<&'a dyn ManagementSink>,
    pub eapol_sink: Handler<&'a dyn EapolSink>,
    /// Counters for frames, that couldn't be attributed to an interface.
    pub unattributed: &'c InterfaceCounters,
    pub allocator: &'c dyn BufferAllocator,
}
impl RxClassifier<'_, '_> {
    /// Classify a buffer taken from the RX ring and dispatch its contents.
    pub fn process(&self, buffer: NetBuffer) {
        let reason = match parse_descriptor(buffer.payload()) {
            Some(rx_pd) => match self.registry.get(rx_pd.bss_type) {
                Some(binding) => {
                    if let Err(reason) = self.process_for(binding, &rx_pd, buffer) {
                        binding.counters().rx_drop();
                        debug!("Dropped frame for {:?}: {:?}.", rx_pd.bss_type, reason);
                    }
                    return;
                }
                None => DropReason::Unbound,
            },
            None => DropReason::Malformed,
        };
        self.unattributed.rx_drop();
        debug!("Dropped frame: {:?}.", reason);
    }
    fn process_for(
        &self,
        binding: &InterfaceBinding<'_>,
        rx_pd: &RxPd,
        mut buffer: NetBuffer,
    ) -> Result<(), DropReason> {
        let window = payload_window(rx_pd, buffer.len()).ok_or(DropReason::Malformed)?;
        self.record_signal(binding, rx_pd);
        match rx_pd.pkt_type {
            RxPacketType::Management => {
                self.process_management(binding, &buffer.payload()[window])
            }
            RxPacketType::Amsdu => self.process_amsdu(binding, &buffer.payload()[window]),
            RxPacketType::Ethernet => {
                buffer.advance(window.start);
                buffer.truncate(window.len());
                unwrap_snap(&mut buffer);
                self.dispatch(binding, buffer)
            }
            _ => Err(DropReason::UnsupportedKind),
        }
    }
    fn record_signal(&self, binding: &InterfaceBinding<'_>, rx_pd: &RxPd) {
        if matches!(binding.role(), BssType::Station | BssType::AccessPoint) {
            binding.counters().record_signal(rx_pd.snr, rx_pd.nf);
        }
    }
    /// Check if the management frame should reach the sink.
    fn passes_management_filter(&self, frame: &[u8]) -> bool {
        let frame_control = u16::from_le_bytes([frame[0], frame[1]]);
        if (frame_control >> 2) & 0b11 != 0 {
            return false;
        }
        let subtype = (frame_control >> 4) & 0xf;
        if subtype == MGMT_SUBTYPE_ACTION {
            // Block ack sessions are handled by the firmware.
            return frame.get(MGMT_HEADER_LEN) != Some(&ACTION_CATEGORY_BLOCK_ACK);
        }
        self.config.mgmt_passthrough_mask & (1 << subtype) != 0
    }
    fn process_management(
        &self,
        binding: &InterfaceBinding<'_>,
        payload: &[u8],
    ) -> Result<(), DropReason> {
        let length = payload
            .get(..2)
            .map(|length| u16::from_le_bytes([length[0], length[1]]) as usize)
            .ok_or(DropReason::Malformed)?;
        let frame = payload
            .get(2..2 + length)
            .filter(|frame| frame.len() >= MGMT_HEADER_LEN)
            .ok_or(DropReason::Malformed)?;
        if !self.passes_management_filter(frame) {
            return Err(DropReason::Filtered);
        }
        match self.management_sink {
            Handler::Registered(sink) => {
                trace!("Management frame of {} bytes to sink.", frame.len());
                sink.receive_management(binding.role(), frame);
                Ok(())
            }
            Handler::Unregistered => Err(DropReason::NoSink),
        }
    }
    fn process_amsdu(
        &self,
        binding: &InterfaceBinding<'_>,
        amsdu: &[u8],
    ) -> Result<(), DropReason> {
        let destination = amsdu
            .get(..6)
            .map(EthernetAddress::from_bytes)
            .ok_or(DropReason::Malformed)?;
        if !destination.is_multicast() && destination != binding.hardware_address() {
            return Err(DropReason::NotForUs);
        }
        let subframes = AmsduSubframes {
            amsdu,
            offset: 0,
        };
        for subframe in subframes {
            if let Err(reason) = self.process_subframe(binding, subframe) {
                binding.counters().rx_drop();
                debug!("Dropped AMSDU sub-frame: {:?}.", reason);
            }
        }
        Ok(())
    }
    fn process_subframe(
        &self,
        binding: &InterfaceBinding<'_>,
        subframe: AmsduSubframe<'_>,
    ) -> Result<(), DropReason> {
        if subframe.body.len() < LLC_SNAP_LEN || !is_llc_snap(subframe.body) {
            return Err(DropReason::UnsupportedType);
        }
        let (snap, data) = subframe.body.split_at(LLC_SNAP_LEN);
        let mut frame = self
            .allocator
            .allocate(ETH_HEADER_LEN + data.len())
            .ok_or(DropReason::NoMemory)?;
        if !(frame.append(subframe.addresses) && frame.append(&snap[6..]) && frame.append(data)) {
            return Err(DropReason::NoMemory);
        }
        self.dispatch(binding, frame)
    }
    /// Route an Ethernet frame by its EtherType.
    fn dispatch(&self, binding: &InterfaceBinding<'_>, frame: NetBuffer) -> Result<(), DropReason> {
        let (source, ethertype) = {
            let ethernet =
                EthernetFrame::new_checked(frame.payload()).map_err(|_| DropReason::Malformed)?;
            (ethernet.src_addr(), ethernet.ethertype())
        };
        if self.config.filter_own_source && is_own_source(source, binding.hardware_address()) {
            return Err(DropReason::OwnSource);
        }
        match ethertype {
            EthernetProtocol::Ipv4 | EthernetProtocol::Ipv6 | EthernetProtocol::Arp => {
                self.input_to_stack(binding, frame)
            }
            EthernetProtocol::Unknown(ETHERTYPE_EAPOL) => match self.eapol_sink {
                Handler::Registered(sink) => {
                    binding.counters().rx_packet();
                    sink.receive_eapol(binding.role(), frame);
                    Ok(())
                }
                Handler::Unregistered => Err(DropReason::NoSink),
            },
            _ => Err(DropReason::UnsupportedType),
        }
    }
    fn input_to_stack(
        &self,
        binding: &InterfaceBinding<'_>,
        mut frame: NetBuffer,
    ) -> Result<(), DropReason> {
        for attempt in 0..=self.config.stack_input_retries {
            trace!("Stack input of {} bytes, attempt {}.", frame.len(), attempt);
            match binding.stack().input(frame) {
                Ok(()) => {
                    binding.counters().rx_packet();
                    return Ok(());
                }
                Err(rejected) => frame = rejected,
            }
        }
        Err(DropReason::StackRejected)
    }
}
