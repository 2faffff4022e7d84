//! Wire formats of the headers exchanged with the firmware.
//!
//! Every buffer crossing the firmware boundary starts with an [InterfaceHeader], followed by
//! either an [RxPd] (receive) or a [TxPd] (transmit). All multi-byte fields are little endian.

use alloc::{vec, vec::Vec};

use bitfield_struct::bitfield;
use macro_bits::serializable_enum;

/// Length of the [InterfaceHeader].
pub const INTF_HEADER_LEN: usize = 4;
/// Length of an Ethernet II header.
pub const ETH_HEADER_LEN: usize = 14;
/// Length of an 802.2 LLC header carrying a SNAP extension.
pub const LLC_SNAP_LEN: usize = 8;
/// The RFC 1042 encapsulation signature: DSAP, SSAP, control and a zero OUI.
pub const LLC_SNAP_SIGNATURE: [u8; 6] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00];
/// The EtherType of EAPOL frames, which isn't known to the IP stack.
pub const ETHERTYPE_EAPOL: u16 = 0x888e;
/// Interface header type of data packets.
pub const INTF_TYPE_DATA: u16 = 0;

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
/// The header prepended to every buffer by the bus layer.
pub struct InterfaceHeader {
    /// Total length of the packet including this header.
    #[bits(16)]
    pub length: u16,
    #[bits(16)]
    pub kind: u16,
}
impl InterfaceHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..INTF_HEADER_LEN)?;
        Some(Self::from_bits(u32::from_le_bytes(bytes.try_into().ok()?)))
    }
    pub fn write(&self, dst: &mut [u8]) {
        dst[..INTF_HEADER_LEN].copy_from_slice(&self.into_bits().to_le_bytes());
    }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
/// Rate information reported for a received frame.
pub struct RateInfo {
    /// Legacy = 0, HT = 1, VHT = 2.
    #[bits(2)]
    pub format: u8,
    /// 20 MHz = 0, 40 MHz = 1, 80 MHz = 2, 160 MHz = 3.
    #[bits(2)]
    pub bandwidth: u8,
    pub short_gi: bool,
    pub stbc: bool,
    pub ldpc: bool,
    #[bits(1)]
    __: u8,
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The kind of payload the firmware delivered.
    pub enum RxPacketType: u16 {
        /// A single 802.3 frame, possibly still wrapped in LLC/SNAP.
        Ethernet => 0x00,
        /// A raw 802.11 frame, only delivered in monitor mode.
        Ieee80211 => 0x05,
        /// A management frame, prefixed by its length.
        Management => 0xe5,
        /// An aggregate of 802.3 sub-frames.
        Amsdu => 0xe6,
        /// A block ack request.
        BlockAckRequest => 0xe7
    }
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The role of a logical interface, as identified on the wire.
    pub enum BssType: u8 {
        Station => 0,
        AccessPoint => 1,
        WifiDirect => 2
    }
}
impl BssType {
    /// Returns the registry index for this role, if it's a known role.
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::Station => Some(0),
            Self::AccessPoint => Some(1),
            Self::WifiDirect => Some(2),
            _ => None,
        }
    }
}

/// The receive packet descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxPd {
    pub bss_type: BssType,
    pub bss_num: u8,
    /// Length of the payload.
    pub pkt_length: u16,
    /// Offset of the payload from the start of the descriptor.
    pub pkt_offset: u16,
    pub pkt_type: RxPacketType,
    pub seq_num: u16,
    pub priority: u8,
    pub rx_rate: u8,
    pub snr: i8,
    /// The noise floor.
    pub nf: i8,
    pub rate_info: RateInfo,
    pub flags: u8,
    pub antenna: u8,
    pub band_config: u8,
    pub chan_num: u8,
}
impl RxPd {
    pub const LEN: usize = 38;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::LEN)?;
        let u16_at = |offset: usize| u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
        Some(Self {
            bss_type: BssType::from_bits(bytes[0]),
            bss_num: bytes[1],
            pkt_length: u16_at(2),
            pkt_offset: u16_at(4),
            pkt_type: RxPacketType::from_bits(u16_at(6)),
            seq_num: u16_at(8),
            priority: bytes[10],
            rx_rate: bytes[11],
            snr: bytes[12] as i8,
            nf: bytes[13] as i8,
            rate_info: RateInfo::from_bits(bytes[14]),
            flags: bytes[18],
            antenna: bytes[19],
            band_config: bytes[28],
            chan_num: bytes[29],
        })
    }
    /// Serialize the descriptor into the first [RxPd::LEN] bytes of `dst`.
    ///
    /// The firmware does this on the device, but it's required to simulate it.
    pub fn write(&self, dst: &mut [u8]) {
        let dst = &mut dst[..Self::LEN];
        dst.fill(0);
        dst[0] = self.bss_type.into_bits();
        dst[1] = self.bss_num;
        dst[2..4].copy_from_slice(&self.pkt_length.to_le_bytes());
        dst[4..6].copy_from_slice(&self.pkt_offset.to_le_bytes());
        dst[6..8].copy_from_slice(&self.pkt_type.into_bits().to_le_bytes());
        dst[8..10].copy_from_slice(&self.seq_num.to_le_bytes());
        dst[10] = self.priority;
        dst[11] = self.rx_rate;
        dst[12] = self.snr as u8;
        dst[13] = self.nf as u8;
        dst[14] = self.rate_info.into_bits();
        dst[18] = self.flags;
        dst[19] = self.antenna;
        dst[28] = self.band_config;
        dst[29] = self.chan_num;
    }
    /// A descriptor for a payload directly following it.
    pub fn new(bss_type: BssType, pkt_type: RxPacketType, pkt_length: u16) -> Self {
        Self {
            bss_type,
            bss_num: 0,
            pkt_length,
            pkt_offset: Self::LEN as u16,
            pkt_type,
            seq_num: 0,
            priority: 0,
            rx_rate: 0,
            snr: 0,
            nf: 0,
            rate_info: RateInfo::new(),
            flags: 0,
            antenna: 0,
            band_config: 0,
            chan_num: 0,
        }
    }
}

/// The transmit packet descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxPd {
    pub bss_type: BssType,
    pub bss_num: u8,
    /// Length of the frame following the descriptor.
    pub pkt_length: u16,
    pub pkt_offset: u16,
    pub pkt_type: u16,
    pub tx_control: u32,
    /// The TID of the frame.
    pub priority: u8,
    pub flags: u8,
}
impl TxPd {
    pub const LEN: usize = 22;

    pub fn new(bss_type: BssType, pkt_length: u16, priority: u8) -> Self {
        Self {
            bss_type,
            bss_num: 0,
            pkt_length,
            pkt_offset: Self::LEN as u16,
            pkt_type: 0,
            tx_control: 0,
            priority,
            flags: 0,
        }
    }
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::LEN)?;
        let u16_at = |offset: usize| u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
        Some(Self {
            bss_type: BssType::from_bits(bytes[0]),
            bss_num: bytes[1],
            pkt_length: u16_at(2),
            pkt_offset: u16_at(4),
            pkt_type: u16_at(6),
            tx_control: u32::from_le_bytes(bytes[8..12].try_into().ok()?),
            priority: bytes[12],
            flags: bytes[13],
        })
    }
    pub fn write(&self, dst: &mut [u8]) {
        let dst = &mut dst[..Self::LEN];
        dst.fill(0);
        dst[0] = self.bss_type.into_bits();
        dst[1] = self.bss_num;
        dst[2..4].copy_from_slice(&self.pkt_length.to_le_bytes());
        dst[4..6].copy_from_slice(&self.pkt_offset.to_le_bytes());
        dst[6..8].copy_from_slice(&self.pkt_type.to_le_bytes());
        dst[8..12].copy_from_slice(&self.tx_control.to_le_bytes());
        dst[12] = self.priority;
        dst[13] = self.flags;
    }
}

/// Check if `bytes` start with the LLC/SNAP signature.
pub fn is_llc_snap(bytes: &[u8]) -> bool {
    bytes.starts_with(&LLC_SNAP_SIGNATURE)
}

/// Lay out a received frame, like the firmware does before handing it to the host.
///
/// This is mostly useful for simulating the firmware.
pub fn compose_rx_frame(bss_type: BssType, pkt_type: RxPacketType, payload: &[u8]) -> Vec<u8> {
    let total_length = INTF_HEADER_LEN + RxPd::LEN + payload.len();
    let mut frame = vec![0u8; total_length];
    InterfaceHeader::new()
        .with_length(total_length as u16)
        .with_kind(INTF_TYPE_DATA)
        .write(&mut frame);
    RxPd::new(bss_type, pkt_type, payload.len() as u16).write(&mut frame[INTF_HEADER_LEN..]);
    frame[INTF_HEADER_LEN + RxPd::LEN..].copy_from_slice(payload);
    frame
}
