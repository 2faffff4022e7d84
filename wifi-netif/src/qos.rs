use macro_bits::serializable_enum;
use smoltcp::wire::{EthernetAddress, EthernetProtocol};

use crate::descriptor::{ETHERTYPE_EAPOL, ETH_HEADER_LEN};

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// A WMM access category, which selects the hardware output queue.
    pub enum AccessCategory: u8 {
        Background => 0,
        #[default]
        BestEffort => 1,
        Video => 2,
        Voice => 3
    }
}
impl AccessCategory {
    /// All categories, in queue index order.
    pub const ALL: [Self; 4] = [
        Self::Background,
        Self::BestEffort,
        Self::Video,
        Self::Voice,
    ];
    /// Map a traffic identifier (802.1D user priority) to its access category.
    pub const fn from_tid(tid: u8) -> Self {
        match tid {
            1 | 2 => Self::Background,
            4 | 5 => Self::Video,
            6 | 7 => Self::Voice,
            _ => Self::BestEffort,
        }
    }
}

const IPV4_TOS_OFFSET: usize = ETH_HEADER_LEN + 1;
const IPV6_TRAFFIC_CLASS_MASK: u16 = 0x0ff0;
/// The eight DSCP/TOS values sharing a user priority.
const PRIORITY_DIVISOR: u8 = 0x20;

const DHCP_MAGIC_COOKIE_OFFSET: usize = 278;
const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

fn ethertype(frame: &[u8]) -> Option<u16> {
    Some(u16::from_be_bytes(frame.get(12..14)?.try_into().ok()?))
}

/// Extract the traffic identifier from the IP header of an Ethernet frame.
///
/// Returns [None] for non-IP frames.
pub fn frame_tid(frame: &[u8]) -> Option<u8> {
    let ethertype = EthernetProtocol::from(ethertype(frame)?);
    match ethertype {
        EthernetProtocol::Ipv4 => Some(*frame.get(IPV4_TOS_OFFSET)? / PRIORITY_DIVISOR),
        EthernetProtocol::Ipv6 => {
            let bytes = frame.get(ETH_HEADER_LEN..ETH_HEADER_LEN + 2)?;
            let traffic_class =
                (u16::from_be_bytes([bytes[0], bytes[1]]) & IPV6_TRAFFIC_CLASS_MASK) >> 4;
            Some(traffic_class as u8 / PRIORITY_DIVISOR)
        }
        _ => None,
    }
}

/// Classify an outbound Ethernet frame.
///
/// Frames without an IP priority marking end up in [AccessCategory::BestEffort] with TID 0.
pub fn classify(frame: &[u8]) -> (AccessCategory, u8) {
    match frame_tid(frame) {
        Some(tid) => (AccessCategory::from_tid(tid), tid),
        None => (AccessCategory::BestEffort, 0),
    }
}

/// The receiver address used for queue selection.
///
/// Group addressed frames are queued for the broadcast address, everything else for its
/// destination.
pub fn receiver_address(frame: &[u8]) -> EthernetAddress {
    match frame.get(..6) {
        Some(destination) if destination[0] & 0x01 == 0 => EthernetAddress::from_bytes(destination),
        _ => EthernetAddress::BROADCAST,
    }
}

/// Check if the frame is control plane traffic, which is eligible for the bypass queue.
///
/// These are EAPOL, ARP and DHCP frames.
pub fn is_control_plane(frame: &[u8]) -> bool {
    match ethertype(frame) {
        Some(ETHERTYPE_EAPOL) => true,
        Some(ethertype) if EthernetProtocol::from(ethertype) == EthernetProtocol::Arp => true,
        _ => frame
            .get(DHCP_MAGIC_COOKIE_OFFSET..DHCP_MAGIC_COOKIE_OFFSET + 4)
            .is_some_and(|cookie| cookie == DHCP_MAGIC_COOKIE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_frame(tos: u8) -> [u8; 34] {
        let mut frame = [0u8; 34];
        frame[12..14].copy_from_slice(&[0x08, 0x00]);
        frame[14] = 0x45;
        frame[15] = tos;
        frame
    }

    #[test]
    fn tid_to_access_category() {
        let expected = [
            AccessCategory::BestEffort,
            AccessCategory::Background,
            AccessCategory::Background,
            AccessCategory::BestEffort,
            AccessCategory::Video,
            AccessCategory::Video,
            AccessCategory::Voice,
            AccessCategory::Voice,
        ];
        for (tid, access_category) in expected.into_iter().enumerate() {
            assert_eq!(AccessCategory::from_tid(tid as u8), access_category);
        }
    }

    #[test]
    fn ipv4_tos_classification() {
        // DSCP EF (46) is TOS 0xb8, which is user priority 5.
        assert_eq!(classify(&ipv4_frame(0xb8)), (AccessCategory::Video, 5));
        assert_eq!(classify(&ipv4_frame(0xe0)), (AccessCategory::Voice, 7));
        assert_eq!(classify(&ipv4_frame(0x20)), (AccessCategory::Background, 1));
        assert_eq!(classify(&ipv4_frame(0x00)), (AccessCategory::BestEffort, 0));
    }

    #[test]
    fn ipv6_traffic_class_classification() {
        let mut frame = [0u8; 54];
        frame[12..14].copy_from_slice(&[0x86, 0xdd]);
        // Version 6, traffic class 0xc0.
        frame[14] = 0x6c;
        frame[15] = 0x00;
        assert_eq!(classify(&frame), (AccessCategory::Voice, 6));
    }

    #[test]
    fn non_ip_defaults_to_best_effort() {
        let mut frame = [0u8; 42];
        frame[12..14].copy_from_slice(&[0x08, 0x06]);
        assert_eq!(frame_tid(&frame), None);
        assert_eq!(classify(&frame), (AccessCategory::BestEffort, 0));
        assert_eq!(classify(&[0u8; 4]), (AccessCategory::BestEffort, 0));
    }

    #[test]
    fn group_destinations_use_broadcast() {
        let mut frame = ipv4_frame(0);
        frame[..6].copy_from_slice(&[0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb]);
        assert_eq!(receiver_address(&frame), EthernetAddress::BROADCAST);
        frame[..6].copy_from_slice(&[0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(
            receiver_address(&frame),
            EthernetAddress([0x02, 0x11, 0x22, 0x33, 0x44, 0x55])
        );
    }

    #[test]
    fn control_plane_detection() {
        let mut frame = [0u8; 300];
        frame[12..14].copy_from_slice(&ETHERTYPE_EAPOL.to_be_bytes());
        assert!(is_control_plane(&frame));
        frame[12..14].copy_from_slice(&[0x08, 0x06]);
        assert!(is_control_plane(&frame));
        frame[12..14].copy_from_slice(&[0x08, 0x00]);
        assert!(!is_control_plane(&frame));
        frame[DHCP_MAGIC_COOKIE_OFFSET..DHCP_MAGIC_COOKIE_OFFSET + 4]
            .copy_from_slice(&DHCP_MAGIC_COOKIE);
        assert!(is_control_plane(&frame));
    }
}
