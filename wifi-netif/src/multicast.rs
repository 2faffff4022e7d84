//! Multicast group bookkeeping for the hardware address filter.
//!
//! The IP stack reports group membership changes per group address, but the hardware filters
//! on MAC addresses. The mapping from group to MAC address is lossy (32 IPv4 groups share each
//! MAC address), so the filter for a MAC address must stay installed, as long as any tracked
//! group maps to it.

use alloc::vec::Vec;

use smoltcp::wire::{EthernetAddress, Ipv4Address, Ipv6Address};

/// The hardware multicast address filter.
pub trait McastFilterTable {
    /// Install a filter for `address`.
    ///
    /// Returns [FilterError::AlreadyPresent], if the filter is already installed.
    fn add_mcast_filter(&self, address: EthernetAddress) -> Result<(), FilterError>;
    fn remove_mcast_filter(&self, address: EthernetAddress) -> Result<(), FilterError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterError {
    /// The filter couldn't be updated.
    Interface,
    /// The address isn't a multicast group address.
    NotMulticast,
    /// The hardware already has a filter for this address.
    AlreadyPresent,
}

/// What the stack wants done with a group filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacFilterAction {
    Add,
    Remove,
}

/// A multicast group address of some address family.
pub trait GroupAddress: Copy + PartialEq {
    fn is_group(&self) -> bool;
    /// The MAC address frames for this group are sent to.
    fn hardware_address(&self) -> EthernetAddress;
}
impl GroupAddress for Ipv4Address {
    fn is_group(&self) -> bool {
        self.is_multicast()
    }
    /// RFC 1112 section 6.4: the low 23 bits of the group appended to 01:00:5e.
    fn hardware_address(&self) -> EthernetAddress {
        let group = self.0;
        EthernetAddress([0x01, 0x00, 0x5e, group[1] & 0x7f, group[2], group[3]])
    }
}
impl GroupAddress for Ipv6Address {
    fn is_group(&self) -> bool {
        self.is_multicast()
    }
    /// RFC 2464 section 7: the low 32 bits of the group appended to 33:33.
    fn hardware_address(&self) -> EthernetAddress {
        let group = self.0;
        EthernetAddress([0x33, 0x33, group[12], group[13], group[14], group[15]])
    }
}

/// The tracked groups of one address family.
pub struct GroupList<A> {
    groups: Vec<A>,
}
impl<A: GroupAddress> GroupList<A> {
    pub const fn new() -> Self {
        Self { groups: Vec::new() }
    }
    pub fn len(&self) -> usize {
        self.groups.len()
    }
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
    pub fn contains(&self, group: &A) -> bool {
        self.groups.contains(group)
    }
    pub fn iter(&self) -> impl Iterator<Item = &A> + '_ {
        self.groups.iter()
    }
    fn maps_to(&self, hardware_address: EthernetAddress) -> bool {
        self.groups
            .iter()
            .any(|group| group.hardware_address() == hardware_address)
    }
    /// Start tracking `group` and make sure its hardware filter is installed.
    pub fn join(
        &mut self,
        group: A,
        table: &(impl McastFilterTable + ?Sized),
    ) -> Result<(), FilterError> {
        if !group.is_group() {
            return Err(FilterError::NotMulticast);
        }
        if self.contains(&group) {
            return Ok(());
        }
        let hardware_address = group.hardware_address();
        // Another group already holds the filter for this MAC address.
        let shared = self.maps_to(hardware_address);
        self.groups
            .try_reserve(1)
            .map_err(|_| FilterError::Interface)?;
        self.groups.push(group);
        if shared {
            return Ok(());
        }
        match table.add_mcast_filter(hardware_address) {
            Ok(()) | Err(FilterError::AlreadyPresent) => Ok(()),
            Err(_) => {
                warn!("Installing a multicast filter failed.");
                self.groups.pop();
                Err(FilterError::Interface)
            }
        }
    }
    /// Stop tracking `group` and uninstall its hardware filter, unless another group still maps
    /// to it.
    pub fn leave(
        &mut self,
        group: A,
        table: &(impl McastFilterTable + ?Sized),
    ) -> Result<(), FilterError> {
        let Some(position) = self.groups.iter().position(|tracked| *tracked == group) else {
            return Ok(());
        };
        self.groups.swap_remove(position);
        let hardware_address = group.hardware_address();
        if self.maps_to(hardware_address) {
            return Ok(());
        }
        table.remove_mcast_filter(hardware_address).map_err(|_| {
            warn!("Removing a multicast filter failed.");
            FilterError::Interface
        })
    }
    /// Apply a filter action reported by the stack.
    pub fn apply(
        &mut self,
        group: A,
        action: MacFilterAction,
        table: &(impl McastFilterTable + ?Sized),
    ) -> Result<(), FilterError> {
        match action {
            MacFilterAction::Add => self.join(group, table),
            MacFilterAction::Remove => self.leave(group, table),
        }
    }
}
impl<A: GroupAddress> Default for GroupList<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// The IGMP and MLD group lists of an adapter.
#[derive(Default)]
pub struct MulticastRegistry {
    pub ipv4: GroupList<Ipv4Address>,
    pub ipv6: GroupList<Ipv6Address>,
}
impl MulticastRegistry {
    pub const fn new() -> Self {
        Self {
            ipv4: GroupList::new(),
            ipv6: GroupList::new(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    /// A filter table, which records every operation.
    #[derive(Default)]
    pub(crate) struct RecordingTable {
        pub installed: RefCell<Vec<EthernetAddress>>,
        pub adds: RefCell<usize>,
        pub fail_adds: bool,
    }
    impl McastFilterTable for RecordingTable {
        fn add_mcast_filter(&self, address: EthernetAddress) -> Result<(), FilterError> {
            *self.adds.borrow_mut() += 1;
            if self.fail_adds {
                return Err(FilterError::Interface);
            }
            let mut installed = self.installed.borrow_mut();
            if installed.contains(&address) {
                return Err(FilterError::AlreadyPresent);
            }
            installed.push(address);
            Ok(())
        }
        fn remove_mcast_filter(&self, address: EthernetAddress) -> Result<(), FilterError> {
            let mut installed = self.installed.borrow_mut();
            let position = installed
                .iter()
                .position(|installed| *installed == address)
                .ok_or(FilterError::Interface)?;
            installed.remove(position);
            Ok(())
        }
    }

    #[test]
    fn ipv4_derivation() {
        assert_eq!(
            Ipv4Address::new(224, 0, 0, 251).hardware_address(),
            EthernetAddress([0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb])
        );
        // The high bit of the second octet is lost.
        assert_eq!(
            Ipv4Address::new(239, 129, 2, 3).hardware_address(),
            Ipv4Address::new(224, 1, 2, 3).hardware_address()
        );
    }

    #[test]
    fn ipv6_derivation() {
        assert_eq!(
            Ipv6Address::LINK_LOCAL_ALL_NODES.hardware_address(),
            EthernetAddress([0x33, 0x33, 0x00, 0x00, 0x00, 0x01])
        );
    }

    #[test]
    fn join_leave_round_trip() {
        let table = RecordingTable::default();
        let mut groups = GroupList::new();
        let group = Ipv4Address::new(239, 1, 1, 1);
        groups.join(group, &table).unwrap();
        assert_eq!(table.installed.borrow().len(), 1);
        groups.leave(group, &table).unwrap();
        assert!(groups.is_empty());
        assert!(table.installed.borrow().is_empty());
    }

    #[test]
    fn colliding_groups_share_a_filter() {
        let table = RecordingTable::default();
        let mut groups = GroupList::new();
        let first = Ipv4Address::new(224, 1, 2, 3);
        let second = Ipv4Address::new(239, 129, 2, 3);
        groups.join(first, &table).unwrap();
        groups.join(second, &table).unwrap();
        assert_eq!(*table.adds.borrow(), 1);
        assert_eq!(groups.len(), 2);

        groups.leave(first, &table).unwrap();
        assert_eq!(
            table.installed.borrow().as_slice(),
            &[second.hardware_address()]
        );
        groups.leave(second, &table).unwrap();
        assert!(table.installed.borrow().is_empty());
    }

    #[test]
    fn duplicate_join_is_a_no_op() {
        let table = RecordingTable::default();
        let mut groups = GroupList::new();
        let group = Ipv6Address::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);
        groups.join(group, &table).unwrap();
        groups.join(group, &table).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(*table.adds.borrow(), 1);
    }

    #[test]
    fn already_present_counts_as_success() {
        let table = RecordingTable::default();
        let group = Ipv4Address::new(224, 0, 0, 1);
        table
            .installed
            .borrow_mut()
            .push(group.hardware_address());
        let mut groups = GroupList::new();
        assert_eq!(groups.join(group, &table), Ok(()));
        assert!(groups.contains(&group));
    }

    #[test]
    fn failed_install_rolls_back() {
        let table = RecordingTable {
            fail_adds: true,
            ..Default::default()
        };
        let mut groups = GroupList::new();
        assert_eq!(
            groups.join(Ipv4Address::new(224, 0, 0, 9), &table),
            Err(FilterError::Interface)
        );
        assert!(groups.is_empty());
    }

    #[test]
    fn unicast_and_untracked_groups() {
        let table = RecordingTable::default();
        let mut groups = GroupList::new();
        assert_eq!(
            groups.join(Ipv4Address::new(10, 0, 0, 1), &table),
            Err(FilterError::NotMulticast)
        );
        assert_eq!(
            groups.apply(Ipv4Address::new(224, 0, 0, 5), MacFilterAction::Remove, &table),
            Ok(())
        );
        assert_eq!(*table.adds.borrow(), 0);
    }
}
