//! Membership view of a vault: which peers it knows and which close groups it belongs to.

use crate::messages::PeerInfo;
use crate::xor_name::XorName;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Number of vaults jointly responsible for a data name.
pub const DEFAULT_GROUP_SIZE: usize = 8;

#[derive(Debug, Clone)]
struct PeerState {
    info: PeerInfo,
    last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    our_info: PeerInfo,
    group_size: usize,
    peers: HashMap<XorName, PeerState>,
}

impl RoutingTable {
    pub fn new(our_info: PeerInfo, group_size: usize) -> Self {
        Self {
            our_info,
            group_size: group_size.max(1),
            peers: HashMap::new(),
        }
    }

    pub fn our_name(&self) -> XorName {
        self.our_info.name
    }

    pub fn our_info(&self) -> &PeerInfo {
        &self.our_info
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Number of known peers, not counting ourselves.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Adds a peer. Returns `true` if it was not known before.
    pub fn add_peer(&mut self, info: PeerInfo) -> bool {
        if info.name == self.our_info.name {
            return false;
        }
        let now = Instant::now();
        match self.peers.get_mut(&info.name) {
            Some(state) => {
                state.info.address = info.address;
                state.last_seen = now;
                false
            }
            None => {
                let _ = self.peers.insert(
                    info.name,
                    PeerState {
                        info,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    pub fn remove_peer(&mut self, name: &XorName) -> Option<PeerInfo> {
        self.peers.remove(name).map(|state| state.info)
    }

    /// Records that we heard from `name`. Returns `false` for unknown peers.
    pub fn touch(&mut self, name: &XorName) -> bool {
        match self.peers.get_mut(name) {
            Some(state) => {
                state.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &XorName) -> bool {
        self.peers.contains_key(name)
    }

    pub fn peer_address(&self, name: &XorName) -> Option<&str> {
        self.peers.get(name).map(|state| state.info.address.as_str())
    }

    /// Known peers sorted by name.
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.values().map(|state| state.info.clone()).collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        peers
    }

    /// Up to `count` names closest to `target`, ourselves included, nearest first.
    pub fn closest_names(&self, target: &XorName, count: usize) -> Vec<XorName> {
        let mut names: Vec<XorName> = self
            .peers
            .keys()
            .copied()
            .chain(std::iter::once(self.our_info.name))
            .collect();
        names.sort_by(|lhs, rhs| target.cmp_distance(lhs, rhs));
        names.truncate(count);
        names
    }

    /// The close group of `target` if we are a member of it.
    pub fn close_group(&self, target: &XorName) -> Option<Vec<XorName>> {
        let group = self.closest_names(target, self.group_size);
        if group.contains(&self.our_info.name) {
            Some(group)
        } else {
            None
        }
    }

    pub fn is_closest(&self, target: &XorName) -> bool {
        self.close_group(target).is_some()
    }

    /// The other members of `target`'s close group, if we are a member of it.
    pub fn other_closest_names(&self, target: &XorName) -> Option<Vec<XorName>> {
        let our_name = self.our_info.name;
        self.close_group(target)
            .map(|group| group.into_iter().filter(|name| *name != our_name).collect())
    }

    /// Majority of the close group of `target`.
    pub fn group_quorum(&self, target: &XorName) -> usize {
        self.closest_names(target, self.group_size).len() / 2 + 1
    }

    /// Majority of the close group of `target` excluding ourselves, at least one.
    pub fn refresh_quorum(&self, target: &XorName) -> usize {
        let others = self
            .closest_names(target, self.group_size)
            .len()
            .saturating_sub(1);
        others / 2 + 1
    }

    /// Peers we have not heard from within `timeout`.
    pub fn expired_peers(&self, timeout: Duration) -> Vec<XorName> {
        let now = Instant::now();
        self.peers
            .values()
            .filter(|state| now.duration_since(state.last_seen) > timeout)
            .map(|state| state.info.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(byte: u8) -> PeerInfo {
        let mut name = [0u8; 32];
        name[0] = byte;
        PeerInfo {
            name: XorName(name),
            address: format!("10.0.0.{}:5100", byte),
        }
    }

    fn table_with(our: u8, peers: &[u8], group_size: usize) -> RoutingTable {
        let mut table = RoutingTable::new(info(our), group_size);
        for peer in peers {
            assert!(table.add_peer(info(*peer)));
        }
        table
    }

    #[test]
    fn test_add_and_remove_peers() {
        let mut table = RoutingTable::new(info(1), 4);
        assert!(!table.add_peer(info(1)));
        assert!(table.add_peer(info(2)));
        assert!(!table.add_peer(PeerInfo {
            address: "10.9.9.9:5100".to_string(),
            ..info(2)
        }));
        assert_eq!(table.len(), 1);
        assert_eq!(table.peer_address(&info(2).name), Some("10.9.9.9:5100"));
        assert_eq!(table.remove_peer(&info(2).name).map(|p| p.name), Some(info(2).name));
        assert!(table.is_empty());
        assert!(!table.touch(&info(2).name));
    }

    #[test]
    fn test_closest_names_sorted_by_distance() {
        let table = table_with(0b0000_0001, &[0b1000_0000, 0b0000_0011, 0b0100_0000], 2);
        let target = info(0).name;
        let closest = table.closest_names(&target, 3);
        assert_eq!(
            closest,
            vec![info(0b0000_0001).name, info(0b0000_0011).name, info(0b0100_0000).name]
        );
    }

    #[test]
    fn test_close_group_membership() {
        let table = table_with(0b1111_0000, &[0b0000_0001, 0b0000_0010, 0b0000_0100], 2);
        let near_us = info(0b1111_0001).name;
        let far_from_us = info(0).name;

        let group = table.close_group(&near_us).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group[0], table.our_name());
        assert_eq!(table.other_closest_names(&near_us).unwrap().len(), 1);

        assert!(table.close_group(&far_from_us).is_none());
        assert!(!table.is_closest(&far_from_us));
    }

    #[test]
    fn test_quorums() {
        let small = table_with(1, &[2], 8);
        assert_eq!(small.group_quorum(&info(0).name), 2);
        assert_eq!(small.refresh_quorum(&info(0).name), 1);

        let full = table_with(1, &[2, 3, 4, 5, 6, 7, 8, 9, 10], 8);
        assert_eq!(full.group_quorum(&info(0).name), 5);
        assert_eq!(full.refresh_quorum(&info(0).name), 4);

        let alone = RoutingTable::new(info(1), 8);
        assert_eq!(alone.group_quorum(&info(0).name), 1);
        assert_eq!(alone.refresh_quorum(&info(0).name), 1);
    }

    #[test]
    fn test_expired_peers() {
        let table = table_with(1, &[2, 3], 8);
        assert!(table.expired_peers(Duration::from_secs(60)).is_empty());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(table.expired_peers(Duration::ZERO).len(), 2);
    }
}
