//! Connection registry.

use std::collections::HashSet;
use std::sync::Arc;

use crate::peer::{ConnectionDirection, HandleId, PeerAddr, PeerConnection, PeerId};

/// Tracks inbound and outbound connections.
///
/// Insertion does no deduplication; [`ConnectionRegistry::list`] applies it
/// when enumerating, so racing accept/dial pairs to the same peer are both
/// kept until one of them closes.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Accepted connections, in accept order.
    inbound: Vec<Arc<PeerConnection>>,
    /// Dialed connections, in dial order.
    outbound: Vec<Arc<PeerConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection.
    pub fn add(&mut self, direction: ConnectionDirection, conn: Arc<PeerConnection>) {
        match direction {
            ConnectionDirection::Inbound => self.inbound.push(conn),
            ConnectionDirection::Outbound => self.outbound.push(conn),
        }
    }

    /// Stop tracking a connection, whichever list holds it.
    ///
    /// Returns whether anything was removed.
    pub fn remove(&mut self, conn: &PeerConnection) -> bool {
        self.remove_by_id(conn.id())
    }

    /// Stop tracking the connection with this id.
    pub fn remove_by_id(&mut self, id: PeerId) -> bool {
        let before = self.inbound.len() + self.outbound.len();
        self.inbound.retain(|c| c.id() != id);
        self.outbound.retain(|c| c.id() != id);
        before != self.inbound.len() + self.outbound.len()
    }

    /// Look up a connection by id.
    pub fn get(&self, id: PeerId) -> Option<Arc<PeerConnection>> {
        self.inbound
            .iter()
            .chain(self.outbound.iter())
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Deduplicated enumeration: inbound then outbound, first seen wins.
    ///
    /// A connection is dropped when its `host:port` was already seen, or when
    /// its handle id was already seen.
    pub fn list(&self) -> Vec<Arc<PeerConnection>> {
        let mut seen_handles: HashSet<HandleId> = HashSet::new();
        let mut seen_addrs: HashSet<PeerAddr> = HashSet::new();

        self.inbound
            .iter()
            .chain(self.outbound.iter())
            .filter(|conn| {
                if let Some(handle) = conn.handle() {
                    if !seen_handles.insert(handle) {
                        return false;
                    }
                }
                if let Some(addr) = conn.remote() {
                    if !seen_addrs.insert(addr.clone()) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect()
    }

    /// Like [`ConnectionRegistry::list`], calling `visitor` once per entry.
    pub fn list_with<F>(&self, mut visitor: F) -> Vec<Arc<PeerConnection>>
    where
        F: FnMut(&Arc<PeerConnection>),
    {
        let everyone = self.list();
        everyone.iter().for_each(&mut visitor);
        everyone
    }

    /// Raw outbound list, connecting entries included.
    pub fn outbound(&self) -> &[Arc<PeerConnection>] {
        &self.outbound
    }

    /// Raw inbound list.
    pub fn inbound(&self) -> &[Arc<PeerConnection>] {
        &self.inbound
    }

    /// Outbound connections that finished dialing.
    pub fn active_outbound(&self) -> Vec<Arc<PeerConnection>> {
        self.outbound
            .iter()
            .filter(|c| !c.state().is_connecting())
            .cloned()
            .collect()
    }

    /// Number of tracked inbound connections.
    pub fn inbound_count(&self) -> usize {
        self.inbound.len()
    }

    /// Number of tracked outbound connections.
    pub fn outbound_count(&self) -> usize {
        self.outbound.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty() && self.outbound.is_empty()
    }

    /// Take every tracked connection out of the registry.
    pub fn drain(&mut self) -> Vec<Arc<PeerConnection>> {
        let mut all = std::mem::take(&mut self.inbound);
        all.append(&mut self.outbound);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerState;

    fn make_conn(
        id: u64,
        addr: Option<&str>,
        direction: ConnectionDirection,
        handle: Option<u64>,
    ) -> Arc<PeerConnection> {
        let (conn, _rx) = PeerConnection::new(
            PeerId::new(id),
            direction,
            addr.map(|a| a.parse().unwrap()),
            PeerState::Connected,
        );
        if let Some(h) = handle {
            conn.set_handle(HandleId(h));
        }
        conn
    }

    fn ids(list: &[Arc<PeerConnection>]) -> Vec<u64> {
        list.iter().map(|c| c.id().0).collect()
    }

    #[test]
    fn test_list_inbound_then_outbound() {
        let mut registry = ConnectionRegistry::new();
        registry.add(
            ConnectionDirection::Outbound,
            make_conn(1, Some("10.0.0.1:1"), ConnectionDirection::Outbound, Some(1)),
        );
        registry.add(
            ConnectionDirection::Inbound,
            make_conn(2, Some("10.0.0.2:2"), ConnectionDirection::Inbound, Some(2)),
        );
        registry.add(
            ConnectionDirection::Outbound,
            make_conn(3, Some("10.0.0.3:3"), ConnectionDirection::Outbound, Some(3)),
        );

        assert_eq!(ids(&registry.list()), vec![2, 1, 3]);
    }

    #[test]
    fn test_dedup_by_address_first_seen_wins() {
        let mut registry = ConnectionRegistry::new();
        registry.add(
            ConnectionDirection::Outbound,
            make_conn(1, Some("10.0.0.1:9000"), ConnectionDirection::Outbound, Some(1)),
        );
        registry.add(
            ConnectionDirection::Inbound,
            make_conn(2, Some("10.0.0.1:9000"), ConnectionDirection::Inbound, Some(2)),
        );

        // Inbound is enumerated first, so it wins.
        assert_eq!(ids(&registry.list()), vec![2]);
    }

    #[test]
    fn test_dedup_by_handle_uses_handle_set() {
        let mut registry = ConnectionRegistry::new();
        registry.add(
            ConnectionDirection::Inbound,
            make_conn(1, None, ConnectionDirection::Inbound, Some(5)),
        );
        registry.add(
            ConnectionDirection::Inbound,
            make_conn(2, None, ConnectionDirection::Inbound, Some(5)),
        );
        registry.add(
            ConnectionDirection::Inbound,
            make_conn(3, None, ConnectionDirection::Inbound, Some(6)),
        );

        assert_eq!(ids(&registry.list()), vec![1, 3]);
    }

    #[test]
    fn test_distinct_handles_same_address_dedup() {
        let mut registry = ConnectionRegistry::new();
        registry.add(
            ConnectionDirection::Inbound,
            make_conn(1, Some("10.0.0.9:1"), ConnectionDirection::Inbound, Some(10)),
        );
        registry.add(
            ConnectionDirection::Outbound,
            make_conn(2, Some("10.0.0.9:1"), ConnectionDirection::Outbound, Some(11)),
        );
        registry.add(
            ConnectionDirection::Outbound,
            make_conn(3, Some("10.0.0.9:2"), ConnectionDirection::Outbound, None),
        );

        assert_eq!(ids(&registry.list()), vec![1, 3]);
    }

    #[test]
    fn test_dedup_ignores_host_case() {
        let mut registry = ConnectionRegistry::new();
        registry.add(
            ConnectionDirection::Inbound,
            make_conn(1, Some("H1:1"), ConnectionDirection::Inbound, Some(1)),
        );
        registry.add(
            ConnectionDirection::Outbound,
            make_conn(2, Some("h1:1"), ConnectionDirection::Outbound, Some(2)),
        );

        assert_eq!(ids(&registry.list()), vec![1]);
    }

    #[test]
    fn test_one_entry_per_pair_any_order() {
        let addrs = ["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3"];
        let orders: [[usize; 6]; 3] = [[0, 1, 2, 0, 1, 2], [2, 2, 1, 0, 1, 0], [1, 0, 2, 2, 0, 1]];

        for order in orders {
            let mut registry = ConnectionRegistry::new();
            for (i, idx) in order.iter().enumerate() {
                let direction = if i % 2 == 0 {
                    ConnectionDirection::Inbound
                } else {
                    ConnectionDirection::Outbound
                };
                registry.add(
                    direction,
                    make_conn(i as u64, Some(addrs[*idx]), direction, Some(100 + i as u64)),
                );
            }

            let mut listed: Vec<String> = registry
                .list()
                .iter()
                .map(|c| c.remote().unwrap().to_string())
                .collect();
            listed.sort();
            assert_eq!(listed, addrs.to_vec());
        }
    }

    #[test]
    fn test_remove_adjacent_entries() {
        let mut registry = ConnectionRegistry::new();
        let a = make_conn(1, Some("10.0.0.1:1"), ConnectionDirection::Inbound, Some(1));
        let b = make_conn(2, Some("10.0.0.2:2"), ConnectionDirection::Inbound, Some(2));
        let c = make_conn(3, Some("10.0.0.3:3"), ConnectionDirection::Inbound, Some(3));
        registry.add(ConnectionDirection::Inbound, a.clone());
        registry.add(ConnectionDirection::Inbound, b.clone());
        registry.add(ConnectionDirection::Inbound, c.clone());

        // Remove while walking a snapshot: neighbours must not be skipped.
        for conn in registry.list() {
            if conn.id().0 <= 2 {
                assert!(registry.remove(&conn));
            }
        }

        assert_eq!(ids(&registry.list()), vec![3]);
        assert!(!registry.remove(&a));
    }

    #[test]
    fn test_list_with_visits_survivors() {
        let mut registry = ConnectionRegistry::new();
        registry.add(
            ConnectionDirection::Inbound,
            make_conn(1, Some("10.0.0.1:1"), ConnectionDirection::Inbound, Some(1)),
        );
        registry.add(
            ConnectionDirection::Outbound,
            make_conn(2, Some("10.0.0.1:1"), ConnectionDirection::Outbound, Some(2)),
        );

        let mut visited = Vec::new();
        let listed = registry.list_with(|c| visited.push(c.id().0));
        assert_eq!(visited, vec![1]);
        assert_eq!(ids(&listed), vec![1]);
    }

    #[test]
    fn test_active_outbound_skips_connecting() {
        let mut registry = ConnectionRegistry::new();
        let (dialing, _rx) = PeerConnection::new(
            PeerId::new(1),
            ConnectionDirection::Outbound,
            Some(PeerAddr::new("h1", 1)),
            PeerState::Connecting,
        );
        registry.add(ConnectionDirection::Outbound, dialing);
        registry.add(
            ConnectionDirection::Outbound,
            make_conn(2, Some("h2:2"), ConnectionDirection::Outbound, Some(2)),
        );

        assert_eq!(ids(&registry.active_outbound()), vec![2]);
        assert_eq!(registry.outbound_count(), 2);
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }
}
