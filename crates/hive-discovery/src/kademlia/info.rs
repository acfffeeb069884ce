//! Table reports: the text rendering used in logs and the serializable
//! snapshot used by tooling.

use super::depth::depth_for_pot;
use super::{Kademlia, State};
use serde::Serialize;
use std::fmt;

/// Peer labels shown per bin in the text table.
const LABELS_PER_ROW: usize = 4;

/// Width of the connections column.
const LEFT_WIDTH: usize = 31;

const RULE: &str = "=========================================================================";

/// Serializable snapshot of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KademliaInfo {
    /// Base address, hex
    #[serde(rename = "self")]
    pub self_addr: String,
    /// Neighbourhood depth
    pub depth: usize,
    /// Number of live connections
    pub total_connections: usize,
    /// Number of known addresses
    pub total_known: usize,
    /// Connected addresses per bin, sorted
    pub connections: Vec<Vec<String>>,
    /// Known addresses per bin, sorted
    pub known: Vec<Vec<String>>,
}

impl Kademlia {
    /// Snapshot of the table.
    ///
    /// Bins deeper than `max_prox_display - 1` are folded into the last row.
    #[must_use]
    pub fn info(&self) -> KademliaInfo {
        let state = self.state.read();
        let rows = self.params.max_prox_display;
        let mut connections = vec![Vec::new(); rows];
        let mut known = vec![Vec::new(); rows];

        let index = &state.default_index;
        index.conns.each_bin(
            self.base_key(),
            &self.pof,
            0,
            |bin| {
                let row = &mut connections[bin.proximity_order().min(rows - 1)];
                bin.each(|entry| {
                    row.push(entry.address().to_string());
                    true
                });
                true
            },
            true,
        );
        index.addrs.each_bin(
            self.base_key(),
            &self.pof,
            0,
            |bin| {
                let row = &mut known[bin.proximity_order().min(rows - 1)];
                bin.each(|entry| {
                    row.push(entry.address().to_string());
                    true
                });
                true
            },
            true,
        );
        for row in connections.iter_mut().chain(known.iter_mut()) {
            row.sort();
        }

        KademliaInfo {
            self_addr: self.base.to_string(),
            depth: index.depth,
            total_connections: index.conns.size(),
            total_known: index.addrs.size(),
            connections,
            known,
        }
    }

    /// Text table: one row per bin with live peers on the left and known
    /// addresses on the right, and a marker above the depth row.
    pub(super) fn render(&self, state: &State) -> String {
        let rows = self.params.max_prox_display;
        let index = &state.default_index;
        let mut out = vec![
            RULE.to_string(),
            format!("hive base: {}", self.base),
            format!(
                "population: {} ({}), NeighbourhoodSize: {}, MinBinSize: {}, MaxBinSize: {}",
                index.conns.size(),
                index.addrs.size(),
                self.params.neighbourhood_size,
                self.params.min_bin_size,
                self.params.max_bin_size
            ),
        ];

        let mut live = vec![String::new(); rows];
        index.conns.each_bin(
            self.base_key(),
            &self.pof,
            0,
            |bin| {
                let mut row = vec![format!("{:2}", bin.size())];
                bin.each(|entry| {
                    row.push(hex::encode(&entry.address().as_bytes()[..2]));
                    row.len() <= LABELS_PER_ROW
                });
                live[bin.proximity_order().min(rows - 1)] =
                    format!("{:<LEFT_WIDTH$.LEFT_WIDTH$}", row.join(" "));
                true
            },
            true,
        );

        let mut peers = vec![String::new(); rows];
        index.addrs.each_bin(
            self.base_key(),
            &self.pof,
            0,
            |bin| {
                let mut row = Vec::new();
                bin.each(|entry| {
                    row.push(entry.label());
                    row.len() < LABELS_PER_ROW
                });
                peers[bin.proximity_order().min(rows - 1)] = row.join(" ");
                true
            },
            true,
        );

        let depth = depth_for_pot(
            &index.conns,
            self.params.neighbourhood_size,
            self.base_key(),
            &self.pof,
        );
        for (i, (left, right)) in live.iter().zip(&peers).enumerate() {
            if i == depth {
                out.push(format!(
                    "============ DEPTH: {i} =========================================="
                ));
            }
            let left = if left.is_empty() {
                format!("{:<LEFT_WIDTH$}", " 0")
            } else {
                left.clone()
            };
            let right = if right.is_empty() { " 0" } else { right.as_str() };
            out.push(format!("{i:03} {left} | {right}"));
        }
        out.push(RULE.to_string());
        out.join("\n")
    }
}

impl fmt::Display for Kademlia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.write_str(&self.render(&state))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{addr_at, kad, peer};
    use super::super::PeerAddr;

    #[test]
    fn test_info_bins() {
        let k = kad();
        k.on(peer(addr_at(1, 1)));
        k.on(peer(addr_at(1, 2)));
        k.register([PeerAddr::new(addr_at(40, 1), vec![])]).unwrap();

        let info = k.info();
        assert_eq!(info.total_connections, 2);
        assert_eq!(info.total_known, 3);
        assert_eq!(info.connections.len(), 16);
        assert_eq!(info.connections[1].len(), 2);
        assert!(info.connections[1][0] < info.connections[1][1]);
        // folded into the last row
        assert_eq!(info.known[15], vec![addr_at(40, 1).to_string()]);
    }

    #[test]
    fn test_info_json_names_self() {
        let k = kad();
        let json = serde_json::to_value(k.info()).unwrap();
        assert_eq!(json["self"], k.base().to_string());
        assert_eq!(json["depth"], 0);
    }

    #[test]
    fn test_display_rows() {
        let k = kad();
        for po in 0..4 {
            k.on(peer(addr_at(po, 1)));
        }
        let table = k.to_string();
        let lines: Vec<&str> = table.lines().collect();
        // rule, base, population, 16 bins, depth marker, rule
        assert_eq!(lines.len(), 3 + 16 + 1 + 1);
        assert!(lines[2].starts_with("population: 4 (4)"));
        assert!(lines[3].starts_with("000  1 8000"));
        assert!(lines[5].contains("DEPTH: 2"));
        assert!(lines[7].starts_with("003  1 1000"));
        assert!(lines[8].ends_with("|  0"));
    }
}
