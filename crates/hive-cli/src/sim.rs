//! In-process overlay simulation.
//!
//! Every node is a [`Kademlia`] table over a random address. Nodes learn
//! every other address up front, then connect in rounds by dialing whatever
//! their table suggests. Connections are symmetric. Routers can be attached
//! to the nodes and wired together with in-memory channels.

use anyhow::Context;
use hive_core::{ChannelSender, Disposition, Handler, PeerSender, Router, RouterParams, Topic};
use hive_crypto::x25519::PrivateKey;
use hive_discovery::{Address, KadParams, Kademlia, KademliaInfo, Peer, PeerAddr, new_peer_pot_map};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_core::OsRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Inbox depth of each simulated transport
const INBOX_CAPACITY: usize = 256;

/// `count` distinct addresses drawn from `seed`.
pub fn random_addresses(count: usize, seed: u64) -> Vec<Address> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = std::collections::HashSet::with_capacity(count);
    let mut addrs = Vec::with_capacity(count);
    while addrs.len() < count {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes);
        let addr = Address::from_bytes(bytes);
        if seen.insert(addr) {
            addrs.push(addr);
        }
    }
    addrs
}

/// Simulated overlay.
pub struct Network {
    nodes: Vec<Arc<Kademlia>>,
    index: HashMap<Address, usize>,
    links: Vec<(usize, usize)>,
    params: KadParams,
}

impl Network {
    /// One table per address, not yet aware of each other.
    ///
    /// # Errors
    ///
    /// Returns an error if `params` are invalid.
    pub fn new(addrs: &[Address], params: KadParams) -> anyhow::Result<Self> {
        let nodes = addrs
            .iter()
            .map(|addr| Kademlia::new(*addr, params.clone()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()
            .context("creating topology")?;
        let index = addrs.iter().enumerate().map(|(i, a)| (*a, i)).collect();
        Ok(Self {
            nodes,
            index,
            links: Vec::new(),
            params,
        })
    }

    /// Simulated tables.
    pub fn nodes(&self) -> &[Arc<Kademlia>] {
        &self.nodes
    }

    /// Connections made so far, as node index pairs.
    pub fn links(&self) -> &[(usize, usize)] {
        &self.links
    }

    /// Peer record of node `i` as others see it, with the capabilities it
    /// advertises now.
    fn peer_addr(&self, i: usize) -> PeerAddr {
        let node = &self.nodes[i];
        PeerAddr::new(*node.base(), format!("sim://{i}").into_bytes())
            .with_capabilities(node.capabilities())
    }

    /// Tell every node about every other node.
    ///
    /// # Errors
    ///
    /// Returns an error if a table rejects the batch.
    pub fn register_all(&self) -> anyhow::Result<()> {
        let peers: Vec<PeerAddr> = (0..self.nodes.len()).map(|i| self.peer_addr(i)).collect();
        for (i, node) in self.nodes.iter().enumerate() {
            let others = peers
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| p.clone());
            node.register(others)
                .with_context(|| format!("registering peers with node {i}"))?;
        }
        Ok(())
    }

    /// Run up to `rounds` dial rounds. Each node dials at most one suggested
    /// peer per round; stops early once no node has anything to dial.
    ///
    /// Returns the number of connections made.
    pub fn dial(&mut self, rounds: usize) -> usize {
        let peers: Vec<PeerAddr> = (0..self.nodes.len()).map(|i| self.peer_addr(i)).collect();
        let mut made = 0;
        for round in 0..rounds {
            let mut dialed = 0;
            for i in 0..self.nodes.len() {
                let suggestion = self.nodes[i].suggest_peer();
                let Some(target) = suggestion.peer else {
                    continue;
                };
                let Some(&j) = self.index.get(&target.overlay) else {
                    warn!(peer = %target.overlay.label(), "suggested peer is not simulated");
                    continue;
                };
                self.nodes[i].on(Arc::new(Peer::new(peers[j].clone())));
                self.nodes[j].on(Arc::new(Peer::new(peers[i].clone())));
                self.links.push((i, j));
                dialed += 1;
            }
            debug!(round, dialed, "dial round done");
            made += dialed;
            if dialed == 0 {
                break;
            }
        }
        info!(connections = made, nodes = self.nodes.len(), "network connected");
        made
    }

    /// Per-node report against the expected neighbourhoods.
    pub fn report(&self, seed: u64) -> SimReport {
        let addrs: Vec<Address> = self.nodes.iter().map(|n| *n.base()).collect();
        let expected = new_peer_pot_map(self.params.neighbourhood_size, &addrs);
        let reports: Vec<NodeReport> = self
            .nodes
            .iter()
            .map(|node| {
                let health = expected
                    .get(node.base())
                    .map(|pp| node.health(pp))
                    .unwrap_or_default();
                NodeReport {
                    healthy: health.healthy(),
                    know_nn: health.know_nn,
                    connect_nn: health.connect_nn,
                    saturated: health.saturated,
                    info: node.info(),
                }
            })
            .collect();
        SimReport {
            seed,
            nodes: self.nodes.len(),
            links: self.links.len(),
            healthy: reports.iter().filter(|r| r.healthy).count(),
            reports,
        }
    }

    /// Create a router on every node. Call before [`register_all`] so peers
    /// learn the routing capability.
    ///
    /// [`register_all`]: Self::register_all
    ///
    /// # Errors
    ///
    /// Returns an error if a router cannot be created.
    pub fn attach_routers(&self, params: &RouterParams) -> anyhow::Result<Vec<Router>> {
        self.nodes
            .iter()
            .map(|node| {
                Router::new(
                    Arc::clone(node),
                    PrivateKey::generate(&mut OsRng),
                    params.clone(),
                )
                .context("creating router")
            })
            .collect()
    }

    /// Wire `routers` over in-memory channels along the current links and
    /// start them. Returns the inbox tasks.
    pub fn wire(&self, routers: &[Router]) -> Vec<JoinHandle<()>> {
        let mut inboxes = Vec::with_capacity(routers.len());
        let mut tasks = Vec::with_capacity(routers.len());
        for (i, router) in routers.iter().enumerate() {
            let (sender, mut rx) = ChannelSender::pair(INBOX_CAPACITY);
            inboxes.push(Arc::new(sender));
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    match router.handle(envelope) {
                        Ok(outcome) => trace!(node = i, outcome = describe(outcome), "handled envelope"),
                        Err(e) => warn!(node = i, error = %e, "failed to handle envelope"),
                    }
                }
            }));
        }
        for &(i, j) in &self.links {
            routers[i].add_peer(*routers[j].base(), Arc::clone(&inboxes[j]) as Arc<dyn PeerSender>);
            routers[j].add_peer(*routers[i].base(), Arc::clone(&inboxes[i]) as Arc<dyn PeerSender>);
        }
        for router in routers {
            router.start();
        }
        tasks
    }
}

/// Records which nodes a topic was delivered to.
pub struct DeliveryLog {
    delivered: Arc<Vec<AtomicBool>>,
    count: Arc<AtomicUsize>,
    _registrations: Vec<hive_core::Registration>,
}

impl DeliveryLog {
    /// Register a raw handler for `topic` on every router.
    pub fn watch(routers: &[Router], topic: Topic) -> Self {
        let delivered: Arc<Vec<AtomicBool>> =
            Arc::new((0..routers.len()).map(|_| AtomicBool::new(false)).collect());
        let count = Arc::new(AtomicUsize::new(0));
        let registrations = routers
            .iter()
            .enumerate()
            .map(|(i, router)| {
                let delivered = Arc::clone(&delivered);
                let count = Arc::clone(&count);
                router.register(
                    topic,
                    Handler::new(move |msg| {
                        debug!(node = i, bytes = msg.payload.len(), "delivered");
                        delivered[i].store(true, Ordering::SeqCst);
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .with_raw(),
                )
            })
            .collect();
        Self {
            delivered,
            count,
            _registrations: registrations,
        }
    }

    /// Whether node `i` received the topic.
    pub fn delivered_to(&self, i: usize) -> bool {
        self.delivered[i].load(Ordering::SeqCst)
    }

    /// Indices of nodes that received the topic.
    pub fn recipients(&self) -> Vec<usize> {
        (0..self.delivered.len())
            .filter(|&i| self.delivered_to(i))
            .collect()
    }

    /// Total handler invocations.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Outcome of one envelope arriving at a node, for logs.
pub fn describe(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Expired => "expired",
        Disposition::Duplicate => "duplicate",
        Disposition::NoRawHandler => "no raw handler",
        Disposition::Forwarded => "forwarded",
        Disposition::Delivered => "delivered",
    }
}

/// Report of one simulated node.
#[derive(Debug, Serialize)]
pub struct NodeReport {
    /// Whether the node knows and connects its neighbourhood and is saturated
    pub healthy: bool,
    /// Knows every expected neighbour
    pub know_nn: bool,
    /// Connected to every expected neighbour
    pub connect_nn: bool,
    /// Every bin below depth holds enough connections
    pub saturated: bool,
    /// Table snapshot
    pub info: KademliaInfo,
}

/// Report of a simulation run.
#[derive(Debug, Serialize)]
pub struct SimReport {
    /// Seed the addresses were drawn from
    pub seed: u64,
    /// Number of nodes
    pub nodes: usize,
    /// Connections made
    pub links: usize,
    /// Number of healthy nodes
    pub healthy: usize,
    /// Per-node reports
    pub reports: Vec<NodeReport>,
}
