//! Hive CLI
//!
//! In-process overlay simulator for the Hive topology and router.

mod config;
mod sim;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hive_core::Topic;
use hive_crypto::x25519::PrivateKey;
use hive_discovery::Address;
use rand_core::OsRng;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::Config;
use sim::{DeliveryLog, Network, random_addresses};

/// Hive - proximity-ordered overlay simulator
#[derive(Parser)]
#[command(name = "hive")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a simulated network and print every node's table
    Simulate {
        /// Number of nodes
        #[arg(short, long)]
        nodes: Option<usize>,

        /// Dial rounds
        #[arg(short, long)]
        rounds: Option<usize>,

        /// Seed for address generation
        #[arg(long)]
        seed: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Route a raw message through a simulated network
    Send {
        /// Number of nodes
        #[arg(short, long)]
        nodes: Option<usize>,

        /// Topic name
        #[arg(short, long, default_value = "hive")]
        topic: String,

        /// Message text
        #[arg(short, long)]
        message: String,

        /// Seed for address generation
        #[arg(long)]
        seed: Option<u64>,

        /// How long to wait for delivery, in milliseconds
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,
    },

    /// Show the configured parameters
    Table,

    /// Generate a new identity keypair
    Keygen {
        /// Output file for private key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.validate()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Simulate {
            nodes,
            rounds,
            seed,
            json,
        } => {
            simulate(&config, nodes, rounds, seed, json)?;
        }
        Commands::Send {
            nodes,
            topic,
            message,
            seed,
            wait_ms,
        } => {
            send_message(&config, nodes, &topic, message, seed, wait_ms).await?;
        }
        Commands::Table => {
            show_table(&config);
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
    }

    Ok(())
}

/// Node count, rounds and seed after applying flag overrides.
fn sim_settings(
    config: &Config,
    nodes: Option<usize>,
    rounds: Option<usize>,
    seed: Option<u64>,
) -> anyhow::Result<(usize, usize, u64)> {
    let nodes = nodes.unwrap_or(config.simulation.nodes);
    if nodes < 2 {
        anyhow::bail!("simulation needs at least 2 nodes, got {nodes}");
    }
    let rounds = rounds.unwrap_or(config.simulation.rounds);
    let seed = seed
        .or(config.simulation.seed)
        .unwrap_or_else(rand::random);
    Ok((nodes, rounds, seed))
}

/// Build and connect a network, then print its tables
fn simulate(
    config: &Config,
    nodes: Option<usize>,
    rounds: Option<usize>,
    seed: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let (nodes, rounds, seed) = sim_settings(config, nodes, rounds, seed)?;
    tracing::info!(nodes, rounds, seed, "simulating network");

    let mut network = Network::new(&random_addresses(nodes, seed), config.kad_params())?;
    network.register_all()?;
    network.dial(rounds);
    let report = network.report(seed);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("encoding report")?
        );
        return Ok(());
    }

    for node in network.nodes() {
        println!("{node}");
    }
    println!("Seed: {}", report.seed);
    println!("Nodes: {}", report.nodes);
    println!("Connections: {}", report.links);
    println!("Healthy: {}/{}", report.healthy, report.nodes);
    for (i, node) in report.reports.iter().enumerate() {
        if !node.healthy {
            println!(
                "  node {i} {}: know_nn={} connect_nn={} saturated={}",
                &node.info.self_addr[..8],
                node.know_nn,
                node.connect_nn,
                node.saturated
            );
        }
    }

    Ok(())
}

/// Send a raw message from one random node to another
async fn send_message(
    config: &Config,
    nodes: Option<usize>,
    topic: &str,
    message: String,
    seed: Option<u64>,
    wait_ms: u64,
) -> anyhow::Result<()> {
    let (nodes, rounds, seed) = sim_settings(config, nodes, None, seed)?;
    let mut params = config.router_params();
    params.allow_raw = true;

    let mut network = Network::new(&random_addresses(nodes, seed), config.kad_params())?;
    let routers = network.attach_routers(&params)?;
    network.register_all()?;
    network.dial(rounds);

    let topic = Topic::from_name(topic);
    let log = DeliveryLog::watch(&routers, topic);
    let tasks = network.wire(&routers);

    let from = (seed as usize) % nodes;
    let to = (from + 1 + (seed as usize / nodes) % (nodes - 1)) % nodes;
    let target = *routers[to].base();
    println!("Nodes: {nodes}, connections: {}", network.links().len());
    println!("From: node {from} ({})", routers[from].base().label());
    println!("To: node {to} ({})", target.label());
    println!("Topic: {topic}");

    routers[from]
        .send_raw(target.as_bytes(), topic, message.into_bytes())
        .context("sending message")?;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
    while !log.delivered_to(to) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    if log.delivered_to(to) {
        println!("Delivered to node {to}");
    } else {
        println!("Not delivered within {wait_ms} ms");
    }
    println!("Recipients: {:?}", log.recipients());
    println!("Handler calls: {}", log.count());

    for router in &routers {
        router.stop();
    }
    for task in tasks {
        task.abort();
    }
    Ok(())
}

/// Print the configured parameters
fn show_table(config: &Config) {
    let kad = config.kad_params();
    let router = config.router_params();

    println!("Kademlia:");
    println!("  Neighbourhood size: {}", kad.neighbourhood_size);
    println!("  Min bin size: {}", kad.min_bin_size);
    println!("  Max bin size: {}", kad.max_bin_size);
    println!("  Max prox display: {}", kad.max_prox_display);
    println!("  Retry interval: {:?}", kad.retry_interval);
    println!("  Retry exponent: {}", kad.retry_exponent);
    println!("  Max retries: {}", kad.max_retries);
    println!("  Prefer address gaps: {}", kad.prefer_address_gaps);
    println!();

    println!("Router:");
    println!("  Message TTL: {:?}", router.msg_ttl);
    println!("  Digest cache TTL: {:?}", router.digest_cache_ttl);
    println!("  Clean interval: {:?}", router.clean_interval);
    println!("  Symmetric key cache: {}", router.sym_key_cache_capacity);
    println!("  Outbox capacity: {}", router.outbox_capacity);
    println!("  Max message size: {}", router.max_msg_size);
    println!("  Allow raw: {}", router.allow_raw);
    println!("  Allow forward: {}", router.allow_forward);
    println!();

    println!("Simulation:");
    println!("  Nodes: {}", config.simulation.nodes);
    println!("  Rounds: {}", config.simulation.rounds);
    match config.simulation.seed {
        Some(seed) => println!("  Seed: {seed}"),
        None => println!("  Seed: random"),
    }
}

/// Generate a new identity keypair
fn generate_keypair(output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Generating new X25519 identity keypair...");

    let private_key = PrivateKey::generate(&mut OsRng);
    let public_key = private_key.public_key();
    let overlay = Address::from_public_key(public_key.as_bytes());

    println!("Public key: {}", hex::encode(public_key.as_bytes()));
    println!("Overlay address: {overlay}");

    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&path, hex::encode(private_key.to_bytes()))
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Private key saved to: {}", path.display());
    } else {
        println!("Private key not saved (use --output to save)");
    }

    Ok(())
}
