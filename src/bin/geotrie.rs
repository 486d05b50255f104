use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geotrie::{DataValue, Reader, NOT_FOUND};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "geotrie")]
#[command(about = "Query MaxMind DB (MMDB) format databases", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up an IP address and print its record as JSON
    Lookup {
        /// Path to the database (.mmdb file)
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// IP address to look up
        #[arg(value_name = "IP")]
        ip: IpAddr,

        /// Print the matched network and data offset instead of the record
        #[arg(short, long)]
        offset: bool,
    },

    /// Print database metadata as JSON
    Metadata {
        /// Path to the database (.mmdb file)
        #[arg(value_name = "DATABASE")]
        database: PathBuf,
    },

    /// List the networks stored in the database
    Networks {
        /// Path to the database (.mmdb file)
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Restrict the listing to networks within this CIDR
        #[arg(short, long, value_name = "CIDR")]
        within: Option<ipnetwork::IpNetwork>,

        /// Stop after this many networks
        #[arg(short, long, value_name = "N")]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Lookup {
            database,
            ip,
            offset,
        } => lookup(&database, ip, offset),
        Commands::Metadata { database } => metadata(&database),
        Commands::Networks {
            database,
            within,
            limit,
        } => networks(&database, within, limit),
    }
}

fn open(database: &Path) -> Result<Reader<memmap2::Mmap>> {
    Reader::open(database).with_context(|| format!("failed to open {}", database.display()))
}

fn lookup(database: &Path, ip: IpAddr, offset_only: bool) -> Result<()> {
    let reader = open(database)?;

    if offset_only {
        let offset = reader.lookup_offset(ip)?;
        if offset == NOT_FOUND {
            println!("{} not found", ip);
            std::process::exit(1);
        }
        println!("{}", offset);
        return Ok(());
    }

    let mut record: Option<DataValue> = None;
    let (network, found) = reader.lookup_network(ip, &mut record)?;
    if !found {
        println!("{} not found (network {})", ip, network);
        std::process::exit(1);
    }
    eprintln!("network: {}", network);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn metadata(database: &Path) -> Result<()> {
    let reader = open(database)?;
    println!("{}", serde_json::to_string_pretty(reader.metadata())?);
    Ok(())
}

fn networks(
    database: &Path,
    within: Option<ipnetwork::IpNetwork>,
    limit: Option<usize>,
) -> Result<()> {
    let reader = open(database)?;
    let iter = match within {
        Some(cidr) => reader.networks_within(cidr)?,
        None => reader.networks()?,
    };

    let mut count = 0usize;
    for item in iter {
        let (network, offset) = item?;
        let mut record: Option<DataValue> = None;
        reader.decode(offset, &mut record)?;
        println!("{} {}", network, serde_json::to_string(&record)?);
        count += 1;
        if limit.is_some_and(|n| count >= n) {
            break;
        }
    }
    Ok(())
}
