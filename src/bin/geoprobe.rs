//! Diagnostic driver for GeoIP databases
//!
//! Opens a database, looks up a list of IP literals, and prints the
//! projected location fields. Defaults to a fixed set of well-known
//! resolver addresses so a bare invocation verifies a fresh database.

use anyhow::{Context, Result};
use clap::Parser;
use geoprobe::{GeoIpError, Reader};
use std::path::PathBuf;

const DEFAULT_IPS: &[&str] = &["8.8.8.8", "1.1.1.1", "208.67.222.222"];

#[derive(Parser)]
#[command(name = "geoprobe")]
#[command(version)]
#[command(
    about = "Verify a GeoIP database by looking up test IP addresses",
    long_about = "geoprobe - GeoIP database verification tool\n\n\
    Opens a MaxMind DB format database, looks up a set of IP addresses, and\n\
    prints the location fields for each. Fields absent from a record print\n\
    an explicit marker; an address with no entry reports \"no data\".\n\n\
    Examples:\n\
      geoprobe /var/lib/GeoIP/GeoLite2-City.mmdb\n\
      geoprobe GeoLite2-City.mmdb 93.184.216.34 2001:4860:4860::8888\n\
      geoprobe --json GeoLite2-City.mmdb 8.8.8.8"
)]
struct Cli {
    /// Path to the database file (.mmdb)
    #[arg(value_name = "DATABASE")]
    database: PathBuf,

    /// IP addresses to look up (defaults to well-known public resolvers)
    #[arg(value_name = "IPS")]
    ips: Vec<String>,

    /// Emit one JSON object per IP instead of the text report
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let reader = Reader::open(&cli.database)
        .with_context(|| format!("Failed to open database {}", cli.database.display()))?;

    if !cli.json {
        let meta = reader.metadata();
        println!(
            "Database: {} (format {}.{}, {} nodes)",
            meta.database_type.as_deref().unwrap_or("unknown"),
            meta.major_version,
            meta.minor_version,
            meta.node_count
        );
    }

    let ips: Vec<String> = if cli.ips.is_empty() {
        DEFAULT_IPS.iter().map(|s| s.to_string()).collect()
    } else {
        cli.ips.clone()
    };

    for ip in &ips {
        if cli.json {
            print_json(&reader, ip);
        } else {
            print_text(&reader, ip);
        }
    }

    Ok(())
}

fn print_text(reader: &Reader, ip: &str) {
    println!("\n--- Testing IP: {} ---", ip);
    match reader.location_str(ip) {
        Ok(record) => {
            println!("Country: {}", field(&record.country_iso, &record.country_name));
            println!(
                "Region: {}",
                field(&record.subdivision_iso, &record.subdivision_name)
            );
            println!(
                "City: {}",
                record.city_name.as_deref().unwrap_or("not available")
            );
            println!("Latitude: {}", coord(record.latitude));
            println!("Longitude: {}", coord(record.longitude));
        }
        Err(GeoIpError::NotFound) => println!("no data"),
        Err(e) => println!("Error: {}", e),
    }
}

fn print_json(reader: &Reader, ip: &str) {
    let line = match reader.location_str(ip) {
        Ok(record) => serde_json::json!({
            "ip": ip,
            "status": "ok",
            "location": record,
        }),
        Err(GeoIpError::NotFound) => serde_json::json!({
            "ip": ip,
            "status": "no_data",
        }),
        Err(e) => serde_json::json!({
            "ip": ip,
            "status": "error",
            "error": e.to_string(),
        }),
    };
    println!("{}", line);
}

/// Format "CODE (Name)" with per-part fallbacks
fn field(code: &Option<String>, name: &Option<String>) -> String {
    let code = code.as_deref().unwrap_or("not available");
    match name {
        Some(name) => format!("{} ({})", code, name),
        None => code.to_string(),
    }
}

fn coord(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "not available".to_string(),
    }
}
