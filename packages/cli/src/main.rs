#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line tools for fence map perimeters.
//!
//! ```text
//! fence_map measure <ring.json>
//! fence_map geojson <ring.json>
//! fence_map list [--fence <id>]
//! fence_map save --fence <id> [--perimeter <id>] <ring.json>
//! fence_map address <ring.json>
//! fence_map demo
//! ```
//!
//! Rings are JSON arrays of `[lat, lng]` pairs or GeoJSON `Polygon`
//! geometries; `-` reads from stdin. Global `--config <file.toml>`
//! overrides environment settings.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "fence_map", about = "Measure, inspect and edit geofence perimeters")]
struct Cli {
    /// TOML config file overriding environment settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print area, perimeter and centre of a ring
    Measure {
        /// Ring file, or `-` for stdin
        ring: PathBuf,
    },
    /// Print a ring as a GeoJSON polygon
    Geojson {
        /// Ring file, or `-` for stdin
        ring: PathBuf,
    },
    /// List fences, or the perimeters of one fence
    List {
        /// Fence to list perimeters for
        #[arg(long)]
        fence: Option<i64>,
    },
    /// Save a ring as a perimeter of a fence
    Save {
        /// Owning fence
        #[arg(long)]
        fence: i64,
        /// Perimeter to update; a new one is created if omitted
        #[arg(long)]
        perimeter: Option<i64>,
        /// Ring file, or `-` for stdin
        ring: PathBuf,
    },
    /// Suggest an address for the centre of a ring
    Address {
        /// Ring file, or `-` for stdin
        ring: PathBuf,
    },
    /// Run two clients against an in-process store and relay
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Measure { ring } => commands::measure(&ring),
        Commands::Geojson { ring } => commands::geojson(&ring),
        Commands::List { fence } => commands::list(&settings, fence).await,
        Commands::Save {
            fence,
            perimeter,
            ring,
        } => commands::save(&settings, fence, perimeter, &ring).await,
        Commands::Address { ring } => commands::address(&settings, &ring).await,
        Commands::Demo => commands::demo(&settings).await,
    }
}
