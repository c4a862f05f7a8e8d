//! SDB Proxy CLI
//!
//! Command-line interface for provisioning catalogs and rewriting SQL.

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use sdb_proxy::catalog::{Catalog, CatalogHandle, CatalogStorage};
use sdb_proxy::crypto::KeyGenerator;
use sdb_proxy::utils::Logger;
use sdb_proxy::{QueryPipeline, RewriteConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sdb_proxy")]
#[command(about = "Rewrites SQL for a backend storing sensitive columns encrypted", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a database with fresh cryptosystem parameters
    Keygen {
        /// Catalog file, created if missing
        #[arg(short, long)]
        catalog: PathBuf,

        /// Name of the new database
        #[arg(short, long)]
        database: String,

        /// Bit length of each secret prime
        #[arg(long)]
        prime_bits: Option<u64>,

        /// Rewrite configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Rewrite one SQL statement and print the backend SQL
    Rewrite {
        /// Catalog file
        #[arg(short, long)]
        catalog: PathBuf,

        /// Database the statement runs against
        #[arg(short, long)]
        database: String,

        /// Rewrite configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Install a created table into the catalog file
        #[arg(long)]
        apply: bool,

        /// SQL statement
        sql: String,
    },

    /// Load and validate a catalog file
    Check {
        /// Catalog file
        #[arg(short, long)]
        catalog: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RewriteConfig> {
    match path {
        Some(path) => RewriteConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(RewriteConfig::default()),
    }
}

fn load_catalog(path: &Path) -> anyhow::Result<Catalog> {
    CatalogStorage::new()
        .load(path)
        .with_context(|| format!("failed to load catalog {}", path.display()))
}

fn keygen(
    catalog_path: &Path,
    database: &str,
    prime_bits: Option<u64>,
    config: &RewriteConfig,
) -> anyhow::Result<()> {
    let storage = CatalogStorage::new();
    let mut catalog = if catalog_path.exists() {
        load_catalog(catalog_path)?
    } else {
        Catalog::new()
    };

    let bits = prime_bits.unwrap_or(config.prime_bits);
    let meta = KeyGenerator::generate_database(&mut rand::rng(), database, bits)
        .context("key generation failed")?;
    let modulus_bits = meta.params.n.bits();
    catalog.add_database(meta)?;
    storage
        .save(&catalog, catalog_path)
        .with_context(|| format!("failed to write catalog {}", catalog_path.display()))?;

    println!(
        "Provisioned database {} ({}-bit modulus) in {}",
        database,
        modulus_bits,
        catalog_path.display()
    );
    Ok(())
}

fn rewrite(
    catalog_path: &Path,
    database: &str,
    config: RewriteConfig,
    apply: bool,
    sql: &str,
) -> anyhow::Result<()> {
    let handle = Arc::new(CatalogHandle::new(load_catalog(catalog_path)?)?);
    let pipeline = QueryPipeline::new(handle.clone(), config, database);
    let output = pipeline.rewrite_sql(sql)?;
    println!("{}", output.sql);

    if apply {
        if output.table.is_none() {
            bail!("--apply only applies to CREATE TABLE statements");
        }
        pipeline.install(&output)?;
        CatalogStorage::new()
            .save(&handle.snapshot(), catalog_path)
            .with_context(|| format!("failed to write catalog {}", catalog_path.display()))?;
        log::info!("Installed new table into {}", catalog_path.display());
    }
    Ok(())
}

fn check(catalog_path: &Path) -> anyhow::Result<()> {
    let catalog = load_catalog(catalog_path)?;
    for database in &catalog.databases {
        let sensitive: usize = database
            .tables
            .iter()
            .map(|t| t.columns.iter().filter(|c| c.sensitive).count())
            .sum();
        println!(
            "{}: {} table(s), {} sensitive column(s), secrets {}",
            database.name,
            database.tables.len(),
            sensitive,
            if database.secrets.is_some() {
                "present"
            } else {
                "absent"
            }
        );
    }
    let fingerprint = CatalogStorage::new().fingerprint(&catalog)?;
    println!(
        "Catalog {} is valid (fingerprint {})",
        catalog_path.display(),
        fingerprint
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    Logger::init_with_level(Logger::level_for(cli.verbose));

    match cli.command {
        Commands::Keygen {
            catalog,
            database,
            prime_bits,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            keygen(&catalog, &database, prime_bits, &config)
        }
        Commands::Rewrite {
            catalog,
            database,
            config,
            apply,
            sql,
        } => {
            let config = load_config(config.as_deref())?;
            rewrite(&catalog, &database, config, apply, &sql)
        }
        Commands::Check { catalog } => check(&catalog),
    }
}
