//! Gloss - Main entry point
//!
//! A very simple https reverse proxy for local development

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Parser, Subcommand};
use gloss::{
    generate_self_signed, tls_acceptor, AccessLog, CertificateProvider, Context, MappingTable,
    PemFiles, ProxyServer, ServerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// gloss is a very simple https reverse proxy
///
/// Run 'gloss setup --host example.org' to create your local certs.
/// Run 'gloss --map "example.org:8080"' to map example.org to port 8080.
#[derive(Parser, Debug)]
#[command(name = "gloss")]
#[command(author = "Gloss Contributors")]
#[command(version = "1.0.0")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Host to port mappings, e.g. "example.org:8080,api.example.org:9000"
    #[arg(short = 'm', long = "map", env = "GLOSS_MAP")]
    mappings: Option<String>,

    #[command(flatten)]
    cert: CertArgs,

    /// SSL listening port
    #[arg(long, env = "GLOSS_SPORT", default_value_t = 443)]
    sport: u16,

    /// Log level or filter directives, e.g. "debug" or "gloss=debug,hyper=warn"
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,
}

#[derive(clap::Args, Debug)]
struct CertArgs {
    /// Path to cert [default: ~/.gloss/cert.pem]
    #[arg(long = "cert", env = "GLOSS_CERT")]
    cert_path: Option<PathBuf>,

    /// Path to cert key [default: ~/.gloss/key.pem]
    #[arg(long = "key", env = "GLOSS_KEY")]
    key_path: Option<PathBuf>,
}

impl CertArgs {
    fn cert_path(&self) -> PathBuf {
        self.cert_path
            .clone()
            .unwrap_or_else(|| gloss_dir().join("cert.pem"))
    }

    fn key_path(&self) -> PathBuf {
        self.key_path
            .clone()
            .unwrap_or_else(|| gloss_dir().join("key.pem"))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a self-signed certificate for local use
    Setup {
        /// Hosts the certificate is valid for (comma separated)
        #[arg(long, value_delimiter = ',', required = true)]
        host: Vec<String>,

        #[command(flatten)]
        cert: CertArgs,
    },

    /// Validate a mapping and print the resulting table
    Check {
        /// Host to port mappings
        #[arg(short = 'm', long = "map")]
        mappings: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn gloss_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".gloss")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; --log-level accepts a level or filter directives
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Some(Commands::Setup { host, cert }) => setup(&host, &cert),
        Some(Commands::Check { mappings, json }) => check(&mappings, json),
        None => serve(args.mappings, &args.cert, args.sport).await,
    }
}

fn setup(hosts: &[String], cert: &CertArgs) -> Result<()> {
    let cert_path = cert.cert_path();
    let key_path = cert.key_path();
    generate_self_signed(hosts, &cert_path, &key_path)?;

    println!("Certificate written to {}", cert_path.display());
    println!("Key written to {}", key_path.display());
    Ok(())
}

fn check(mappings: &str, json: bool) -> Result<()> {
    let table = MappingTable::build(mappings)?;
    let entries: Vec<_> = table.iter().collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in entries {
            println!("{} -> 127.0.0.1:{}", entry.host, entry.port);
        }
    }
    Ok(())
}

async fn serve(mappings: Option<String>, cert: &CertArgs, sport: u16) -> Result<()> {
    let cert_path = cert.cert_path();
    let key_path = cert.key_path();

    let certificate = PemFiles.get_certificate(&cert_path, &key_path).map_err(|e| {
        anyhow!(
            "Unable to find SSL cert, make sure you run setup first\ne.g.\tgloss setup --host='example.org'\n({})",
            e
        )
    })?;

    let Some(mappings) = mappings.filter(|m| !m.trim().is_empty()) else {
        bail!("What ports do you want to map to?\ne.g.\t`gloss --map 'example.org:8080'`");
    };

    info!("Starting Gloss v1.0.0");
    let table = MappingTable::build_for_listener(&mappings, sport)?;
    let acceptor = tls_acceptor(certificate).context("Invalid SSL cert")?;

    let context = Arc::new(Context::new(table, AccessLog::stdout()));
    let config = ServerConfig {
        tls_port: sport,
        ..ServerConfig::default()
    };

    let server = Arc::new(ProxyServer::new(config, context, acceptor));
    server.run().await?;

    Ok(())
}
