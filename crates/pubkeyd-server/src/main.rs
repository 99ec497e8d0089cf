use clap::Parser;
use pubkeyd_server::ServerBuilder;
use pubkeyd_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};

/// Serve SSH authorized_keys for directory identities and roles.
#[derive(Debug, Parser)]
#[command(name = "pubkeyd", version, about)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, env = "PUBKEYD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// TCP port to listen on, overriding the configuration
    #[arg(long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let cli = Cli::parse();

    // Initialize tracing early with the default level
    pubkeyd_server::observability::init_tracing();

    let mut cfg = match load_config(Some(&cli.config)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }
    if cli.verbose {
        cfg.logging.level = "debug".to_string();
    }
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        std::process::exit(2);
    }

    pubkeyd_server::observability::apply_logging_level(&cfg.logging.level);
    tracing::info!(path = %cli.config, "Configuration loaded");

    pubkeyd_server::metrics::init_metrics();

    // Initial directory load; refusing to serve without one.
    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Initial directory load failed");
            eprintln!("Server initialization failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }
}
