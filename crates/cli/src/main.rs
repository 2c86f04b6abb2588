use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gowa")]
#[command(about = "GoWA - WhatsApp gateway multidevice", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the HTTP gateway (default when no subcommand is given).
    Serve {
        /// Config file path (default: GOWA_CONFIG_PATH, else built-in defaults)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from PORT or 3000)
        #[arg(long, short)]
        port: Option<u16>,

        /// Session storage directory (default from SESSION_PATH or ./sessions)
        #[arg(long, value_name = "DIR")]
        session_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("gowa {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve {
            config,
            port,
            session_path,
        }) => {
            if let Err(e) = run_gateway(config, port, session_path).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            if let Err(e) = run_gateway(None, None, None).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_gateway(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    session_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = gowa::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    if let Some(path) = session_path {
        config.session.path = path;
    }
    log::info!(
        "starting gateway on {} (sessions in {})",
        config.bind_addr(),
        config.session.path.display()
    );
    gowa::gateway::run_gateway(config).await
}
