use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "lbgrid",
    about = "LbGrid — elastic load-balancer appliance tooling",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule file into a complete HAProxy configuration.
    ///
    /// Stats port, URI, credentials and allowed CIDRs come from the
    /// lbgrid.toml given with --config (defaults otherwise); the rule
    /// file's [stats] section picks the visibility and addresses.
    Render {
        /// Rule file (TOML)
        path: String,
        /// Settings file (lbgrid.toml)
        #[arg(short, long)]
        config: Option<String>,
        /// Compile the [[forwarding]] entries instead of [[load_balancers]]
        #[arg(long)]
        forwarding: bool,
    },
    /// Print the firewall add/remove/stats sets for a rule file as JSON
    FwRules {
        /// Rule file (TOML)
        path: String,
        /// Settings file (lbgrid.toml)
        #[arg(short, long)]
        config: Option<String>,
    },
    /// List supported stickiness methods and their parameters as JSON
    Methods,
    /// Generate an lbgrid.toml with every default spelled out
    Init {
        #[arg(short, long, default_value = ".")]
        path: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lbgrid=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render { path, config, forwarding } => {
            commands::render::render(&path, config.as_deref(), forwarding)
        }
        Commands::FwRules { path, config } => {
            commands::render::fw_rules(&path, config.as_deref())
        }
        Commands::Methods => commands::methods::methods(),
        Commands::Init { path } => commands::init::init(&path),
    }
}
