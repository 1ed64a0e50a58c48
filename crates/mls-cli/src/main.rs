use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mls")]
#[command(about = "MLM settlement engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (defaults -> environment -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Settle every completed, unsettled order once
    Sweep {
        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Fail when the config contains keys the CLI does not read
        #[arg(long, default_value_t = false)]
        strict_config: bool,
    },

    /// Pay for a product from the member's Sale3 wallet
    Payback {
        /// Member id or username (e.g. 42 or EL042)
        #[arg(long)]
        member: String,

        /// Product id
        #[arg(long)]
        product: i64,

        /// Decimal amount (e.g. 250000 or 1250.5)
        #[arg(long)]
        amount: String,

        /// Note stored on the payment record
        #[arg(long, default_value = "Manual payback")]
        note: String,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Print a member's wallet balances
    Wallet {
        /// Member id or username
        #[arg(long)]
        member: String,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Connectivity, schema presence and unsettled backlog
    Status,

    /// Apply SQL migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev-time convenience; absence is fine.
    let _ = dotenvy::from_filename(".env.local");

    // stdout carries key=value output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = mls_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = mls_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_orders_table={} unsettled_completed_orders={}",
                        s.ok, s.has_orders_table, s.unsettled_completed_orders
                    );
                }
                DbCmd::Migrate => {
                    mls_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let loaded = commands::load_config(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Sweep {
            config_paths,
            strict_config,
        } => commands::sweep::run(config_paths, strict_config).await?,

        Commands::Payback {
            member,
            product,
            amount,
            note,
            config_paths,
        } => {
            commands::payback::run(commands::payback::PaybackArgs {
                member,
                product_id: product,
                amount,
                note,
                config_paths,
            })
            .await?
        }

        Commands::Wallet {
            member,
            config_paths,
        } => commands::wallet::run(member, config_paths).await?,
    }

    Ok(())
}
