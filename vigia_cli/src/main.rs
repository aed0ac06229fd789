//! Vigia CLI - operate the abuse-protection service
//!
//! Usage:
//!   vigia monitor                 Show bans, counters and top identities
//!   vigia identity-key            Compute the identity key for a submission
//!   vigia offer-link <URL>        Build a link carrying the offer secret

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigia_common::constants;

#[derive(Parser)]
#[command(name = "vigia")]
#[command(version)]
#[command(about = "Operate the Vigia abuse-protection service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the admin monitor snapshot
    Monitor {
        /// Server base URL
        #[arg(long, env = "VIGIA_URL", default_value = "http://localhost:8080")]
        url: String,

        /// Admin bearer token
        #[arg(long, env = "VIGIA_ADMIN_TOKEN")]
        token: String,
    },

    /// Compute the identity key for a name, national ID and phone
    IdentityKey {
        #[arg(long, default_value = "")]
        name: String,

        #[arg(long, alias = "cpf", default_value = "")]
        national_id: String,

        #[arg(long, default_value = "")]
        phone: String,
    },

    /// Build a protected-route link carrying the offer secret
    OfferLink {
        /// Page URL, query parameters are kept
        url: String,

        /// Offer secret
        #[arg(long, env = "OFFER_SECRET", hide_env_values = true)]
        secret: String,

        /// Query parameter name for the secret
        #[arg(long, env = "OFFER_SECRET_PARAM", default_value = constants::DEFAULT_SECRET_PARAM)]
        param: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},vigia_cli=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match cli.command {
        Commands::Monitor { url, token } => {
            commands::monitor::run(&url, &token).await?;
        }

        Commands::IdentityKey {
            name,
            national_id,
            phone,
        } => {
            commands::identity::run(&name, &national_id, &phone)?;
        }

        Commands::OfferLink { url, secret, param } => {
            commands::link::run(&url, &secret, &param)?;
        }
    }

    Ok(())
}
