mod commands;
mod config;

use std::process::ExitCode;

use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vm_infra::{ProviderRegistry, Result};

use crate::config::CtlConfig;

#[derive(Debug, Parser)]
#[command(name = "vmctl", version, about = "Manage VMs across cloud providers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List VMs from every provider.
    List {
        /// Print the full VM records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create VMs, spread over the eligible providers.
    Create(CreateArgs),
    /// Add hours to the lifetime of VMs.
    Extend {
        #[arg(required = true)]
        names: Vec<String>,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        hours: u64,
    },
    /// Delete VMs.
    Destroy {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Print the account all providers agree on.
    Whoami,
    /// Configure (or with --clean, remove) local SSH access to VMs.
    SshConfig {
        #[arg(long)]
        clean: bool,
    },
}

#[derive(Debug, Args)]
struct CreateArgs {
    #[arg(required = true)]
    names: Vec<String>,
    /// Lifetime of the new VMs [default: VM_LIFETIME_HOURS or 12].
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    lifetime_hours: Option<u64>,
    /// Use local SSDs where the provider offers them.
    #[arg(long)]
    local_ssd: bool,
    /// Spread VMs over several regions.
    #[arg(long)]
    geo: bool,
    /// Providers allowed to host the VMs [default: VM_PROVIDERS or all].
    #[arg(long, value_delimiter = ',')]
    providers: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let registry = vm_infra::build_providers();
    tracing::debug!(providers = ?registry.sorted_provider_names(), "VM providers ready");

    let matches = Cli::command()
        .mut_subcommand("create", |create| registry.configure_create_flags(create))
        .get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    match run(cli, &matches, &registry).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "vmctl failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, matches: &ArgMatches, registry: &ProviderRegistry) -> Result<()> {
    let config = CtlConfig::from_env()?;

    match cli.command {
        Command::List { json } => commands::list(registry, json).await,
        Command::Create(args) => {
            if let Some(create) = matches.subcommand_matches("create") {
                registry.apply_create_flags(create)?;
            }
            let mut opts = config.create_opts();
            if let Some(hours) = args.lifetime_hours {
                opts.lifetime = config::hours(hours);
            }
            opts.use_local_ssd = args.local_ssd;
            opts.geo_distributed = args.geo;
            if !args.providers.is_empty() {
                opts.vm_providers = args.providers;
            }
            commands::create(registry, args.names, opts).await
        }
        Command::Extend { names, hours } => {
            commands::extend(registry, &names, config::hours(hours)).await
        }
        Command::Destroy { names } => commands::destroy(registry, &names).await,
        Command::Whoami => {
            let account = commands::whoami(registry).await?;
            println!("{account}");
            Ok(())
        }
        Command::SshConfig { clean } => commands::ssh_config(registry, clean).await,
    }
}
