//! deploy-cli - deploys local directories to a deploy server.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use deploy_cli::commands::{self, Context, DeployKind};
use deploy_cli::config::{ClientConfig, ConfigPaths};
use deploy_core::utils::logger;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Answer yes to confirmation prompts
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Configuration directory (default ~/.sitedeploy)
    #[arg(long, value_name = "DIR", global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show or change client settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Create a site on the server
    Create {
        name: String,
        /// Short description
        #[arg(short, long, default_value = "")]
        desc: String,
    },

    /// Delete a site and its content from the server
    Delete { name: String },

    /// List sites visible to you
    List,

    /// Deploy changes since the last deploy (full on first deploy)
    Deploy(DeployArgs),

    /// Deploy the whole directory
    DeployFull(DeployArgs),

    /// Deploy only changes; requires a previous deploy
    DeployInc(DeployArgs),

    /// Show what the next deploy would ship
    Status {
        name: Option<String>,
        dir: Option<PathBuf>,
    },

    /// List the recorded versions of a site
    Versions {
        name: String,
        /// Maximum number of versions to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Restore a site to an earlier version
    Rollback {
        name: String,
        hash: String,
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Replace the local directory with the live site
    Pull {
        name: Option<String>,
        dir: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct DeployArgs {
    /// Site name (matched from the current directory when omitted)
    name: Option<String>,

    /// Directory to deploy (the configured one when omitted)
    dir: Option<PathBuf>,

    /// Version message
    #[arg(short, long)]
    message: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// `set server|username|password|api_key|log_level <value>` or
    /// `set site <name> <dir>`
    Set {
        key: String,
        #[arg(num_args = 1..=2, required = true)]
        values: Vec<String>,
    },

    /// Print the current settings
    Get,

    /// `remove <key>` or `remove site <name>`
    Remove { key: String, name: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let paths = match &args.config_dir {
        Some(dir) => ConfigPaths::new(dir),
        None => ConfigPaths::from_home()?,
    };
    let config = ClientConfig::load(&paths.config_file())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    logger::init(log_level)?;
    tracing::debug!(server = %config.server_url, config_dir = %paths.root().display(), "Loaded configuration");

    let mut ctx = Context::new(config, paths);
    ctx.assume_yes = args.yes;

    if let Err(e) = run(&mut ctx, args.command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(ctx: &mut Context, command: Command) -> Result<()> {
    match command {
        Command::Config { action } => match action {
            ConfigAction::Set { key, values } => match (key.as_str(), values.as_slice()) {
                ("site", [name, dir]) => commands::config_set_site(ctx, name, &PathBuf::from(dir)),
                ("site", _) => bail!("usage: deploy-cli config set site <name> <dir>"),
                (_, [value]) => commands::config_set(ctx, &key, value),
                _ => bail!("usage: deploy-cli config set <key> <value>"),
            },
            ConfigAction::Get => {
                commands::config_show(ctx);
                Ok(())
            }
            ConfigAction::Remove { key, name } => match (key.as_str(), name) {
                ("site", Some(name)) => commands::config_remove_site(ctx, &name),
                ("site", None) => bail!("usage: deploy-cli config remove site <name>"),
                (_, _) => commands::config_remove(ctx, &key),
            },
        },
        Command::Create { name, desc } => commands::create(ctx, &name, &desc).await,
        Command::Delete { name } => commands::delete(ctx, &name).await,
        Command::List => commands::list(ctx).await,
        Command::Deploy(a) => deploy(ctx, a, DeployKind::Smart).await,
        Command::DeployFull(a) => deploy(ctx, a, DeployKind::Full).await,
        Command::DeployInc(a) => deploy(ctx, a, DeployKind::Incremental).await,
        Command::Status { name, dir } => commands::status(ctx, name.as_deref(), dir.as_deref()).await,
        Command::Versions { name, limit } => commands::versions(ctx, &name, limit).await,
        Command::Rollback { name, hash, message } => {
            commands::rollback(ctx, &name, &hash, message.as_deref()).await
        }
        Command::Pull { name, dir } => commands::pull(ctx, name.as_deref(), dir.as_deref()).await,
    }
}

async fn deploy(ctx: &Context, args: DeployArgs, kind: DeployKind) -> Result<()> {
    commands::deploy(
        ctx,
        args.name.as_deref(),
        args.dir.as_deref(),
        args.message.as_deref(),
        kind,
    )
    .await
}
