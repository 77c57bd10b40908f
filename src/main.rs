use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use trellis::commands::{self, FeedAction, InstallOptions};
use trellis::manager::CancelToken;
use trellis::runtime::{RealRuntime, Runtime};

/// trellis - versioned package installer
///
/// Installs packages side by side from local directories and feed indexes,
/// resolving dependencies and keeping one current version of each product
/// linked into the install root.
///
/// Examples:
///   trellis feed add ~/packages      # Scan ~/packages on every run
///   trellis install zlib             # Install the best zlib and its dependencies
///   trellis install ./curl-7.0.tgz   # Install a package file
///   trellis install --upgrade zlib   # Install zlib, accepting newer versions
#[derive(Parser, Debug)]
#[command(author, version = env!("TRELLIS_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Install root directory (overrides defaults; also via TRELLIS_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "TRELLIS_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub install_root: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install packages and their dependencies
    Install(InstallArgs),

    /// Remove installed packages
    Remove(RemoveArgs),

    /// Make an installed version the current one
    SetCurrent(SetCurrentArgs),

    /// List known packages
    List(ListArgs),

    /// Manage feeds
    #[command(subcommand)]
    Feed(FeedCommand),

    /// Manage the package cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Package names, package files or feed locations
    #[arg(value_name = "NAME", required = true)]
    pub names: Vec<String>,

    /// Show what would be installed without installing anything
    #[arg(long, short = 'p')]
    pub pretend: bool,

    /// Install packages matching PATTERN exactly as requested (all when bare)
    #[arg(
        long = "as-specified",
        value_name = "PATTERN",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "*"
    )]
    pub as_specified: Vec<String>,

    /// Allow packages matching PATTERN to be replaced by newer versions (all when bare)
    #[arg(
        long,
        value_name = "PATTERN",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "*"
    )]
    pub upgrade: Vec<String>,

    /// Also scan DIR and all of its subdirectories for packages
    #[arg(long = "recursive-scan", value_name = "DIR")]
    pub recursive_scan: Vec<String>,

    /// Do not scan locations matching GLOB (nothing but installed packages when bare)
    #[arg(
        long = "no-scan",
        value_name = "GLOB",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "*"
    )]
    pub no_scan: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    #[arg(value_name = "NAME", required = true)]
    pub names: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct SetCurrentArgs {
    #[arg(value_name = "NAME")]
    pub name: String,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Package name, may contain wildcards
    #[arg(value_name = "FILTER")]
    pub filter: Option<String>,

    /// Only list installed packages
    #[arg(long, short = 'i')]
    pub installed: bool,
}

#[derive(clap::Subcommand, Debug)]
enum FeedCommand {
    /// Register a feed location
    Add {
        #[arg(value_name = "LOCATION")]
        location: String,
    },
    /// Unregister a feed location
    Remove {
        #[arg(value_name = "LOCATION")]
        location: String,
    },
    /// Show registered feeds
    List,
}

#[derive(clap::Subcommand, Debug)]
enum CacheCommand {
    /// Forget files remembered as not being packages
    Flush,
}

/// Cancels the returned token on Ctrl-C until the watcher is aborted.
fn watch_interrupt() -> (CancelToken, tokio::task::JoinHandle<()>) {
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            on_interrupt.cancel();
        }
    });
    (cancel, watcher)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime: Arc<dyn Runtime> = Arc::new(RealRuntime);
    let root = cli.install_root;

    match cli.command {
        Commands::Install(args) => {
            let (cancel, watcher) = watch_interrupt();
            let options = InstallOptions {
                names: args.names,
                pretend: args.pretend,
                as_specified: args.as_specified,
                upgrade: args.upgrade,
                recursive_scan: args.recursive_scan,
                no_scan: args.no_scan,
            };
            let result = commands::install(runtime, root, options, cancel).await;
            watcher.abort();
            result?
        }
        Commands::Remove(args) => {
            let (cancel, watcher) = watch_interrupt();
            let result = commands::remove(runtime, root, &args.names, cancel);
            watcher.abort();
            result?
        }
        Commands::SetCurrent(args) => commands::set_current(runtime, root, &args.name)?,
        Commands::List(args) => {
            commands::list(runtime, root, args.filter.as_deref(), args.installed)?
        }
        Commands::Feed(command) => {
            let action = match command {
                FeedCommand::Add { location } => FeedAction::Add(location),
                FeedCommand::Remove { location } => FeedAction::Remove(location),
                FeedCommand::List => FeedAction::List,
            };
            commands::feed(runtime, root, action)?
        }
        Commands::Cache(CacheCommand::Flush) => commands::flush_cache(runtime, root)?,
    }
    Ok(())
}
