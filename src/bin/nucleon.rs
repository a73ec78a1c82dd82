//! Nucleon CLI
//!
//! Harness around the kernel's file system: formats a virtual disk image
//! and runs file operations against it.
//!
//! # Usage
//!
//! ```bash
//! # Format a fresh disk image
//! nucleon --disk DISK format
//!
//! # Copy a host file in, then inspect
//! nucleon --disk DISK cp ./notes.txt /notes
//! nucleon --disk DISK ls /
//! nucleon --disk DISK -d f lr /
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nucleon::{DebugFlags, Kernel, MachineConfig, OsResult};

/// Nucleon - instructional OS virtual disk harness
#[derive(Parser)]
#[command(name = "nucleon")]
#[command(version)]
#[command(about = "Nucleon instructional OS core", long_about = None)]
struct Cli {
    /// Debug mask: t threads, c scheduler, f file system, d disk, + all
    #[arg(short = 'd', long = "debug", default_value = "", global = true)]
    debug: String,

    /// Disk image path
    #[arg(long, default_value = "DISK", global = true)]
    disk: PathBuf,

    /// Disk size in sectors (overrides the configuration file)
    #[arg(long, global = true)]
    sectors: Option<usize>,

    /// Machine configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format the disk with an empty file system
    Format,
    /// Copy a host file onto the virtual disk
    Cp {
        /// Host file to read
        host: PathBuf,
        /// Destination path on the virtual disk
        dest: String,
    },
    /// Create a directory
    Mkdir {
        /// Directory path to create
        path: String,
    },
    /// List a directory
    Ls {
        /// Directory to list
        #[arg(default_value = "/")]
        path: String,
    },
    /// List a directory tree recursively
    Lr {
        /// Directory to start from
        #[arg(default_value = "/")]
        path: String,
    },
    /// Remove a file
    Rm {
        /// Path to remove
        path: String,
    },
    /// Dump the file system structures
    Print,
}

fn main() {
    let cli = Cli::parse();

    init_logging(&cli.debug);

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    let format = matches!(cli.command, Commands::Format);
    let mut kernel = match Kernel::new(&config, format) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("Boot failed: {}", e);
            process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Format => {
            println!("Formatted {} ({} sectors)", cli.disk.display(), config.num_sectors);
            Ok(())
        }
        Commands::Cp { host, dest } => kernel.file_system.copy_from_host(host, dest),
        Commands::Mkdir { path } => kernel.file_system.create_directory(path),
        Commands::Ls { path } => kernel.file_system.list(path),
        Commands::Lr { path } => kernel.file_system.recursive_list(path),
        Commands::Rm { path } => kernel.file_system.remove(path),
        Commands::Print => {
            kernel.file_system.print();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    kernel.sys_halt();
}

fn load_config(cli: &Cli) -> OsResult<MachineConfig> {
    let mut config = match &cli.config {
        Some(path) => MachineConfig::load(path)?,
        None => MachineConfig::default(),
    };

    config.disk_image = Some(cli.disk.clone());
    if let Some(sectors) = cli.sectors {
        config.num_sectors = sectors;
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(mask: &str) {
    let flags = DebugFlags::from_mask(mask);

    // Message-only output: the scheduler trace lines must reach the
    // scraping harness exactly as formatted.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(flags.filter_directives("info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(false)
        .without_time()
        .init();
}
