use blockvault::{Container, ContainerRegistry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blockvault", version = "1.0.0", about = "Single-file block-addressable storage container CLI")]
struct Cli {
    /// Path to the container file
    #[arg(short, long, global = true)]
    file: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new container
    Create {
        #[arg(long, default_value = "4096")]
        block_size: u64,
        #[arg(long, default_value = "4096")]
        total_blocks: u64,
    },
    /// Copy a host file into the container
    Put {
        input: PathBuf,
        /// Destination path inside the container (defaults to the host file name)
        #[arg(short, long)]
        dest: Option<String>,
    },
    /// Copy a file out of the container to the host filesystem
    Get {
        path: String,
        output: PathBuf,
    },
    /// List the contents of a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create a directory
    Mkdir {
        path: String,
    },
    /// Change the current directory (persisted in the container)
    Cd {
        path: String,
    },
    /// Show superblock and dedup/free-block statistics
    Info,
    /// Run the basic health check
    Check,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Create { block_size, total_blocks } => {
            let registry = ContainerRegistry::new();
            let container = registry.create("cli", &cli.file, total_blocks, block_size)?;
            println!(
                "Created {} ({} blocks x {} B)",
                cli.file.display(),
                container.total_blocks(),
                container.block_size()
            );
        }

        Commands::Put { input, dest } => {
            let container = Container::open(&cli.file)?;
            let name = dest.unwrap_or_else(|| {
                format!("/{}", input.file_name().unwrap_or_default().to_string_lossy())
            });
            container.copy_in(&input, &name)?;
            println!("put {} -> {}", input.display(), name);
        }

        Commands::Get { path, output } => {
            let container = Container::open(&cli.file)?;
            container.copy_out(&path, &output)?;
            println!("get {} -> {}", path, output.display());
        }

        Commands::Ls { path } => {
            let container = Container::open(&cli.file)?;
            let (dirs, files) = container.list(&path)?;
            for d in dirs {
                println!("  {d}/");
            }
            for f in files {
                println!("  {f}");
            }
        }

        Commands::Mkdir { path } => {
            let container = Container::open(&cli.file)?;
            let (parent, name) = split_parent(&path);
            container.make_directory(&name, &parent)?;
            println!("mkdir {path}");
        }

        Commands::Cd { path } => {
            let container = Container::open(&cli.file)?;
            container.change_directory(&path)?;
            println!("cwd now {}", container.current_directory());
        }

        Commands::Info => {
            let container = Container::open(&cli.file)?;
            println!("── blockvault container ─────────────────────────────────");
            println!("  Path          {}", cli.file.display());
            println!("  Total blocks  {}", container.total_blocks());
            println!("  Block size    {} B", container.block_size());
            println!("  Free blocks   {}", container.free_block_count());
            println!("  Current dir   {}", container.current_directory());
        }

        Commands::Check => {
            let container = Container::open(&cli.file)?;
            let healthy = container.basic_health_check();
            println!("health: {}", if healthy { "OK" } else { "FAILED" });
            if !healthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Splits a canonical path into (parent, name) for the directory ops that
/// take them separately.
fn split_parent(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}
