//! `kvfs` command-line tool.
//!
//! Every invocation opens the named database, runs one operation and
//! closes it again, so several shells can work on one database: the lock
//! file in the data directory keeps their initializations apart.
//!
//! Usage:
//!   kvfs init
//!   echo hello | kvfs write /greeting
//!   kvfs cat /greeting
//!   kvfs --name notes ls /
//!   RUST_LOG=kvfs=debug kvfs stat --json /greeting

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt};

use kvfs_core::{FsConfig, InitOptions, KvFs, MutexKind, OpOptions, StoreKind};

/// Key-value backed virtual filesystem.
#[derive(Parser, Debug)]
#[command(name = "kvfs")]
#[command(about = "Inspect and edit a kvfs database")]
struct Args {
    /// Database name
    #[arg(short, long, default_value = "default", global = true)]
    name: String,

    /// Config file (default: $XDG_CONFIG_HOME/kvfs/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding databases and lock files
    /// (default: $XDG_DATA_HOME/kvfs)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database if it does not exist
    Init,
    /// Print a file
    Cat { path: String },
    /// Write a file from an argument or stdin
    Write {
        path: String,
        /// Content; read from stdin when absent
        content: Option<String>,
        /// Permission bits in octal, e.g. 644
        #[arg(long, value_parser = parse_mode)]
        mode: Option<u32>,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create a directory
    Mkdir {
        path: String,
        #[arg(long, value_parser = parse_mode)]
        mode: Option<u32>,
    },
    /// Remove files
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Remove an empty directory
    Rmdir { path: String },
    /// Rename a file or directory
    Mv { from: String, to: String },
    /// Create a symbolic link at `path` pointing to `target`
    Ln { target: String, path: String },
    /// Show metadata
    Stat {
        path: String,
        /// Do not follow a symlink in the last component
        #[arg(short = 'l', long)]
        no_follow: bool,
        #[arg(long)]
        json: bool,
    },
    /// Total size of regular files below a path
    Du {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Erase every file in the database
    Wipe,
}

fn parse_mode(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0o"), 8).map_err(|e| format!("bad mode {s}: {e}"))
}

fn config_path(args: &Args) -> Option<PathBuf> {
    args.config
        .clone()
        .or_else(|| dirs::config_dir().map(|p| p.join("kvfs").join("config.toml")))
}

fn data_dir(args: &Args) -> PathBuf {
    args.data_dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kvfs")
    })
}

/// Load the config, then point in-process defaults at durable ones: a
/// one-shot process gains nothing from a memory store or an in-process
/// lock.
fn load_config(args: &Args) -> Result<FsConfig> {
    let mut config = match config_path(args) {
        Some(path) if path.exists() => FsConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        Some(path) if args.config.is_some() => bail!("config {} not found", path.display()),
        _ => FsConfig::default(),
    };

    let dir = data_dir(args);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating data directory {}", dir.display()))?;
    if config.store == StoreKind::Memory {
        config.store = StoreKind::Sqlite { dir: dir.clone() };
    }
    if config.mutex == MutexKind::Local {
        config.mutex = MutexKind::File {
            dir: dir.join("locks"),
        };
    }
    Ok(config)
}

fn with_mode(mode: Option<u32>) -> OpOptions {
    match mode {
        Some(mode) => OpOptions::new().with_mode(mode),
        None => OpOptions::new(),
    }
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    std::io::stdin()
        .read_to_end(&mut buf)
        .context("reading stdin")?;
    Ok(buf)
}

async fn run(fs: &KvFs, command: Command) -> Result<()> {
    let mut out = std::io::stdout().lock();
    match command {
        Command::Init | Command::Wipe => {}
        Command::Cat { path } => {
            let data = fs.read_file(&path, OpOptions::new()).await?;
            out.write_all(data.as_bytes())?;
        }
        Command::Write {
            path,
            content,
            mode,
        } => {
            let bytes = match content {
                Some(text) => text.into_bytes(),
                None => read_stdin()?,
            };
            fs.write_file(&path, bytes, with_mode(mode)).await?;
        }
        Command::Ls { path } => {
            for name in fs.readdir(&path, OpOptions::new()).await? {
                writeln!(out, "{name}")?;
            }
        }
        Command::Mkdir { path, mode } => fs.mkdir(&path, with_mode(mode)).await?,
        Command::Rm { paths } => fs.unlink_many(&paths, OpOptions::new()).await?,
        Command::Rmdir { path } => fs.rmdir(&path, OpOptions::new()).await?,
        Command::Mv { from, to } => fs.rename(&from, &to).await?,
        Command::Ln { target, path } => fs.symlink(&target, &path).await?,
        Command::Stat {
            path,
            no_follow,
            json,
        } => {
            let stat = if no_follow {
                fs.lstat(&path, OpOptions::new()).await?
            } else {
                fs.stat(&path, OpOptions::new()).await?
            };
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&stat)?)?;
            } else {
                writeln!(out, "{path}")?;
                writeln!(out, "  type:  {:?}", stat.kind)?;
                writeln!(out, "  mode:  {:o}", stat.mode)?;
                writeln!(out, "  size:  {}", stat.size)?;
                writeln!(out, "  ino:   {}", stat.ino)?;
                writeln!(out, "  mtime: {}", stat.mtime_ms)?;
            }
        }
        Command::Du { path } => {
            let size = fs.du(&path).await?;
            writeln!(out, "{size}\t{path}")?;
        }
    }
    fs.flush().await?;
    Ok(())
}

fn describe(data_dir: &Path, name: &str) -> String {
    format!("{}/{name}", data_dir.display())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Output goes to stdout, diagnostics to stderr.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let dir = data_dir(&args);
    let options = match args.command {
        Command::Wipe => InitOptions::default().wiped(),
        _ => InitOptions::default(),
    };

    tracing::debug!(db = %describe(&dir, &args.name), "opening");
    let fs = KvFs::open(&args.name, config, options)
        .await
        .with_context(|| format!("opening {}", describe(&dir, &args.name)))?;

    let result = run(&fs, args.command).await;
    fs.close().await.context("closing database")?;
    result
}
