//! bucket-ftp command-line entry point
//!
//! Runs one filesystem command against the configured store, through the
//! same driver the protocol engine uses.

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bucket_ftp::config::Config;
use bucket_ftp::driver::{BucketDriver, Session};
use bucket_ftp::info::FileInfo;
use bucket_ftp::stream::OpenMode;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: bucket-ftp <config.yaml> <command> [args...]");
    eprintln!();
    eprintln!("bucket-ftp - An object store presented as an FTP filesystem");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  ls [path]              List a directory");
    eprintln!("  cd <path>              Check that a directory exists");
    eprintln!("  mkdir <path>           Create a directory");
    eprintln!("  put <local> <remote>   Upload a local file");
    eprintln!("  get <remote> <local>   Download a file");
    eprintln!("  rm <path>              Delete a file or directory tree");
    eprintln!("  mv <from> <to>         Rename a file or directory tree");
    eprintln!("  stat <path>            Show metadata for a path");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  bucket-ftp /etc/bucket-ftp/config.yaml ls /reports");
}

fn print_entry(entry: &FileInfo) {
    println!(
        "{} {:>12} {:>12} {}",
        entry.mode_string(),
        entry.size,
        entry.mtime_secs(),
        entry.name
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Loaded configuration from {:?}", config_path);

    let user = config.auth.user.clone();
    let password = config.auth.password.clone();
    let driver = BucketDriver::from_config(config).await?;
    let mut session = driver.authenticate(&user, &password)?;

    let command = args[2].as_str();
    let rest = &args[3..];

    if let Err(e) = run(&mut session, command, rest).await {
        error!("{} failed: {}", command, e);
        eprintln!("{}: {}", command, e);
        std::process::exit(1);
    }

    Ok(())
}

fn required<'a>(
    args: &'a [String],
    idx: usize,
    command: &str,
) -> Result<&'a str, Box<dyn std::error::Error>> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| format!("{}: missing argument {}", command, idx + 1).into())
}

async fn run(
    session: &mut Session,
    command: &str,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let arg = |idx: usize| required(args, idx, command);

    match command {
        "ls" => {
            let path = args.first().map(String::as_str).unwrap_or(".");
            for entry in session.list_files(path).await? {
                print_entry(&entry);
            }
        }
        "cd" => {
            session.change_directory(arg(0)?).await?;
            println!("{}", session.current_dir());
        }
        "mkdir" => session.make_directory(arg(0)?).await?,
        "put" => {
            let mut local = tokio::fs::File::open(arg(0)?).await?;
            let mut handle = session.open_file(arg(1)?, OpenMode::Write).await?;
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];

            loop {
                let n = local.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                handle.write(&buf[..n]).await?;
            }
            handle.close().await?;
            info!("Uploaded {} bytes to {}", handle.transferred(), handle.key());
        }
        "get" => {
            let mut handle = session.open_file(arg(0)?, OpenMode::Read).await?;
            let mut local = tokio::fs::File::create(arg(1)?).await?;
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];

            loop {
                let n = handle.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                local.write_all(&buf[..n]).await?;
            }
            local.flush().await?;
            handle.close().await?;
            info!("Downloaded {} bytes from {}", handle.transferred(), handle.key());
        }
        "rm" => session.delete_file(arg(0)?).await?,
        "mv" => session.rename_file(arg(0)?, arg(1)?).await?,
        "stat" => print_entry(&session.stat_file(arg(0)?).await?),
        other => {
            print_usage();
            return Err(format!("unknown command: {}", other).into());
        }
    }

    Ok(())
}
