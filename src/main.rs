mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use crate::cli::HashChoice;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL to download
    #[arg(index = 1)]
    url: String,

    /// Destination file (defaults to <download-dir>/<name from URL>)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Fetch in slices of this many bytes (0 picks 20 MiB)
    #[arg(short = 's', long)]
    slice: Option<u64>,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    rate_limit: Option<u32>,

    /// Digest computed while downloading
    #[arg(long, value_enum, default_value = "md5")]
    hash: HashChoice,

    /// Fail unless the digest matches this hex string
    #[arg(long = "expect-hash")]
    expect_hash: Option<String>,

    /// Print the final file descriptor as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let mut args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    // Output dir might not exist yet, so we resolve it relative to current dir
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        crate::commands::run_single_download(crate::commands::DownloadArgs {
            url: args.url,
            output: args.output,
            download_dir: args.download_dir,
            slice: args.slice,
            rate_limit: args.rate_limit,
            hash: args.hash.into(),
            expect_hash: args.expect_hash,
            json: args.json,
        })
        .await
    })
}
