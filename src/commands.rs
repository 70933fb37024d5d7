use anyhow::{bail, Context, Result};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use log::info;
use std::path::PathBuf;
use std::time::Duration;

use slicedl::{
    DownloadRequest, DownloadSession, HashAlgorithm, SessionConfig, Status, TransportConfig,
};

pub struct DownloadArgs {
    pub url: String,
    pub output: Option<PathBuf>,
    pub download_dir: PathBuf,
    pub slice: Option<u64>,
    pub rate_limit: Option<u32>,
    pub hash: HashAlgorithm,
    pub expect_hash: Option<String>,
    pub json: bool,
}

pub async fn run_single_download(args: DownloadArgs) -> Result<()> {
    let config = SessionConfig {
        download_dir: args.download_dir,
        hash: args.hash,
        ..SessionConfig::default()
    };
    let transport = TransportConfig {
        rate_limit: args.rate_limit,
        ..TransportConfig::default()
    };
    let mut session = DownloadSession::http(config, transport).context("Failed to build HTTP client")?;

    let mut request = DownloadRequest::new(args.url.clone());
    if let Some(output) = args.output {
        request = request.save_path(output);
    }
    if let Some(slice) = args.slice {
        request = request.sliced(slice);
    }
    if !session.request_download(request) {
        bail!("Failed to start download of {}", args.url);
    }

    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {eta:>4} {msg}")
        .context("Invalid progress template")?
        .progress_chars("=>-"));
    pb.enable_steady_tick(Duration::from_millis(120));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while session.is_busy() {
        tokio::select! {
            _ = &mut ctrl_c => interrupted = true,
            handled = session.next_event() => {
                if !handled {
                    break;
                }
            }
        }
        if interrupted {
            break;
        }
        if let Some(total) = session.total_size() {
            pb.set_length(total);
        }
        pb.set_position(session.downloaded_bytes());
        pb.set_message(format!("{:.1} KB/s", session.speed_kbs()));
    }

    if !session.status().is_terminal() {
        session.cancel();
    }
    let status = session.status();
    match status {
        Status::Succeeded => pb.finish_with_message("Done"),
        _ => pb.abandon_with_message(status.to_string()),
    }

    if interrupted && status == Status::Canceled {
        bail!("Download of {} interrupted", args.url);
    }
    if status != Status::Succeeded {
        bail!(
            "Download of {} ended {} after {}",
            args.url,
            status,
            HumanBytes(session.downloaded_bytes())
        );
    }

    let info = session
        .downloaded_file_info()
        .context("Succeeded download has no descriptor")?;
    info!(
        "Saved {} ({}) to {}",
        info.name,
        HumanBytes(session.downloaded_bytes()),
        info.save_path.display()
    );

    if let Some(expected) = &args.expect_hash {
        if !session.hash_check(expected) {
            bail!(
                "Hash mismatch for {}: expected {}, got {}",
                info.save_path.display(),
                expected,
                info.hash.as_deref().unwrap_or("-")
            );
        }
    }

    if args.json {
        let json = serde_json::to_string_pretty(info).context("Failed to serialize descriptor")?;
        println!("{}", json);
    }

    Ok(())
}
