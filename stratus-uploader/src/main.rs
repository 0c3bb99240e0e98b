use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use stratus_core::StratusClient;
use stratus_uploader::UploadConfig;
use stratus_uploader::upload::{Entry, NoListingCache, UploadManager, UploadStatus};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_DESTINATION: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Upload(UploadArgs),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadArgs {
    destination: String,
    json: bool,
    paths: Vec<PathBuf>,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut destination = DEFAULT_DESTINATION.to_string();
    let mut json = false;
    let mut paths = Vec::new();
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliMode::Help),
            "--json" => json = true,
            "--dest" => {
                destination = args
                    .next()
                    .filter(|value| !value.is_empty())
                    .context("--dest requires a node id")?;
            }
            other if other.starts_with("--") => anyhow::bail!("unknown argument: {other}"),
            path => paths.push(PathBuf::from(path)),
        }
    }
    if paths.is_empty() {
        anyhow::bail!("nothing to upload; pass at least one path (see --help)");
    }
    Ok(CliMode::Upload(UploadArgs {
        destination,
        json,
        paths,
    }))
}

#[derive(Debug, Clone)]
struct CliConfig {
    api_url: Option<String>,
    token: String,
}

impl CliConfig {
    fn from_env() -> anyhow::Result<Self> {
        let api_url = std::env::var("STRATUS_API_URL")
            .ok()
            .filter(|url| !url.is_empty());
        let token = std::env::var("STRATUS_TOKEN").context("STRATUS_TOKEN is not set")?;
        Ok(Self { api_url, token })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STRATUS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    println!("Usage: stratus-upload [--dest NODE_ID] [--json] PATH...");
    println!("  --dest NODE_ID   Remote folder to upload into (default: {DEFAULT_DESTINATION})");
    println!("  --json           Print the final upload state as JSON");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            print_usage();
            return Ok(());
        }
        CliMode::Upload(args) => args,
    };
    init_tracing();

    let config = CliConfig::from_env()?;
    let client = match &config.api_url {
        Some(url) => StratusClient::with_base_url(url, config.token)
            .with_context(|| format!("invalid STRATUS_API_URL: {url}"))?,
        None => StratusClient::new(config.token)?,
    };
    info!("storage service: {}", client.base_url());
    let entries = args
        .paths
        .iter()
        .map(|path| {
            Entry::from_path(path).with_context(|| format!("failed to scan {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let manager = UploadManager::new(
        Arc::new(client),
        Arc::new(NoListingCache),
        UploadConfig::default(),
    );
    let reported: Mutex<HashMap<u64, (UploadStatus, usize)>> = Mutex::new(HashMap::new());
    let subscription = manager.subscribe(move |snapshot| {
        let mut reported = reported.lock().unwrap_or_else(|e| e.into_inner());
        for item in snapshot.top_level() {
            let (content, completed, failed) = item.subtree_counts();
            let current = (item.status(), completed + failed);
            if reported.insert(item.id(), current) == Some(current) {
                continue;
            }
            info!(
                "{}: {:?} {completed}/{content} done, {failed} failed",
                item.base().name,
                item.status()
            );
        }
    });

    manager.add_entries(entries, &args.destination);
    manager.wait_idle().await;
    manager.unsubscribe(subscription);

    let summary = manager.with_snapshot(|snapshot| {
        if snapshot.has_quota_failure() {
            println!("Storage quota exceeded: free up space and retry the failed uploads.");
        }
        if args.json {
            match serde_json::to_string_pretty(snapshot) {
                Ok(json) => println!("{json}"),
                Err(err) => warn!("failed to encode upload state: {err}"),
            }
        }
        snapshot.summary()
    });
    println!(
        "Uploaded {} of {} item(s), {} failed",
        summary.completed,
        summary.completed + summary.failed,
        summary.failed
    );
    if summary.failed > 0 {
        anyhow::bail!("{} upload(s) failed", summary.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("stratus-upload")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parse_cli_mode_collects_paths() {
        let mode = parse_cli_mode(args(&["a.txt", "photos"])).unwrap();
        assert_eq!(
            mode,
            CliMode::Upload(UploadArgs {
                destination: "root".into(),
                json: false,
                paths: vec![PathBuf::from("a.txt"), PathBuf::from("photos")],
            })
        );
    }

    #[test]
    fn parse_cli_mode_supports_dest_and_json() {
        let mode = parse_cli_mode(args(&["--dest", "n42", "--json", "a.txt"])).unwrap();
        let CliMode::Upload(upload) = mode else {
            panic!("expected upload mode");
        };
        assert_eq!(upload.destination, "n42");
        assert!(upload.json);
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        assert_eq!(parse_cli_mode(args(&["a.txt", "--help"])).unwrap(), CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_bad_input() {
        assert!(parse_cli_mode(args(&[])).is_err());
        assert!(parse_cli_mode(args(&["--dest"])).is_err());
        assert!(parse_cli_mode(args(&["--verbose", "a.txt"])).is_err());
    }
}
