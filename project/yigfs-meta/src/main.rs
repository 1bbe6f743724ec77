use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use yigfs_meta::service::types::{
    BlockInfo, CreateFileRequest, FileAttrRequest, FileLeaderRequest, InitDirRequest,
    ListDirRequest, SegmentInfoRequest, UpdateSegmentBlocksRequest,
};
use yigfs_meta::{Config, MetaService, MetaStoreFactory, SegmentId};

#[derive(Parser)]
#[command(name = "yigfs-meta", version, about = "yigfs metadata CLI")]
struct Cli {
    /// Metadata backend URL (e.g. sqlite::memory: or sqlite:///tmp/yigfs/metadata.db?mode=rwc).
    #[arg(long, value_name = "URL", global = true, conflicts_with = "config")]
    meta_url: Option<String>,

    /// YAML configuration file.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args)]
struct Namespace {
    /// Region; the configured default when omitted.
    #[arg(long, default_value = "")]
    region: String,

    #[arg(long)]
    bucket: String,
}

#[derive(Args)]
struct Caller {
    #[arg(long)]
    zone: String,

    /// Machine issuing the request.
    #[arg(long)]
    machine: String,
}

#[derive(Subcommand)]
enum Command {
    /// Create the bucket's root entries and register the zone.
    Init {
        #[command(flatten)]
        ns: Namespace,
        #[command(flatten)]
        caller: Caller,
    },
    /// Create a file (or, with --dir, a directory).
    Create {
        #[command(flatten)]
        ns: Namespace,
        #[command(flatten)]
        caller: Caller,
        #[arg(long, default_value_t = 1)]
        parent: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        dir: bool,
    },
    /// List a directory page.
    Ls {
        #[command(flatten)]
        ns: Namespace,
        #[arg(long, default_value_t = 1)]
        parent: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 0)]
        limit: u64,
    },
    /// Show file attributes.
    Stat {
        #[command(flatten)]
        ns: Namespace,
        #[arg(long)]
        ino: i64,
    },
    /// Show (or assign) the leader of a file.
    Leader {
        #[command(flatten)]
        ns: Namespace,
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ino: i64,
    },
    /// Record one block written into a new or existing segment.
    Write {
        #[command(flatten)]
        ns: Namespace,
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ino: i64,
        /// Segment id as 32 hex digits; a fresh one when omitted.
        #[arg(long)]
        segment: Option<String>,
        #[arg(long)]
        offset: u64,
        #[arg(long)]
        size: u64,
        /// Start of the bytes inside the segment object.
        #[arg(long, default_value_t = 0)]
        seg_addr: u64,
    },
    /// Show the blocks covering a byte range, grouped by segment.
    Segments {
        #[command(flatten)]
        ns: Namespace,
        #[arg(long)]
        ino: i64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        size: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "yigfs_meta=info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let config = match (&cli.meta_url, &cli.config) {
        (Some(url), _) => MetaStoreFactory::config_from_url(url)?,
        (None, Some(path)) => Config::from_file(path)?,
        (None, None) => Config::from_default_path()?,
    };
    let service = MetaService::from_config(config).await?;

    match cli.cmd {
        Command::Init { ns, caller } => print(
            &service
                .init_dir_and_zone(&InitDirRequest {
                    region: ns.region,
                    bucket: ns.bucket,
                    zone: caller.zone,
                    machine: caller.machine,
                    ..Default::default()
                })
                .await?,
        )?,
        Command::Create {
            ns,
            caller,
            parent,
            name,
            dir,
        } => print(
            &service
                .create_file(&CreateFileRequest {
                    region: ns.region,
                    bucket: ns.bucket,
                    zone: caller.zone,
                    machine: caller.machine,
                    parent_ino: parent,
                    name,
                    file_type: if dir { 2 } else { 1 },
                    ..Default::default()
                })
                .await?,
        )?,
        Command::Ls {
            ns,
            parent,
            offset,
            limit,
        } => print(
            &service
                .list_dir_files(&ListDirRequest {
                    region: ns.region,
                    bucket: ns.bucket,
                    parent_ino: parent,
                    offset,
                    limit,
                })
                .await?,
        )?,
        Command::Stat { ns, ino } => print(
            &service
                .get_file_attr(&FileAttrRequest {
                    region: ns.region,
                    bucket: ns.bucket,
                    ino,
                })
                .await?,
        )?,
        Command::Leader { ns, caller, ino } => print(
            &service
                .get_file_leader(&FileLeaderRequest {
                    region: ns.region,
                    bucket: ns.bucket,
                    zone: caller.zone,
                    machine: caller.machine,
                    ino,
                })
                .await?,
        )?,
        Command::Write {
            ns,
            caller,
            ino,
            segment,
            offset,
            size,
            seg_addr,
        } => {
            let segment = match segment {
                Some(hex) => parse_segment(&hex)?,
                None => SegmentId::generate(),
            };
            let req = UpdateSegmentBlocksRequest {
                region: ns.region,
                bucket: ns.bucket,
                zone: caller.zone,
                machine: caller.machine,
                ino,
                segment,
                blocks: vec![BlockInfo {
                    offset,
                    size,
                    seg_start_addr: seg_addr,
                    seg_end_addr: seg_addr + size,
                }],
            };
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });
            print(&service.update_segment_blocks(&req, &cancel).await?)?
        }
        Command::Segments {
            ns,
            ino,
            offset,
            size,
        } => print(
            &service
                .get_file_segment_info(&SegmentInfoRequest {
                    region: ns.region,
                    bucket: ns.bucket,
                    ino,
                    offset,
                    size,
                })
                .await?,
        )?,
    }

    Ok(())
}

fn parse_segment(hex: &str) -> anyhow::Result<SegmentId> {
    if hex.len() != 32 {
        anyhow::bail!("segment id must be 32 hex digits");
    }
    let id0 = u64::from_str_radix(&hex[..16], 16)?;
    let id1 = u64::from_str_radix(&hex[16..], 16)?;
    Ok(SegmentId::new(id0, id1))
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
