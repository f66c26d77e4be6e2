use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wavyte_scrub::{
    FrameIndex, FrameRange, FrameResolver, FsStore, ImageDecoder, KeyedStore, ResolverConfig,
    ResolverOpts, ResolverStatus, SceneId, StoreKey,
};

#[derive(Parser, Debug)]
#[command(name = "wavyte-scrub", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write one encoded frame into a store.
    Put(PutArgs),
    /// Replay a burst of frame requests and report what the resolver settles on.
    Scrub(ScrubArgs),
}

#[derive(Parser, Debug)]
struct StoreArgs {
    /// Store root directory.
    #[arg(long)]
    store: PathBuf,

    /// Store namespace (subdirectory of the root).
    #[arg(long, default_value = "frames")]
    namespace: String,

    /// Scene id owning the frames.
    #[arg(long)]
    scene: String,
}

#[derive(Parser, Debug)]
struct PutArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Frame index (0-based).
    #[arg(long)]
    frame: u64,

    /// Encoded image file to store.
    #[arg(long)]
    file: PathBuf,
}

#[derive(Parser, Debug)]
struct ScrubArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Requests in issue order: comma-separated indices or half-open ranges (`3,5,10..14`).
    #[arg(long, value_delimiter = ',', required = true)]
    frames: Vec<String>,

    /// Resolver config JSON (`capacity`, `ttlMs`, `threads`, `fetchTimeoutMs`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// How long to wait for the last request to resolve.
    #[arg(long, default_value_t = 5_000)]
    settle_ms: u64,

    /// Write the resolved frame as PNG.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Put(args) => cmd_put(args),
        Command::Scrub(args) => cmd_scrub(args),
    }
}

fn open_store(args: &StoreArgs) -> anyhow::Result<(FsStore, SceneId)> {
    let store = FsStore::open(&args.store, &args.namespace)?;
    let scene = SceneId::new(args.scene.clone())?;
    Ok((store, scene))
}

fn cmd_put(args: PutArgs) -> anyhow::Result<()> {
    let (store, scene) = open_store(&args.store)?;
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("read frame file '{}'", args.file.display()))?;
    let key = StoreKey::new(&scene, FrameIndex(args.frame));
    store.write(&key, &bytes)?;
    eprintln!("stored {} ({} bytes)", key, bytes.len());
    Ok(())
}

fn cmd_scrub(args: ScrubArgs) -> anyhow::Result<()> {
    let (store, scene) = open_store(&args.store)?;
    let opts = match &args.config {
        Some(path) => ResolverConfig::from_path(path)?.into_opts()?,
        None => ResolverOpts::default(),
    };

    let mut requests = Vec::new();
    for range in &args.frames {
        requests.extend(FrameRange::parse(range)?.iter());
    }

    let mut resolver = FrameResolver::new(scene, Arc::new(store), ImageDecoder, opts)?;
    for &index in &requests {
        resolver.request(index);
        resolver.pump();
    }

    let converged = resolver.settle(Duration::from_millis(args.settle_ms));
    let state = resolver.current_state();
    let stats = resolver.cache_stats();
    println!(
        "requests={} store_reads={} cache_hits={} cache_misses={}",
        requests.len(),
        resolver.store_reads(),
        stats.hits,
        stats.misses
    );

    match (&state.status, converged) {
        (_, false) => anyhow::bail!("resolver did not settle within {} ms", args.settle_ms),
        (ResolverStatus::Resolved(k), _) => {
            let bitmap = state
                .resolved
                .as_ref()
                .context("resolved state without bitmap")?;
            println!("resolved frame {k}: {}x{}", bitmap.width, bitmap.height);
            if let Some(out) = &args.out {
                write_png(out, bitmap)?;
                eprintln!("wrote {}", out.display());
            }
        }
        (ResolverStatus::Failed(k, err), _) => {
            anyhow::bail!("frame {k} failed: {err}");
        }
        (other, _) => println!("status: {other:?}"),
    }

    resolver.dispose();
    Ok(())
}

fn write_png(out: &std::path::Path, bitmap: &wavyte_scrub::FrameBitmap) -> anyhow::Result<()> {
    if let Some(parent) = out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    // Premultiplied pixels are written as-is; frames from the store are typically opaque.
    image::save_buffer_with_format(
        out,
        &bitmap.rgba8_premul,
        bitmap.width,
        bitmap.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", out.display()))
}
