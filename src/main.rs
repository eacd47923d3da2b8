use anyhow::Context;
use clap::{Parser, Subcommand};
use hpkg::{Block, Container};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "hpkg", version, about = "The HPKG container format CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files into an .hpkg container, one block per file
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = hpkg::metadata::DEFAULT_TITLE)]
        title: String,
        /// Tag to record; repeat for several
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// File stored as the preview block
        #[arg(long)]
        preview: Option<PathBuf>,
        /// Data type for every block (default: guessed from the extension)
        #[arg(long = "type")]
        data_type: Option<String>,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Write the preview and every block of a container to a directory
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List container contents
    List {
        input: PathBuf,
    },
    /// Show header options and region offsets
    Info {
        input: PathBuf,
    },
    /// Print one block's payload to stdout
    Cat {
        input: PathBuf,
        index: usize,
        /// Print as hex instead of raw bytes
        #[arg(long)]
        hex: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    });

    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, title, tags, preview, data_type, input } => {
            let mut pkg = Container::init(title, tags, chrono::Utc::now());
            if let Some(path) = preview {
                pkg.set_preview(read_block(&path, data_type.as_deref()).await?);
                println!("  preview {}", path.display());
            }
            for path in &input {
                pkg.add(read_block(path, data_type.as_deref()).await?);
                println!("  packed  {}", path.display());
            }
            pkg.write(&output).await
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Created: {}", output.display());
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir } => {
            let pkg = open(&input).await?;
            tokio::fs::create_dir_all(&output_dir).await?;
            if let Some(preview) = pkg.get_preview().await? {
                tokio::fs::write(output_dir.join("preview.bin"), &preview.binary).await?;
            }
            for index in 0..pkg.len() {
                if let Some(block) = pkg.get(index).await? {
                    let name = format!("block_{index:04}.bin");
                    tokio::fs::write(output_dir.join(name), &block.binary).await?;
                }
            }
            println!("Unpacked to: {}", output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input } => {
            let pkg  = open(&input).await?;
            let meta = pkg.metadata();
            println!("Container: {}", input.display());
            println!("  Title   {}", meta.title);
            println!("  Tags    {}", meta.tags.join(", "));
            println!("  Date    {}", meta.date.to_rfc3339());
            if let Some(preview) = &meta.preview {
                println!("  Preview {} ({} B)", preview.data_type, preview.length);
            }
            println!("{:>6} {:<28} {:>12} {:>12}", "Index", "Type", "Length", "Offset");
            let lengths: Vec<u64> = meta.array.iter().map(|d| d.length).collect();
            for (index, desc) in meta.array.iter().enumerate() {
                let offset = pkg.layout()
                    .and_then(|l| l.block_offset(lengths.iter().copied(), index).ok())
                    .map_or_else(|| "-".into(), |n| n.to_string());
                println!("{:>6} {:<28} {:>12} {:>12}", index, desc.data_type, desc.length, offset);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let pkg = open(&input).await?;
            let header = pkg.header().context("opened container has no header")?;
            let layout = pkg.layout().context("opened container has no layout")?;
            let show = |v: Option<u64>| v.map_or_else(|| "absent".to_string(), |n| format!("{n} B"));

            println!("── HPKG Container ───────────────────────────────────────");
            println!("  Path            {}", input.display());
            println!("  File size       {} B", layout.file_size);
            println!("  Preview length  {}", show(header.preview_length));
            println!("  Array length    {}", show(header.array_length));
            println!("  Tail length     {} B", header.tail_length);
            for (key, value) in &header.extra {
                println!("  {key:<15} {value}");
            }
            println!("  Preview offset  {}", layout.preview_region_start());
            println!("  Array offset    {}", layout.array_region_start());
            println!("  Tail offset     {}", layout.tail_offset());
            println!("  Blocks          {}", pkg.len());
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, index, hex } => {
            let pkg = open(&input).await?;
            let block = pkg.get(index).await?
                .with_context(|| format!("{} has no block {index}", input.display()))?;
            let mut stdout = std::io::stdout().lock();
            if hex {
                writeln!(stdout, "{}", hex::encode(&block.binary))?;
            } else {
                stdout.write_all(&block.binary)?;
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn setup_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open(path: &Path) -> anyhow::Result<Container> {
    Container::open(path).await.map_err(|e| {
        let what = if e.is_format_violation() { "not a valid HPKG container" } else { "cannot open" };
        anyhow::Error::new(e).context(format!("{}: {what}", path.display()))
    })
}

async fn read_block(path: &Path, data_type: Option<&str>) -> anyhow::Result<Block> {
    let data = tokio::fs::read(path).await
        .with_context(|| format!("reading {}", path.display()))?;
    let data_type = data_type.map_or_else(|| guess_data_type(path).to_string(), str::to_owned);
    Ok(Block::new(data_type, data))
}

fn guess_data_type(path: &Path) -> &'static str {
    let ext = path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png"          => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif"          => "image/gif",
        "webp"         => "image/webp",
        "txt"          => "text/plain",
        "json"         => "application/json",
        _              => "application/octet-stream",
    }
}
