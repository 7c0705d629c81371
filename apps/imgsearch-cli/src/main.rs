use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use imgsearch_core::config::Config;
use imgsearch_core::Registry;
use imgsearch_service::{ImageSearchService, ProgressEvent};

const USAGE: &str = "Usage: imgsearch <command> [args...]

Commands:
  models                               list registered models
  current [set <id>]                   show or change the current model
  load <id>                            load a model into the cache
  index [dir] [--model <id>]           index every image in a directory
  upload <file> [--model <id>]         store and index one image
  search <query> [--limit n] [--model <id>]
  list [--model <id>]                  list indexed images
  delete <id> [--model <id>]           remove an image from an index
  status                               cache and index overview";

struct Args {
    cmd: String,
    positional: Vec<String>,
    model: Option<String>,
    limit: Option<usize>,
}

fn usage_exit() -> ! {
    eprintln!("{USAGE}");
    std::process::exit(1)
}

fn parse_args() -> Args {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() { usage_exit(); }
    let cmd = args.remove(0);
    let (mut positional, mut model, mut limit) = (Vec::new(), None, None);
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--model" | "-m" => {
                if i + 1 >= args.len() { eprintln!("Error: --model requires a model id"); std::process::exit(1); }
                model = Some(args[i + 1].clone());
                i += 1;
            }
            "--limit" | "-n" => match args.get(i + 1).and_then(|v| v.parse::<usize>().ok()) {
                Some(n) => { limit = Some(n); i += 1; }
                None => { eprintln!("Error: --limit requires a number"); std::process::exit(1); }
            },
            "--help" | "-h" => usage_exit(),
            other => positional.push(other.to_string()),
        }
        i += 1;
    }
    Args { cmd, positional, model, limit }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn bar_style() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images ({percent}%) {msg}")?
        .progress_chars("#>-"))
}

async fn run_index(service: &ImageSearchService, model_id: &str, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut events = Box::pin(service.index_directory_stream(model_id, dir).await?);
    let mut pb: Option<ProgressBar> = None;
    while let Some(event) = events.next().await {
        match event {
            ProgressEvent::LoadingModel { model_id, total } => println!("Loading {model_id} to index {total} images"),
            ProgressEvent::Starting { total, .. } => {
                let bar = ProgressBar::new(total.unwrap_or(0) as u64);
                bar.set_style(bar_style()?);
                pb = Some(bar);
            }
            ProgressEvent::Indexing { current, file, .. } => {
                if let Some(bar) = &pb { bar.set_position(current as u64); bar.set_message(file); }
            }
            ProgressEvent::FileError { file, error, current, .. } => {
                if let Some(bar) = &pb { bar.set_position(current as u64); bar.println(format!("⚠️  {file}: {error}")); }
            }
            ProgressEvent::Complete { model_id, summary } => {
                if let Some(bar) = pb.take() { bar.finish_with_message("done"); }
                if let Some(s) = summary {
                    println!("✅ {model_id}: indexed {}/{} images ({} failed)", s.indexed, s.total, s.failed);
                }
            }
            ProgressEvent::Error { error } => {
                if let Some(bar) = pb.take() { bar.abandon(); }
                bail!(error);
            }
        }
    }
    Ok(())
}

async fn run_load(service: &ImageSearchService, model_id: &str) -> anyhow::Result<()> {
    let mut events = Box::pin(service.load_model_stream(model_id)?);
    while let Some(event) = events.next().await {
        match event {
            ProgressEvent::Starting { model_id, .. } => println!("Loading {model_id}..."),
            ProgressEvent::Complete { model_id, .. } => println!("✅ {model_id} loaded"),
            ProgressEvent::Error { error } => bail!(error),
            _ => {}
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = parse_args();
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let registry = Arc::new(Registry::builtin());
    let settings = config.settings(&registry)?;
    let service = ImageSearchService::from_settings(&settings, registry).await?;
    let model = args.model.as_deref();

    match args.cmd.as_str() {
        "models" => {
            for m in service.models().await? {
                let mut flags = Vec::new();
                if m.is_current { flags.push("current".to_string()); }
                if m.is_loaded { flags.push("loaded".to_string()); }
                if m.is_indexed { flags.push(format!("{} indexed", m.indexed_count)); }
                println!("{:<28} {:<20} {:>5}d  {}", m.id, m.name, m.vector_dim, flags.join(", "));
            }
        }
        "current" => match args.positional.as_slice() {
            [] => println!("{}", service.current_model()),
            [set, id] if set == "set" => {
                service.set_current_model(id)?;
                println!("Current model: {id}");
            }
            _ => usage_exit(),
        },
        "load" => {
            let Some(id) = args.positional.first() else { usage_exit() };
            run_load(&service, id).await?;
        }
        "index" => {
            let model_id = model.map(str::to_string).unwrap_or_else(|| service.current_model());
            run_index(&service, &model_id, args.positional.first().map(PathBuf::from)).await?;
        }
        "upload" => {
            let Some(file) = args.positional.first() else { usage_exit() };
            let path = Path::new(file);
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let receipt = service.upload_and_index(bytes, &name, model).await?;
            println!("✅ {} stored as {} ({})", name, receipt.filename, receipt.model_id);
            println!("id: {}", receipt.id);
        }
        "search" => {
            if args.positional.is_empty() { usage_exit(); }
            let query = args.positional.join(" ");
            let response = service.search_text(&query, args.limit, model).await?;
            println!("🔍 \"{}\" with {} ({} results)", response.query, response.model_id, response.results.len());
            for (rank, hit) in response.results.iter().enumerate() {
                println!("{:>3}. {:.4}  {}  {}", rank + 1, hit.score, hit.filename, hit.id);
            }
        }
        "list" => {
            let images = service.list_images(model).await?;
            for image in &images {
                println!("{}  {}", image.id, image.filename);
            }
            println!("📊 {} images", images.len());
        }
        "delete" => {
            let Some(id) = args.positional.first() else { usage_exit() };
            service.delete_image(model, id).await?;
            println!("Removed {id}");
        }
        "status" => {
            let status = service.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        other => {
            eprintln!("Unknown command: {other}");
            usage_exit();
        }
    }
    Ok(())
}
