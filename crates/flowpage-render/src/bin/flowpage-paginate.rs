use std::env;
use std::path::Path;
use std::process::ExitCode;

use flowpage::{snapshot, Content, ContentNode, Grid};
use flowpage_render::{
    FileBoundaryCacheStore, PageDescriptor, PaginationEngine, PaginationOptions, RunConfig,
};
use serde::Serialize;

const DEFAULT_WIDTH: f32 = 600.0;
const DEFAULT_HEIGHT: f32 = 800.0;

#[derive(Clone, Debug)]
struct Args {
    content_path: String,
    grid_paths: Vec<String>,
    width: f32,
    height: f32,
    pages: Option<usize>,
    cache_dir: Option<String>,
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    complete: bool,
    error: Option<String>,
    pages: &'a [PageDescriptor],
}

fn main() -> ExitCode {
    env_logger::init();
    match run(env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            eprintln!("{}", help_text());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let cli = parse_args(args)?;
    let content = Content::from_node(&load_node(&cli.content_path)?).map_err(|e| e.to_string())?;
    let grids = cli
        .grid_paths
        .iter()
        .map(|path| {
            let node = load_node(path)?;
            Grid::from_node(&node).map_err(|e| format!("{}: {}", path, e))
        })
        .collect::<Result<Vec<_>, String>>()?;

    let engine = PaginationEngine::new(PaginationOptions::for_envelope(cli.width, cli.height));
    let cache = cli.cache_dir.as_ref().map(FileBoundaryCacheStore::new);
    let mut config = RunConfig::default();
    if let Some(cache) = cache.as_ref() {
        config = config.with_cache(cache);
    }
    if let Some(pages) = cli.pages {
        config = config.with_page_limit(pages);
    }
    let outcome = engine.paginate(&content, &grids, config);

    if cli.json {
        let report = Report {
            complete: outcome.complete,
            error: outcome.error.as_ref().map(|e| e.to_string()),
            pages: &outcome.pages,
        };
        let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{}", json);
    } else {
        for page in &outcome.pages {
            println!(
                "page {:>4}  grid {:<4} blocks {:>4}..{:<4} figures {:?}{}",
                page.page_number,
                page.grid_index
                    .map(|g| g.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                page.begin.block,
                page.end.block,
                page.figures
                    .iter()
                    .map(|f| f.figure_index)
                    .collect::<Vec<_>>(),
                if page.forced { "  (forced)" } else { "" }
            );
        }
        println!(
            "{} pages, complete={}",
            outcome.pages.len(),
            outcome.complete
        );
    }

    match outcome.error {
        Some(err) if !outcome.complete => Err(err.to_string()),
        _ => Ok(()),
    }
}

/// Snapshots ending in `.json` are read as a serialized node tree, anything
/// else as measured XHTML.
fn load_node(path: &str) -> Result<ContentNode, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path, e))?;
    let is_json = Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_slice(&bytes).map_err(|e| format!("{}: {}", path, e))
    } else {
        snapshot::parse_xhtml(&bytes).map_err(|e| format!("{}: {}", path, e))
    }
}

fn parse_args(args: Vec<String>) -> Result<Args, String> {
    if args.len() >= 2 && (args[1] == "--help" || args[1] == "-h") {
        return Err("help requested".to_string());
    }
    let content_path = args
        .get(1)
        .filter(|v| !v.starts_with("--"))
        .cloned()
        .ok_or_else(|| "missing content snapshot path".to_string())?;

    let mut cfg = Args {
        content_path,
        grid_paths: Vec::new(),
        width: DEFAULT_WIDTH,
        height: DEFAULT_HEIGHT,
        pages: None,
        cache_dir: None,
        json: false,
    };

    let mut i = 2usize;
    while i < args.len() {
        match args[i].as_str() {
            "--grid" => {
                let v = args
                    .get(i + 1)
                    .ok_or_else(|| "--grid requires a value".to_string())?;
                cfg.grid_paths.push(v.clone());
                i += 2;
            }
            "--width" => {
                let v = args
                    .get(i + 1)
                    .ok_or_else(|| "--width requires a value".to_string())?;
                cfg.width = v
                    .parse::<f32>()
                    .map_err(|_| format!("invalid --width value '{}'", v))?;
                i += 2;
            }
            "--height" => {
                let v = args
                    .get(i + 1)
                    .ok_or_else(|| "--height requires a value".to_string())?;
                cfg.height = v
                    .parse::<f32>()
                    .map_err(|_| format!("invalid --height value '{}'", v))?;
                i += 2;
            }
            "--pages" => {
                let v = args
                    .get(i + 1)
                    .ok_or_else(|| "--pages requires a value".to_string())?;
                cfg.pages = Some(
                    v.parse::<usize>()
                        .map_err(|_| format!("invalid --pages value '{}'", v))?,
                );
                i += 2;
            }
            "--cache" => {
                let v = args
                    .get(i + 1)
                    .ok_or_else(|| "--cache requires a value".to_string())?;
                cfg.cache_dir = Some(v.clone());
                i += 2;
            }
            "--json" => {
                cfg.json = true;
                i += 1;
            }
            other => return Err(format!("unknown argument '{}'", other)),
        }
    }
    Ok(cfg)
}

fn help_text() -> &'static str {
    r#"flowpage-paginate - paginate a measured content snapshot

USAGE:
  cargo run -p flowpage-render --features cli --bin flowpage-paginate -- <content> [options]

  <content> is a measured XHTML snapshot, or a .json node tree.

OPTIONS:
  --grid <file>     grid template snapshot, may be repeated (default: one column)
  --width <px>      page width (default: 600)
  --height <px>     page height (default: 800)
  --pages <n>       stop after n pages
  --cache <dir>     page boundary cache directory
  --json            print pages as JSON

Set RUST_LOG=debug for page construction logs."#
}
