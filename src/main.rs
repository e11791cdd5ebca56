use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use image::DynamicImage;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;
use simplelog::{Config, WriteLogger};

use comicrat::config::Settings;
use comicrat::panic_handler::initialize_panic_handler;
use comicrat::{Book, FormatRegistry, Member, ResizeFilter};

/// Page through comic book archives without decoding everything up front
#[derive(Parser, Debug)]
#[command(name = "comicrat", version, about)]
struct Cli {
    /// Archive to open (.cbz, .zip, .cbt, .tar, .tgz, .tar.gz; .cbr with the cbr feature)
    archive: PathBuf,

    /// List the pages of the archive
    #[arg(long)]
    list: bool,

    /// Print the page list as JSON
    #[arg(long, requires = "list")]
    json: bool,

    /// Step through every page, reporting load time and failures
    #[arg(long)]
    walk: bool,

    /// Write the page selected by --start, sized to the viewport, to this file
    #[arg(long, value_name = "IMAGE")]
    export: Option<PathBuf>,

    /// Page to start from
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Viewport width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Viewport height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Pages on each side of the current one to keep warm
    #[arg(long)]
    radius: Option<usize>,

    /// Background decode workers (0 = one per CPU)
    #[arg(long)]
    workers: Option<usize>,

    /// Resize filter: nearest, bilinear, catmull_rom, lanczos3
    #[arg(long)]
    filter: Option<ResizeFilter>,

    /// Settings file to use instead of the default location
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", default_value = "comicrat.log")]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct PageEntry<'a> {
    index: usize,
    #[serde(flatten)]
    member: &'a Member,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("Failed to create log file {:?}", cli.log_file))?,
    )?;
    initialize_panic_handler();

    info!("Starting comicrat on {:?}", cli.archive);
    let result = run(&cli);
    if let Err(e) = &result {
        log::error!("{e:?}");
    }
    info!("Shutting down comicrat");
    result
}

fn run(cli: &Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load(),
    };

    let mut options = settings.book_options();
    if let Some(radius) = cli.radius {
        options = options.with_radius(radius);
    }
    if let Some(workers) = cli.workers {
        options = options.with_workers(workers);
    }
    if let Some(filter) = cli.filter {
        options = options.with_filter(filter);
    }

    let registry = FormatRegistry::default();
    let book = Book::open_with(&cli.archive, &registry, options)
        .with_context(|| format!("Failed to open {:?}", cli.archive))?;

    print_summary(&book);

    if cli.list {
        print_pages(&book, cli.json)?;
    }

    if cli.width.is_some() || cli.height.is_some() {
        let current = book.viewport();
        book.set_viewport(
            cli.width.unwrap_or(current.width),
            cli.height.unwrap_or(current.height),
        );
    }

    if let Some(target) = &cli.export {
        let raster = book
            .go_to(cli.start)
            .with_context(|| format!("Failed to load page {}", book.current_index()))?;
        // Pages carry no meaningful alpha and JPEG output rejects it.
        DynamicImage::ImageRgb8(raster.to_rgb8())
            .save(target)
            .with_context(|| format!("Failed to write {target:?}"))?;
        println!(
            "Wrote page {} ({}x{}) to {}",
            book.current_index(),
            raster.width(),
            raster.height(),
            target.display()
        );
    }

    let failures = if cli.walk { walk(&book, cli.start) } else { 0 };
    let total = book.len();

    book.close().context("Failed to close archive")?;

    if failures > 0 {
        bail!("{failures} of {total} pages failed to load");
    }
    Ok(())
}

fn print_summary(book: &Book) {
    println!("{}", book.path().display());
    println!(
        "  {} pages, {} members, {} access",
        book.len(),
        book.archive().members().len(),
        book.access().as_str()
    );
    if !book.comment().is_empty() {
        println!("  comment: {}", book.comment());
    }
}

fn print_pages(book: &Book, json: bool) -> Result<()> {
    if json {
        let entries: Vec<_> = book
            .pages()
            .iter()
            .map(|page| PageEntry {
                index: page.index(),
                member: page.member(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for page in book.pages() {
        println!("{:>4}  {}", page.index(), page.name());
    }
    Ok(())
}

/// Visit every page from `start` onwards the way a reader pressing "next"
/// would. Returns how many pages failed.
fn walk(book: &Book, start: usize) -> usize {
    let mut failures = 0;

    for step in start..book.len() {
        let started = Instant::now();
        let result = if step == start {
            book.go_to(start)
        } else {
            book.next_page()
        };
        let page = book.current();

        match result {
            Ok(raster) => println!(
                "{:>4}  {:<40} {:>5}x{:<5} {:?}",
                page.index(),
                page.name(),
                raster.width(),
                raster.height(),
                started.elapsed()
            ),
            Err(e) => {
                failures += 1;
                warn!("Page {} failed during walk: {e}", page.index());
                println!("{:>4}  {:<40} FAILED: {e}", page.index(), page.name());
            }
        }
    }

    debug!("Walk done, waiting on {} background tasks", book.background_tasks());
    book.wait_for_background();
    failures
}
