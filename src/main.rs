//! lura - inspect and speed-read EPUB books from the terminal

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use lura::{
    ArchiveReader, CancelToken, Config, DocumentModel, PacerEvent, PacingEngine, PacingMode,
    PacingSession, TocEntry, ingest,
};

#[derive(Parser)]
#[command(name = "lura")]
#[command(version, about = "EPUB word streams and RSVP pacing", long_about = None)]
#[command(after_help = "EXAMPLES:
    lura info book.epub                 Show metadata and chapters
    lura words book.epub --chapter 2    List the words of the third chapter
    lura pace book.epub --wpm 450       Flash the book at 450 WPM
    lura pace book.epub --pulse         Flash the book in pulse mode

Set RUST_LOG=debug for parser and pacing logs.")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show book metadata, chapters and word counts
    Info {
        #[arg(value_name = "BOOK")]
        path: PathBuf,
    },
    /// Print the flattened word stream with each word's address
    Words {
        #[arg(value_name = "BOOK")]
        path: PathBuf,
        /// Only this chapter (0-based)
        #[arg(long)]
        chapter: Option<usize>,
        /// Stop after this many words
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Flash the book one word at a time
    Pace {
        #[arg(value_name = "BOOK")]
        path: PathBuf,
        /// Words per minute (overrides the configuration)
        #[arg(long)]
        wpm: Option<u32>,
        /// Ramp the rate up while you keep up
        #[arg(long)]
        pulse: bool,
        /// Word index to start from
        #[arg(long, default_value_t = 0)]
        from: usize,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> lura::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Info { path } => show_info(&load(&path)?, &path),
        Command::Words {
            path,
            chapter,
            limit,
        } => {
            print_words(&load(&path)?, chapter, limit);
            Ok(())
        }
        Command::Pace {
            path,
            wpm,
            pulse,
            from,
        } => {
            let mut pacing = config.pacing;
            if let Some(wpm) = wpm {
                pacing = pacing.with_standard_wpm(wpm);
            }
            let mode = if pulse {
                PacingMode::Pulse
            } else {
                PacingMode::Standard
            };
            let model = Arc::new(load(&path)?);
            let id = path.display().to_string();
            pace(PacingEngine::new(model, pacing), &id, from, mode)
        }
    }
}

fn load(path: &Path) -> lura::Result<DocumentModel> {
    let archive = ArchiveReader::open(path)?;
    ingest(&archive, &CancelToken::new())
}

fn show_info(model: &DocumentModel, path: &Path) -> lura::Result<()> {
    let meta = model.metadata();
    println!("File: {}", path.display());
    println!("Title: {}", model.title());
    println!("Author: {}", model.author());
    if !meta.language.is_empty() {
        println!("Language: {}", meta.language);
    }
    if let Some(ref publisher) = meta.publisher {
        println!("Publisher: {publisher}");
    }
    if let Some(ref desc) = meta.description {
        let desc = desc.trim();
        match desc.char_indices().nth(200) {
            Some((cut, _)) => println!("Description: {}...", &desc[..cut]),
            None => println!("Description: {desc}"),
        }
    }
    println!("Words: {}", model.total_word_count());
    println!("Content hash: {}", model.content_hash());

    println!("Chapters: {}", model.chapter_count());
    for chapter in model.chapters() {
        let title = if chapter.title.is_empty() {
            "(untitled)"
        } else {
            chapter.title.as_str()
        };
        println!(
            "  {:>3}  {:<50} {:>7} words",
            chapter.index,
            title,
            chapter.word_count()
        );
    }

    if !model.toc().is_empty() {
        println!("TOC:");
        print_toc(model.toc());
    }
    Ok(())
}

fn print_toc(entries: &[TocEntry]) {
    let mut stack: Vec<(usize, &TocEntry)> = entries.iter().rev().map(|e| (1, e)).collect();
    while let Some((depth, entry)) = stack.pop() {
        println!("{}{}", "  ".repeat(depth), entry.label);
        stack.extend(entry.children.iter().rev().map(|c| (depth + 1, c)));
    }
}

fn print_words(model: &DocumentModel, chapter: Option<usize>, limit: Option<usize>) {
    let words = model
        .words()
        .filter(|w| chapter.is_none_or(|c| w.address.chapter == c))
        .take(limit.unwrap_or(usize::MAX));
    for word in words {
        let text = if word.placeholder { "[image]" } else { word.text };
        println!(
            "{:>8}  {:>3}:{:<5}:{:<5}  {}",
            word.index, word.address.chapter, word.address.element, word.address.offset, text
        );
    }
}

fn pace(engine: PacingEngine, id: &str, from: usize, mode: PacingMode) -> lura::Result<()> {
    let total = engine.total();
    let (session, events) = PacingSession::spawn(engine, id, from, mode, None)?;

    let mut out = std::io::stdout().lock();
    for event in events {
        match event {
            PacerEvent::Word(word) => {
                let text = if word.placeholder { "[image]" } else { word.text.as_str() };
                // Pad so the pivot character stays in one column.
                let pad = 12usize.saturating_sub(word.pivot);
                write!(
                    out,
                    "\r\x1b[2K{:>5} wpm  {}{}",
                    word.wpm,
                    " ".repeat(pad),
                    text
                )?;
                out.flush()?;
            }
            PacerEvent::Finished(stats) => {
                writeln!(
                    out,
                    "\nfinished {total} words: {} shown, {} wpm average, {:.1}s saved",
                    stats.words,
                    stats.average_wpm(),
                    stats.time_saved_ms as f64 / 1000.0
                )?;
                break;
            }
            PacerEvent::Cancelled(_) => break,
        }
    }
    session.join();
    Ok(())
}
