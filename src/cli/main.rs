use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};

use prompt_reader::config::ReaderConfig;
use prompt_reader::pipeline::{self, PromptReader};
use prompt_reader::result::ParseResult;

#[derive(Parser, Debug)]
#[command(
    name = "prompt-reader",
    version,
    about = "Show the prompts and generation settings embedded in AI-generated images"
)]
struct Cli {
    /// Image files or directories to read
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: prompt-reader.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default prompt-reader.json and exit
    #[arg(long)]
    init: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Also print every raw metadata field
    #[arg(long)]
    raw: bool,

    /// Also print the detection evidence log
    #[arg(long)]
    evidence: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let save_path = ReaderConfig::default().save(cli.config.as_deref())?;
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    let config = ReaderConfig::load(cli.config.as_deref())?;
    let reader = PromptReader::new(config);

    let images = pipeline::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }
    log::info!("Found {} image(s) to read", images.len());

    let total = images.len();
    let mut json_results = Vec::new();
    let mut unknown = 0;
    let mut failed = 0;

    for (i, image_path) in images.iter().enumerate() {
        log::info!("[{}/{}] Reading: {}", i + 1, total, image_path.display());

        match reader.read_file(image_path) {
            Ok(result) => {
                if result.is_unknown() {
                    unknown += 1;
                }
                if cli.json {
                    json_results.push(serde_json::json!({
                        "path": image_path.display().to_string(),
                        "result": result,
                    }));
                } else {
                    print_result(image_path, &result, cli.raw, cli.evidence);
                }
            }
            Err(e) => {
                failed += 1;
                log::error!("  Error: {e:#}");
                if cli.json {
                    json_results.push(serde_json::json!({
                        "path": image_path.display().to_string(),
                        "error": format!("{e:#}"),
                    }));
                }
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&json_results)?);
    }

    let recognized = total - unknown - failed;
    log::info!(
        "Done: {recognized} recognized, {unknown} unknown, {failed} failed out of {total} images"
    );

    Ok(())
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 72;
/// Indent for continuation lines (tag column width + " : " = 15 chars + 2 leading spaces).
const INDENT: &str = "                 ";

/// Print one file's result, organized by section.
fn print_result(path: &Path, result: &ParseResult, show_raw: bool, show_evidence: bool) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(90));

    print_row("Tool", &result.tool);
    let format = match (result.width, result.height) {
        (Some(w), Some(h)) => format!("{} ({w} x {h})", result.format.label()),
        _ => result.format.label().to_string(),
    };
    print_row("Format", &format);
    print_row("Detected", &result.detection_path);
    println!();

    if result.positive.is_empty() && result.negative.is_empty() {
        println!("  {DIM}(no prompts found){RESET}");
    } else {
        println!("  {BOLD}Prompts{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(88));
        print_colored("Positive", &result.positive, GREEN);
        print_colored("Negative", &result.negative, RED);
    }
    println!();

    if result.is_sdxl {
        println!("  {BOLD}SDXL Prompts{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(88));
        for (label, text) in result.positive_sdxl.labeled() {
            print_colored(&format!("+ {label}"), text, GREEN);
        }
        for (label, text) in result.negative_sdxl.labeled() {
            print_colored(&format!("- {label}"), text, RED);
        }
        println!();
    }

    if !result.setting_entries.is_empty() {
        println!("  {BOLD}Settings{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(88));
        for entry in &result.setting_entries {
            print_row(&entry.key, &entry.value);
        }
        println!();
    }

    if show_raw {
        println!("  {BOLD}Raw Metadata{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(88));
        if result.raw_blobs.is_empty() {
            println!("{}", result.raw);
        }
        for blob in &result.raw_blobs {
            println!("  {BOLD}{}{RESET} {DIM}[{}]{RESET}", blob.label, blob.mime);
            println!("{}", blob.text);
        }
        println!();
    }

    if show_evidence {
        println!("  {BOLD}Evidence{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(88));
        for entry in result.evidence.entries() {
            print_row(entry.stage, &entry.detail);
        }
        println!();
    }
}

/// Print a single row in the display table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<12}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Print a row with its value colored. Empty values are skipped.
fn print_colored(tag: &str, val: &str, color: &str) {
    if val.is_empty() {
        return;
    }
    let tag_col = format!("{:<12}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {color}{line}{RESET}");
        } else {
            println!("  {INDENT}{color}{line}{RESET}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
