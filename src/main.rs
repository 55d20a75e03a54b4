//! Main entry point for the rezip CLI application.
//!
//! Lists, extracts images from, or recompresses a zip-based document.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rezip::gallery::extract_images;
use rezip::{Cli, EntryReport, LocalFileReader, ReadAt, RecompressReport, ZipExtractor, recompress_archive};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so listings and the report can be piped.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    if cli.list || cli.verbose {
        let reader = Arc::new(LocalFileReader::new(&cli.file)?);
        return list_files(&ZipExtractor::new(reader), cli.verbose).await;
    }

    if let Some(dir) = &cli.extract_dir {
        let reader = Arc::new(LocalFileReader::new(&cli.file)?);
        let written = extract_images(reader, dir, cli.junk_paths).await?;
        if !cli.is_quiet() {
            for path in &written {
                println!("  extracting: {}", path.display());
            }
        }
        info!("Extracted {} images to {}", written.len(), dir.display());
        return Ok(());
    }

    let report = recompress_archive(&cli.file, &cli.recompress_options()).await?;

    if !cli.is_quiet() {
        print_report(&report);
    }
    if !cli.is_very_quiet() {
        println!("{}", report.output_path.display());
    }

    Ok(())
}

/// List entries of the archive.
///
/// Short format prints one name per line; verbose prints uncompressed size,
/// stored size, compression ratio and timestamp, followed by totals.
async fn list_files<R: ReadAt + 'static>(extractor: &ZipExtractor<R>, verbose: bool) -> Result<()> {
    let entries = extractor.list_files().await?;

    if !verbose {
        for entry in &entries {
            println!("{}", entry.file_name);
        }
        return Ok(());
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            saved_percent(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:>21}  {} files",
        total_uncompressed,
        total_compressed,
        saved_percent(total_compressed, total_uncompressed),
        "",
        file_count
    );

    Ok(())
}

/// Size comparison table for a finished recompression.
fn print_report(report: &RecompressReport) {
    println!(
        "{:>12}  {:>12}  {:>7}  {:<12}  Name",
        "Before", "After", "Ratio", "Outcome"
    );
    println!("{}", "-".repeat(70));

    for entry in &report.entries {
        println!(
            "{:>12}  {:>12}  {:>7}  {:<12}  {}",
            format_size(entry.original_size),
            entry.output_size.map(format_size).unwrap_or_else(|| "-".to_string()),
            format_ratio(entry),
            entry.outcome.label(),
            entry.name
        );
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>12}  {:>12}  {:>7}  {} of {} entries written, {} images recompressed, {} dropped",
        format_size(report.total_original()),
        format_size(report.total_output()),
        match report.total_original() {
            0 => "-".to_string(),
            total => format!("{:.4}", report.total_output() as f64 / total as f64),
        },
        report.output_entries(),
        report.input_entries(),
        report.recompressed(),
        report.dropped()
    );
}

fn format_ratio(entry: &EntryReport) -> String {
    entry
        .ratio()
        .map(|r| format!("{:.4}", r))
        .unwrap_or_else(|| "-".to_string())
}

/// Percentage of space saved, padded for the listing table.
fn saved_percent(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 {
        format!(
            "{:>4}%",
            100i64 - (compressed as i64 * 100 / uncompressed as i64)
        )
    } else {
        "  0%".to_string()
    }
}

/// Format a byte size with the largest fitting unit.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[test]
    fn savings() {
        assert_eq!(saved_percent(25, 100), "  75%");
        assert_eq!(saved_percent(0, 0), "  0%");
        // Stored entries larger than their content show a negative saving
        assert_eq!(saved_percent(110, 100), " -10%");
    }
}
