use std::{fs::create_dir_all, path::PathBuf, time::Duration};

use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use boschfwtool::{DirectorySink, ExtractObserver, Firmware};

/// A tool for parsing and extracting Bosch camera firmware files.
#[derive(Parser)]
#[command(about, version)]
struct Args {
    /// The firmware file to operate on
    input:       PathBuf,
    /// Output directory
    #[arg(short, long, default_value = ".")]
    output:      PathBuf,
    /// Print the header map and exit without extracting
    #[arg(short, long)]
    list:        bool,
    /// Extract sections one after another instead of in parallel
    #[arg(long)]
    no_parallel: bool,
}

struct ProgressObserver {
    bar: ProgressBar,
}

impl ExtractObserver for ProgressObserver {
    fn on_entry(&self, name: &str, length: u32) {
        self.bar.inc(1);
        self.bar.set_message(format!("{name} ({length} bytes)"));
    }

    fn on_checksum_mismatch(&self, target: u32, declared: u32, actual: u32) {
        self.bar.println(format!(
            "      {} in target {:x}: header {:#010x}, calculated {:#010x}",
            style("checksum mismatch").red(),
            target,
            declared,
            actual
        ));
    }
}

fn main() {
    color_backtrace::install();

    let args = Args::parse();

    if !args.input.is_file() {
        println!(
            "{}: {}",
            style("not a valid input file").red(),
            args.input.display()
        );
        std::process::exit(-1);
    }

    let firmware = Firmware::open(&args.input).unwrap_or_else(|err| {
        println!("{}: {}", style("couldn't parse firmware image").red(), err);
        std::process::exit(-1);
    });

    println!(
        "{} {} headers, {} data sections",
        style("parsed").green(),
        style(firmware.headers().len()).magenta(),
        style(firmware.data_headers().count()).magenta(),
    );

    if args.list {
        for header in firmware.headers() {
            println!(
                "{} target {:<4x} variant {:<4} version {:#010x} length {:#010x} checksum {:#010x}{}{}{}",
                style(format!("{:#10x}", header.offset)).blue(),
                header.target,
                header.variant,
                header.version,
                header.length,
                header.checksum,
                if header.is_nested() { " nested" } else { "" },
                if header.is_encrypted() { " encrypted" } else { "" },
                if header.has_key_blob() { " keyed" } else { "" },
            );
        }
        return;
    }

    create_dir_all(&args.output).unwrap_or_else(|err| {
        println!(
            "{}: {}: {}",
            style("couldn't create output directory").red(),
            args.output.display(),
            err
        );
        std::process::exit(-1);
    });

    println!(
        "{} {}…",
        style("extracting to").blue(),
        args.output.display()
    );
    let bar = ProgressBar::new_spinner().with_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {pos} {wide_msg}")
            .unwrap(),
    );
    bar.enable_steady_tick(Duration::from_millis(12));

    let sink = DirectorySink::new(&args.output);
    let observer = ProgressObserver { bar };
    let summary = firmware.extract(&sink, &observer, !args.no_parallel);
    observer.bar.finish_and_clear();

    for section in &summary.sections {
        if section.encryption_mismatch {
            println!(
                "{}: target {:x} version and key blob disagree about encryption",
                style("warning").yellow(),
                section.target
            );
        }
        if let Some(err) = &section.error {
            println!(
                "{} target {:x} at {:#x}: {}",
                style("section failed").red(),
                section.target,
                section.offset,
                err
            );
        }
    }
    let mismatches = summary.checksum_mismatches();
    if mismatches > 0 {
        println!(
            "{}: {} section(s) failed checksum validation",
            style("warning").yellow(),
            mismatches
        );
    }
    println!(
        "{} {} {}",
        style("extracted").green(),
        style(summary.files_written).magenta(),
        style("files").green(),
    );

    if summary.has_errors() {
        std::process::exit(-1);
    }
}
