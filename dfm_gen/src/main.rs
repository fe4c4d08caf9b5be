// dfm_gen - stochastic growth modelling of natural fracture networks
// Copyright (C) 2026 The dfm_gen developers

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use dfm_gen::{
    write_dfn_ascii, write_dfn_fab, write_implicit_files, write_template, DFNBuilder, DfnFileType,
    ModelConfig, ProgressReporter, DEFAULT_CONFIG_FILENAME,
};

/// Layered-rock fracture network growth simulator
#[derive(Parser)]
#[command(name = "dfm_gen", version, about)]
struct Cli {
    /// Input configuration file
    input: Option<PathBuf>,
}

struct CliProgress {
    bar: indicatif::ProgressBar,
    cancelled: Arc<AtomicBool>,
}

impl CliProgress {
    fn new(label: &str, cancelled: Arc<AtomicBool>) -> Self {
        let bar = indicatif::ProgressBar::new(1);
        bar.set_message(label.to_string());
        bar.set_style(
            indicatif::ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
        );
        CliProgress { bar, cancelled }
    }
}

impl ProgressReporter for CliProgress {
    fn report(&self, completed: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(completed as u64);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let input = cli
        .input
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));

    if !input.exists() {
        eprintln!(
            "Configuration file {} not found; writing a commented template.",
            input.display()
        );
        if let Err(e) = write_template(&input) {
            eprintln!("Could not write the template: {}", e);
        } else {
            eprintln!("Edit {} and run again.", input.display());
        }
        return ExitCode::FAILURE;
    }

    match run(&input) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(input: &Path) -> anyhow::Result<bool> {
    let cfg = ModelConfig::load(input).context("loading configuration")?;
    let mut grid = cfg.build_grid().context("building the fracture grid")?;
    let outdir = ModelConfig::output_folder(input);

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let flag = cancelled.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("could not install the interrupt handler: {}", e);
        }
    }

    info!(
        "implicit calculation: {} x {} cells on {} thread(s)",
        grid.rows(),
        grid.cols(),
        cfg.threads
    );
    let progress = CliProgress::new("cells", cancelled.clone());
    let summaries = grid.run_implicit(&cfg.propagation_control(), cfg.threads, &progress);
    progress.bar.finish();
    let was_cancelled = summaries.iter().any(|s| s.cancelled);
    if was_cancelled {
        warn!("run cancelled; later episodes were skipped");
    }

    let mut io_ok = true;
    if cfg.write_implicit {
        if let Err(e) =
            write_implicit_files(&grid, cfg.time_units, cfg.output_compliance_tensor, &outdir)
        {
            warn!("implicit data files could not be written: {}", e);
            io_ok = false;
        }
    }

    if cfg.dfn.generate && !was_cancelled {
        let dfn_progress = CliProgress::new("DFN", cancelled.clone());
        let dfn = DFNBuilder::new(&grid, &cfg.dfn).build(&dfn_progress);
        dfn_progress.bar.finish();
        info!(
            "explicit DFN: {} macrofractures, {} microfractures",
            dfn.macrofractures.len(),
            dfn.microfractures.len()
        );
        if cfg.write_dfn {
            let result = fs::create_dir_all(&outdir)
                .map_err(dfm_gen::DfmError::from)
                .and_then(|_| match cfg.dfn_format {
                    DfnFileType::Ascii => write_dfn_ascii(&dfn, &grid, &outdir.join("DFN.txt")),
                    DfnFileType::Fab => write_dfn_fab(&dfn, &grid, &outdir.join("DFN.fab")),
                });
            if let Err(e) = result {
                warn!("DFN files could not be written: {}", e);
                io_ok = false;
            }
        }
    }

    Ok(io_ok && !was_cancelled)
}
