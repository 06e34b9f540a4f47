//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads the calibration inputs
//! - runs the fit and the correction sweep
//! - writes fit.log, param.log and the correction coefficient files

use std::fs;

use clap::Parser;

use crate::cli::{Command, FitArgs, SpectrumArgs};
use crate::error::BhcError;
use crate::io::export::{write_correction_bin, write_correction_json, CorrectionFile};
use crate::io::ingest::{load_calibration_run, load_spectrum, spectrum_path, MaterialStore};
use crate::physics::Filter;

pub mod pipeline;

/// Entry point for the `bhc` binary.
pub fn run() -> Result<(), BhcError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Spectrum(args) => handle_spectrum(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), BhcError> {
    let run = pipeline::run_fit(&args)?;

    fs::create_dir_all(&args.out_dir).map_err(|e| {
        BhcError::Io(format!(
            "failed to create '{}': {e}",
            args.out_dir.display()
        ))
    })?;

    let fit_log = crate::report::format_fit_log(&run.fit, &run.stats, run.elapsed_secs);
    let param_log = crate::report::format_param_log(&run.fit, &run.guess, &run.table);
    println!("{fit_log}");

    write_text(&args.out_dir.join("fit.log"), &fit_log)?;
    write_text(&args.out_dir.join("param.log"), &param_log)?;

    let envelope = CorrectionFile::from_table(&run.table, &run.cor_material.name, args.cor_energy);
    write_correction_json(&args.out_dir.join("polyfit.json"), &envelope)?;
    write_correction_bin(&args.out_dir.join("polyfit.bin"), &run.table)?;

    println!(
        "wrote correction polynomials for {} lines to {}",
        run.fit.nlines,
        args.out_dir.display()
    );
    Ok(())
}

fn handle_spectrum(args: SpectrumArgs) -> Result<(), BhcError> {
    let run = load_calibration_run(&args.run)?;
    let mut materials = MaterialStore::new(&args.materials);

    let source = load_spectrum(&spectrum_path(
        &args.spectra,
        &run.target_name,
        run.voltage,
        run.angle,
    ))?;

    let filters = run
        .filters
        .iter()
        .map(|(name, width_mm, density)| {
            Ok(Filter {
                material: materials.get(name)?,
                width_mm: *width_mm,
                density: *density,
            })
        })
        .collect::<Result<Vec<_>, BhcError>>()?;

    let filtered = source.filtered(&filters);
    let detector = materials.get(&run.detector_name)?;
    let detected = filtered.detected(&detector, run.detector_density, run.detector_width_mm);

    println!("=== bhc - spectrum diagnostics ===");
    println!(
        "Source: {} at {:.0} kV, {:.0} deg takeoff",
        run.target_name, run.voltage, run.angle
    );
    println!(
        "Raw beam:      mean {:.2} keV | std dev {:.2} keV",
        source.mean_energy(),
        source.energy_std_dev()
    );
    println!(
        "After filters: mean {:.2} keV | std dev {:.2} keV ({} filters)",
        filtered.mean_energy(),
        filtered.energy_std_dev(),
        filters.len()
    );
    println!(
        "As detected:   mean {:.2} keV | std dev {:.2} keV",
        detected.mean_energy(),
        detected.energy_std_dev()
    );
    println!(
        "Filter transmission: {:.4}",
        filtered.total_intensity() / source.total_intensity()
    );
    Ok(())
}

fn write_text(path: &std::path::Path, contents: &str) -> Result<(), BhcError> {
    fs::write(path, contents)
        .map_err(|e| BhcError::Io(format!("failed to write '{}': {e}", path.display())))
}
