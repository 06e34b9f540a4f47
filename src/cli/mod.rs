//! Command-line parsing for the carousel beam-hardening corrector.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the physics/fitting code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "bhc", version, about = "Carousel-based X-ray beam hardening correction")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the transmission model to a calibration run and write the
    /// per-line correction polynomials.
    Fit(FitArgs),
    /// Print spectrum diagnostics (mean energy, hardening) for a
    /// calibration run without fitting.
    Spectrum(SpectrumArgs),
}

/// Options for the fit pipeline.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Calibration run definition file.
    #[arg(long, value_name = "FILE")]
    pub run: PathBuf,

    /// Carousel definition file (samples + image geometry).
    #[arg(long, value_name = "FILE")]
    pub carousel: PathBuf,

    /// Directory of material attenuation tables.
    #[arg(long, value_name = "DIR", default_value = "materials")]
    pub materials: PathBuf,

    /// Directory of source spectra.
    #[arg(long, value_name = "DIR", default_value = "spectra")]
    pub spectra: PathBuf,

    /// Number of detector lines to fit (from the top of the image).
    #[arg(short = 'n', long, default_value_t = 1)]
    pub nlines: usize,

    /// Polynomial order of the target width in line number.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub vary_target: i32,

    /// Polynomial order of the detector width (fitted in log space); -1 disables.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub vary_detector: i32,

    /// Polynomial order of the fitted filter width; -1 disables.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub vary_filter: i32,

    /// Polynomial order of the energy-axis scale; -1 disables.
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub vary_energy: i32,

    /// Material of the fitted filter.
    #[arg(long, default_value = "cu")]
    pub fit_filter: String,

    /// Density override for the fitted filter (g/cm3); defaults to the
    /// material table's density.
    #[arg(long)]
    pub fit_filter_density: Option<f64>,

    /// Starting widths `target,detector,filter` in mm; zeros when omitted.
    #[arg(long, value_delimiter = ',', value_name = "T,D,F")]
    pub guess: Option<Vec<f64>>,

    /// Half-width (in columns) of the averaging window around the image centre.
    #[arg(long, default_value_t = 5.0)]
    pub half_width: f64,

    /// Sample selections to mask/unmask, 1-based; negative values unmask.
    /// May be given several times; applied in order.
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    pub mask: Vec<i32>,

    /// Open-beam intensity; when given, raw pixel values are transformed to
    /// attenuations via ln(I0) - ln(pixel) before fitting.
    #[arg(long)]
    pub white_level: Option<f64>,

    /// Correction material.
    #[arg(long, default_value = "al")]
    pub cor_material: String,

    /// Single energy (keV) the correction maps onto.
    #[arg(long, default_value_t = 40.0)]
    pub cor_energy: f64,

    /// Sweep points for the correction table.
    #[arg(long, default_value_t = 300)]
    pub cor_points: usize,

    /// Maximum correction-material thickness of the sweep (mm).
    #[arg(long, default_value_t = 12.0)]
    pub cor_max_thickness: f64,

    /// Order of the per-line correction polynomial.
    #[arg(long, default_value_t = 5)]
    pub cor_order: usize,

    /// Raise errors on numeric overflow instead of clamping.
    #[arg(long)]
    pub debug_numerics: bool,

    /// Maximum solver iterations.
    #[arg(long, default_value_t = 200)]
    pub max_iterations: usize,

    /// Output directory for fit.log, param.log and the correction files.
    #[arg(short = 'o', long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,
}

/// Options for spectrum diagnostics.
#[derive(Debug, Parser, Clone)]
pub struct SpectrumArgs {
    /// Calibration run definition file.
    #[arg(long, value_name = "FILE")]
    pub run: PathBuf,

    /// Directory of material attenuation tables.
    #[arg(long, value_name = "DIR", default_value = "materials")]
    pub materials: PathBuf,

    /// Directory of source spectra.
    #[arg(long, value_name = "DIR", default_value = "spectra")]
    pub spectra: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_defaults_match_the_standard_run() {
        let cli = Cli::try_parse_from([
            "bhc", "fit", "--run", "run.def", "--carousel", "carousel.def",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit subcommand");
        };
        assert_eq!(args.nlines, 1);
        assert_eq!(args.vary_energy, -1);
        assert_eq!(args.cor_points, 300);
        assert!((args.cor_max_thickness - 12.0).abs() < 1e-12);
        assert_eq!(args.cor_order, 5);
        assert!(args.mask.is_empty());
    }

    #[test]
    fn mask_and_guess_parse() {
        let cli = Cli::try_parse_from([
            "bhc", "fit", "--run", "r", "--carousel", "c", "--mask", "3", "--mask", "-3",
            "--guess", "0.1,-1.0,0.0",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit subcommand");
        };
        assert_eq!(args.mask, vec![3, -3]);
        assert_eq!(args.guess, Some(vec![0.1, -1.0, 0.0]));
    }
}
