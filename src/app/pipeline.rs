//! The fit pipeline: file ingest -> session assembly -> fit -> correction.
//!
//! Keeping this in one place avoids duplicating the core workflow and keeps
//! the CLI layer focused on presentation and file placement.

use std::time::Instant;

use log::{info, warn};

use crate::cli::FitArgs;
use crate::correction::{build_correction_table, CorrectionConfig};
use crate::domain::{CorrectionTable, ErrorStats, FitResult, NumericMode, VaryOrders};
use crate::error::BhcError;
use crate::fit::{BeamSetup, Session};
use crate::io::ingest::{
    load_calibration_run, load_carousel, load_images, load_spectrum, spectrum_path, MaterialStore,
};
use crate::physics::{Filter, MaterialAttenuation};

/// All computed outputs of a single `bhc fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub fit: FitResult,
    pub stats: ErrorStats,
    pub table: CorrectionTable,
    /// Initial parameter vector the solver started from.
    pub guess: Vec<f64>,
    pub cor_material: MaterialAttenuation,
    pub elapsed_secs: f64,
}

/// Assemble a session from the input files named in `args`.
pub fn build_session(args: &FitArgs) -> Result<Session, BhcError> {
    let run = load_calibration_run(&args.run)?;
    let mut materials = MaterialStore::new(&args.materials);

    let carousel = load_carousel(&args.carousel, &mut materials)?;
    let images = load_images(
        &run.image_file,
        carousel.len(),
        carousel.lines,
        carousel.columns,
    )?;
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

    let fit_filter = materials.get(&args.fit_filter)?;
    let fit_filter_density = args.fit_filter_density.unwrap_or(fit_filter.density);

    let beam = BeamSetup {
        target: materials.get(&run.target_name)?,
        target_density: run.target_density,
        filters,
        fit_filter,
        fit_filter_density,
        detector: materials.get(&run.detector_name)?,
        detector_density: run.detector_density,
        detector_width_mm: run.detector_width_mm,
    };

    let mut session = Session::new(carousel, images, source, beam)?;
    session.vary = VaryOrders {
        target: args.vary_target,
        detector: args.vary_detector,
        filter: args.vary_filter,
        energy: args.vary_energy,
    };
    session.half_width = args.half_width;
    session.mode = if args.debug_numerics {
        NumericMode::Debug
    } else {
        NumericMode::Production
    };
    session.lm.max_iterations = args.max_iterations;

    for &selection in &args.mask {
        session.carousel.apply_mask_selection(selection)?;
    }

    if let Some(i0) = args.white_level {
        let clamped = session.transform(i0)?;
        let total: usize = clamped.iter().sum();
        if total > 0 {
            warn!("transform clamped {total} non-positive pixels");
        }
    }

    Ok(session)
}

/// Execute the full pipeline: fit, error statistics, correction table.
pub fn run_fit(args: &FitArgs) -> Result<RunOutput, BhcError> {
    let mut session = build_session(args)?;

    let explicit = args.guess.as_ref().map(|g| [g[0], g[1], g[2]]);
    let guess = session.initial_guess(explicit);

    let started = Instant::now();
    let fit = session.run_fit(args.nlines, explicit)?.clone();
    let elapsed_secs = started.elapsed().as_secs_f64();

    if !fit.outcome.is_success() {
        return Err(BhcError::ConvergenceFailure {
            code: fit.outcome.code,
            iterations: fit.iterations,
            message: fit.outcome.message.clone(),
        });
    }
    info!(
        "fit converged: code {} after {} iterations, sse {:.3e}",
        fit.outcome.code, fit.iterations, fit.sse
    );

    let stats = session.error_stats()?;

    let mut materials = MaterialStore::new(&args.materials);
    let cor_material = materials.get(&args.cor_material)?;
    let config = CorrectionConfig {
        num_points: args.cor_points,
        max_thickness_mm: args.cor_max_thickness,
        poly_order: args.cor_order,
    };
    let model = session.forward_model();
    let table = build_correction_table(
        &model,
        &fit,
        &cor_material,
        cor_material.density,
        args.cor_energy,
        &config,
    )?;

    Ok(RunOutput {
        fit,
        stats,
        table,
        guess,
        cor_material,
        elapsed_secs,
    })
}
