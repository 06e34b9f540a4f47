//! Levenberg-Marquardt minimizer.
//!
//! The objective is a plain sum of squared residuals; the iteration is the
//! classic damped-normal-equations scheme: solve
//! `(J^T J + lambda diag(J^T J)) delta = -J^T r`, accept the step when the
//! SSE drops (lambda down), otherwise reject and raise lambda. The
//! Jacobian is a forward-difference approximation, since the residuals go
//! through a spectral integration with no tractable closed form.
//!
//! Each iteration depends on the previous residual/Jacobian, so the loop
//! is sequential by design.

use nalgebra::{DMatrix, DVector};

use crate::domain::FitOutcome;
use crate::error::BhcError;
use crate::math::solve_least_squares;

/// Residual provider: parameters in, residual vector out. May fail, e.g.
/// on numeric instability in debug mode.
pub trait ResidualFn {
    fn residuals(&self, params: &DVector<f64>) -> Result<DVector<f64>, BhcError>;
}

impl<F> ResidualFn for F
where
    F: Fn(&DVector<f64>) -> Result<DVector<f64>, BhcError>,
{
    fn residuals(&self, params: &DVector<f64>) -> Result<DVector<f64>, BhcError> {
        self(params)
    }
}

#[derive(Debug, Clone)]
pub struct LmConfig {
    pub max_iterations: usize,
    /// Inf-norm tolerance on the gradient `J^T r` (code 1).
    pub gradient_tol: f64,
    /// Relative inf-norm tolerance on the accepted step (code 2).
    pub step_tol: f64,
    /// Relative SSE-reduction tolerance on an accepted step (code 4).
    pub residual_tol: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
    /// Relative forward-difference step for the Jacobian.
    pub fd_step: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            gradient_tol: 1e-9,
            step_tol: 1e-10,
            residual_tol: 1e-12,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            fd_step: 1e-6,
        }
    }
}

/// Raw minimizer output; classification lives in `outcome`.
#[derive(Debug, Clone)]
pub struct LmReport {
    pub params: DVector<f64>,
    pub sse: f64,
    pub outcome: FitOutcome,
    pub iterations: usize,
    /// Jacobian at the returned parameters (for covariance estimation).
    pub jacobian: DMatrix<f64>,
}

/// Minimize `|f(params)|^2` starting from `initial`.
///
/// Hard errors (residual evaluation failures) abort immediately;
/// everything else terminates with a classified `FitOutcome` in the
/// report, success or not.
pub fn minimize<F: ResidualFn>(
    f: &F,
    initial: DVector<f64>,
    config: &LmConfig,
) -> Result<LmReport, BhcError> {
    let p = initial.len();
    let mut params = initial;
    let mut residuals = f.residuals(&params)?;
    let mut sse = residuals.norm_squared();
    let mut lambda = config.initial_lambda;
    let mut jacobian = numeric_jacobian(f, &params, &residuals, config.fd_step)?;
    let mut iterations = 0usize;

    if !sse.is_finite() {
        return Ok(LmReport {
            params,
            sse,
            outcome: FitOutcome::new(7, "initial residuals are not finite"),
            iterations,
            jacobian,
        });
    }

    let mut outcome = FitOutcome::new(
        5,
        format!("iteration limit of {} reached", config.max_iterations),
    );

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let gradient = jacobian.transpose() * &residuals;
        let grad_norm = gradient.amax();
        if grad_norm < config.gradient_tol {
            outcome = FitOutcome::new(1, format!("gradient norm {grad_norm:.3e} below tolerance"));
            break;
        }

        let jtj = jacobian.transpose() * &jacobian;

        // Inner damping loop: raise lambda until a step is accepted or the
        // system is declared singular.
        let mut stepped = false;
        loop {
            let mut damped = jtj.clone();
            for i in 0..p {
                damped[(i, i)] *= 1.0 + lambda;
            }

            let delta = solve_least_squares(&damped, &(-&gradient));
            let Some(delta) = delta else {
                lambda *= config.lambda_up;
                if lambda > 1e12 {
                    outcome = FitOutcome::new(6, "damped normal equations singular");
                    break;
                }
                continue;
            };

            let trial = &params + &delta;
            let trial_residuals = f.residuals(&trial)?;
            let trial_sse = trial_residuals.norm_squared();

            if !trial_sse.is_finite() {
                lambda *= config.lambda_up;
                if lambda > 1e12 {
                    outcome = FitOutcome::new(7, "residuals not finite at any step length");
                    break;
                }
                continue;
            }

            if trial_sse < sse {
                let step_norm = delta.amax();
                let param_scale = 1.0 + params.amax();
                let reduction = (sse - trial_sse) / sse.max(f64::MIN_POSITIVE);

                params = trial;
                residuals = trial_residuals;
                sse = trial_sse;
                lambda *= config.lambda_down;
                jacobian = numeric_jacobian(f, &params, &residuals, config.fd_step)?;
                stepped = true;

                let small_step = step_norm < config.step_tol * param_scale;
                let small_gradient =
                    (jacobian.transpose() * &residuals).amax() < config.gradient_tol;
                if small_step || small_gradient {
                    let code = match (small_gradient, small_step) {
                        (true, true) => 3,
                        (true, false) => 1,
                        (false, true) => 2,
                        (false, false) => unreachable!("guarded by small_step || small_gradient"),
                    };
                    outcome = FitOutcome::new(
                        code,
                        format!("converged: step {step_norm:.3e}, sse {sse:.6e}"),
                    );
                } else if reduction < config.residual_tol {
                    outcome = FitOutcome::new(
                        4,
                        format!("relative sse reduction {reduction:.3e} below tolerance"),
                    );
                }
                break;
            }

            lambda *= config.lambda_up;
            if lambda > 1e12 {
                outcome = FitOutcome::new(
                    4,
                    format!("no further reduction possible, sse {sse:.6e}"),
                );
                break;
            }
        }

        if outcome.code != 5 {
            break;
        }
        if !stepped {
            break;
        }
    }

    Ok(LmReport {
        params,
        sse,
        outcome,
        iterations,
        jacobian,
    })
}

/// Forward-difference Jacobian of the residual vector.
fn numeric_jacobian<F: ResidualFn>(
    f: &F,
    params: &DVector<f64>,
    base: &DVector<f64>,
    fd_step: f64,
) -> Result<DMatrix<f64>, BhcError> {
    let m = base.len();
    let p = params.len();
    let mut jac = DMatrix::<f64>::zeros(m, p);

    for j in 0..p {
        let step = fd_step * (1.0 + params[j].abs());
        let mut shifted = params.clone();
        shifted[j] += step;
        let perturbed = f.residuals(&shifted)?;
        for i in 0..m {
            jac[(i, j)] = (perturbed[i] - base[i]) / step;
        }
    }

    Ok(jac)
}
