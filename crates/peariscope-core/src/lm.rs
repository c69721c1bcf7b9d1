//! Dense Levenberg–Marquardt solver.
//!
//! Used by the pose refiner and the camera calibrator. Problems supply a
//! residual vector; the Jacobian defaults to forward differences and may be
//! overridden when the problem knows its sparsity.

use nalgebra::{DMatrix, DVector};

/// A nonlinear least-squares problem `min_x |r(x)|²`.
pub trait LeastSquaresProblem {
    /// Residuals at `params`, or `None` where the model is undefined
    /// (e.g. a point projects behind the camera).
    fn residuals(&self, params: &DVector<f64>) -> Option<DVector<f64>>;

    /// Jacobian of the residuals at `params`. `r0` is `residuals(params)`.
    fn jacobian(&self, params: &DVector<f64>, r0: &DVector<f64>) -> Option<DMatrix<f64>> {
        numeric_jacobian(self, params, r0, 0..params.len())
    }
}

/// Forward-difference Jacobian restricted to the given parameter columns.
///
/// Columns outside `cols` are left at zero.
pub fn numeric_jacobian<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    params: &DVector<f64>,
    r0: &DVector<f64>,
    cols: impl IntoIterator<Item = usize>,
) -> Option<DMatrix<f64>> {
    let mut jac = DMatrix::zeros(r0.len(), params.len());
    let mut shifted = params.clone();
    for c in cols {
        let h = FD_STEP * params[c].abs().max(1.0);
        shifted[c] = params[c] + h;
        let r = problem.residuals(&shifted)?;
        shifted[c] = params[c];
        if r.len() != r0.len() {
            return None;
        }
        jac.set_column(c, &((r - r0) / h));
    }
    Some(jac)
}

const FD_STEP: f64 = 1e-7;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevenbergMarquardt {
    pub max_iterations: usize,
    pub initial_lambda: f64,
    /// Stop when the relative cost decrease falls below this.
    pub ftol: f64,
    /// Stop when the relative step length falls below this.
    pub xtol: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            initial_lambda: 1e-3,
            ftol: 1e-12,
            xtol: 1e-12,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LmReport {
    pub params: DVector<f64>,
    /// Sum of squared residuals before the first step.
    pub initial_cost: f64,
    /// Sum of squared residuals at `params`.
    pub final_cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl LevenbergMarquardt {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Minimize starting at `x0`. `None` if the residuals are undefined at `x0`.
    pub fn minimize<P: LeastSquaresProblem + ?Sized>(
        &self,
        problem: &P,
        x0: DVector<f64>,
    ) -> Option<LmReport> {
        let mut x = x0;
        let mut r = problem.residuals(&x)?;
        let mut cost = r.norm_squared();
        let initial_cost = cost;
        let mut lambda = self.initial_lambda;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.max_iterations && !converged {
            iterations += 1;
            let Some(jac) = problem.jacobian(&x, &r) else {
                break;
            };
            let jt = jac.transpose();
            let jtj = &jt * &jac;
            let g = &jt * &r;
            if g.amax() < 1e-15 {
                converged = true;
                break;
            }

            let mut stepped = false;
            while lambda < LAMBDA_MAX {
                let mut damped = jtj.clone();
                for i in 0..damped.nrows() {
                    damped[(i, i)] += lambda * jtj[(i, i)].max(1e-9);
                }
                let Some(chol) = damped.cholesky() else {
                    lambda *= 10.0;
                    continue;
                };
                let delta = -chol.solve(&g);
                let candidate = &x + &delta;
                match problem.residuals(&candidate) {
                    Some(r_new) if r_new.norm_squared() < cost => {
                        let new_cost = r_new.norm_squared();
                        let small_step = delta.norm() <= self.xtol * (x.norm() + self.xtol);
                        let small_gain = cost - new_cost <= self.ftol * cost;
                        x = candidate;
                        r = r_new;
                        cost = new_cost;
                        lambda = (lambda * 0.1).max(LAMBDA_MIN);
                        converged = small_step || small_gain;
                        stepped = true;
                        break;
                    }
                    _ => lambda *= 10.0,
                }
            }
            if !stepped {
                // No downhill step exists at any damping: local minimum.
                converged = true;
            }
        }

        Some(LmReport {
            params: x,
            initial_cost,
            final_cost: cost,
            iterations,
            converged,
        })
    }
}

const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Fit y = a * exp(b * x).
    struct ExpFit {
        xs: Vec<f64>,
        ys: Vec<f64>,
    }

    impl LeastSquaresProblem for ExpFit {
        fn residuals(&self, p: &DVector<f64>) -> Option<DVector<f64>> {
            Some(DVector::from_iterator(
                self.xs.len(),
                self.xs
                    .iter()
                    .zip(&self.ys)
                    .map(|(x, y)| p[0] * (p[1] * x).exp() - y),
            ))
        }
    }

    #[test]
    fn fits_exponential_curve() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let ys = xs.iter().map(|x| 2.5 * (-1.3 * x).exp()).collect();
        let problem = ExpFit { xs, ys };
        let report = LevenbergMarquardt::default()
            .minimize(&problem, DVector::from_vec(vec![1.0, 0.0]))
            .expect("defined at start");
        assert!(report.final_cost < 1e-12, "cost {}", report.final_cost);
        assert!(report.final_cost <= report.initial_cost);
        assert_relative_eq!(report.params[0], 2.5, epsilon = 1e-5);
        assert_relative_eq!(report.params[1], -1.3, epsilon = 1e-5);
    }

    struct Undefined;

    impl LeastSquaresProblem for Undefined {
        fn residuals(&self, _: &DVector<f64>) -> Option<DVector<f64>> {
            None
        }
    }

    #[test]
    fn undefined_start_returns_none() {
        assert!(LevenbergMarquardt::default()
            .minimize(&Undefined, DVector::zeros(2))
            .is_none());
    }

    #[test]
    fn restricted_jacobian_leaves_other_columns_zero() {
        let problem = ExpFit {
            xs: vec![0.0, 1.0],
            ys: vec![1.0, 2.0],
        };
        let p = DVector::from_vec(vec![1.0, 0.5]);
        let r0 = problem.residuals(&p).expect("defined");
        let jac = numeric_jacobian(&problem, &p, &r0, [1]).expect("jacobian");
        assert_eq!(jac[(0, 0)], 0.0);
        assert_eq!(jac[(1, 0)], 0.0);
        assert_relative_eq!(jac[(1, 1)], 0.5_f64.exp(), epsilon = 1e-5);
    }
}
