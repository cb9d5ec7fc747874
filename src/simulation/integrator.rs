//! Dormand–Prince RK4(5) with per-step error control and cubic Hermite dense output.

use std::fmt;
use std::time::Instant;

/// Right-hand side of an ODE system `dy/dt = f(t, y)`.
pub trait OdeSystem {
    fn ndim(&self) -> usize;

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]);
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorOptions {
    pub rtol: f64,
    pub atol: f64,
    pub h_min: f64,
    pub h_max: f64,
}

/// Shared step/wall-clock allowance across all segments of one run.
#[derive(Debug, Clone)]
pub struct StepBudget {
    max_steps: usize,
    steps: usize,
    deadline: Option<Instant>,
}

impl StepBudget {
    pub fn new(max_steps: usize, deadline: Option<Instant>) -> Self {
        Self {
            max_steps,
            steps: 0,
            deadline,
        }
    }

    pub fn steps_taken(&self) -> usize {
        self.steps
    }

    fn charge(&mut self) -> Result<(), FailureReason> {
        if self.steps >= self.max_steps {
            return Err(FailureReason::StepBudgetExceeded(self.max_steps));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(FailureReason::WallClockExceeded);
            }
        }
        self.steps += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    NonFiniteState,
    StepSizeUnderflow(f64),
    StepBudgetExceeded(usize),
    WallClockExceeded,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NonFiniteState => write!(f, "non-finite state or derivative"),
            FailureReason::StepSizeUnderflow(h) => {
                write!(f, "step size fell below minimum ({:.3e} h)", h)
            }
            FailureReason::StepBudgetExceeded(n) => write!(f, "exceeded step budget of {}", n),
            FailureReason::WallClockExceeded => write!(f, "exceeded wall-clock budget"),
        }
    }
}

/// Failure time; the state vector passed to [`integrate`] holds the last accepted state.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationFailure {
    pub time: f64,
    pub reason: FailureReason,
}

/// One accepted step, with derivatives at both ends for interpolation.
pub struct AcceptedStep<'a> {
    pub t0: f64,
    pub t1: f64,
    pub y0: &'a [f64],
    pub y1: &'a [f64],
    pub f0: &'a [f64],
    pub f1: &'a [f64],
}

impl AcceptedStep<'_> {
    pub fn interpolate(&self, t: f64, out: &mut [f64]) {
        let h = self.t1 - self.t0;
        let theta = ((t - self.t0) / h).clamp(0.0, 1.0);
        let theta2 = theta * theta;
        let theta3 = theta2 * theta;

        let h00 = 2.0 * theta3 - 3.0 * theta2 + 1.0;
        let h10 = theta3 - 2.0 * theta2 + theta;
        let h01 = -2.0 * theta3 + 3.0 * theta2;
        let h11 = theta3 - theta2;

        for i in 0..out.len() {
            out[i] = h00 * self.y0[i]
                + h10 * h * self.f0[i]
                + h01 * self.y1[i]
                + h11 * h * self.f1[i];
        }
    }
}

// Dormand–Prince coefficients
const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th-order weights, used to advance the solution
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference to the embedded 4th-order weights
const E1: f64 = B1 - 5179.0 / 57600.0;
const E3: f64 = B3 - 7571.0 / 16695.0;
const E4: f64 = B4 - 393.0 / 640.0;
const E5: f64 = B5 - (-92097.0 / 339200.0);
const E6: f64 = B6 - 187.0 / 2100.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MAX_GROWTH: f64 = 5.0;
const MAX_SHRINK: f64 = 0.2;

/// Integrates `sys` from `t0` to `t1`, updating `y` in place.
///
/// `h` carries the step size between calls. `on_step` sees every accepted step
/// in order; the last one ends exactly at `t1`.
#[allow(clippy::too_many_arguments)]
pub fn integrate<S, F>(
    sys: &S,
    y: &mut [f64],
    t0: f64,
    t1: f64,
    h: &mut f64,
    opts: &IntegratorOptions,
    budget: &mut StepBudget,
    mut on_step: F,
) -> Result<(), IntegrationFailure>
where
    S: OdeSystem,
    F: FnMut(&AcceptedStep<'_>),
{
    let n = sys.ndim();
    let mut t = t0;

    let mut k1 = vec![0.0; n];
    let mut k2 = vec![0.0; n];
    let mut k3 = vec![0.0; n];
    let mut k4 = vec![0.0; n];
    let mut k5 = vec![0.0; n];
    let mut k6 = vec![0.0; n];
    let mut k7 = vec![0.0; n];
    let mut y_tmp = vec![0.0; n];
    let mut y_new = vec![0.0; n];

    let fail = |time: f64, reason: FailureReason| Err(IntegrationFailure { time, reason });

    sys.rhs(t, y, &mut k1);
    if k1.iter().any(|v| !v.is_finite()) {
        return fail(t, FailureReason::NonFiniteState);
    }

    if *h <= 0.0 || !h.is_finite() {
        *h = ((t1 - t0) * 1e-3).max(opts.h_min);
    }

    while t < t1 {
        if let Err(reason) = budget.charge() {
            return fail(t, reason);
        }

        let remaining = t1 - t;
        let mut step = h.min(opts.h_max).max(opts.h_min);
        let last = step >= remaining * (1.0 - 1e-12);
        if last {
            step = remaining;
        }

        for i in 0..n {
            y_tmp[i] = y[i] + step * A21 * k1[i];
        }
        sys.rhs(t + step / 5.0, &y_tmp, &mut k2);

        for i in 0..n {
            y_tmp[i] = y[i] + step * (A31 * k1[i] + A32 * k2[i]);
        }
        sys.rhs(t + 3.0 * step / 10.0, &y_tmp, &mut k3);

        for i in 0..n {
            y_tmp[i] = y[i] + step * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
        }
        sys.rhs(t + 4.0 * step / 5.0, &y_tmp, &mut k4);

        for i in 0..n {
            y_tmp[i] = y[i] + step * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
        }
        sys.rhs(t + 8.0 * step / 9.0, &y_tmp, &mut k5);

        for i in 0..n {
            y_tmp[i] = y[i]
                + step * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
        }
        sys.rhs(t + step, &y_tmp, &mut k6);

        for i in 0..n {
            y_new[i] = y[i]
                + step * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]);
        }
        let t_new = if last { t1 } else { t + step };
        sys.rhs(t_new, &y_new, &mut k7);

        let mut err_norm: f64 = 0.0;
        for i in 0..n {
            let ei = step
                * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i] + E7 * k7[i]);
            let sc = opts.atol + opts.rtol * y[i].abs().max(y_new[i].abs());
            err_norm += (ei / sc) * (ei / sc);
        }
        err_norm = (err_norm / n as f64).sqrt();

        if !err_norm.is_finite() {
            if step <= opts.h_min {
                return fail(t, FailureReason::NonFiniteState);
            }
            *h = step * MAX_SHRINK;
            continue;
        }

        if err_norm <= 1.0 {
            if y_new.iter().chain(k7.iter()).any(|v| !v.is_finite()) {
                return fail(t, FailureReason::NonFiniteState);
            }

            on_step(&AcceptedStep {
                t0: t,
                t1: t_new,
                y0: &*y,
                y1: &y_new,
                f0: &k1,
                f1: &k7,
            });

            t = t_new;
            y.copy_from_slice(&y_new);
            k1.copy_from_slice(&k7);
        } else if step <= opts.h_min {
            return fail(t, FailureReason::StepSizeUnderflow(opts.h_min));
        }

        let factor = if err_norm == 0.0 {
            MAX_GROWTH
        } else {
            (SAFETY * err_norm.powf(-0.2)).clamp(MAX_SHRINK, MAX_GROWTH)
        };
        // Keep the pre-truncation step when the segment end forced a short step.
        let base = if last && err_norm <= 1.0 { h.max(step) } else { step };
        *h = (base * factor).clamp(opts.h_min, opts.h_max);
    }

    Ok(())
}
