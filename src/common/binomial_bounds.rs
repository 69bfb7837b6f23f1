// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Confidence bounds on the unknown number of trials of a binomial
//! process, given an observed success count and the success probability.
//!
//! A theta sketch retains `num_samples` hashes, each input item landing
//! below theta independently with probability `theta`, so the retained
//! count is Binomial(N, theta) for the unknown true count N. The bounds
//! invert the exact binomial tail: the lower bound is the smallest N under
//! which observing at least `num_samples` successes still has the tail
//! probability matching the requested number of standard deviations, and
//! the upper bound is the largest N under which observing at most
//! `num_samples` does. The binomial CDF is evaluated through the
//! regularized incomplete beta function, which extends it continuously in
//! N, and the inversion is a bisection on N.

use std::f64::consts::PI;

use crate::common::NumStdDev;
use crate::error::Error;

/// One-sided Gaussian tail probabilities for 1, 2, and 3 standard
/// deviations, the confidence levels the bounds are quoted at.
fn tail_delta(num_std_dev: NumStdDev) -> f64 {
    match num_std_dev {
        NumStdDev::One => 0.158_655_253_931_457_05,
        NumStdDev::Two => 0.022_750_131_948_179_21,
        NumStdDev::Three => 0.001_349_898_031_630_096,
    }
}

fn check_theta(theta: f64) -> Result<(), Error> {
    if !(theta > 0.0 && theta <= 1.0) {
        return Err(Error::invalid_argument(format!(
            "theta must be in (0.0, 1.0], got {theta}"
        )));
    }
    Ok(())
}

/// Returns the lower bound on the number of trials at the given
/// confidence.
///
/// The result is never below `num_samples`: every retained hash is a
/// distinct input item.
pub fn lower_bound(num_samples: u64, theta: f64, num_std_dev: NumStdDev) -> Result<f64, Error> {
    check_theta(theta)?;
    let n = num_samples as f64;
    if theta == 1.0 || num_samples == 0 {
        return Ok(n);
    }
    // Smallest N with P(S >= n | N, theta) = delta, i.e. the N at which
    // P(S <= n-1 | N, theta) has fallen to 1 - delta.
    let delta = tail_delta(num_std_dev);
    let solved = solve_trials(n - 1.0, theta, 1.0 - delta);
    Ok(solved.max(n))
}

/// Returns the upper bound on the number of trials at the given
/// confidence.
pub fn upper_bound(
    num_samples: u64,
    theta: f64,
    num_std_dev: NumStdDev,
    empty: bool,
) -> Result<f64, Error> {
    check_theta(theta)?;
    let n = num_samples as f64;
    if theta == 1.0 {
        return Ok(n);
    }
    if num_samples == 0 && empty {
        return Ok(0.0);
    }
    // Largest N with P(S <= n | N, theta) = delta.
    let delta = tail_delta(num_std_dev);
    Ok(solve_trials(n, theta, delta))
}

/// P(S <= successes | trials, theta), continuous in `trials` through the
/// regularized incomplete beta identity
/// `F(k; N, p) = I_{1-p}(N - k, k + 1)`.
fn tail_at_most(successes: f64, trials: f64, theta: f64) -> f64 {
    if trials <= successes {
        return 1.0;
    }
    regularized_incomplete_beta(trials - successes, successes + 1.0, 1.0 - theta)
}

/// Find the trial count at which `P(S <= successes)` has decayed to
/// `target`. The tail is strictly decreasing in the trial count, so the
/// crossing is unique.
fn solve_trials(successes: f64, theta: f64, target: f64) -> f64 {
    let mut lo = successes.max(0.0);
    let mut hi = (successes + 1.0) / theta + 10.0;
    while tail_at_most(successes, hi, theta) > target {
        hi *= 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if tail_at_most(successes, mid, theta) > target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Lanczos approximation of ln Γ(x), g = 7.
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection formula for the small-argument range.
        return PI.ln() - (PI * x).sin().ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, &coeff) in COEFFS.iter().enumerate().skip(1) {
        acc += coeff / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// Continued-fraction expansion of the incomplete beta function, evaluated
/// with the modified Lentz method.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    // Convergence near the distribution mean needs on the order of
    // sqrt(min(a, b)) terms; the cap covers the largest nominal sizes.
    const MAX_ITER: usize = 20_000;
    const EPS: f64 = 3.0e-14;
    const FP_MIN: f64 = 1.0e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FP_MIN {
        d = FP_MIN;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let numerator = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + numerator * d;
        if d.abs() < FP_MIN {
            d = FP_MIN;
        }
        c = 1.0 + numerator / c;
        if c.abs() < FP_MIN {
            c = FP_MIN;
        }
        d = 1.0 / d;
        h *= d * c;

        let numerator = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + numerator * d;
        if d.abs() < FP_MIN {
            d = FP_MIN;
        }
        c = 1.0 + numerator / c;
        if c.abs() < FP_MIN {
            c = FP_MIN;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// The regularized incomplete beta function I_x(a, b).
fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    // The continued fraction converges fast on one side of the mean; use
    // the symmetry I_x(a, b) = 1 - I_{1-x}(b, a) for the other.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}
