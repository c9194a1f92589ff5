//! Prior code lengths used by the MAP selection criterion.

use std::f64::consts::PI;

// constant of the universal prior for natural numbers
const RISSANEN_C0: f64 = 2.865_064;

// exact summation below this, Stirling expansion above
const LN_FACTORIAL_EXACT_MAX: u64 = 128;

/// Code length of a natural number `n >= 1` under the universal prior for
/// natural numbers, in nats.
#[must_use]
pub fn natural_numbers_universal_code_length(n: u64) -> f64 {
    assert!(n >= 1, "universal code is defined for n >= 1");
    let mut code_length = RISSANEN_C0.ln();
    let mut log2_n = (n as f64).ln() / std::f64::consts::LN_2;
    while log2_n > 0.0 {
        code_length += log2_n * std::f64::consts::LN_2;
        log2_n = log2_n.ln() / std::f64::consts::LN_2;
    }
    code_length
}

/// Natural logarithm of `n!`.
#[must_use]
pub fn ln_factorial(n: u64) -> f64 {
    if n < 2 {
        0.0
    } else if n <= LN_FACTORIAL_EXACT_MAX {
        (2..=n).map(|k| (k as f64).ln()).sum()
    } else {
        // Stirling expansion with the 1/(12n) correction
        let x = n as f64;
        x.mul_add(x.ln(), -x) + 0.5 * (2.0 * PI * x).ln() + 1.0 / (12.0 * x)
    }
}
