// src/rational.rs
//
// Exact rational arithmetic for ImageSize/DPI. Binary floats are only ever
// used as an intermediate when approximating a value to a bounded
// denominator; the fields that round-trip through the cache stay exact.

use num_rational::Rational64;
use num_traits::{One, Zero};

/// Approximation bound from spec.md §3/§9: four significant digits, i.e. a
/// denominator of at most 10000.
pub const MAX_DENOMINATOR: i64 = 10_000;

/// Approximate `value` with a rational whose denominator is `<= MAX_DENOMINATOR`.
///
/// Walks the Stern-Brocot mediant search over the fractional part, tracking
/// whichever candidate seen so far is *closest* to `value` rather than the
/// deepest one reached before the denominator bound -- the walk passes
/// through excellent low-denominator approximations (starting with the
/// surrounding integers) long before it runs out of denominator budget, and
/// those are often better than anything the bound lets it reach later.
pub fn approx(value: f64) -> Rational64 {
    if !value.is_finite() {
        return Rational64::zero();
    }
    let negative = value.is_sign_negative();
    let value = value.abs();

    let whole = value.floor() as i64;
    let frac = value - value.floor();

    let mut best = Rational64::new(whole, 1);
    let mut best_error = (to_f64(best) - value).abs();
    consider_candidate(Rational64::new(whole + 1, 1), value, &mut best, &mut best_error);

    if frac.abs() >= f64::EPSILON {
        let mut lower = (0i64, 1i64);
        let mut upper = (1i64, 0i64);

        loop {
            let mediant_den = lower.1 + upper.1;
            if mediant_den > MAX_DENOMINATOR || mediant_den == 0 {
                break;
            }
            let mediant_num = lower.0 + upper.0;
            let mediant = mediant_num as f64 / mediant_den as f64;
            let candidate = Rational64::new(whole * mediant_den + mediant_num, mediant_den);
            consider_candidate(candidate, value, &mut best, &mut best_error);

            if (mediant - frac).abs() < 1e-12 {
                break;
            } else if mediant < frac {
                lower = (mediant_num, mediant_den);
            } else {
                upper = (mediant_num, mediant_den);
            }
        }
    }

    apply_sign(best, negative)
}

/// Replace `*best` with `candidate` if it is strictly closer to `value`.
fn consider_candidate(candidate: Rational64, value: f64, best: &mut Rational64, best_error: &mut f64) {
    let error = (to_f64(candidate) - value).abs();
    if error < *best_error {
        *best = candidate;
        *best_error = error;
    }
}

fn apply_sign(r: Rational64, negative: bool) -> Rational64 {
    if negative {
        -r
    } else {
        r
    }
}

/// Approximate equality to 1, used by Scaled/Cropped identity shortcuts.
pub fn approx_is_one(r: Rational64) -> bool {
    r == Rational64::one()
}

pub fn to_f64(r: Rational64) -> f64 {
    *r.numer() as f64 / *r.denom() as f64
}
