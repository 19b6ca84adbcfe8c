//! Log-domain numerics shared by the acoustic model, language model, and
//! both search passes.
//!
//! All scores in this crate are natural-log probabilities. [`LOG_ZERO`] is
//! the additive identity under `max` (used for "this path doesn't exist")
//! but is not truly `-infinity` so it can still be added to a finite LM
//! score without producing `NaN`.

/// Sentinel standing in for probability zero. Chosen far enough from any
/// real accumulated score that repeated addition of finite LM/AM scores
/// cannot accidentally push it into a plausible range, but finite so
/// arithmetic on it stays well-defined (unlike `f32::NEG_INFINITY`, which
/// would turn `LOG_ZERO + LOG_ZERO` into `NaN`-adjacent territory the
/// moment anything multiplies it).
pub const LOG_ZERO: f32 = -1.0e10;

/// Returns `true` if `score` should be treated as "no path".
#[inline]
pub fn is_log_zero(score: f32) -> bool {
    score <= LOG_ZERO / 2.0
}

/// `log(exp(a) + exp(b))` computed without overflow, used when merging
/// competing posteriors (confidence scoring, confusion networks).
#[inline]
pub fn log_add(a: f32, b: f32) -> f32 {
    if is_log_zero(a) {
        return b;
    }
    if is_log_zero(b) {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Folds `log_add` over an iterator, returning [`LOG_ZERO`] for an empty
/// sequence.
pub fn log_sum<I: IntoIterator<Item = f32>>(scores: I) -> f32 {
    scores.into_iter().fold(LOG_ZERO, log_add)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_zero_is_identity() {
        assert_eq!(log_add(LOG_ZERO, -3.0), -3.0);
        assert_eq!(log_add(-3.0, LOG_ZERO), -3.0);
    }

    #[test]
    fn log_add_matches_direct_computation() {
        let a = -1.0_f32;
        let b = -2.0_f32;
        let expected = ((a.exp() as f64) + (b.exp() as f64)).ln() as f32;
        assert!((log_add(a, b) - expected).abs() < 1e-5);
    }

    #[test]
    fn log_sum_empty_is_log_zero() {
        assert_eq!(log_sum(std::iter::empty()), LOG_ZERO);
    }
}
