//! Mel filterbank and DCT used by [`super::FeaturePipeline`] to turn one
//! analysis window into a base MFCC/filterbank/mel-spectrum vector (spec.md
//! §4.7 "compute base features (MFCC or filterbank or mel-spectrum as
//! declared by AM header)").
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Periodic Hamming window, applied in place before the FFT.
pub fn hamming_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f32 / (len - 1) as f32).cos())
        .collect()
}

/// Mel <-> linear frequency conversions (HTK convention).
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// A triangular mel filterbank over FFT bins `0..=fft_len/2`.
pub struct MelFilterbank {
    /// `(start_bin, weights)` per filter, weights aligned to bins
    /// `start_bin..start_bin+weights.len()`.
    filters: Vec<(usize, Vec<f32>)>,
}

impl MelFilterbank {
    pub fn new(num_filters: usize, fft_len: usize, sample_rate: u32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let mel_lo = hz_to_mel(0.0);
        let mel_hi = hz_to_mel(nyquist);
        let mel_points: Vec<f32> = (0..=num_filters + 1)
            .map(|i| mel_lo + (mel_hi - mel_lo) * i as f32 / (num_filters + 1) as f32)
            .collect();
        let bin_of = |hz: f32| -> usize {
            ((fft_len as f32 + 1.0) * hz / sample_rate as f32).floor() as usize
        };
        let bins: Vec<usize> = mel_points.iter().map(|&m| bin_of(mel_to_hz(m))).collect();

        let mut filters = Vec::with_capacity(num_filters);
        for i in 0..num_filters {
            let (lo, center, hi) = (bins[i], bins[i + 1], bins[i + 2]);
            let lo = lo.min(fft_len / 2);
            let hi = hi.min(fft_len / 2);
            let center = center.clamp(lo, hi);
            let mut weights = Vec::with_capacity(hi.saturating_sub(lo) + 1);
            for bin in lo..=hi {
                let w = if bin <= center {
                    if center == lo {
                        1.0
                    } else {
                        (bin - lo) as f32 / (center - lo) as f32
                    }
                } else if hi == center {
                    0.0
                } else {
                    (hi - bin) as f32 / (hi - center) as f32
                };
                weights.push(w);
            }
            filters.push((lo, weights));
        }
        Self { filters }
    }

    pub fn num_filters(&self) -> usize {
        self.filters.len()
    }

    /// Applies the filterbank to a power spectrum (`fft_len/2 + 1` bins),
    /// returning log mel-filter energies.
    pub fn apply(&self, power_spectrum: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|(start, weights)| {
                let energy: f32 = weights
                    .iter()
                    .enumerate()
                    .map(|(i, w)| w * power_spectrum.get(start + i).copied().unwrap_or(0.0))
                    .sum();
                energy.max(1e-10).ln()
            })
            .collect()
    }
}

/// Real-input FFT wrapper producing a power spectrum over one analysis
/// window (saorsa-labs-fae uses `rustfft` for its capture pipeline; the
/// same crate is the natural choice here for a streaming analysis window).
pub struct FftAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    len: usize,
}

impl FftAnalyzer {
    pub fn new(len: usize) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(len);
        Self { fft, len }
    }

    /// `frame` must already be windowed; it is zero-padded to `len` if
    /// shorter. Returns the power spectrum over bins `0..=len/2`.
    pub fn power_spectrum(&self, frame: &[f32]) -> Vec<f32> {
        let mut buf: Vec<Complex32> = frame
            .iter()
            .map(|&x| Complex32::new(x, 0.0))
            .chain(std::iter::repeat(Complex32::new(0.0, 0.0)))
            .take(self.len)
            .collect();
        self.fft.process(&mut buf);
        buf[..=self.len / 2]
            .iter()
            .map(|c| c.norm_sqr())
            .collect()
    }
}

/// Type-II DCT, orthonormalized, truncated to the first `num_coeffs`
/// outputs (spec.md §4.7 "base features ... MFCC"); index 0 is the
/// (unweighted) sum, used as `c0`/log-energy substitute when requested.
pub fn dct2(log_mel_energies: &[f32], num_coeffs: usize) -> Vec<f32> {
    let n = log_mel_energies.len() as f32;
    (0..num_coeffs)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            let sum: f32 = log_mel_energies
                .iter()
                .enumerate()
                .map(|(i, &e)| e * (PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos())
                .sum();
            scale * sum
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_window_endpoints_are_near_zero() {
        let w = hamming_window(256);
        assert!(w[0] < 0.1);
        assert!(w[w.len() - 1] < 0.1);
        assert!(w[128] > 0.9);
    }

    #[test]
    fn mel_round_trip() {
        let hz = 1000.0;
        let back = mel_to_hz(hz_to_mel(hz));
        assert!((back - hz).abs() < 1.0);
    }

    #[test]
    fn filterbank_has_requested_count() {
        let fb = MelFilterbank::new(26, 512, 16_000);
        assert_eq!(fb.num_filters(), 26);
    }

    #[test]
    fn fft_of_dc_signal_concentrates_energy_in_bin_zero() {
        let analyzer = FftAnalyzer::new(64);
        let frame = vec![1.0f32; 64];
        let spec = analyzer.power_spectrum(&frame);
        assert!(spec[0] > spec[1] * 10.0);
    }

    #[test]
    fn dct_preserves_coefficient_count() {
        let out = dct2(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(out.len(), 2);
    }
}
