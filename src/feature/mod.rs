//! Streaming feature pipeline: PCM samples in, acoustic-model-ready feature
//! vectors out, frame by frame (spec.md §4.7 "FEATURE PIPELINE").
pub mod mfcc;

use crate::am::FeatureType;
use crate::config::FeatureConfig;
use crate::error::{EngineError, EngineResult};
use mfcc::{dct2, hamming_window, FftAnalyzer, MelFilterbank};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Running cepstral mean/variance, persisted across utterances so that
/// `map_weight` can blend a new utterance's statistics against history
/// (spec.md §4.7 "CMN/CVN", §7 "CMN update guard").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmnState {
    pub mean: Vec<f32>,
    pub var: Vec<f32>,
    /// Number of utterances folded into `mean`/`var` so far; `0` means no
    /// prior statistics exist and the first utterance's own stats are used
    /// outright regardless of `map_weight` (spec.md Open Question: "CMN
    /// map-weight behavior when the loaded mean is absent").
    pub utterances: u64,
}

impl CmnState {
    pub fn new(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            var: vec![1.0; dim],
            utterances: 0,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| EngineError::Malformed(format!("bad CMN state file: {e}")))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Malformed(format!("cannot serialize CMN state: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Folds one utterance's batch mean/variance into the running estimate
    /// with MAP smoothing weight `tau`: `new = (tau*prior + n*batch) /
    /// (tau+n)`. `tau == 0.0` with no prior utterances reduces to plain
    /// per-utterance normalization.
    fn update(&mut self, batch_mean: &[f32], batch_var: &[f32], n: usize, tau: f32) {
        if self.utterances == 0 && tau == 0.0 {
            self.mean = batch_mean.to_vec();
            self.var = batch_var.to_vec();
        } else {
            let n = n as f32;
            for i in 0..self.mean.len() {
                self.mean[i] = (tau * self.mean[i] + n * batch_mean[i]) / (tau + n);
                self.var[i] = (tau * self.var[i] + n * batch_var[i]) / (tau + n);
            }
        }
        self.utterances += 1;
    }
}

/// One utterance's feature extraction state: sample buffer, delta history,
/// and the grow-only output array the first pass reads from.
pub struct FeaturePipeline {
    config: FeatureConfig,
    feature_type: FeatureType,
    sample_buf: Vec<f32>,
    samples_consumed: usize,
    filterbank: MelFilterbank,
    fft: FftAnalyzer,
    frame_len: usize,
    frame_shift: usize,
    /// Base (pre-delta) feature history, oldest first; trimmed to
    /// `2*delta_window+1` entries as frames complete (spec.md §4.7 "cyclic
    /// buffers whose length equals the delta window").
    base_history: Vec<Vec<f32>>,
    /// Completed output vectors, one per frame, already delta-appended but
    /// not yet CMN/CVN-normalized.
    raw_frames: Vec<Vec<f32>>,
    noise_spectrum: Option<Vec<f32>>,
    noise_frames_seen: usize,
    noise_calc_frames: usize,
}

fn base_dim(feature_type: FeatureType, num_cepstrum: usize, num_filters: usize) -> usize {
    match feature_type {
        FeatureType::Mfcc => num_cepstrum,
        FeatureType::FilterBank | FeatureType::MelSpectrum => num_filters,
    }
}

impl FeaturePipeline {
    pub fn new(config: FeatureConfig, feature_type: FeatureType) -> Self {
        let frame_len = (config.sample_rate as f32 * config.frame_length_ms / 1000.0) as usize;
        let frame_shift = (config.sample_rate as f32 * config.frame_shift_ms / 1000.0) as usize;
        let fft_len = frame_len.next_power_of_two();
        let num_filters = 26usize.max(config.num_cepstrum);
        let filterbank = MelFilterbank::new(num_filters, fft_len, config.sample_rate);
        let fft = FftAnalyzer::new(fft_len);
        let noise_calc_frames =
            ((config.ss_calc_len_ms / config.frame_shift_ms).ceil() as usize).max(1);
        Self {
            feature_type,
            frame_len,
            frame_shift,
            filterbank,
            fft,
            sample_buf: Vec::new(),
            samples_consumed: 0,
            base_history: Vec::new(),
            raw_frames: Vec::new(),
            noise_spectrum: None,
            noise_frames_seen: 0,
            noise_calc_frames,
            config,
        }
    }

    /// Output vector dimensionality, including Δ/ΔΔ/energy.
    pub fn feature_dim(&self) -> usize {
        let base = base_dim(self.feature_type, self.config.num_cepstrum, self.filterbank.num_filters());
        let mut dim = base;
        if self.config.use_delta {
            dim += base;
        }
        if self.config.use_accel {
            dim += base;
        }
        if self.config.use_energy {
            dim += 1;
        }
        dim
    }

    pub fn num_frames(&self) -> usize {
        self.raw_frames.len()
    }

    /// The not-yet-CMN-normalized feature vector for a completed frame.
    pub fn raw_frame(&self, frame: usize) -> Option<&[f32]> {
        self.raw_frames.get(frame).map(|v| v.as_slice())
    }

    /// Normalizes one frame against the current running [`CmnState`], the
    /// same formula `finalize` applies per-frame with its own batch
    /// statistics. The first pass uses this to normalize frames as they
    /// arrive, against the previous utterance's folded statistics, since the
    /// current utterance's own batch mean/variance isn't known until it ends
    /// (spec.md §4.7 "CMN/CVN" — online decoding normalizes against the
    /// running estimate, `finalize` only refines it for next time).
    pub fn normalize_with(&self, raw: &[f32], running: &CmnState) -> Vec<f32> {
        raw.iter()
            .enumerate()
            .map(|(i, &x)| {
                let m = if self.config.cmn { running.mean.get(i).copied().unwrap_or(0.0) } else { 0.0 };
                let v = if self.config.cvn { running.var.get(i).copied().unwrap_or(1.0) } else { 1.0 };
                (x - m) / v.sqrt()
            })
            .collect()
    }

    /// Feeds 16-bit PCM samples, extracting every newly completable analysis
    /// window. Samples are consumed in units of `frame_shift`.
    pub fn push_samples(&mut self, samples: &[i16]) {
        self.sample_buf
            .extend(samples.iter().map(|&s| s as f32 / 32768.0));
        while self.sample_buf.len() - self.samples_consumed >= self.frame_len {
            let start = self.samples_consumed;
            let frame = self.sample_buf[start..start + self.frame_len].to_vec();
            self.samples_consumed += self.frame_shift;
            self.process_frame(&frame);
        }
        // Drop fully-consumed leading samples so the buffer doesn't grow
        // unboundedly across a long utterance.
        if self.samples_consumed > self.frame_len * 4 {
            self.sample_buf.drain(0..self.samples_consumed - self.frame_len);
            self.samples_consumed = self.frame_len;
        }
    }

    fn process_frame(&mut self, raw: &[f32]) {
        let windowed: Vec<f32> = raw
            .iter()
            .zip(hamming_window(raw.len()))
            .map(|(&x, w)| x * w)
            .collect();
        let mut power = self.fft.power_spectrum(&windowed);

        if self.config.spectral_subtraction {
            self.apply_spectral_subtraction(&mut power);
        }

        let log_mel = self.filterbank.apply(&power);
        let energy: f32 = raw.iter().map(|&x| x * x).sum::<f32>().max(1e-10).ln();

        let base = match self.feature_type {
            FeatureType::Mfcc => dct2(&log_mel, self.config.num_cepstrum),
            FeatureType::FilterBank | FeatureType::MelSpectrum => log_mel,
        };

        self.base_history.push(base);
        let window = self.config.delta_window.max(1);
        let keep = 2 * window + 1;
        if self.base_history.len() > keep {
            self.base_history.remove(0);
        }

        // Delta can only be emitted once `window` frames of lookahead exist;
        // emit for the center frame of `base_history` once it is full-length.
        if self.base_history.len() == keep {
            let center = &self.base_history[window];
            let mut out = center.clone();
            if self.config.use_delta {
                out.extend(regression_delta(&self.base_history, window, 1));
            }
            if self.config.use_accel {
                out.extend(regression_delta(&self.base_history, window, 2));
            }
            if self.config.use_energy {
                out.push(energy);
            }
            self.raw_frames.push(out);
        }
    }

    fn apply_spectral_subtraction(&mut self, power: &mut [f32]) {
        if self.noise_frames_seen < self.noise_calc_frames {
            let noise = self.noise_spectrum.get_or_insert_with(|| vec![0.0; power.len()]);
            for (n, &p) in noise.iter_mut().zip(power.iter()) {
                *n += p / self.noise_calc_frames as f32;
            }
            self.noise_frames_seen += 1;
        }
        if let Some(noise) = &self.noise_spectrum {
            for (p, &n) in power.iter_mut().zip(noise) {
                *p = (*p - n).max(1e-10);
            }
        }
    }

    /// Loads a precomputed noise spectrum instead of estimating one from the
    /// first `ss_calc_len_ms` of the utterance.
    pub fn load_noise_spectrum(&mut self, spectrum: Vec<f32>) {
        self.noise_frames_seen = self.noise_calc_frames;
        self.noise_spectrum = Some(spectrum);
    }

    /// Drops frames at and after `frame`, for segmenter rewind (spec.md §5
    /// "Rewind protocol").
    pub fn rewind_to(&mut self, frame: usize) {
        self.raw_frames.truncate(frame);
    }

    /// Mean log-energy across every frame seen so far, for power-based
    /// input rejection (spec.md §7 "RejectPower"). `None` when the feature
    /// vector doesn't carry an energy dimension, or no frame has completed
    /// yet.
    pub fn mean_log_energy(&self) -> Option<f32> {
        if !self.config.use_energy {
            return None;
        }
        let idx = self.raw_frames.first()?.len() - 1;
        let sum: f32 = self.raw_frames.iter().map(|f| f[idx]).sum();
        Some(sum / self.raw_frames.len() as f32)
    }

    /// Finalizes the utterance: computes per-utterance mean/variance, folds
    /// them (MAP-smoothed) into `running`, and returns CMN/CVN-normalized
    /// feature vectors. `running` is left untouched if `status` forbids the
    /// update (spec.md §7 "CMN update guard").
    pub fn finalize(
        &self,
        running: &mut CmnState,
        status_allows_update: bool,
    ) -> Vec<Vec<f32>> {
        if self.raw_frames.is_empty() {
            return Vec::new();
        }
        let dim = self.raw_frames[0].len();
        let n = self.raw_frames.len();
        let mut mean = vec![0.0f32; dim];
        for f in &self.raw_frames {
            for i in 0..dim {
                mean[i] += f[i];
            }
        }
        for m in &mut mean {
            *m /= n as f32;
        }
        let mut var = vec![1.0f32; dim];
        if self.config.cvn {
            var = vec![0.0; dim];
            for f in &self.raw_frames {
                for i in 0..dim {
                    let d = f[i] - mean[i];
                    var[i] += d * d;
                }
            }
            for v in &mut var {
                *v = (*v / n as f32).max(1e-6);
            }
        }

        let zero_mean = vec![0.0; dim];
        let unit_var = vec![1.0; dim];
        let normalize_mean = if self.config.cmn { &mean } else { &zero_mean };
        let normalize_var = if self.config.cvn { &var } else { &unit_var };
        let out: Vec<Vec<f32>> = self
            .raw_frames
            .iter()
            .map(|f| {
                f.iter()
                    .zip(normalize_mean)
                    .zip(normalize_var)
                    .map(|((&x, &m), &v)| (x - m) / v.sqrt())
                    .collect()
            })
            .collect();

        if status_allows_update && (self.config.cmn || self.config.cvn) {
            if running.mean.len() != dim {
                *running = CmnState::new(dim);
            }
            running.update(&mean, &var, n, self.config.map_weight);
        }
        out
    }
}

/// Simple linear-regression delta over a window of `order`-th application
/// (order 1 = Δ computed from `base_history`, order 2 = ΔΔ computed by
/// calling this again over the Δ sequence isn't how HTK does it — instead
/// both are first-order regressions over `base_history`, with ΔΔ using a
/// wider effective window via `step`).
fn regression_delta(history: &[Vec<f32>], window: usize, step: usize) -> Vec<f32> {
    let dim = history[0].len();
    let center = window;
    let denom: f32 = 2.0 * (1..=window).map(|t| (t * t) as f32).sum::<f32>();
    let mut out = vec![0.0f32; dim];
    if denom == 0.0 {
        return out;
    }
    for t in 1..=window {
        let idx_fwd = (center + t * step).min(history.len() - 1);
        let idx_back = (center as isize - (t * step) as isize).max(0) as usize;
        for d in 0..dim {
            out[d] += t as f32 * (history[idx_fwd][d] - history[idx_back][d]);
        }
    }
    for v in &mut out {
        *v /= denom;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FeatureConfig {
        let mut c = FeatureConfig::default();
        c.use_accel = false;
        c
    }

    #[test]
    fn silence_produces_frames_with_expected_dim() {
        let mut pipe = FeaturePipeline::new(cfg(), FeatureType::Mfcc);
        let samples = vec![0i16; 16_000]; // 1 second of silence
        pipe.push_samples(&samples);
        assert!(pipe.num_frames() > 0);
        let mut running = CmnState::new(pipe.feature_dim());
        let out = pipe.finalize(&mut running, true);
        assert_eq!(out[0].len(), pipe.feature_dim());
    }

    #[test]
    fn cmn_disabled_status_does_not_update_running_mean() {
        let mut pipe = FeaturePipeline::new(cfg(), FeatureType::Mfcc);
        pipe.push_samples(&vec![1000i16; 16_000]);
        let mut running = CmnState::new(pipe.feature_dim());
        let before = running.mean.clone();
        let _ = pipe.finalize(&mut running, false);
        assert_eq!(running.mean, before);
    }

    #[test]
    fn rewind_truncates_frames() {
        let mut pipe = FeaturePipeline::new(cfg(), FeatureType::Mfcc);
        pipe.push_samples(&vec![0i16; 16_000]);
        let n = pipe.num_frames();
        assert!(n > 5);
        pipe.rewind_to(5);
        assert_eq!(pipe.num_frames(), 5);
    }

    #[test]
    fn sine_tone_has_nonzero_energy_dimension() {
        let mut pipe = FeaturePipeline::new(cfg(), FeatureType::Mfcc);
        let samples: Vec<i16> = (0..16_000)
            .map(|n| (8000.0 * (2.0 * std::f32::consts::PI * 440.0 * n as f32 / 16_000.0).sin()) as i16)
            .collect();
        pipe.push_samples(&samples);
        let mut running = CmnState::new(pipe.feature_dim());
        let out = pipe.finalize(&mut running, true);
        let energy_idx = pipe.feature_dim() - 1;
        assert!(out.iter().any(|f| f[energy_idx].is_finite()));
    }
}
