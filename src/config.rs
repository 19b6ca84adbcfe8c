//! Engine configuration.
//!
//! One `EngineConfig` corresponds to a `.jconf`-style configuration set in
//! the original: a flat-ish, serde-deserializable struct (TOML or JSON) so
//! the many search/segmentation/feature knobs can be checked into a config
//! file rather than threaded through constructors. Field names follow
//! `examples/original_source/libjulius/include/julius/jconf.h` so operators
//! porting a `.jconf` file can map options 1:1.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Gaussian-pruning strategy for the output-probability cache (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GaussianPruning {
    /// Evaluate every mixture component.
    None,
    /// Conservative beam, never prunes a component that could plausibly win.
    Safe,
    #[default]
    /// Score only the top components of a running beam.
    Beam,
    /// Heuristic early-exit once the current max cannot be caught.
    Heuristic,
    /// Component selection left to a user-supplied plugin.
    UserPlugin,
}

/// Cross-word context approximation when the exact triphone is unavailable
/// (spec.md §4.3, "Context-dependency on arcs").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IwcdMethod {
    Avg,
    Max,
    #[default]
    NBest,
}

/// Word-pair approximation mode for first-pass token merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenMerge {
    /// Keep a single best token per node (1-best approximation).
    #[default]
    OneBest,
    /// Keep up to `keep_n` tokens per node, one per distinct predecessor
    /// context word (word-pair approximation).
    WordPair { keep_n: usize },
}

/// Cross-word rescoring strategy at second-pass hypothesis expansion
/// (spec.md §4.5, "Hypothesis extension").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrossWordScan {
    /// Defer the cross-word-context score until the hypothesis is popped.
    Backscan,
    #[default]
    /// Apply the exact cross-word Viterbi rescoring immediately on expansion.
    Nextscan,
}

/// Acoustic model knobs (`jconf.am`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmConfig {
    pub hmmdefs: PathBuf,
    pub hmm_list: Option<PathBuf>,
    pub gprune_method: GaussianPruning,
    /// Number of Gaussian components to evaluate per mixture under `Beam`.
    pub gprune_num: usize,
    /// Context-dependency enabled at all (`ccd_flag`).
    pub ccd_flag: bool,
    /// Use inverted-variance precomputation.
    pub inv_var: bool,
    /// Smaller monophone HMM used for Gaussian-selection backoff, if any.
    pub gms_hmmdefs: Option<PathBuf>,
}

impl Default for AmConfig {
    fn default() -> Self {
        Self {
            hmmdefs: PathBuf::new(),
            hmm_list: None,
            gprune_method: GaussianPruning::default(),
            gprune_num: 8,
            ccd_flag: true,
            inv_var: true,
            gms_hmmdefs: None,
        }
    }
}

/// First-pass search knobs (`jconf.search.pass1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pass1Config {
    /// Rank beam width (`-b`): top-B tokens survive each frame.
    pub beam_width: usize,
    /// Score-envelope width (`-bs`); `None` disables score pruning.
    pub score_envelope: Option<f32>,
    pub token_merge: TokenMerge,
    /// Per-word insertion penalty, added at every word boundary.
    pub word_insertion_penalty: f32,
    pub enable_iwcd: bool,
    pub iwcd_method: IwcdMethod,
    pub iwcd_max_n: usize,
    /// Use precise 2-gram factoring instead of 1-gram factoring.
    pub two_gram_factoring: bool,
    /// Emit progressive (partial) output every `progout_interval` frames;
    /// `0` disables progressive output.
    pub progout_interval: u32,
    pub enable_iwsp: bool,
    pub iwsp_penalty: f32,
}

impl Default for Pass1Config {
    fn default() -> Self {
        Self {
            beam_width: 500,
            score_envelope: None,
            token_merge: TokenMerge::default(),
            word_insertion_penalty: 0.0,
            enable_iwcd: true,
            iwcd_method: IwcdMethod::default(),
            iwcd_max_n: 3,
            two_gram_factoring: false,
            progout_interval: 0,
            enable_iwsp: false,
            iwsp_penalty: 0.0,
        }
    }
}

/// Second-pass search knobs (`jconf.search.pass2`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pass2Config {
    pub nbest: usize,
    pub stack_size: usize,
    pub hypo_overflow: usize,
    pub fallback_pass1_flag: bool,
    pub looktrellis_flag: bool,
    pub lookup_window: u32,
    pub cross_word_scan: CrossWordScan,
    pub enable_lattice: bool,
    pub graph_range: u32,
    pub enable_confnet: bool,
    /// Search-time confidence-scaling factors (`CM_SEARCH` mode); empty
    /// disables search-time CM in favour of N-best CM.
    pub cm_alphas: Vec<f32>,
}

impl Default for Pass2Config {
    fn default() -> Self {
        Self {
            nbest: 1,
            stack_size: 500,
            hypo_overflow: 2000,
            fallback_pass1_flag: true,
            looktrellis_flag: true,
            lookup_window: 10,
            cross_word_scan: CrossWordScan::default(),
            enable_lattice: false,
            graph_range: 0,
            enable_confnet: false,
            cm_alphas: vec![],
        }
    }
}

/// Short-pause / VAD segmentation knobs (`jconf.successive`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub enabled: bool,
    pub pause_word: String,
    pub sp_frame_duration: u32,
    pub sp_margin: u32,
    pub sp_delay: u32,
    pub use_gmm_vad: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pause_word: "<sp>".to_string(),
            sp_frame_duration: 30,
            sp_margin: 20,
            sp_delay: 4,
            use_gmm_vad: false,
        }
    }
}

/// Input-rejection thresholds (`jconf.reject`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectConfig {
    pub rejectshortlen: u32,
    pub rejectlonglen: u32,
    pub power_threshold: Option<f32>,
}

impl Default for RejectConfig {
    fn default() -> Self {
        Self {
            rejectshortlen: 0,
            rejectlonglen: 0,
            power_threshold: None,
        }
    }
}

/// Feature pipeline knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub frame_shift_ms: f32,
    pub frame_length_ms: f32,
    pub num_cepstrum: usize,
    pub use_delta: bool,
    pub use_accel: bool,
    pub use_energy: bool,
    pub delta_window: usize,
    pub cmn: bool,
    pub cvn: bool,
    /// MAP-smoothing weight for running CMN mean, `0.0` disables smoothing.
    pub map_weight: f32,
    pub cmn_load: Option<PathBuf>,
    pub cmn_save: Option<PathBuf>,
    pub spectral_subtraction: bool,
    pub ss_calc_len_ms: f32,
    pub ss_noise_spectrum: Option<PathBuf>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_shift_ms: 10.0,
            frame_length_ms: 25.0,
            num_cepstrum: 12,
            use_delta: true,
            use_accel: true,
            use_energy: true,
            delta_window: 2,
            cmn: true,
            cvn: false,
            map_weight: 0.0,
            cmn_load: None,
            cmn_save: None,
            spectral_subtraction: false,
            ss_calc_len_ms: 300.0,
            ss_noise_spectrum: None,
        }
    }
}

/// Top-level engine configuration, the union of every sub-config above.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub am: AmConfig,
    pub pass1: Pass1Config,
    pub pass2: Pass2Config,
    pub segment: SegmentConfig,
    pub reject: RejectConfig,
    pub feature: FeatureConfig,
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    pub fn load_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Loads configuration from a JSON file.
    pub fn load_json(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = EngineConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(cfg.pass1.beam_width, back.pass1.beam_width);
        assert_eq!(cfg.segment.sp_frame_duration, back.segment.sp_frame_duration);
    }

    #[test]
    fn cm_alphas_empty_by_default() {
        assert!(Pass2Config::default().cm_alphas.is_empty());
    }
}
