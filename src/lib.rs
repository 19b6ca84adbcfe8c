//! Two-pass large-vocabulary continuous-speech recognition engine.
//!
//! [`Engine`] owns the static, load-once resources (acoustic model,
//! dictionary, language model, tree lexicon) and hands out one
//! [`Engine::recognize_utterance`] call per utterance, driving the feature
//! pipeline, first-pass search, segmentation, and second-pass search exactly
//! as described in spec.md §2 ("OVERVIEW") and §5 ("Scheduling").
use std::collections::HashMap;
use std::env;
use tracing::{debug, info, trace};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{Layer, Registry};

pub mod am;
pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod feature;
pub mod lexicon;
pub mod lm;
pub mod logmath;
pub mod pass1;
pub mod pass2;
pub mod segment;
pub mod trellis;

use am::AcousticModel;
use audio::{AudioInput, ReadOutcome};
use config::EngineConfig;
use error::{EngineResult, Status};
use feature::{CmnState, FeaturePipeline};
use lexicon::Wchmm;
use lm::dictionary::{WordId, WordInfo};
use lm::grammar::{CategoryId, GrammarSet};
use lm::ngram::Ngram;
use lm::{GrammarLm, Lm, LmKind};
use pass1::FirstPass;
use pass2::lattice::{build_confnet, build_lattice, ConfusionNetwork, Lattice};
use pass2::SentenceHypothesis;
use segment::{SpSegment, VadSignal};
use trellis::BackTrellis;

/// One utterance's full recognition output: N-best sentences plus whatever
/// optional graph output the configuration requested (spec.md §4.5
/// "RESULTS").
#[derive(Debug, Default)]
pub struct UtteranceResult {
    pub status: Status,
    pub nbest: Vec<SentenceHypothesis>,
    /// Per-word confidence, parallel to each `nbest` entry's `words`.
    pub confidences: Vec<Vec<f32>>,
    pub lattice: Option<Lattice>,
    pub confnet: Option<ConfusionNetwork>,
}

/// Dispatches [`Lm`] calls to whichever concrete model the engine was built
/// with, so the search passes only ever see `&dyn Lm` (spec.md §9 "Model as
/// tagged variants"). Grammar scoring goes through [`GrammarLm`] built
/// fresh from the precomputed word/category map on every call; grammars
/// constrain rather than grade, so this is cheap relative to an n-gram
/// lookup.
#[derive(Clone, Copy)]
enum EngineLm<'a> {
    Ngram(&'a Ngram),
    Grammar {
        grammars: &'a GrammarSet,
        categories: &'a HashMap<WordId, CategoryId>,
    },
}

impl<'a> Lm for EngineLm<'a> {
    fn unigram(&self, word: WordId) -> f32 {
        match *self {
            EngineLm::Ngram(n) => n.unigram(word),
            EngineLm::Grammar { grammars, categories } => {
                let lookup = |w: WordId| categories.get(&w).copied();
                GrammarLm { grammars, word_category: &lookup }.unigram(word)
            }
        }
    }

    fn bigram(&self, context: WordId, word: WordId) -> f32 {
        match *self {
            EngineLm::Ngram(n) => n.bigram(context, word),
            EngineLm::Grammar { grammars, categories } => {
                let lookup = |w: WordId| categories.get(&w).copied();
                GrammarLm { grammars, word_category: &lookup }.bigram(context, word)
            }
        }
    }

    fn full(&self, committed_suffix: &[WordId], word: WordId) -> f32 {
        match *self {
            EngineLm::Ngram(n) => n.full(committed_suffix, word),
            EngineLm::Grammar { grammars, categories } => {
                let lookup = |w: WordId| categories.get(&w).copied();
                GrammarLm { grammars, word_category: &lookup }.full(committed_suffix, word)
            }
        }
    }
}

/// The loaded, ready-to-decode engine: acoustic model, dictionary, language
/// model, and the tree lexicon built from all three (spec.md §3 "Static
/// resources").
pub struct Engine {
    pub config: EngineConfig,
    pub am: AcousticModel,
    pub dict: WordInfo,
    pub wchmm: Wchmm,
    lm: LmKind,
    /// `word -> category` for a [`LmKind::Grammar`] engine; empty otherwise.
    categories: HashMap<WordId, CategoryId>,
    cmn: CmnState,
}

impl Engine {
    /// Builds the tree lexicon against `lm` and resolves 1-gram factoring
    /// (or, for a grammar engine, category admissibility) up front, so every
    /// subsequent [`Engine::recognize_utterance`] call only pays for search.
    pub fn new(config: EngineConfig, am: AcousticModel, dict: WordInfo, lm: LmKind) -> EngineResult<Self> {
        let categories = match &lm {
            LmKind::Grammar(g) => g.word_category_map(),
            LmKind::Ngram(_) => HashMap::new(),
        };
        let wchmm = match &lm {
            LmKind::Ngram(n) => Wchmm::build_and_factor(&dict, &am, n, config.pass1.two_gram_factoring)?,
            LmKind::Grammar(g) => {
                let lookup = |w: WordId| categories.get(&w).copied();
                let grammar_lm = GrammarLm { grammars: g, word_category: &lookup };
                Wchmm::build_and_factor(&dict, &am, &grammar_lm, false)?
            }
        };
        wchmm.check_invariants(&dict)?;
        info!(words = dict.len(), nodes = wchmm.nodes.len(), "tree lexicon built");

        let cmn = match &config.feature.cmn_load {
            Some(path) => CmnState::load(path)?,
            None => {
                let probe = FeaturePipeline::new(config.feature.clone(), am.feature_type);
                CmnState::new(probe.feature_dim())
            }
        };

        Ok(Self {
            config,
            am,
            dict,
            wchmm,
            lm,
            categories,
            cmn,
        })
    }

    fn lm_view(&self) -> EngineLm<'_> {
        match &self.lm {
            LmKind::Ngram(n) => EngineLm::Ngram(n),
            LmKind::Grammar(g) => EngineLm::Grammar {
                grammars: g,
                categories: &self.categories,
            },
        }
    }

    fn pause_word(&self) -> Option<WordId> {
        self.dict.by_surface(&self.config.segment.pause_word).first().copied()
    }

    /// Persists the running CMN/CVN statistics, if configured with a save
    /// path (spec.md §4.7 "cmn_save").
    pub fn save_cmn(&self) -> EngineResult<()> {
        if let Some(path) = &self.config.feature.cmn_save {
            self.cmn.save(path)?;
        }
        Ok(())
    }

    /// Drives one full utterance to completion: reads audio through
    /// `input` until end-of-stream or a segmenter cut, runs the frame
    /// synchronous first pass throughout, then the stack-decoder second
    /// pass over the resulting word trellis (spec.md §2 "OVERVIEW", §4
    /// module-by-module).
    ///
    /// When short-pause segmentation is enabled and fires mid-stream, only
    /// the frames up to the cut point are handed to the second pass; the
    /// caller is expected to call this again with the same `input` to
    /// continue from where the segmenter cut, since `input` itself is not
    /// rewound (only the internal feature/trellis/first-pass state is).
    pub fn recognize_utterance(&mut self, input: &mut dyn AudioInput) -> EngineResult<UtteranceResult> {
        let lm_view = self.lm_view();
        let pause_word = self.pause_word();
        let mut pipeline = FeaturePipeline::new(self.config.feature.clone(), self.am.feature_type);
        let mut trellis = BackTrellis::new();
        let mut first_pass = FirstPass::new(&self.wchmm, &self.am, &lm_view, &self.config.am, self.config.pass1.clone(), pause_word);
        let mut segmenter = SpSegment::new(self.config.segment.clone());

        let chunk_samples = ((self.config.feature.frame_shift_ms / 1000.0) * input.sample_rate() as f32) as usize;
        let chunk_samples = chunk_samples.max(1);
        let mut read_buf = vec![0i16; chunk_samples];
        let mut status = Status::Success;
        let mut segment_cut: Option<u32> = None;

        'stream: loop {
            let outcome = input.read(&mut read_buf)?;
            match outcome {
                ReadOutcome::Read(n) => pipeline.push_samples(&read_buf[..n]),
                ReadOutcome::Eof | ReadOutcome::SegmentRequest => {}
            }

            while (first_pass.frame_index() as usize) < pipeline.num_frames() {
                let frame = first_pass.frame_index();
                let raw = pipeline.raw_frame(frame as usize).expect("frame just became available");
                let feature = pipeline.normalize_with(raw, &self.cmn);
                let signal = first_pass.step(&feature, &mut trellis);
                trace!(frame, active = first_pass.active_node_count(), "first pass step");

                let progout_interval = self.config.pass1.progout_interval;
                if progout_interval > 0 && frame > 0 && frame % progout_interval == 0 {
                    let words = first_pass.progressive_words(&trellis);
                    if !words.is_empty() {
                        let partial: Vec<&str> = words
                            .iter()
                            .filter_map(|&w| self.dict.get(w))
                            .map(|w| w.output.as_str())
                            .collect();
                        info!(frame, partial = %partial.join(" "), "progressive output");
                    }
                }

                if let Some(rewind) = segmenter.step(frame, signal, VadSignal::default()) {
                    let target = rewind.rewind_frame;
                    trellis.rewind_to(target);
                    pipeline.rewind_to(target as usize);
                    // The search state itself (active tokens) isn't rewound
                    // in place; restart it and replay the retained frames
                    // (spec.md §4.6 "Rewind protocol": "the driver replays
                    // the retained frames through the first pass").
                    first_pass = FirstPass::new(&self.wchmm, &self.am, &lm_view, &self.config.am, self.config.pass1.clone(), pause_word);
                    for replay in 0..pipeline.num_frames() {
                        let raw = pipeline.raw_frame(replay).unwrap();
                        let feature = pipeline.normalize_with(raw, &self.cmn);
                        first_pass.step(&feature, &mut trellis);
                    }
                    continue;
                }

                if matches!(segmenter.state(), segment::SegmentState::Segmented) {
                    segment_cut = segmenter.cut_frame();
                    break 'stream;
                }
            }

            if matches!(outcome, ReadOutcome::Eof | ReadOutcome::SegmentRequest) {
                break 'stream;
            }
        }

        if trellis.is_empty() {
            status = Status::RejectSilenceOnly;
        }
        if let Some(max_len) = (self.config.reject.rejectlonglen > 0).then_some(self.config.reject.rejectlonglen) {
            if pipeline.num_frames() as u32 > max_len {
                status = Status::RejectLongInput;
            }
        }
        if self.config.reject.rejectshortlen > 0 && (pipeline.num_frames() as u32) < self.config.reject.rejectshortlen {
            status = Status::RejectShortInput;
        }
        if let Some(threshold) = self.config.reject.power_threshold {
            if pipeline.mean_log_energy().is_some_and(|e| e < threshold) {
                status = Status::RejectPower;
            }
        }

        let nbest = if status.is_reject() {
            Vec::new()
        } else {
            let decoded = pass2::decode(&trellis, &lm_view, &self.config.pass2);
            if decoded.fell_back {
                status = Status::Fallback;
            } else if decoded.sentences.is_empty() {
                status = Status::SearchFail;
            }
            decoded.sentences
        };

        let confidences = pass2::word_confidences(&nbest, &self.config.pass2, &trellis);
        let lattice = self.config.pass2.enable_lattice.then(|| build_lattice(&nbest, &trellis));
        let confnet = self.config.pass2.enable_confnet.then(|| build_confnet(&nbest, &trellis));

        // Discard the normalized frames finalize() returns; the first pass
        // already consumed frames normalized against the running estimate
        // as they streamed in. What matters here is the side effect: this
        // utterance's own batch statistics get folded into `self.cmn` for
        // the *next* utterance (spec.md §7 "CMN update guard").
        let _ = pipeline.finalize(&mut self.cmn, status.allows_cmn_update());

        if let Some(cut) = segment_cut {
            debug!(cut, "utterance segmented on trailing pause");
        }

        Ok(UtteranceResult {
            status,
            nbest,
            confidences,
            lattice,
            confnet,
        })
    }
}

/// Sets up a `tracing` subscriber for the engine and its binaries, honoring
/// `RUST_LOG` when set and otherwise defaulting every crate in this
/// workspace to `info`.
pub fn setup_logging() {
    let filter = match env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_env("RUST_LOG"),
        _ => EnvFilter::new("julius_rs=info,recognize=info,jcontrol=info"),
    };

    let fmt = tracing_subscriber::fmt::Layer::default();
    let subscriber = filter.and_then(fmt).with_subscriber(Registry::default());
    tracing::subscriber::set_global_default(subscriber).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use am::{AcousticModel, FeatureType, Gaussian, OutputDistribution, PhoneHmm, Transitions};
    use lm::dictionary::Word;
    use lm::ngram::Ngram;
    use std::collections::HashMap;

    fn toy_phone(name: &str, am: &mut AcousticModel) {
        let dist = OutputDistribution::Mixture {
            log_weights: vec![0.0],
            gaussians: vec![Gaussian::new(vec![0.0; 4], vec![1.0; 4])],
        };
        am.phones.insert(
            name.to_string(),
            PhoneHmm {
                name: name.to_string(),
                states: vec![dist],
                transitions: Transitions {
                    matrix: vec![
                        vec![f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY],
                        vec![f32::NEG_INFINITY, 0.0, 0.0],
                        vec![f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY],
                    ],
                },
                is_pseudo: false,
            },
        );
    }

    fn toy_am() -> AcousticModel {
        let mut am = AcousticModel {
            feature_dim: 4,
            feature_type: FeatureType::Mfcc,
            inv_var: false,
            phones: HashMap::new(),
            codebooks: Vec::new(),
            short_pause_phone: None,
        };
        toy_phone("hh", &mut am);
        toy_phone("ah", &mut am);
        am
    }

    fn toy_dict() -> WordInfo {
        WordInfo::new(vec![Word {
            id: 0,
            surface: "HA".to_string(),
            output: "HA".to_string(),
            transparent: false,
            phones: vec!["hh".to_string(), "ah".to_string()],
            class_log_prob: None,
            lm_id: None,
        }])
    }

    struct SilentAudio {
        remaining: usize,
    }

    impl AudioInput for SilentAudio {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn read(&mut self, buf: &mut [i16]) -> EngineResult<ReadOutcome> {
            if self.remaining == 0 {
                return Ok(ReadOutcome::Eof);
            }
            let n = buf.len().min(self.remaining);
            for slot in &mut buf[..n] {
                *slot = 0;
            }
            self.remaining -= n;
            Ok(ReadOutcome::Read(n))
        }
    }

    #[test]
    fn recognize_utterance_drives_both_passes_without_panicking() {
        let mut config = EngineConfig::default();
        // Match the toy acoustic model's 4-dimensional Gaussians: disable
        // delta/accel/energy appending and shrink the cepstrum count.
        config.feature.num_cepstrum = 4;
        config.feature.use_delta = false;
        config.feature.use_accel = false;
        config.feature.use_energy = false;
        let am = toy_am();
        let dict = toy_dict();
        let lm = LmKind::Ngram(Ngram::default());
        let mut engine = Engine::new(config, am, dict, lm).unwrap();
        // A short clip: enough frames to let a token reach word end at
        // least once, short enough to keep the test fast.
        let mut audio = SilentAudio { remaining: 1_600 };
        let result = engine.recognize_utterance(&mut audio).unwrap();
        assert!(matches!(
            result.status,
            Status::Success | Status::Fallback | Status::SearchFail | Status::RejectSilenceOnly
        ));
        if result.status == Status::Success || result.status == Status::Fallback {
            assert!(!result.nbest.is_empty());
        }
    }
}
