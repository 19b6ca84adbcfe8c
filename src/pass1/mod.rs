//! First pass (FSBeam): frame-synchronous, rank-pruned, word-pair- or
//! 1-best-approximated Viterbi token passing over the tree lexicon,
//! emitting word-end atoms into the [`crate::trellis::BackTrellis`] (spec.md
//! §4.3 "First Pass (FSBeam)"). Grounded on `libjulius/src/realtime-1stpass.c`
//! and the scid dispatch in `libjulius/src/factoring_sub.c`.
use crate::am::outprob::OutputProbCache;
use crate::am::AcousticModel;
use crate::config::{AmConfig, Pass1Config, TokenMerge};
use crate::lexicon::{LexNode, NodeId, OutStyle, Successor, Wchmm};
use crate::lm::dictionary::WordId;
use crate::lm::Lm;
use crate::logmath::{is_log_zero, LOG_ZERO};
use crate::trellis::{AtomId, BackTrellis};
use std::collections::HashMap;
use tracing::trace;

/// A surviving partial Viterbi path endpoint at one lexicon node.
#[derive(Debug, Clone)]
struct Token {
    score: f32,
    /// The last fully-resolved word id on this path, used as LM context;
    /// `None` only at the very start of the utterance.
    context: Option<WordId>,
    begin_frame: u32,
    /// LM score applied for `context`, carried so a trellis atom emitted at
    /// a word boundary can record the precise per-word LM contribution.
    last_lm_score: f32,
    last_atom: Option<AtomId>,
    /// Bare phone most recently exited, used as the fixed side of a
    /// cross-word context query at the next `LSet`/`RSet`/`LRSet` node
    /// (spec.md §3 "AS_LSET/AS_RSET/AS_LRSET"). Carried unchanged while
    /// mid-phone; updated whenever an arc crosses into a new phone's
    /// chain, including the word boundary (where it becomes the ending
    /// word's own tail phone, recorded at that word's word-end handling,
    /// not derived from the shared tree-root placeholder).
    left_ctx: Option<String>,
}

/// Per-frame best word-end signal the segmenter reads (spec.md §5
/// "Signal").
#[derive(Debug, Clone, Copy)]
pub struct FrameSignal {
    pub best_atom: Option<AtomId>,
    pub is_pause_word: bool,
    pub frame_max_score: f32,
}

pub struct FirstPass<'a> {
    wchmm: &'a Wchmm,
    am: &'a AcousticModel,
    lm: &'a dyn Lm,
    config: Pass1Config,
    outprob: OutputProbCache,
    active: HashMap<NodeId, Vec<Token>>,
    /// Tokens currently parked in the inter-word short-pause self-loop,
    /// not tied to any lexicon node (spec.md §4.3 "self-loop pause
    /// transition at the boundary"). Empty unless `config.enable_iwsp`.
    pause_active: Vec<Token>,
    frame: u32,
    pause_word: Option<WordId>,
}

impl<'a> FirstPass<'a> {
    pub fn new(
        wchmm: &'a Wchmm,
        am: &'a AcousticModel,
        lm: &'a dyn Lm,
        am_config: &AmConfig,
        config: Pass1Config,
        pause_word: Option<WordId>,
    ) -> Self {
        let mut active = HashMap::new();
        for &root in &wchmm.roots {
            active.entry(root).or_insert_with(Vec::new).push(Token {
                score: 0.0,
                context: None,
                begin_frame: 0,
                last_lm_score: 0.0,
                last_atom: None,
                left_ctx: None,
            });
        }
        Self {
            wchmm,
            am,
            lm,
            outprob: OutputProbCache::new(am_config.gprune_method, am_config.gprune_num),
            config,
            active,
            pause_active: Vec::new(),
            frame: 0,
            pause_word,
        }
    }

    pub fn frame_index(&self) -> u32 {
        self.frame
    }

    /// Advances the search by exactly one frame, expanding tokens along
    /// tree arcs, applying LM factoring and output probabilities, pruning,
    /// and emitting any word-end trellis atoms (spec.md §4.3 "Token
    /// lifecycle per frame").
    pub fn step(&mut self, feature: &[f32], trellis: &mut BackTrellis) -> FrameSignal {
        let mut candidates: HashMap<NodeId, Vec<Token>> = HashMap::new();

        for (&node_id, tokens) in self.active.iter() {
            let node = self.wchmm.node(node_id);
            for arc in &node.arcs {
                for tok in tokens {
                    let mut score = tok.score + arc.log_prob;
                    if is_log_zero(score) {
                        continue;
                    }
                    let to_node = self.wchmm.node(arc.to);
                    let (lm_add, new_context, lm_score_for_atom) =
                        factor_score(&to_node.scid, tok.context, self.lm);
                    score += lm_add;

                    let new_left_ctx = next_left_ctx(node, to_node, tok.left_ctx.as_deref());

                    // Only emitting nodes (state_in_phone != usize::MAX,
                    // i.e. not a bare root placeholder) consume this
                    // frame's acoustic observation.
                    if to_node.state_in_phone != usize::MAX {
                        let op = self.output_prob(to_node, arc.to, new_left_ctx.as_deref(), feature);
                        score += op;
                    }

                    if self.wchmm.word_at_end(arc.to).is_some() {
                        score += self.config.word_insertion_penalty;
                    }

                    candidates.entry(arc.to).or_default().push(Token {
                        score,
                        context: new_context,
                        begin_frame: tok.begin_frame,
                        last_lm_score: lm_score_for_atom.unwrap_or(tok.last_lm_score),
                        last_atom: tok.last_atom,
                        left_ctx: new_left_ctx,
                    });
                }
            }
        }

        merge_candidates(&mut candidates, &self.config);

        let mut signal = FrameSignal {
            best_atom: None,
            is_pause_word: false,
            frame_max_score: LOG_ZERO,
        };

        // Word-end handling: emit trellis atoms, then reseed tree roots for
        // inter-word expansion (spec.md §4.3 "Inter-word expansion").
        let mut word_end_survivors: Vec<(NodeId, Token, WordId)> = Vec::new();
        for (&node_id, toks) in candidates.iter() {
            if let Some(w) = self.wchmm.word_at_end(node_id) {
                for tok in toks {
                    word_end_survivors.push((node_id, tok.clone(), w));
                }
            }
        }

        let mut best_score = LOG_ZERO;
        let mut best_atom = None;
        let mut best_is_pause = false;
        for (node_id, tok, w) in &word_end_survivors {
            let tail_phone = bare_center(&self.wchmm.node(*node_id).phone).to_string();
            let atom = crate::trellis::TrellisAtom {
                word: *w,
                begin_frame: tok.begin_frame,
                end_frame: self.frame,
                backscore: tok.score,
                lm_score: tok.last_lm_score,
                back_atom: tok.last_atom,
            };
            let id = trellis.push(atom);
            if tok.score > best_score {
                best_score = tok.score;
                best_atom = Some(id);
                best_is_pause = Some(*w) == self.pause_word;
            }
            for &root in &self.wchmm.roots {
                let seeded = Token {
                    score: tok.score,
                    context: Some(*w),
                    begin_frame: self.frame + 1,
                    last_lm_score: tok.last_lm_score,
                    last_atom: Some(id),
                    left_ctx: Some(tail_phone.clone()),
                };
                candidates.entry(root).or_default().push(seeded);
            }
            if self.config.enable_iwsp {
                self.pause_active.push(Token {
                    score: tok.score,
                    context: Some(*w),
                    begin_frame: self.frame + 1,
                    last_lm_score: tok.last_lm_score,
                    last_atom: Some(id),
                    left_ctx: Some(tail_phone),
                });
            }
        }
        if let Some(id) = best_atom {
            signal.best_atom = Some(id);
            signal.is_pause_word = best_is_pause;
        }

        self.step_pause_active(feature, &mut candidates);

        merge_candidates(&mut candidates, &self.config);
        prune(&mut candidates, &self.config);

        signal.frame_max_score = candidates
            .values()
            .flatten()
            .map(|t| t.score)
            .fold(LOG_ZERO, f32::max);

        trace!(frame = self.frame, active_nodes = candidates.len(), "pass1 step");
        self.active = candidates;
        self.frame += 1;
        signal
    }

    /// Advances every token parked in the short-pause self-loop by one
    /// frame: each either stays in the loop (arbitrary-length silence) or
    /// exits straight into the tree roots, silently, without ever
    /// producing a trellis atom of its own (spec.md §8 "self-loop-only
    /// pause word ... must survive any duration without producing
    /// spurious word-ends beyond the one per continuous pause span").
    fn step_pause_active(&mut self, feature: &[f32], candidates: &mut HashMap<NodeId, Vec<Token>>) {
        if !self.config.enable_iwsp {
            self.pause_active.clear();
            return;
        }
        if self.pause_active.is_empty() {
            return;
        }
        let Some((dist, self_loop, exit)) = self.sp_model() else {
            self.pause_active.clear();
            return;
        };
        let op = self.am.log_density(&dist, feature);
        let mut still_looping = Vec::new();
        for tok in self.pause_active.drain(..) {
            let looped = tok.score + self_loop + op;
            let exited = tok.score + exit + op;
            if !is_log_zero(exited) {
                for &root in &self.wchmm.roots {
                    candidates.entry(root).or_default().push(Token {
                        score: exited,
                        begin_frame: self.frame + 1,
                        ..tok.clone()
                    });
                }
            }
            if !is_log_zero(looped) {
                still_looping.push(Token { score: looped, ..tok });
            }
        }
        merge_tokens(&mut still_looping, &self.config);
        self.pause_active = still_looping;
    }

    /// The inter-word short-pause phone's output distribution plus its
    /// self-loop and exit log-probabilities, or `None` if the acoustic
    /// model doesn't declare one.
    fn sp_model(&self) -> Option<(crate::am::OutputDistribution, f32, f32)> {
        let phone = self.am.short_pause_phone.as_deref()?;
        let hmm = self.am.get(phone)?;
        let dist = hmm.states.first()?.clone();
        let self_loop = hmm
            .transitions
            .matrix
            .get(1)
            .and_then(|row| row.get(1))
            .copied()
            .unwrap_or(0.0);
        Some((dist, self_loop, self.config.iwsp_penalty))
    }

    /// Output log-probability for entering `to_node`'s state, resolving
    /// cross-word context when the node's style demands it (spec.md §4.1
    /// "Context-dependency on arcs").
    fn output_prob(&mut self, to_node: &LexNode, state_id: NodeId, left_ctx: Option<&str>, feature: &[f32]) -> f32 {
        if to_node.out_style == OutStyle::State || !self.config.enable_iwcd {
            return self
                .outprob
                .get_or_compute(self.am, state_id, self.frame, &dist_for(self.am, to_node), feature);
        }
        // Right context (the as-yet-unchosen neighboring word) is always
        // approximated here; left is exact whenever the path already knows
        // it (not the very first word of the utterance).
        self.am.context_variant_density(
            &to_node.phone,
            to_node.state_in_phone,
            left_ctx,
            None,
            self.config.iwcd_method,
            self.config.iwcd_max_n,
            feature,
        )
    }

    /// Current number of active nodes, a rough proxy for search breadth.
    pub fn active_node_count(&self) -> usize {
        self.active.len()
    }

    /// The word sequence reachable from the current frame's best-scoring
    /// active token, for progressive (partial) output (spec.md §4.3
    /// "Progressive output"): walks `last_atom` back-pointers through
    /// `trellis`. The word still in progress under the best token (not yet
    /// word-ended) isn't included, only what's already committed.
    pub fn progressive_words(&self, trellis: &BackTrellis) -> Vec<WordId> {
        let best = self
            .active
            .values()
            .flatten()
            .max_by(|a, b| a.score.total_cmp(&b.score));
        let Some(tok) = best else {
            return Vec::new();
        };
        let mut words = Vec::new();
        let mut cur = tok.last_atom;
        while let Some(id) = cur {
            let atom = trellis.get(id);
            words.push(atom.word);
            cur = atom.back_atom;
        }
        words.reverse();
        words
    }

    /// Invalidates cached output probabilities from `frame` onward, for
    /// segmenter rewind (spec.md §5 "Rewind protocol").
    pub fn invalidate_from(&mut self, frame: u32) {
        self.outprob.invalidate_from(frame);
    }
}

fn dist_for<'a>(am: &'a AcousticModel, node: &LexNode) -> crate::am::OutputDistribution {
    // Interior (`State`) nodes already name the exact resolved phone; other
    // styles name the plain phone and rely on cross-word context being
    // resolved separately by `FirstPass::output_prob` when IWCD is enabled.
    am.get(&node.phone)
        .and_then(|hmm| hmm.states.get(node.state_in_phone))
        .cloned()
        .unwrap_or(crate::am::OutputDistribution::Mixture {
            log_weights: vec![0.0],
            gaussians: vec![crate::am::Gaussian::new(vec![0.0], vec![1.0])],
        })
}

/// Strips a resolved context name down to its bare center phone (`"ah"`
/// from `"k-ah+t"`, `"k-ah"`, or `"ah+t"`).
fn bare_center(name: &str) -> &str {
    let rest = name.split_once('-').map(|(_, r)| r).unwrap_or(name);
    rest.split_once('+').map(|(c, _)| c).unwrap_or(rest)
}

/// What a token's cross-word left-context should read as once it crosses
/// `from` into `to`. Unchanged within the same phone's state chain;
/// updated to the phone just exited whenever the arc enters a new phone's
/// chain. `from` being a root placeholder (`state_in_phone == usize::MAX`)
/// is a special case: its `phone` field is just the word-initial phone it
/// was created for, not a genuine predecessor — the real predecessor there
/// was already recorded on the token when it was seeded at the previous
/// word's end, so it's passed through unchanged.
fn next_left_ctx(from: &LexNode, to: &LexNode, carried: Option<&str>) -> Option<String> {
    if from.state_in_phone == usize::MAX || from.phone == to.phone {
        return carried.map(str::to_string);
    }
    Some(bare_center(&from.phone).to_string())
}

/// Applies the scid-driven LM factoring rule for a node being entered,
/// returning `(score_to_add, new_context, precise_lm_score_if_resolved)`
/// (spec.md §4.1 "LM factoring").
fn factor_score(
    scid: &Successor,
    context: Option<WordId>,
    lm: &dyn Lm,
) -> (f32, Option<WordId>, Option<f32>) {
    match scid {
        Successor::None => (0.0, context, None),
        Successor::Factored(bound) => (*bound, context, None),
        Successor::Words(list) if list.len() == 1 => {
            let w = list[0];
            let score = match context {
                Some(c) => lm.bigram(c, w),
                None => lm.unigram(w),
            };
            (score, Some(w), Some(score))
        }
        Successor::Words(list) => {
            let score = list
                .iter()
                .map(|&w| match context {
                    Some(c) => lm.bigram(c, w),
                    None => lm.unigram(w),
                })
                .fold(LOG_ZERO, f32::max);
            (score, context, None)
        }
    }
}

/// Collapses multiple tokens destined for the same node: 1-best keeps the
/// single max-scoring token; word-pair approximation keeps (up to
/// `keep_n`) the max-scoring token per distinct predecessor context word
/// (spec.md §4.3 "word-pair approximation").
fn merge_candidates(candidates: &mut HashMap<NodeId, Vec<Token>>, config: &Pass1Config) {
    for toks in candidates.values_mut() {
        merge_tokens(toks, config);
    }
}

/// The per-node collapse rule `merge_candidates` applies to every active
/// node, factored out so the short-pause pool (which lives outside the
/// lexicon tree and so isn't reachable from `candidates`) can reuse it.
fn merge_tokens(toks: &mut Vec<Token>, config: &Pass1Config) {
    match config.token_merge {
        TokenMerge::OneBest => {
            if let Some(best) = toks
                .iter()
                .cloned()
                .max_by(|a, b| a.score.total_cmp(&b.score))
            {
                *toks = vec![best];
            }
        }
        TokenMerge::WordPair { keep_n } => {
            let mut by_context: HashMap<Option<WordId>, Token> = HashMap::new();
            for tok in toks.iter().cloned() {
                by_context
                    .entry(tok.context)
                    .and_modify(|best| {
                        if tok.score > best.score {
                            *best = tok.clone();
                        }
                    })
                    .or_insert(tok);
            }
            let mut merged: Vec<Token> = by_context.into_values().collect();
            merged.sort_by(|a, b| b.score.total_cmp(&a.score));
            merged.truncate(keep_n.max(1));
            *toks = merged;
        }
    }
}

/// Rank-beam and score-envelope pruning across the whole frame (spec.md
/// §4.3 "Rank-sort surviving tokens ... keep the top B").
fn prune(candidates: &mut HashMap<NodeId, Vec<Token>>, config: &Pass1Config) {
    let mut flat: Vec<(NodeId, usize, f32)> = Vec::new();
    for (&node, toks) in candidates.iter() {
        for (i, t) in toks.iter().enumerate() {
            flat.push((node, i, t.score));
        }
    }
    if flat.is_empty() {
        return;
    }
    flat.sort_by(|a, b| b.2.total_cmp(&a.2));
    let max_score = flat[0].2;
    let cutoff = config
        .score_envelope
        .map(|delta| max_score - delta)
        .unwrap_or(LOG_ZERO);
    let beam = config.beam_width.max(1);

    let mut survive: HashMap<NodeId, Vec<bool>> = HashMap::new();
    for (node, toks) in candidates.iter() {
        survive.insert(*node, vec![false; toks.len()]);
    }
    for &(node, idx, score) in flat.iter().take(beam) {
        if score >= cutoff {
            survive.get_mut(&node).unwrap()[idx] = true;
        }
    }

    candidates.retain(|node, toks| {
        let keep = &survive[node];
        let mut i = 0;
        toks.retain(|_| {
            let k = keep[i];
            i += 1;
            k
        });
        !toks.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::am::{FeatureType, Gaussian, OutputDistribution, PhoneHmm, Transitions};
    use crate::config::Pass1Config;
    use crate::lm::dictionary::{Word, WordInfo};
    use crate::lm::ngram::Ngram;
    use std::collections::HashMap as StdHashMap;

    fn mono(name: &str) -> PhoneHmm {
        let dist = OutputDistribution::Mixture {
            log_weights: vec![0.0],
            gaussians: vec![Gaussian::new(vec![0.0], vec![1.0])],
        };
        PhoneHmm {
            name: name.to_string(),
            transitions: Transitions {
                matrix: vec![
                    vec![LOG_ZERO, 0.0, LOG_ZERO],
                    vec![LOG_ZERO, -0.1, -1.0],
                    vec![LOG_ZERO, LOG_ZERO, LOG_ZERO],
                ],
            },
            states: vec![dist],
            is_pseudo: false,
        }
    }

    fn toy_am(names: &[&str]) -> AcousticModel {
        let mut phones = StdHashMap::new();
        for n in names {
            phones.insert(n.to_string(), mono(n));
        }
        AcousticModel {
            feature_dim: 1,
            feature_type: FeatureType::Mfcc,
            inv_var: false,
            phones,
            codebooks: vec![],
            short_pause_phone: None,
        }
    }

    fn word(id: WordId, surface: &str, phones: &[&str]) -> Word {
        Word {
            id,
            surface: surface.to_string(),
            output: surface.to_string(),
            transparent: false,
            phones: phones.iter().map(|s| s.to_string()).collect(),
            class_log_prob: None,
            lm_id: None,
        }
    }

    #[test]
    fn single_word_utterance_emits_one_trellis_atom_per_pass() {
        let dict = WordInfo::new(vec![word(0, "HI", &["hh", "ay"])]);
        let am = toy_am(&["hh", "ay"]);
        let lm = Ngram::default();
        let wchmm = Wchmm::build_and_factor(&dict, &am, &lm, true).unwrap();
        let am_config = AmConfig::default();
        let mut pass1 = FirstPass::new(&wchmm, &am, &lm, &am_config, Pass1Config::default(), None);
        let mut trellis = BackTrellis::new();
        for _ in 0..4 {
            pass1.step(&[0.0], &mut trellis);
        }
        assert!(!trellis.is_empty());
    }
}
