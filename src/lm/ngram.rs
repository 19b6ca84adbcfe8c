//! Word N-gram language model: a forward (LR) table used for first-pass
//! bigram factoring and a backward (RL) table used for precise full-order
//! scoring in the second pass (spec.md §3 "N-gram").
//!
//! "Backward" means the table was estimated over reversed word order, so
//! that the time-reversed second-pass search can look up
//! `p(w | already-committed-suffix)` with a plain forward lookup into this
//! table instead of re-reversing the whole hypothesis on every extension.
use crate::logmath::LOG_ZERO;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

pub type WordId = u32;

/// Unknown-word id, and the context-history recall depth. `<unk>` resolves
/// to this id in both tables so OOV words still get a (flat) LM cost
/// instead of silently vanishing.
pub const UNK: WordId = u32::MAX;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    logprob: f32,
    backoff: f32,
}

/// A single n-gram table (one direction). Keys are stored most-recent-word
/// last: `[w_{t-n+1}, ..., w_t]`.
#[derive(Debug, Clone, Default)]
pub struct NgramTable {
    pub order: usize,
    entries: HashMap<Vec<WordId>, Entry>,
}

impl NgramTable {
    pub fn new(order: usize) -> Self {
        Self {
            order,
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, context_then_word: &[WordId], logprob: f32, backoff: f32) {
        self.entries
            .insert(context_then_word.to_vec(), Entry { logprob, backoff });
    }

    /// Katz-style backoff lookup: exact match if present, otherwise
    /// `backoff(history) + p(word | history[1..])`, recursing until the
    /// unigram is reached.
    pub fn prob(&self, history: &[WordId], word: WordId) -> f32 {
        let mut key: Vec<WordId> = history.to_vec();
        key.push(word);
        if let Some(e) = self.entries.get(&key) {
            return e.logprob;
        }
        if history.is_empty() {
            // Unseen unigram: floor at LOG_ZERO, callers should have an
            // <unk> entry if OOV mass was reserved.
            return LOG_ZERO;
        }
        let bow = self.entries.get(history).map(|e| e.backoff).unwrap_or(0.0);
        bow + self.prob(&history[1..], word)
    }

    /// Reads an ARPA-format n-gram file (`\n-grams:` sections of
    /// `logprob word... [backoff]`, as produced by standard LM toolkits).
    /// `resolve` maps a surface word string to its [`WordId`].
    pub fn read_arpa<R: Read>(r: R, resolve: impl Fn(&str) -> WordId) -> std::io::Result<Self> {
        let reader = BufReader::new(r);
        let mut order = 1usize;
        let mut max_order = 1usize;
        let mut table = NgramTable::new(1);
        let mut in_grams = false;
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed == "\\end\\" {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix('\\') {
                if let Some(n) = rest.strip_suffix("-grams:") {
                    order = n.parse().unwrap_or(1);
                    max_order = max_order.max(order);
                    in_grams = true;
                    continue;
                }
                in_grams = false;
                continue;
            }
            if !in_grams {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() < 1 + order {
                continue;
            }
            let logprob: f32 = fields[0].parse().unwrap_or(LOG_ZERO);
            let words: Vec<WordId> = fields[1..=order].iter().map(|w| resolve(w)).collect();
            let backoff: f32 = fields
                .get(1 + order)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            table.insert(&words, logprob, backoff);
        }
        table.order = max_order;
        Ok(table)
    }
}

/// The full language model: forward table for pass-1 bigram factoring,
/// backward table for pass-2 precise scoring, plus class-membership
/// support.
#[derive(Debug, Clone, Default)]
pub struct Ngram {
    pub forward: NgramTable,
    pub backward: NgramTable,
    pub bos: WordId,
    pub eos: WordId,
    /// `log p(class | history)` table, keyed the same way as an n-gram
    /// table but over class ids; `None` when this is a plain word n-gram.
    pub class_history: Option<NgramTable>,
}

impl Ngram {
    /// `p(word)`, the unigram probability used for 1-gram factoring
    /// (spec.md §4.1 "1-gram factoring").
    pub fn unigram(&self, word: WordId) -> f32 {
        self.forward.prob(&[], word)
    }

    /// `p(word | context)` on the forward table, used for first-pass
    /// bigram factoring and inter-word LM scoring.
    pub fn bigram(&self, context: WordId, word: WordId) -> f32 {
        self.forward.prob(&[context], word)
    }

    /// Full-order backward-table probability, used by the second pass.
    /// `suffix` is the already-committed tail in time order (most recent
    /// word last); since the table was trained in reverse order, looking
    /// `word` up with `suffix` reversed as history gives the correct
    /// forward-time probability.
    pub fn full_order(&self, suffix_committed_so_far: &[WordId], word: WordId) -> f32 {
        let mut history: Vec<WordId> = suffix_committed_so_far.to_vec();
        history.reverse();
        let max_ctx = self.backward.order.saturating_sub(1);
        let start = history.len().saturating_sub(max_ctx);
        self.backward.prob(&history[start..], word)
    }

    /// Loads the forward (`-nlr`-style) and backward (`-nrl`-style) ARPA
    /// files Julius ships as a pair for a word N-gram model: one trained in
    /// natural order for first-pass bigram factoring, one on reversed
    /// corpora for precise second-pass full-order scoring.
    pub fn read_arpa_pair<R: Read>(
        forward: R,
        backward: R,
        resolve: impl Fn(&str) -> WordId + Copy,
    ) -> std::io::Result<Self> {
        Ok(Self {
            forward: NgramTable::read_arpa(forward, resolve)?,
            backward: NgramTable::read_arpa(backward, resolve)?,
            bos: resolve("<s>"),
            eos: resolve("</s>"),
            class_history: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unigram_backoff_to_log_zero_when_unseen() {
        let table = NgramTable::new(1);
        assert_eq!(table.prob(&[], 42), LOG_ZERO);
    }

    #[test]
    fn bigram_uses_exact_entry_when_present() {
        let mut table = NgramTable::new(2);
        table.insert(&[1, 2], -0.5, 0.0);
        assert_eq!(table.prob(&[1], 2), -0.5);
    }

    #[test]
    fn bigram_backs_off_to_unigram() {
        let mut table = NgramTable::new(2);
        table.insert(&[1], -2.0, -0.3); // unigram for word 1, with backoff weight
        table.insert(&[2], -1.0, 0.0); // unigram for word 2
        // no explicit bigram (1,2) -> backoff(1) + p(2)
        let expected = -0.3 + -1.0;
        assert!((table.prob(&[1], 2) - expected).abs() < 1e-6);
    }

    #[test]
    fn arpa_round_trip() {
        let arpa = "\\data\\\nngram 1=2\nngram 2=1\n\n\\1-grams:\n-1.0 <s>\n-2.0 hello\n\n\\2-grams:\n-0.1 <s> hello\n\n\\end\\\n";
        let ids: HashMap<&str, WordId> = [("<s>", 0), ("hello", 1)].into_iter().collect();
        let table = NgramTable::read_arpa(arpa.as_bytes(), |w| *ids.get(w).unwrap_or(&UNK)).unwrap();
        assert_eq!(table.order, 2);
        assert!((table.prob(&[0], 1) - (-0.1)).abs() < 1e-6);
    }

    #[test]
    fn full_order_reverses_history_for_backward_table() {
        let mut backward = NgramTable::new(2);
        // Backward table stores p(word | following-word) since it was
        // trained on reversed sentences: "world hello" bigram (hello, world)
        // as trained-order context->word means context=world, word=hello.
        backward.insert(&[1], -0.2, 0.0); // unigram "hello" in reversed corpus
        backward.insert(&[1, 2], -0.05, 0.0); // p(world | hello) in reversed training == p(hello|world) fwd-time? see doc
        let lm = Ngram {
            forward: NgramTable::new(2),
            backward,
            bos: 0,
            eos: 99,
            class_history: None,
        };
        // committed suffix so far (time order, most recent last) = [2] (word "world")
        // asking for word 1 ("hello") preceding it: history reversed = [2]
        let score = lm.full_order(&[2], 1);
        assert!((score - (-0.05)).abs() < 1e-6);
    }
}
