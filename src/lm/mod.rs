//! Language model: a word N-gram or a union of finite-state word grammars,
//! behind one small interface so the tree lexicon and both search passes
//! don't need to match on the kind at every call site (spec.md §9 "Model
//! as tagged variants").
pub mod dictionary;
pub mod grammar;
pub mod ngram;

use crate::logmath::LOG_ZERO;
use dictionary::WordId;
use grammar::GrammarSet;
use ngram::Ngram;

/// Which concrete LM backs a given engine instance.
pub enum LmKind {
    Ngram(Ngram),
    Grammar(GrammarSet),
}

/// Interface the search passes and the lexicon builder use, independent of
/// whether the underlying model is a statistical n-gram or a grammar.
///
/// For a grammar LM, scores are either `0.0` (transition permitted, no
/// additional cost) or [`LOG_ZERO`] (forbidden) — grammars constrain, they
/// don't grade, so "probability" degenerates to admissibility.
pub trait Lm {
    /// `log p(word)`, used for 1-gram factoring.
    fn unigram(&self, word: WordId) -> f32;
    /// `log p(word | context)`, used for first-pass bigram factoring and
    /// inter-word expansion scoring.
    fn bigram(&self, context: WordId, word: WordId) -> f32;
    /// Precise score given the full already-committed suffix, used by the
    /// second pass.
    fn full(&self, committed_suffix: &[WordId], word: WordId) -> f32;
}

impl Lm for Ngram {
    fn unigram(&self, word: WordId) -> f32 {
        Ngram::unigram(self, word)
    }
    fn bigram(&self, context: WordId, word: WordId) -> f32 {
        Ngram::bigram(self, context, word)
    }
    fn full(&self, committed_suffix: &[WordId], word: WordId) -> f32 {
        Ngram::full_order(self, committed_suffix, word)
    }
}

/// Grammar LM categories are attached externally (word -> category map);
/// wrapping here keeps the `Lm` trait symmetric with [`Ngram`] while the
/// lexicon builder is the one place that needs direct [`GrammarSet`] access
/// for category-tree construction.
pub struct GrammarLm<'a> {
    pub grammars: &'a GrammarSet,
    pub word_category: &'a dyn Fn(WordId) -> Option<grammar::CategoryId>,
}

impl<'a> Lm for GrammarLm<'a> {
    fn unigram(&self, _word: WordId) -> f32 {
        0.0
    }

    fn bigram(&self, context: WordId, word: WordId) -> f32 {
        let (Some(c_ctx), Some(c_word)) =
            ((self.word_category)(context), (self.word_category)(word))
        else {
            return LOG_ZERO;
        };
        for dfa in self.grammars.active() {
            if dfa.category_pairs().get(&c_ctx).is_some_and(|s| s.contains(&c_word)) {
                return 0.0;
            }
        }
        LOG_ZERO
    }

    fn full(&self, committed_suffix: &[WordId], word: WordId) -> f32 {
        match committed_suffix.last() {
            Some(&prev) => self.bigram(prev, word),
            None => self.unigram(word),
        }
    }
}

impl LmKind {
    pub fn as_ngram(&self) -> Option<&Ngram> {
        match self {
            LmKind::Ngram(n) => Some(n),
            LmKind::Grammar(_) => None,
        }
    }

    pub fn as_grammar(&self) -> Option<&GrammarSet> {
        match self {
            LmKind::Ngram(_) => None,
            LmKind::Grammar(g) => Some(g),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grammar::Dfa;
    use std::collections::HashMap;

    #[test]
    fn grammar_lm_allows_category_pair_present_in_dfa() {
        let text = "0 1 1 0x0 0x0\n1 2 2 0x1 0x0\n";
        let dfa = Dfa::read_fa(text.as_bytes(), false).unwrap();
        let mut set = GrammarSet::default();
        set.add(dfa);
        // word 10 -> category 1, word 20 -> category 2
        let cats: HashMap<WordId, grammar::CategoryId> = [(10, 1), (20, 2)].into_iter().collect();
        let lookup = move |w: WordId| cats.get(&w).copied();
        let lm = GrammarLm {
            grammars: &set,
            word_category: &lookup,
        };
        assert_eq!(lm.bigram(10, 20), 0.0);
        assert_eq!(lm.bigram(20, 10), LOG_ZERO);
    }
}
