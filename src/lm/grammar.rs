//! Finite-state word grammar (DFA) language model: states with
//! category-labeled transitions, a terminal map from category to word
//! list, and the derived category-pair/begin/end sets the first pass uses
//! as a static constraint (spec.md §3 "DFA grammar").
use crate::error::{EngineError, EngineResult};
use crate::lm::dictionary::WordId;
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read};

pub type StateId = u32;
pub type CategoryId = i32;

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub input_category: CategoryId,
    pub to: StateId,
    /// This transition may lead to an accepting (utterance-final) state.
    pub accept: bool,
}

/// A single deterministic finite-state grammar, as compiled by the `.dfa`
/// format (spec.md §6 "FA file format").
#[derive(Debug, Clone, Default)]
pub struct Dfa {
    /// `transitions[state]` = outgoing arcs from that state. State 0 is the
    /// initial state, following the FA file convention.
    pub transitions: Vec<Vec<Transition>>,
    /// Category -> word ids realizing that category (terminal info).
    pub terminals: HashMap<CategoryId, Vec<WordId>>,
    /// Whether this category is the designated short-pause category.
    pub short_pause_category: Option<CategoryId>,
}

impl Dfa {
    pub fn num_states(&self) -> usize {
        self.transitions.len()
    }

    /// Category-pair matrix: the set of categories that may legally follow
    /// `from` anywhere in the grammar. Derived once after load, used by the
    /// first pass as a static tree-building constraint (spec.md §4.1
    /// "category_tree = TRUE").
    pub fn category_pairs(&self) -> HashMap<CategoryId, HashSet<CategoryId>> {
        let mut pairs: HashMap<CategoryId, HashSet<CategoryId>> = HashMap::new();
        for arcs in &self.transitions {
            for a in arcs {
                for b in arcs {
                    if a.input_category != b.input_category {
                        pairs.entry(a.input_category).or_default().insert(b.input_category);
                    }
                }
            }
        }
        pairs
    }

    /// Categories that can legally start an utterance (outgoing from state 0).
    pub fn begin_categories(&self) -> HashSet<CategoryId> {
        self.transitions
            .get(0)
            .map(|arcs| arcs.iter().map(|a| a.input_category).collect())
            .unwrap_or_default()
    }

    /// Categories on an arc marked accepting.
    pub fn end_categories(&self) -> HashSet<CategoryId> {
        self.transitions
            .iter()
            .flatten()
            .filter(|a| a.accept)
            .map(|a| a.input_category)
            .collect()
    }

    /// Reads the `.dfa` text format: lines of
    /// `from_state input_id to_state accept_hex start_hex` (5 fields,
    /// `field_count_4` selects the older 4-field compatibility mode that
    /// omits `start_hex`). Category ids are signed: a negative id
    /// `-(index+1)` names a terminal category.
    pub fn read_fa<R: Read>(r: R, field_count_4: bool) -> EngineResult<Self> {
        let reader = BufReader::new(r);
        let mut by_state: HashMap<StateId, Vec<Transition>> = HashMap::new();
        let mut max_state = 0u32;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            let expected = if field_count_4 { 4 } else { 5 };
            if fields.len() != expected {
                return Err(EngineError::Malformed(format!(
                    "fa line {lineno}: expected {expected} fields, got {}",
                    fields.len()
                )));
            }
            let from: StateId = parse_field(fields[0], lineno)?;
            let input_category: CategoryId = parse_field(fields[1], lineno)?;
            let to: StateId = parse_field(fields[2], lineno)?;
            let accept_hex: u32 = u32::from_str_radix(fields[3].trim_start_matches("0x"), 16)
                .map_err(|_| EngineError::Malformed(format!("fa line {lineno}: bad accept hex")))?;
            max_state = max_state.max(from).max(to);
            by_state.entry(from).or_default().push(Transition {
                input_category,
                to,
                accept: accept_hex != 0,
            });
        }
        let mut transitions = vec![Vec::new(); max_state as usize + 1];
        for (state, arcs) in by_state {
            transitions[state as usize] = arcs;
        }
        Ok(Self {
            transitions,
            terminals: HashMap::new(),
            short_pause_category: None,
        })
    }

    /// Attaches terminal word lists: category -> list of word ids, as
    /// produced from a `.dict` file pairing categories to dictionary
    /// entries.
    pub fn set_terminals(&mut self, terminals: HashMap<CategoryId, Vec<WordId>>) {
        self.terminals = terminals;
    }
}

fn parse_field<T: std::str::FromStr>(s: &str, lineno: usize) -> EngineResult<T> {
    s.parse()
        .map_err(|_| EngineError::Malformed(format!("fa line {lineno}: bad field '{s}'")))
}

/// A union of grammars active at once (spec.md §3, "union of deterministic
/// finite-state word grammars"); each can be independently enabled or
/// disabled without rebuilding the others (spec.md §4.1 "rebuilt when a
/// grammar is added/removed/enabled/disabled").
#[derive(Debug, Clone, Default)]
pub struct GrammarSet {
    pub grammars: Vec<(Dfa, bool)>, // (grammar, enabled)
}

impl GrammarSet {
    pub fn add(&mut self, dfa: Dfa) -> usize {
        self.grammars.push((dfa, true));
        self.grammars.len() - 1
    }

    pub fn remove(&mut self, id: usize) -> EngineResult<()> {
        if id >= self.grammars.len() {
            return Err(EngineError::FatalConfig(format!("no grammar with id {id}")));
        }
        self.grammars.remove(id);
        Ok(())
    }

    pub fn set_enabled(&mut self, id: usize, enabled: bool) -> EngineResult<()> {
        self.grammars
            .get_mut(id)
            .ok_or_else(|| EngineError::FatalConfig(format!("no grammar with id {id}")))?
            .1 = enabled;
        Ok(())
    }

    pub fn active(&self) -> impl Iterator<Item = &Dfa> {
        self.grammars.iter().filter(|(_, en)| *en).map(|(g, _)| g)
    }

    /// Inverts every grammar's terminal map into `word -> category`, for
    /// building the `word_category` closure [`crate::lm::GrammarLm`] needs.
    /// A word realizing more than one category (across grammars, or within
    /// one) keeps whichever category is seen last.
    pub fn word_category_map(&self) -> HashMap<WordId, CategoryId> {
        let mut map = HashMap::new();
        for (dfa, _) in &self.grammars {
            for (&category, words) in &dfa.terminals {
                for &word in words {
                    map.insert(word, category);
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_5_field_fa() {
        // state 0 --cat1--> 1 (accepting), state 1 --cat2--> 2
        let text = "0 1 1 0x1 0x0\n1 2 2 0x0 0x0\n";
        let dfa = Dfa::read_fa(text.as_bytes(), false).unwrap();
        assert_eq!(dfa.num_states(), 3);
        assert!(dfa.transitions[0][0].accept);
        assert_eq!(dfa.begin_categories(), [1].into_iter().collect());
    }

    #[test]
    fn four_field_mode_omits_start_hex() {
        let text = "0 1 1 0x1\n";
        let dfa = Dfa::read_fa(text.as_bytes(), true).unwrap();
        assert_eq!(dfa.num_states(), 2);
    }

    #[test]
    fn category_pairs_include_self_loops_between_distinct_categories() {
        let text = "0 1 1 0x0 0x0\n0 2 1 0x0 0x0\n";
        let dfa = Dfa::read_fa(text.as_bytes(), false).unwrap();
        let pairs = dfa.category_pairs();
        assert!(pairs.get(&1).unwrap().contains(&2));
        assert!(pairs.get(&2).unwrap().contains(&1));
    }

    #[test]
    fn rejects_wrong_field_count() {
        let text = "0 1 1\n";
        assert!(Dfa::read_fa(text.as_bytes(), false).is_err());
    }

    #[test]
    fn grammar_set_enable_disable() {
        let mut set = GrammarSet::default();
        let id = set.add(Dfa::default());
        assert_eq!(set.active().count(), 1);
        set.set_enabled(id, false).unwrap();
        assert_eq!(set.active().count(), 0);
    }
}
