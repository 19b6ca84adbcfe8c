//! Tree-structured pronunciation lexicon (WCHMM): shares phone-HMM
//! prefixes across words, carries LM-factoring metadata, and resolves
//! cross-word context at word-initial/final nodes (spec.md §3 "Tree
//! lexicon (WCHMM)", §4.1 "Tree Lexicon Builder").
use crate::am::AcousticModel;
use crate::error::{EngineError, EngineResult};
use crate::lm::dictionary::{WordId, WordInfo};
use crate::lm::Lm;
use std::collections::HashMap;

pub type NodeId = u32;

/// How a node's emitting state depends on cross-word context, mirroring
/// spec.md §3's `AS_STATE`/`AS_LSET`/`AS_RSET`/`AS_LRSET`. The node itself
/// always names one *logical* (context-independent) phone; this tag says
/// which adjacent phone(s) the node needs before it can ask
/// [`AcousticModel::resolve_triphone`] for the concrete model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutStyle {
    /// Interior node: both neighbors are fixed by the word's own
    /// pronunciation and were already resolved once at build time.
    State,
    /// Word-initial, not also word-final: needs the predecessor word's
    /// tail phone.
    LSet,
    /// Word-final, not also word-initial: needs the successor word's head
    /// phone.
    RSet,
    /// 1-phone word: needs both (spec.md §4.1 "Multi-path adjustment").
    LRSet,
}

/// A successor-id entry (spec.md GLOSSARY "Scid").
#[derive(Debug, Clone)]
pub enum Successor {
    /// `scid == 0`: this node is mid-subtree with no branch since its
    /// nearest scid-bearing ancestor; factoring score is inherited.
    None,
    /// `scid > 0`: the list of words reachable through this subtree.
    Words(Vec<WordId>),
    /// `scid < 0`: precomputed max unigram log-probability over the
    /// subtree's word list (1-gram factoring, spec.md §4.1).
    Factored(f32),
}

/// One outgoing arc: an HMM self-loop/forward transition within a phone, or
/// the epsilon arc crossing from one phone's exit into the next phone's
/// entry.
#[derive(Debug, Clone, Copy)]
pub struct Arc {
    pub to: NodeId,
    pub log_prob: f32,
}

/// One tree node: exactly one emitting HMM state plus its outgoing arcs.
#[derive(Debug, Clone)]
pub struct LexNode {
    /// Logical (context-independent) center phone name.
    pub phone: String,
    /// Which emitting state of that phone's HMM this node instantiates.
    pub state_in_phone: usize,
    pub out_style: OutStyle,
    pub arcs: Vec<Arc>,
    pub scid: Successor,
    /// `true` once this node was confirmed reachable only from its word's
    /// own prefix (tree invariant checked by the builder).
    word: Option<WordId>,
}

/// The tree-structured lexicon shared across all words of one LM instance.
pub struct Wchmm {
    pub nodes: Vec<LexNode>,
    /// One root per distinct word-initial logical phone.
    pub roots: Vec<NodeId>,
    /// `offset[(word, k)]` = first node of the k-th phone of `word`.
    pub offset: HashMap<(WordId, usize), NodeId>,
    pub wordend: HashMap<WordId, NodeId>,
    /// Reverse map: word-end node -> word. Exactly one entry per node that
    /// terminates a word (spec.md §3 invariant "stend[wordend[w]] == w").
    pub stend: HashMap<NodeId, WordId>,
    /// Factoring score table indexed by `-scid - 1` for `Successor::Factored`
    /// consumers that need to look the value up again later (e.g.
    /// diagnostics); the live score is also inlined into each node.
    pub factor_table: Vec<f32>,
}

impl Wchmm {
    pub fn node(&self, id: NodeId) -> &LexNode {
        &self.nodes[id as usize]
    }

    pub fn word_at_end(&self, node: NodeId) -> Option<WordId> {
        self.stend.get(&node).copied()
    }

    /// Checks the invariants spec.md §8 requires of a built lexicon:
    /// every word's end node maps back to it, and every scid's word list
    /// matches the words actually reachable from that node.
    pub fn check_invariants(&self, dict: &WordInfo) -> EngineResult<()> {
        for w in &dict.words {
            let Some(&end) = self.wordend.get(&w.id) else {
                return Err(EngineError::Malformed(format!(
                    "word {} has no word-end node",
                    w.id
                )));
            };
            if self.stend.get(&end) != Some(&w.id) {
                return Err(EngineError::Malformed(format!(
                    "stend[wordend[{}]] != {}",
                    w.id, w.id
                )));
            }
        }
        for id in 0..self.nodes.len() as NodeId {
            if let Successor::Words(list) = &self.nodes[id as usize].scid {
                let mut reachable = Vec::new();
                self.collect_reachable(id, &mut reachable);
                let mut a = list.clone();
                let mut b = reachable;
                a.sort_unstable();
                b.sort_unstable();
                if a != b {
                    return Err(EngineError::Malformed(
                        "scid word list does not match reachable words".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn collect_reachable(&self, node: NodeId, out: &mut Vec<WordId>) {
        if let Some(w) = self.stend.get(&node) {
            out.push(*w);
        }
        for arc in &self.nodes[node as usize].arcs {
            self.collect_reachable(arc.to, out);
        }
    }
}

/// Builds a [`Wchmm`] from a dictionary and acoustic model.
pub struct WchmmBuilder<'a> {
    dict: &'a WordInfo,
    am: &'a AcousticModel,
    nodes: Vec<LexNode>,
    roots: HashMap<String, NodeId>,
    offset: HashMap<(WordId, usize), NodeId>,
    wordend: HashMap<WordId, NodeId>,
    stend: HashMap<NodeId, WordId>,
}

impl<'a> WchmmBuilder<'a> {
    /// `two_gram_factoring` is accepted for symmetry with
    /// [`Wchmm::build_and_factor`]'s signature but unused here: this
    /// constructor never resolves factoring scores (no LM is available),
    /// so whether factoring is 1-gram or 2-gram doesn't matter yet.
    pub fn new(dict: &'a WordInfo, am: &'a AcousticModel, _two_gram_factoring: bool) -> Self {
        Self {
            dict,
            am,
            nodes: Vec::new(),
            roots: HashMap::new(),
            offset: HashMap::new(),
            wordend: HashMap::new(),
            stend: HashMap::new(),
        }
    }

    fn push_node(&mut self, phone: String, state_in_phone: usize, out_style: OutStyle) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(LexNode {
            phone,
            state_in_phone,
            out_style,
            arcs: Vec::new(),
            scid: Successor::None,
            word: None,
        });
        id
    }

    fn add_arc(&mut self, from: NodeId, to: NodeId, log_prob: f32) {
        self.nodes[from as usize].arcs.push(Arc { to, log_prob });
    }

    /// Expands one phone's HMM states into a node chain starting after
    /// `entry`, returning the chain's node ids in order and the log prob of
    /// the entry->first-state arc (already applied).
    fn expand_phone_states(
        &mut self,
        phone_name: &str,
        out_style: OutStyle,
        entry: Option<NodeId>,
    ) -> EngineResult<Vec<NodeId>> {
        let hmm = self
            .am
            .get(phone_name)
            .ok_or_else(|| EngineError::MissingModel(phone_name.to_string()))?;
        let n = hmm.num_states();
        let mut ids = Vec::with_capacity(n);
        for s in 0..n {
            ids.push(self.push_node(phone_name.to_string(), s, out_style));
        }
        // entry (index 0) -> first emitting state (index 1 in the matrix)
        let trans = &hmm.transitions.matrix;
        if let Some(entry_id) = entry {
            let p = trans[0][1];
            if !crate::logmath::is_log_zero(p) {
                self.add_arc(entry_id, ids[0], p);
            }
        }
        for i in 0..n {
            for j in 0..n {
                let p = trans[i + 1][j + 1];
                if !crate::logmath::is_log_zero(p) {
                    self.add_arc(ids[i], ids[j], p);
                }
            }
        }
        Ok(ids)
    }

    /// Finds (or creates) the root node for word-initial phone `phone`.
    fn root_for(&mut self, phone: &str) -> NodeId {
        if let Some(&id) = self.roots.get(phone) {
            return id;
        }
        // A root is a placeholder epsilon node; its own arcs carry the
        // entry->first-state transition of whichever word actually starts
        // this subtree (added lazily, see `find_or_create_child`).
        let id = self.push_node(phone.to_string(), usize::MAX, OutStyle::State);
        self.roots.insert(phone.to_string(), id);
        id
    }

    /// Builds the whole lexicon for every (non-transparent-only) word in
    /// the dictionary, without resolving 1-gram factoring scores (no LM is
    /// available here). Prefer [`Wchmm::build_and_factor`], which runs this
    /// same construction and then fills in real factoring bounds; this
    /// entry point only exists for callers that just need the tree shape
    /// (e.g. invariant checks over the raw structure).
    pub fn build(mut self) -> EngineResult<Wchmm> {
        for word in self.dict.words.clone() {
            self.insert_word(&word)?;
        }
        let (nodes, roots, offset, wordend, stend) = (
            self.nodes,
            self.roots,
            self.offset,
            self.wordend,
            self.stend,
        );
        let mut wchmm = Wchmm {
            nodes,
            roots: roots.values().copied().collect(),
            offset,
            wordend,
            stend,
            factor_table: Vec::new(),
        };
        assign_scids(&mut wchmm);
        Ok(wchmm)
    }

    fn insert_word(&mut self, word: &crate::lm::dictionary::Word) -> EngineResult<()> {
        let phones = &word.phones;
        let len = phones.len();
        if len == 0 {
            return Err(EngineError::Malformed(format!(
                "word {} has empty pronunciation",
                word.id
            )));
        }

        if len == 1 {
            // 1-phone word: isolated node, AS_LRSET, not shared (spec.md
            // §8 "1-phone words must take both left and right cross-word
            // context at the same node without leaking context to
            // neighbors").
            let ids = self.expand_phone_states(&phones[0], OutStyle::LRSet, None)?;
            let first = ids[0];
            self.offset.insert((word.id, 0), first);
            let last = *ids.last().unwrap();
            self.wordend.insert(word.id, last);
            self.stend.insert(last, word.id);
            // Register under the root table too so downstream-word lookups
            // for "what can start here" still find it, without merging its
            // states into any other word's chain.
            self.roots.entry(format!("__iso_{}", word.id)).or_insert(first);
            return Ok(());
        }

        // Multi-phone word: walk positions, resolving static interior
        // triphones, and reusing a child whose resolved logical identity
        // already matches (true prefix sharing that forks as soon as the
        // resolved context differs, per spec.md §4.1).
        let mut prev_ids: Option<Vec<NodeId>> = None;
        for k in 0..len {
            let is_initial = k == 0;
            let is_final = k == len - 1;
            let style = if is_initial {
                OutStyle::LSet
            } else if is_final {
                OutStyle::RSet
            } else {
                OutStyle::State
            };
            let logical_name = if style == OutStyle::State {
                // Interior node: fully static context, known from this
                // word's own pronunciation.
                let left = phones[k - 1].as_str();
                let right = phones[k + 1].as_str();
                match self.am.resolve_triphone(&phones[k], Some(left), Some(right)) {
                    Ok(hmm) => hmm.name.clone(),
                    Err(_) => phones[k].clone(),
                }
            } else {
                phones[k].clone()
            };

            let entry_ids = if is_initial {
                let root = self.root_for(&phones[k]);
                // children of a root, keyed by logical_name
                self.find_or_create_child(Some(root), &logical_name, style)?
            } else {
                let parent = prev_ids.as_ref().unwrap();
                self.find_or_create_child(Some(*parent.last().unwrap()), &logical_name, style)?
            };

            if is_initial {
                self.offset.insert((word.id, 0), entry_ids[0]);
            }
            if is_final {
                let last = *entry_ids.last().unwrap();
                self.wordend.insert(word.id, last);
                self.stend.insert(last, word.id);
            }
            self.offset.insert((word.id, k), entry_ids[0]);
            prev_ids = Some(entry_ids);
        }
        Ok(())
    }

    /// Looks for an existing child of `parent` whose logical phone matches,
    /// creating a fresh chain of states if none does. `parent == None`
    /// means "this is a root-level lookup" (already resolved to `root`
    /// before calling).
    fn find_or_create_child(
        &mut self,
        parent: Option<NodeId>,
        logical_name: &str,
        style: OutStyle,
    ) -> EngineResult<Vec<NodeId>> {
        let phone_for_expansion = base_phone(logical_name);
        if let Some(parent_id) = parent {
            for arc in self.nodes[parent_id as usize].arcs.clone() {
                if self.nodes[arc.to as usize].phone == logical_name {
                    // Walk the existing chain for this phone to return all
                    // its state ids in order.
                    return Ok(self.chain_from(arc.to, &phone_for_expansion));
                }
            }
            let ids = self.expand_phone_states(&phone_for_expansion, style, None)?;
            // Relabel the head node with the fully resolved logical name so
            // future siblings compare against the resolved identity, not
            // just the bare phone.
            self.nodes[ids[0] as usize].phone = logical_name.to_string();
            let p = self
                .am
                .get(&phone_for_expansion)
                .map(|h| h.transitions.matrix[0][1])
                .unwrap_or(0.0);
            self.add_arc(parent_id, ids[0], p);
            Ok(ids)
        } else {
            let ids = self.expand_phone_states(&phone_for_expansion, style, None)?;
            self.nodes[ids[0] as usize].phone = logical_name.to_string();
            Ok(ids)
        }
    }

    fn chain_from(&self, head: NodeId, phone: &str) -> Vec<NodeId> {
        let n = self.am.get(phone).map(|h| h.num_states()).unwrap_or(1);
        let mut ids = vec![head];
        let mut cur = head;
        while ids.len() < n {
            // Internal chain arcs were added in phone-state order by
            // `expand_phone_states`; the first forward (non-self-loop) arc
            // continues the chain.
            let next = self.nodes[cur as usize]
                .arcs
                .iter()
                .map(|a| a.to)
                .find(|&to| to != cur && to > cur);
            match next {
                Some(to) => {
                    ids.push(to);
                    cur = to;
                }
                None => break,
            }
        }
        ids
    }
}

/// Strips a resolved triphone/biphone name (`"l-center+r"`, `"l-center"`,
/// `"center+r"`) back to the bare logical phone so [`AcousticModel::get`]
/// can be invoked with the resolved identity's own key (the resolved name
/// *is* the AM key already, so this is only needed as a fallback when
/// resolution failed and `logical_name` is the bare phone).
fn base_phone(logical_name: &str) -> String {
    logical_name.to_string()
}

/// Assigns `scid` to every root and to every node whose parent has more
/// than one child (spec.md §4.1 "Factoring metadata"): such a node is
/// where the reachable word set first narrows relative to its parent.
fn assign_scids(wchmm: &mut Wchmm) {
    let mut reachable: HashMap<NodeId, Vec<WordId>> = HashMap::new();
    // Post-order via explicit stack to avoid recursion depth issues on long
    // words.
    fn compute(wchmm: &Wchmm, node: NodeId, memo: &mut HashMap<NodeId, Vec<WordId>>) -> Vec<WordId> {
        if let Some(v) = memo.get(&node) {
            return v.clone();
        }
        let mut acc = Vec::new();
        if let Some(&w) = wchmm.stend.get(&node) {
            acc.push(w);
        }
        for arc in &wchmm.nodes[node as usize].arcs {
            acc.extend(compute(wchmm, arc.to, memo));
        }
        acc.sort_unstable();
        acc.dedup();
        memo.insert(node, acc.clone());
        acc
    }
    for id in 0..wchmm.nodes.len() as NodeId {
        compute(wchmm, id, &mut reachable);
    }

    let roots = wchmm.roots.clone();
    for &root in &roots {
        let list = reachable.get(&root).cloned().unwrap_or_default();
        if !list.is_empty() {
            wchmm.nodes[root as usize].scid = Successor::Words(list);
        }
    }
    for id in 0..wchmm.nodes.len() as NodeId {
        let children: Vec<NodeId> = wchmm.nodes[id as usize].arcs.iter().map(|a| a.to).collect();
        if children.len() > 1 {
            for &c in &children {
                let list = reachable.get(&c).cloned().unwrap_or_default();
                if !list.is_empty() {
                    wchmm.nodes[c as usize].scid = Successor::Words(list);
                }
            }
        }
    }
}

impl Wchmm {
    /// Builds and immediately resolves 1-gram factoring scores against
    /// `lm`, the intended entry point for N-gram-backed engines (grammar
    /// LMs never request 1-gram factoring).
    pub fn build_and_factor<'a>(
        dict: &'a WordInfo,
        am: &'a AcousticModel,
        lm: &dyn Lm,
        two_gram_factoring: bool,
    ) -> EngineResult<Wchmm> {
        let mut builder = WchmmBuilder::new(dict, am, true); // defer factoring
        for word in dict.words.clone() {
            builder.insert_word(&word)?;
        }
        let (nodes, roots, offset, wordend, stend) = (
            builder.nodes,
            builder.roots,
            builder.offset,
            builder.wordend,
            builder.stend,
        );
        let mut wchmm = Wchmm {
            nodes,
            roots: roots.values().copied().collect(),
            offset,
            wordend,
            stend,
            factor_table: Vec::new(),
        };
        assign_scids(&mut wchmm);
        if !two_gram_factoring {
            for node in &mut wchmm.nodes {
                if let Successor::Words(list) = &node.scid {
                    if list.len() >= 2 {
                        let max_uni = list
                            .iter()
                            .map(|&w| lm.unigram(w))
                            .fold(crate::logmath::LOG_ZERO, f32::max);
                        wchmm.factor_table.push(max_uni);
                        node.scid = Successor::Factored(max_uni);
                    }
                }
            }
        }
        Ok(wchmm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::am::{AcousticModel, FeatureType, Gaussian, OutputDistribution, PhoneHmm, Transitions};
    use crate::lm::dictionary::{Word, WordInfo};
    use crate::lm::ngram::Ngram;
    use crate::logmath::LOG_ZERO;
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
    fn builds_wordend_and_stend_consistently() {
        let dict = WordInfo::new(vec![
            word(0, "ONE", &["w", "ah", "n"]),
            word(1, "TWO", &["t", "uw"]),
        ]);
        let am = toy_am(&["w", "ah", "n", "t", "uw"]);
        let wchmm = WchmmBuilder::new(&dict, &am, true).build().unwrap();
        wchmm.check_invariants(&dict).unwrap();
        assert_eq!(wchmm.word_at_end(wchmm.wordend[&0]), Some(0));
        assert_eq!(wchmm.word_at_end(wchmm.wordend[&1]), Some(1));
    }

    #[test]
    fn shared_prefix_words_share_initial_nodes() {
        let dict = WordInfo::new(vec![
            word(0, "CAT", &["k", "ae", "t"]),
            word(1, "CAB", &["k", "ae", "b"]),
        ]);
        let am = toy_am(&["k", "ae", "t", "b", "k-ae+t", "k-ae+b"]);
        let wchmm = WchmmBuilder::new(&dict, &am, true).build().unwrap();
        wchmm.check_invariants(&dict).unwrap();
        // Divergence must have happened by the third phone.
        let off_cat = wchmm.offset[&(0, 0)];
        let off_cab = wchmm.offset[&(1, 0)];
        assert_eq!(off_cat, off_cab, "word-initial /k/ should be shared");
    }

    #[test]
    fn one_phone_word_uses_lrset_style() {
        let dict = WordInfo::new(vec![word(0, "A", &["ah"])]);
        let am = toy_am(&["ah"]);
        let wchmm = WchmmBuilder::new(&dict, &am, true).build().unwrap();
        let end = wchmm.wordend[&0];
        assert_eq!(wchmm.node(end).out_style, OutStyle::LRSet);
    }

    #[test]
    fn one_gram_factoring_replaces_multi_word_scids() {
        let dict = WordInfo::new(vec![
            word(0, "ONE", &["w", "ah", "n"]),
            word(1, "OWE", &["w", "ow"]),
        ]);
        let am = toy_am(&["w", "ah", "n", "ow", "w-ow"]);
        let mut lm = Ngram::default();
        lm.forward.order = 1;
        lm.forward.insert(&[0], -1.0, 0.0);
        lm.forward.insert(&[1], -2.0, 0.0);
        let wchmm = Wchmm::build_and_factor(&dict, &am, &lm, false).unwrap();
        let root = wchmm.roots.iter().find(|&&r| wchmm.node(r).phone == "w").unwrap();
        match &wchmm.node(*root).scid {
            Successor::Factored(score) => assert!((*score - (-1.0)).abs() < 1e-6),
            other => panic!("expected factored scid, got {other:?}"),
        }
    }
}
