//! Word lattice and confusion-network output, built from the set of
//! trellis atoms touched by the N-best search (spec.md §4.5 "optional word
//! lattice or confusion network").
use super::SentenceHypothesis;
use crate::lm::dictionary::WordId;
use crate::trellis::{AtomId, BackTrellis};
use std::collections::HashMap;

/// A lattice arc: one word occurrence shared by one or more N-best paths.
#[derive(Debug, Clone)]
pub struct LatticeArc {
    pub word: WordId,
    pub begin_frame: u32,
    pub end_frame: u32,
    pub score: f32,
}

/// A directed acyclic graph of word arcs, deduplicated by `(word,
/// begin_frame, end_frame)` across every hypothesis in the N-best list
/// (spec.md §4.5 "graph_range" controls how much pass-1 slack is pulled in
/// around each arc — here realized simply as which atoms are visited).
#[derive(Debug, Default)]
pub struct Lattice {
    pub arcs: Vec<LatticeArc>,
}

pub fn build_lattice(nbest: &[SentenceHypothesis], trellis: &BackTrellis) -> Lattice {
    let mut seen: HashMap<(WordId, u32, u32), ()> = HashMap::new();
    let mut arcs = Vec::new();
    for hyp in nbest {
        for &atom_id in &hyp.atoms {
            let atom = trellis.get(atom_id);
            let key = (atom.word, atom.begin_frame, atom.end_frame);
            if seen.insert(key, ()).is_none() {
                arcs.push(LatticeArc {
                    word: atom.word,
                    begin_frame: atom.begin_frame,
                    end_frame: atom.end_frame,
                    score: atom.backscore,
                });
            }
        }
    }
    Lattice { arcs }
}

/// One confusion-network slot: competing word hypotheses with their
/// posterior-like mass (here, N-best occurrence frequency), at a
/// particular span of frames.
#[derive(Debug, Clone)]
pub struct ConfnetSlot {
    pub begin_frame: u32,
    pub end_frame: u32,
    pub candidates: Vec<(WordId, f32)>,
}

#[derive(Debug, Default)]
pub struct ConfusionNetwork {
    pub slots: Vec<ConfnetSlot>,
}

/// Builds a confusion network by aligning the N-best list's arcs into
/// non-overlapping time slots and accumulating per-word mass within each
/// slot. This is the sausage-lattice simplification: no cross-word
/// alignment beyond frame overlap is attempted (spec.md leaves the exact
/// alignment algorithm unspecified beyond "confusion network").
pub fn build_confnet(nbest: &[SentenceHypothesis], trellis: &BackTrellis) -> ConfusionNetwork {
    let lattice = build_lattice(nbest, trellis);
    if lattice.arcs.is_empty() {
        return ConfusionNetwork::default();
    }
    let mut boundaries: Vec<u32> = lattice
        .arcs
        .iter()
        .flat_map(|a| [a.begin_frame, a.end_frame])
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut slots = Vec::new();
    for pair in boundaries.windows(2) {
        let (b, e) = (pair[0], pair[1]);
        let mut mass: HashMap<WordId, f32> = HashMap::new();
        for arc in &lattice.arcs {
            if arc.begin_frame <= b && arc.end_frame >= e {
                *mass.entry(arc.word).or_insert(0.0) += 1.0;
            }
        }
        if mass.is_empty() {
            continue;
        }
        let total: f32 = mass.values().sum();
        let mut candidates: Vec<(WordId, f32)> =
            mass.into_iter().map(|(w, m)| (w, m / total)).collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        slots.push(ConfnetSlot {
            begin_frame: b,
            end_frame: e,
            candidates,
        });
    }
    ConfusionNetwork { slots }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trellis::TrellisAtom;

    fn atom(word: WordId, begin: u32, end: u32) -> TrellisAtom {
        TrellisAtom {
            word,
            begin_frame: begin,
            end_frame: end,
            backscore: -1.0,
            lm_score: -0.1,
            back_atom: None,
        }
    }

    #[test]
    fn lattice_dedups_identical_arcs_across_hypotheses() {
        let mut trellis = BackTrellis::new();
        let a0 = trellis.push(atom(1, 0, 5));
        let nbest = vec![
            SentenceHypothesis {
                words: vec![1],
                atoms: vec![a0],
                score: -1.0,
            },
            SentenceHypothesis {
                words: vec![1],
                atoms: vec![a0],
                score: -1.0,
            },
        ];
        let lattice = build_lattice(&nbest, &trellis);
        assert_eq!(lattice.arcs.len(), 1);
    }

    #[test]
    fn confnet_gives_full_mass_to_sole_candidate() {
        let mut trellis = BackTrellis::new();
        let a0 = trellis.push(atom(7, 0, 5));
        let nbest = vec![SentenceHypothesis {
            words: vec![7],
            atoms: vec![a0],
            score: -1.0,
        }];
        let confnet = build_confnet(&nbest, &trellis);
        assert_eq!(confnet.slots.len(), 1);
        assert_eq!(confnet.slots[0].candidates[0], (7, 1.0));
    }
}
