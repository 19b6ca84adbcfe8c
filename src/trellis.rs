//! Word trellis (`BackTrellis`): the append-only, per-frame store of
//! word-end events the first pass produces and the second pass searches
//! backwards over (spec.md §4.4 "Word Trellis").
use crate::lm::dictionary::WordId;

pub type AtomId = u32;

/// One word-end event: `word` ended exactly at `end_frame`, having begun at
/// `begin_frame`, reached via `back_atom` (the best predecessor atom, if
/// any — `None` only for an utterance-initial word).
#[derive(Debug, Clone, Copy)]
pub struct TrellisAtom {
    pub word: WordId,
    pub begin_frame: u32,
    pub end_frame: u32,
    /// Accumulated first-pass Viterbi log score up to and including this
    /// word.
    pub backscore: f32,
    /// LM score applied when this word was attached to its predecessor.
    pub lm_score: f32,
    pub back_atom: Option<AtomId>,
}

/// Append-only per-frame store; atoms within a frame are kept sorted by
/// word id so [`BackTrellis::find`] can binary search (spec.md §4.4
/// "binary-searchable by word-id per frame").
#[derive(Debug, Default)]
pub struct BackTrellis {
    atoms: Vec<TrellisAtom>,
    /// `by_frame[t]` = indices into `atoms` for atoms with `end_frame == t`,
    /// sorted by word id.
    by_frame: Vec<Vec<AtomId>>,
}

impl BackTrellis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new atom, returning its id. Callers must supply
    /// non-decreasing `end_frame` across calls (spec.md §7 "Trellis
    /// monotonicity").
    pub fn push(&mut self, atom: TrellisAtom) -> AtomId {
        let id = self.atoms.len() as AtomId;
        let frame = atom.end_frame as usize;
        if self.by_frame.len() <= frame {
            self.by_frame.resize(frame + 1, Vec::new());
        }
        let slot = &mut self.by_frame[frame];
        let pos = slot
            .partition_point(|&existing| self.atoms[existing as usize].word < atom.word);
        slot.insert(pos, id);
        self.atoms.push(atom);
        id
    }

    pub fn get(&self, id: AtomId) -> &TrellisAtom {
        &self.atoms[id as usize]
    }

    /// All atoms ending exactly at `frame`, sorted by word id.
    pub fn atoms_at(&self, frame: u32) -> &[AtomId] {
        self.by_frame
            .get(frame as usize)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn find(&self, word: WordId, frame: u32) -> Option<AtomId> {
        let slot = self.by_frame.get(frame as usize)?;
        let pos = slot
            .binary_search_by_key(&word, |&id| self.atoms[id as usize].word)
            .ok()?;
        Some(slot[pos])
    }

    pub fn last_frame(&self) -> u32 {
        self.by_frame.len().saturating_sub(1) as u32
    }

    /// Truncates the trellis back to (not including) `frame`, for
    /// segmenter rewind (spec.md §5 "Rewind protocol").
    pub fn rewind_to(&mut self, frame: u32) {
        self.by_frame.truncate(frame as usize);
        let keep = self
            .by_frame
            .iter()
            .flatten()
            .map(|&id| id as usize + 1)
            .max()
            .unwrap_or(0);
        self.atoms.truncate(keep);
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(word: WordId, begin: u32, end: u32) -> TrellisAtom {
        TrellisAtom {
            word,
            begin_frame: begin,
            end_frame: end,
            backscore: -1.0,
            lm_score: -0.5,
            back_atom: None,
        }
    }

    #[test]
    fn atoms_at_frame_are_sorted_by_word() {
        let mut t = BackTrellis::new();
        t.push(atom(5, 0, 10));
        t.push(atom(2, 0, 10));
        t.push(atom(8, 0, 10));
        let ids = t.atoms_at(10);
        let words: Vec<WordId> = ids.iter().map(|&id| t.get(id).word).collect();
        assert_eq!(words, vec![2, 5, 8]);
    }

    #[test]
    fn find_locates_exact_word_at_frame() {
        let mut t = BackTrellis::new();
        let id = t.push(atom(3, 0, 4));
        assert_eq!(t.find(3, 4), Some(id));
        assert_eq!(t.find(3, 5), None);
        assert_eq!(t.find(4, 4), None);
    }

    #[test]
    fn rewind_drops_atoms_at_and_after_frame() {
        let mut t = BackTrellis::new();
        t.push(atom(1, 0, 3));
        t.push(atom(2, 3, 7));
        t.rewind_to(5);
        assert!(t.atoms_at(7).is_empty());
        assert_eq!(t.atoms_at(3).len(), 1);
    }
}
