//! Pronunciation dictionary (spec.md §3 "Dictionary (WordInfo)").
//!
//! Structurally this plays the same role `CmuDictionary` plays in the
//! teacher crate — a dense, id-indexed store built by a line-oriented
//! reader — but the value per entry is a full [`Word`] record (surface
//! form, LM id, transparency, pronunciation) rather than just a phone
//! sequence, since the lexicon builder and LM factoring both need those
//! fields.
use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

pub type WordId = u32;

/// One dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub id: WordId,
    /// The form used for LM lookup / recognition output grouping.
    pub surface: String,
    /// The form emitted in results (may differ, e.g. case or punctuation).
    pub output: String,
    /// Skipped when building LM context (e.g. filler words).
    pub transparent: bool,
    /// Pronunciation: sequence of logical-phone names as referenced by the
    /// acoustic model / tree lexicon.
    pub phones: Vec<String>,
    /// For class N-grams: `log p(word | class)`.
    pub class_log_prob: Option<f32>,
    /// Id used for LM probability lookup, when it differs from `id`
    /// (multiple surface words can map to the same LM entry).
    pub lm_id: Option<WordId>,
}

/// Dense, id-indexed dictionary plus the auxiliary ids the first pass and
/// LM factoring need: head/tail silence words and the longest pronunciation.
#[derive(Debug, Clone, Default)]
pub struct WordInfo {
    pub words: Vec<Word>,
    pub head_silence: Option<WordId>,
    pub tail_silence: Option<WordId>,
    surface_index: HashMap<String, Vec<WordId>>,
}

impl WordInfo {
    pub fn new(words: Vec<Word>) -> Self {
        let mut surface_index: HashMap<String, Vec<WordId>> = HashMap::new();
        for w in &words {
            surface_index.entry(w.surface.clone()).or_default().push(w.id);
        }
        Self {
            words,
            head_silence: None,
            tail_silence: None,
            surface_index,
        }
    }

    pub fn get(&self, id: WordId) -> Option<&Word> {
        self.words.get(id as usize)
    }

    pub fn by_surface(&self, surface: &str) -> &[WordId] {
        self.surface_index
            .get(surface)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn max_word_len(&self) -> usize {
        self.words.iter().map(|w| w.phones.len()).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Reads a flat dictionary: one entry per line, `SURFACE PHONE PHONE
    /// ...`, fields separated by two spaces before the pronunciation as in
    /// CMU-dict-style lexicons. A line may carry `@OUTPUT` after the
    /// surface to override the output form, and a leading `~` marks the
    /// word transparent.
    pub fn read_text<R: Read>(r: R) -> EngineResult<Self> {
        let reader = BufReader::new(r);
        let mut words = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let mut parts = line.splitn(2, "  ");
            let head = parts.next().ok_or_else(|| {
                EngineError::Malformed(format!("dictionary line {lineno}: empty"))
            })?;
            let phones_str = parts.next().ok_or_else(|| {
                EngineError::Malformed(format!("dictionary line {lineno}: missing pronunciation"))
            })?;
            let (transparent, head) = match head.strip_prefix('~') {
                Some(rest) => (true, rest),
                None => (false, head),
            };
            let (surface, output) = match head.split_once('@') {
                Some((s, o)) => (s.to_string(), o.to_string()),
                None => (head.to_string(), head.to_string()),
            };
            let phones: Vec<String> = phones_str
                .split_whitespace()
                .map(|s| s.to_string())
                .collect();
            if phones.is_empty() {
                return Err(EngineError::Malformed(format!(
                    "dictionary line {lineno}: no phones for '{surface}'"
                )));
            }
            words.push(Word {
                id: words.len() as WordId,
                surface,
                output,
                transparent,
                phones,
                class_log_prob: None,
                lm_id: None,
            });
        }
        Ok(Self::new(words))
    }

    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let file = std::fs::File::open(path)?;
        Self::read_text(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_entries() {
        let text = "HELLO  hh eh l ow\nWORLD  w er l d\n";
        let dict = WordInfo::read_text(text.as_bytes()).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get(0).unwrap().surface, "HELLO");
        assert_eq!(dict.get(0).unwrap().phones, vec!["hh", "eh", "l", "ow"]);
    }

    #[test]
    fn transparent_and_output_override() {
        let text = "~<sp>@[SIL]  sp\n";
        let dict = WordInfo::read_text(text.as_bytes()).unwrap();
        let w = dict.get(0).unwrap();
        assert!(w.transparent);
        assert_eq!(w.surface, "<sp>");
        assert_eq!(w.output, "[SIL]");
    }

    #[test]
    fn rejects_missing_pronunciation() {
        let text = "HELLO\n";
        assert!(WordInfo::read_text(text.as_bytes()).is_err());
    }

    #[test]
    fn surface_index_supports_homographs() {
        let text = "LEAD  l iy d\nLEAD  l eh d\n";
        let dict = WordInfo::read_text(text.as_bytes()).unwrap();
        assert_eq!(dict.by_surface("LEAD").len(), 2);
    }
}
