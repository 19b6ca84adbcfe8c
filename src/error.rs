//! Error and per-utterance status types.
//!
//! Fatal conditions (`EngineError`) unwind to the top of the driver loop and
//! are reported through this type rather than a global flag or `panic!`.
//! Runtime conditions that do not abort the engine (missing triphones,
//! device hiccups, search overflow, rejected utterances) are folded into
//! [`Status`] and attached to the per-utterance result instead.
use thiserror::Error;

/// Fatal or propagating error conditions, corresponding to spec.md §7's
/// `FATAL_*` and `RECOVERABLE_*` kinds that are surfaced as `Err` rather
/// than folded into a per-utterance [`Status`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Acoustic model and feature pipeline disagree on feature type, or a
    /// mandatory file is missing/unreadable.
    #[error("configuration error: {0}")]
    FatalConfig(String),

    /// Allocation failure during startup or pool growth. In safe Rust this
    /// almost never triggers directly; it is retained so pool-growth call
    /// sites have somewhere to report exhaustion of a configured hard cap.
    #[error("memory/resource exhaustion: {0}")]
    FatalMemory(String),

    /// A required cross-word triphone was missing and even the fallback
    /// monophone/biphone stand-in was itself a pseudo model. Recognition
    /// continues using the pseudo model; this variant is recorded, not
    /// propagated.
    #[error("missing acoustic model for context {0}")]
    MissingModel(String),

    /// Underlying I/O failure reading a model, grammar, or audio file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A loaded file violated its documented format.
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Per-utterance outcome. Distinct from [`EngineError`]: these never abort
/// the engine, they annotate a single utterance's [`crate::pass2::Result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Both passes completed normally.
    #[default]
    Success,
    /// Pass 2 exhausted its search budget; pass-1 best was substituted.
    Fallback,
    /// Pass 2 exhausted its search budget and no fallback was configured.
    SearchFail,
    /// Rejected: average input power below threshold for the whole span.
    RejectPower,
    /// Rejected: GMM-VAD classified the utterance as non-speech.
    RejectGmm,
    /// Rejected: fewer frames than `rejectshortlen`.
    RejectShortInput,
    /// Rejected: more frames than the configured maximum.
    RejectLongInput,
    /// Rejected: no non-silence frame was ever observed.
    RejectSilenceOnly,
}

impl Status {
    /// CMN/CVN running statistics are only allowed to update on this
    /// condition (spec.md §8 "CMN update guard: CMN state changes only on
    /// utterances whose final status is SUCCESS").
    pub fn allows_cmn_update(self) -> bool {
        matches!(self, Status::Success)
    }

    pub fn is_reject(self) -> bool {
        matches!(
            self,
            Status::RejectPower
                | Status::RejectGmm
                | Status::RejectShortInput
                | Status::RejectLongInput
                | Status::RejectSilenceOnly
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
