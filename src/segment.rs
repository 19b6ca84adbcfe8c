//! Short-pause/VAD segmentation: decides where to cut a continuous input
//! stream into recognizable utterances without closing the stream (spec.md
//! §4.6 "Segmentation"). Grounded on `libjulius/src/spsegment.c`.
use crate::config::SegmentConfig;
use crate::pass1::FrameSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    WaitingTrigger,
    InSpeech,
    InTrailingPause,
    Segmented,
}

/// A rewind request from the segmenter to the driver loop (spec.md §4.6
/// "Rewind protocol").
#[derive(Debug, Clone, Copy)]
pub struct RewindRequest {
    pub rewind_frame: u32,
    pub reprocess: bool,
}

/// An external GMM-VAD (or other decoder-independent) up/down trigger,
/// reported alongside the first pass's own per-frame signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct VadSignal {
    pub up_trigger: bool,
    pub down_trigger: bool,
}

pub struct SpSegment {
    config: SegmentConfig,
    state: SegmentState,
    pause_frames: u32,
    non_pause_frames: u32,
    /// Candidate cut frame remembered while in `InTrailingPause`.
    cut_candidate: Option<u32>,
}

impl SpSegment {
    pub fn new(config: SegmentConfig) -> Self {
        Self {
            config,
            state: SegmentState::WaitingTrigger,
            pause_frames: 0,
            non_pause_frames: 0,
            cut_candidate: None,
        }
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Feeds one frame's first-pass signal (and optional VAD signal),
    /// returning a rewind request when the state machine transitions, and
    /// signalling completion via [`SegmentState::Segmented`].
    pub fn step(&mut self, frame: u32, signal: FrameSignal, vad: VadSignal) -> Option<RewindRequest> {
        if !self.config.enabled {
            return None;
        }
        match self.state {
            SegmentState::WaitingTrigger => {
                let triggered = if self.config.use_gmm_vad {
                    vad.up_trigger
                } else if signal.best_atom.is_some() && !signal.is_pause_word {
                    self.non_pause_frames += 1;
                    self.non_pause_frames >= self.config.sp_delay
                } else {
                    self.non_pause_frames = 0;
                    false
                };
                if triggered {
                    self.state = SegmentState::InSpeech;
                    self.non_pause_frames = 0;
                    let rewind_frame = frame.saturating_sub(self.config.sp_margin);
                    return Some(RewindRequest {
                        rewind_frame,
                        reprocess: true,
                    });
                }
                None
            }
            SegmentState::InSpeech => {
                if signal.best_atom.is_some() && signal.is_pause_word {
                    self.state = SegmentState::InTrailingPause;
                    self.pause_frames = 1;
                    self.cut_candidate = Some(frame);
                } else if self.config.use_gmm_vad && vad.down_trigger {
                    self.state = SegmentState::InTrailingPause;
                    self.pause_frames = 1;
                    self.cut_candidate = Some(frame);
                }
                None
            }
            SegmentState::InTrailingPause => {
                if signal.best_atom.is_some() && !signal.is_pause_word {
                    self.state = SegmentState::InSpeech;
                    self.pause_frames = 0;
                    self.cut_candidate = None;
                    return None;
                }
                self.pause_frames += 1;
                if self.pause_frames >= self.config.sp_frame_duration {
                    self.state = SegmentState::Segmented;
                }
                None
            }
            SegmentState::Segmented => None,
        }
    }

    /// The frame at which the finished utterance should be cut, valid only
    /// once [`SegmentState::Segmented`] has been reached.
    pub fn cut_frame(&self) -> Option<u32> {
        self.cut_candidate
    }

    /// Resets the state machine for the next utterance after a segment cut,
    /// carrying the tail `[cut..end]` over as the new utterance's start
    /// (spec.md §4.6 "the search state resets").
    pub fn reset_after_cut(&mut self) {
        self.state = SegmentState::WaitingTrigger;
        self.pause_frames = 0;
        self.non_pause_frames = 0;
        self.cut_candidate = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trellis::AtomId;

    fn signal(atom: Option<AtomId>, is_pause: bool) -> FrameSignal {
        FrameSignal {
            best_atom: atom,
            is_pause_word: is_pause,
            frame_max_score: 0.0,
        }
    }

    fn cfg() -> SegmentConfig {
        let mut c = SegmentConfig::default();
        c.enabled = true;
        c.sp_delay = 2;
        c.sp_frame_duration = 3;
        c
    }

    #[test]
    fn waiting_trigger_fires_after_sp_delay_nonpause_frames() {
        let mut seg = SpSegment::new(cfg());
        assert!(seg.step(0, signal(Some(0), false), VadSignal::default()).is_none());
        let req = seg.step(1, signal(Some(0), false), VadSignal::default());
        assert!(req.is_some());
        assert_eq!(seg.state(), SegmentState::InSpeech);
    }

    #[test]
    fn trailing_pause_segments_after_duration() {
        let mut seg = SpSegment::new(cfg());
        seg.step(0, signal(Some(0), false), VadSignal::default());
        seg.step(1, signal(Some(0), false), VadSignal::default());
        assert_eq!(seg.state(), SegmentState::InSpeech);
        seg.step(2, signal(Some(1), true), VadSignal::default());
        seg.step(3, signal(Some(1), true), VadSignal::default());
        seg.step(4, signal(Some(1), true), VadSignal::default());
        assert_eq!(seg.state(), SegmentState::Segmented);
        assert_eq!(seg.cut_frame(), Some(2));
    }

    #[test]
    fn pause_interrupted_by_speech_returns_to_in_speech() {
        let mut seg = SpSegment::new(cfg());
        seg.step(0, signal(Some(0), false), VadSignal::default());
        seg.step(1, signal(Some(0), false), VadSignal::default());
        seg.step(2, signal(Some(1), true), VadSignal::default());
        seg.step(3, signal(Some(2), false), VadSignal::default());
        assert_eq!(seg.state(), SegmentState::InSpeech);
    }
}
