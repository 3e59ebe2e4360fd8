//! Grouping of the observation stream into per-keyframe bundles.

use crate::error::{RbaError, RbaResult};
use crate::io::{FrameId, ObservationStream};
use crate::landmarks::LandmarkClassifier;
use crate::optimizer::{KeyframeBundle, KeyframeInfo};

/// Groups consecutive observations of the expected frame id into bundles.
///
/// The dataset must list frames in keyframe order without gaps: frame `k`
/// becomes keyframe `k`. Every bundle targets `next_expected`, which advances
/// from the id the optimizer assigns.
#[derive(Debug, Clone)]
pub struct KeyframeBatcher {
    frames_at_once: usize,
    next_expected: FrameId,
    bootstrapped: bool,
    classifier: LandmarkClassifier,
}

impl KeyframeBatcher {
    pub fn new(frames_at_once: usize, max_known_per_frame: usize) -> Self {
        Self {
            frames_at_once: frames_at_once.max(1),
            next_expected: 0,
            bootstrapped: false,
            classifier: LandmarkClassifier::new(max_known_per_frame),
        }
    }

    pub fn next_expected(&self) -> FrameId {
        self.next_expected
    }

    /// Number of keyframe groups to dispatch in the batch starting now.
    ///
    /// The first batch carries one extra group so the graph starts with a relative edge.
    pub fn groups_in_next_batch(&mut self) -> usize {
        if self.bootstrapped {
            self.frames_at_once
        } else {
            self.bootstrapped = true;
            self.frames_at_once + 1
        }
    }

    /// Consume every observation of the expected frame.
    ///
    /// Returns `Ok(None)` when the stream is exhausted, and a sequence error when
    /// the next observation belongs to another frame.
    pub fn next_bundle<S: ObservationStream + ?Sized>(
        &mut self,
        stream: &mut S,
    ) -> RbaResult<Option<KeyframeBundle>> {
        let Some(found) = stream.peek_frame_id() else {
            return Ok(None);
        };

        let mut bundle = KeyframeBundle::new(self.next_expected);
        while stream.peek_frame_id() == Some(self.next_expected) {
            let Some(obs) = stream.next_observation() else {
                break;
            };
            let class = self.classifier.classify(obs.landmark_id, obs.frame_id);
            bundle.push(obs, class);
        }

        if bundle.is_empty() {
            return Err(RbaError::Sequence {
                expected: self.next_expected,
                found,
            });
        }
        Ok(Some(bundle))
    }

    /// Advance to the keyframe after `info.kf_id` and check the stream agrees
    pub fn acknowledge<S: ObservationStream + ?Sized>(
        &mut self,
        info: &KeyframeInfo,
        stream: &S,
    ) -> RbaResult<()> {
        self.next_expected = info.kf_id + 1;
        match stream.peek_frame_id() {
            Some(found) if found != self.next_expected => Err(RbaError::Sequence {
                expected: self.next_expected,
                found,
            }),
            _ => Ok(()),
        }
    }
}
