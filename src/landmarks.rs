//! Known/unknown classification of landmarks on first sight.
//!
//! A landmark observed for the first time is classified as [`LandmarkClass::Known`]
//! (its relative position is fixed) while fewer than `max_known_per_frame`
//! landmarks of the current frame were classified known, and as
//! [`LandmarkClass::Unknown`] (to be estimated) otherwise. The first
//! classification is memoized and reused for every later observation of the
//! same landmark. With `max_known_per_frame == 0` every landmark is unknown.

use crate::io::{FrameId, LandmarkId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LandmarkClass {
    /// Relative position is given and held fixed
    Known,
    /// Relative position is estimated by the optimizer
    Unknown,
}

/// Classify one landmark observation.
///
/// `known_in_frame` is the number of landmarks already classified known in the
/// current frame. Previously classified landmarks keep their class.
pub fn classify(
    landmark_id: LandmarkId,
    known_in_frame: usize,
    max_known_per_frame: usize,
    prior: &HashMap<LandmarkId, LandmarkClass>,
) -> LandmarkClass {
    if let Some(class) = prior.get(&landmark_id) {
        return *class;
    }
    if known_in_frame < max_known_per_frame {
        LandmarkClass::Known
    } else {
        LandmarkClass::Unknown
    }
}

/// Per-run memo of landmark classifications
#[derive(Debug, Clone, Default)]
pub struct LandmarkClassifier {
    max_known_per_frame: usize,
    classes: HashMap<LandmarkId, LandmarkClass>,
    current_frame: Option<FrameId>,
    known_in_frame: usize,
}

impl LandmarkClassifier {
    pub fn new(max_known_per_frame: usize) -> Self {
        Self {
            max_known_per_frame,
            ..Default::default()
        }
    }

    /// Classify the observation of `landmark_id` from `frame_id`, memoizing new landmarks
    pub fn classify(&mut self, landmark_id: LandmarkId, frame_id: FrameId) -> LandmarkClass {
        if self.current_frame != Some(frame_id) {
            self.current_frame = Some(frame_id);
            self.known_in_frame = 0;
        }

        if let Some(class) = self.classes.get(&landmark_id) {
            return *class;
        }

        let class = classify(
            landmark_id,
            self.known_in_frame,
            self.max_known_per_frame,
            &self.classes,
        );
        if class == LandmarkClass::Known {
            self.known_in_frame += 1;
        }
        self.classes.insert(landmark_id, class);
        class
    }

    pub fn get(&self, landmark_id: LandmarkId) -> Option<LandmarkClass> {
        self.classes.get(&landmark_id).copied()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
