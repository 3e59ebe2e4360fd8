use nalgebra::Vector2;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// Module declarations
pub mod rwt;

// Re-exports
pub use rwt::RwtLoader;

/// Frame identifier as written in the dataset (one per sensor time step)
pub type FrameId = u64;

/// Landmark identifier as written in the dataset
pub type LandmarkId = u64;

/// Errors that can occur while loading an observation dataset
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid number format at line {line}: {value}")]
    InvalidNumber { line: usize, value: String },

    #[error("Missing required fields at line {line}: expected {expected} columns, found {found}")]
    MissingFields {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Unsupported observation type: {0}")]
    UnsupportedObservation(String),
}

/// Type of sensor observations stored in a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    /// Range and bearing (yaw) to a landmark in the plane
    RangeBearing2D,
    /// Pixel coordinates of a landmark in the left and right images of a stereo rig
    StereoCamera,
}

impl ObservationKind {
    /// Number of measurement columns following `frame_id landmark_id` in each row
    pub fn values_per_row(&self) -> usize {
        match self {
            ObservationKind::RangeBearing2D => 2,
            ObservationKind::StereoCamera => 4,
        }
    }

    /// Name used on the command line and in dataset file names
    pub fn name(&self) -> &'static str {
        match self {
            ObservationKind::RangeBearing2D => "RangeBearing_2D",
            ObservationKind::StereoCamera => "StereoCamera",
        }
    }
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ObservationKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RangeBearing_2D" => Ok(ObservationKind::RangeBearing2D),
            "StereoCamera" => Ok(ObservationKind::StereoCamera),
            other => Err(DatasetError::UnsupportedObservation(other.to_string())),
        }
    }
}

/// Sensor-specific payload of one observation
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    RangeBearing2D {
        range: f64,
        yaw: f64,
    },
    StereoCamera {
        left: Vector2<f64>,
        right: Vector2<f64>,
    },
}

impl Measurement {
    pub fn kind(&self) -> ObservationKind {
        match self {
            Measurement::RangeBearing2D { .. } => ObservationKind::RangeBearing2D,
            Measurement::StereoCamera { .. } => ObservationKind::StereoCamera,
        }
    }

    /// Build a measurement from the raw value columns of a dataset row
    ///
    /// Returns `None` if `values` does not have exactly `kind.values_per_row()` entries.
    pub fn from_values(kind: ObservationKind, values: &[f64]) -> Option<Self> {
        if values.len() != kind.values_per_row() {
            return None;
        }
        Some(match kind {
            ObservationKind::RangeBearing2D => Measurement::RangeBearing2D {
                range: values[0],
                yaw: values[1],
            },
            ObservationKind::StereoCamera => Measurement::StereoCamera {
                left: Vector2::new(values[0], values[1]),
                right: Vector2::new(values[2], values[3]),
            },
        })
    }
}

/// One row of the dataset: landmark `landmark_id` as seen from frame `frame_id`
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub frame_id: FrameId,
    pub landmark_id: LandmarkId,
    pub measurement: Measurement,
}

impl Observation {
    pub fn new(frame_id: FrameId, landmark_id: LandmarkId, measurement: Measurement) -> Self {
        Self {
            frame_id,
            landmark_id,
            measurement,
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Observation [ frame: {}, landmark: {}, measurement: {:?} ]",
            self.frame_id, self.landmark_id, self.measurement
        )
    }
}

/// A loaded observation dataset, in file order
#[derive(Debug, Clone)]
pub struct Dataset {
    pub kind: ObservationKind,
    pub observations: Vec<Observation>,
}

impl Dataset {
    pub fn new(kind: ObservationKind, observations: Vec<Observation>) -> Self {
        Self { kind, observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Number of distinct frame ids (counting each contiguous run once)
    pub fn frame_count(&self) -> usize {
        let mut count = 0;
        let mut last = None;
        for obs in &self.observations {
            if last != Some(obs.frame_id) {
                count += 1;
                last = Some(obs.frame_id);
            }
        }
        count
    }

    /// Turn the dataset into a read-once stream
    pub fn into_stream(self) -> DatasetStream {
        DatasetStream::new(self.observations)
    }
}

/// Ordered, read-once source of observations with a known total count
pub trait ObservationStream {
    /// Next observation without consuming it
    fn peek(&self) -> Option<&Observation>;

    /// Consume the next observation
    fn next_observation(&mut self) -> Option<Observation>;

    /// Total number of observations the stream started with
    fn total(&self) -> usize;

    /// Number of observations consumed so far
    fn consumed(&self) -> usize;

    /// Move the cursor past the end; every later call sees an exhausted stream
    fn close(&mut self);

    fn is_exhausted(&self) -> bool {
        self.peek().is_none()
    }

    /// Frame id of the next observation, if any
    fn peek_frame_id(&self) -> Option<FrameId> {
        self.peek().map(|obs| obs.frame_id)
    }
}

/// In-memory [`ObservationStream`] over a loaded dataset
#[derive(Debug, Clone)]
pub struct DatasetStream {
    pending: VecDeque<Observation>,
    total: usize,
    consumed: usize,
}

impl DatasetStream {
    pub fn new(observations: Vec<Observation>) -> Self {
        let total = observations.len();
        Self {
            pending: observations.into(),
            total,
            consumed: 0,
        }
    }
}

impl ObservationStream for DatasetStream {
    fn peek(&self) -> Option<&Observation> {
        self.pending.front()
    }

    fn next_observation(&mut self) -> Option<Observation> {
        let obs = self.pending.pop_front()?;
        self.consumed += 1;
        Some(obs)
    }

    fn total(&self) -> usize {
        self.total
    }

    fn consumed(&self) -> usize {
        self.consumed
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

/// Convenience function to load a dataset of the given observation type
pub fn load_dataset<P: AsRef<Path>>(path: P, kind: ObservationKind) -> Result<Dataset, DatasetError> {
    RwtLoader::load(path, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rb(frame_id: FrameId, landmark_id: LandmarkId) -> Observation {
        Observation::new(
            frame_id,
            landmark_id,
            Measurement::RangeBearing2D {
                range: 1.0,
                yaw: 0.0,
            },
        )
    }

    #[test]
    fn test_observation_kind_names() {
        assert_eq!(
            "RangeBearing_2D".parse::<ObservationKind>().ok(),
            Some(ObservationKind::RangeBearing2D)
        );
        assert_eq!(
            "StereoCamera".parse::<ObservationKind>().ok(),
            Some(ObservationKind::StereoCamera)
        );
        assert!(matches!(
            "Monocular".parse::<ObservationKind>(),
            Err(DatasetError::UnsupportedObservation(_))
        ));
        assert_eq!(ObservationKind::StereoCamera.to_string(), "StereoCamera");
    }

    #[test]
    fn test_measurement_from_values_checks_arity() {
        assert!(Measurement::from_values(ObservationKind::RangeBearing2D, &[1.0]).is_none());
        let m = Measurement::from_values(ObservationKind::StereoCamera, &[1.0, 2.0, 3.0, 4.0]);
        match m {
            Some(Measurement::StereoCamera { left, right }) => {
                assert_eq!(left, Vector2::new(1.0, 2.0));
                assert_eq!(right, Vector2::new(3.0, 4.0));
            }
            other => panic!("unexpected measurement {other:?}"),
        }
    }

    #[test]
    fn test_stream_is_read_once() {
        let mut stream = DatasetStream::new(vec![rb(0, 1), rb(0, 2), rb(1, 1)]);
        assert_eq!(stream.total(), 3);
        assert_eq!(stream.peek_frame_id(), Some(0));
        assert_eq!(stream.next_observation().map(|o| o.landmark_id), Some(1));
        assert_eq!(stream.next_observation().map(|o| o.landmark_id), Some(2));
        assert_eq!(stream.consumed(), 2);
        assert_eq!(stream.peek_frame_id(), Some(1));
        assert!(!stream.is_exhausted());
        assert!(stream.next_observation().is_some());
        assert!(stream.is_exhausted());
        assert!(stream.next_observation().is_none());
        assert_eq!(stream.consumed(), 3);
    }

    #[test]
    fn test_close_exhausts_stream() {
        let mut stream = DatasetStream::new(vec![rb(0, 1), rb(1, 1)]);
        stream.next_observation();
        stream.close();
        assert!(stream.is_exhausted());
        assert_eq!(stream.consumed(), 1);
        assert_eq!(stream.total(), 2);
    }

    #[test]
    fn test_frame_count() {
        let dataset = Dataset::new(
            ObservationKind::RangeBearing2D,
            vec![rb(0, 1), rb(0, 2), rb(1, 1), rb(2, 3), rb(2, 4)],
        );
        assert_eq!(dataset.frame_count(), 3);
        assert_eq!(dataset.len(), 5);
    }
}
