use super::*;
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;

/// Files with more lines than this are parsed in parallel
const PARALLEL_PARSE_MIN_LINES: usize = 5000;

/// Loader for RWT-style plain-text observation datasets
///
/// Each non-comment line holds `frame_id landmark_id v1 .. vN`, where `N`
/// depends on the [`ObservationKind`]. Lines starting with `%` or `#` are
/// comments.
pub struct RwtLoader;

impl RwtLoader {
    pub fn load<P: AsRef<Path>>(path: P, kind: ObservationKind) -> Result<Dataset, DatasetError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let content = std::str::from_utf8(&mmap).map_err(|e| DatasetError::Parse {
            line: 0,
            message: format!("Invalid UTF-8: {e}"),
        })?;

        Self::parse_content(content, kind)
    }

    /// Parse dataset content that is already in memory
    pub fn parse_content(content: &str, kind: ObservationKind) -> Result<Dataset, DatasetError> {
        let lines: Vec<&str> = content.lines().collect();

        let parsed: Vec<Option<Observation>> = if lines.len() > PARALLEL_PARSE_MIN_LINES {
            // collect() on an indexed parallel iterator keeps file order
            lines
                .par_iter()
                .enumerate()
                .map(|(line_num, line)| Self::parse_line(line, line_num + 1, kind))
                .collect::<Result<_, _>>()?
        } else {
            lines
                .iter()
                .enumerate()
                .map(|(line_num, line)| Self::parse_line(line, line_num + 1, kind))
                .collect::<Result<_, _>>()?
        };

        Ok(Dataset::new(kind, parsed.into_iter().flatten().collect()))
    }

    fn parse_line(
        line: &str,
        line_num: usize,
        kind: ObservationKind,
    ) -> Result<Option<Observation>, DatasetError> {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
            return Ok(None);
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let expected = 2 + kind.values_per_row();
        if parts.len() != expected {
            return Err(DatasetError::MissingFields {
                line: line_num,
                expected,
                found: parts.len(),
            });
        }

        let frame_id = Self::parse_id(parts[0], line_num)?;
        let landmark_id = Self::parse_id(parts[1], line_num)?;

        let values = parts[2..]
            .iter()
            .map(|p| {
                p.parse::<f64>().map_err(|_| DatasetError::InvalidNumber {
                    line: line_num,
                    value: p.to_string(),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let measurement =
            Measurement::from_values(kind, &values).ok_or_else(|| DatasetError::Parse {
                line: line_num,
                message: format!("Cannot build a {kind} measurement from {values:?}"),
            })?;

        Ok(Some(Observation::new(frame_id, landmark_id, measurement)))
    }

    /// Ids are written either as integers or as integral floating point numbers
    fn parse_id(token: &str, line_num: usize) -> Result<u64, DatasetError> {
        if let Ok(id) = token.parse::<u64>() {
            return Ok(id);
        }
        match token.parse::<f64>() {
            Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 => Ok(v as u64),
            _ => Err(DatasetError::InvalidNumber {
                line: line_num,
                value: token.to_string(),
            }),
        }
    }
}
