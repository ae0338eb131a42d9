//! Trajectories of a tracked node and their comparison against stored references.
//!
//! References are plain text files with one `t x y z` sample per line.

use std::error::Error;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use simulation::brickfem::nalgebra::Vector3;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    pub time: f64,
    pub position: Vector3<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub samples: Vec<TrajectorySample>,
}

/// Result of comparing a computed trajectory to a reference.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryComparison {
    pub num_compared: usize,
    /// Largest per-sample error, see [`sample_error`].
    pub max_error: f64,
    pub max_error_time: f64,
}

impl TrajectoryComparison {
    pub fn within(&self, precision: f64) -> bool {
        self.max_error < precision
    }
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: f64, position: Vector3<f64>) {
        self.samples.push(TrajectorySample { time, position });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&TrajectorySample> {
        self.samples.last()
    }

    pub fn parse(text: &str) -> Result<Self, Box<dyn Error>> {
        let mut trajectory = Trajectory::new();
        for (line_index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let values = line
                .split_whitespace()
                .map(|token| token.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("Line {}: invalid number ({})", line_index + 1, e))?;
            if values.len() != 4 {
                return Err(Box::from(format!(
                    "Line {}: expected 4 columns (t x y z), found {}",
                    line_index + 1,
                    values.len()
                )));
            }
            trajectory.push(values[0], Vector3::new(values[1], values[2], values[3]));
        }
        Ok(trajectory)
    }

    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            format!(
                "Unable to open reference file '{}' for reading ({})",
                path.as_ref().to_string_lossy(),
                e
            )
        })?;
        Self::parse(&text).map_err(|e| {
            Box::<dyn Error>::from(format!(
                "Error during parsing of reference file '{}': {}",
                path.as_ref().to_string_lossy(),
                e
            ))
        })
    }

    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for sample in &self.samples {
            let p = &sample.position;
            // Writing to a String cannot fail
            let _ = writeln!(
                text,
                "{:15.7e} {:15.7e} {:15.7e} {:15.7e}",
                sample.time, p.x, p.y, p.z
            );
        }
        text
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path.as_ref(), self.to_text()).map_err(|e| {
            Box::<dyn Error>::from(format!(
                "Unable to write trajectory to '{}' ({})",
                path.as_ref().to_string_lossy(),
                e
            ))
        })
    }

    /// Compares this trajectory sample by sample against `reference`.
    ///
    /// Every reference sample must have a counterpart at the same time. Additional computed
    /// samples at the end are ignored.
    pub fn compare_to(&self, reference: &Trajectory) -> Result<TrajectoryComparison, Box<dyn Error>> {
        if reference.is_empty() {
            return Err(Box::from("Reference trajectory is empty"));
        }
        if self.len() < reference.len() {
            return Err(Box::from(format!(
                "Computed trajectory has {} samples, but the reference has {}",
                self.len(),
                reference.len()
            )));
        }

        let mut comparison = TrajectoryComparison {
            num_compared: 0,
            max_error: 0.0,
            max_error_time: reference.samples[0].time,
        };
        for (computed, expected) in self.samples.iter().zip(&reference.samples) {
            let time_tolerance = 1e-6 * expected.time.abs().max(1.0);
            if (computed.time - expected.time).abs() > time_tolerance {
                return Err(Box::from(format!(
                    "Sample {} is at t = {}, but the reference sample is at t = {}",
                    comparison.num_compared, computed.time, expected.time
                )));
            }

            let error = sample_error(&computed.position, &expected.position);
            if !error.is_finite() {
                return Err(Box::from(format!("Non-finite position at t = {}", computed.time)));
            }
            if error > comparison.max_error {
                comparison.max_error = error;
                comparison.max_error_time = expected.time;
            }
            comparison.num_compared += 1;
        }
        Ok(comparison)
    }
}

/// Sum over the coordinates of the relative deviation from the reference.
///
/// Coordinates that are zero in the reference contribute their absolute deviation.
pub fn sample_error(computed: &Vector3<f64>, reference: &Vector3<f64>) -> f64 {
    computed
        .iter()
        .zip(reference.iter())
        .map(|(c, r)| {
            let deviation = (c - r).abs();
            if *r == 0.0 {
                deviation
            } else {
                deviation / r.abs()
            }
        })
        .sum()
}
