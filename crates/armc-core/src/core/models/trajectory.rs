use nalgebra::Point3;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TrajectoryError {
    #[error("Trajectory contains no atoms")]
    NoAtoms,
    #[error("Trajectory contains no frames")]
    NoFrames,
    #[error("Frame {frame} has {found} atoms, expected {expected}")]
    FrameSize {
        frame: usize,
        expected: usize,
        found: usize,
    },
    #[error("Frame {frame} contains a non-finite coordinate for atom {atom}")]
    NonFinite { frame: usize, atom: usize },
}

/// A molecular trajectory: one symbol per atom and `n_frames x n_atoms` Cartesian positions.
///
/// This is the only representation descriptor functions receive, whether it was read from a
/// reference file or produced by a simulation job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trajectory {
    symbols: Vec<String>,
    frames: Vec<Vec<Point3<f64>>>,
    source: Option<PathBuf>,
}

impl Trajectory {
    /// Builds a trajectory and checks it with [`Trajectory::validate`].
    pub fn new(
        symbols: Vec<String>,
        frames: Vec<Vec<Point3<f64>>>,
    ) -> Result<Self, TrajectoryError> {
        let trajectory = Self {
            symbols,
            frames,
            source: None,
        };
        trajectory.validate()?;
        Ok(trajectory)
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn frames(&self) -> &[Vec<Point3<f64>>] {
        &self.frames
    }

    pub fn frame(&self, idx: usize) -> Option<&[Point3<f64>]> {
        self.frames.get(idx).map(Vec::as_slice)
    }

    pub fn source(&self) -> Option<&std::path::Path> {
        self.source.as_deref()
    }

    pub fn n_atoms(&self) -> usize {
        self.symbols.len()
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Indices of all atoms carrying `symbol`.
    pub fn indices_of(&self, symbol: &str) -> Vec<usize> {
        self.symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| s.as_str() == symbol)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn validate(&self) -> Result<(), TrajectoryError> {
        if self.symbols.is_empty() {
            return Err(TrajectoryError::NoAtoms);
        }
        if self.frames.is_empty() {
            return Err(TrajectoryError::NoFrames);
        }
        for (frame_idx, frame) in self.frames.iter().enumerate() {
            if frame.len() != self.symbols.len() {
                return Err(TrajectoryError::FrameSize {
                    frame: frame_idx,
                    expected: self.symbols.len(),
                    found: frame.len(),
                });
            }
            if let Some(atom) = frame
                .iter()
                .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
            {
                return Err(TrajectoryError::NonFinite {
                    frame: frame_idx,
                    atom,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn valid_trajectory_reports_its_shape() {
        let traj = Trajectory::new(
            symbols(&["Cd", "Se"]),
            vec![
                vec![Point3::origin(), Point3::new(2.6, 0.0, 0.0)],
                vec![Point3::origin(), Point3::new(2.7, 0.0, 0.0)],
            ],
        )
        .unwrap();
        assert_eq!(traj.n_atoms(), 2);
        assert_eq!(traj.n_frames(), 2);
        assert_eq!(traj.indices_of("Se"), vec![1]);
        assert_eq!(traj.frame(1).unwrap()[1].x, 2.7);
    }

    #[test]
    fn ragged_frames_are_rejected() {
        let result = Trajectory::new(
            symbols(&["Cd", "Se"]),
            vec![vec![Point3::origin(), Point3::origin()], vec![Point3::origin()]],
        );
        assert_eq!(
            result,
            Err(TrajectoryError::FrameSize {
                frame: 1,
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn empty_or_non_finite_trajectories_are_rejected() {
        assert_eq!(
            Trajectory::new(vec![], vec![vec![]]),
            Err(TrajectoryError::NoAtoms)
        );
        assert_eq!(
            Trajectory::new(symbols(&["Cd"]), vec![]),
            Err(TrajectoryError::NoFrames)
        );
        assert_eq!(
            Trajectory::new(
                symbols(&["Cd"]),
                vec![vec![Point3::new(f64::NAN, 0.0, 0.0)]]
            ),
            Err(TrajectoryError::NonFinite { frame: 0, atom: 0 })
        );
    }
}
