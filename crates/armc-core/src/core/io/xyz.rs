use crate::core::io::traits::TrajectoryFile;
use crate::core::models::trajectory::{Trajectory, TrajectoryError};
use nalgebra::Point3;
use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XyzError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse { line: usize, kind: XyzParseErrorKind },
    #[error("Frame starting on line {line} lists symbol '{found}' where '{expected}' was expected")]
    SymbolMismatch {
        line: usize,
        expected: String,
        found: String,
    },
    #[error("Invalid trajectory: {0}")]
    Trajectory(#[from] TrajectoryError),
}

#[derive(Debug, Error)]
pub enum XyzParseErrorKind {
    #[error("Invalid atom count '{0}'")]
    InvalidCount(String),
    #[error("Atom line needs a symbol and three coordinates")]
    ShortAtomLine,
    #[error("Invalid coordinate '{0}'")]
    InvalidCoordinate(String),
    #[error("File ends in the middle of a frame")]
    TruncatedFrame,
    #[error("Frame has {found} atoms but the first frame has {expected}")]
    AtomCountChanged { expected: usize, found: usize },
}

/// Multi-frame XYZ: an atom count, a comment line, then one `symbol x y z` line per atom.
pub struct XyzFile;

impl TrajectoryFile for XyzFile {
    type Error = XyzError;

    fn read_from(reader: &mut impl BufRead) -> Result<Trajectory, Self::Error> {
        let mut lines = reader.lines().enumerate().map(|(n, l)| (n + 1, l));
        let mut symbols: Vec<String> = Vec::new();
        let mut frames = Vec::new();

        while let Some((count_line, line)) = lines.next() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let n_atoms: usize = trimmed.parse().map_err(|_| XyzError::Parse {
                line: count_line,
                kind: XyzParseErrorKind::InvalidCount(trimmed.to_string()),
            })?;
            if !frames.is_empty() && n_atoms != symbols.len() {
                return Err(XyzError::Parse {
                    line: count_line,
                    kind: XyzParseErrorKind::AtomCountChanged {
                        expected: symbols.len(),
                        found: n_atoms,
                    },
                });
            }

            let truncated = |line| XyzError::Parse {
                line,
                kind: XyzParseErrorKind::TruncatedFrame,
            };
            // comment line
            lines.next().ok_or_else(|| truncated(count_line))?.1?;

            let first_frame = frames.is_empty();
            let mut frame = Vec::with_capacity(n_atoms);
            for atom in 0..n_atoms {
                let (line_num, line) = lines.next().ok_or_else(|| truncated(count_line))?;
                let line = line?;
                let (symbol, point) = parse_atom_line(&line, line_num)?;
                if first_frame {
                    symbols.push(symbol.to_string());
                } else if symbols[atom] != symbol {
                    return Err(XyzError::SymbolMismatch {
                        line: line_num,
                        expected: symbols[atom].clone(),
                        found: symbol.to_string(),
                    });
                }
                frame.push(point);
            }
            frames.push(frame);
        }

        Ok(Trajectory::new(symbols, frames)?)
    }

    fn write_to(trajectory: &Trajectory, writer: &mut impl Write) -> Result<(), Self::Error> {
        for (i, frame) in trajectory.frames().iter().enumerate() {
            writeln!(writer, "{}", trajectory.n_atoms())?;
            writeln!(writer, "frame {}", i + 1)?;
            for (symbol, p) in trajectory.symbols().iter().zip(frame) {
                writeln!(writer, "{:<4} {:>14.8} {:>14.8} {:>14.8}", symbol, p.x, p.y, p.z)?;
            }
        }
        Ok(())
    }
}

fn parse_atom_line(line: &str, line_num: usize) -> Result<(&str, Point3<f64>), XyzError> {
    let mut fields = line.split_whitespace();
    let (Some(symbol), Some(x), Some(y), Some(z)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(XyzError::Parse {
            line: line_num,
            kind: XyzParseErrorKind::ShortAtomLine,
        });
    };
    let coord = |raw: &str| {
        raw.parse::<f64>().map_err(|_| XyzError::Parse {
            line: line_num,
            kind: XyzParseErrorKind::InvalidCoordinate(raw.to_string()),
        })
    };
    Ok((symbol, Point3::new(coord(x)?, coord(y)?, coord(z)?)))
}
