use super::parameter::ParamKey;
use crate::core::descriptors::Descriptor;
use phf::{Map, phf_map};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Boltzmann constant in kcal/(mol K).
const BOLTZMANN_KCAL: f64 = 0.0019872;
const RDF_TEMPERATURE: f64 = 300.0;
/// Shannon crystal radii differ from ionic radii by this amount (larger for cations).
const CRYSTAL_SHIFT: f64 = 0.14;

/// Universal Force Field nonbonded parameters: `(x_i` in Angstrom, `D_i` in kcal/mol`)`.
static UFF: Map<&'static str, (f64, f64)> = phf_map! {
    "H" => (2.886, 0.044), "He" => (2.362, 0.056),
    "Li" => (2.451, 0.025), "Be" => (2.745, 0.085), "B" => (4.083, 0.180),
    "C" => (3.851, 0.105), "N" => (3.660, 0.069), "O" => (3.500, 0.060),
    "F" => (3.364, 0.050), "Ne" => (3.243, 0.042),
    "Na" => (2.983, 0.030), "Mg" => (3.021, 0.111), "Al" => (4.499, 0.505),
    "Si" => (4.295, 0.402), "P" => (4.147, 0.305), "S" => (4.035, 0.274),
    "Cl" => (3.947, 0.227), "Ar" => (3.868, 0.185),
    "K" => (3.812, 0.035), "Ca" => (3.399, 0.238), "Ti" => (3.175, 0.017),
    "Fe" => (2.912, 0.013), "Co" => (2.872, 0.014), "Ni" => (2.834, 0.015),
    "Cu" => (3.495, 0.005), "Zn" => (2.763, 0.124), "Ga" => (4.383, 0.415),
    "Ge" => (4.280, 0.379), "As" => (4.230, 0.309), "Se" => (4.205, 0.291),
    "Br" => (4.189, 0.251), "Kr" => (4.141, 0.220),
    "Rb" => (4.114, 0.040), "Sr" => (3.641, 0.235), "Pd" => (2.899, 0.048),
    "Ag" => (3.148, 0.036), "Cd" => (2.848, 0.228), "In" => (4.463, 0.599),
    "Sn" => (4.392, 0.567), "Sb" => (4.420, 0.449), "Te" => (4.470, 0.398),
    "I" => (4.500, 0.339), "Xe" => (4.404, 0.332),
    "Cs" => (4.517, 0.045), "Ba" => (3.703, 0.364), "Pt" => (2.754, 0.080),
    "Au" => (3.293, 0.039), "Hg" => (2.705, 0.385), "Pb" => (4.297, 0.663),
};

/// Shannon ionic radii (Angstrom, six-fold coordination) and the sign of the usual ion charge.
static SHANNON: Map<&'static str, (f64, i8)> = phf_map! {
    "Li" => (0.76, 1), "Na" => (1.02, 1), "K" => (1.38, 1), "Rb" => (1.52, 1), "Cs" => (1.67, 1),
    "Mg" => (0.72, 1), "Ca" => (1.00, 1), "Sr" => (1.18, 1), "Ba" => (1.35, 1),
    "Al" => (0.535, 1), "Ga" => (0.62, 1), "In" => (0.80, 1), "Ti" => (0.605, 1),
    "Fe" => (0.78, 1), "Co" => (0.745, 1), "Ni" => (0.69, 1), "Cu" => (0.73, 1),
    "Zn" => (0.74, 1), "Ag" => (1.15, 1), "Cd" => (0.95, 1), "Au" => (1.37, 1),
    "Hg" => (1.02, 1), "Sn" => (0.69, 1), "Pb" => (1.19, 1), "Sb" => (0.76, 1),
    "Bi" => (1.03, 1),
    "N" => (1.46, -1), "O" => (1.40, -1), "S" => (1.84, -1), "Se" => (1.98, -1),
    "Te" => (2.21, -1), "F" => (1.33, -1), "Cl" => (1.81, -1), "Br" => (1.96, -1),
    "I" => (2.20, -1),
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GuessError {
    #[error(
        "Unknown guess strategy '{0}'; accepted values are 'rdf', 'uff', 'crystal_radius' and 'ion_radius'"
    )]
    UnknownStrategy(String),
    #[error("Only 'epsilon' and 'sigma' parameters can be guessed, not '{0}'")]
    UnsupportedGroup(String),
    #[error("The '{strategy}' strategy cannot guess '{quantity}'")]
    UnsupportedQuantity {
        strategy: GuessStrategy,
        quantity: GuessQuantity,
    },
    #[error("No '{strategy}' reference data for element '{element}' (atom '{atom}')")]
    UnknownElement {
        strategy: GuessStrategy,
        atom: String,
        element: String,
    },
    #[error("The 'rdf' strategy needs a reference radial distribution descriptor")]
    MissingRdf,
    #[error("Reference radial distribution has no column for pair '{0}'")]
    MissingRdfColumn(String),
    #[error("Reference radial distribution of pair '{0}' never reaches 1")]
    NoRdfPeak(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessStrategy {
    Uff,
    IonRadius,
    CrystalRadius,
    Rdf,
}

impl FromStr for GuessStrategy {
    type Err = GuessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uff" => Ok(Self::Uff),
            "rdf" => Ok(Self::Rdf),
            "ion_radius" | "ionic_radius" | "ion_radii" | "ionic_radii" => Ok(Self::IonRadius),
            "crystal_radius" | "crystal_radii" => Ok(Self::CrystalRadius),
            _ => Err(GuessError::UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for GuessStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uff => "uff",
            Self::IonRadius => "ion_radius",
            Self::CrystalRadius => "crystal_radius",
            Self::Rdf => "rdf",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessQuantity {
    Epsilon,
    Sigma,
}

impl GuessQuantity {
    pub fn from_group(group: &str) -> Result<Self, GuessError> {
        match group {
            "epsilon" => Ok(Self::Epsilon),
            "sigma" => Ok(Self::Sigma),
            other => Err(GuessError::UnsupportedGroup(other.to_string())),
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Epsilon => "kcal/mol",
            Self::Sigma => "angstrom",
        }
    }
}

impl fmt::Display for GuessQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Epsilon => "epsilon",
            Self::Sigma => "sigma",
        })
    }
}

/// Inputs shared by every guess in one parameter group.
#[derive(Debug, Clone, Copy)]
pub struct GuessContext<'a> {
    pub strategy: GuessStrategy,
    pub quantity: GuessQuantity,
    /// Explicit atom-name to element overrides.
    pub elements: &'a HashMap<String, String>,
    /// Reference RDF, required by [`GuessStrategy::Rdf`].
    pub rdf: Option<&'a Descriptor>,
}

impl GuessContext<'_> {
    /// Estimates the Lennard-Jones value of `key`. A single-atom key is treated as the `i i` pair.
    pub fn guess(&self, key: &ParamKey) -> Result<f64, GuessError> {
        let atoms = key.atoms();
        let (a, b) = match atoms.as_slice() {
            [a, b] => (*a, *b),
            [a] => (*a, *a),
            _ => return Err(GuessError::MissingRdfColumn(key.to_string())),
        };

        match self.strategy {
            GuessStrategy::Uff => {
                let (eps_a, sig_a) = self.uff_atom(a)?;
                let (eps_b, sig_b) = self.uff_atom(b)?;
                Ok(match self.quantity {
                    GuessQuantity::Epsilon => (eps_a * eps_b).abs().sqrt(),
                    GuessQuantity::Sigma => (sig_a + sig_b) / 2.0,
                })
            }
            GuessStrategy::IonRadius | GuessStrategy::CrystalRadius => {
                if self.quantity == GuessQuantity::Epsilon {
                    return Err(GuessError::UnsupportedQuantity {
                        strategy: self.strategy,
                        quantity: self.quantity,
                    });
                }
                Ok((self.radius_sigma(a)? + self.radius_sigma(b)?) / 2.0)
            }
            GuessStrategy::Rdf => {
                let rdf = self.rdf.ok_or(GuessError::MissingRdf)?;
                let (sigma, epsilon) = boltzmann_inversion(rdf, a, b, key)?;
                Ok(match self.quantity {
                    GuessQuantity::Epsilon => epsilon,
                    GuessQuantity::Sigma => sigma,
                })
            }
        }
    }

    fn element<'s>(&'s self, atom: &'s str) -> &'s str {
        self.elements
            .get(atom)
            .map(String::as_str)
            .unwrap_or_else(|| element_of(atom))
    }

    /// `(epsilon, sigma)` of a single atom; UFF tabulates the minimum distance `x_i`.
    fn uff_atom(&self, atom: &str) -> Result<(f64, f64), GuessError> {
        let element = self.element(atom);
        let (x, d) = UFF.get(element).ok_or_else(|| GuessError::UnknownElement {
            strategy: self.strategy,
            atom: atom.to_string(),
            element: element.to_string(),
        })?;
        Ok((*d, x / 2f64.powf(1.0 / 6.0)))
    }

    fn radius_sigma(&self, atom: &str) -> Result<f64, GuessError> {
        let element = self.element(atom);
        let (ionic, charge) = SHANNON
            .get(element)
            .ok_or_else(|| GuessError::UnknownElement {
                strategy: self.strategy,
                atom: atom.to_string(),
                element: element.to_string(),
            })?;
        let radius = match self.strategy {
            GuessStrategy::CrystalRadius => ionic + CRYSTAL_SHIFT * f64::from(*charge),
            _ => *ionic,
        };
        Ok(2.0 * radius / 2f64.powf(1.0 / 6.0))
    }
}

/// Element symbol implied by an atom name: an uppercase letter plus an optional lowercase one.
pub fn element_of(atom: &str) -> &str {
    let mut chars = atom.char_indices();
    match (chars.next(), chars.next()) {
        (Some((_, c0)), Some((i1, c1))) if c0.is_ascii_uppercase() && c1.is_ascii_lowercase() => {
            &atom[..i1 + c1.len_utf8()]
        }
        (Some((_, c0)), _) if c0.is_ascii_alphabetic() => &atom[..c0.len_utf8()],
        _ => atom,
    }
}

/// Returns `(sigma, epsilon)`: the first distance where `g(r) >= 1` and `kT ln g_max`.
fn boltzmann_inversion(
    rdf: &Descriptor,
    a: &str,
    b: &str,
    key: &ParamKey,
) -> Result<(f64, f64), GuessError> {
    let column = rdf
        .pair_column(a, b)
        .ok_or_else(|| GuessError::MissingRdfColumn(key.to_string()))?;
    let first = column
        .iter()
        .position(|&g| g >= 1.0)
        .ok_or_else(|| GuessError::NoRdfPeak(key.to_string()))?;
    let g_max = column.max();
    let kt = BOLTZMANN_KCAL * RDF_TEMPERATURE;
    Ok((rdf.index()[first], kt * g_max.ln()))
}
