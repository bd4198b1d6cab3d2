use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParamError {
    #[error("Parameter key cannot be empty")]
    EmptyKey,
    #[error("Parameter key '{0}' has more than two atoms; expected 'A' or 'A B'")]
    TooManyAtoms(String),
    #[error("Parameter group name cannot be empty")]
    EmptyGroup,
}

/// An atom (`"Cd"`) or atom-pair (`"Cd Se"`) key within a parameter group.
///
/// Pair keys are stored with their atoms sorted, so `"Se Cd"` and `"Cd Se"` address the same
/// parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParamKey(String);

impl ParamKey {
    pub fn new(raw: &str) -> Result<Self, ParamError> {
        let mut atoms: Vec<&str> = raw.split_whitespace().collect();
        match atoms.len() {
            0 => Err(ParamError::EmptyKey),
            1 => Ok(Self(atoms[0].to_string())),
            2 => {
                atoms.sort_unstable();
                Ok(Self(format!("{} {}", atoms[0], atoms[1])))
            }
            _ => Err(ParamError::TooManyAtoms(raw.trim().to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn atoms(&self) -> Vec<&str> {
        self.0.split(' ').collect()
    }

    pub fn is_pair(&self) -> bool {
        self.0.contains(' ')
    }
}

impl TryFrom<String> for ParamKey {
    type Error = ParamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ParamKey> for String {
    fn from(key: ParamKey) -> Self {
        key.0
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified parameter identifier: the group it belongs to plus its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId {
    pub group: String,
    pub key: ParamKey,
}

impl ParamId {
    pub fn new(group: &str, key: &str) -> Result<Self, ParamError> {
        let group = group.trim();
        if group.is_empty() {
            return Err(ParamError::EmptyGroup);
        }
        Ok(Self {
            group: group.to_string(),
            key: ParamKey::new(key)?,
        })
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub value: f64,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(value: f64) -> Self {
        Self {
            value,
            inclusive: true,
        }
    }

    pub fn exclusive(value: f64) -> Self {
        Self {
            value,
            inclusive: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl Bounds {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        let above = match self.lower {
            Some(b) if b.inclusive => value >= b.value,
            Some(b) => value > b.value,
            None => true,
        };
        let below = match self.upper {
            Some(b) if b.inclusive => value <= b.value,
            Some(b) => value < b.value,
            None => true,
        };
        above && below
    }

    /// Narrows these bounds with `other`, keeping the tighter limit on each side.
    pub fn intersect(&mut self, other: Bounds) {
        if let Some(new) = other.lower {
            self.lower = Some(match self.lower {
                Some(old) if old.value > new.value => old,
                Some(old) if old.value == new.value && !old.inclusive => old,
                _ => new,
            });
        }
        if let Some(new) = other.upper {
            self.upper = Some(match self.upper {
                Some(old) if old.value < new.value => old,
                Some(old) if old.value == new.value && !old.inclusive => old,
                _ => new,
            });
        }
    }

    /// Whether any value at all can satisfy these bounds.
    pub fn is_feasible(&self) -> bool {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) if lo.inclusive && hi.inclusive => lo.value <= hi.value,
            (Some(lo), Some(hi)) => lo.value < hi.value,
            _ => true,
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, lo) = match self.lower {
            Some(b) => (if b.inclusive { '[' } else { '(' }, b.value.to_string()),
            None => ('(', "-inf".to_string()),
        };
        let (close, hi) = match self.upper {
            Some(b) => (if b.inclusive { ']' } else { ')' }, b.value.to_string()),
            None => (')', "inf".to_string()),
        };
        write!(f, "{}{}, {}{}", open, lo, hi, close)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub id: ParamId,
    pub value: f64,
    pub bounds: Bounds,
    /// Guessed-but-fixed parameters are never selected by the move generator.
    pub frozen: bool,
}

impl Parameter {
    pub fn new(id: ParamId, value: f64) -> Self {
        Self {
            id,
            value,
            bounds: Bounds::unbounded(),
            frozen: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_keys_are_order_independent() {
        let a = ParamKey::new("Se Cd").unwrap();
        let b = ParamKey::new("  Cd   Se ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "Cd Se");
        assert!(a.is_pair());
        assert_eq!(a.atoms(), vec!["Cd", "Se"]);
    }

    #[test]
    fn single_atom_key_is_not_a_pair() {
        let key = ParamKey::new("Cd").unwrap();
        assert!(!key.is_pair());
        assert_eq!(key.atoms(), vec!["Cd"]);
    }

    #[test]
    fn invalid_keys_are_rejected() {
        assert_eq!(ParamKey::new("   "), Err(ParamError::EmptyKey));
        assert!(matches!(
            ParamKey::new("Cd Se O"),
            Err(ParamError::TooManyAtoms(_))
        ));
        assert_eq!(ParamId::new(" ", "Cd"), Err(ParamError::EmptyGroup));
    }

    #[test]
    fn param_id_displays_as_group_slash_key() {
        let id = ParamId::new("epsilon", "Se Cd").unwrap();
        assert_eq!(id.to_string(), "epsilon/Cd Se");
    }

    #[test]
    fn bounds_respect_inclusivity() {
        let bounds = Bounds {
            lower: Some(Bound::exclusive(0.0)),
            upper: Some(Bound::inclusive(1.0)),
        };
        assert!(!bounds.contains(0.0));
        assert!(bounds.contains(0.5));
        assert!(bounds.contains(1.0));
        assert!(!bounds.contains(1.5));
        assert!(!bounds.contains(f64::NAN));
    }

    #[test]
    fn intersect_keeps_tighter_limits() {
        let mut bounds = Bounds {
            lower: Some(Bound::inclusive(0.0)),
            upper: Some(Bound::inclusive(5.0)),
        };
        bounds.intersect(Bounds {
            lower: Some(Bound::exclusive(1.0)),
            upper: Some(Bound::inclusive(10.0)),
        });
        assert_eq!(bounds.lower, Some(Bound::exclusive(1.0)));
        assert_eq!(bounds.upper, Some(Bound::inclusive(5.0)));
    }

    #[test]
    fn empty_interval_is_infeasible() {
        let bounds = Bounds {
            lower: Some(Bound::exclusive(1.0)),
            upper: Some(Bound::inclusive(1.0)),
        };
        assert!(!bounds.is_feasible());
        assert!(Bounds::unbounded().is_feasible());
    }
}
