use super::constraints::{self, Constraint, ConstraintError};
use super::parameter::{ParamError, ParamId, ParamKey, Parameter};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

const LINK_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ParamSetError {
    #[error(transparent)]
    Param(#[from] ParamError),

    #[error("Invalid constraint in group '{group}': {source}")]
    Constraint {
        group: String,
        #[source]
        source: ConstraintError,
    },

    #[error("Parameter group '{0}' is declared more than once")]
    DuplicateGroup(String),

    #[error("Parameter group '{0}' has not been declared")]
    UnknownGroup(String),

    #[error("Parameter '{0}' is declared more than once")]
    DuplicateParameter(ParamId),

    #[error("Constraint '{expr}' refers to unknown parameter '{key}' in group '{group}'")]
    UnknownParameter {
        group: String,
        key: ParamKey,
        expr: String,
    },

    #[error("Constraint '{expr}' in group '{group}' contradicts an earlier ratio constraint")]
    ConflictingLinks { group: String, expr: String },

    #[error("Parameter '{id}' = {found} is inconsistent with its ratio constraint (expected {expected})")]
    InconsistentLink {
        id: ParamId,
        expected: f64,
        found: f64,
    },

    #[error("Parameter '{id}' = {value} lies outside its bounds {bounds}")]
    OutOfBounds {
        id: ParamId,
        value: f64,
        bounds: String,
    },

    #[error("Bounds {bounds} of parameter '{id}' admit no value")]
    InfeasibleBounds { id: ParamId, bounds: String },

    #[error("Parameter '{0}' is linked to both frozen and optimizable parameters")]
    FrozenLink(ParamId),

    #[error("Parameter '{0}' has a non-finite value")]
    NonFiniteValue(ParamId),

    #[error("Expected {expected} parameter values, found {found}")]
    ShapeMismatch { expected: usize, found: usize },
}

/// Metadata shared by every parameter of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMeta {
    pub name: String,
    /// Hierarchical path into the simulation input where this group's values live.
    pub keys: Vec<String>,
    pub unit: Option<String>,
    /// Relative importance when selecting a parameter to move.
    pub weight: f64,
}

impl GroupMeta {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keys: Vec::new(),
            unit: None,
            weight: 1.0,
        }
    }
}

/// `value == ratio * value[root]`; unlinked parameters are their own root with ratio 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub root: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    groups: Vec<GroupMeta>,
    params: Vec<Parameter>,
    group_of: Vec<usize>,
    links: Vec<Link>,
    index: HashMap<ParamId, usize>,
}

impl ParameterSet {
    pub fn builder() -> ParameterSetBuilder {
        ParameterSetBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Parameter> {
        self.params.get(idx)
    }

    pub fn find(&self, id: &ParamId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn value_of(&self, group: &str, key: &str) -> Option<f64> {
        let id = ParamId::new(group, key).ok()?;
        self.find(&id).map(|idx| self.params[idx].value)
    }

    pub fn groups(&self) -> &[GroupMeta] {
        &self.groups
    }

    pub fn group_of(&self, idx: usize) -> &GroupMeta {
        &self.groups[self.group_of[idx]]
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    /// Column labels in parameter order, e.g. `"epsilon/Cd Se"`.
    pub fn column_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.id.to_string()).collect()
    }

    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.params.len())
            .filter(|&i| !self.params[i].frozen)
            .collect()
    }

    pub fn selection_weight(&self, idx: usize) -> f64 {
        self.group_of(idx).weight
    }

    pub fn link(&self, idx: usize) -> Link {
        self.links[idx]
    }

    /// Every parameter sharing a ratio constraint with `idx`, including `idx` itself.
    pub fn linked_indices(&self, idx: usize) -> Vec<usize> {
        let root = self.links[idx].root;
        (0..self.params.len())
            .filter(|&i| self.links[i].root == root)
            .collect()
    }

    /// Sets `idx` to `value` and rescales every linked parameter so that all ratio constraints
    /// keep holding. Returns the indices that were written.
    pub fn set_linked(&mut self, idx: usize, value: f64) -> Vec<usize> {
        let Link { root, ratio } = self.links[idx];
        let root_value = value / ratio;
        let members = self.linked_indices(idx);
        for &m in &members {
            self.params[m].value = if m == idx {
                value
            } else {
                self.links[m].ratio * root_value
            };
        }
        debug_assert!(members.contains(&root));
        members
    }

    /// Returns the first parameter among `indices` that violates its bounds.
    pub fn first_violation(&self, indices: &[usize]) -> Option<(&ParamId, f64)> {
        indices
            .iter()
            .map(|&i| &self.params[i])
            .find(|p| !p.bounds.contains(p.value))
            .map(|p| (&p.id, p.value))
    }

    /// Overwrites all values at once, e.g. when restoring a persisted state.
    pub fn assign_values(&mut self, values: &[f64]) -> Result<(), ParamSetError> {
        if values.len() != self.params.len() {
            return Err(ParamSetError::ShapeMismatch {
                expected: self.params.len(),
                found: values.len(),
            });
        }
        for (param, &value) in self.params.iter_mut().zip(values) {
            param.value = value;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ParameterSetBuilder {
    groups: Vec<GroupMeta>,
    params: Vec<Parameter>,
    group_of: Vec<usize>,
    index: HashMap<ParamId, usize>,
    constraints: Vec<(usize, String)>,
}

impl ParameterSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, meta: GroupMeta) -> Result<Self, ParamSetError> {
        if self.groups.iter().any(|g| g.name == meta.name) {
            return Err(ParamSetError::DuplicateGroup(meta.name));
        }
        self.groups.push(meta);
        Ok(self)
    }

    pub fn parameter(
        mut self,
        group: &str,
        key: &str,
        value: f64,
        frozen: bool,
    ) -> Result<Self, ParamSetError> {
        let group_idx = self.group_index(group)?;
        let id = ParamId::new(group, key)?;
        if !value.is_finite() {
            return Err(ParamSetError::NonFiniteValue(id));
        }
        if self.index.contains_key(&id) {
            return Err(ParamSetError::DuplicateParameter(id));
        }
        let mut param = Parameter::new(id.clone(), value);
        param.frozen = frozen;
        self.index.insert(id, self.params.len());
        self.params.push(param);
        self.group_of.push(group_idx);
        Ok(self)
    }

    pub fn constraint(mut self, group: &str, expr: &str) -> Result<Self, ParamSetError> {
        let group_idx = self.group_index(group)?;
        self.constraints.push((group_idx, expr.to_string()));
        Ok(self)
    }

    fn group_index(&self, group: &str) -> Result<usize, ParamSetError> {
        self.groups
            .iter()
            .position(|g| g.name == group.trim())
            .ok_or_else(|| ParamSetError::UnknownGroup(group.to_string()))
    }

    pub fn build(mut self) -> Result<ParameterSet, ParamSetError> {
        let n = self.params.len();
        let mut parent: Vec<usize> = (0..n).collect();
        let mut factor = vec![1.0; n];

        for (group_idx, expr) in &self.constraints {
            let group = self.groups[*group_idx].name.clone();
            let parsed =
                constraints::parse(expr).map_err(|source| ParamSetError::Constraint {
                    group: group.clone(),
                    source,
                })?;
            let resolve = |key: &ParamKey| {
                self.index
                    .get(&ParamId {
                        group: group.clone(),
                        key: key.clone(),
                    })
                    .copied()
                    .ok_or_else(|| ParamSetError::UnknownParameter {
                        group: group.clone(),
                        key: key.clone(),
                        expr: expr.clone(),
                    })
            };

            match parsed {
                Constraint::Bounds { key, bounds } => {
                    let idx = resolve(&key)?;
                    self.params[idx].bounds.intersect(bounds);
                }
                Constraint::Link {
                    target,
                    source,
                    ratio,
                } => {
                    let t = resolve(&target)?;
                    let s = resolve(&source)?;
                    let (rt, a) = find_root(&mut parent, &mut factor, t);
                    let (rs, b) = find_root(&mut parent, &mut factor, s);
                    if rt == rs {
                        if !approx_eq(a, ratio * b) {
                            return Err(ParamSetError::ConflictingLinks {
                                group,
                                expr: expr.clone(),
                            });
                        }
                    } else {
                        parent[rt] = rs;
                        factor[rt] = ratio * b / a;
                    }
                }
            }
        }

        let links: Vec<Link> = (0..n)
            .map(|i| {
                let (root, ratio) = find_root(&mut parent, &mut factor, i);
                Link { root, ratio }
            })
            .collect();

        for param in &mut self.params {
            if let (Some(lo), Some(hi)) = (param.bounds.lower, param.bounds.upper) {
                if lo.value == hi.value && lo.inclusive && hi.inclusive && !param.frozen {
                    debug!(parameter = %param.id, "Pinned by an equality constraint; freezing.");
                    param.frozen = true;
                }
            }
        }

        for (i, param) in self.params.iter().enumerate() {
            if !param.bounds.is_feasible() {
                return Err(ParamSetError::InfeasibleBounds {
                    id: param.id.clone(),
                    bounds: param.bounds.to_string(),
                });
            }
            if !param.bounds.contains(param.value) {
                return Err(ParamSetError::OutOfBounds {
                    id: param.id.clone(),
                    value: param.value,
                    bounds: param.bounds.to_string(),
                });
            }
            let Link { root, ratio } = links[i];
            let root_param = &self.params[root];
            if root_param.frozen != param.frozen {
                return Err(ParamSetError::FrozenLink(param.id.clone()));
            }
            let expected = ratio * root_param.value;
            if !approx_eq(param.value, expected) {
                return Err(ParamSetError::InconsistentLink {
                    id: param.id.clone(),
                    expected,
                    found: param.value,
                });
            }
        }

        Ok(ParameterSet {
            groups: self.groups,
            params: self.params,
            group_of: self.group_of,
            links,
            index: self.index,
        })
    }
}

fn find_root(parent: &mut [usize], factor: &mut [f64], i: usize) -> (usize, f64) {
    if parent[i] == i {
        return (i, 1.0);
    }
    let (root, f) = find_root(parent, factor, parent[i]);
    factor[i] *= f;
    parent[i] = root;
    (root, factor[i])
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= LINK_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge_set(constraints: &[&str], cd: f64, se: f64, o: f64) -> Result<ParameterSet, ParamSetError> {
        let mut builder = ParameterSet::builder()
            .group(GroupMeta::new("charge"))?
            .parameter("charge", "Cd", cd, false)?
            .parameter("charge", "Se", se, false)?
            .parameter("charge", "O", o, false)?;
        for expr in constraints {
            builder = builder.constraint("charge", expr)?;
        }
        builder.build()
    }

    #[test]
    fn builds_unconstrained_set_in_declaration_order() {
        let set = charge_set(&[], 0.9, -0.9, -0.5).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.values(), vec![0.9, -0.9, -0.5]);
        assert_eq!(
            set.column_names(),
            vec!["charge/Cd", "charge/Se", "charge/O"]
        );
        assert_eq!(set.free_indices(), vec![0, 1, 2]);
        assert_eq!(set.value_of("charge", "Se"), Some(-0.9));
    }

    #[test]
    fn linked_parameters_move_together() {
        let mut set = charge_set(&["Cd == -1 * Se", "O == 0.5 * Se"], 1.0, -1.0, -0.5).unwrap();
        assert_eq!(set.linked_indices(0), vec![0, 1, 2]);

        let written = set.set_linked(1, -1.2);
        assert_eq!(written, vec![0, 1, 2]);
        assert!((set.values()[0] - 1.2).abs() < 1e-12);
        assert_eq!(set.values()[1], -1.2);
        assert!((set.values()[2] + 0.6).abs() < 1e-12);
    }

    #[test]
    fn inconsistent_initial_link_is_rejected() {
        let result = charge_set(&["Cd == -2 * Se"], 1.0, -1.0, -0.5);
        assert!(matches!(
            result,
            Err(ParamSetError::InconsistentLink { .. })
        ));
    }

    #[test]
    fn contradictory_links_are_rejected() {
        let result = charge_set(
            &["Cd == -1 * Se", "O == 0.5 * Se", "O == Cd"],
            1.0,
            -1.0,
            -0.5,
        );
        assert!(matches!(
            result,
            Err(ParamSetError::ConflictingLinks { .. })
        ));
    }

    #[test]
    fn bounds_are_attached_and_checked() {
        let mut set = charge_set(&["0 < Cd < 2"], 1.0, -1.0, -0.5).unwrap();
        assert!(set.first_violation(&[0]).is_none());
        set.set_linked(0, 2.5);
        let (id, value) = set.first_violation(&[0, 1, 2]).unwrap();
        assert_eq!(id.to_string(), "charge/Cd");
        assert_eq!(value, 2.5);
    }

    #[test]
    fn initial_value_outside_bounds_is_rejected() {
        let result = charge_set(&["Cd > 1.5"], 1.0, -1.0, -0.5);
        assert!(matches!(result, Err(ParamSetError::OutOfBounds { .. })));
    }

    #[test]
    fn empty_bound_interval_is_rejected() {
        let result = charge_set(&["Cd > 2", "Cd < 1"], 1.0, -1.0, -0.5);
        assert!(matches!(
            result,
            Err(ParamSetError::InfeasibleBounds { .. })
        ));
    }

    #[test]
    fn constraint_on_unknown_key_is_rejected() {
        let result = charge_set(&["Zn > 0"], 1.0, -1.0, -0.5);
        assert!(matches!(
            result,
            Err(ParamSetError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn pinned_parameter_becomes_frozen() {
        let set = charge_set(&["O == -0.5"], 1.0, -1.0, -0.5).unwrap();
        assert_eq!(set.free_indices(), vec![0, 1]);
    }

    #[test]
    fn linking_frozen_and_free_parameters_is_rejected() {
        let result = ParameterSet::builder()
            .group(GroupMeta::new("charge"))
            .and_then(|b| b.parameter("charge", "Cd", 1.0, true))
            .and_then(|b| b.parameter("charge", "Se", -1.0, false))
            .and_then(|b| b.constraint("charge", "Cd == -1 * Se"))
            .and_then(|b| b.build());
        assert!(matches!(result, Err(ParamSetError::FrozenLink(_))));
    }

    #[test]
    fn duplicate_symmetric_pair_is_rejected() {
        let result = ParameterSet::builder()
            .group(GroupMeta::new("epsilon"))
            .and_then(|b| b.parameter("epsilon", "Cd Se", 0.1, false))
            .and_then(|b| b.parameter("epsilon", "Se Cd", 0.2, false));
        assert!(matches!(
            result,
            Err(ParamSetError::DuplicateParameter(_))
        ));
    }

    #[test]
    fn assign_values_checks_shape() {
        let mut set = charge_set(&[], 1.0, -1.0, -0.5).unwrap();
        assert!(set.assign_values(&[0.1, 0.2, 0.3]).is_ok());
        assert_eq!(set.values(), vec![0.1, 0.2, 0.3]);
        assert_eq!(
            set.assign_values(&[0.1]),
            Err(ParamSetError::ShapeMismatch {
                expected: 3,
                found: 1
            })
        );
    }
}
