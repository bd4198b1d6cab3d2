use super::array::{Descriptor, DescriptorError};
use crate::core::models::trajectory::Trajectory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A positional or keyword argument passed to a descriptor function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ArgValue>),
}

impl ArgValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Int(i) => Some(*i as f64),
            ArgValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Int(i) => write!(f, "{}", i),
            ArgValue::Float(x) => write!(f, "{}", x),
            ArgValue::Str(s) => f.write_str(s),
            ArgValue::List(items) => {
                let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DescriptorArgs {
    pub args: Vec<ArgValue>,
    pub kwargs: BTreeMap<String, ArgValue>,
}

impl DescriptorArgs {
    pub fn kwarg(&self, key: &str) -> Option<&ArgValue> {
        self.kwargs.get(key)
    }

    /// Fetches a required string keyword argument, reporting `descriptor` on failure.
    pub fn require_str(&self, descriptor: &str, key: &str) -> Result<&str, DescriptorError> {
        self.kwarg(key)
            .and_then(ArgValue::as_str)
            .ok_or_else(|| DescriptorError::InvalidArgument {
                name: descriptor.to_string(),
                reason: format!("missing string argument '{}'", key),
            })
    }
}

pub type DescriptorFn =
    Arc<dyn Fn(&Trajectory, &DescriptorArgs) -> Result<Descriptor, DescriptorError> + Send + Sync>;

/// One named entry of the `pes` configuration block.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorSpec {
    pub name: String,
    /// Registered function name.
    pub func: String,
    pub args: Vec<ArgValue>,
    /// Either empty, one set shared by every molecule, or one set per molecule.
    pub kwargs: Vec<BTreeMap<String, ArgValue>>,
}

impl DescriptorSpec {
    pub fn args_for(&self, molecule: usize) -> DescriptorArgs {
        let kwargs = match self.kwargs.len() {
            0 => BTreeMap::new(),
            1 => self.kwargs[0].clone(),
            _ => self.kwargs.get(molecule).cloned().unwrap_or_default(),
        };
        DescriptorArgs {
            args: self.args.clone(),
            kwargs,
        }
    }

    pub fn check_molecule_count(&self, n_molecules: usize) -> Result<(), DescriptorError> {
        match self.kwargs.len() {
            0 | 1 => Ok(()),
            n if n == n_molecules => Ok(()),
            n => Err(DescriptorError::InvalidArgument {
                name: self.name.clone(),
                reason: format!(
                    "{} keyword-argument sets given for {} molecules",
                    n, n_molecules
                ),
            }),
        }
    }
}

/// Maps descriptor names used in configuration to validated functions.
#[derive(Clone, Default)]
pub struct DescriptorRegistry {
    functions: HashMap<String, DescriptorFn>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(&Trajectory, &DescriptorArgs) -> Result<Descriptor, DescriptorError>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(func));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<DescriptorFn, DescriptorError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| DescriptorError::Unregistered(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for DescriptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
