use super::parameter::{Bound, Bounds, ParamError, ParamKey};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConstraintError {
    #[error("Constraint expression is empty")]
    Empty,
    #[error("Constraint '{0}' contains no comparison operator")]
    MissingOperator(String),
    #[error("Constraint '{expr}' is malformed: {reason}")]
    Malformed { expr: String, reason: String },
    #[error("Ratio constraint '{0}' has a zero coefficient")]
    ZeroRatio(String),
    #[error("Invalid parameter key in constraint '{expr}': {source}")]
    Key {
        expr: String,
        #[source]
        source: ParamError,
    },
}

/// A parsed constraint expression over the parameters of one group.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// `target` must stay within `bounds`.
    Bounds { key: ParamKey, bounds: Bounds },
    /// `target == ratio * source` must hold after every mutation.
    Link {
        target: ParamKey,
        source: ParamKey,
        ratio: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Scaled { coef: f64, key: ParamKey },
}

/// Parses expressions such as `"Cd > 0"`, `"0.5 <= Cd Cd < 2"` or `"Cd == -2 * Se"`.
pub fn parse(expr: &str) -> Result<Constraint, ConstraintError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(ConstraintError::Empty);
    }

    let (operands, ops) = tokenize(trimmed);
    if ops.is_empty() {
        return Err(ConstraintError::MissingOperator(trimmed.to_string()));
    }

    let malformed = |reason: &str| ConstraintError::Malformed {
        expr: trimmed.to_string(),
        reason: reason.to_string(),
    };

    let operands = operands
        .iter()
        .map(|raw| parse_operand(raw, trimmed))
        .collect::<Result<Vec<_>, _>>()?;

    match (ops.as_slice(), operands.as_slice()) {
        ([Op::Eq], [lhs, rhs]) => parse_equality(lhs, rhs, trimmed),
        ([op], [Operand::Scaled { coef, key }, Operand::Number(n)]) if *coef == 1.0 => {
            Ok(Constraint::Bounds {
                key: key.clone(),
                bounds: bound_from(*op, *n, false),
            })
        }
        ([op], [Operand::Number(n), Operand::Scaled { coef, key }]) if *coef == 1.0 => {
            Ok(Constraint::Bounds {
                key: key.clone(),
                bounds: bound_from(*op, *n, true),
            })
        }
        (
            [op1, op2],
            [
                Operand::Number(a),
                Operand::Scaled { coef, key },
                Operand::Number(b),
            ],
        ) if *coef == 1.0 => {
            let ascending = matches!(op1, Op::Lt | Op::Le) && matches!(op2, Op::Lt | Op::Le);
            let descending = matches!(op1, Op::Gt | Op::Ge) && matches!(op2, Op::Gt | Op::Ge);
            if !(ascending || descending) {
                return Err(malformed("chained comparisons must point in one direction"));
            }
            let mut bounds = bound_from(*op1, *a, true);
            bounds.intersect(bound_from(*op2, *b, false));
            Ok(Constraint::Bounds {
                key: key.clone(),
                bounds,
            })
        }
        _ => Err(malformed(
            "expected 'key OP number', 'number OP key OP number' or 'key == [k *] key'",
        )),
    }
}

fn parse_equality(
    lhs: &Operand,
    rhs: &Operand,
    expr: &str,
) -> Result<Constraint, ConstraintError> {
    match (lhs, rhs) {
        (
            Operand::Scaled {
                coef: c1,
                key: target,
            },
            Operand::Scaled {
                coef: c2,
                key: source,
            },
        ) => {
            if *c1 == 0.0 || *c2 == 0.0 {
                return Err(ConstraintError::ZeroRatio(expr.to_string()));
            }
            if target == source {
                return Err(ConstraintError::Malformed {
                    expr: expr.to_string(),
                    reason: "a parameter cannot be linked to itself".to_string(),
                });
            }
            Ok(Constraint::Link {
                target: target.clone(),
                source: source.clone(),
                ratio: c2 / c1,
            })
        }
        (Operand::Scaled { coef, key }, Operand::Number(n))
        | (Operand::Number(n), Operand::Scaled { coef, key }) => {
            if *coef == 0.0 {
                return Err(ConstraintError::ZeroRatio(expr.to_string()));
            }
            let pinned = n / coef;
            Ok(Constraint::Bounds {
                key: key.clone(),
                bounds: Bounds {
                    lower: Some(Bound::inclusive(pinned)),
                    upper: Some(Bound::inclusive(pinned)),
                },
            })
        }
        _ => Err(ConstraintError::Malformed {
            expr: expr.to_string(),
            reason: "an equality needs at least one parameter".to_string(),
        }),
    }
}

/// Converts `key OP n` (or `n OP key` when `number_first`) into bounds on `key`.
fn bound_from(op: Op, n: f64, number_first: bool) -> Bounds {
    let op = if number_first { mirror(op) } else { op };
    match op {
        Op::Gt => Bounds {
            lower: Some(Bound::exclusive(n)),
            upper: None,
        },
        Op::Ge => Bounds {
            lower: Some(Bound::inclusive(n)),
            upper: None,
        },
        Op::Lt => Bounds {
            lower: None,
            upper: Some(Bound::exclusive(n)),
        },
        Op::Le => Bounds {
            lower: None,
            upper: Some(Bound::inclusive(n)),
        },
        Op::Eq => Bounds {
            lower: Some(Bound::inclusive(n)),
            upper: Some(Bound::inclusive(n)),
        },
    }
}

fn mirror(op: Op) -> Op {
    match op {
        Op::Lt => Op::Gt,
        Op::Le => Op::Ge,
        Op::Gt => Op::Lt,
        Op::Ge => Op::Le,
        Op::Eq => Op::Eq,
    }
}

fn tokenize(expr: &str) -> (Vec<String>, Vec<Op>) {
    let mut operands = Vec::new();
    let mut ops = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let next = chars.get(i + 1).copied();
        let op = match (chars[i], next) {
            ('<', Some('=')) => Some((Op::Le, 2)),
            ('>', Some('=')) => Some((Op::Ge, 2)),
            ('=', Some('=')) => Some((Op::Eq, 2)),
            ('<', _) => Some((Op::Lt, 1)),
            ('>', _) => Some((Op::Gt, 1)),
            _ => None,
        };
        match op {
            Some((op, width)) => {
                operands.push(std::mem::take(&mut current));
                ops.push(op);
                i += width;
            }
            None => {
                current.push(chars[i]);
                i += 1;
            }
        }
    }
    operands.push(current);
    (operands, ops)
}

fn parse_operand(raw: &str, expr: &str) -> Result<Operand, ConstraintError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConstraintError::Malformed {
            expr: expr.to_string(),
            reason: "missing operand".to_string(),
        });
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Ok(Operand::Number(n));
    }

    let key_err = |source| ConstraintError::Key {
        expr: expr.to_string(),
        source,
    };

    let parts: Vec<&str> = raw.split('*').map(str::trim).collect();
    match parts.as_slice() {
        [name] => {
            let (coef, name) = match name.strip_prefix('-') {
                Some(rest) => (-1.0, rest),
                None => (1.0, *name),
            };
            Ok(Operand::Scaled {
                coef,
                key: ParamKey::new(name).map_err(key_err)?,
            })
        }
        [a, b] => {
            let (coef, name) = match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(c), Err(_)) => (c, *b),
                (Err(_), Ok(c)) => (c, *a),
                _ => {
                    return Err(ConstraintError::Malformed {
                        expr: expr.to_string(),
                        reason: format!("'{}' must be a number times a parameter", raw),
                    });
                }
            };
            Ok(Operand::Scaled {
                coef,
                key: ParamKey::new(name).map_err(key_err)?,
            })
        }
        _ => Err(ConstraintError::Malformed {
            expr: expr.to_string(),
            reason: format!("'{}' has more than one multiplication", raw),
        }),
    }
}
