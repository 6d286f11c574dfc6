use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::Value;

/// Compiled rule expression.
///
/// A parameter bound to several points satisfies a leaf when any of its
/// points does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    IsTrue {
        param: String,
    },
    Compare {
        param: String,
        cmp: CmpOp,
        threshold: Value,
    },
    All {
        of: Vec<Condition>,
    },
    Any {
        of: Vec<Condition>,
    },
    Not {
        of: Box<Condition>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    /// `None` when the operands cannot be compared.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Option<bool> {
        if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
            return Some(match self {
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
            });
        }
        match (self, lhs, rhs) {
            (CmpOp::Eq, Value::Text(a), Value::Text(b)) => Some(a == b),
            (CmpOp::Ne, Value::Text(a), Value::Text(b)) => Some(a != b),
            _ => None,
        }
    }
}

/// Latest value of every point, grouped by parameter:
/// `param → [(point_id, value)]`.
pub type LatestValues<'a> = BTreeMap<&'a str, Vec<(&'a str, &'a Value)>>;

/// A leaf saw a value it cannot interpret.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub param: String,
    pub point_id: Option<String>,
    pub value: Option<Value>,
}

impl Condition {
    pub fn eval(&self, latest: &LatestValues<'_>) -> Result<bool, Mismatch> {
        match self {
            Condition::IsTrue { param } => any_point(latest, param, |v| v.as_bool()),
            Condition::Compare {
                param,
                cmp,
                threshold,
            } => any_point(latest, param, |v| cmp.apply(v, threshold)),
            Condition::All { of } => {
                for c in of {
                    if !c.eval(latest)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any { of } => {
                for c in of {
                    if c.eval(latest)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { of } => Ok(!of.eval(latest)?),
        }
    }

    /// Parameter names referenced anywhere in the tree.
    pub fn parameters(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_parameters(&mut out);
        out
    }

    fn collect_parameters<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Condition::IsTrue { param } | Condition::Compare { param, .. } => {
                out.insert(param);
            }
            Condition::All { of } | Condition::Any { of } => {
                for c in of {
                    c.collect_parameters(out);
                }
            }
            Condition::Not { of } => of.collect_parameters(out),
        }
    }
}

fn any_point(
    latest: &LatestValues<'_>,
    param: &str,
    test: impl Fn(&Value) -> Option<bool>,
) -> Result<bool, Mismatch> {
    let Some(points) = latest.get(param) else {
        return Err(Mismatch {
            param: param.to_string(),
            point_id: None,
            value: None,
        });
    };
    let mut hit = false;
    for (point_id, value) in points {
        match test(value) {
            Some(true) => hit = true,
            Some(false) => {}
            None => {
                return Err(Mismatch {
                    param: param.to_string(),
                    point_id: Some(point_id.to_string()),
                    value: Some((*value).clone()),
                });
            }
        }
    }
    Ok(hit)
}
