//! Hyperparameter domains per model family.
//!
//! Numeric domains are explored in an "internal" coordinate (the log of the
//! value for log-scaled domains) where the tuner fits its Parzen estimators.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{KnnWeighting, ModelError, ModelSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum ParamDomain {
    Int { low: i64, high: i64, log: bool },
    Float { low: f64, high: f64, log: bool },
    Categorical(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Categorical(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Categorical(s) => write!(f, "{s}"),
        }
    }
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Categorical(_) => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) => usize::try_from(*v).ok(),
            ParamValue::Float(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as usize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Categorical(s) => Some(s),
            _ => None,
        }
    }
}

/// Named parameter values, ordered by name.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Render a parameter set as `a=1 b=0.5`.
pub fn format_params(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl ParamDomain {
    /// Bounds in internal coordinates; `None` for categorical domains.
    pub fn internal_bounds(&self) -> Option<(f64, f64)> {
        match *self {
            ParamDomain::Int { low, high, log } => Some(if log {
                ((low.max(1) as f64).ln(), (high.max(1) as f64).ln())
            } else {
                // Widen by half a step so rounding gives edge values a fair share
                (low as f64 - 0.5, high as f64 + 0.5)
            }),
            ParamDomain::Float { low, high, log } => Some(if log { (low.ln(), high.ln()) } else { (low, high) }),
            ParamDomain::Categorical(_) => None,
        }
    }

    /// Internal coordinate of a value in this domain.
    pub fn to_internal(&self, value: &ParamValue) -> Option<f64> {
        let v = value.as_f64()?;
        match *self {
            ParamDomain::Int { log: true, .. } | ParamDomain::Float { log: true, .. } => Some(v.max(f64::MIN_POSITIVE).ln()),
            ParamDomain::Int { .. } | ParamDomain::Float { .. } => Some(v),
            ParamDomain::Categorical(_) => None,
        }
    }

    /// Value for an internal coordinate, clamped and rounded into the domain.
    pub fn from_internal(&self, x: f64) -> Option<ParamValue> {
        match *self {
            ParamDomain::Int { low, high, log } => {
                let v = if log { x.exp() } else { x };
                Some(ParamValue::Int((v.round() as i64).clamp(low, high)))
            }
            ParamDomain::Float { low, high, log } => {
                let v = if log { x.exp() } else { x };
                Some(ParamValue::Float(v.clamp(low, high)))
            }
            ParamDomain::Categorical(_) => None,
        }
    }

    /// Uniform draw (uniform in log space for log domains).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamValue {
        match self {
            ParamDomain::Categorical(choices) => {
                let i = rng.gen_range(0..choices.len().max(1));
                ParamValue::Categorical(choices.get(i).cloned().unwrap_or_default())
            }
            numeric => {
                let (lo, hi) = numeric.internal_bounds().unwrap_or((0.0, 1.0));
                let x = if hi > lo { rng.gen_range(lo..hi) } else { lo };
                numeric.from_internal(x).unwrap_or(ParamValue::Float(x))
            }
        }
    }

    pub fn contains(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (ParamDomain::Int { low, high, .. }, ParamValue::Int(v)) => (low..=high).contains(&v),
            (ParamDomain::Float { low, high, .. }, ParamValue::Float(v)) => (*low..=*high).contains(v),
            (ParamDomain::Categorical(c), ParamValue::Categorical(s)) => c.contains(s),
            _ => false,
        }
    }
}

/// Ordered list of named domains.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchSpace {
    pub params: Vec<(String, ParamDomain)>,
}

impl SearchSpace {
    fn with(mut self, name: &str, domain: ParamDomain) -> Self {
        self.params.push((name.to_string(), domain));
        self
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Independent uniform draw of every parameter.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamSet {
        self.params
            .iter()
            .map(|(name, domain)| (name.clone(), domain.sample(rng)))
            .collect()
    }
}

fn int(low: i64, high: i64) -> ParamDomain {
    ParamDomain::Int { low, high, log: false }
}

fn float(low: f64, high: f64, log: bool) -> ParamDomain {
    ParamDomain::Float { low, high, log }
}

impl ModelSpec {
    /// Tunable domains for this family.
    pub fn search_space(&self) -> SearchSpace {
        let space = SearchSpace::default();
        match self {
            ModelSpec::Ridge { .. } => space.with("alpha", float(1e-4, 1e3, true)),
            ModelSpec::Knn { .. } => space.with("k", int(1, 50)).with(
                "weighting",
                ParamDomain::Categorical(vec!["uniform".to_string(), "distance".to_string()]),
            ),
            ModelSpec::RandomForest { .. } => space
                .with("n_trees", ParamDomain::Int { low: 20, high: 300, log: true })
                .with("max_depth", int(3, 20))
                .with("min_samples_leaf", int(1, 20))
                .with("max_features", float(0.2, 1.0, false)),
            ModelSpec::GradientBoosting { .. } => space
                .with("n_estimators", ParamDomain::Int { low: 50, high: 500, log: true })
                .with("learning_rate", float(0.01, 0.3, true))
                .with("max_depth", int(2, 8))
                .with("min_samples_leaf", int(1, 30))
                .with("subsample", float(0.5, 1.0, false)),
        }
    }

    /// Current hyperparameters as a parameter set.
    pub fn params(&self) -> ParamSet {
        let mut p = ParamSet::new();
        let mut put = |k: &str, v: ParamValue| {
            p.insert(k.to_string(), v);
        };
        match *self {
            ModelSpec::Ridge { alpha } => put("alpha", ParamValue::Float(alpha)),
            ModelSpec::Knn { k, weighting } => {
                put("k", ParamValue::Int(k as i64));
                put("weighting", ParamValue::Categorical(weighting.as_str().to_string()));
            }
            ModelSpec::RandomForest {
                n_trees,
                max_depth,
                min_samples_leaf,
                max_features,
            } => {
                put("n_trees", ParamValue::Int(n_trees as i64));
                put("max_depth", ParamValue::Int(max_depth as i64));
                put("min_samples_leaf", ParamValue::Int(min_samples_leaf as i64));
                put("max_features", ParamValue::Float(max_features));
            }
            ModelSpec::GradientBoosting {
                n_estimators,
                learning_rate,
                max_depth,
                min_samples_leaf,
                subsample,
            } => {
                put("n_estimators", ParamValue::Int(n_estimators as i64));
                put("learning_rate", ParamValue::Float(learning_rate));
                put("max_depth", ParamValue::Int(max_depth as i64));
                put("min_samples_leaf", ParamValue::Int(min_samples_leaf as i64));
                put("subsample", ParamValue::Float(subsample));
            }
        }
        p
    }

    /// Same family with parameters overridden from `params`.
    ///
    /// Names missing from `params` keep their current value; unknown names
    /// and wrongly typed values are errors.
    pub fn with_params(&self, params: &ParamSet) -> Result<ModelSpec, ModelError> {
        let own = self.params();
        if let Some(unknown) = params.keys().find(|k| !own.contains_key(*k)) {
            return Err(ModelError::InvalidParams(format!(
                "'{unknown}' is not a {} parameter",
                self.kind()
            )));
        }
        let get = |name: &str| params.get(name).or_else(|| own.get(name));
        let bad = |name: &str| ModelError::InvalidParams(format!("bad value for '{name}'"));
        let usize_of = |name: &str| get(name).and_then(ParamValue::as_usize).ok_or_else(|| bad(name));
        let f64_of = |name: &str| get(name).and_then(ParamValue::as_f64).ok_or_else(|| bad(name));

        let spec = match self {
            ModelSpec::Ridge { .. } => ModelSpec::Ridge { alpha: f64_of("alpha")? },
            ModelSpec::Knn { .. } => ModelSpec::Knn {
                k: usize_of("k")?,
                weighting: get("weighting")
                    .and_then(ParamValue::as_str)
                    .and_then(KnnWeighting::parse)
                    .ok_or_else(|| bad("weighting"))?,
            },
            ModelSpec::RandomForest { .. } => ModelSpec::RandomForest {
                n_trees: usize_of("n_trees")?,
                max_depth: usize_of("max_depth")?,
                min_samples_leaf: usize_of("min_samples_leaf")?,
                max_features: f64_of("max_features")?,
            },
            ModelSpec::GradientBoosting { .. } => ModelSpec::GradientBoosting {
                n_estimators: usize_of("n_estimators")?,
                learning_rate: f64_of("learning_rate")?,
                max_depth: usize_of("max_depth")?,
                min_samples_leaf: usize_of("min_samples_leaf")?,
                subsample: f64_of("subsample")?,
            },
        };
        Ok(spec)
    }
}
