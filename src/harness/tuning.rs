//! Hyperparameter search with a tree-structured Parzen estimator (TPE).
//!
//! Trial 0 evaluates the configured parameters of the model being tuned.
//! The next `n_startup_trials` draw uniformly from the search space. After
//! that, completed trials are split at the `gamma` quantile of their loss
//! into a good set and a bad set. Each parameter gets two univariate
//! densities, l(x) over the good set and g(x) over the bad set, and the
//! suggestion is the best of `n_candidates` draws from l(x) ranked by
//! l(x)/g(x).
//!
//! Trials run in batches of `parallelism` on the rayon pool. Suggestions
//! for a batch are made sequentially from the history at the start of the
//! batch, so a run is reproducible for a fixed seed and parallelism.

use std::time::Instant;

use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::Serialize;
use statrs::distribution::{Continuous, ContinuousCDF, Normal as Gaussian};
use tracing::{info, warn};

use super::{cross_validate, CvOutcome, DriftContext, GroupKFold, HarnessError};
use crate::config::TuningConfig;
use crate::ml_engine::{format_params, ModelConfig, ModelSpec, ParamDomain, ParamSet, ParamValue, SearchSpace};

/// Truncated-normal redraws before falling back to clamping.
const MAX_REDRAWS: usize = 32;

// ============================================================================
// Parzen Estimator
// ============================================================================

/// Gaussian mixture over one numeric parameter, truncated to its bounds.
///
/// One component per observation plus a wide prior component centred on
/// the domain. Component widths follow the distance to the neighbouring
/// observations.
#[derive(Debug, Clone)]
struct ParzenEstimator {
    mus: Vec<f64>,
    sigmas: Vec<f64>,
    low: f64,
    high: f64,
}

impl ParzenEstimator {
    fn fit(observations: &[f64], low: f64, high: f64) -> Self {
        let range = high - low;
        let mut mus: Vec<f64> = observations.iter().copied().filter(|v| v.is_finite()).collect();
        mus.sort_by(|a, b| a.total_cmp(b));

        let min_sigma = range / (1.0 + mus.len() as f64).min(100.0);
        let mut sigmas = Vec::with_capacity(mus.len() + 1);
        for i in 0..mus.len() {
            let left = if i == 0 { mus[i] - low } else { mus[i] - mus[i - 1] };
            let right = if i + 1 == mus.len() { high - mus[i] } else { mus[i + 1] - mus[i] };
            sigmas.push(left.max(right).clamp(min_sigma, range));
        }

        mus.push(low + range / 2.0);
        sigmas.push(range);
        Self { mus, sigmas, low, high }
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        let i = rng.gen_range(0..self.mus.len());
        let Ok(normal) = Normal::new(self.mus[i], self.sigmas[i]) else {
            return self.mus[i].clamp(self.low, self.high);
        };
        let mut x = normal.sample(rng);
        for _ in 0..MAX_REDRAWS {
            if (self.low..=self.high).contains(&x) {
                return x;
            }
            x = normal.sample(rng);
        }
        x.clamp(self.low, self.high)
    }

    fn log_pdf(&self, x: f64) -> f64 {
        let mut density = 0.0;
        for (&mu, &sigma) in self.mus.iter().zip(&self.sigmas) {
            let Ok(component) = Gaussian::new(mu, sigma) else {
                continue;
            };
            let mass = component.cdf(self.high) - component.cdf(self.low);
            if mass > 0.0 {
                density += component.pdf(x) / mass;
            }
        }
        (density / self.mus.len() as f64).max(f64::MIN_POSITIVE).ln()
    }
}

// ============================================================================
// Sampler
// ============================================================================

/// Suggests parameter sets from the history of completed trials.
pub struct TpeSampler {
    space: SearchSpace,
    n_startup: usize,
    gamma: f64,
    n_candidates: usize,
    rng: StdRng,
}

impl TpeSampler {
    pub fn new(space: SearchSpace, config: &TuningConfig) -> Self {
        Self {
            space,
            n_startup: config.n_startup_trials,
            gamma: config.gamma,
            n_candidates: config.n_candidates.max(1),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// Next parameter set given `(params, loss)` of every completed trial.
    pub fn suggest(&mut self, history: &[(ParamSet, f64)]) -> ParamSet {
        let mut ranked: Vec<&(ParamSet, f64)> = history.iter().filter(|(_, loss)| loss.is_finite()).collect();
        if ranked.len() < self.n_startup.max(2) {
            return self.space.sample(&mut self.rng);
        }
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        let n_good = ((self.gamma * ranked.len() as f64).ceil() as usize).clamp(1, ranked.len() - 1);
        let (good, bad) = ranked.split_at(n_good);

        let params = self.space.params.clone();
        params
            .iter()
            .map(|(name, domain)| {
                let value = match domain {
                    ParamDomain::Categorical(choices) => self.suggest_categorical(name, choices, good, bad),
                    numeric => self.suggest_numeric(name, numeric, good, bad),
                };
                (name.clone(), value)
            })
            .collect()
    }

    fn suggest_numeric(
        &mut self,
        name: &str,
        domain: &ParamDomain,
        good: &[&(ParamSet, f64)],
        bad: &[&(ParamSet, f64)],
    ) -> ParamValue {
        let Some((low, high)) = domain.internal_bounds().filter(|(lo, hi)| hi > lo) else {
            return domain.sample(&mut self.rng);
        };
        let internal = |set: &[&(ParamSet, f64)]| -> Vec<f64> {
            set.iter()
                .filter_map(|(p, _)| p.get(name).and_then(|v| domain.to_internal(v)))
                .collect()
        };
        let l = ParzenEstimator::fit(&internal(good), low, high);
        let g = ParzenEstimator::fit(&internal(bad), low, high);

        let mut best = (f64::NEG_INFINITY, low + (high - low) / 2.0);
        for _ in 0..self.n_candidates {
            let x = l.sample(&mut self.rng);
            let score = l.log_pdf(x) - g.log_pdf(x);
            if score > best.0 {
                best = (score, x);
            }
        }
        domain
            .from_internal(best.1)
            .unwrap_or_else(|| domain.sample(&mut self.rng))
    }

    fn suggest_categorical(
        &mut self,
        name: &str,
        choices: &[String],
        good: &[&(ParamSet, f64)],
        bad: &[&(ParamSet, f64)],
    ) -> ParamValue {
        // Add-one smoothed frequencies
        let weights = |set: &[&(ParamSet, f64)]| -> Vec<f64> {
            let mut counts = vec![1.0; choices.len()];
            for (p, _) in set {
                if let Some(i) = p
                    .get(name)
                    .and_then(ParamValue::as_str)
                    .and_then(|s| choices.iter().position(|c| c == s))
                {
                    counts[i] += 1.0;
                }
            }
            let total: f64 = counts.iter().sum();
            counts.iter().map(|c| c / total).collect()
        };
        let l = weights(good);
        let g = weights(bad);
        let Ok(dist) = WeightedIndex::new(&l) else {
            return ParamDomain::Categorical(choices.to_vec()).sample(&mut self.rng);
        };

        let mut best: Option<(f64, usize)> = None;
        for _ in 0..self.n_candidates {
            let i = dist.sample(&mut self.rng);
            let score = l[i] / g[i];
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, i));
            }
        }
        let i = best.map_or(0, |(_, i)| i);
        ParamValue::Categorical(choices.get(i).cloned().unwrap_or_default())
    }
}

// ============================================================================
// Study
// ============================================================================

/// A completed trial.
#[derive(Debug, Clone, Serialize)]
pub struct Trial {
    pub number: usize,
    pub params: ParamSet,
    pub mean_rmse: f64,
    pub std_rmse: f64,
    pub folds_scored: usize,
    pub duration_secs: f64,
}

#[derive(Debug, Clone)]
pub struct TuningResult {
    pub model: String,
    /// Completed trials by trial number.
    pub trials: Vec<Trial>,
    /// `(trial number, error)` of trials that produced no score.
    pub failed: Vec<(usize, String)>,
    pub best: Trial,
    pub best_spec: ModelSpec,
}

impl TuningResult {
    /// The tuned model under its original menu name.
    pub fn best_model(&self) -> ModelConfig {
        ModelConfig {
            name: self.model.clone(),
            spec: self.best_spec.clone(),
        }
    }
}

/// Tune `base` by grouped-CV rollout RMSE.
pub fn tune(ctx: &DriftContext<'_>, base: &ModelConfig) -> Result<TuningResult, HarnessError> {
    let cfg = &ctx.config.tuning;
    // Surface an impossible split once instead of failing every trial
    GroupKFold::new(ctx.config.cv.n_splits).split(&ctx.group_sizes())?;

    let mut sampler = TpeSampler::new(base.spec.search_space(), cfg);
    let batch_size = cfg.parallelism.max(1);
    info!(
        model = %base.name,
        trials = cfg.n_trials,
        params = sampler.space().len(),
        batch = batch_size,
        "Starting hyperparameter search"
    );

    let mut trials: Vec<Trial> = Vec::with_capacity(cfg.n_trials);
    let mut failed = Vec::new();
    let mut next = 0;

    while next < cfg.n_trials {
        let size = batch_size.min(cfg.n_trials - next);
        let history: Vec<(ParamSet, f64)> = trials.iter().map(|t| (t.params.clone(), t.mean_rmse)).collect();
        let proposals: Vec<(usize, ParamSet)> = (next..next + size)
            .map(|number| {
                let params = if number == 0 {
                    base.spec.params()
                } else {
                    sampler.suggest(&history)
                };
                (number, params)
            })
            .collect();

        let results: Vec<(usize, ParamSet, f64, Result<CvOutcome, HarnessError>)> = proposals
            .into_par_iter()
            .map(|(number, params)| {
                let started = Instant::now();
                let label = format!("{}#{number}", base.name);
                let outcome = base
                    .spec
                    .with_params(&params)
                    .map_err(HarnessError::from)
                    .and_then(|spec| cross_validate(ctx, &label, &spec, cfg.seed, false));
                (number, params, started.elapsed().as_secs_f64(), outcome)
            })
            .collect();

        for (number, params, duration_secs, outcome) in results {
            match outcome {
                Ok(o) => {
                    let trial = Trial {
                        number,
                        params,
                        mean_rmse: o.mean_rmse(),
                        std_rmse: o.std_rmse(),
                        folds_scored: o.folds.len(),
                        duration_secs,
                    };
                    info!(
                        trial = number,
                        mean_rmse = trial.mean_rmse,
                        params = %format_params(&trial.params),
                        "Trial complete"
                    );
                    trials.push(trial);
                }
                Err(e) => {
                    warn!(trial = number, params = %format_params(&params), error = %e, "Trial failed");
                    failed.push((number, e.to_string()));
                }
            }
        }
        next += size;
    }

    let best = trials
        .iter()
        .min_by(|a, b| a.mean_rmse.total_cmp(&b.mean_rmse).then(a.number.cmp(&b.number)))
        .cloned()
        .ok_or(HarnessError::NoSuccessfulTrials)?;
    let best_spec = base.spec.with_params(&best.params)?;
    info!(
        model = %base.name,
        trial = best.number,
        mean_rmse = best.mean_rmse,
        failed = failed.len(),
        params = %format_params(&best.params),
        "Hyperparameter search complete"
    );

    Ok(TuningResult {
        model: base.name.clone(),
        trials,
        failed,
        best,
        best_spec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriftConfig;
    use crate::harness::test_support::steady_drift_table;
    use crate::ml_engine::KnnWeighting;
    use crate::reanalysis::FieldSet;

    fn tuning_config(n_startup: usize) -> TuningConfig {
        TuningConfig {
            n_startup_trials: n_startup,
            seed: 11,
            ..TuningConfig::default()
        }
    }

    fn float_space() -> SearchSpace {
        SearchSpace {
            params: vec![("x".to_string(), ParamDomain::Float { low: 0.0, high: 10.0, log: false })],
        }
    }

    fn x_of(p: &ParamSet) -> f64 {
        p["x"].as_f64().unwrap()
    }

    #[test]
    fn test_startup_is_uniform_and_seeded() {
        let cfg = tuning_config(10);
        let mut a = TpeSampler::new(float_space(), &cfg);
        let mut b = TpeSampler::new(float_space(), &cfg);
        for _ in 0..5 {
            let p = a.suggest(&[]);
            assert_eq!(p, b.suggest(&[]));
            assert!((0.0..=10.0).contains(&x_of(&p)));
        }
    }

    #[test]
    fn test_parzen_stage_concentrates_near_good_region() {
        let cfg = tuning_config(5);
        let mut sampler = TpeSampler::new(float_space(), &cfg);
        let mut rng = StdRng::seed_from_u64(3);
        let history: Vec<(ParamSet, f64)> = (0..30)
            .map(|_| {
                let p = float_space().sample(&mut rng);
                let loss = (x_of(&p) - 2.0).powi(2);
                (p, loss)
            })
            .collect();

        let suggestions: Vec<f64> = (0..20).map(|_| x_of(&sampler.suggest(&history))).collect();
        let mean_gap = suggestions.iter().map(|x| (x - 2.0).abs()).sum::<f64>() / suggestions.len() as f64;
        assert!(mean_gap < 2.0, "mean |x - 2| = {mean_gap}");
        assert!(suggestions.iter().all(|x| (0.0..=10.0).contains(x)));
    }

    #[test]
    fn test_categorical_prefers_good_choice() {
        let space = SearchSpace {
            params: vec![(
                "weighting".to_string(),
                ParamDomain::Categorical(vec!["uniform".to_string(), "distance".to_string()]),
            )],
        };
        let mut sampler = TpeSampler::new(space, &tuning_config(5));
        let history: Vec<(ParamSet, f64)> = (0..20)
            .map(|i| {
                let (choice, loss) = if i % 2 == 0 { ("distance", 0.1) } else { ("uniform", 1.0) };
                let mut p = ParamSet::new();
                p.insert("weighting".to_string(), ParamValue::Categorical(choice.to_string()));
                (p, loss)
            })
            .collect();
        for _ in 0..20 {
            assert_eq!(sampler.suggest(&history)["weighting"].as_str(), Some("distance"));
        }
    }

    #[test]
    fn test_parzen_density_integrates_inside_bounds() {
        let est = ParzenEstimator::fit(&[1.0, 2.0, 2.5], 0.0, 4.0);
        let n = 4000;
        let h = 4.0 / n as f64;
        let area: f64 = (0..n).map(|i| est.log_pdf((i as f64 + 0.5) * h).exp() * h).sum();
        assert!((area - 1.0).abs() < 1e-3, "area = {area}");
    }

    #[test]
    fn test_tune_runs_all_trials_deterministically() {
        let fields = FieldSet::empty();
        let table = steady_drift_table(6, 6);
        let mut cfg = DriftConfig::default();
        cfg.cv.n_splits = 3;
        cfg.tuning = TuningConfig {
            n_trials: 6,
            n_startup_trials: 3,
            parallelism: 2,
            ..TuningConfig::default()
        };
        let ctx = DriftContext::new(&fields, &table, &cfg);
        let base = ModelConfig {
            name: "knn".to_string(),
            spec: ModelSpec::Knn {
                k: 2,
                weighting: KnnWeighting::Uniform,
            },
        };

        let first = tune(&ctx, &base).unwrap();
        assert_eq!(first.trials.len(), 6);
        assert!(first.failed.is_empty());
        assert_eq!(first.trials[0].params, base.spec.params());
        let min = first.trials.iter().map(|t| t.mean_rmse).fold(f64::INFINITY, f64::min);
        assert_eq!(first.best.mean_rmse, min);
        assert_eq!(first.best_model().name, "knn");

        let second = tune(&ctx, &base).unwrap();
        let params = |r: &TuningResult| r.trials.iter().map(|t| t.params.clone()).collect::<Vec<_>>();
        assert_eq!(params(&first), params(&second));
    }

    #[test]
    fn test_tune_rejects_impossible_split() {
        let fields = FieldSet::empty();
        let table = steady_drift_table(2, 4);
        let cfg = DriftConfig::default();
        let ctx = DriftContext::new(&fields, &table, &cfg);
        let base = ModelConfig {
            name: "ridge".to_string(),
            spec: ModelSpec::Ridge { alpha: 1.0 },
        };
        assert!(matches!(tune(&ctx, &base), Err(HarnessError::Cv(_))));
    }
}
