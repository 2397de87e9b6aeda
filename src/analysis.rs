use crate::engine::SeirdCounts;
use crate::metrics::EpidemicMetrics;
use crate::model::Compartment;
use crate::stats::Accumulator;
use crate::transform::{DangerLevel, RiskAssessment};
use anyhow::{Context, Result};
use std::{fs::File, io::BufWriter, path::Path};

/// Final results of one simulation run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub seed: u64,
    pub metrics: EpidemicMetrics,
    pub risk: RiskAssessment,
    pub counts: SeirdCounts,
}

pub trait Obs {
    fn update(&mut self, run: &RunOutcome);
    fn report(&self) -> serde_json::Value;
}

/// Mean and spread of one scalar metric.
pub struct MetricObs {
    name: &'static str,
    extract: fn(&RunOutcome) -> Option<f64>,
    acc: Accumulator,
}

impl MetricObs {
    pub fn new(name: &'static str, extract: fn(&RunOutcome) -> Option<f64>) -> Self {
        Self {
            name,
            extract,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for MetricObs {
    fn update(&mut self, run: &RunOutcome) {
        // Runs that never doubled have no doubling time and are skipped.
        if let Some(val) = (self.extract)(run) {
            self.acc.add(val);
        }
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ (self.name): self.acc.report() })
    }
}

/// Fraction of runs ending at each danger level.
pub struct ProbDanger {
    acc_vec: Vec<Accumulator>,
}

impl ProbDanger {
    pub fn new() -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(DangerLevel::ALL.len(), Accumulator::new);
        Self { acc_vec }
    }
}

impl Obs for ProbDanger {
    fn update(&mut self, run: &RunOutcome) {
        for (level, acc) in DangerLevel::ALL.iter().zip(&mut self.acc_vec) {
            acc.add(if *level == run.risk.danger_level { 1.0 } else { 0.0 });
        }
    }

    fn report(&self) -> serde_json::Value {
        let reports: serde_json::Map<_, _> = DangerLevel::ALL
            .iter()
            .zip(&self.acc_vec)
            .map(|(level, acc)| (level.to_string(), serde_json::json!(acc.report())))
            .collect();
        serde_json::json!({ "prob_danger_level": reports })
    }
}

/// Average final fraction of the population in each compartment.
pub struct FinalFractions {
    acc_vec: Vec<Accumulator>,
}

impl FinalFractions {
    pub fn new() -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(Compartment::ALL.len(), Accumulator::new);
        Self { acc_vec }
    }
}

impl Obs for FinalFractions {
    fn update(&mut self, run: &RunOutcome) {
        let total = run.counts.total();
        if total == 0 {
            return;
        }
        for (state, acc) in Compartment::ALL.iter().zip(&mut self.acc_vec) {
            acc.add(run.counts.get(*state) as f64 / total as f64);
        }
    }

    fn report(&self) -> serde_json::Value {
        let reports: serde_json::Map<_, _> = Compartment::ALL
            .iter()
            .zip(&self.acc_vec)
            .map(|(state, acc)| (state.letter().to_string(), serde_json::json!(acc.report())))
            .collect();
        serde_json::json!({ "final_fraction": reports })
    }
}

/// Aggregates the outcomes of repeated runs of one configuration.
pub struct Analyzer {
    seeds: Vec<u64>,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new() -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(MetricObs::new("r0", |run| Some(run.metrics.r0))),
            Box::new(MetricObs::new("rt", |run| Some(run.metrics.rt))),
            Box::new(MetricObs::new("attack_rate", |run| {
                Some(run.metrics.attack_rate)
            })),
            Box::new(MetricObs::new("case_fatality_rate", |run| {
                Some(run.metrics.case_fatality_rate)
            })),
            Box::new(MetricObs::new("doubling_time", |run| {
                run.metrics.doubling_time
            })),
            Box::new(MetricObs::new("peak_infected", |run| {
                Some(run.metrics.peak_infected as f64)
            })),
            Box::new(MetricObs::new("peak_day", |run| Some(run.metrics.peak_day))),
            Box::new(MetricObs::new("outbreak_duration", |run| {
                Some(run.metrics.outbreak_duration)
            })),
            Box::new(MetricObs::new("risk_score", |run| Some(run.risk.risk_score))),
            Box::new(ProbDanger::new()),
            Box::new(FinalFractions::new()),
        ];
        Self {
            seeds: Vec::new(),
            obs_ptr_vec,
        }
    }

    pub fn add_run(&mut self, run: &RunOutcome) {
        self.seeds.push(run.seed);
        for obs in &mut self.obs_ptr_vec {
            obs.update(run);
        }
    }

    pub fn n_runs(&self) -> usize {
        self.seeds.len()
    }

    pub fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        serde_json::json!({
            "n_runs": self.n_runs(),
            "seeds": self.seeds,
            "observables": reports,
        })
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &self.report())
            .context("failed to serialize results")?;
        Ok(())
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}
