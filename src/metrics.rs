use crate::config::SimulationConfig;
use crate::engine::{History, RT_WINDOW_DAYS};
use crate::stats::{self, Trend};
use serde::{Deserialize, Serialize};

/// Epidemic indicators derived from a simulation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpidemicMetrics {
    pub r0: f64,
    pub rt: f64,
    /// Percentage of the population ever infected.
    pub attack_rate: f64,
    /// Percentage of resolved infections that ended in death.
    pub case_fatality_rate: f64,
    /// Days for the infected count to double, if it ever did.
    pub doubling_time: Option<f64>,
    /// Relative change of the infected count over the last few days.
    pub growth_rate: f64,
    pub peak_infected: usize,
    pub peak_day: f64,
    /// Days with at least one infected agent.
    pub outbreak_duration: f64,
    pub current_infected: usize,
    pub current_recovered: usize,
    pub current_deceased: usize,
    /// Percentage of the population vaccinated.
    pub vaccination_coverage: f64,
    pub trend: Trend,
}

impl EpidemicMetrics {
    /// Compute the metrics of `history`, recorded under `cfg`.
    pub fn from_history(history: &History, cfg: &SimulationConfig) -> Self {
        let dt = cfg.time_step;
        let n_agt = cfg.population_size;
        let infected = &history.infected;
        let last = history.last_counts().unwrap_or_default();
        let vaccinated = history.vaccinated.last().copied().unwrap_or(0);

        // Vaccinated agents sit in R without ever having been infected.
        let ever_infected = n_agt.saturating_sub(last.susceptible + vaccinated);
        let resolved = last.recovered.saturating_sub(vaccinated) + last.deceased;

        let (peak_infected, i_peak) = stats::calculate_peak_metrics(infected);

        Self {
            r0: stats::estimate_r0(infected, cfg.infectious_mean, dt, n_agt),
            rt: stats::calculate_rt(infected, cfg.infectious_mean, dt, RT_WINDOW_DAYS),
            attack_rate: stats::calculate_attack_rate(ever_infected, n_agt),
            case_fatality_rate: stats::calculate_case_fatality_rate(resolved, last.deceased),
            doubling_time: stats::calculate_doubling_time(infected, dt),
            growth_rate: stats::calculate_growth_rate(
                infected,
                dt,
                stats::GROWTH_RATE_WINDOW_DAYS,
            ),
            peak_infected,
            peak_day: i_peak as f64 * dt,
            outbreak_duration: stats::calculate_epidemic_duration(infected, 0) as f64 * dt,
            current_infected: last.infected,
            current_recovered: last.recovered,
            current_deceased: last.deceased,
            vaccination_coverage: 100.0 * vaccinated as f64 / n_agt as f64,
            // The first entry is the initial condition, not an estimate.
            trend: stats::calculate_trend(history.rt.get(1..).unwrap_or_default(), 1.0),
        }
    }

    /// Percentage of the population currently infected.
    pub fn infected_percentage(&self, population: usize) -> f64 {
        if population == 0 {
            return 0.0;
        }
        100.0 * self.current_infected as f64 / population as f64
    }
}
