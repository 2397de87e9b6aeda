//! Risk scoring and export views of simulation data.

use crate::config::Location;
use crate::engine::{History, SeirdCounts};
use crate::metrics::EpidemicMetrics;
use crate::model::{AgentSnapshot, Compartment};
use crate::stats::Accumulator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, io::Write};

/// Weights of the infected, growth, Rt and doubling sub-scores.
pub const RISK_WEIGHTS: [f64; 4] = [0.3, 0.3, 0.2, 0.2];

/// Doubling time at or above which the doubling sub-score is zero, in days.
pub const DOUBLING_HORIZON_DAYS: f64 = 14.0;

fn bounded(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Sub-score of the percentage of the population infected.
pub fn infected_score(infected_pct: f64) -> f64 {
    bounded(infected_pct)
}

/// Sub-score of the relative growth rate: `100 * (exp(g) - 1)`, bounded.
pub fn growth_score(growth_rate: f64) -> f64 {
    bounded(100.0 * (growth_rate.exp() - 1.0))
}

/// Sub-score of the reproduction number: 50 at `Rt = 1`, 50 points per unit.
pub fn rt_score(rt: f64) -> f64 {
    bounded((rt - 1.0) * 50.0 + 50.0)
}

/// Sub-score of the doubling time, falling linearly from 100 at zero days
/// to 0 at [`DOUBLING_HORIZON_DAYS`]. Missing or non-positive times score 0.
pub fn doubling_score(doubling_time: Option<f64>) -> f64 {
    match doubling_time {
        Some(days) if days > 0.0 => bounded(100.0 * (1.0 - days / DOUBLING_HORIZON_DAYS)),
        _ => 0.0,
    }
}

/// Composite risk score in `[0, 100]`.
pub fn calculate_risk_score(
    infected_pct: f64,
    growth_rate: f64,
    rt: f64,
    doubling_time: Option<f64>,
) -> f64 {
    let scores = [
        infected_score(infected_pct),
        growth_score(growth_rate),
        rt_score(rt),
        doubling_score(doubling_time),
    ];
    bounded(
        RISK_WEIGHTS
            .iter()
            .zip(scores)
            .map(|(weight, score)| weight * score)
            .sum(),
    )
}

/// Risk classification of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DangerLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl DangerLevel {
    pub const ALL: [DangerLevel; 4] = [
        DangerLevel::Low,
        DangerLevel::Moderate,
        DangerLevel::High,
        DangerLevel::Critical,
    ];

    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            DangerLevel::Critical
        } else if score >= 50.0 {
            DangerLevel::High
        } else if score >= 25.0 {
            DangerLevel::Moderate
        } else {
            DangerLevel::Low
        }
    }

    /// Map color.
    pub fn color(self) -> &'static str {
        match self {
            DangerLevel::Low => "#4CAF50",
            DangerLevel::Moderate => "#FFC107",
            DangerLevel::High => "#FF9800",
            DangerLevel::Critical => "#F44336",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DangerLevel::Low => "low",
            DangerLevel::Moderate => "moderate",
            DangerLevel::High => "high",
            DangerLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for DangerLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk score of a simulation together with its classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub danger_level: DangerLevel,
    pub color: String,
}

impl RiskAssessment {
    pub fn from_metrics(metrics: &EpidemicMetrics, population: usize) -> Self {
        let risk_score = calculate_risk_score(
            metrics.infected_percentage(population),
            metrics.growth_rate,
            metrics.rt,
            metrics.doubling_time,
        );
        let danger_level = DangerLevel::from_score(risk_score);
        Self {
            risk_score,
            danger_level,
            color: danger_level.color().to_string(),
        }
    }
}

/// How dangerous an agent's state is for others: 2 infected, 1 exposed, else 0.
pub fn state_risk_level(state: Compartment) -> u8 {
    match state {
        Compartment::Infected => 2,
        Compartment::Exposed => 1,
        _ => 0,
    }
}

pub fn count_states(agents: &[AgentSnapshot]) -> SeirdCounts {
    let mut counts = SeirdCounts::default();
    for agt in agents {
        match agt.state {
            Compartment::Susceptible => counts.susceptible += 1,
            Compartment::Exposed => counts.exposed += 1,
            Compartment::Infected => counts.infected += 1,
            Compartment::Recovered => counts.recovered += 1,
            Compartment::Deceased => counts.deceased += 1,
        }
    }
    counts
}

/// GeoJSON `FeatureCollection` with one point feature per agent.
///
/// Grid positions are mapped to coordinates with [`Location::to_lon_lat`].
pub fn agents_to_geojson(agents: &[AgentSnapshot], location: &Location) -> serde_json::Value {
    let features: Vec<_> = agents
        .iter()
        .map(|agt| {
            let (lon, lat) = location.to_lon_lat(agt.x, agt.y);
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [lon, lat] },
                "properties": {
                    "id": agt.id,
                    "state": agt.state,
                    "risk_level": state_risk_level(agt.state),
                    "days_in_state": agt.days_in_state,
                    "is_isolated": agt.is_isolated,
                },
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
        "properties": {
            "location_id": location.id,
            "location_name": location.name,
            "agent_count": agents.len(),
            "state_summary": count_states(agents),
        },
    })
}

/// GeoJSON point feature marking a location's danger zone.
///
/// The suggested radius grows with agent density, between 500 and 5000 m.
pub fn danger_zone_feature(
    location: &Location,
    risk_score: f64,
    agent_density: f64,
    infected_pct: f64,
) -> serde_json::Value {
    let level = DangerLevel::from_score(risk_score);
    let radius_meters = (agent_density * 1000.0).clamp(500.0, 5000.0).round() as u32;
    json!({
        "type": "Feature",
        "geometry": {
            "type": "Point",
            "coordinates": [location.longitude, location.latitude],
        },
        "properties": {
            "location_id": location.id,
            "location_name": location.name,
            "danger_level": level,
            "risk_score": risk_score,
            "agent_density": agent_density,
            "infected_percentage": infected_pct,
            "color": level.color(),
            "radius_meters": radius_meters,
        },
    })
}

/// Aggregate statistics of an agent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub total_agents: usize,
    pub by_state: SeirdCounts,
    pub avg_days_in_state: f64,
    pub isolated_count: usize,
    pub isolation_rate: f64,
}

pub fn summarize_agents(agents: &[AgentSnapshot]) -> AgentSummary {
    let total_agents = agents.len();
    let isolated_count = agents.iter().filter(|agt| agt.is_isolated).count();
    let (avg_days_in_state, isolation_rate) = if total_agents == 0 {
        (0.0, 0.0)
    } else {
        let days: f64 = agents.iter().map(|agt| agt.days_in_state).sum();
        (
            days / total_agents as f64,
            isolated_count as f64 / total_agents as f64,
        )
    };
    AgentSummary {
        total_agents,
        by_state: count_states(agents),
        avg_days_in_state,
        isolated_count,
        isolation_rate,
    }
}

/// Indicator a comparison map colours its locations by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonField {
    RiskScore,
    R0,
    Rt,
    AttackRate,
    CaseFatalityRate,
    DoublingTime,
    GrowthRate,
    PeakInfected,
    CurrentDeceased,
    VaccinationCoverage,
}

impl ComparisonField {
    /// Value of this field for `metrics`, `None` for a missing doubling time.
    ///
    /// The risk score uses the attack rate as the infected percentage, so
    /// locations of different sizes compare on the same scale.
    pub fn value(self, metrics: &EpidemicMetrics) -> Option<f64> {
        match self {
            ComparisonField::RiskScore => Some(calculate_risk_score(
                metrics.attack_rate,
                metrics.growth_rate,
                metrics.rt,
                metrics.doubling_time,
            )),
            ComparisonField::R0 => Some(metrics.r0),
            ComparisonField::Rt => Some(metrics.rt),
            ComparisonField::AttackRate => Some(metrics.attack_rate),
            ComparisonField::CaseFatalityRate => Some(metrics.case_fatality_rate),
            ComparisonField::DoublingTime => metrics.doubling_time,
            ComparisonField::GrowthRate => Some(metrics.growth_rate),
            ComparisonField::PeakInfected => Some(metrics.peak_infected as f64),
            ComparisonField::CurrentDeceased => Some(metrics.current_deceased as f64),
            ComparisonField::VaccinationCoverage => Some(metrics.vaccination_coverage),
        }
    }
}

/// GeoJSON `FeatureCollection` comparing the outcomes of several locations.
///
/// One point feature per entry, placed at the location's anchor and
/// carrying the compared `value` next to the full metrics.
pub fn comparison_geojson(
    entries: &[(Location, EpidemicMetrics)],
    field: ComparisonField,
) -> serde_json::Value {
    let features: Vec<_> = entries
        .iter()
        .map(|(location, metrics)| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [location.longitude, location.latitude],
                },
                "properties": {
                    "location_id": location.id,
                    "location_name": location.name,
                    "value": field.value(metrics),
                    "metrics": metrics,
                },
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
        "comparison_field": field,
    })
}

/// Metrics of all simulations of one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSummary {
    pub location_id: String,
    pub location_name: String,
    pub n_simulations: usize,
    pub avg_r0: f64,
    pub avg_rt: f64,
    pub avg_attack_rate: f64,
    pub total_deceased: usize,
}

/// Group simulation metrics by location id, in order of first appearance.
pub fn aggregate_by_location(entries: &[(Location, EpidemicMetrics)]) -> Vec<LocationSummary> {
    struct Group<'a> {
        location: &'a Location,
        r0: Accumulator,
        rt: Accumulator,
        attack_rate: Accumulator,
        total_deceased: usize,
    }

    let mut groups: Vec<Group> = Vec::new();
    for (location, metrics) in entries {
        let i_group = match groups.iter().position(|g| g.location.id == location.id) {
            Some(i_group) => i_group,
            None => {
                groups.push(Group {
                    location,
                    r0: Accumulator::new(),
                    rt: Accumulator::new(),
                    attack_rate: Accumulator::new(),
                    total_deceased: 0,
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[i_group];
        group.r0.add(metrics.r0);
        group.rt.add(metrics.rt);
        group.attack_rate.add(metrics.attack_rate);
        group.total_deceased += metrics.current_deceased;
    }

    groups
        .into_iter()
        .map(|g| LocationSummary {
            location_id: g.location.id.clone(),
            location_name: g.location.name.clone(),
            n_simulations: g.r0.report().n_vals,
            avg_r0: g.r0.report().mean,
            avg_rt: g.rt.report().mean,
            avg_attack_rate: g.attack_rate.report().mean,
            total_deceased: g.total_deceased,
        })
        .collect()
}

/// One row of the tabular SEIRD export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeirdRow {
    pub day: f64,
    pub susceptible: usize,
    pub exposed: usize,
    pub infected: usize,
    pub recovered: usize,
    pub deceased: usize,
    pub rt: f64,
}

pub fn seird_rows(history: &History, time_step: f64) -> Vec<SeirdRow> {
    (0..history.len())
        .filter_map(|idx| {
            let counts = history.counts_at(idx)?;
            Some(SeirdRow {
                day: idx as f64 * time_step,
                susceptible: counts.susceptible,
                exposed: counts.exposed,
                infected: counts.infected,
                recovered: counts.recovered,
                deceased: counts.deceased,
                rt: history.rt.get(idx).copied().unwrap_or(0.0),
            })
        })
        .collect()
}

/// Write the history as CSV with a header row.
pub fn write_seird_csv<W: Write>(
    history: &History,
    time_step: f64,
    writer: W,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in seird_rows(history, time_step) {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
