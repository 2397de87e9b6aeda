use crate::error::SimError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Largest number of steps a single run request may ask for.
pub const MAX_RUN_STEPS: usize = 10_000;

/// Duration of a run request that names neither steps nor days.
pub const DEFAULT_RUN_DAYS: f64 = 100.0;

/// Simulation configuration parameters.
///
/// Immutable once accepted by an [`Engine`](crate::engine::Engine).
/// All fields are validated together by [`SimulationConfig::validate`].
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Number of agents.
    pub population_size: usize,
    /// Side length of the square world.
    pub grid_size: f64,
    /// Number of agents seeded in the infected state.
    pub initial_infected: usize,

    /// Transmission rate per infectious contact per day.
    #[serde(alias = "beta")]
    pub infection_rate: f64,
    /// Mean of the incubation period in days.
    pub incubation_mean: f64,
    /// Standard deviation of the incubation period in days.
    pub incubation_std: f64,
    /// Mean of the infectious period in days.
    pub infectious_mean: f64,
    /// Standard deviation of the infectious period in days.
    pub infectious_std: f64,
    /// Probability that an infection ends in death.
    pub mortality_rate: f64,

    /// Daily rate at which susceptible agents are vaccinated.
    pub vaccination_rate: f64,
    /// Probability that an agent entering the infected state is detected.
    pub detection_probability: f64,
    /// Fractional contact reduction of detected agents.
    pub isolation_compliance: f64,

    /// Distance within which an infected agent can transmit.
    pub interaction_radius: f64,
    /// Length of one step in days.
    pub time_step: f64,
    /// Strength of the pull towards the home position.
    pub home_attraction: f64,
    /// Strength of the random walk.
    #[serde(alias = "random_movement")]
    pub random_force: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            population_size: 500,
            grid_size: 100.0,
            initial_infected: 5,
            infection_rate: 1.0,
            incubation_mean: 5.0,
            incubation_std: 1.5,
            infectious_mean: 7.0,
            infectious_std: 2.0,
            mortality_rate: 0.02,
            vaccination_rate: 0.0,
            detection_probability: 0.3,
            isolation_compliance: 0.8,
            interaction_radius: 2.0,
            time_step: 0.5,
            home_attraction: 0.1,
            random_force: 1.0,
        }
    }
}

impl SimulationConfig {
    /// Check every parameter and the constraints between them.
    ///
    /// # Errors
    /// Returns [`SimError::Validation`] listing all violated constraints.
    pub fn validate(&self) -> Result<(), SimError> {
        let mut violations = Vec::new();
        let mut check = |what: &str, res: Result<(), String>| {
            if let Err(msg) = res {
                violations.push(format!("invalid {what}: {msg}"));
            }
        };

        check("population size", check_num(self.population_size, 50..=5000));
        check("grid size", check_num(self.grid_size, 10.0..=500.0));
        check(
            "initial number of infected",
            check_num(self.initial_infected, 1..=self.population_size),
        );

        check("infection rate", check_num(self.infection_rate, 0.0..=10.0));
        check("incubation mean", check_positive(self.incubation_mean));
        check("incubation std", check_non_negative(self.incubation_std));
        check("infectious mean", check_positive(self.infectious_mean));
        check("infectious std", check_non_negative(self.infectious_std));
        check("mortality rate", check_num(self.mortality_rate, 0.0..=1.0));

        check("vaccination rate", check_num(self.vaccination_rate, 0.0..=1.0));
        check(
            "detection probability",
            check_num(self.detection_probability, 0.0..=1.0),
        );
        check(
            "isolation compliance",
            check_num(self.isolation_compliance, 0.0..=1.0),
        );

        check("interaction radius", check_positive(self.interaction_radius));
        check("time step", check_positive(self.time_step));
        check("time step", check_num(self.time_step, ..=1.0));
        check("home attraction", check_non_negative(self.home_attraction));
        check("random force", check_non_negative(self.random_force));

        let duration = self.incubation_mean + self.infectious_mean;
        if duration > 365.0 {
            check(
                "disease duration",
                Err(format!(
                    "incubation and infectious means must sum to at most 365 days, but sum to {duration}"
                )),
            );
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SimError::Validation(violations))
        }
    }
}

/// Real-world anchor of the simulation grid.
///
/// Grid coordinates map affinely onto geographic ones:
/// `lon = longitude + x * scale` and `lat = latitude + y * scale`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Location {
    pub id: String,
    pub name: String,
    /// Latitude of the grid origin.
    pub latitude: f64,
    /// Longitude of the grid origin.
    pub longitude: f64,
    /// Degrees per grid unit.
    pub scale: f64,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default".to_string(),
            latitude: 14.5,
            longitude: 120.9,
            scale: 0.01,
        }
    }
}

impl Location {
    pub fn validate(&self) -> Result<(), SimError> {
        let mut violations = Vec::new();
        if let Err(msg) = check_num(self.latitude, -90.0..=90.0) {
            violations.push(format!("invalid latitude: {msg}"));
        }
        if let Err(msg) = check_num(self.longitude, -180.0..=180.0) {
            violations.push(format!("invalid longitude: {msg}"));
        }
        if let Err(msg) = check_positive(self.scale) {
            violations.push(format!("invalid scale: {msg}"));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SimError::Validation(violations))
        }
    }

    /// Map grid coordinates to `(longitude, latitude)`.
    pub fn to_lon_lat(&self, x: f64, y: f64) -> (f64, f64) {
        (self.longitude + x * self.scale, self.latitude + y * self.scale)
    }

    /// Inverse of [`Location::to_lon_lat`].
    pub fn to_grid(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon - self.longitude) / self.scale,
            (lat - self.latitude) / self.scale,
        )
    }
}

/// Request to advance a simulation by several steps.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunRequest {
    pub steps: Option<usize>,
    pub days: Option<f64>,
    /// Stop as soon as no agent is exposed or infected.
    pub stop_when_no_infected: bool,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            steps: None,
            days: Some(DEFAULT_RUN_DAYS),
            stop_when_no_infected: true,
        }
    }
}

impl RunRequest {
    pub fn steps(steps: usize) -> Self {
        Self {
            steps: Some(steps),
            days: None,
            stop_when_no_infected: false,
        }
    }

    pub fn days(days: f64) -> Self {
        Self {
            steps: None,
            days: Some(days),
            stop_when_no_infected: false,
        }
    }

    pub fn stop_when_no_infected(mut self, stop: bool) -> Self {
        self.stop_when_no_infected = stop;
        self
    }

    /// Number of steps this request asks for at the given time step.
    ///
    /// # Errors
    /// Returns [`SimError::Validation`] if both steps and days are given,
    /// or if the resulting count is zero or exceeds [`MAX_RUN_STEPS`].
    pub fn resolve_steps(&self, time_step: f64) -> Result<usize, SimError> {
        match (self.steps, self.days) {
            (Some(_), Some(_)) => Err(SimError::invalid(
                "only one of steps and days may be specified",
            )),
            (Some(steps), None) => check_num(steps, 1..=MAX_RUN_STEPS)
                .map(|()| steps)
                .map_err(|msg| SimError::invalid(format!("invalid number of steps: {msg}"))),
            (None, Some(days)) => {
                check_positive(days)
                    .map_err(|msg| SimError::invalid(format!("invalid number of days: {msg}")))?;
                let steps = ((days / time_step).floor() as usize).max(1);
                check_num(steps, 1..=MAX_RUN_STEPS).map(|()| steps).map_err(|msg| {
                    SimError::invalid(format!("invalid number of steps for {days} days: {msg}"))
                })
            }
            (None, None) => {
                let steps = (DEFAULT_RUN_DAYS / time_step).floor() as usize;
                Ok(steps.clamp(1, MAX_RUN_STEPS))
            }
        }
    }
}

/// Defaults for runs started from the command line.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunDefaults {
    /// Seed of the first run; drawn from the OS when absent.
    pub seed: Option<u64>,
}

/// Contents of a simulation directory's `config.toml`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub run: RunDefaults,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        let config = Self::from_toml(&contents)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;
        config.validate().context("failed to validate config")?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.simulation
            .validate()
            .context("invalid simulation parameters")?;
        self.location
            .validate()
            .context("invalid location parameters")?;
        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<(), String>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        return Err(format!(
            "number must be in the range {range:?}, but is {num:?}"
        ));
    }
    Ok(())
}

fn check_positive(num: f64) -> Result<(), String> {
    if !(num > 0.0 && num.is_finite()) {
        return Err(format!("number must be positive and finite, but is {num:?}"));
    }
    Ok(())
}

fn check_non_negative(num: f64) -> Result<(), String> {
    if !(num >= 0.0 && num.is_finite()) {
        return Err(format!(
            "number must be non-negative and finite, but is {num:?}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violations(cfg: &SimulationConfig) -> Vec<String> {
        match cfg.validate() {
            Err(SimError::Validation(v)) => v,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn default_config_is_valid() {
        SimulationConfig::default().validate().unwrap();
        Location::default().validate().unwrap();
    }

    #[test]
    fn bounds_are_inclusive() {
        let cfg = SimulationConfig {
            population_size: 50,
            initial_infected: 50,
            grid_size: 10.0,
            infection_rate: 10.0,
            time_step: 1.0,
            mortality_rate: 1.0,
            incubation_mean: 165.0,
            infectious_mean: 200.0,
            ..Default::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn initial_infected_above_population_is_rejected() {
        let cfg = SimulationConfig {
            population_size: 100,
            initial_infected: 101,
            ..Default::default()
        };
        let v = violations(&cfg);
        assert_eq!(v.len(), 1);
        assert!(v[0].contains("initial number of infected"));
    }

    #[test]
    fn all_violations_are_reported() {
        let cfg = SimulationConfig {
            population_size: 5,
            infection_rate: 11.0,
            time_step: 0.0,
            mortality_rate: f64::NAN,
            ..Default::default()
        };
        let v = violations(&cfg);
        assert_eq!(v.len(), 4, "{v:?}");
        assert!(v[0].contains("population size"));
        assert!(v[1].contains("infection rate"));
        assert!(v[2].contains("mortality rate"));
        assert!(v[3].contains("time step"));
    }

    #[test]
    fn disease_duration_is_capped() {
        let cfg = SimulationConfig {
            incubation_mean: 200.0,
            infectious_mean: 166.0,
            ..Default::default()
        };
        let v = violations(&cfg);
        assert_eq!(v.len(), 1);
        assert!(v[0].contains("365"));
    }

    #[test]
    fn run_request_resolution() {
        assert_eq!(RunRequest::steps(25).resolve_steps(0.5).unwrap(), 25);
        assert_eq!(RunRequest::days(10.0).resolve_steps(0.5).unwrap(), 20);
        assert_eq!(RunRequest::days(0.1).resolve_steps(0.5).unwrap(), 1);
        assert_eq!(RunRequest::default().resolve_steps(0.5).unwrap(), 200);

        let neither = RunRequest {
            steps: None,
            days: None,
            stop_when_no_infected: true,
        };
        assert_eq!(neither.resolve_steps(0.001).unwrap(), MAX_RUN_STEPS);
    }

    #[test]
    fn run_request_rejects_bad_input() {
        let both = RunRequest {
            steps: Some(10),
            days: Some(10.0),
            stop_when_no_infected: false,
        };
        assert!(matches!(both.resolve_steps(1.0), Err(SimError::Validation(_))));
        assert!(RunRequest::steps(0).resolve_steps(1.0).is_err());
        assert!(RunRequest::steps(MAX_RUN_STEPS + 1).resolve_steps(1.0).is_err());
        assert!(RunRequest::days(-1.0).resolve_steps(1.0).is_err());
        assert!(RunRequest::days(10_000.0).resolve_steps(0.5).is_err());
    }

    #[test]
    fn location_mapping_is_invertible() {
        let loc = Location::default();
        let (lon, lat) = loc.to_lon_lat(12.5, 40.0);
        approx::assert_abs_diff_eq!(lon, 121.025, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(lat, 14.9, epsilon = 1e-9);
        let (x, y) = loc.to_grid(lon, lat);
        approx::assert_abs_diff_eq!(x, 12.5, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(y, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn config_from_toml() {
        let contents = r#"
[simulation]
population_size = 200
beta = 2.5
random_movement = 0.5

[location]
id = "ncr"
name = "NCR"
latitude = 14.5995
longitude = 120.9842

[run]
seed = 7
"#;
        let config = Config::from_toml(contents).unwrap();
        assert_eq!(config.simulation.population_size, 200);
        assert_eq!(config.simulation.infection_rate, 2.5);
        assert_eq!(config.simulation.random_force, 0.5);
        assert_eq!(config.simulation.grid_size, 100.0);
        assert_eq!(config.location.name, "NCR");
        assert_eq!(config.location.scale, 0.01);
        assert_eq!(config.run.seed, Some(7));
    }

    #[test]
    fn config_from_toml_rejects_invalid_values() {
        let contents = "[simulation]\npopulation_size = 10\n";
        let err = Config::from_toml(contents).unwrap_err();
        assert!(format!("{err:#}").contains("population size"));
    }
}
