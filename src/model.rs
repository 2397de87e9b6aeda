use crate::config::SimulationConfig;
use crate::error::SimError;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Disease compartment of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compartment {
    #[serde(rename = "S")]
    Susceptible,
    #[serde(rename = "E")]
    Exposed,
    #[serde(rename = "I")]
    Infected,
    #[serde(rename = "R")]
    Recovered,
    #[serde(rename = "D")]
    Deceased,
}

impl Compartment {
    pub const ALL: [Compartment; 5] = [
        Compartment::Susceptible,
        Compartment::Exposed,
        Compartment::Infected,
        Compartment::Recovered,
        Compartment::Deceased,
    ];

    pub fn letter(self) -> &'static str {
        match self {
            Compartment::Susceptible => "S",
            Compartment::Exposed => "E",
            Compartment::Infected => "I",
            Compartment::Recovered => "R",
            Compartment::Deceased => "D",
        }
    }

    pub fn from_letter(letter: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.letter() == letter)
    }

    /// Position in [`Compartment::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// Draws per-agent incubation and infectious periods.
///
/// Periods are normally distributed and clipped at zero.
#[derive(Debug, Clone)]
pub struct DurationSampler {
    incubation: Normal<f64>,
    infectious: Normal<f64>,
}

impl DurationSampler {
    pub fn new(cfg: &SimulationConfig) -> Result<Self, SimError> {
        let incubation = Normal::new(cfg.incubation_mean, cfg.incubation_std)
            .map_err(|err| SimError::invalid(format!("invalid incubation period: {err}")))?;
        let infectious = Normal::new(cfg.infectious_mean, cfg.infectious_std)
            .map_err(|err| SimError::invalid(format!("invalid infectious period: {err}")))?;
        Ok(Self {
            incubation,
            infectious,
        })
    }

    pub fn incubation<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.incubation.sample(rng).max(0.0)
    }

    pub fn infectious<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.infectious.sample(rng).max(0.0)
    }
}

/// Agent of the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    id: usize,
    x: f64,
    y: f64,
    home_x: f64,
    home_y: f64,
    state: Compartment,
    days_in_state: f64,
    /// Sampled length of the current exposed or infected period.
    target_days: f64,
    is_isolated: bool,
    is_vaccinated: bool,
}

impl Agent {
    /// Create a susceptible agent whose home is its starting position.
    pub fn new(id: usize, x: f64, y: f64) -> Self {
        Self {
            id,
            x,
            y,
            home_x: x,
            home_y: y,
            state: Compartment::Susceptible,
            days_in_state: 0.0,
            target_days: 0.0,
            is_isolated: false,
            is_vaccinated: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn home(&self) -> (f64, f64) {
        (self.home_x, self.home_y)
    }

    pub fn state(&self) -> Compartment {
        self.state
    }

    pub fn days_in_state(&self) -> f64 {
        self.days_in_state
    }

    pub fn is_isolated(&self) -> bool {
        self.is_isolated
    }

    pub fn is_vaccinated(&self) -> bool {
        self.is_vaccinated
    }

    pub(crate) fn set_position(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    /// Advance the clock of the current state, returning whether the
    /// sampled period of an exposed or infected agent has elapsed.
    pub(crate) fn tick(&mut self, dt: f64) -> bool {
        self.days_in_state += dt;
        matches!(self.state, Compartment::Exposed | Compartment::Infected)
            && self.days_in_state >= self.target_days
    }

    pub(crate) fn expose(&mut self, incubation_days: f64) {
        self.enter(Compartment::Exposed);
        self.target_days = incubation_days;
    }

    pub(crate) fn infect(&mut self, infectious_days: f64, isolated: bool) {
        self.enter(Compartment::Infected);
        self.target_days = infectious_days;
        self.is_isolated = isolated;
    }

    pub(crate) fn resolve(&mut self, dies: bool) {
        self.enter(if dies {
            Compartment::Deceased
        } else {
            Compartment::Recovered
        });
        self.is_isolated = false;
    }

    pub(crate) fn vaccinate(&mut self) {
        self.enter(Compartment::Recovered);
        self.is_vaccinated = true;
    }

    fn enter(&mut self, state: Compartment) {
        self.state = state;
        self.days_in_state = 0.0;
        self.target_days = 0.0;
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            x: self.x,
            y: self.y,
            state: self.state,
            days_in_state: self.days_in_state,
            is_isolated: self.is_isolated,
        }
    }
}

/// Externally visible view of an [`Agent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub state: Compartment,
    pub days_in_state: f64,
    pub is_isolated: bool,
}
