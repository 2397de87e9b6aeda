use crate::config::{RunRequest, SimulationConfig};
use crate::error::SimError;
use crate::model::{Agent, AgentSnapshot, Compartment, DurationSampler};
use crate::spatial::SpatialGrid;
use crate::stats;
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{StandardNormal, Uniform};
use serde::{Deserialize, Serialize};

/// Window of the Rt estimate recorded after every step, in days.
pub const RT_WINDOW_DAYS: f64 = 7.0;

/// Number of agents in each compartment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeirdCounts {
    pub susceptible: usize,
    pub exposed: usize,
    pub infected: usize,
    pub recovered: usize,
    pub deceased: usize,
}

impl SeirdCounts {
    pub fn from_agents<'a, I: IntoIterator<Item = &'a Agent>>(agents: I) -> Self {
        let mut counts = Self::default();
        for agt in agents {
            match agt.state() {
                Compartment::Susceptible => counts.susceptible += 1,
                Compartment::Exposed => counts.exposed += 1,
                Compartment::Infected => counts.infected += 1,
                Compartment::Recovered => counts.recovered += 1,
                Compartment::Deceased => counts.deceased += 1,
            }
        }
        counts
    }

    /// Number of agents in `state`.
    pub fn get(&self, state: Compartment) -> usize {
        match state {
            Compartment::Susceptible => self.susceptible,
            Compartment::Exposed => self.exposed,
            Compartment::Infected => self.infected,
            Compartment::Recovered => self.recovered,
            Compartment::Deceased => self.deceased,
        }
    }

    pub fn total(&self) -> usize {
        self.susceptible + self.exposed + self.infected + self.recovered + self.deceased
    }

    /// Whether any agent is still exposed or infected.
    pub fn is_active(&self) -> bool {
        self.exposed > 0 || self.infected > 0
    }
}

/// Per-step record of a simulation.
///
/// The five compartment series and `rt` hold one entry per recorded step,
/// starting with the initial condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub susceptible: Vec<usize>,
    pub exposed: Vec<usize>,
    pub infected: Vec<usize>,
    pub recovered: Vec<usize>,
    pub deceased: Vec<usize>,
    /// Effective reproduction number, 0 for the initial condition.
    pub rt: Vec<f64>,
    /// Cumulative number of vaccinated agents.
    pub vaccinated: Vec<usize>,
}

impl History {
    fn push(&mut self, counts: SeirdCounts, rt: f64, vaccinated: usize) {
        self.susceptible.push(counts.susceptible);
        self.exposed.push(counts.exposed);
        self.infected.push(counts.infected);
        self.recovered.push(counts.recovered);
        self.deceased.push(counts.deceased);
        self.rt.push(rt);
        self.vaccinated.push(vaccinated);
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.susceptible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.susceptible.is_empty()
    }

    /// Counts at entry `idx`.
    pub fn counts_at(&self, idx: usize) -> Option<SeirdCounts> {
        Some(SeirdCounts {
            susceptible: *self.susceptible.get(idx)?,
            exposed: *self.exposed.get(idx)?,
            infected: *self.infected.get(idx)?,
            recovered: *self.recovered.get(idx)?,
            deceased: *self.deceased.get(idx)?,
        })
    }

    pub fn last_counts(&self) -> Option<SeirdCounts> {
        self.counts_at(self.len().checked_sub(1)?)
    }
}

/// Aggregate view of a simulation after a step or a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub day: f64,
    pub steps: usize,
    pub counts: SeirdCounts,
    pub rt: f64,
}

/// Lifecycle status of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Running,
    Completed,
}

/// Mutable state owned by an [`Engine`].
#[derive(Debug, Clone)]
pub struct State {
    n_steps: usize,
    agt_vec: Vec<Agent>,
    history: History,
    n_vaccinated: usize,
}

/// Simulation engine.
///
/// Holds the configuration, current state, and random number generator,
/// and advances the agent population one time step at a time.
pub struct Engine {
    cfg: SimulationConfig,
    state: State,
    durations: DurationSampler,
    rng: ChaCha12Rng,
    seed: u64,
}

impl Engine {
    /// Create a new `Engine` with a random initial condition drawn from `seed`.
    ///
    /// Agents are placed uniformly over the grid and `initial_infected` of
    /// them, chosen uniformly at random, start infected.
    ///
    /// # Errors
    /// Returns [`SimError::Validation`] if the configuration is invalid.
    pub fn new(cfg: SimulationConfig, seed: u64) -> Result<Self, SimError> {
        cfg.validate()?;
        let durations = DurationSampler::new(&cfg)?;
        let mut rng = ChaCha12Rng::seed_from_u64(seed);

        let pos_dist = Uniform::new_inclusive(0.0, cfg.grid_size)
            .map_err(|err| SimError::invalid(format!("invalid grid size: {err}")))?;
        let mut agt_vec: Vec<_> = (0..cfg.population_size)
            .map(|id| Agent::new(id, pos_dist.sample(&mut rng), pos_dist.sample(&mut rng)))
            .collect();

        let i_agt_all: Vec<_> = (0..cfg.population_size).collect();
        let mut i_agt_inf: Vec<_> = i_agt_all
            .choose_multiple(&mut rng, cfg.initial_infected)
            .copied()
            .collect();
        i_agt_inf.sort_unstable();
        for i_agt in i_agt_inf {
            let infectious_days = durations.infectious(&mut rng);
            let isolated = rng.random_bool(cfg.detection_probability);
            agt_vec[i_agt].infect(infectious_days, isolated);
        }

        let mut history = History::default();
        history.push(SeirdCounts::from_agents(&agt_vec), 0.0, 0);

        let state = State {
            n_steps: 0,
            agt_vec,
            history,
            n_vaccinated: 0,
        };

        log::debug!(
            "initialized {} agents with {} infected (seed {seed})",
            cfg.population_size,
            cfg.initial_infected
        );

        Ok(Self {
            cfg,
            state,
            durations,
            rng,
            seed,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.cfg
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Simulated time in days.
    pub fn day(&self) -> f64 {
        self.state.n_steps as f64 * self.cfg.time_step
    }

    pub fn n_steps(&self) -> usize {
        self.state.n_steps
    }

    pub fn history(&self) -> &History {
        &self.state.history
    }

    pub fn counts(&self) -> SeirdCounts {
        SeirdCounts::from_agents(&self.state.agt_vec)
    }

    pub fn status(&self) -> Status {
        if self.state.n_steps == 0 {
            Status::Created
        } else if self.counts().is_active() {
            Status::Running
        } else {
            Status::Completed
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            day: self.day(),
            steps: self.state.n_steps,
            counts: self.counts(),
            rt: self.state.history.rt.last().copied().unwrap_or(0.0),
        }
    }

    /// Current state of every agent, optionally leaving out deceased ones.
    pub fn agent_snapshot(&self, include_deceased: bool) -> Vec<AgentSnapshot> {
        self.state
            .agt_vec
            .iter()
            .filter(|agt| include_deceased || agt.state() != Compartment::Deceased)
            .map(Agent::snapshot)
            .collect()
    }

    /// Advance the simulation by one time step.
    pub fn step(&mut self) -> Snapshot {
        let dt = self.cfg.time_step;

        // Move every living agent.
        self.move_agents(dt);

        // Advance clocks and progress exposed and infected agents.
        self.progress_disease(dt);

        // Expose susceptible agents near infectious ones.
        self.transmit(dt);

        // Vaccinate remaining susceptible agents.
        self.vaccinate(dt);

        self.state.n_steps += 1;
        self.record();

        debug_assert!(
            self.check_invariants().is_ok(),
            "{:?}",
            self.check_invariants()
        );

        self.snapshot()
    }

    /// Advance the simulation by the number of steps `request` asks for.
    ///
    /// # Errors
    /// Returns [`SimError::Validation`] if the request is invalid; in that
    /// case no step is taken.
    pub fn run(&mut self, request: &RunRequest) -> Result<Snapshot, SimError> {
        let n_steps = request.resolve_steps(self.cfg.time_step)?;

        let mut n_done = 0;
        while n_done < n_steps {
            if request.stop_when_no_infected && !self.counts().is_active() {
                if n_done == 0 {
                    log::warn!("no exposed or infected agents left, nothing to run");
                }
                break;
            }
            self.step();
            n_done += 1;
        }
        log::debug!("ran {n_done} of {n_steps} steps, now at day {}", self.day());

        Ok(self.snapshot())
    }

    fn move_agents(&mut self, dt: f64) {
        let pull = (self.cfg.home_attraction * dt).min(1.0);
        let kick = self.cfg.random_force * dt.sqrt();
        let size = self.cfg.grid_size;

        for agt in &mut self.state.agt_vec {
            if agt.state() == Compartment::Deceased {
                continue;
            }
            let (x, y) = agt.position();
            let (home_x, home_y) = agt.home();
            let noise_x: f64 = self.rng.sample(StandardNormal);
            let noise_y: f64 = self.rng.sample(StandardNormal);
            let new_x = x + pull * (home_x - x) + kick * noise_x;
            let new_y = y + pull * (home_y - y) + kick * noise_y;
            agt.set_position(new_x.clamp(0.0, size), new_y.clamp(0.0, size));
        }
    }

    fn progress_disease(&mut self, dt: f64) {
        for agt in &mut self.state.agt_vec {
            if agt.state() == Compartment::Deceased || !agt.tick(dt) {
                continue;
            }
            match agt.state() {
                Compartment::Exposed => {
                    let infectious_days = self.durations.infectious(&mut self.rng);
                    let isolated = self.rng.random_bool(self.cfg.detection_probability);
                    agt.infect(infectious_days, isolated);
                }
                Compartment::Infected => {
                    let dies = self.rng.random_bool(self.cfg.mortality_rate);
                    agt.resolve(dies);
                }
                _ => {}
            }
        }
    }

    fn transmit(&mut self, dt: f64) {
        if self.cfg.infection_rate == 0.0 {
            return;
        }

        let isolated_weight = 1.0 - self.cfg.isolation_compliance;
        let mut grid = SpatialGrid::new(self.cfg.grid_size, self.cfg.interaction_radius);
        for agt in &self.state.agt_vec {
            if agt.state() != Compartment::Infected {
                continue;
            }
            let weight = if agt.is_isolated() {
                isolated_weight
            } else {
                1.0
            };
            if weight > 0.0 {
                let (x, y) = agt.position();
                grid.insert(x, y, weight);
            }
        }
        if grid.is_empty() {
            return;
        }

        let rate = self.cfg.infection_rate * dt;
        for agt in &mut self.state.agt_vec {
            if agt.state() != Compartment::Susceptible {
                continue;
            }
            let (x, y) = agt.position();
            let contact_weight = grid.weight_within(x, y);
            if contact_weight == 0.0 {
                continue;
            }
            let prob = 1.0 - (-rate * contact_weight).exp();
            if self.rng.random_bool(prob) {
                let incubation_days = self.durations.incubation(&mut self.rng);
                agt.expose(incubation_days);
            }
        }
    }

    fn vaccinate(&mut self, dt: f64) {
        let prob = (self.cfg.vaccination_rate * dt).min(1.0);
        if prob == 0.0 {
            return;
        }
        for agt in &mut self.state.agt_vec {
            if agt.state() == Compartment::Susceptible && self.rng.random_bool(prob) {
                agt.vaccinate();
                self.state.n_vaccinated += 1;
            }
        }
    }

    fn record(&mut self) {
        let counts = SeirdCounts::from_agents(&self.state.agt_vec);
        let history = &mut self.state.history;
        history.push(counts, 0.0, self.state.n_vaccinated);
        let rt = stats::calculate_rt(
            &history.infected,
            self.cfg.infectious_mean,
            self.cfg.time_step,
            RT_WINDOW_DAYS,
        );
        if let Some(last) = history.rt.last_mut() {
            *last = rt;
        }
    }

    /// Check the invariants of the recorded history.
    ///
    /// # Errors
    /// Returns [`SimError::InvariantViolation`] describing the first
    /// violated invariant.
    pub fn check_invariants(&self) -> Result<(), SimError> {
        let history = &self.state.history;
        let n_agt = self.cfg.population_size;

        if history.len() != self.state.n_steps + 1 || history.rt.len() != history.len() {
            return Err(SimError::InvariantViolation(format!(
                "history has {} entries after {} steps",
                history.len(),
                self.state.n_steps
            )));
        }
        if self.state.agt_vec.len() != n_agt {
            return Err(SimError::InvariantViolation(format!(
                "population has {} agents instead of {n_agt}",
                self.state.agt_vec.len()
            )));
        }
        for idx in 0..history.len() {
            let total = history.counts_at(idx).map_or(0, |c| c.total());
            if total != n_agt {
                return Err(SimError::InvariantViolation(format!(
                    "compartments sum to {total} instead of {n_agt} at entry {idx}"
                )));
            }
        }
        for series in [&history.recovered, &history.deceased, &history.vaccinated] {
            if series.windows(2).any(|pair| pair[1] < pair[0]) {
                return Err(SimError::InvariantViolation(
                    "absorbing compartment count decreased".to_string(),
                ));
            }
        }
        if history.last_counts() != Some(self.counts()) {
            return Err(SimError::InvariantViolation(
                "last history entry does not match the agents".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cfg() -> SimulationConfig {
        SimulationConfig {
            population_size: 200,
            grid_size: 30.0,
            initial_infected: 5,
            infection_rate: 2.0,
            incubation_mean: 2.0,
            incubation_std: 0.5,
            infectious_mean: 4.0,
            infectious_std: 1.0,
            mortality_rate: 0.1,
            interaction_radius: 2.0,
            time_step: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn initial_condition() {
        let engine = Engine::new(small_cfg(), 1).unwrap();
        let history = engine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history.rt, vec![0.0]);
        assert_eq!(history.infected, vec![5]);
        assert_eq!(history.susceptible, vec![195]);
        assert_eq!(engine.status(), Status::Created);
        assert_eq!(engine.day(), 0.0);

        let agents = engine.agent_snapshot(true);
        assert_eq!(agents.len(), 200);
        for (idx, agt) in agents.iter().enumerate() {
            assert_eq!(agt.id, idx);
            assert!((0.0..=30.0).contains(&agt.x));
            assert!((0.0..=30.0).contains(&agt.y));
            assert_eq!(agt.days_in_state, 0.0);
        }
        engine.check_invariants().unwrap();
    }

    #[test]
    fn initial_infected_are_chosen_by_seed() {
        let infected_ids = |seed| {
            Engine::new(small_cfg(), seed)
                .unwrap()
                .agent_snapshot(true)
                .into_iter()
                .filter(|agt| agt.state == Compartment::Infected)
                .map(|agt| agt.id)
                .collect::<Vec<_>>()
        };
        let ids = infected_ids(7);
        assert_eq!(ids.len(), 5);
        assert_eq!(ids, infected_ids(7));
        assert_ne!(ids, infected_ids(8));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = SimulationConfig {
            initial_infected: 300,
            ..small_cfg()
        };
        assert!(matches!(Engine::new(cfg, 1), Err(SimError::Validation(_))));
    }

    #[test]
    fn same_seed_same_trajectory() {
        let mut a = Engine::new(small_cfg(), 99).unwrap();
        let mut b = Engine::new(small_cfg(), 99).unwrap();
        for _ in 0..40 {
            a.step();
            b.step();
        }
        assert_eq!(a.history(), b.history());
        assert_eq!(a.agent_snapshot(true), b.agent_snapshot(true));
    }

    #[test]
    fn invariants_hold_over_a_run() {
        let mut engine = Engine::new(small_cfg(), 3).unwrap();
        let mut prev = engine.agent_snapshot(true);
        for _ in 0..80 {
            engine.step();
            engine.check_invariants().unwrap();
            let next = engine.agent_snapshot(true);
            for (before, after) in prev.iter().zip(&next) {
                assert_eq!(before.id, after.id);
                match (before.state, after.state) {
                    (Compartment::Deceased, s) => {
                        assert_eq!(s, Compartment::Deceased);
                        assert_eq!((before.x, before.y), (after.x, after.y));
                        assert_eq!(before.days_in_state, after.days_in_state);
                    }
                    (Compartment::Recovered, s) => assert_eq!(s, Compartment::Recovered),
                    (s0, s1) if s0 == s1 => {
                        assert_eq!(after.days_in_state, before.days_in_state + 0.5)
                    }
                    (_, _) => assert_eq!(after.days_in_state, 0.0),
                }
                assert!((0.0..=30.0).contains(&after.x));
                assert!((0.0..=30.0).contains(&after.y));
            }
            prev = next;
        }
        let history = engine.history();
        assert_eq!(history.len(), 81);
        assert!(history.deceased.windows(2).all(|p| p[0] <= p[1]));
        assert!(history.recovered.windows(2).all(|p| p[0] <= p[1]));
        assert_eq!(engine.day(), 40.0);
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        let mut engine = Engine::new(small_cfg(), 5).unwrap();
        let mut prev = engine.agent_snapshot(true);
        for _ in 0..60 {
            engine.step();
            let next = engine.agent_snapshot(true);
            for (before, after) in prev.iter().zip(&next) {
                use Compartment::*;
                let allowed = matches!(
                    (before.state, after.state),
                    (Susceptible, Susceptible | Exposed | Recovered)
                        | (Exposed, Exposed | Infected)
                        | (Infected, Infected | Recovered | Deceased)
                        | (Recovered, Recovered)
                        | (Deceased, Deceased)
                );
                assert!(allowed, "{:?} -> {:?}", before.state, after.state);
            }
            prev = next;
        }
    }

    #[test]
    fn queries_are_idempotent() {
        let mut engine = Engine::new(small_cfg(), 11).unwrap();
        engine.run(&RunRequest::steps(10)).unwrap();
        let first = engine.history().clone();
        let agents = engine.agent_snapshot(true);
        let snap = engine.snapshot();
        let status = engine.status();

        assert_eq!(*engine.history(), first);
        assert_eq!(engine.agent_snapshot(true), agents);
        assert_eq!(engine.snapshot(), snap);
        assert_eq!(engine.status(), status);
        assert_eq!(engine.n_steps(), 10);
        assert_eq!(first.len(), 11);
    }

    #[test]
    fn zero_movement_keeps_agents_home() {
        let cfg = SimulationConfig {
            random_force: 0.0,
            ..small_cfg()
        };
        let mut engine = Engine::new(cfg, 2).unwrap();
        let before = engine.agent_snapshot(true);
        engine.run(&RunRequest::steps(5)).unwrap();
        for (a, b) in before.iter().zip(engine.agent_snapshot(true)) {
            assert_eq!((a.x, a.y), (b.x, b.y));
        }
    }

    #[test]
    fn strong_noise_is_clamped_to_grid() {
        let cfg = SimulationConfig {
            random_force: 500.0,
            home_attraction: 0.0,
            ..small_cfg()
        };
        let mut engine = Engine::new(cfg, 2).unwrap();
        engine.run(&RunRequest::steps(3)).unwrap();
        let agents = engine.agent_snapshot(true);
        assert!(agents.iter().any(|a| a.x == 0.0 || a.x == 30.0));
        assert!(agents
            .iter()
            .all(|a| (0.0..=30.0).contains(&a.x) && (0.0..=30.0).contains(&a.y)));
    }

    #[test]
    fn quiescent_step_still_advances_time() {
        let cfg = SimulationConfig {
            infectious_mean: 0.5,
            infectious_std: 0.0,
            infection_rate: 0.0,
            mortality_rate: 0.0,
            ..small_cfg()
        };
        let mut engine = Engine::new(cfg, 4).unwrap();
        engine.step();
        let snap = engine.step();
        assert_eq!(snap.counts.infected, 0);
        assert_eq!(engine.status(), Status::Completed);

        let counts = snap.counts;
        let snap = engine.step();
        assert_eq!(snap.counts, counts);
        assert_eq!(snap.steps, 3);
        assert_eq!(snap.day, 1.5);
        assert_eq!(engine.history().len(), 4);
    }

    #[test]
    fn run_stops_when_no_infected() {
        let cfg = SimulationConfig {
            infectious_mean: 1.0,
            infectious_std: 0.0,
            infection_rate: 0.0,
            ..small_cfg()
        };
        let mut engine = Engine::new(cfg, 4).unwrap();
        let snap = engine
            .run(&RunRequest::steps(100).stop_when_no_infected(true))
            .unwrap();
        assert_eq!(snap.steps, 2);
        assert!(!snap.counts.is_active());

        let snap = engine
            .run(&RunRequest::steps(100).stop_when_no_infected(true))
            .unwrap();
        assert_eq!(snap.steps, 2);

        let snap = engine.run(&RunRequest::steps(10)).unwrap();
        assert_eq!(snap.steps, 12);
    }

    #[test]
    fn invalid_run_request_takes_no_step() {
        let mut engine = Engine::new(small_cfg(), 4).unwrap();
        let both = RunRequest {
            steps: Some(3),
            days: Some(1.0),
            stop_when_no_infected: false,
        };
        assert!(engine.run(&both).is_err());
        assert!(engine.run(&RunRequest::steps(20_000)).is_err());
        assert_eq!(engine.n_steps(), 0);
    }

    #[test]
    fn full_isolation_blocks_transmission() {
        let cfg = SimulationConfig {
            detection_probability: 1.0,
            isolation_compliance: 1.0,
            infection_rate: 10.0,
            incubation_mean: 1.0,
            ..small_cfg()
        };
        let mut engine = Engine::new(cfg, 8).unwrap();
        engine.run(&RunRequest::steps(30)).unwrap();
        let history = engine.history();
        assert!(history.exposed.iter().all(|&e| e == 0));
        assert_eq!(*history.susceptible.last().unwrap(), 195);
    }

    #[test]
    fn rt_is_recorded_every_step() {
        let mut engine = Engine::new(small_cfg(), 21).unwrap();
        engine.run(&RunRequest::steps(20)).unwrap();
        let rt = &engine.history().rt;
        assert_eq!(rt.len(), 21);
        assert_eq!(rt[0], 0.0);
        assert!(rt.iter().all(|r| r.is_finite() && *r >= 0.0));
    }
}
