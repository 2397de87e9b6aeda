//! Live simulations keyed by id.
//!
//! A [`Registry`] gives exclusive access to each engine through `&mut self`.
//! Hosts serving concurrent requests wrap it, or each engine, in a lock.

use crate::config::{RunRequest, SimulationConfig};
use crate::engine::{Engine, History, Snapshot, Status};
use crate::error::SimError;
use crate::metrics::EpidemicMetrics;
use crate::model::AgentSnapshot;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};
use uuid::Uuid;

/// Identifier of a registered simulation, `sim_` followed by 12 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimulationId(String);

impl SimulationId {
    fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("sim_{}", &hex[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SimulationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Summary of a registered simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub id: SimulationId,
    pub status: Status,
    pub seed: u64,
    pub snapshot: Snapshot,
}

#[derive(Default)]
pub struct Registry {
    engines: HashMap<SimulationId, Engine>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a simulation and return its id.
    ///
    /// Uses `seed` for the engine's random number generator, or a random
    /// seed when `None`.
    ///
    /// # Errors
    /// Returns [`SimError::Validation`] if `cfg` is invalid.
    pub fn create(
        &mut self,
        cfg: SimulationConfig,
        seed: Option<u64>,
    ) -> Result<SimulationId, SimError> {
        let seed = seed.unwrap_or_else(rand::random);
        let engine = Engine::new(cfg, seed)?;
        let mut id = SimulationId::generate();
        while self.engines.contains_key(&id) {
            id = SimulationId::generate();
        }
        log::info!("created simulation {id} (seed {seed})");
        self.engines.insert(id.clone(), engine);
        Ok(id)
    }

    pub fn get(&self, id: &SimulationId) -> Result<&Engine, SimError> {
        self.engines
            .get(id)
            .ok_or_else(|| SimError::NotFound(id.clone()))
    }

    fn get_mut(&mut self, id: &SimulationId) -> Result<&mut Engine, SimError> {
        self.engines
            .get_mut(id)
            .ok_or_else(|| SimError::NotFound(id.clone()))
    }

    /// Advance a simulation by one step.
    pub fn step(&mut self, id: &SimulationId) -> Result<Snapshot, SimError> {
        Ok(self.get_mut(id)?.step())
    }

    /// Advance a simulation as `request` asks.
    pub fn run(&mut self, id: &SimulationId, request: &RunRequest) -> Result<Snapshot, SimError> {
        self.get_mut(id)?.run(request)
    }

    pub fn stats(&self, id: &SimulationId) -> Result<&History, SimError> {
        Ok(self.get(id)?.history())
    }

    pub fn agents(
        &self,
        id: &SimulationId,
        include_deceased: bool,
    ) -> Result<Vec<AgentSnapshot>, SimError> {
        Ok(self.get(id)?.agent_snapshot(include_deceased))
    }

    pub fn metrics(&self, id: &SimulationId) -> Result<EpidemicMetrics, SimError> {
        let engine = self.get(id)?;
        Ok(EpidemicMetrics::from_history(
            engine.history(),
            engine.config(),
        ))
    }

    pub fn status(&self, id: &SimulationId) -> Result<Status, SimError> {
        Ok(self.get(id)?.status())
    }

    /// Summaries of all simulations, ordered by id.
    pub fn list(&self) -> Vec<SimulationSummary> {
        let mut summaries: Vec<_> = self
            .engines
            .iter()
            .map(|(id, engine)| SimulationSummary {
                id: id.clone(),
                status: engine.status(),
                seed: engine.seed(),
                snapshot: engine.snapshot(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Remove a simulation, releasing its memory.
    pub fn delete(&mut self, id: &SimulationId) -> Result<(), SimError> {
        self.engines
            .remove(id)
            .ok_or_else(|| SimError::NotFound(id.clone()))?;
        log::info!("deleted simulation {id}");
        Ok(())
    }
}
