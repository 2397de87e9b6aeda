//! Agent-based spatial SEIRD epidemic simulation.
//!
//! [`engine::Engine`] moves agents over a square grid and spreads infection
//! between neighbours; [`metrics::EpidemicMetrics`] and [`transform`] turn its
//! history into epidemiological indicators, risk scores and GeoJSON.

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod spatial;
pub mod stats;
pub mod transform;

pub use config::{Location, RunRequest, SimulationConfig};
pub use engine::{Engine, History, SeirdCounts, Snapshot, Status};
pub use error::SimError;
pub use metrics::EpidemicMetrics;
pub use model::{AgentSnapshot, Compartment};
pub use registry::{Registry, SimulationId};
