use crate::analysis::{Analyzer, RunOutcome};
use crate::config::{Config, RunRequest};
use crate::registry::{Registry, SimulationId};
use crate::transform::{self, RiskAssessment};
use anyhow::{Context, Result, bail};
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

const OUTPUT_FILES: [&str; 4] = [
    "metrics.json",
    "seird.csv",
    "agents.geojson",
    "ensemble.json",
];

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
    registry: Registry,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self {
            sim_dir,
            cfg,
            registry: Registry::new(),
        })
    }

    /// Run one simulation and write its metrics, history and agents.
    pub fn run_simulation(&mut self, request: &RunRequest, seed: Option<u64>) -> Result<()> {
        let seed = seed.or(self.cfg.run.seed);
        let id = self
            .registry
            .create(self.cfg.simulation.clone(), seed)
            .context("failed to create simulation")?;

        let snapshot = self
            .registry
            .run(&id, request)
            .context("failed to run simulation")?;
        log::info!(
            "simulation {id} stopped at day {} ({:?})",
            snapshot.day,
            snapshot.counts
        );

        self.save_metrics(&id)?;
        self.save_history(&id)?;
        self.save_agents(&id)?;

        self.registry
            .delete(&id)
            .context("failed to delete simulation")?;
        Ok(())
    }

    /// Run `n_runs` simulations with consecutive seeds and aggregate their metrics.
    pub fn run_ensemble(&mut self, n_runs: usize, request: &RunRequest) -> Result<()> {
        if n_runs == 0 {
            bail!("number of runs must be positive");
        }
        let base_seed = self.cfg.run.seed.unwrap_or_else(rand::random);
        let mut analyzer = Analyzer::new();

        for i_run in 0..n_runs {
            let seed = base_seed.wrapping_add(i_run as u64);
            let id = self
                .registry
                .create(self.cfg.simulation.clone(), Some(seed))
                .context("failed to create simulation")?;
            self.registry
                .run(&id, request)
                .context("failed to run simulation")?;

            let metrics = self.registry.metrics(&id)?;
            let risk = RiskAssessment::from_metrics(&metrics, self.cfg.simulation.population_size);
            let counts = self.registry.get(&id)?.counts();
            analyzer.add_run(&RunOutcome {
                seed,
                metrics,
                risk,
                counts,
            });

            self.registry.delete(&id)?;
            log::info!("completed run {} of {n_runs}", i_run + 1);
        }

        let file = self.sim_dir.join("ensemble.json");
        analyzer
            .save_results(&file)
            .context("failed to save results")?;
        log::info!("wrote {file:?}");
        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        for name in OUTPUT_FILES {
            let file = self.sim_dir.join(name);
            if file.exists() {
                fs::remove_file(&file).with_context(|| format!("failed to remove {file:?}"))?;
                log::info!("removed {file:?}");
            }
        }
        Ok(())
    }

    fn save_metrics(&self, id: &SimulationId) -> Result<()> {
        let population = self.cfg.simulation.population_size;
        let metrics = self.registry.metrics(id)?;
        let risk = RiskAssessment::from_metrics(&metrics, population);
        let agents = self.registry.agents(id, true)?;

        let grid_size = self.cfg.simulation.grid_size;
        let density = population as f64 / (grid_size * grid_size);
        let danger_zone = transform::danger_zone_feature(
            &self.cfg.location,
            risk.risk_score,
            density,
            metrics.infected_percentage(population),
        );

        let engine = self.registry.get(id)?;
        let report = serde_json::json!({
            "simulation_id": id,
            "seed": engine.seed(),
            "status": engine.status(),
            "snapshot": engine.snapshot(),
            "metrics": metrics,
            "risk": risk,
            "danger_zone": danger_zone,
            "agent_summary": transform::summarize_agents(&agents),
        });

        let file = self.sim_dir.join("metrics.json");
        let writer = create_file(&file)?;
        serde_json::to_writer_pretty(writer, &report).context("failed to serialize metrics")?;
        log::info!("wrote {file:?}");
        Ok(())
    }

    fn save_history(&self, id: &SimulationId) -> Result<()> {
        let history = self.registry.stats(id)?;

        let file = self.sim_dir.join("seird.csv");
        let writer = create_file(&file)?;
        transform::write_seird_csv(history, self.cfg.simulation.time_step, writer)
            .context("failed to write history")?;
        log::info!("wrote {file:?}");
        Ok(())
    }

    fn save_agents(&self, id: &SimulationId) -> Result<()> {
        let agents = self.registry.agents(id, true)?;
        let geojson = transform::agents_to_geojson(&agents, &self.cfg.location);

        let file = self.sim_dir.join("agents.geojson");
        let writer = create_file(&file)?;
        serde_json::to_writer(writer, &geojson).context("failed to serialize agents")?;
        log::info!("wrote {file:?}");
        Ok(())
    }
}

fn create_file(file: &Path) -> Result<BufWriter<File>> {
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    Ok(BufWriter::new(file))
}
