//! Engine configuration and competitor definitions

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Search strength for single decisions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    /// Deepest search iteration allowed at this level
    pub fn search_depth(self) -> u32 {
        match self {
            Difficulty::Easy => 2,
            Difficulty::Medium => 4,
            Difficulty::Hard => 8,
            Difficulty::Expert => 16,
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" | "1" => Ok(Difficulty::Easy),
            "medium" | "2" => Ok(Difficulty::Medium),
            "hard" | "3" => Ok(Difficulty::Hard),
            "expert" | "4" => Ok(Difficulty::Expert),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// Configuration handed to an engine when it is created
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Strength used for single decisions
    pub difficulty: Difficulty,
    /// Time budget per decision
    pub time_limit: Duration,
    /// Node budget per decision (None = unlimited)
    pub max_nodes: Option<u64>,
    /// Attach search diagnostics to decisions
    pub debug: bool,
    /// Random seed for search noise (None = fixed default)
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Medium,
            time_limit: Duration::from_secs(2),
            max_nodes: None,
            debug: false,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: Option<u64>) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The runtime-adjustable subset of this configuration
    pub fn update(&self) -> ConfigUpdate {
        ConfigUpdate {
            difficulty: self.difficulty,
            time_limit: self.time_limit,
            debug: self.debug,
        }
    }

    pub fn apply(&mut self, update: &ConfigUpdate) {
        self.difficulty = update.difficulty;
        self.time_limit = update.time_limit;
        self.debug = update.debug;
    }
}

/// Settings that may change after an engine is running
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub difficulty: Difficulty,
    pub time_limit: Duration,
    pub debug: bool,
}

/// A configured bot taking part in a tournament
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitorSpec {
    pub name: String,
    /// Deepest search iteration
    pub depth: u32,
    /// Random jitter added to root move scores
    #[serde(default)]
    pub noise: u32,
}

impl CompetitorSpec {
    pub fn new(name: &str, depth: u32) -> Self {
        Self {
            name: name.to_string(),
            depth,
            noise: 0,
        }
    }

    pub fn with_noise(mut self, noise: u32) -> Self {
        self.noise = noise;
        self
    }

    /// Built-in roster spanning greedy to deep searchers
    pub fn default_roster() -> Vec<CompetitorSpec> {
        vec![
            CompetitorSpec::new("greedy", 1),
            CompetitorSpec::new("shallow", 2).with_noise(1),
            CompetitorSpec::new("medium", 4),
            CompetitorSpec::new("deep", 8),
        ]
    }

    /// Load a roster from a JSON array of competitors
    pub fn load_roster(path: &Path) -> anyhow::Result<Vec<CompetitorSpec>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read roster: {}", path.display()))?;
        let roster: Vec<CompetitorSpec> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse roster: {}", path.display()))?;
        Ok(roster)
    }
}
