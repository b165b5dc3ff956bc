use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::mem::dispatcher::DispatcherParams;
use crate::mem::packet::{Requester, Tick, Tier};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// One storage tier behind the dispatcher
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierSection {
  pub start: u64,
  pub end: u64,
  pub latency: Tick,
  pub queue_depth: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CounterSection {
  pub latency: Tick,
  pub queue_depth: usize,
  #[serde(default = "default_page_shift")]
  pub page_shift: u32,
}

fn default_page_shift() -> u32 {
  12
}

/// Workload of one requester
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficSection {
  pub requests: u64,
  pub base: u64,
  pub stride: u64,
  pub interval: Tick,
  #[serde(default = "default_size")]
  pub size: u32,
  pub response_depth: usize,
  pub drain_latency: Tick,
}

fn default_size() -> u32 {
  64
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficConfig {
  pub remapping_table: TrafficSection,
  pub migration_manager: TrafficSection,
}

impl TrafficConfig {
  pub fn get(&self, who: Requester) -> &TrafficSection {
    match who {
      Requester::RemappingTable => &self.remapping_table,
      Requester::MigrationManager => &self.migration_manager,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  /// 0 runs until the event queue empties.
  #[serde(default)]
  pub max_ticks: Tick,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub dispatcher: DispatcherParams,
  pub fast_tier: TierSection,
  pub slow_tier: TierSection,
  pub access_counter: CounterSection,
  pub traffic: TrafficConfig,
  #[serde(default)]
  pub simulation: SimulationSection,
}

impl AppConfig {
  pub fn tier(&self, tier: Tier) -> &TierSection {
    match tier {
      Tier::Fast => &self.fast_tier,
      Tier::Slow => &self.slow_tier,
    }
  }
}

impl Default for AppConfig {
  fn default() -> Self {
    // The embedded defaults are covered by tests; failing here is a build defect.
    match load_layers(None, false) {
      Ok(config) => config,
      Err(e) => panic!("built-in default.toml is invalid: {}", e),
    }
  }
}

fn invalid(msg: String) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn load_layers(custom_path: Option<&Path>, with_env: bool) -> io::Result<AppConfig> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

  if let Some(path) = custom_path {
    if !path.exists() {
      return Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("cannot read config file {:?}", path),
      ));
    }
    builder = builder.add_source(File::from(path.to_path_buf()).format(FileFormat::Toml));
  }

  if with_env {
    builder = builder.add_source(Environment::with_prefix("TIERMEM").separator("__").try_parsing(true));
  }

  builder
    .build()
    .and_then(|c| c.try_deserialize::<AppConfig>())
    .map_err(|e| invalid(format!("failed to parse config: {}", e)))
}

/// Load configuration
///
/// Layers, later ones overriding earlier ones:
/// 1. built-in default.toml
/// 2. the custom file, if given
/// 3. TIERMEM__SECTION__KEY environment variables
pub fn load_config(custom_path: Option<&Path>) -> io::Result<AppConfig> {
  load_layers(custom_path, true)
}

/// Apply CLI arguments on top of the loaded configuration
pub fn apply_cli_overrides(config: &mut AppConfig, quiet: bool, step: bool, trace_file: Option<&str>, max_ticks: Option<Tick>) {
  if quiet {
    config.simulation.quiet = true;
  }
  if step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = trace_file {
    config.simulation.trace_file = file.to_string();
  }
  if let Some(ticks) = max_ticks {
    config.simulation.max_ticks = ticks;
  }
}

fn validate_tier(name: &str, tier: &TierSection) -> io::Result<()> {
  if tier.end <= tier.start {
    return Err(invalid(format!(
      "{} range [{:#x}, {:#x}) is empty",
      name, tier.start, tier.end
    )));
  }
  if tier.queue_depth == 0 {
    return Err(invalid(format!("{}.queue_depth cannot be 0", name)));
  }
  Ok(())
}

/// Validate configuration
pub fn validate_config(config: &AppConfig) -> io::Result<()> {
  validate_tier("fast_tier", &config.fast_tier)?;
  validate_tier("slow_tier", &config.slow_tier)?;

  if config.fast_tier.start >= config.dispatcher.fast_tier_capacity {
    return Err(invalid(format!(
      "fast_tier starts at {:#x}, at or above fast_tier_capacity {:#x}",
      config.fast_tier.start, config.dispatcher.fast_tier_capacity
    )));
  }

  if config.access_counter.queue_depth == 0 {
    return Err(invalid("access_counter.queue_depth cannot be 0".to_string()));
  }
  if config.access_counter.page_shift >= 64 {
    return Err(invalid(format!(
      "access_counter.page_shift {} is out of range",
      config.access_counter.page_shift
    )));
  }

  for who in Requester::ALL {
    let traffic = config.traffic.get(who);
    if traffic.interval == 0 {
      return Err(invalid(format!("traffic.{}.interval cannot be 0", who)));
    }
    if traffic.response_depth == 0 {
      return Err(invalid(format!("traffic.{}.response_depth cannot be 0", who)));
    }
  }

  Ok(())
}

/// Render the effective configuration as TOML
pub fn dump_config(config: &AppConfig) -> io::Result<String> {
  toml::to_string_pretty(config).map_err(|e| invalid(format!("failed to render config: {}", e)))
}
