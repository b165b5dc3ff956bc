pub mod config;

pub use config::{
  apply_cli_overrides, dump_config, load_config, validate_config, AppConfig, CounterSection, SimulationSection,
  TierSection, TrafficConfig, TrafficSection,
};
