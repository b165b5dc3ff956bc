use env_logger::Env;
use log::LevelFilter;

/// Initialise logging once. `RUST_LOG` wins, otherwise `info`.
pub fn init_log() {
  let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
    .format_timestamp(None)
    .try_init();
}

/// Quiet mode keeps warnings and errors only.
pub fn set_quiet(quiet: bool) {
  if quiet {
    log::set_max_level(LevelFilter::Warn);
  }
}
