#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  Continuous,
  Step,
}

impl StepMode {
  pub fn from_flag(step: bool) -> Self {
    if step {
      StepMode::Step
    } else {
      StepMode::Continuous
    }
  }
}
