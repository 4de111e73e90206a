//! Step execution support that lives inside the core: the `run`-step
//! runner and its environment contract. Built-in steps are executed by the
//! external terraform runner.

pub mod run_step;

pub use run_step::RunStepRunner;
