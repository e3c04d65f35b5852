mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::{InspectorApp, ShutdownHandle};
pub use types::{ComponentState, ShutdownReason};
