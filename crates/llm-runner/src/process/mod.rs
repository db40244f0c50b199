//! Supervision of runner processes: port selection, spawning, startup probing and teardown.
mod health;
mod port;
mod runner;
mod supervisor;


pub use port::{PortSelector, RandomPortSelector};
pub use runner::RunnerProcess;
pub use supervisor::RunnerSupervisor;
