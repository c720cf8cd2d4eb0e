pub mod application;
pub mod worker;

pub use application::{Application, ApplicationBuilder, WatchSettings};
pub use worker::{WorkerInstance, WorkerSnapshot};
