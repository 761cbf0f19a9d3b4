//! Session orchestration: state machine, request pipeline, and the
//! controller facade that sequences them.

pub mod controller;
pub(crate) mod pipeline;
pub mod state;

pub use controller::{CameraController, Notice};
pub use state::StateCell;
