pub mod commitment;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod notify;
pub mod timer;
pub mod turns;

pub use engine::GameEngine;
pub use error::{GameError, Result};
pub use notify::{GameRef, Notifier};
