pub mod middleware;
pub mod routes;
pub mod tokens;

pub use routes::{AppState, AppStateInner};
