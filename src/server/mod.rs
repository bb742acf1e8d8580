//! HTTP front end: router, handlers and shared state.

mod handlers;
mod router;
mod state;

pub use handlers::{GenerateParams, HealthResponse, StartResponse};
pub use router::{build_router, serve};
pub use state::{load_templates, AppState};
