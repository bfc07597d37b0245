//! Table-side ordering backend: QR-scoped table sessions, a realtime event
//! router for customers and staff dashboards, and payment callback
//! verification.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod security_code;
    pub mod tokens;
    pub mod webhook;
}

pub mod models {
    pub mod events;
    pub mod session;
    pub mod staff;
}

pub mod repositories {
    pub mod redis_session;
    pub mod session;
}

pub mod services {
    pub mod janitor;
    pub mod orders;
    pub mod realtime;
    pub mod sessions;
}

pub mod handlers {
    pub mod events;
    pub mod realtime;
    pub mod sessions;
    pub mod webhooks;
}

pub mod middleware_layer {
    pub mod auth;
}

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
