//! Confidence-gated routing between the student and the council.

mod buffer;
mod engine;
mod metrics;

pub use buffer::EscalationBuffer;
pub use engine::{
    spawn_router_loop, RouteOutcome, Router, RouterEvent, RouterHandle, RouterStatus,
};
pub use metrics::SystemMetrics;
