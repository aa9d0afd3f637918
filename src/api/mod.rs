//! HTTP integrity layer.
//!
//! Hot business routes pass through correlation, device proof and
//! idempotency middleware before reaching their handlers. Every rejection
//! is an `application/problem+json` body carrying a stable `error_code`.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod types;

pub use error::{ApiError, Problem};
pub use router::integrity_router;
pub use types::{ApiContext, DeviceContext, RequestMeta, RoutePolicy};
