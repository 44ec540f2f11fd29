pub mod metrics;
pub mod owner;

pub use metrics::http_metrics_middleware;
pub use owner::{OwnerContext, OWNER_ID_HEADER};
