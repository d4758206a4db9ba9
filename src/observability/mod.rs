//! Observability module
//!
//! Logging, metrics, and the structured event stream used to follow an
//! assessment run from the outside.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventEmitter};
pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
