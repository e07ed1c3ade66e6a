/*!
 * Prelude module for StationLink Core.
 *
 * Re-exports the commonly used types and functions of this crate.
 */

pub use crate::error::{Error, Result};

pub use crate::types::{Endpoint, Id};

pub use crate::event::{EventBus, SharedEventBus};

pub use crate::config::{Backend, Config, ConfigBuilder, SharedConfig};

pub use crate::logging::{component_span, init_with_filter};

pub use crate::utils::retry_until_ok;

pub use tracing::{debug, error, info, trace, warn};
