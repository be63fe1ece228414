pub use warden_types::clock::{Clock, SystemClock};
pub use warden_types::error::{Error, WdResult};
pub use warden_types::types::{Timestamp, TnId};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
