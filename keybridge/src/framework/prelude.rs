pub use crate::debug_once;
pub use crate::framework::logging::init_logger;
pub use crate::framework::logging::{debug, error, info, trace, warn};
pub use crate::framework::util::HashMap;
pub use crate::ternary;
pub use crate::warn_once;
