mod subscriber;

pub use subscriber::{LOG_FORMAT_VAR, init, init_with_level};
pub use tracing::level_filters::LevelFilter;
