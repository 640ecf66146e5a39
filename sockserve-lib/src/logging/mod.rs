mod level;
mod record;
mod rotation;
mod writer;

pub use level::Level;
pub use writer::{LogConfig, LogConfigBuilder, LogOutput, LogWriter};
