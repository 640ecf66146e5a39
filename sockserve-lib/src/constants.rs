use std::time::Duration;

/// TCP backlog size
pub const TCP_BACKLOG: u32 = 1024;

/// Default deadline awaiting in-flight UDP packet handlers on stop.
/// Handlers still running when it expires are detached and finish best-effort.
pub const UDP_SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Default capacity of the bounded log record queue.
/// Producers suspend when the queue is full, records are never dropped.
pub const LOG_QUEUE_CAPACITY: usize = 4096;

/// Default number of days rotated log files are retained before eviction
pub const LOG_RETENTION_DAYS: u16 = 7;
