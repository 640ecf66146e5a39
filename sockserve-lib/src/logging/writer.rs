use super::{
  level::Level,
  record::{Caller, Record},
  rotation::LogFile,
};
use crate::{
  constants::{LOG_QUEUE_CAPACITY, LOG_RETENTION_DAYS},
  error::LogError,
  time_util::date_stamp,
};
use chrono::Local;
use std::{
  future::Future,
  io::Write,
  panic::Location,
  path::PathBuf,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU8, Ordering},
  },
  thread,
};
use tokio::sync::{mpsc, oneshot};

/* ---------------------------------------------------------- */
/// Output destination of a log writer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogOutput {
  /// Write to standard output (default)
  #[default]
  Stdout,
  /// Write to standard error
  Stderr,
  /// Write to daily-rotated files `<prefix>_<YYYYMMDD>.log` under `directory`
  File { directory: PathBuf, prefix: String },
}

#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(default)]
/// Configuration of a [`LogWriter`]
pub struct LogConfig {
  /// Severity threshold; records above it are dropped at the producer
  threshold: Level,
  /// Output destination
  output: LogOutput,
  /// Capture the caller's source file basename and line into each record
  capture_caller: bool,
  /// Days rotated files are retained, 0 keeps them forever. File output only.
  retention_days: u16,
  /// Capacity of the bounded record queue; full queue suspends producers
  queue_capacity: usize,
  /// Size-based rotation threshold in bytes, 0 disables. File output only.
  rotation_bytes: u64,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      threshold: Level::Info,
      output: LogOutput::Stdout,
      capture_caller: false,
      retention_days: LOG_RETENTION_DAYS,
      queue_capacity: LOG_QUEUE_CAPACITY,
      rotation_bytes: 0,
    }
  }
}

/* ---------------------------------------------------------- */
/// Asynchronous, level-filtered, rotating log writer.
///
/// Producers enqueue rendered records onto a bounded queue; a single
/// background consumer serializes them to the configured destination.
/// Enqueue order per producer is write order. The writer is an explicit
/// value: clone the handle to share it, [`shutdown`](Self::shutdown) it to
/// tear the pipeline down.
#[derive(Clone)]
pub struct LogWriter {
  inner: Arc<WriterInner>,
}

struct WriterInner {
  threshold: AtomicU8,
  capture_caller: bool,
  tx: mpsc::Sender<Command>,
  consumer: Mutex<Option<thread::JoinHandle<()>>>,
  closed: AtomicBool,
}

enum Command {
  Record(Record),
  Flush(oneshot::Sender<()>),
  Quit(oneshot::Sender<()>),
}

impl LogWriter {
  /// Validate the configuration and start the background consumer
  pub fn spawn(config: LogConfig) -> Result<Self, LogError> {
    if config.queue_capacity == 0 {
      return Err(LogError::InvalidConfig(String::from("queue capacity must be positive")));
    }
    let mut sink = LogSink::open(&config)?;
    let (tx, mut rx) = mpsc::channel::<Command>(config.queue_capacity);

    let consumer = thread::Builder::new()
      .name(String::from("log-writer"))
      .spawn(move || consume(&mut rx, &mut sink))
      .map_err(LogError::IoError)?;

    Ok(Self {
      inner: Arc::new(WriterInner {
        threshold: AtomicU8::new(config.threshold.ordinal()),
        capture_caller: config.capture_caller,
        tx,
        consumer: Mutex::new(Some(consumer)),
        closed: AtomicBool::new(false),
      }),
    })
  }

  /// Current severity threshold
  pub fn threshold(&self) -> Level {
    Level::from_ordinal(self.inner.threshold.load(Ordering::Relaxed))
  }

  /// Change the severity threshold at runtime
  pub fn set_threshold(&self, level: Level) {
    self.inner.threshold.store(level.ordinal(), Ordering::Relaxed);
  }

  /// Enqueue a fatal record, drain the pipeline and terminate the process
  /// with a non-zero status. This method does not return.
  #[must_use = "futures do nothing unless awaited"]
  #[track_caller]
  pub fn fatal(&self, message: impl Into<String>) -> impl Future<Output = ()> + Send + '_ {
    let send = self.enqueue(Level::Fatal, message.into(), Location::caller());
    async move {
      send.await;
      self.flush().await;
      std::process::exit(1);
    }
  }

  #[must_use = "futures do nothing unless awaited"]
  #[track_caller]
  pub fn error(&self, message: impl Into<String>) -> impl Future<Output = ()> + Send + '_ {
    self.enqueue(Level::Error, message.into(), Location::caller())
  }

  #[must_use = "futures do nothing unless awaited"]
  #[track_caller]
  pub fn warn(&self, message: impl Into<String>) -> impl Future<Output = ()> + Send + '_ {
    self.enqueue(Level::Warn, message.into(), Location::caller())
  }

  #[must_use = "futures do nothing unless awaited"]
  #[track_caller]
  pub fn info(&self, message: impl Into<String>) -> impl Future<Output = ()> + Send + '_ {
    self.enqueue(Level::Info, message.into(), Location::caller())
  }

  #[must_use = "futures do nothing unless awaited"]
  #[track_caller]
  pub fn debug(&self, message: impl Into<String>) -> impl Future<Output = ()> + Send + '_ {
    self.enqueue(Level::Debug, message.into(), Location::caller())
  }

  #[must_use = "futures do nothing unless awaited"]
  #[track_caller]
  pub fn trace(&self, message: impl Into<String>) -> impl Future<Output = ()> + Send + '_ {
    self.enqueue(Level::Trace, message.into(), Location::caller())
  }

  /// The threshold check, timestamp and caller capture run on the caller's
  /// thread; the returned future performs the (possibly suspending) enqueue.
  fn enqueue(&self, level: Level, message: String, location: &'static Location<'static>) -> impl Future<Output = ()> + Send + '_ {
    let record = (level.ordinal() <= self.inner.threshold.load(Ordering::Relaxed)).then(|| Record {
      level,
      message,
      timestamp: Local::now(),
      caller: self.inner.capture_caller.then(|| Caller {
        file: basename(location.file()).to_string(),
        line: location.line(),
      }),
    });
    async move {
      if let Some(record) = record {
        // a full queue suspends the producer; after shutdown the send fails
        // and the record is discarded
        let _ = self.inner.tx.send(Command::Record(record)).await;
      }
    }
  }

  /// Return once every record enqueued before this call has been written.
  /// Records enqueued afterwards are not covered.
  pub async fn flush(&self) {
    let (ack_tx, ack_rx) = oneshot::channel();
    if self.inner.tx.send(Command::Flush(ack_tx)).await.is_ok() {
      let _ = ack_rx.await;
    }
  }

  /// Drain the queue, stop the consumer and close any open file. Idempotent.
  pub async fn shutdown(&self) {
    if self.inner.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let (ack_tx, ack_rx) = oneshot::channel();
    if self.inner.tx.send(Command::Quit(ack_tx)).await.is_ok() {
      let _ = ack_rx.await;
    }
    let handle = self.inner.consumer.lock().ok().and_then(|mut guard| guard.take());
    if let Some(handle) = handle {
      let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    }
  }
}

/// Consumer loop, runs on the dedicated log-writer thread.
/// The queue is FIFO, so a flush or quit acknowledgment implies every record
/// enqueued before it has been written.
fn consume(rx: &mut mpsc::Receiver<Command>, sink: &mut LogSink) {
  while let Some(command) = rx.blocking_recv() {
    match command {
      Command::Record(record) => sink.write_record(&record),
      Command::Flush(ack) => {
        sink.flush();
        let _ = ack.send(());
      }
      Command::Quit(ack) => {
        sink.flush();
        sink.close();
        let _ = ack.send(());
        return;
      }
    }
  }
  // all producer handles dropped without an explicit shutdown
  sink.flush();
  sink.close();
}

/* ---------------------------------------------------------- */
/// Active destination of the consumer
enum LogSink {
  Stdout,
  Stderr,
  File(LogFile),
}

impl LogSink {
  fn open(config: &LogConfig) -> Result<Self, LogError> {
    match &config.output {
      LogOutput::Stdout => Ok(Self::Stdout),
      LogOutput::Stderr => Ok(Self::Stderr),
      LogOutput::File { directory, prefix } => {
        if directory.as_os_str().is_empty() {
          return Err(LogError::InvalidConfig(String::from("empty log directory")));
        }
        if prefix.is_empty() {
          return Err(LogError::InvalidConfig(String::from("empty log file prefix")));
        }
        std::fs::create_dir_all(directory)?;
        Ok(Self::File(LogFile::new(
          directory.clone(),
          prefix.clone(),
          config.retention_days,
          config.rotation_bytes,
        )))
      }
    }
  }

  /// Write errors cannot be surfaced to the producer; they go to stderr and
  /// the consumer continues
  fn write_record(&mut self, record: &Record) {
    let line = record.format_line();
    let res = match self {
      Self::Stdout => writeln!(std::io::stdout(), "{line}"),
      Self::Stderr => writeln!(std::io::stderr(), "{line}"),
      Self::File(file) => file.write_line(&date_stamp(&record.timestamp), &line),
    };
    if let Err(e) = res {
      eprintln!("log writer: failed to write record: {e}");
    }
  }

  fn flush(&mut self) {
    let res = match self {
      Self::Stdout => std::io::stdout().flush(),
      Self::Stderr => std::io::stderr().flush(),
      Self::File(file) => file.flush(),
    };
    if let Err(e) = res {
      eprintln!("log writer: failed to flush: {e}");
    }
  }

  fn close(&mut self) {
    if let Self::File(file) = self {
      file.close();
    }
  }
}

/// Basename of a source path as captured by `Location::caller`
fn basename(path: &str) -> &str {
  path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/* ---------------------------------------------------------- */
