use chrono::NaiveDate;
use std::{
  fs::{File, OpenOptions},
  io::{self, Write},
  path::PathBuf,
};

/// Rotating file sink of the log consumer.
///
/// Only the active file is tracked. Rotation is driven by the date stamp of
/// each record's capture time and, when `rotation_bytes` is positive, by the
/// projected size of the active file. Retention is enforced best-effort on
/// each date rotation.
pub(crate) struct LogFile {
  directory: PathBuf,
  prefix: String,
  retention_days: u16,
  /// Size threshold in bytes, 0 disables size-based rotation
  rotation_bytes: u64,
  file: Option<File>,
  /// `YYYYMMDD` stamp of the open file
  date_stamp: String,
  /// Size-rotation counter for the current date, 0 is the unsuffixed file
  seq: u32,
  /// Bytes written to the open file so far
  written: u64,
}

impl LogFile {
  pub(crate) fn new(directory: PathBuf, prefix: String, retention_days: u16, rotation_bytes: u64) -> Self {
    Self {
      directory,
      prefix,
      retention_days,
      rotation_bytes,
      file: None,
      date_stamp: String::new(),
      seq: 0,
      written: 0,
    }
  }

  /// Append one line for a record captured on `stamp` (`YYYYMMDD`),
  /// rotating first when the date changed or the size threshold would be hit
  pub(crate) fn write_line(&mut self, stamp: &str, line: &str) -> io::Result<()> {
    let line_len = line.len() as u64 + 1;
    if self.file.is_none() || stamp != self.date_stamp {
      self.roll_to_date(stamp)?;
    } else if self.rotation_bytes > 0 && self.written > 0 && self.written + line_len > self.rotation_bytes {
      self.roll_next_seq()?;
    }
    let Some(file) = self.file.as_mut() else {
      return Err(io::Error::other("no active log file"));
    };
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    self.written += line_len;
    Ok(())
  }

  pub(crate) fn flush(&mut self) -> io::Result<()> {
    if let Some(file) = self.file.as_mut() {
      file.flush()?;
    }
    Ok(())
  }

  /// Close the active file handle. The next write reopens.
  pub(crate) fn close(&mut self) {
    self.file = None;
  }

  /// Path of a file for the current date, `seq == 0` is the unsuffixed one
  fn path_for(&self, stamp: &str, seq: u32) -> PathBuf {
    let name = if seq == 0 {
      format!("{}_{stamp}.log", self.prefix)
    } else {
      format!("{}_{stamp}_{seq:02}.log", self.prefix)
    };
    self.directory.join(name)
  }

  /// Move the active file to the given date. Resumes at the highest
  /// already-present rotation counter for that date, then evicts files
  /// beyond the retention window.
  fn roll_to_date(&mut self, stamp: &str) -> io::Result<()> {
    self.file = None;
    self.seq = self.max_existing_seq(stamp);
    self.open_active(stamp)?;
    self.date_stamp = stamp.to_string();
    self.evict_expired(stamp);
    Ok(())
  }

  /// Move the active file to the next rotation counter of the same date
  fn roll_next_seq(&mut self) -> io::Result<()> {
    self.file = None;
    self.seq += 1;
    let stamp = self.date_stamp.clone();
    self.open_active(&stamp)
  }

  fn open_active(&mut self, stamp: &str) -> io::Result<()> {
    let path = self.path_for(stamp, self.seq);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
    self.file = Some(file);
    Ok(())
  }

  /// Highest rotation counter already present for the date, 0 when only the
  /// unsuffixed file (or nothing) exists
  fn max_existing_seq(&self, stamp: &str) -> u32 {
    let Ok(entries) = std::fs::read_dir(&self.directory) else {
      return 0;
    };
    let wanted = format!("{}_{stamp}_", self.prefix);
    entries
      .flatten()
      .filter_map(|entry| {
        let name = entry.file_name();
        let name = name.to_str()?;
        let counter = name.strip_prefix(wanted.as_str())?.strip_suffix(".log")?;
        counter.parse::<u32>().ok()
      })
      .max()
      .unwrap_or(0)
  }

  /// Best-effort eviction of files older than the retention window.
  /// Failures are reported to stderr and never raised.
  fn evict_expired(&self, stamp: &str) {
    if self.retention_days == 0 {
      return;
    }
    let Ok(today) = NaiveDate::parse_from_str(stamp, "%Y%m%d") else {
      return;
    };
    let cutoff = today - chrono::Duration::days(self.retention_days as i64);
    let Ok(entries) = std::fs::read_dir(&self.directory) else {
      return;
    };
    let wanted = format!("{}_", self.prefix);
    for entry in entries.flatten() {
      let name = entry.file_name();
      let Some(name) = name.to_str() else { continue };
      let Some(rest) = name.strip_prefix(wanted.as_str()) else {
        continue;
      };
      if !name.ends_with(".log") {
        continue;
      }
      let Some(stamp_part) = rest.get(..8) else { continue };
      let Ok(date) = NaiveDate::parse_from_str(stamp_part, "%Y%m%d") else {
        continue;
      };
      if date < cutoff {
        if let Err(e) = std::fs::remove_file(entry.path()) {
          eprintln!("log writer: failed to evict {name}: {e}");
        }
      }
    }
  }
}
