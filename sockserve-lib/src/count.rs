use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

#[derive(Debug, Clone, Default)]
/// Counter for serving connections, set a shared counter if the total over several servers is needed
pub struct ConnectionCount(Arc<AtomicUsize>);

impl ConnectionCount {
  pub fn current(&self) -> usize {
    self.0.load(Ordering::Relaxed)
  }

  pub(crate) fn increment(&self) -> usize {
    self.0.fetch_add(1, Ordering::Relaxed)
  }

  pub(crate) fn decrement(&self) -> usize {
    let mut count;
    while {
      count = self.0.load(Ordering::Relaxed);
      count > 0
        && self
          .0
          .compare_exchange(count, count - 1, Ordering::Relaxed, Ordering::Relaxed)
          != Ok(count)
    } {}
    count
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_connection_count_basic() {
    let count = ConnectionCount::default();

    assert_eq!(count.current(), 0);

    count.increment();
    assert_eq!(count.current(), 1);

    count.increment();
    assert_eq!(count.current(), 2);

    count.decrement();
    assert_eq!(count.current(), 1);
  }

  #[test]
  fn test_connection_count_multiple_operations() {
    let count = ConnectionCount::default();

    // Simulate multiple connections over time
    for _ in 0..5 {
      count.increment();
      count.decrement();
    }

    assert_eq!(count.current(), 0);
  }

  #[test]
  fn test_connection_count_never_underflows() {
    let count = ConnectionCount::default();
    count.decrement();
    assert_eq!(count.current(), 0);
  }
}
