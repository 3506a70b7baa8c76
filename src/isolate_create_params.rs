// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use crate::local_scope::DEFAULT_HANDLES_PER_SEGMENT;

/// Initial configuration parameters for a new Isolate.
#[must_use]
#[derive(Debug, Clone)]
pub struct CreateParams {
  pub(crate) name: Option<String>,
  pub(crate) gc_threshold: Option<usize>,
  pub(crate) heap_capacity: usize,
  pub(crate) local_handles_per_segment: usize,
}

impl Default for CreateParams {
  fn default() -> Self {
    Self {
      name: None,
      gc_threshold: Some(4096),
      heap_capacity: 256,
      local_handles_per_segment: DEFAULT_HANDLES_PER_SEGMENT,
    }
  }
}

impl CreateParams {
  /// A name shown in diagnostics and log events.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Number of allocations after which a minor collection runs
  /// automatically. `None` disables automatic collection.
  pub fn gc_threshold(mut self, threshold: Option<usize>) -> Self {
    self.gc_threshold = threshold;
    self
  }

  /// Number of object slots reserved up front.
  pub fn heap_capacity(mut self, capacity: usize) -> Self {
    self.heap_capacity = capacity;
    self
  }

  /// Number of local handles per scope segment.
  ///
  /// # Panics
  ///
  /// Panics if `count` is zero.
  pub fn local_handles_per_segment(mut self, count: usize) -> Self {
    assert!(count > 0, "segments must hold at least one handle");
    self.local_handles_per_segment = count;
    self
  }
}

#[test]
fn create_param_defaults() {
  let params = CreateParams::default();
  assert_eq!(params.gc_threshold, Some(4096));
  assert_eq!(params.local_handles_per_segment, 64);
  assert!(params.name.is_none());
  let params = params.name("worker").gc_threshold(None);
  assert_eq!(params.name.as_deref(), Some("worker"));
  assert_eq!(params.gc_threshold, None);
}
