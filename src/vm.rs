// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.

//! Process-wide VM state.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobalState {
  Uninitialized,
  Initialized,
  Disposed,
}
use GlobalState::*;

static GLOBAL_STATE: Mutex<GlobalState> = Mutex::new(Uninitialized);

static LIVE_ISOLATES: AtomicUsize = AtomicUsize::new(0);

fn global_state() -> GlobalState {
  *GLOBAL_STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Initializes the VM. Must be called before the first isolate is created.
/// Calling it again while the VM is initialized has no effect.
///
/// # Panics
///
/// Panics if the VM has already been disposed.
pub fn initialize() {
  let mut state = GLOBAL_STATE.lock().unwrap_or_else(PoisonError::into_inner);
  match *state {
    Uninitialized => {
      *state = Initialized;
      tracing::debug!(version = get_version(), "vm initialized");
    }
    Initialized => {}
    Disposed => panic!("Invalid global state"),
  }
}

/// Panics unless the VM is initialized and not yet disposed.
pub(crate) fn assert_initialized() {
  if global_state() != Initialized {
    panic!("Invalid global state");
  }
}

/// Releases the process-wide VM state. Afterwards no isolate can be
/// created, and the VM cannot be initialized again.
///
/// # Panics
///
/// Panics if the VM is not initialized or any isolate is still alive.
pub fn dispose() -> bool {
  let mut state = GLOBAL_STATE.lock().unwrap_or_else(PoisonError::into_inner);
  if *state != Initialized {
    panic!("Invalid global state");
  }
  let live = LIVE_ISOLATES.load(Ordering::SeqCst);
  if live != 0 {
    panic!("attempt to dispose the VM while {live} isolate(s) are alive");
  }
  *state = Disposed;
  tracing::debug!("vm disposed");
  true
}

/// Get the version string.
pub fn get_version() -> &'static str {
  env!("CARGO_PKG_VERSION")
}

/// Number of isolates that have been created and not yet disposed.
pub fn live_isolate_count() -> usize {
  LIVE_ISOLATES.load(Ordering::SeqCst)
}

pub(crate) fn isolate_created() {
  LIVE_ISOLATES.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn isolate_disposed() {
  LIVE_ISOLATES.fetch_sub(1, Ordering::SeqCst);
}
