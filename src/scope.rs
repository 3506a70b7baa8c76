// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.

//! RAII guards for the paired enter/exit operations of the API.
//!
//! - `HandleScope<'i>` enters a local handle scope and exits it on drop.
//!   Scopes must be dropped in the reverse order of their creation.
//! - `NoGcScope<'i>` forbids garbage collection while it is alive.
//! - `NoCallbackScope<'i>` makes callbacks into native code, and fresh
//!   error allocations, yield the acquired error instead.
//! - `IsolateScope<'i>` makes an isolate current and restores the previously
//!   current isolate on drop, on every exit path.
//!
//! All guards deref to `Isolate` and are bound to the thread they were
//! created on.

use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::isolate;
use crate::isolate::Isolate;
use crate::local_scope::ScopeId;

/// A stack-allocated scope owning local handles. Entering pushes a fresh
/// scope on the isolate's local scope stack; dropping pops it and
/// invalidates every handle created in it.
#[must_use]
#[derive(Debug)]
pub struct HandleScope<'i> {
  isolate: &'i Isolate,
  id: ScopeId,
  _not_send: PhantomData<*mut ()>,
}

impl<'i> HandleScope<'i> {
  /// # Panics
  ///
  /// Panics if `isolate` is not the current isolate.
  pub fn new(isolate: &'i Isolate) -> Self {
    if !isolate.is_current() {
      panic!("HandleScope::new expects the isolate to be the current isolate");
    }
    let id = isolate.api_state_mut().local_scopes.enter();
    tracing::trace!(depth = id.depth, "enter scope");
    Self {
      isolate,
      id,
      _not_send: PhantomData,
    }
  }
}

impl Drop for HandleScope<'_> {
  fn drop(&mut self) {
    if std::thread::panicking() {
      if let Ok(mut state) = self.isolate.try_api_state_mut() {
        if state.local_scopes.top() == Some(self.id) {
          state.local_scopes.exit();
        }
      }
      return;
    }
    let top = self.isolate.api_state_mut().local_scopes.top();
    if top != Some(self.id) {
      panic!("HandleScope dropped while it is not the innermost scope");
    }
    self.isolate.api_state_mut().local_scopes.exit();
    tracing::trace!(depth = self.id.depth, "exit scope");
  }
}

impl Deref for HandleScope<'_> {
  type Target = Isolate;
  fn deref(&self) -> &Isolate {
    self.isolate
  }
}

/// Forbids garbage collection for its lifetime. Raw object words read
/// inside the guard stay valid until it is dropped.
#[must_use]
#[derive(Debug)]
pub struct NoGcScope<'i> {
  isolate: &'i Isolate,
  _not_send: PhantomData<*mut ()>,
}

impl<'i> NoGcScope<'i> {
  pub fn new(isolate: &'i Isolate) -> Self {
    isolate.enter_no_gc_scope();
    Self {
      isolate,
      _not_send: PhantomData,
    }
  }
}

impl Drop for NoGcScope<'_> {
  fn drop(&mut self) {
    if std::thread::panicking() && self.isolate.no_gc_scope_depth() == 0 {
      return;
    }
    self.isolate.exit_no_gc_scope();
  }
}

impl Deref for NoGcScope<'_> {
  type Target = Isolate;
  fn deref(&self) -> &Isolate {
    self.isolate
  }
}

/// Disallows callbacks into native code for its lifetime.
#[must_use]
#[derive(Debug)]
pub struct NoCallbackScope<'i> {
  isolate: &'i Isolate,
  _not_send: PhantomData<*mut ()>,
}

impl<'i> NoCallbackScope<'i> {
  pub fn new(isolate: &'i Isolate) -> Self {
    isolate.start_no_callback_scope();
    Self {
      isolate,
      _not_send: PhantomData,
    }
  }
}

impl Drop for NoCallbackScope<'_> {
  fn drop(&mut self) {
    if std::thread::panicking() && self.isolate.no_callback_scope_depth() == 0
    {
      return;
    }
    self.isolate.end_no_callback_scope();
  }
}

impl Deref for NoCallbackScope<'_> {
  type Target = Isolate;
  fn deref(&self) -> &Isolate {
    self.isolate
  }
}

/// Makes an isolate current for its lifetime and restores whichever
/// isolate was current before, if any, when dropped.
///
/// The saved isolate cannot be disposed while the guard is alive.
#[must_use]
#[derive(Debug)]
pub struct IsolateScope<'i> {
  saved: Option<NonNull<Isolate>>,
  pinned: bool,
  _isolate: PhantomData<&'i Isolate>,
  _not_send: PhantomData<*mut ()>,
}

impl<'i> IsolateScope<'i> {
  pub fn new(isolate: &'i Isolate) -> Self {
    let target = NonNull::from(isolate);
    let scope = Self::save_current(Some(target));
    isolate::set_current(Some(target));
    scope
  }

  fn save_current(target: Option<NonNull<Isolate>>) -> Self {
    let saved = isolate::get_current();
    let pinned = saved.is_some() && saved != target;
    if let (true, Some(saved)) = (pinned, saved) {
      // SAFETY: a current isolate is alive.
      let count = unsafe { saved.as_ref() }.saved_count();
      count.set(count.get() + 1);
    }
    Self {
      saved,
      pinned,
      _isolate: PhantomData,
      _not_send: PhantomData,
    }
  }
}

impl IsolateScope<'static> {
  /// Remembers the current isolate, without changing it, and restores it
  /// when dropped.
  pub fn save() -> Self {
    Self::save_current(None)
  }
}

impl Drop for IsolateScope<'_> {
  fn drop(&mut self) {
    if let (true, Some(saved)) = (self.pinned, self.saved) {
      // SAFETY: disposing a pinned isolate is refused, so it is alive.
      let count = unsafe { saved.as_ref() }.saved_count();
      count.set(count.get() - 1);
    }
    isolate::set_current(self.saved);
  }
}
