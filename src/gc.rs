// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.

//! Drives a collection over one isolate's heap.
//!
//! A collection marks from the strong roots (local and persistent handles),
//! runs the finalizers of prologue-class weak handles whose referent is
//! unreachable while the referent can still be read, marks again, clears
//! the unreachable normal-class weak handles, sweeps, and for full
//! collections slides the survivors together. Finalizers of normal-class
//! handles run once the heap is consistent again, or when the active
//! no-callback scope ends.

use crate::api_state::WeakHandleState;
use crate::handle::WeakHandleClass;
use crate::handle::WeakHandleFinalizer;
use crate::handle::WeakPersistentHandle;
use crate::heap::Heap;
use crate::heap::ObjectPointerVisitor;
use crate::isolate::Isolate;
use crate::object::RawObject;
use crate::scope::HandleScope;
use crate::scope::IsolateScope;
use crate::scope::NoGcScope;
use crate::support::Peer;

bitflags! {
  /// Kinds of collection a GC callback can subscribe to.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
  #[repr(transparent)]
  pub struct GcType: u32 {
    const MARK_SWEEP = 1 << 0;
    const MARK_COMPACT = 1 << 1;
    const ALL = Self::MARK_SWEEP.bits() | Self::MARK_COMPACT.bits();
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GarbageCollectionType {
  /// Mark, sweep, and compact. Surviving objects may move.
  Full,
  /// Mark and sweep only.
  Minor,
}

impl GarbageCollectionType {
  fn gc_type(self) -> GcType {
    match self {
      Self::Full => GcType::MARK_COMPACT,
      Self::Minor => GcType::MARK_SWEEP,
    }
  }
}

/// Called before or after a collection with the registered `data`.
/// Allocations are not allowed in the callback.
pub type GcCallback = fn(&Isolate, GcType, Peer);

struct Marker<'h> {
  heap: &'h mut Heap,
  worklist: Vec<RawObject>,
}

impl<'h> Marker<'h> {
  fn new(heap: &'h mut Heap) -> Self {
    Self {
      heap,
      worklist: Vec::new(),
    }
  }

  fn drain(&mut self) {
    let mut children = Vec::new();
    while let Some(raw) = self.worklist.pop() {
      self.heap.get(raw).for_each_pointer(|child| children.push(child));
      for child in children.drain(..) {
        self.visit_pointer(&mut { child });
      }
    }
  }
}

impl ObjectPointerVisitor for Marker<'_> {
  fn visit_pointer(&mut self, slot: &mut RawObject) {
    if self.heap.mark(*slot) {
      self.worklist.push(*slot);
    }
  }
}

/// Runs a collection of `kind` on `isolate`.
///
/// While a no-callback scope is active no native code runs: GC callbacks
/// are skipped, prologue-class referents are kept alive, and the finalizers
/// of cleared normal-class handles are deferred until the scope ends.
///
/// # Panics
///
/// Panics inside a `NoGcScope`.
pub(crate) fn collect_garbage(isolate: &Isolate, kind: GarbageCollectionType) {
  if isolate.no_gc_scope_depth() > 0 {
    panic!("attempt to collect garbage inside a NoGcScope");
  }
  let gc_type = kind.gc_type();
  let callbacks_allowed = isolate.no_callback_scope_depth() == 0;
  let _isolate_scope = IsolateScope::new(isolate);
  let _no_gc = NoGcScope::new(isolate);
  tracing::debug!(
    isolate = ?isolate.id(),
    ?kind,
    callbacks_allowed,
    "collection started"
  );

  if callbacks_allowed {
    isolate.invoke_gc_prologue_callbacks(gc_type);
  }
  isolate.heap_mut().begin_collection();

  // Prologue finalizers may make objects reachable again, so marking is
  // repeated until no more prologue handles are found unreachable.
  let mut finalized = 0;
  loop {
    mark_live_objects(isolate, !callbacks_allowed);
    if !callbacks_allowed {
      break;
    }
    let count = run_prologue_finalizers(isolate);
    if count == 0 {
      break;
    }
    finalized += count;
  }

  let cleared = clear_weak_handles(isolate);
  let reclaimed = isolate.heap_mut().sweep();
  let relocated = match kind {
    GarbageCollectionType::Full => compact(isolate),
    GarbageCollectionType::Minor => 0,
  };
  isolate.heap_mut().end_collection();

  let deferred = if callbacks_allowed {
    finalized += run_normal_finalizers(isolate, cleared);
    isolate.invoke_gc_epilogue_callbacks(gc_type);
    0
  } else {
    let count = cleared.len();
    isolate.api_state_mut().deferred_finalizers.extend(cleared);
    count
  };

  tracing::debug!(
    isolate = ?isolate.id(),
    ?kind,
    reclaimed,
    relocated,
    finalized,
    deferred,
    "collection finished"
  );
}

/// Marks everything reachable from the strong roots. With
/// `keep_prologue_referents` the referents of live prologue-class handles
/// are roots too.
fn mark_live_objects(isolate: &Isolate, keep_prologue_referents: bool) {
  let mut heap = isolate.heap_mut();
  heap.reset_marks();
  let mut black = heap.black_allocations().to_vec();
  let mut marker = Marker::new(&mut heap);
  marker.visit_pointers(&mut black);
  let mut state = isolate.api_state_mut();
  state.visit_object_pointers(&mut marker);
  if keep_prologue_referents {
    state.visit_weak_pointers(WeakHandleClass::Prologue, &mut marker);
  }
  marker.drain();
}

/// Invokes the finalizer of every prologue-class handle whose referent is
/// unmarked, then marks the handle finalized. Returns the number of handles
/// finalized.
fn run_prologue_finalizers(isolate: &Isolate) -> usize {
  let unreachable: Vec<(u32, u32)> = {
    let heap = isolate.heap();
    let mut state = isolate.api_state_mut();
    state
      .weak_table_mut(WeakHandleClass::Prologue)
      .iter_mut()
      .filter_map(|(index, generation, handle)| match handle.state {
        WeakHandleState::Live(raw) if !heap.is_marked(raw) => {
          Some((index, generation))
        }
        _ => None,
      })
      .collect()
  };

  let mut finalized = 0;
  for (index, generation) in unreachable {
    let entry = isolate
      .api_state_mut()
      .weak_table_mut(WeakHandleClass::Prologue)
      .get_mut(index, generation)
      .map(|handle| (handle.callback.take(), handle.peer));
    // Deleted by an earlier finalizer of this pass.
    let Some((callback, peer)) = entry else {
      continue;
    };
    if let Some(callback) = callback {
      let handle = WeakPersistentHandle::new(
        isolate.id(),
        WeakHandleClass::Prologue,
        index,
        generation,
      );
      invoke_finalizer(isolate, callback, handle, peer);
    }
    if let Some(handle) = isolate
      .api_state_mut()
      .weak_table_mut(WeakHandleClass::Prologue)
      .get_mut(index, generation)
    {
      handle.state = WeakHandleState::Finalized;
    }
    finalized += 1;
  }
  finalized
}

/// Clears every normal-class handle whose referent is unmarked. Returns the
/// cleared handles that still carry a finalizer; the finalizer stays in the
/// slot until it is run.
fn clear_weak_handles(isolate: &Isolate) -> Vec<(u32, u32)> {
  let heap = isolate.heap();
  let mut state = isolate.api_state_mut();
  let mut cleared = Vec::new();
  for (index, generation, handle) in
    state.weak_table_mut(WeakHandleClass::Normal).iter_mut()
  {
    let WeakHandleState::Live(raw) = handle.state else {
      continue;
    };
    if heap.is_marked(raw) {
      continue;
    }
    handle.state = WeakHandleState::Finalized;
    if handle.callback.is_some() {
      cleared.push((index, generation));
    }
  }
  cleared
}

/// Runs the finalizers of cleared normal-class handles in order. A handle
/// deleted by an earlier finalizer is skipped. Returns the number of
/// finalizers run.
fn run_normal_finalizers(isolate: &Isolate, cleared: Vec<(u32, u32)>) -> usize {
  let mut finalized = 0;
  for (index, generation) in cleared {
    let entry = isolate
      .api_state_mut()
      .weak_table_mut(WeakHandleClass::Normal)
      .get_mut(index, generation)
      .and_then(|handle| Some((handle.callback.take()?, handle.peer)));
    let Some((callback, peer)) = entry else {
      continue;
    };
    let handle = WeakPersistentHandle::new(
      isolate.id(),
      WeakHandleClass::Normal,
      index,
      generation,
    );
    invoke_finalizer(isolate, callback, handle, peer);
    finalized += 1;
  }
  finalized
}

/// Runs the finalizers deferred by collections that happened while
/// callbacks were disallowed.
pub(crate) fn run_deferred_finalizers(isolate: &Isolate) {
  let deferred =
    std::mem::take(&mut isolate.api_state_mut().deferred_finalizers);
  if deferred.is_empty() {
    return;
  }
  let _isolate_scope = IsolateScope::new(isolate);
  let _no_gc = NoGcScope::new(isolate);
  let finalized = run_normal_finalizers(isolate, deferred);
  tracing::debug!(
    isolate = ?isolate.id(),
    finalized,
    "deferred finalizers ran"
  );
}

/// Compacts the heap and forwards every root. Returns the number of
/// objects that moved.
fn compact(isolate: &Isolate) -> usize {
  let mut forwarding = isolate.heap_mut().compact();
  let mut state = isolate.api_state_mut();
  state.visit_object_pointers(&mut forwarding);
  state.visit_weak_pointers(WeakHandleClass::Normal, &mut forwarding);
  state.visit_weak_pointers(WeakHandleClass::Prologue, &mut forwarding);
  forwarding.relocated()
}

fn invoke_finalizer(
  isolate: &Isolate,
  callback: WeakHandleFinalizer,
  handle: WeakPersistentHandle,
  peer: Peer,
) {
  let _scope = HandleScope::new(isolate);
  tracing::trace!(isolate = ?isolate.id(), ?handle, "run finalizer");
  callback(isolate, handle, peer);
}

/// Runs the finalizer of every weak handle that is still live. Used when
/// the isolate is disposed; the referents are still readable.
pub(crate) fn finalize_all(isolate: &Isolate) {
  let _no_gc = NoGcScope::new(isolate);
  let deferred =
    std::mem::take(&mut isolate.api_state_mut().deferred_finalizers);
  run_normal_finalizers(isolate, deferred);
  for class in [WeakHandleClass::Prologue, WeakHandleClass::Normal] {
    let live: Vec<(u32, u32)> = isolate
      .api_state_mut()
      .weak_table_mut(class)
      .iter_mut()
      .filter(|(_, _, handle)| {
        matches!(handle.state, WeakHandleState::Live(_))
      })
      .map(|(index, generation, _)| (index, generation))
      .collect();
    for (index, generation) in live {
      let entry = isolate
        .api_state_mut()
        .weak_table_mut(class)
        .get_mut(index, generation)
        .map(|handle| (handle.callback.take(), handle.peer));
      let Some((callback, peer)) = entry else {
        continue;
      };
      if let Some(callback) = callback {
        let handle =
          WeakPersistentHandle::new(isolate.id(), class, index, generation);
        invoke_finalizer(isolate, callback, handle, peer);
      }
      if let Some(handle) = isolate
        .api_state_mut()
        .weak_table_mut(class)
        .get_mut(index, generation)
      {
        handle.state = WeakHandleState::Finalized;
      }
    }
  }
}
