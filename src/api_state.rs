// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use crate::handle::IsolateId;
use crate::handle::PersistentHandle;
use crate::handle::WeakHandleClass;
use crate::handle::WeakHandleFinalizer;
use crate::handle_table::HandleTable;
use crate::heap::ObjectPointerVisitor;
use crate::local_scope::LocalScopeStack;
use crate::object::RawObject;
use crate::support::Peer;

/// Referent of a weak persistent handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WeakHandleState {
  Live(RawObject),
  /// The referent was found unreachable. The slot stays allocated until the
  /// embedder deletes the handle.
  Finalized,
}

pub(crate) struct FinalizablePersistentHandle {
  pub(crate) state: WeakHandleState,
  pub(crate) peer: Peer,
  pub(crate) callback: Option<WeakHandleFinalizer>,
}

impl FinalizablePersistentHandle {
  pub(crate) fn new(
    raw: RawObject,
    peer: Peer,
    callback: Option<WeakHandleFinalizer>,
  ) -> Self {
    Self {
      state: WeakHandleState::Live(raw),
      peer,
      callback,
    }
  }
}

/// Handle bookkeeping of one isolate.
pub(crate) struct ApiState {
  pub(crate) local_scopes: LocalScopeStack,
  pub(crate) persistent_handles: HandleTable<RawObject>,
  weak_persistent_handles: HandleTable<FinalizablePersistentHandle>,
  prologue_weak_persistent_handles: HandleTable<FinalizablePersistentHandle>,
  pub(crate) null: PersistentHandle,
  pub(crate) true_: PersistentHandle,
  pub(crate) false_: PersistentHandle,
  pub(crate) acquired_error: PersistentHandle,
  pub(crate) sticky_error: Option<PersistentHandle>,
  /// Normal-class handles cleared while callbacks were disallowed. Their
  /// finalizers stay in the slot until the no-callback scope ends.
  pub(crate) deferred_finalizers: Vec<(u32, u32)>,
}

/// Raw values the canonical handles are created for.
pub(crate) struct CanonicalObjects {
  pub(crate) null: RawObject,
  pub(crate) true_: RawObject,
  pub(crate) false_: RawObject,
  pub(crate) acquired_error: RawObject,
}

impl ApiState {
  pub(crate) fn new(
    isolate: IsolateId,
    handles_per_segment: usize,
    canonical: CanonicalObjects,
  ) -> Self {
    let mut persistent_handles = HandleTable::new();
    let mut persist = |raw| {
      let (index, generation) = persistent_handles.allocate(raw);
      PersistentHandle::new(isolate, index, generation)
    };
    let null = persist(canonical.null);
    let true_ = persist(canonical.true_);
    let false_ = persist(canonical.false_);
    let acquired_error = persist(canonical.acquired_error);
    Self {
      local_scopes: LocalScopeStack::new(handles_per_segment),
      persistent_handles,
      weak_persistent_handles: HandleTable::new(),
      prologue_weak_persistent_handles: HandleTable::new(),
      null,
      true_,
      false_,
      acquired_error,
      sticky_error: None,
      deferred_finalizers: Vec::new(),
    }
  }

  pub(crate) fn weak_table(
    &self,
    class: WeakHandleClass,
  ) -> &HandleTable<FinalizablePersistentHandle> {
    match class {
      WeakHandleClass::Normal => &self.weak_persistent_handles,
      WeakHandleClass::Prologue => &self.prologue_weak_persistent_handles,
    }
  }

  pub(crate) fn weak_table_mut(
    &mut self,
    class: WeakHandleClass,
  ) -> &mut HandleTable<FinalizablePersistentHandle> {
    match class {
      WeakHandleClass::Normal => &mut self.weak_persistent_handles,
      WeakHandleClass::Prologue => &mut self.prologue_weak_persistent_handles,
    }
  }

  pub(crate) fn is_canonical(&self, handle: PersistentHandle) -> bool {
    [self.null, self.true_, self.false_, self.acquired_error].contains(&handle)
  }

  /// Visits the strong roots: every local handle and every persistent
  /// handle, canonical values included.
  pub(crate) fn visit_object_pointers(
    &mut self,
    visitor: &mut dyn ObjectPointerVisitor,
  ) {
    self.local_scopes.visit_object_pointers(visitor);
    for (_, _, slot) in self.persistent_handles.iter_mut() {
      visitor.visit_pointer(slot);
    }
  }

  /// Visits the referents of live weak handles of one class.
  pub(crate) fn visit_weak_pointers(
    &mut self,
    class: WeakHandleClass,
    visitor: &mut dyn ObjectPointerVisitor,
  ) {
    for (_, _, handle) in self.weak_table_mut(class).iter_mut() {
      if let WeakHandleState::Live(raw) = &mut handle.state {
        visitor.visit_pointer(raw);
      }
    }
  }
}
