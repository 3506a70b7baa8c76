// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use std::any::Any;
use std::any::TypeId;
use std::cell::BorrowMutError;
use std::cell::Cell;
use std::cell::Ref;
use std::cell::RefCell;
use std::cell::RefMut;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ops::DerefMut;
use std::ptr::NonNull;

use crate::api_state::ApiState;
use crate::api_state::CanonicalObjects;
use crate::error::ApiError;
use crate::gc;
use crate::gc::GarbageCollectionType;
use crate::gc::GcCallback;
use crate::gc::GcType;
use crate::handle::IsolateId;
use crate::handle::WeakHandleClass;
use crate::heap::Heap;
use crate::isolate_create_params::CreateParams;
use crate::object::ObjectData;
use crate::object::RawObject;
use crate::scope::IsolateScope;
use crate::support::Peer;
use crate::vm;

thread_local! {
  static CURRENT_ISOLATE: Cell<Option<NonNull<Isolate>>> =
    const { Cell::new(None) };
}

pub(crate) fn set_current(isolate: Option<NonNull<Isolate>>) {
  CURRENT_ISOLATE.with(|current| current.set(isolate));
}

pub(crate) fn get_current() -> Option<NonNull<Isolate>> {
  CURRENT_ISOLATE.with(Cell::get)
}

#[derive(Clone, Copy)]
struct GcCallbackEntry {
  callback: GcCallback,
  data: Peer,
  gc_type_filter: GcType,
}

/// Isolate represents an independent heap together with the handle state
/// native code uses to reference it. Objects from one isolate must not be
/// used in another. An isolate is bound to the thread that created it, and
/// at most one isolate is current per thread.
///
/// The isolate is entered when it is constructed and disposed when the
/// `OwnedIsolate` is dropped.
pub struct Isolate {
  id: IsolateId,
  name: Option<String>,
  heap: RefCell<Heap>,
  api_state: RefCell<ApiState>,
  no_gc_scope_depth: Cell<usize>,
  no_callback_scope_depth: Cell<usize>,
  saved_count: Cell<usize>,
  gc_prologue_callbacks: RefCell<Vec<GcCallbackEntry>>,
  gc_epilogue_callbacks: RefCell<Vec<GcCallbackEntry>>,
  slots: HashMap<TypeId, Box<dyn Any>>,
  _not_send: PhantomData<*mut ()>,
}

impl Isolate {
  /// Creates a new isolate and makes it the current one on this thread.
  ///
  /// # Panics
  ///
  /// Panics if `vm::initialize` has not been called, or if an isolate is
  /// already current.
  #[allow(clippy::new_ret_no_self)]
  pub fn new(params: CreateParams) -> OwnedIsolate {
    vm::assert_initialized();
    check_no_isolate!();
    let id = IsolateId::next();
    let mut heap = Heap::new(params.heap_capacity, params.gc_threshold);
    let canonical = CanonicalObjects {
      null: heap.allocate(ObjectData::Null),
      true_: heap.allocate(ObjectData::Bool(true)),
      false_: heap.allocate(ObjectData::Bool(false)),
      acquired_error: heap
        .allocate(ObjectData::ApiError(ApiError::CallbacksDisallowed)),
    };
    let api_state =
      ApiState::new(id, params.local_handles_per_segment, canonical);
    let isolate = Box::new(Self {
      id,
      name: params.name,
      heap: RefCell::new(heap),
      api_state: RefCell::new(api_state),
      no_gc_scope_depth: Cell::new(0),
      no_callback_scope_depth: Cell::new(0),
      saved_count: Cell::new(0),
      gc_prologue_callbacks: RefCell::new(Vec::new()),
      gc_epilogue_callbacks: RefCell::new(Vec::new()),
      slots: HashMap::new(),
      _not_send: PhantomData,
    });
    let isolate = OwnedIsolate::new(isolate);
    vm::isolate_created();
    tracing::debug!(
      isolate = ?isolate.id,
      name = ?isolate.name,
      "isolate created"
    );
    isolate.enter();
    isolate
  }

  /// Initial configuration parameters for a new Isolate.
  #[inline(always)]
  pub fn create_params() -> CreateParams {
    CreateParams::default()
  }

  #[inline(always)]
  pub fn id(&self) -> IsolateId {
    self.id
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  /// The isolate entered on this thread.
  pub(crate) fn current<'a>() -> Option<&'a Isolate> {
    // SAFETY: the pointer is cleared before the isolate is freed.
    get_current().map(|isolate| unsafe { isolate.as_ref() })
  }

  pub fn is_current(&self) -> bool {
    get_current() == Some(NonNull::from(self))
  }

  /// Makes this isolate the current one on this thread.
  ///
  /// # Panics
  ///
  /// Panics if any isolate is already current.
  pub fn enter(&self) {
    check_no_isolate!();
    set_current(Some(NonNull::from(self)));
    tracing::trace!(isolate = ?self.id, "enter isolate");
  }

  /// Leaves this isolate. Afterwards no isolate is current.
  ///
  /// # Panics
  ///
  /// Panics if this isolate is not the current one.
  pub fn exit(&self) {
    if !self.is_current() {
      panic!("attempt to exit an Isolate that is not the current isolate");
    }
    set_current(None);
    tracing::trace!(isolate = ?self.id, "exit isolate");
  }

  pub(crate) fn heap(&self) -> Ref<'_, Heap> {
    self.heap.borrow()
  }

  pub(crate) fn heap_mut(&self) -> RefMut<'_, Heap> {
    self.heap.borrow_mut()
  }

  pub(crate) fn api_state(&self) -> Ref<'_, ApiState> {
    self.api_state.borrow()
  }

  pub(crate) fn api_state_mut(&self) -> RefMut<'_, ApiState> {
    self.api_state.borrow_mut()
  }

  pub(crate) fn try_api_state_mut(
    &self,
  ) -> Result<RefMut<'_, ApiState>, BorrowMutError> {
    self.api_state.try_borrow_mut()
  }

  /// Whether at least one local scope is entered.
  pub fn has_api_scope(&self) -> bool {
    !self.api_state().local_scopes.is_empty()
  }

  /// Allocates a heap object, running a minor collection first when the
  /// allocation threshold has been reached.
  pub(crate) fn allocate(&self, data: ObjectData) -> RawObject {
    let should_collect = self.heap().should_collect();
    if should_collect {
      if self.no_gc_scope_depth() > 0 {
        panic!(
          "attempt to allocate inside a NoGcScope when a garbage collection \
           is due"
        );
      }
      gc::collect_garbage(self, GarbageCollectionType::Minor);
    }
    self.heap_mut().allocate(data)
  }

  pub(crate) fn saved_count(&self) -> &Cell<usize> {
    &self.saved_count
  }

  #[inline(always)]
  pub fn no_gc_scope_depth(&self) -> usize {
    self.no_gc_scope_depth.get()
  }

  /// Forbids garbage collection until the matching `exit_no_gc_scope`.
  /// Calls nest.
  pub fn enter_no_gc_scope(&self) {
    self.no_gc_scope_depth.set(self.no_gc_scope_depth.get() + 1);
  }

  pub fn exit_no_gc_scope(&self) {
    let depth = self.no_gc_scope_depth.get();
    if depth == 0 {
      panic!("exit_no_gc_scope called without a matching enter_no_gc_scope");
    }
    self.no_gc_scope_depth.set(depth - 1);
  }

  #[inline(always)]
  pub fn no_callback_scope_depth(&self) -> usize {
    self.no_callback_scope_depth.get()
  }

  /// While a no-callback scope is active, operations that would call into
  /// native code or allocate a fresh error return the acquired error
  /// instead, and collections defer weak handle finalizers. Calls nest.
  pub fn start_no_callback_scope(&self) {
    self
      .no_callback_scope_depth
      .set(self.no_callback_scope_depth.get() + 1);
  }

  /// Leaving the outermost no-callback scope runs the finalizers deferred
  /// while it was active.
  pub fn end_no_callback_scope(&self) {
    let depth = self.no_callback_scope_depth.get();
    if depth == 0 {
      panic!(
        "end_no_callback_scope called without a matching \
         start_no_callback_scope"
      );
    }
    self.no_callback_scope_depth.set(depth - 1);
    if depth == 1 && !std::thread::panicking() {
      gc::run_deferred_finalizers(self);
    }
  }

  /// Performs a collection of the given kind immediately.
  ///
  /// # Panics
  ///
  /// Panics inside a `NoGcScope`, which includes GC callbacks and weak
  /// handle finalizers.
  pub fn request_garbage_collection_for_testing(
    &self,
    r#type: GarbageCollectionType,
  ) {
    gc::collect_garbage(self, r#type);
  }

  /// Get statistics about the heap memory usage.
  pub fn get_heap_statistics(&self, s: &mut HeapStatistics) {
    let heap = self.heap();
    let state = self.api_state();
    *s = HeapStatistics {
      live_objects: heap.live_objects(),
      heap_capacity: heap.capacity(),
      collections: heap.collections(),
      local_scope_depth: state.local_scopes.depth() as usize,
      local_handle_count: state.local_scopes.handle_count(),
      persistent_handle_count: state.persistent_handles.len(),
      weak_persistent_handle_count: state
        .weak_table(WeakHandleClass::Normal)
        .len()
        + state.weak_table(WeakHandleClass::Prologue).len(),
    };
  }

  /// Enables the host application to receive a notification before a
  /// garbage collection. Allocations are not allowed in the callback
  /// function.
  pub fn add_gc_prologue_callback(
    &self,
    callback: GcCallback,
    data: Peer,
    gc_type_filter: GcType,
  ) {
    self.gc_prologue_callbacks.borrow_mut().push(GcCallbackEntry {
      callback,
      data,
      gc_type_filter,
    });
  }

  /// This function removes callback which was installed by
  /// `add_gc_prologue_callback`.
  pub fn remove_gc_prologue_callback(&self, callback: GcCallback, data: Peer) {
    remove_gc_callback(&self.gc_prologue_callbacks, callback, data);
  }

  /// Enables the host application to receive a notification after a
  /// garbage collection.
  pub fn add_gc_epilogue_callback(
    &self,
    callback: GcCallback,
    data: Peer,
    gc_type_filter: GcType,
  ) {
    self.gc_epilogue_callbacks.borrow_mut().push(GcCallbackEntry {
      callback,
      data,
      gc_type_filter,
    });
  }

  pub fn remove_gc_epilogue_callback(&self, callback: GcCallback, data: Peer) {
    remove_gc_callback(&self.gc_epilogue_callbacks, callback, data);
  }

  pub(crate) fn invoke_gc_prologue_callbacks(&self, gc_type: GcType) {
    invoke_gc_callbacks(self, &self.gc_prologue_callbacks, gc_type);
  }

  pub(crate) fn invoke_gc_epilogue_callbacks(&self, gc_type: GcType) {
    invoke_gc_callbacks(self, &self.gc_epilogue_callbacks, gc_type);
  }

  /// Get a reference to embedder data added with `set_slot()`.
  pub fn get_slot<T: 'static>(&self) -> Option<&T> {
    self
      .slots
      .get(&TypeId::of::<T>())
      .and_then(|slot| slot.downcast_ref::<T>())
  }

  /// Get a mutable reference to embedder data added with `set_slot()`.
  pub fn get_slot_mut<T: 'static>(&mut self) -> Option<&mut T> {
    self
      .slots
      .get_mut(&TypeId::of::<T>())
      .and_then(|slot| slot.downcast_mut::<T>())
  }

  /// Use with `Isolate::get_slot` and `Isolate::get_slot_mut` to associate
  /// state with an Isolate.
  ///
  /// This method gives ownership of value to the Isolate. Exactly one object
  /// of each type can be associated with an Isolate. If called more than
  /// once with an object of the same type, the earlier version will be
  /// dropped and replaced.
  ///
  /// Returns true if value was set without replacing an existing value.
  ///
  /// The value will be dropped when the isolate is dropped.
  pub fn set_slot<T: 'static>(&mut self, value: T) -> bool {
    self
      .slots
      .insert(TypeId::of::<T>(), Box::new(value))
      .is_none()
  }

  /// Removes the embedder data added with `set_slot()` and returns it if it
  /// exists.
  pub fn remove_slot<T: 'static>(&mut self) -> Option<T> {
    let slot = self.slots.remove(&TypeId::of::<T>())?;
    slot.downcast::<T>().ok().map(|value| *value)
  }
}

fn remove_gc_callback(
  callbacks: &RefCell<Vec<GcCallbackEntry>>,
  callback: GcCallback,
  data: Peer,
) {
  callbacks.borrow_mut().retain(|entry| {
    !(std::ptr::fn_addr_eq(entry.callback, callback) && entry.data == data)
  });
}

fn invoke_gc_callbacks(
  isolate: &Isolate,
  callbacks: &RefCell<Vec<GcCallbackEntry>>,
  gc_type: GcType,
) {
  // Snapshot, so callbacks may add or remove callbacks.
  let entries = callbacks.borrow().clone();
  for entry in entries {
    if entry.gc_type_filter.intersects(gc_type) {
      (entry.callback)(isolate, gc_type, entry.data);
    }
  }
}

impl fmt::Debug for Isolate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Isolate")
      .field("id", &self.id)
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}

/// Same as Isolate but gets disposed when it goes out of scope.
#[derive(Debug)]
pub struct OwnedIsolate {
  isolate: NonNull<Isolate>,
}

impl OwnedIsolate {
  fn new(isolate: Box<Isolate>) -> Self {
    Self {
      isolate: NonNull::from(Box::leak(isolate)),
    }
  }
}

impl Drop for OwnedIsolate {
  fn drop(&mut self) {
    let panicking = std::thread::panicking();
    {
      let isolate: &Isolate = &**self;
      if isolate.saved_count.get() != 0 {
        if !panicking {
          panic!(
            "attempt to dispose an Isolate that an IsolateScope has saved"
          );
        }
        // An IsolateScope still points at this isolate and restores it when
        // it unwinds, so the allocation is leaked.
        if isolate.is_current() {
          set_current(None);
        }
        tracing::debug!(isolate = ?isolate.id, "isolate leaked while saved");
        return;
      }
      let was_current = isolate.is_current();
      {
        let _scope = IsolateScope::new(isolate);
        if !panicking {
          gc::finalize_all(isolate);
        }
      }
      if was_current || isolate.is_current() {
        set_current(None);
      }
      tracing::debug!(isolate = ?isolate.id, "isolate disposed");
    }
    vm::isolate_disposed();
    // SAFETY: created by `Box::leak` in `OwnedIsolate::new`, and no
    // reference outlives this point.
    drop(unsafe { Box::from_raw(self.isolate.as_ptr()) });
  }
}

impl Deref for OwnedIsolate {
  type Target = Isolate;
  fn deref(&self) -> &Self::Target {
    // SAFETY: the isolate is owned by `self` and freed only in `drop`.
    unsafe { self.isolate.as_ref() }
  }
}

impl DerefMut for OwnedIsolate {
  fn deref_mut(&mut self) -> &mut Self::Target {
    // SAFETY: as in `deref`; `&mut self` makes the access unique.
    unsafe { self.isolate.as_mut() }
  }
}

impl AsRef<Isolate> for OwnedIsolate {
  fn as_ref(&self) -> &Isolate {
    self
  }
}

/// Snapshot of an isolate's heap and handle usage, filled in by
/// `Isolate::get_heap_statistics`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStatistics {
  live_objects: usize,
  heap_capacity: usize,
  collections: usize,
  local_scope_depth: usize,
  local_handle_count: usize,
  persistent_handle_count: usize,
  weak_persistent_handle_count: usize,
}

impl HeapStatistics {
  /// Objects currently allocated, garbage not yet collected included.
  #[inline(always)]
  pub fn live_objects(&self) -> usize {
    self.live_objects
  }

  #[inline(always)]
  pub fn heap_capacity(&self) -> usize {
    self.heap_capacity
  }

  /// Collections run since the isolate was created.
  #[inline(always)]
  pub fn collections(&self) -> usize {
    self.collections
  }

  #[inline(always)]
  pub fn local_scope_depth(&self) -> usize {
    self.local_scope_depth
  }

  #[inline(always)]
  pub fn local_handle_count(&self) -> usize {
    self.local_handle_count
  }

  /// Includes the canonical handles every isolate owns.
  #[inline(always)]
  pub fn persistent_handle_count(&self) -> usize {
    self.persistent_handle_count
  }

  #[inline(always)]
  pub fn weak_persistent_handle_count(&self) -> usize {
    self.weak_persistent_handle_count
  }
}
