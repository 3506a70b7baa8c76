// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::data::ObjectType;
use crate::error::ApiError;
use crate::isolate::Isolate;
use crate::local_scope::ScopeId;
use crate::object::ClassId;
use crate::object::ObjectData;
use crate::object::RawObject;
use crate::support::Peer;

/// Process-unique identity of an isolate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IsolateId(u64);

impl IsolateId {
  pub(crate) fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Self(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

/// An opaque reference to a managed object.
///
/// A `Handle` names a slot that holds the object's current address; the
/// collector updates the slot when the object moves, so the handle stays
/// valid. Local handles belong to the scope they were created in and must
/// not be used after it exits. Two handles compare equal only if they name
/// the same slot; use `identity_equals` to compare referents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
  isolate: IsolateId,
  location: Location,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Location {
  Local { depth: u32, serial: u64, index: u32 },
  Persistent { index: u32, generation: u32 },
}

impl Handle {
  /// The isolate this handle belongs to.
  pub fn isolate_id(&self) -> IsolateId {
    self.isolate
  }

  pub(crate) fn from_persistent(handle: PersistentHandle) -> Self {
    Self {
      isolate: handle.isolate,
      location: Location::Persistent {
        index: handle.index,
        generation: handle.generation,
      },
    }
  }
}

/// A strong root that is independent of scopes. Must be deleted explicitly
/// with `delete_persistent_handle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PersistentHandle {
  isolate: IsolateId,
  index: u32,
  generation: u32,
}

impl PersistentHandle {
  pub(crate) fn new(isolate: IsolateId, index: u32, generation: u32) -> Self {
    Self {
      isolate,
      index,
      generation,
    }
  }

  pub(crate) fn isolate(&self) -> IsolateId {
    self.isolate
  }

  pub(crate) fn index(&self) -> u32 {
    self.index
  }

  pub(crate) fn generation(&self) -> u32 {
    self.generation
  }
}

/// Collection phase in which a weak handle is processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WeakHandleClass {
  /// Processed after reachability is final. The finalizer runs after the
  /// referent has been reclaimed.
  Normal,
  /// Processed before anything is reclaimed. The finalizer can still read
  /// the referent through the handle.
  Prologue,
}

/// A weak root that does not keep its referent alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WeakPersistentHandle {
  isolate: IsolateId,
  class: WeakHandleClass,
  index: u32,
  generation: u32,
}

impl WeakPersistentHandle {
  pub(crate) fn new(
    isolate: IsolateId,
    class: WeakHandleClass,
    index: u32,
    generation: u32,
  ) -> Self {
    Self {
      isolate,
      class,
      index,
      generation,
    }
  }

  pub fn class(&self) -> WeakHandleClass {
    self.class
  }

  pub(crate) fn isolate(&self) -> IsolateId {
    self.isolate
  }

  pub(crate) fn index(&self) -> u32 {
    self.index
  }

  pub(crate) fn generation(&self) -> u32 {
    self.generation
  }
}

/// Called at most once, with the registered peer, after the referent of a
/// weak handle became unreachable.
pub type WeakHandleFinalizer =
  Box<dyn FnOnce(&Isolate, WeakPersistentHandle, Peer)>;

/// Conversions between handles and raw objects.
pub struct Api;

impl Api {
  /// Stores `raw` in a new local handle of the top scope.
  pub fn new_handle(isolate: &Isolate, raw: RawObject) -> Handle {
    let mut state = isolate.api_state_mut();
    let Some((ScopeId { depth, serial }, scope)) = state.local_scopes.top_mut()
    else {
      panic!("attempt to allocate a local Handle without an entered scope");
    };
    let index = scope.handles.allocate(raw);
    Handle {
      isolate: isolate.id(),
      location: Location::Local {
        depth,
        serial,
        index,
      },
    }
  }

  /// Reads the current raw value of `handle`.
  ///
  /// # Panics
  ///
  /// Panics if `handle` belongs to another isolate, or its slot is gone:
  /// the scope of a local handle has exited or a persistent handle has
  /// been deleted.
  pub fn unwrap_handle(isolate: &Isolate, handle: Handle) -> RawObject {
    Self::check_host(isolate, handle);
    let state = isolate.api_state();
    match handle.location {
      Location::Local {
        depth,
        serial,
        index,
      } => state
        .local_scopes
        .get(ScopeId { depth, serial }, index)
        .unwrap_or_else(|| {
          panic!("attempt to use a local Handle after its scope has exited")
        }),
      Location::Persistent { index, generation } => state
        .persistent_handles
        .get(index, generation)
        .copied()
        .unwrap_or_else(|| {
          panic!("attempt to use a Handle whose persistent handle was deleted")
        }),
    }
  }

  /// Unwraps `handle` if its referent is a `T`.
  pub fn unwrap_as<T: ObjectType>(
    isolate: &Isolate,
    handle: Handle,
  ) -> Option<RawObject> {
    let raw = Self::unwrap_handle(isolate, handle);
    T::matches(Self::class_id_of(isolate, raw)).then_some(raw)
  }

  /// Overwrites the slot of a local handle.
  pub(crate) fn set_local_raw(
    isolate: &Isolate,
    handle: Handle,
    raw: RawObject,
  ) {
    Self::check_host(isolate, handle);
    let Location::Local {
      depth,
      serial,
      index,
    } = handle.location
    else {
      panic!("attempt to overwrite a persistent Handle");
    };
    let mut state = isolate.api_state_mut();
    match state.local_scopes.get_mut(ScopeId { depth, serial }, index) {
      Some(slot) => *slot = raw,
      None => {
        panic!("attempt to use a local Handle after its scope has exited")
      }
    }
  }

  fn check_host(isolate: &Isolate, handle: Handle) {
    if handle.isolate != isolate.id() {
      panic!("attempt to use Handle in an Isolate that is not its host");
    }
  }

  /// Tests the tag bit only; the heap is not consulted.
  pub fn is_smi(isolate: &Isolate, handle: Handle) -> bool {
    Self::unwrap_handle(isolate, handle).is_smi()
  }

  pub fn smi_value(isolate: &Isolate, handle: Handle) -> i64 {
    let raw = Self::unwrap_handle(isolate, handle);
    debug_assert!(raw.is_smi());
    raw.smi_value()
  }

  pub fn class_id(isolate: &Isolate, handle: Handle) -> ClassId {
    Self::class_id_of(isolate, Self::unwrap_handle(isolate, handle))
  }

  pub(crate) fn class_id_of(isolate: &Isolate, raw: RawObject) -> ClassId {
    if raw.is_smi() {
      ClassId::Smi
    } else {
      isolate.heap().get(raw).class_id()
    }
  }

  pub fn null(isolate: &Isolate) -> Handle {
    Handle::from_persistent(isolate.api_state().null)
  }

  pub fn true_(isolate: &Isolate) -> Handle {
    Handle::from_persistent(isolate.api_state().true_)
  }

  pub fn false_(isolate: &Isolate) -> Handle {
    Handle::from_persistent(isolate.api_state().false_)
  }

  pub fn success(isolate: &Isolate) -> Handle {
    Self::true_(isolate)
  }

  /// The error handle returned while callbacks are disallowed. It is
  /// allocated with the isolate, so returning it never allocates.
  pub fn acquired_error(isolate: &Isolate) -> Handle {
    Handle::from_persistent(isolate.api_state().acquired_error)
  }

  /// Allocates an error handle carrying `error`, or returns the acquired
  /// error while a no-callback scope is active.
  pub fn new_error(isolate: &Isolate, error: ApiError) -> Handle {
    if isolate.no_callback_scope_depth() > 0 {
      return Self::acquired_error(isolate);
    }
    let raw = isolate.allocate(ObjectData::ApiError(error));
    Self::new_handle(isolate, raw)
  }

  /// The error for an argument that is not of type `expected`.
  pub fn type_error(
    isolate: &Isolate,
    function: &'static str,
    argument: &'static str,
    handle: Handle,
    expected: &'static str,
  ) -> Handle {
    match Self::class_id(isolate, handle) {
      ClassId::Null => {
        Self::new_error(isolate, ApiError::NullArgument { function, argument })
      }
      ClassId::ApiError => handle,
      _ => Self::new_error(
        isolate,
        ApiError::TypeMismatch {
          function,
          argument,
          expected,
        },
      ),
    }
  }

  /// The error carried by `handle`, if it is an error handle.
  pub(crate) fn error_of(
    isolate: &Isolate,
    handle: Handle,
  ) -> Option<ApiError> {
    let raw = Self::unwrap_as::<crate::data::Error>(isolate, handle)?;
    match &isolate.heap().get(raw).data {
      ObjectData::ApiError(error) => Some(error.clone()),
      _ => None,
    }
  }
}
