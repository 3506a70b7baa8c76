// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.

//! The functions native code calls to work with an isolate.
//!
//! Every function first checks that an isolate is current, and functions
//! that create local handles also check that a scope is entered. Those
//! checks panic. Recoverable failures are reported as error handles, which
//! callers detect with `is_error`.

use std::ptr::NonNull;

use crate::api_state::FinalizablePersistentHandle;
use crate::api_state::WeakHandleState;
use crate::data::Boolean;
use crate::data::Double;
use crate::data::Error;
use crate::data::ExternalString;
use crate::data::Instance;
use crate::data::Integer;
use crate::data::List;
use crate::data::MAX_LIST_LENGTH;
use crate::data::String as StringType;
use crate::error::ApiError;
use crate::handle::Api;
use crate::handle::Handle;
use crate::handle::PersistentHandle;
use crate::handle::WeakHandleClass;
use crate::handle::WeakHandleFinalizer;
use crate::handle::WeakPersistentHandle;
use crate::isolate;
use crate::isolate::Isolate;
use crate::native_arguments::NativeArguments;
use crate::native_arguments::NativeFunction;
use crate::object::ObjectData;
use crate::object::RawObject;
use crate::scope::HandleScope;
use crate::support::Peer;

pub use crate::data::is_boolean;
pub use crate::data::is_double;
pub use crate::data::is_error;
pub use crate::data::is_external_string;
pub use crate::data::is_instance;
pub use crate::data::is_integer;
pub use crate::data::is_list;
pub use crate::data::is_null;
pub use crate::data::is_number;
pub use crate::data::is_string;

// --- Isolates and scopes ---

/// The isolate entered on this thread, if any.
pub fn current_isolate() -> Option<NonNull<Isolate>> {
  isolate::get_current()
}

pub fn enter_isolate(isolate: &Isolate) {
  isolate.enter();
}

pub fn exit_isolate() {
  let isolate = check_isolate!();
  isolate.exit();
}

/// Enters a new local scope. Every local handle created until the matching
/// `exit_scope` belongs to it.
pub fn enter_scope() {
  let isolate = check_isolate!();
  let id = isolate.api_state_mut().local_scopes.enter();
  tracing::trace!(depth = id.depth, "enter scope");
}

/// Exits the innermost local scope, invalidating its handles.
pub fn exit_scope() {
  let isolate = check_isolate_scope!();
  if let Some(id) = isolate.api_state_mut().local_scopes.exit() {
    tracing::trace!(depth = id.depth, "exit scope");
  }
}

// --- Canonical values ---

pub fn null_handle() -> Handle {
  let isolate = check_isolate!();
  Api::null(isolate)
}

pub fn true_handle() -> Handle {
  let isolate = check_isolate!();
  Api::true_(isolate)
}

pub fn false_handle() -> Handle {
  let isolate = check_isolate!();
  Api::false_(isolate)
}

/// The non-error result of operations that have no other value to return.
pub fn success() -> Handle {
  let isolate = check_isolate!();
  Api::success(isolate)
}

pub fn new_boolean(value: bool) -> Handle {
  let isolate = check_isolate!();
  if value {
    Api::true_(isolate)
  } else {
    Api::false_(isolate)
  }
}

pub fn boolean_value(boolean: Handle) -> Result<bool, Handle> {
  let isolate = check_isolate_scope!();
  let Some(raw) = Api::unwrap_as::<Boolean>(isolate, boolean) else {
    return Err(type_error!(isolate, boolean, Boolean));
  };
  match isolate.heap().get(raw).data {
    ObjectData::Bool(value) => Ok(value),
    _ => unreachable!(),
  }
}

// --- Numbers ---

/// A Smi when `value` fits, a boxed integer otherwise.
pub fn new_integer(value: i64) -> Handle {
  let isolate = check_isolate_scope!();
  let raw = if RawObject::is_valid_smi(value) {
    RawObject::from_smi(value)
  } else {
    isolate.allocate(ObjectData::Mint(value))
  };
  Api::new_handle(isolate, raw)
}

pub fn integer_to_i64(integer: Handle) -> Result<i64, Handle> {
  let isolate = check_isolate_scope!();
  let Some(raw) = Api::unwrap_as::<Integer>(isolate, integer) else {
    return Err(type_error!(isolate, integer, Integer));
  };
  if raw.is_smi() {
    return Ok(raw.smi_value());
  }
  match isolate.heap().get(raw).data {
    ObjectData::Mint(value) => Ok(value),
    _ => unreachable!(),
  }
}

pub fn new_double(value: f64) -> Handle {
  let isolate = check_isolate_scope!();
  let raw = isolate.allocate(ObjectData::Double(value));
  Api::new_handle(isolate, raw)
}

pub fn double_value(double: Handle) -> Result<f64, Handle> {
  let isolate = check_isolate_scope!();
  let Some(raw) = Api::unwrap_as::<Double>(isolate, double) else {
    return Err(type_error!(isolate, double, Double));
  };
  match isolate.heap().get(raw).data {
    ObjectData::Double(value) => Ok(value),
    _ => unreachable!(),
  }
}

// --- Strings ---

pub fn new_string(value: &str) -> Handle {
  let isolate = check_isolate_scope!();
  let raw = isolate.allocate(ObjectData::String(value.to_owned()));
  Api::new_handle(isolate, raw)
}

pub fn new_string_from_utf8(utf8: Option<&[u8]>) -> Handle {
  let isolate = check_isolate_scope!();
  let Some(utf8) = utf8 else {
    return null_error!(isolate, utf8);
  };
  match std::str::from_utf8(utf8) {
    Ok(value) => {
      let raw = isolate.allocate(ObjectData::String(value.to_owned()));
      Api::new_handle(isolate, raw)
    }
    Err(err) => Api::new_error(
      isolate,
      ApiError::Message(format!(
        "{} expects argument 'utf8' to be valid UTF-8: {err}",
        current_func!()
      )),
    ),
  }
}

/// An external string keeps `peer` alongside its contents.
pub fn new_external_string(value: &str, peer: Peer) -> Handle {
  let isolate = check_isolate_scope!();
  let raw = isolate.allocate(ObjectData::ExternalString {
    value: value.to_owned(),
    peer,
  });
  Api::new_handle(isolate, raw)
}

/// Length in Unicode scalar values.
pub fn string_length(string: Handle) -> Result<usize, Handle> {
  let isolate = check_isolate_scope!();
  let Some(raw) = Api::unwrap_as::<StringType>(isolate, string) else {
    return Err(type_error!(isolate, string, StringType));
  };
  match &isolate.heap().get(raw).data {
    ObjectData::String(value) | ObjectData::ExternalString { value, .. } => {
      Ok(value.chars().count())
    }
    _ => unreachable!(),
  }
}

pub fn string_to_rust(string: Handle) -> Result<String, Handle> {
  let isolate = check_isolate_scope!();
  let Some(raw) = Api::unwrap_as::<StringType>(isolate, string) else {
    return Err(type_error!(isolate, string, StringType));
  };
  match &isolate.heap().get(raw).data {
    ObjectData::String(value) | ObjectData::ExternalString { value, .. } => {
      Ok(value.clone())
    }
    _ => unreachable!(),
  }
}

pub fn external_string_get_peer(string: Handle) -> Result<Peer, Handle> {
  let isolate = check_isolate_scope!();
  let Some(raw) = Api::unwrap_as::<ExternalString>(isolate, string) else {
    return Err(type_error!(isolate, string, ExternalString));
  };
  match isolate.heap().get(raw).data {
    ObjectData::ExternalString { peer, .. } => Ok(peer),
    _ => unreachable!(),
  }
}

// --- Lists ---

/// A list of `length` nulls.
pub fn new_list(length: i64) -> Handle {
  let isolate = check_isolate_scope!();
  let length = check_length!(isolate, length, MAX_LIST_LENGTH);
  let null = Api::unwrap_handle(isolate, Api::null(isolate));
  let raw = isolate.allocate(ObjectData::Array(vec![null; length]));
  Api::new_handle(isolate, raw)
}

pub fn list_length(list: Handle) -> Result<usize, Handle> {
  let isolate = check_isolate_scope!();
  let Some(raw) = Api::unwrap_as::<List>(isolate, list) else {
    return Err(type_error!(isolate, list, List));
  };
  Ok(array_len(isolate, raw))
}

pub fn list_get_at(list: Handle, index: usize) -> Handle {
  let isolate = check_isolate_scope!();
  let Some(raw) = Api::unwrap_as::<List>(isolate, list) else {
    return type_error!(isolate, list, List);
  };
  let length = array_len(isolate, raw);
  if index >= length {
    return index_error!(isolate, index, length);
  }
  let element = match &isolate.heap().get(raw).data {
    ObjectData::Array(elements) => elements[index],
    _ => unreachable!(),
  };
  Api::new_handle(isolate, element)
}

/// Stores `value`, which must be null or an instance, at `index`.
pub fn list_set_at(list: Handle, index: usize, value: Handle) -> Handle {
  let isolate = check_isolate_scope!();
  let Some(raw) = Api::unwrap_as::<List>(isolate, list) else {
    return type_error!(isolate, list, List);
  };
  let length = array_len(isolate, raw);
  if index >= length {
    return index_error!(isolate, index, length);
  }
  if !is_null(value) && Api::unwrap_as::<Instance>(isolate, value).is_none() {
    return type_error!(isolate, value, Instance);
  }
  let element = Api::unwrap_handle(isolate, value);
  match &mut isolate.heap_mut().get_mut(raw).data {
    ObjectData::Array(elements) => elements[index] = element,
    _ => unreachable!(),
  }
  Api::success(isolate)
}

fn array_len(isolate: &Isolate, raw: RawObject) -> usize {
  match &isolate.heap().get(raw).data {
    ObjectData::Array(elements) => elements.len(),
    _ => unreachable!(),
  }
}

/// Whether both handles refer to the same object.
pub fn identity_equals(obj1: Handle, obj2: Handle) -> bool {
  let isolate = check_isolate!();
  Api::unwrap_handle(isolate, obj1) == Api::unwrap_handle(isolate, obj2)
}

// --- Errors ---

pub fn new_api_error(message: &str) -> Handle {
  let isolate = check_isolate_scope!();
  Api::new_error(isolate, ApiError::Message(message.to_owned()))
}

/// The error carried by `handle`, or `None` if it is not an error handle.
pub fn get_error(handle: Handle) -> Option<ApiError> {
  let isolate = check_isolate!();
  Api::error_of(isolate, handle)
}

pub fn error_get_message(handle: Handle) -> Result<String, Handle> {
  let isolate = check_isolate_scope!();
  match Api::error_of(isolate, handle) {
    Some(error) => Ok(error.to_string()),
    None => Err(type_error!(isolate, handle, Error)),
  }
}

/// Records an error for the isolate that stays set until replaced. Passing
/// the null handle clears it.
///
/// # Panics
///
/// Panics if `error` is neither null nor an error handle.
pub fn set_sticky_error(error: Handle) {
  let isolate = check_isolate!();
  let clear = is_null(error);
  if !clear && !is_error(error) {
    panic!(
      "{} expects argument 'error' to be an error handle",
      current_func!()
    );
  }
  let raw = Api::unwrap_handle(isolate, error);
  let mut state = isolate.api_state_mut();
  if let Some(previous) = state.sticky_error.take() {
    state
      .persistent_handles
      .free(previous.index(), previous.generation());
  }
  if !clear {
    let (index, generation) = state.persistent_handles.allocate(raw);
    state.sticky_error =
      Some(PersistentHandle::new(isolate.id(), index, generation));
  }
}

/// The sticky error, or null if none is set.
pub fn get_sticky_error() -> Handle {
  let isolate = check_isolate_scope!();
  let sticky = {
    let state = isolate.api_state();
    state.sticky_error.and_then(|handle| {
      state
        .persistent_handles
        .get(handle.index(), handle.generation())
        .copied()
    })
  };
  match sticky {
    Some(raw) => Api::new_handle(isolate, raw),
    None => Api::null(isolate),
  }
}

/// The sticky error if one is set, `success()` otherwise.
pub fn check_isolate_state() -> Handle {
  let isolate = check_isolate_scope!();
  if isolate.api_state().sticky_error.is_some() {
    get_sticky_error()
  } else {
    Api::success(isolate)
  }
}

// --- Persistent handles ---

pub fn new_persistent_handle(object: Handle) -> PersistentHandle {
  let isolate = check_isolate!();
  let raw = Api::unwrap_handle(isolate, object);
  let (index, generation) =
    isolate.api_state_mut().persistent_handles.allocate(raw);
  PersistentHandle::new(isolate.id(), index, generation)
}

/// # Panics
///
/// Panics if `object` was already deleted or is one of the canonical
/// handles.
pub fn delete_persistent_handle(object: PersistentHandle) {
  let isolate = check_isolate!();
  check_persistent_host(isolate, object);
  let mut state = isolate.api_state_mut();
  if state.is_canonical(object) {
    panic!("{} expects a non-canonical handle", current_func!());
  }
  if state
    .persistent_handles
    .free(object.index(), object.generation())
    .is_none()
  {
    panic!("attempt to delete a stale PersistentHandle");
  }
}

/// A new local handle to the referent of `object`.
pub fn handle_from_persistent(object: PersistentHandle) -> Handle {
  let isolate = check_isolate_scope!();
  check_persistent_host(isolate, object);
  let raw = isolate
    .api_state()
    .persistent_handles
    .get(object.index(), object.generation())
    .copied();
  match raw {
    Some(raw) => Api::new_handle(isolate, raw),
    None => panic!("attempt to use a deleted PersistentHandle"),
  }
}

fn check_persistent_host(isolate: &Isolate, handle: PersistentHandle) {
  if handle.isolate() != isolate.id() {
    panic!("attempt to use Handle in an Isolate that is not its host");
  }
}

// --- Weak persistent handles ---

/// A weak handle to the referent of `object`. When the referent becomes
/// unreachable the handle is finalized: it reads as null from then on and
/// `callback`, if any, is called once with `peer` after the referent has
/// been reclaimed.
pub fn new_weak_persistent_handle(
  object: Handle,
  peer: Peer,
  callback: Option<WeakHandleFinalizer>,
) -> WeakPersistentHandle {
  let isolate = check_isolate!();
  new_weak(isolate, WeakHandleClass::Normal, object, peer, callback)
}

/// Like `new_weak_persistent_handle`, except that `callback` runs before
/// anything is reclaimed and can still read the referent through the
/// handle.
pub fn new_prologue_weak_persistent_handle(
  object: Handle,
  peer: Peer,
  callback: Option<WeakHandleFinalizer>,
) -> WeakPersistentHandle {
  let isolate = check_isolate!();
  new_weak(isolate, WeakHandleClass::Prologue, object, peer, callback)
}

fn new_weak(
  isolate: &Isolate,
  class: WeakHandleClass,
  object: Handle,
  peer: Peer,
  callback: Option<WeakHandleFinalizer>,
) -> WeakPersistentHandle {
  let raw = Api::unwrap_handle(isolate, object);
  let (index, generation) = isolate
    .api_state_mut()
    .weak_table_mut(class)
    .allocate(FinalizablePersistentHandle::new(raw, peer, callback));
  WeakPersistentHandle::new(isolate.id(), class, index, generation)
}

/// Frees the slot of `object`. A finalizer that has not run yet never
/// will. Deleting a handle twice has no effect.
pub fn delete_weak_persistent_handle(object: WeakPersistentHandle) {
  let isolate = check_isolate!();
  check_weak_host(isolate, object);
  let removed = isolate
    .api_state_mut()
    .weak_table_mut(object.class())
    .free(object.index(), object.generation());
  // The finalizer may own embedder state; drop it outside the borrow.
  drop(removed);
}

/// A local handle to the referent, or null once the handle is finalized.
pub fn handle_from_weak_persistent(object: WeakPersistentHandle) -> Handle {
  let isolate = check_isolate_scope!();
  match weak_state(isolate, object) {
    WeakHandleState::Live(raw) => Api::new_handle(isolate, raw),
    WeakHandleState::Finalized => Api::null(isolate),
  }
}

pub fn is_prologue_weak_persistent_handle(
  object: WeakPersistentHandle,
) -> bool {
  let isolate = check_isolate!();
  check_weak_host(isolate, object);
  object.class() == WeakHandleClass::Prologue
}

pub fn is_weak_persistent_handle_finalized(
  object: WeakPersistentHandle,
) -> bool {
  let isolate = check_isolate!();
  weak_state(isolate, object) == WeakHandleState::Finalized
}

pub fn weak_persistent_handle_peer(object: WeakPersistentHandle) -> Peer {
  let isolate = check_isolate!();
  check_weak_host(isolate, object);
  let peer = isolate
    .api_state()
    .weak_table(object.class())
    .get(object.index(), object.generation())
    .map(|handle| handle.peer);
  peer.unwrap_or_else(|| {
    panic!("attempt to use a deleted WeakPersistentHandle")
  })
}

fn weak_state(
  isolate: &Isolate,
  object: WeakPersistentHandle,
) -> WeakHandleState {
  check_weak_host(isolate, object);
  let state = isolate
    .api_state()
    .weak_table(object.class())
    .get(object.index(), object.generation())
    .map(|handle| handle.state);
  state.unwrap_or_else(|| {
    panic!("attempt to use a deleted WeakPersistentHandle")
  })
}

fn check_weak_host(isolate: &Isolate, handle: WeakPersistentHandle) {
  if handle.isolate() != isolate.id() {
    panic!("attempt to use Handle in an Isolate that is not its host");
  }
}

// --- Native calls ---

/// Calls `function` with copies of `arguments` in a fresh scope and returns
/// the value it set, or null if it set none. While a no-callback scope is
/// active the function is not called and the acquired error is returned.
///
/// # Panics
///
/// Panics if `function` leaves the scope stack unbalanced.
pub fn invoke_native(function: NativeFunction, arguments: &[Handle]) -> Handle {
  let isolate = check_isolate_scope!();
  check_callback_state!(isolate);
  let raw_arguments: Vec<RawObject> = arguments
    .iter()
    .map(|&argument| Api::unwrap_handle(isolate, argument))
    .collect();
  let null = Api::unwrap_handle(isolate, Api::null(isolate));
  let return_value = Api::new_handle(isolate, null);
  let depth = isolate.api_state().local_scopes.depth();
  {
    let scope = HandleScope::new(isolate);
    let arguments = raw_arguments
      .into_iter()
      .map(|raw| Api::new_handle(&scope, raw))
      .collect();
    let mut native_arguments =
      NativeArguments::new(&scope, arguments, return_value);
    tracing::trace!(
      arguments = native_arguments.argument_count(),
      "invoke native"
    );
    function(&mut native_arguments);
    if scope.api_state().local_scopes.depth() != depth + 1 {
      panic!(
        "{} expects the native function to leave the scope stack balanced",
        current_func!()
      );
    }
  }
  return_value
}
