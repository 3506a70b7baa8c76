// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.

//! # Example
//!
//! ```rust
//! use vm_api::api;
//! use vm_api::gc::GarbageCollectionType;
//!
//! vm_api::vm::initialize();
//! let isolate = vm_api::Isolate::new(vm_api::Isolate::create_params());
//!
//! api::enter_scope();
//! let list = api::new_list(3);
//! api::list_set_at(list, 0, api::new_integer(42));
//! let persistent = api::new_persistent_handle(list);
//! api::exit_scope();
//!
//! isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
//!
//! api::enter_scope();
//! let list = api::handle_from_persistent(persistent);
//! let element = api::list_get_at(list, 0);
//! assert_eq!(api::integer_to_i64(element), Ok(42));
//!
//! let error = api::list_get_at(list, 7);
//! assert!(api::is_error(error));
//! println!("{}", api::error_get_message(error).unwrap());
//! api::exit_scope();
//!
//! api::delete_persistent_handle(persistent);
//! ```
//!
//! # Design of Handles and Scopes
//!
//! Objects live on a per-isolate heap that the collector may compact at any
//! allocation. Native code therefore never holds an object's address.
//! Instead it holds a `Handle`, which names a slot owned by the VM; the
//! collector treats the slot as a root and rewrites it when the object
//! moves.
//!
//! Local handles are created in the innermost entered scope and are
//! released all at once when that scope exits. Each scope has a serial
//! number that is never reused, so a local handle that outlives its scope
//! is detected on the next use instead of silently reading another
//! scope's slot.
//!
//! Persistent handles live until they are deleted. Weak persistent handles
//! do not keep their referent alive; when it becomes unreachable they are
//! finalized, and their finalizer runs once. Prologue-class weak handles
//! are finalized before anything is reclaimed, so their finalizer can still
//! read the referent.
//!
//! At most one isolate is current per thread. The API functions operate on
//! the current isolate and panic when there is none. Misuse such as
//! unbalanced scopes, collecting inside a `NoGcScope`, or using a handle
//! from another isolate is fatal. Recoverable failures such as a wrong
//! argument type are returned as error handles.

#![allow(clippy::missing_safety_doc)]

#[macro_use]
extern crate bitflags;

#[macro_use]
mod macros;

mod api_state;
mod handle_table;
mod heap;
mod isolate;
mod isolate_create_params;
mod local_scope;
mod native_arguments;
mod object;
mod support;

pub mod api;
pub mod data;
pub mod error;
pub mod gc;
pub mod handle;
pub mod scope;
pub mod vm;

pub use error::ApiError;
pub use gc::GarbageCollectionType;
pub use gc::GcCallback;
pub use gc::GcType;
pub use handle::Api;
pub use handle::Handle;
pub use handle::IsolateId;
pub use handle::PersistentHandle;
pub use handle::WeakHandleClass;
pub use handle::WeakHandleFinalizer;
pub use handle::WeakPersistentHandle;
pub use heap::ObjectPointerVisitor;
pub use isolate::HeapStatistics;
pub use isolate::Isolate;
pub use isolate::OwnedIsolate;
pub use isolate_create_params::CreateParams;
pub use native_arguments::NativeArguments;
pub use native_arguments::NativeFunction;
pub use object::ClassId;
pub use object::RawObject;
pub use scope::HandleScope;
pub use scope::IsolateScope;
pub use scope::NoCallbackScope;
pub use scope::NoGcScope;
pub use support::Peer;
