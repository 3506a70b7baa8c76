// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use std::cell::Cell;
use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::Rc;
use std::sync::Once;

use vm_api::Api;
use vm_api::GarbageCollectionType;
use vm_api::GcType;
use vm_api::HandleScope;
use vm_api::HeapStatistics;
use vm_api::Isolate;
use vm_api::Peer;
use vm_api::WeakHandleClass;
use vm_api::WeakHandleFinalizer;
use vm_api::WeakPersistentHandle;
use vm_api::api;

fn setup() {
  static START: Once = Once::new();
  START.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::TRACE)
      .with_test_writer()
      .try_init();
    vm_api::vm::initialize();
  });
}

fn new_isolate() -> vm_api::OwnedIsolate {
  setup();
  Isolate::new(Isolate::create_params().gc_threshold(None))
}

fn live_objects(isolate: &Isolate) -> usize {
  let mut stats = HeapStatistics::default();
  isolate.get_heap_statistics(&mut stats);
  stats.live_objects()
}

fn finalizer(
  f: impl FnOnce(&Isolate, WeakPersistentHandle, Peer) + 'static,
) -> Option<WeakHandleFinalizer> {
  Some(Box::new(f))
}

fn peer_of(value: &Cell<usize>) -> Peer {
  value as *const Cell<usize> as *mut c_void
}

#[test]
fn local_handles_are_roots() {
  let isolate = new_isolate();
  let _scope = HandleScope::new(&isolate);
  let s = api::new_string("kept");
  let list = api::new_list(1);
  api::list_set_at(list, 0, api::new_double(1.25));
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert_eq!(api::string_to_rust(s).as_deref(), Ok("kept"));
  let element = api::list_get_at(list, 0);
  assert_eq!(api::double_value(element), Ok(1.25));
}

#[test]
fn unreachable_objects_are_reclaimed() {
  let isolate = new_isolate();
  let baseline = live_objects(&isolate);
  api::enter_scope();
  for i in 0..10 {
    api::new_string(&i.to_string());
  }
  assert_eq!(live_objects(&isolate), baseline + 10);
  api::exit_scope();
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Minor);
  assert_eq!(live_objects(&isolate), baseline);
}

#[test]
fn persistent_handle_keeps_object_alive() {
  let isolate = new_isolate();
  let baseline = live_objects(&isolate);
  api::enter_scope();
  let persistent = api::new_persistent_handle(api::new_string("persist"));
  api::exit_scope();

  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert_eq!(live_objects(&isolate), baseline + 1);
  {
    let _scope = HandleScope::new(&isolate);
    let s = api::handle_from_persistent(persistent);
    assert_eq!(api::string_to_rust(s).as_deref(), Ok("persist"));
  }

  api::delete_persistent_handle(persistent);
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert_eq!(live_objects(&isolate), baseline);
}

#[test]
#[should_panic(expected = "attempt to delete a stale PersistentHandle")]
fn delete_persistent_handle_twice() {
  let _isolate = new_isolate();
  api::enter_scope();
  let persistent = api::new_persistent_handle(api::new_integer(1));
  api::delete_persistent_handle(persistent);
  api::delete_persistent_handle(persistent);
}

#[test]
#[should_panic(expected = "attempt to use a deleted PersistentHandle")]
fn use_deleted_persistent_handle() {
  let _isolate = new_isolate();
  api::enter_scope();
  let persistent = api::new_persistent_handle(api::new_integer(1));
  api::delete_persistent_handle(persistent);
  // The freed slot is reused, but with a new generation.
  let _other = api::new_persistent_handle(api::new_integer(2));
  api::handle_from_persistent(persistent);
}

#[test]
fn full_collection_relocates_objects() {
  let isolate = new_isolate();
  let _scope = HandleScope::new(&isolate);
  api::enter_scope();
  for _ in 0..8 {
    api::new_double(0.0);
  }
  api::exit_scope();
  let s = api::new_string("moved");
  let list = api::new_list(2);
  api::list_set_at(list, 0, s);
  let before = Api::unwrap_handle(&isolate, s);

  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);

  let after = Api::unwrap_handle(&isolate, s);
  assert_ne!(before.raw_bits(), after.raw_bits());
  assert!(after.is_heap_object());
  assert_eq!(api::string_to_rust(s).as_deref(), Ok("moved"));
  let element = api::list_get_at(list, 0);
  assert!(api::identity_equals(element, s));
}

#[test]
fn minor_collection_does_not_move_objects() {
  let isolate = new_isolate();
  let _scope = HandleScope::new(&isolate);
  api::enter_scope();
  api::new_double(0.0);
  api::exit_scope();
  let s = api::new_string("stays");
  let before = Api::unwrap_handle(&isolate, s);
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Minor);
  assert_eq!(Api::unwrap_handle(&isolate, s), before);
}

#[test]
fn weak_handle_finalized_once() {
  let isolate = new_isolate();
  let calls = Rc::new(Cell::new(0));
  let token = Cell::new(0usize);
  let peer = peer_of(&token);

  api::enter_scope();
  let weak = {
    let calls = calls.clone();
    api::new_weak_persistent_handle(
      api::new_string("weak"),
      peer,
      finalizer(move |_isolate, handle, finalized_peer| {
        assert_eq!(handle.class(), WeakHandleClass::Normal);
        assert_eq!(finalized_peer, peer);
        assert!(api::is_weak_persistent_handle_finalized(handle));
        calls.set(calls.get() + 1);
      }),
    )
  };
  assert!(!api::is_weak_persistent_handle_finalized(weak));
  api::exit_scope();

  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert_eq!(calls.get(), 1);
  assert!(api::is_weak_persistent_handle_finalized(weak));
  assert_eq!(api::weak_persistent_handle_peer(weak), peer);
  {
    let _scope = HandleScope::new(&isolate);
    assert!(api::is_null(api::handle_from_weak_persistent(weak)));
  }

  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert_eq!(calls.get(), 1);

  api::delete_weak_persistent_handle(weak);
  api::delete_weak_persistent_handle(weak);
}

#[test]
fn weak_handle_follows_live_referent() {
  let isolate = new_isolate();
  let _scope = HandleScope::new(&isolate);
  api::enter_scope();
  api::new_list(4);
  api::exit_scope();
  let s = api::new_string("alive");
  let weak = api::new_weak_persistent_handle(
    s,
    std::ptr::null_mut(),
    finalizer(|_, _, _| panic!("referent is still reachable")),
  );
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert!(!api::is_weak_persistent_handle_finalized(weak));
  let h = api::handle_from_weak_persistent(weak);
  assert!(api::identity_equals(h, s));
  api::delete_weak_persistent_handle(weak);
}

#[test]
fn weak_handle_to_smi_is_never_finalized() {
  let isolate = new_isolate();
  api::enter_scope();
  let weak = api::new_weak_persistent_handle(
    api::new_integer(7),
    std::ptr::null_mut(),
    None,
  );
  api::exit_scope();
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert!(!api::is_weak_persistent_handle_finalized(weak));
  api::enter_scope();
  let h = api::handle_from_weak_persistent(weak);
  assert_eq!(api::integer_to_i64(h), Ok(7));
  api::exit_scope();
}

#[test]
fn deleted_weak_handle_never_finalizes() {
  let isolate = new_isolate();
  let calls = Rc::new(Cell::new(0));
  api::enter_scope();
  let weak = {
    let calls = calls.clone();
    api::new_weak_persistent_handle(
      api::new_string("gone"),
      std::ptr::null_mut(),
      finalizer(move |_, _, _| calls.set(calls.get() + 1)),
    )
  };
  api::exit_scope();
  api::delete_weak_persistent_handle(weak);
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert_eq!(calls.get(), 0);
}

#[test]
#[should_panic(expected = "attempt to use a deleted WeakPersistentHandle")]
fn use_deleted_weak_handle() {
  let _isolate = new_isolate();
  api::enter_scope();
  let weak = api::new_weak_persistent_handle(
    api::new_integer(1),
    std::ptr::null_mut(),
    None,
  );
  api::delete_weak_persistent_handle(weak);
  api::handle_from_weak_persistent(weak);
}

#[test]
fn prologue_finalizer_observes_referent() {
  let isolate = new_isolate();
  let log = Rc::new(RefCell::new(Vec::new()));

  api::enter_scope();
  let normal = {
    let log = log.clone();
    api::new_weak_persistent_handle(
      api::new_string("normal"),
      std::ptr::null_mut(),
      finalizer(move |_, _, _| log.borrow_mut().push("normal".to_owned())),
    )
  };
  let prologue = {
    let log = log.clone();
    api::new_prologue_weak_persistent_handle(
      api::new_string("prologue"),
      std::ptr::null_mut(),
      finalizer(move |_, handle, _| {
        assert!(!api::is_weak_persistent_handle_finalized(handle));
        let referent = api::handle_from_weak_persistent(handle);
        let value = api::string_to_rust(referent).unwrap();
        log.borrow_mut().push(value);
        log
          .borrow_mut()
          .push(api::is_weak_persistent_handle_finalized(normal).to_string());
      }),
    )
  };
  assert!(api::is_prologue_weak_persistent_handle(prologue));
  assert!(!api::is_prologue_weak_persistent_handle(normal));
  api::exit_scope();

  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);

  assert_eq!(
    *log.borrow(),
    vec!["prologue".to_owned(), "false".to_owned(), "normal".to_owned()]
  );
  assert!(api::is_weak_persistent_handle_finalized(prologue));
  assert!(api::is_weak_persistent_handle_finalized(normal));
}

#[test]
fn prologue_finalizer_can_resurrect_referent() {
  let isolate = new_isolate();
  let rescued = Rc::new(Cell::new(None));

  api::enter_scope();
  let weak = {
    let rescued = rescued.clone();
    api::new_prologue_weak_persistent_handle(
      api::new_string("phoenix"),
      std::ptr::null_mut(),
      finalizer(move |_, handle, _| {
        let referent = api::handle_from_weak_persistent(handle);
        rescued.set(Some(api::new_persistent_handle(referent)));
      }),
    )
  };
  api::exit_scope();

  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert!(api::is_weak_persistent_handle_finalized(weak));
  let persistent = rescued.get().expect("finalizer did not run");
  api::enter_scope();
  let s = api::handle_from_persistent(persistent);
  assert_eq!(api::string_to_rust(s).as_deref(), Ok("phoenix"));
  api::exit_scope();
}

#[test]
fn finalizer_may_delete_its_handle() {
  let isolate = new_isolate();
  let calls = Rc::new(Cell::new(0));
  api::enter_scope();
  for class in [WeakHandleClass::Normal, WeakHandleClass::Prologue] {
    let calls = calls.clone();
    let callback = finalizer(move |_, handle, _| {
      api::delete_weak_persistent_handle(handle);
      calls.set(calls.get() + 1);
    });
    let object = api::new_list(1);
    let peer = std::ptr::null_mut();
    match class {
      WeakHandleClass::Normal => {
        api::new_weak_persistent_handle(object, peer, callback)
      }
      WeakHandleClass::Prologue => {
        api::new_prologue_weak_persistent_handle(object, peer, callback)
      }
    };
  }
  api::exit_scope();
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Minor);
  assert_eq!(calls.get(), 2);
  let mut stats = HeapStatistics::default();
  isolate.get_heap_statistics(&mut stats);
  assert_eq!(stats.weak_persistent_handle_count(), 0);
}

#[test]
fn finalizer_may_delete_another_handle() {
  let isolate = new_isolate();
  let second_runs = Rc::new(Cell::new(0));
  let second: Rc<Cell<Option<WeakPersistentHandle>>> = Rc::new(Cell::new(None));
  api::enter_scope();
  let first = api::new_weak_persistent_handle(
    api::new_string("first"),
    std::ptr::null_mut(),
    finalizer({
      let second = second.clone();
      move |_, _, _| {
        if let Some(handle) = second.take() {
          api::delete_weak_persistent_handle(handle);
        }
      }
    }),
  );
  let handle = api::new_weak_persistent_handle(
    api::new_string("second"),
    std::ptr::null_mut(),
    finalizer({
      let second_runs = second_runs.clone();
      move |_, _, _| second_runs.set(second_runs.get() + 1)
    }),
  );
  second.set(Some(handle));
  api::exit_scope();

  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert!(second.take().is_none());
  assert!(api::is_weak_persistent_handle_finalized(first));
  assert_eq!(second_runs.get(), 0);
  api::delete_weak_persistent_handle(first);
  drop(isolate);
  assert_eq!(second_runs.get(), 0);
}

#[test]
#[should_panic(expected = "attempt to collect garbage inside a NoGcScope")]
fn finalizer_cannot_collect() {
  let isolate = new_isolate();
  api::enter_scope();
  api::new_weak_persistent_handle(
    api::new_list(1),
    std::ptr::null_mut(),
    finalizer(|isolate, _, _| {
      isolate
        .request_garbage_collection_for_testing(GarbageCollectionType::Minor);
    }),
  );
  api::exit_scope();
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Minor);
}

#[test]
fn remaining_finalizers_run_on_dispose() {
  let calls = Rc::new(Cell::new(0));
  {
    let _isolate = new_isolate();
    api::enter_scope();
    let calls = calls.clone();
    api::new_weak_persistent_handle(
      api::new_string("until the end"),
      std::ptr::null_mut(),
      finalizer(move |_, handle, _| {
        let referent = api::handle_from_weak_persistent(handle);
        assert_eq!(
          api::string_to_rust(referent).as_deref(),
          Ok("until the end")
        );
        calls.set(calls.get() + 1);
      }),
    );
    api::exit_scope();
  }
  assert_eq!(calls.get(), 1);
  assert!(api::current_isolate().is_none());
}

#[test]
fn automatic_collection() {
  setup();
  let isolate = Isolate::new(Isolate::create_params().gc_threshold(Some(16)));
  let _scope = HandleScope::new(&isolate);
  let kept = api::new_string("kept");
  for i in 0..100 {
    api::enter_scope();
    api::new_string(&i.to_string());
    api::exit_scope();
  }
  let mut stats = HeapStatistics::default();
  isolate.get_heap_statistics(&mut stats);
  assert!(stats.collections() > 0);
  assert!(stats.live_objects() < 100);
  assert_eq!(api::string_to_rust(kept).as_deref(), Ok("kept"));
}

fn count_collection(isolate: &Isolate, gc_type: GcType, data: Peer) {
  let counter = unsafe { &*(data as *const Cell<usize>) };
  counter.set(counter.get() + 1);
  assert!(isolate.no_gc_scope_depth() > 0);
  assert!(gc_type.intersects(GcType::ALL));
}

#[test]
fn gc_callbacks() {
  let isolate = new_isolate();
  let prologue = Cell::new(0usize);
  let epilogue = Cell::new(0usize);
  isolate.add_gc_prologue_callback(
    count_collection,
    peer_of(&prologue),
    GcType::ALL,
  );
  isolate.add_gc_epilogue_callback(
    count_collection,
    peer_of(&epilogue),
    GcType::MARK_COMPACT,
  );

  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Minor);
  assert_eq!((prologue.get(), epilogue.get()), (1, 0));
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert_eq!((prologue.get(), epilogue.get()), (2, 1));

  isolate.remove_gc_prologue_callback(count_collection, peer_of(&prologue));
  isolate.remove_gc_epilogue_callback(count_collection, peer_of(&epilogue));
  isolate.request_garbage_collection_for_testing(GarbageCollectionType::Full);
  assert_eq!((prologue.get(), epilogue.get()), (2, 1));
}
