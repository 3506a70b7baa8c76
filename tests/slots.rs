// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.

// Embedders wrap the isolate in their own types and keep per-isolate state in
// its slots. The state is dropped together with the isolate.

use std::ops::Deref;
use std::ops::DerefMut;
use std::rc::Rc;
use std::sync::Once;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use vm_api::api;

fn setup() {
  static START: Once = Once::new();
  START.call_once(|| {
    vm_api::vm::initialize();
  });
}

struct Runtime(vm_api::OwnedIsolate);

struct RuntimeState {
  drop_count: Rc<AtomicUsize>,
  calls: usize,
}

impl Drop for RuntimeState {
  fn drop(&mut self) {
    self.drop_count.fetch_add(1, Ordering::SeqCst);
  }
}

impl Runtime {
  fn new(drop_count: Rc<AtomicUsize>) -> Runtime {
    setup();
    let mut isolate = vm_api::Isolate::new(Default::default());
    let state = RuntimeState {
      drop_count,
      calls: 0,
    };
    assert!(isolate.set_slot(state));
    Runtime(isolate)
  }

  fn sum(&mut self, values: &[i64]) -> i64 {
    let total = {
      let _scope = vm_api::HandleScope::new(&self.0);
      let list = api::new_list(values.len() as i64);
      for (i, &value) in values.iter().enumerate() {
        api::list_set_at(list, i, api::new_integer(value));
      }
      (0..values.len())
        .map(|i| api::integer_to_i64(api::list_get_at(list, i)).unwrap())
        .sum()
    };
    self.get_slot_mut::<RuntimeState>().unwrap().calls += 1;
    total
  }

  fn calls(&self) -> usize {
    self.get_slot::<RuntimeState>().unwrap().calls
  }
}

impl Deref for Runtime {
  type Target = vm_api::Isolate;
  fn deref(&self) -> &vm_api::Isolate {
    &self.0
  }
}

impl DerefMut for Runtime {
  fn deref_mut(&mut self) -> &mut vm_api::Isolate {
    &mut self.0
  }
}

#[test]
fn slots_layer() {
  let drop_count = Rc::new(AtomicUsize::new(0));
  let mut runtime = Runtime::new(drop_count.clone());
  assert_eq!(runtime.sum(&[1, 2, 3]), 6);
  assert_eq!(runtime.sum(&[]), 0);
  assert_eq!(runtime.calls(), 2);
  assert_eq!(drop_count.load(Ordering::SeqCst), 0);
  drop(runtime);
  assert_eq!(drop_count.load(Ordering::SeqCst), 1);
}

#[test]
fn slots_basic() {
  struct TestState(i32);

  setup();
  let mut isolate = vm_api::Isolate::new(Default::default());
  assert!(isolate.get_slot::<TestState>().is_none());
  assert!(isolate.set_slot(TestState(0)));
  isolate.get_slot_mut::<TestState>().unwrap().0 += 1;
  assert_eq!(isolate.get_slot::<TestState>().unwrap().0, 1);
  assert!(!isolate.set_slot(TestState(10)));
  assert_eq!(isolate.remove_slot::<TestState>().map(|s| s.0), Some(10));
  assert!(isolate.get_slot::<TestState>().is_none());
}
