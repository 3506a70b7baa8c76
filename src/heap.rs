// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.

//! A deliberately small object store backing each isolate.
//!
//! Objects are addressed by slot index. The store tracks mark bits for the
//! collector, reuses freed slots, and can slide every live object down to
//! the lowest addresses, which relocates them and is what makes the
//! handle layer's forwarding observable.

use crate::object::HeapObject;
use crate::object::ObjectData;
use crate::object::RawObject;

/// Receives every object pointer slot of a root set. Implementations may
/// rewrite the slot, which is how relocation is propagated.
pub trait ObjectPointerVisitor {
  fn visit_pointer(&mut self, slot: &mut RawObject);

  fn visit_pointers(&mut self, slots: &mut [RawObject]) {
    for slot in slots {
      self.visit_pointer(slot);
    }
  }
}

#[derive(Debug)]
pub(crate) struct Heap {
  objects: Vec<Option<HeapObject>>,
  marks: Vec<bool>,
  free_list: Vec<usize>,
  allocated_since_gc: usize,
  gc_threshold: Option<usize>,
  collections: usize,
  collecting: bool,
  black_allocations: Vec<RawObject>,
}

impl Heap {
  pub(crate) fn new(capacity: usize, gc_threshold: Option<usize>) -> Self {
    Self {
      objects: Vec::with_capacity(capacity),
      marks: Vec::new(),
      free_list: Vec::new(),
      allocated_since_gc: 0,
      gc_threshold,
      collections: 0,
      collecting: false,
      black_allocations: Vec::new(),
    }
  }

  pub(crate) fn allocate(&mut self, data: ObjectData) -> RawObject {
    let object = HeapObject::new(data);
    let address = match self.free_list.pop() {
      Some(address) => {
        debug_assert!(self.objects[address].is_none());
        self.objects[address] = Some(object);
        address
      }
      None => {
        self.objects.push(Some(object));
        self.objects.len() - 1
      }
    };
    let raw = RawObject::from_address(address);
    if self.collecting {
      // Allocated during a collection: treat as reachable.
      self.mark(raw);
      self.black_allocations.push(raw);
    }
    self.allocated_since_gc += 1;
    raw
  }

  pub(crate) fn get(&self, raw: RawObject) -> &HeapObject {
    self
      .objects
      .get(raw.address())
      .and_then(Option::as_ref)
      .unwrap_or_else(|| panic!("dangling object reference {raw:?}"))
  }

  pub(crate) fn get_mut(&mut self, raw: RawObject) -> &mut HeapObject {
    self
      .objects
      .get_mut(raw.address())
      .and_then(Option::as_mut)
      .unwrap_or_else(|| panic!("dangling object reference {raw:?}"))
  }

  /// Whether the allocation counter has reached the automatic collection
  /// threshold.
  pub(crate) fn should_collect(&self) -> bool {
    !self.collecting
      && self
        .gc_threshold
        .is_some_and(|threshold| self.allocated_since_gc >= threshold)
  }

  pub(crate) fn begin_collection(&mut self) {
    assert!(!self.collecting, "collection already in progress");
    self.collecting = true;
    self.black_allocations.clear();
    self.reset_marks();
  }

  /// Clears every mark bit so marking can start over.
  pub(crate) fn reset_marks(&mut self) {
    self.marks.clear();
    self.marks.resize(self.objects.len(), false);
  }

  /// Objects allocated since the collection began. They are reachable by
  /// definition, and so is everything they point to.
  pub(crate) fn black_allocations(&self) -> &[RawObject] {
    &self.black_allocations
  }

  /// Sets the mark bit of `raw`. Returns true if the object was not marked
  /// before. Immediates are never marked.
  pub(crate) fn mark(&mut self, raw: RawObject) -> bool {
    if !raw.is_heap_object() {
      return false;
    }
    let address = raw.address();
    if self.marks.len() <= address {
      self.marks.resize(address + 1, false);
    }
    !std::mem::replace(&mut self.marks[address], true)
  }

  /// Immediates are always considered live.
  pub(crate) fn is_marked(&self, raw: RawObject) -> bool {
    !raw.is_heap_object()
      || self.marks.get(raw.address()).copied().unwrap_or(false)
  }

  /// Frees every unmarked object. Returns the number reclaimed.
  pub(crate) fn sweep(&mut self) -> usize {
    let mut reclaimed = 0;
    for (address, slot) in self.objects.iter_mut().enumerate() {
      let marked = self.marks.get(address).copied().unwrap_or(false);
      if slot.is_some() && !marked {
        *slot = None;
        self.free_list.push(address);
        reclaimed += 1;
      }
    }
    reclaimed
  }

  /// Slides every live object down to the lowest free addresses and
  /// rewrites interior pointers. Roots outside the heap must be updated
  /// with the returned forwarding table.
  pub(crate) fn compact(&mut self) -> Forwarding {
    let mut table = vec![None; self.objects.len()];
    let mut objects = Vec::with_capacity(self.objects.capacity());
    let mut relocated = 0;
    for (address, slot) in self.objects.drain(..).enumerate() {
      if let Some(object) = slot {
        let new_address = objects.len();
        if new_address != address {
          relocated += 1;
        }
        table[address] = Some(new_address);
        objects.push(Some(object));
      }
    }
    let forwarding = Forwarding { table, relocated };
    for object in objects.iter_mut().flatten() {
      object.for_each_pointer_mut(|slot| *slot = forwarding.forward(*slot));
    }
    self.objects = objects;
    self.free_list.clear();
    forwarding
  }

  pub(crate) fn end_collection(&mut self) {
    self.collecting = false;
    self.marks.clear();
    self.black_allocations.clear();
    self.allocated_since_gc = 0;
    self.collections += 1;
  }

  pub(crate) fn live_objects(&self) -> usize {
    self.objects.len() - self.free_list.len()
  }

  pub(crate) fn capacity(&self) -> usize {
    self.objects.capacity()
  }

  pub(crate) fn collections(&self) -> usize {
    self.collections
  }
}

/// Old-to-new address map produced by `Heap::compact`.
#[derive(Debug)]
pub(crate) struct Forwarding {
  table: Vec<Option<usize>>,
  relocated: usize,
}

impl Forwarding {
  pub(crate) fn forward(&self, raw: RawObject) -> RawObject {
    if !raw.is_heap_object() {
      return raw;
    }
    match self.table.get(raw.address()).copied().flatten() {
      Some(address) => RawObject::from_address(address),
      None => panic!("dangling object reference {raw:?} survived collection"),
    }
  }

  pub(crate) fn relocated(&self) -> usize {
    self.relocated
  }
}

impl ObjectPointerVisitor for Forwarding {
  fn visit_pointer(&mut self, slot: &mut RawObject) {
    *slot = self.forward(*slot);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allocation_reuses_swept_slots() {
    let mut heap = Heap::new(4, None);
    let a = heap.allocate(ObjectData::Mint(1));
    let b = heap.allocate(ObjectData::Mint(2));
    heap.begin_collection();
    heap.mark(b);
    assert_eq!(heap.sweep(), 1);
    heap.end_collection();
    assert_eq!(heap.live_objects(), 1);
    let c = heap.allocate(ObjectData::Mint(3));
    assert_eq!(c, a);
    assert_eq!(heap.collections(), 1);
  }

  #[test]
  fn compaction_forwards_interior_pointers() {
    let mut heap = Heap::new(4, None);
    let garbage = heap.allocate(ObjectData::Null);
    let element = heap.allocate(ObjectData::Double(1.5));
    let array = heap.allocate(ObjectData::Array(vec![element]));
    heap.begin_collection();
    heap.mark(element);
    heap.mark(array);
    heap.sweep();
    let forwarding = heap.compact();
    heap.end_collection();
    assert_eq!(forwarding.relocated(), 2);
    let new_element = forwarding.forward(element);
    assert_eq!(new_element, garbage);
    let new_array = forwarding.forward(array);
    match &heap.get(new_array).data {
      ObjectData::Array(elements) => assert_eq!(elements[0], new_element),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn allocation_during_collection_survives() {
    let mut heap = Heap::new(4, None);
    heap.begin_collection();
    let fresh = heap.allocate(ObjectData::Bool(true));
    assert_eq!(heap.black_allocations(), &[fresh]);
    assert_eq!(heap.sweep(), 0);
    heap.end_collection();
    assert_eq!(heap.get(fresh).class_id(), crate::object::ClassId::Bool);
  }

  #[test]
  fn threshold() {
    let mut heap = Heap::new(4, Some(2));
    heap.allocate(ObjectData::Null);
    assert!(!heap.should_collect());
    heap.allocate(ObjectData::Null);
    assert!(heap.should_collect());
    assert!(!Heap::new(4, None).should_collect());
  }

  #[test]
  #[should_panic(expected = "dangling object reference")]
  fn dangling_reference() {
    let heap = Heap::new(4, None);
    heap.get(RawObject::from_address(3));
  }
}
