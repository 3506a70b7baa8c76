// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use crate::heap::ObjectPointerVisitor;
use crate::object::RawObject;

pub(crate) const DEFAULT_HANDLES_PER_SEGMENT: usize = 64;

/// Append-only storage for the local handles of one scope. Slots live in
/// fixed-size segments, so growing never moves an existing slot.
#[derive(Debug)]
pub(crate) struct LocalHandles {
  segments: Vec<Vec<RawObject>>,
  per_segment: usize,
  len: usize,
}

impl LocalHandles {
  fn new(per_segment: usize) -> Self {
    Self {
      segments: Vec::new(),
      per_segment,
      len: 0,
    }
  }

  pub(crate) fn allocate(&mut self, raw: RawObject) -> u32 {
    let needs_segment = self
      .segments
      .last()
      .is_none_or(|segment| segment.len() == self.per_segment);
    if needs_segment {
      self.segments.push(Vec::with_capacity(self.per_segment));
    }
    if let Some(segment) = self.segments.last_mut() {
      segment.push(raw);
    }
    let index = self.len;
    self.len += 1;
    u32::try_from(index)
      .unwrap_or_else(|_| panic!("too many local handles in one scope"))
  }

  fn slot(&self, index: u32) -> Option<&RawObject> {
    let index = index as usize;
    self
      .segments
      .get(index / self.per_segment)?
      .get(index % self.per_segment)
  }

  fn slot_mut(&mut self, index: u32) -> Option<&mut RawObject> {
    let index = index as usize;
    self
      .segments
      .get_mut(index / self.per_segment)?
      .get_mut(index % self.per_segment)
  }

  pub(crate) fn len(&self) -> usize {
    self.len
  }

  #[cfg(test)]
  fn segment_count(&self) -> usize {
    self.segments.len()
  }

  fn visit_object_pointers(&mut self, visitor: &mut dyn ObjectPointerVisitor) {
    for segment in &mut self.segments {
      visitor.visit_pointers(segment);
    }
  }
}

#[derive(Debug)]
pub(crate) struct ApiLocalScope {
  serial: u64,
  pub(crate) handles: LocalHandles,
}

/// Identifies an entered scope. `serial` is never reused, so a `ScopeId`
/// outlives its scope without ever matching a later one at the same depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ScopeId {
  pub(crate) depth: u32,
  pub(crate) serial: u64,
}

#[derive(Debug)]
pub(crate) struct LocalScopeStack {
  scopes: Vec<ApiLocalScope>,
  next_serial: u64,
  handles_per_segment: usize,
}

impl LocalScopeStack {
  pub(crate) fn new(handles_per_segment: usize) -> Self {
    assert!(handles_per_segment > 0, "segments must hold at least one handle");
    Self {
      scopes: Vec::new(),
      next_serial: 0,
      handles_per_segment,
    }
  }

  pub(crate) fn enter(&mut self) -> ScopeId {
    let serial = self.next_serial;
    self.next_serial += 1;
    self.scopes.push(ApiLocalScope {
      serial,
      handles: LocalHandles::new(self.handles_per_segment),
    });
    ScopeId {
      depth: self.depth() - 1,
      serial,
    }
  }

  /// Pops the top scope. Returns `None` when the stack is empty.
  pub(crate) fn exit(&mut self) -> Option<ScopeId> {
    let scope = self.scopes.pop()?;
    Some(ScopeId {
      depth: self.depth(),
      serial: scope.serial,
    })
  }

  pub(crate) fn top(&self) -> Option<ScopeId> {
    let scope = self.scopes.last()?;
    Some(ScopeId {
      depth: self.depth() - 1,
      serial: scope.serial,
    })
  }

  pub(crate) fn top_mut(&mut self) -> Option<(ScopeId, &mut ApiLocalScope)> {
    let depth = self.depth().checked_sub(1)?;
    let scope = self.scopes.last_mut()?;
    Some((
      ScopeId {
        depth,
        serial: scope.serial,
      },
      scope,
    ))
  }

  fn lookup(&self, id: ScopeId) -> Option<&ApiLocalScope> {
    self
      .scopes
      .get(id.depth as usize)
      .filter(|scope| scope.serial == id.serial)
  }

  fn lookup_mut(&mut self, id: ScopeId) -> Option<&mut ApiLocalScope> {
    self
      .scopes
      .get_mut(id.depth as usize)
      .filter(|scope| scope.serial == id.serial)
  }

  /// The raw value of a local slot, or `None` if its scope has exited.
  pub(crate) fn get(&self, id: ScopeId, index: u32) -> Option<RawObject> {
    self.lookup(id)?.handles.slot(index).copied()
  }

  pub(crate) fn get_mut(
    &mut self,
    id: ScopeId,
    index: u32,
  ) -> Option<&mut RawObject> {
    self.lookup_mut(id)?.handles.slot_mut(index)
  }

  pub(crate) fn depth(&self) -> u32 {
    self.scopes.len() as u32
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.scopes.is_empty()
  }

  pub(crate) fn handle_count(&self) -> usize {
    self.scopes.iter().map(|scope| scope.handles.len()).sum()
  }

  /// Visits every slot of every scope on the stack.
  pub(crate) fn visit_object_pointers(
    &mut self,
    visitor: &mut dyn ObjectPointerVisitor,
  ) {
    for scope in &mut self.scopes {
      scope.handles.visit_object_pointers(visitor);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Count(usize);

  impl ObjectPointerVisitor for Count {
    fn visit_pointer(&mut self, _: &mut RawObject) {
      self.0 += 1;
    }
  }

  #[test]
  fn segments_grow_without_moving_slots() {
    let mut stack = LocalScopeStack::new(4);
    let id = stack.enter();
    let (_, scope) = stack.top_mut().unwrap();
    for i in 0..10 {
      assert_eq!(scope.handles.allocate(RawObject::from_smi(i)), i as u32);
    }
    assert_eq!(scope.handles.segment_count(), 3);
    assert_eq!(stack.get(id, 9), Some(RawObject::from_smi(9)));
    assert_eq!(stack.get(id, 10), None);
    assert_eq!(stack.handle_count(), 10);
  }

  #[test]
  fn serials_are_never_reused() {
    let mut stack = LocalScopeStack::new(4);
    let first = stack.enter();
    stack.top_mut().unwrap().1.handles.allocate(RawObject::from_smi(1));
    assert_eq!(stack.exit(), Some(first));
    let second = stack.enter();
    assert_eq!(first.depth, second.depth);
    assert_ne!(first.serial, second.serial);
    assert_eq!(stack.get(first, 0), None);
  }

  #[test]
  fn exit_on_empty_stack() {
    let mut stack = LocalScopeStack::new(4);
    assert!(stack.is_empty());
    assert_eq!(stack.exit(), None);
  }

  #[test]
  fn visitor_sees_every_slot() {
    let mut stack = LocalScopeStack::new(2);
    stack.enter();
    for i in 0..3 {
      stack.top_mut().unwrap().1.handles.allocate(RawObject::from_smi(i));
    }
    stack.enter();
    stack.top_mut().unwrap().1.handles.allocate(RawObject::from_smi(7));
    let mut count = Count(0);
    stack.visit_object_pointers(&mut count);
    assert_eq!(count.0, 4);
  }
}
