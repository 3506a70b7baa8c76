// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use std::fmt;

/// Arena of reusable slots with an index free list.
///
/// Every slot carries a generation that is bumped when the slot is freed,
/// so an `(index, generation)` pair minted by `allocate` detects use after
/// free even once the slot has been reused.
pub(crate) struct HandleTable<T> {
  entries: Vec<Entry<T>>,
  free_head: Option<u32>,
  len: usize,
}

struct Entry<T> {
  generation: u32,
  slot: Slot<T>,
}

enum Slot<T> {
  Occupied(T),
  Vacant { next_free: Option<u32> },
}

impl<T> HandleTable<T> {
  pub(crate) fn new() -> Self {
    Self {
      entries: Vec::new(),
      free_head: None,
      len: 0,
    }
  }

  /// Stores `value`, returning its `(index, generation)`.
  pub(crate) fn allocate(&mut self, value: T) -> (u32, u32) {
    self.len += 1;
    match self.free_head {
      Some(index) => {
        let entry = &mut self.entries[index as usize];
        let Slot::Vacant { next_free } = entry.slot else {
          unreachable!("free list points at an occupied slot")
        };
        self.free_head = next_free;
        entry.slot = Slot::Occupied(value);
        (index, entry.generation)
      }
      None => {
        let index = u32::try_from(self.entries.len())
          .unwrap_or_else(|_| panic!("handle table exhausted"));
        self.entries.push(Entry {
          generation: 0,
          slot: Slot::Occupied(value),
        });
        (index, 0)
      }
    }
  }

  /// Removes and returns the value at `(index, generation)`, or `None` if
  /// that pair does not name a live slot.
  pub(crate) fn free(&mut self, index: u32, generation: u32) -> Option<T> {
    let entry = self.entries.get_mut(index as usize)?;
    if entry.generation != generation
      || !matches!(entry.slot, Slot::Occupied(_))
    {
      return None;
    }
    let slot = std::mem::replace(
      &mut entry.slot,
      Slot::Vacant {
        next_free: self.free_head,
      },
    );
    entry.generation = entry.generation.wrapping_add(1);
    self.free_head = Some(index);
    self.len -= 1;
    match slot {
      Slot::Occupied(value) => Some(value),
      Slot::Vacant { .. } => unreachable!(),
    }
  }

  pub(crate) fn get(&self, index: u32, generation: u32) -> Option<&T> {
    match self.entries.get(index as usize)? {
      Entry {
        generation: g,
        slot: Slot::Occupied(value),
      } if *g == generation => Some(value),
      _ => None,
    }
  }

  pub(crate) fn get_mut(
    &mut self,
    index: u32,
    generation: u32,
  ) -> Option<&mut T> {
    match self.entries.get_mut(index as usize)? {
      Entry {
        generation: g,
        slot: Slot::Occupied(value),
      } if *g == generation => Some(value),
      _ => None,
    }
  }

  /// Iterates the live slots as `(index, generation, value)`.
  pub(crate) fn iter_mut(
    &mut self,
  ) -> impl Iterator<Item = (u32, u32, &mut T)> + '_ {
    self
      .entries
      .iter_mut()
      .enumerate()
      .filter_map(|(index, entry)| match &mut entry.slot {
        Slot::Occupied(value) => Some((index as u32, entry.generation, value)),
        Slot::Vacant { .. } => None,
      })
  }

  pub(crate) fn len(&self) -> usize {
    self.len
  }
}

impl<T> Default for HandleTable<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> fmt::Debug for HandleTable<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandleTable")
      .field("len", &self.len)
      .field("capacity", &self.entries.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn freed_slots_are_reused_with_new_generation() {
    let mut table = HandleTable::new();
    let (a, ga) = table.allocate("a");
    let (b, _) = table.allocate("b");
    assert_ne!(a, b);
    assert_eq!(table.free(a, ga), Some("a"));
    assert_eq!(table.len(), 1);
    let (c, gc) = table.allocate("c");
    assert_eq!(c, a);
    assert_ne!(gc, ga);
    assert_eq!(table.get(a, ga), None);
    assert_eq!(table.get(c, gc), Some(&"c"));
  }

  #[test]
  fn stale_free_is_rejected() {
    let mut table = HandleTable::new();
    let (a, ga) = table.allocate(1);
    assert_eq!(table.free(a, ga), Some(1));
    assert_eq!(table.free(a, ga), None);
    assert_eq!(table.free(99, 0), None);
    assert_eq!(table.len(), 0);
  }

  #[test]
  fn iter_mut_skips_vacant_slots() {
    let mut table = HandleTable::new();
    let (a, ga) = table.allocate(1);
    table.allocate(2);
    table.allocate(3);
    table.free(a, ga);
    for (_, _, value) in table.iter_mut() {
      *value *= 10;
    }
    let values: Vec<_> = table.iter_mut().map(|(_, _, v)| *v).collect();
    assert_eq!(values, vec![20, 30]);
  }
}
