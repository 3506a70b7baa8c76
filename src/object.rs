// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use std::fmt;

use crate::error::ApiError;
use crate::support::Peer;

/// A tagged machine word referring to a managed object.
///
/// Small integers ("Smis") are stored inline: the low bit is `0` and the
/// value lives in the remaining bits. Every other object lives on the heap;
/// its raw word carries the heap address with the low bit set to `1`. Code
/// that only needs to recognize a Smi never has to touch heap memory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RawObject(usize);

impl RawObject {
  const SMI_TAG: usize = 0;
  const HEAP_OBJECT_TAG: usize = 1;
  const TAG_MASK: usize = 1;
  const TAG_SIZE: u32 = 1;

  /// Smallest value representable as a Smi.
  pub const SMI_MIN: i64 = (isize::MIN >> Self::TAG_SIZE) as i64;
  /// Largest value representable as a Smi.
  pub const SMI_MAX: i64 = (isize::MAX >> Self::TAG_SIZE) as i64;

  #[inline(always)]
  pub fn is_valid_smi(value: i64) -> bool {
    (Self::SMI_MIN..=Self::SMI_MAX).contains(&value)
  }

  /// Encodes `value` as an immediate.
  ///
  /// # Panics
  ///
  /// Panics if `value` is outside `SMI_MIN..=SMI_MAX`.
  #[inline(always)]
  pub fn from_smi(value: i64) -> Self {
    assert!(Self::is_valid_smi(value), "{value} is not a valid Smi");
    Self(((value as isize) << Self::TAG_SIZE) as usize | Self::SMI_TAG)
  }

  #[inline(always)]
  pub fn is_smi(self) -> bool {
    self.0 & Self::TAG_MASK == Self::SMI_TAG
  }

  #[inline(always)]
  pub fn is_heap_object(self) -> bool {
    self.0 & Self::TAG_MASK == Self::HEAP_OBJECT_TAG
  }

  /// Decodes an immediate. The result is meaningless for heap objects.
  #[inline(always)]
  pub fn smi_value(self) -> i64 {
    debug_assert!(self.is_smi());
    ((self.0 as isize) >> Self::TAG_SIZE) as i64
  }

  /// The untouched bits of this word.
  #[inline(always)]
  pub fn raw_bits(self) -> usize {
    self.0
  }

  #[inline(always)]
  pub(crate) fn from_address(address: usize) -> Self {
    Self((address << Self::TAG_SIZE) | Self::HEAP_OBJECT_TAG)
  }

  #[inline(always)]
  pub(crate) fn address(self) -> usize {
    debug_assert!(self.is_heap_object());
    self.0 >> Self::TAG_SIZE
  }
}

impl fmt::Debug for RawObject {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_smi() {
      write!(f, "Smi({})", self.smi_value())
    } else {
      write!(f, "HeapObject(@{})", self.address())
    }
  }
}

/// Runtime class of a managed object.
///
/// Classes below `FIRST_INSTANCE` are VM-internal; everything from
/// `FIRST_INSTANCE` up is a user-visible instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum ClassId {
  Null = 1,
  ApiError,
  Bool,
  Smi,
  Mint,
  Double,
  String,
  ExternalString,
  Array,
}

impl ClassId {
  pub const FIRST_INSTANCE: ClassId = ClassId::Bool;

  #[inline(always)]
  pub fn is_instance(self) -> bool {
    self >= Self::FIRST_INSTANCE
  }
}

/// Payload of a heap-allocated object.
#[derive(Debug)]
pub(crate) enum ObjectData {
  Null,
  Bool(bool),
  Mint(i64),
  Double(f64),
  String(String),
  ExternalString { value: String, peer: Peer },
  Array(Vec<RawObject>),
  ApiError(ApiError),
}

#[derive(Debug)]
pub(crate) struct HeapObject {
  pub(crate) data: ObjectData,
}

impl HeapObject {
  pub(crate) fn new(data: ObjectData) -> Self {
    Self { data }
  }

  pub(crate) fn class_id(&self) -> ClassId {
    match self.data {
      ObjectData::Null => ClassId::Null,
      ObjectData::Bool(_) => ClassId::Bool,
      ObjectData::Mint(_) => ClassId::Mint,
      ObjectData::Double(_) => ClassId::Double,
      ObjectData::String(_) => ClassId::String,
      ObjectData::ExternalString { .. } => ClassId::ExternalString,
      ObjectData::Array(_) => ClassId::Array,
      ObjectData::ApiError(_) => ClassId::ApiError,
    }
  }

  /// Calls `f` with every object pointer stored inside this object.
  pub(crate) fn for_each_pointer(&self, mut f: impl FnMut(RawObject)) {
    if let ObjectData::Array(elements) = &self.data {
      elements.iter().copied().for_each(&mut f);
    }
  }

  pub(crate) fn for_each_pointer_mut(
    &mut self,
    mut f: impl FnMut(&mut RawObject),
  ) {
    if let ObjectData::Array(elements) = &mut self.data {
      elements.iter_mut().for_each(&mut f);
    }
  }
}
