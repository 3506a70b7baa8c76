// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use crate::handle::Api;
use crate::handle::Handle;
use crate::isolate::Isolate;
use crate::object::ObjectData;
use crate::object::RawObject;
use crate::scope::NoGcScope;

/// A native function invoked through `invoke_native`.
pub type NativeFunction = fn(&mut NativeArguments);

/// The arguments and return slot of a native call.
///
/// The argument handles belong to the callee's own scope. The return slot
/// lives in the caller's scope, so the value survives the callee's scope.
#[derive(Debug)]
pub struct NativeArguments<'i> {
  isolate: &'i Isolate,
  arguments: Vec<Handle>,
  return_value: Handle,
}

impl<'i> NativeArguments<'i> {
  pub(crate) fn new(
    isolate: &'i Isolate,
    arguments: Vec<Handle>,
    return_value: Handle,
  ) -> Self {
    Self {
      isolate,
      arguments,
      return_value,
    }
  }

  pub fn isolate(&self) -> &'i Isolate {
    self.isolate
  }

  pub fn argument_count(&self) -> usize {
    self.arguments.len()
  }

  /// The argument at `index`, or a range error handle if there is no such
  /// argument.
  pub fn get_argument(&self, index: usize) -> Handle {
    match self.arguments.get(index) {
      Some(&argument) => argument,
      None => index_error!(self.isolate, index, self.arguments.len()),
    }
  }

  /// The handle the caller receives.
  pub fn return_value(&self) -> Handle {
    self.return_value
  }

  pub fn set_return_value(&mut self, value: Handle) {
    let raw = Api::unwrap_handle(self.isolate, value);
    self.write_return_value(raw);
  }

  /// # Panics
  ///
  /// Panics if `value` does not fit in a Smi.
  pub fn set_smi_return_value(&mut self, value: i64) {
    if !RawObject::is_valid_smi(value) {
      panic!("{} expects {} to be a Smi", current_func!(), value);
    }
    self.write_return_value(RawObject::from_smi(value));
  }

  pub fn set_integer_return_value(&mut self, value: i64) {
    let raw = if RawObject::is_valid_smi(value) {
      RawObject::from_smi(value)
    } else {
      self.isolate.allocate(ObjectData::Mint(value))
    };
    self.write_return_value(raw);
  }

  pub fn set_double_return_value(&mut self, value: f64) {
    let raw = self.isolate.allocate(ObjectData::Double(value));
    self.write_return_value(raw);
  }

  pub fn set_boolean_return_value(&mut self, value: bool) {
    let handle = if value {
      Api::true_(self.isolate)
    } else {
      Api::false_(self.isolate)
    };
    self.set_return_value(handle);
  }

  // Callers allocate before this point.
  fn write_return_value(&mut self, raw: RawObject) {
    let _no_gc = NoGcScope::new(self.isolate);
    Api::set_local_raw(self.isolate, self.return_value, raw);
  }
}
