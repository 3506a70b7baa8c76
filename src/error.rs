// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use thiserror::Error;

/// Payload of an error handle.
///
/// Error handles are ordinary handles whose referent is an `ApiError`
/// object. API functions return them in place of a result when a
/// recoverable problem occurs, such as a missing argument or a value of the
/// wrong type.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ApiError {
  #[error("{function} expects argument '{argument}' to be non-null.")]
  NullArgument {
    function: &'static str,
    argument: &'static str,
  },
  #[error("{function} expects argument '{argument}' to be of type {expected}.")]
  TypeMismatch {
    function: &'static str,
    argument: &'static str,
    expected: &'static str,
  },
  #[error(
    "{function} expects argument '{argument}' to be in the range [0..{max}]."
  )]
  OutOfRange {
    function: &'static str,
    argument: &'static str,
    max: i64,
  },
  #[error(
    "{function} expects argument '{argument}' to index a non-empty sequence."
  )]
  IndexIntoEmpty {
    function: &'static str,
    argument: &'static str,
  },
  #[error("{0}")]
  Message(String),
  #[error(
    "Callbacks into the VM are currently prohibited: a no-callback scope \
     is active."
  )]
  CallbacksDisallowed,
}

impl ApiError {
  /// The API operation that reported this error, if known.
  pub fn function(&self) -> Option<&'static str> {
    match self {
      Self::NullArgument { function, .. }
      | Self::TypeMismatch { function, .. }
      | Self::OutOfRange { function, .. }
      | Self::IndexIntoEmpty { function, .. } => Some(function),
      Self::Message(_) | Self::CallbacksDisallowed => None,
    }
  }

  /// The offending parameter, if the error concerns one.
  pub fn argument(&self) -> Option<&'static str> {
    match self {
      Self::NullArgument { argument, .. }
      | Self::TypeMismatch { argument, .. }
      | Self::OutOfRange { argument, .. }
      | Self::IndexIntoEmpty { argument, .. } => Some(argument),
      Self::Message(_) | Self::CallbacksDisallowed => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages_name_function_and_argument() {
    let e = ApiError::NullArgument {
      function: "new_string_from_utf8",
      argument: "utf8",
    };
    assert_eq!(
      e.to_string(),
      "new_string_from_utf8 expects argument 'utf8' to be non-null."
    );
    let e = ApiError::TypeMismatch {
      function: "integer_to_i64",
      argument: "integer",
      expected: "Integer",
    };
    assert_eq!(
      e.to_string(),
      "integer_to_i64 expects argument 'integer' to be of type Integer."
    );
    let e = ApiError::OutOfRange {
      function: "new_list",
      argument: "length",
      max: 10,
    };
    assert_eq!(
      e.to_string(),
      "new_list expects argument 'length' to be in the range [0..10]."
    );
    assert_eq!(e.function(), Some("new_list"));
    assert_eq!(e.argument(), Some("length"));
  }

  #[test]
  fn free_form_message() {
    let e = ApiError::Message("boom".to_owned());
    assert_eq!(e.to_string(), "boom");
    assert_eq!(e.function(), None);
  }
}
