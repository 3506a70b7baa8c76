// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.

//! Precondition checks shared by every API entry point.
//!
//! The `check_*` macros guard against programming errors and panic with a
//! diagnostic naming the calling operation. The `*_error!` macros build
//! recoverable error handles instead; they never panic.

/// Evaluates to the name of the enclosing function.
macro_rules! current_func {
  () => {{
    fn f() {}
    fn type_name_of<T>(_: T) -> &'static str {
      ::std::any::type_name::<T>()
    }
    $crate::support::canonical_function(type_name_of(f))
  }};
}

/// Evaluates to the current isolate, or panics if there is none.
macro_rules! check_isolate {
  () => {
    match $crate::isolate::Isolate::current() {
      Some(isolate) => isolate,
      None => panic!(
        "{} expects there to be a current isolate. Did you forget to call \
         Isolate::new or enter_isolate?",
        current_func!()
      ),
    }
  };
}

/// Panics if an isolate is current on this thread.
macro_rules! check_no_isolate {
  () => {
    if $crate::isolate::Isolate::current().is_some() {
      panic!(
        "{} expects there to be no current isolate. Did you forget to call \
         exit_isolate?",
        current_func!()
      );
    }
  };
}

/// Like `check_isolate!`, and additionally requires an entered API scope.
macro_rules! check_isolate_scope {
  () => {{
    let isolate = check_isolate!();
    if !isolate.has_api_scope() {
      panic!(
        "{} expects to find a current scope. Did you forget to call \
         enter_scope?",
        current_func!()
      );
    }
    isolate
  }};
}

/// Builds the error handle for an argument of the wrong type. A null
/// argument yields the non-null error, and an argument that already is an
/// error is passed through.
macro_rules! type_error {
  ($isolate:expr, $handle:ident, $ty:ty) => {
    $crate::handle::Api::type_error(
      $isolate,
      current_func!(),
      stringify!($handle),
      $handle,
      <$ty as $crate::data::ObjectType>::NAME,
    )
  };
}

/// Builds the error handle for a missing (null) argument.
macro_rules! null_error {
  ($isolate:expr, $param:ident) => {
    $crate::handle::Api::new_error(
      $isolate,
      $crate::error::ApiError::NullArgument {
        function: current_func!(),
        argument: stringify!($param),
      },
    )
  };
}

/// Builds the error handle for an argument outside `[0..max]`.
macro_rules! range_error {
  ($isolate:expr, $param:ident, $max:expr) => {
    $crate::handle::Api::new_error(
      $isolate,
      $crate::error::ApiError::OutOfRange {
        function: current_func!(),
        argument: stringify!($param),
        max: $max as i64,
      },
    )
  };
}

/// Builds the error handle for an index into a sequence of `len` elements.
/// An empty sequence has no valid index, which gets its own error.
macro_rules! index_error {
  ($isolate:expr, $param:ident, $len:expr) => {
    match $len {
      0 => $crate::handle::Api::new_error(
        $isolate,
        $crate::error::ApiError::IndexIntoEmpty {
          function: current_func!(),
          argument: stringify!($param),
        },
      ),
      len => range_error!($isolate, $param, len as i64 - 1),
    }
  };
}

/// Returns a range error from the enclosing function unless
/// `0 <= length <= max`; evaluates to the length as `usize` otherwise.
macro_rules! check_length {
  ($isolate:expr, $length:ident, $max:expr) => {{
    let len = $length as i64;
    let max = $max as i64;
    if len < 0 || len > max {
      return range_error!($isolate, $length, max);
    }
    len as usize
  }};
}

/// Returns the pre-allocated acquired error from the enclosing function
/// while callbacks into native code are disallowed.
macro_rules! check_callback_state {
  ($isolate:expr) => {
    if $isolate.no_callback_scope_depth() != 0 {
      return $crate::handle::Api::acquired_error($isolate);
    }
  };
}
