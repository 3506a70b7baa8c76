// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.
use std::ffi::c_void;

/// Opaque native payload attached to weak persistent handles and external
/// strings. The VM never dereferences it.
pub type Peer = *mut c_void;

/// Reduces a fully qualified function path, as produced by
/// `std::any::type_name` for a nested item, to the bare name of the API
/// operation that contains it. Closure segments are skipped.
pub fn canonical_function(path: &'static str) -> &'static str {
  let path = path.strip_suffix("::f").unwrap_or(path);
  path
    .rsplit("::")
    .find(|segment| !segment.starts_with('{'))
    .unwrap_or(path)
}
