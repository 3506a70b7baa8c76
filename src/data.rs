// Copyright 2019-2021 the Deno authors. All rights reserved. MIT license.

//! The closed set of runtime type tags a handle can be checked against.

use paste::paste;

use crate::handle::Api;
use crate::handle::Handle;
use crate::object::ClassId;

/// Largest length accepted by `new_list`.
pub const MAX_LIST_LENGTH: i64 = 1 << 28;

/// A runtime type a handle's referent can be tested for with
/// `Api::unwrap_as`.
pub trait ObjectType {
  /// Type name used in error messages.
  const NAME: &'static str;

  fn matches(cid: ClassId) -> bool;
}

macro_rules! declare_object_type {
  ($name:ident, |$cid:ident| $matches:expr) => {
    paste! {
      #[derive(Debug)]
      pub enum $name {}

      impl ObjectType for $name {
        const NAME: &'static str = stringify!($name);

        #[inline(always)]
        fn matches($cid: ClassId) -> bool {
          $matches
        }
      }

      #[doc = "Returns true if `handle` refers to a " $name "."]
      pub fn [<is_ $name:snake>](handle: Handle) -> bool {
        let isolate = check_isolate!();
        Api::unwrap_as::<$name>(isolate, handle).is_some()
      }
    }
  };
}

declare_object_type!(Null, |cid| cid == ClassId::Null);
declare_object_type!(Instance, |cid| cid.is_instance());
declare_object_type!(Integer, |cid| {
  matches!(cid, ClassId::Smi | ClassId::Mint)
});
declare_object_type!(Double, |cid| cid == ClassId::Double);
declare_object_type!(Number, |cid| matches!(
  cid,
  ClassId::Smi | ClassId::Mint | ClassId::Double
));
declare_object_type!(Boolean, |cid| cid == ClassId::Bool);
declare_object_type!(String, |cid| matches!(
  cid,
  ClassId::String | ClassId::ExternalString
));
declare_object_type!(ExternalString, |cid| cid == ClassId::ExternalString);
declare_object_type!(List, |cid| cid == ClassId::Array);
declare_object_type!(Error, |cid| cid == ClassId::ApiError);
