// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Foreign-function bridge: marshalling between tagged guest values and
//! native ABI slots, dynamic library handles, native calls over a closed
//! signature set, and guest callbacks exposed as C-ABI function pointers
//! through a fixed trampoline table.

pub mod call;
pub mod callback;
pub mod library;
pub mod trampoline;
pub mod types;
pub mod value;

pub use call::{FfiCallError, FfiSignature, MAX_ARGS, call_address, call_symbol};
pub use callback::{CallbackId, CallbackRegistry, MAX_CALLBACKS};
pub use library::{ForeignLibrary, LibraryError};
pub use trampoline::{MAX_TRAMPOLINES, TrampolineFn, acquire_trampoline, release_trampoline};
pub use types::ForeignType;
pub use value::FfiValue;
