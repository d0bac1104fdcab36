// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Native call dispatch.
//!
//! Without a general libffi-style backend, calls are matched against a
//! closed set of signatures and dispatched through correspondingly-typed
//! `extern "C"` function pointers:
//!
//! ```text
//! () → i64     (i64) → i64     (i64, i64) → i64
//! (ptr, i64) → i64              (f64, f64) → f64
//! ```
//!
//! Anything else reports `UnsupportedSignature`.

use core::ffi::c_void;
use core::mem;

use arrayvec::ArrayVec;

use crate::ffi::library::ForeignLibrary;
use crate::ffi::types::ForeignType;
use crate::ffi::value::FfiValue;

/// Maximum arguments a signature can carry.
pub const MAX_ARGS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, onlyerror::Error)]
pub enum FfiCallError {
    /// Null address, oversized signature, or arity mismatch.
    InvalidArgument,
    /// The signature is outside the supported dispatch set.
    UnsupportedSignature,
    /// The symbol was not found in the library.
    SymbolNotFound,
}

/// Return kind plus up to [`MAX_ARGS`] argument kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfiSignature {
    return_type: ForeignType,
    argument_types: ArrayVec<ForeignType, MAX_ARGS>,
}

impl Default for FfiSignature {
    fn default() -> Self {
        Self::new(ForeignType::Void)
    }
}

impl FfiSignature {
    #[must_use]
    pub fn new(return_type: ForeignType) -> Self {
        Self {
            return_type,
            argument_types: ArrayVec::new(),
        }
    }

    /// Appends an argument kind; false once the signature is full.
    pub fn push_arg(&mut self, argument: ForeignType) -> bool {
        if self.argument_types.is_full() {
            return false;
        }

        self.argument_types.push(argument);
        true
    }

    #[must_use]
    pub fn return_type(&self) -> ForeignType {
        self.return_type
    }

    #[must_use]
    pub fn argument_types(&self) -> &[ForeignType] {
        &self.argument_types
    }

    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.argument_types.len()
    }
}

/// Calls the native function at `address` with `signature` and `args`.
///
/// # Errors
///
/// [`FfiCallError::InvalidArgument`] for a null address or an argument
/// list that does not match the signature's arity;
/// [`FfiCallError::UnsupportedSignature`] outside the fallback set.
pub fn call_address(
    address: *const c_void,
    signature: &FfiSignature,
    args: &[FfiValue],
) -> Result<FfiValue, FfiCallError> {
    if address.is_null() || args.len() != signature.argument_count() {
        return Err(FfiCallError::InvalidArgument);
    }

    match (signature.return_type(), signature.argument_types()) {
        (ForeignType::I64, []) => {
            // Safety: the caller vouches that `address` is a live function
            // with exactly this C ABI signature.
            let result = unsafe {
                let function: unsafe extern "C" fn() -> i64 = mem::transmute(address);
                function()
            };
            Ok(FfiValue::I64(result))
        }
        (ForeignType::I64, [ForeignType::I64]) => {
            // Safety: the caller vouches that `address` is a live function
            // with exactly this C ABI signature.
            let result = unsafe {
                let function: unsafe extern "C" fn(i64) -> i64 = mem::transmute(address);
                function(args[0].as_i64())
            };
            Ok(FfiValue::I64(result))
        }
        (ForeignType::I64, [ForeignType::I64, ForeignType::I64]) => {
            // Safety: the caller vouches that `address` is a live function
            // with exactly this C ABI signature.
            let result = unsafe {
                let function: unsafe extern "C" fn(i64, i64) -> i64 = mem::transmute(address);
                function(args[0].as_i64(), args[1].as_i64())
            };
            Ok(FfiValue::I64(result))
        }
        (ForeignType::I64, [ForeignType::Pointer, ForeignType::I64]) => {
            // Safety: the caller vouches that `address` is a live function
            // with exactly this C ABI signature.
            let result = unsafe {
                let function: unsafe extern "C" fn(*mut c_void, i64) -> i64 =
                    mem::transmute(address);
                function(args[0].as_pointer(), args[1].as_i64())
            };
            Ok(FfiValue::I64(result))
        }
        (ForeignType::F64, [ForeignType::F64, ForeignType::F64]) => {
            // Safety: the caller vouches that `address` is a live function
            // with exactly this C ABI signature.
            let result = unsafe {
                let function: unsafe extern "C" fn(f64, f64) -> f64 = mem::transmute(address);
                function(args[0].as_f64(), args[1].as_f64())
            };
            Ok(FfiValue::F64(result))
        }
        _ => Err(FfiCallError::UnsupportedSignature),
    }
}

/// Resolves `name` in `library` and calls it.
///
/// # Errors
///
/// [`FfiCallError::SymbolNotFound`] when resolution fails, otherwise as
/// [`call_address`].
pub fn call_symbol(
    library: &ForeignLibrary,
    name: &str,
    signature: &FfiSignature,
    args: &[FfiValue],
) -> Result<FfiValue, FfiCallError> {
    let address = library.symbol(name).ok_or(FfiCallError::SymbolNotFound)?;
    call_address(address, signature, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr;

    extern "C" fn forty_two() -> i64 {
        42
    }

    extern "C" fn double_it(value: i64) -> i64 {
        value * 2
    }

    extern "C" fn add(a: i64, b: i64) -> i64 {
        a + b
    }

    extern "C" fn add_to_slot(slot: *mut c_void, value: i64) -> i64 {
        // Safety: the test passes a valid i64 slot.
        unsafe { *slot.cast::<i64>() + value }
    }

    extern "C" fn multiply(a: f64, b: f64) -> f64 {
        a * b
    }

    fn addr<T>(function: T) -> *const c_void {
        assert_eq!(mem::size_of::<T>(), mem::size_of::<usize>());
        // Safety: `T` is a fn pointer (asserted pointer-sized above);
        // this smuggles it through the void-pointer door the dispatcher
        // expects.
        let address: usize = unsafe { mem::transmute_copy(&function) };
        address as *const c_void
    }

    #[test]
    fn nullary_i64() {
        let signature = FfiSignature::new(ForeignType::I64);
        let result = call_address(addr(forty_two as extern "C" fn() -> i64), &signature, &[]);
        assert_eq!(result, Ok(FfiValue::I64(42)));
    }

    #[test]
    fn unary_i64() {
        let mut signature = FfiSignature::new(ForeignType::I64);
        signature.push_arg(ForeignType::I64);

        let result = call_address(
            addr(double_it as extern "C" fn(i64) -> i64),
            &signature,
            &[FfiValue::I64(21)],
        );
        assert_eq!(result, Ok(FfiValue::I64(42)));
    }

    #[test]
    fn binary_i64() {
        let mut signature = FfiSignature::new(ForeignType::I64);
        signature.push_arg(ForeignType::I64);
        signature.push_arg(ForeignType::I64);

        let result = call_address(
            addr(add as extern "C" fn(i64, i64) -> i64),
            &signature,
            &[FfiValue::I64(40), FfiValue::I64(2)],
        );
        assert_eq!(result, Ok(FfiValue::I64(42)));
    }

    #[test]
    fn pointer_i64() {
        let mut slot: i64 = 40;
        let mut signature = FfiSignature::new(ForeignType::I64);
        signature.push_arg(ForeignType::Pointer);
        signature.push_arg(ForeignType::I64);

        let result = call_address(
            addr(add_to_slot as extern "C" fn(*mut c_void, i64) -> i64),
            &signature,
            &[
                FfiValue::Pointer(core::ptr::from_mut(&mut slot).cast()),
                FfiValue::I64(2),
            ],
        );
        assert_eq!(result, Ok(FfiValue::I64(42)));
    }

    #[test]
    fn binary_f64() {
        let mut signature = FfiSignature::new(ForeignType::F64);
        signature.push_arg(ForeignType::F64);
        signature.push_arg(ForeignType::F64);

        let result = call_address(
            addr(multiply as extern "C" fn(f64, f64) -> f64),
            &signature,
            &[FfiValue::F64(6.0), FfiValue::F64(7.0)],
        );
        assert_eq!(result, Ok(FfiValue::F64(42.0)));
    }

    #[test]
    fn null_address_is_invalid() {
        let signature = FfiSignature::new(ForeignType::I64);
        assert_eq!(
            call_address(ptr::null(), &signature, &[]),
            Err(FfiCallError::InvalidArgument)
        );
    }

    #[test]
    fn arity_mismatch_is_invalid() {
        let mut signature = FfiSignature::new(ForeignType::I64);
        signature.push_arg(ForeignType::I64);

        assert_eq!(
            call_address(addr(double_it as extern "C" fn(i64) -> i64), &signature, &[]),
            Err(FfiCallError::InvalidArgument)
        );
    }

    #[test]
    fn unsupported_signature_is_reported() {
        let mut signature = FfiSignature::new(ForeignType::F32);
        signature.push_arg(ForeignType::F32);

        assert_eq!(
            call_address(addr(forty_two as extern "C" fn() -> i64), &signature, &[FfiValue::F32(1.0)]),
            Err(FfiCallError::UnsupportedSignature)
        );
    }

    #[test]
    fn signature_caps_at_max_args() {
        let mut signature = FfiSignature::new(ForeignType::Void);
        for _ in 0..MAX_ARGS {
            assert!(signature.push_arg(ForeignType::I64));
        }
        assert!(!signature.push_arg(ForeignType::I64));
        assert_eq!(signature.argument_count(), MAX_ARGS);
    }
}
