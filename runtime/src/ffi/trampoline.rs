// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! C-ABI trampolines for registered callbacks.
//!
//! The C ABI has no closures, so a callback cannot be handed out as a bare
//! function pointer directly. Instead a fixed set of statically-compiled
//! forwarding functions each read a dedicated process-wide slot binding
//! them to `(registry, callback id)` and dispatch at call time. The slot
//! table is shared by every registry in the process; whoever acquires a
//! slot releases it. A slot holds its registry alive, so a trampoline can
//! never call into a freed registry.

use std::sync::Arc;

use keel_exec::sync::Mutex;

use crate::ffi::callback::{CallbackId, CallbackRegistry};
use crate::ffi::value::FfiValue;

/// Number of process-wide trampoline slots.
pub const MAX_TRAMPOLINES: usize = 8;

/// The shape native callers receive.
pub type TrampolineFn = extern "C" fn(i64) -> i64;

struct TrampolineSlot {
    binding: Option<(Arc<CallbackRegistry>, CallbackId)>,
}

static SLOTS: [Mutex<TrampolineSlot>; MAX_TRAMPOLINES] =
    [const { Mutex::new(TrampolineSlot { binding: None }) }; MAX_TRAMPOLINES];

fn invoke_slot(index: usize, argument: i64) -> i64 {
    let slot = SLOTS[index].lock();
    let Some((registry, id)) = slot.binding.as_ref() else {
        // Unbound slots answer zero rather than faulting; a native caller
        // may race a release.
        return 0;
    };

    registry
        .invoke_i64(*id, &[FfiValue::I64(argument)])
        .unwrap_or(0)
}

extern "C" fn trampoline_0(argument: i64) -> i64 {
    invoke_slot(0, argument)
}
extern "C" fn trampoline_1(argument: i64) -> i64 {
    invoke_slot(1, argument)
}
extern "C" fn trampoline_2(argument: i64) -> i64 {
    invoke_slot(2, argument)
}
extern "C" fn trampoline_3(argument: i64) -> i64 {
    invoke_slot(3, argument)
}
extern "C" fn trampoline_4(argument: i64) -> i64 {
    invoke_slot(4, argument)
}
extern "C" fn trampoline_5(argument: i64) -> i64 {
    invoke_slot(5, argument)
}
extern "C" fn trampoline_6(argument: i64) -> i64 {
    invoke_slot(6, argument)
}
extern "C" fn trampoline_7(argument: i64) -> i64 {
    invoke_slot(7, argument)
}

const TRAMPOLINES: [TrampolineFn; MAX_TRAMPOLINES] = [
    trampoline_0,
    trampoline_1,
    trampoline_2,
    trampoline_3,
    trampoline_4,
    trampoline_5,
    trampoline_6,
    trampoline_7,
];

/// Binds a free slot to `(registry, id)` and returns its raw C-ABI
/// function pointer. `None` for unknown ids or when all slots are in use.
/// Acquiring the same id twice hands out a second, independent slot.
#[must_use]
pub fn acquire_trampoline(
    registry: &Arc<CallbackRegistry>,
    id: CallbackId,
) -> Option<TrampolineFn> {
    if !registry.is_registered(id) {
        return None;
    }

    for (index, slot) in SLOTS.iter().enumerate() {
        let mut slot = slot.lock();
        if slot.binding.is_none() {
            slot.binding = Some((Arc::clone(registry), id));
            tracing::trace!(index, id = id.as_u64(), "trampoline bound");
            return Some(TRAMPOLINES[index]);
        }
    }

    None
}

/// Frees the slot behind `trampoline`; false for pointers that are not
/// trampolines of this table.
pub fn release_trampoline(trampoline: TrampolineFn) -> bool {
    for (index, slot) in SLOTS.iter().enumerate() {
        if core::ptr::fn_addr_eq(TRAMPOLINES[index], trampoline) {
            slot.lock().binding = None;
            tracing::trace!(index, "trampoline released");
            return true;
        }
    }

    false
}
