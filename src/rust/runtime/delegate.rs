// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Delegate operations: run a closure on the core that owns some data, and get the result back. Replies ride the
//! aggregator like any other message, so they go out on the next flush, timeout or idle period.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    completion::CompletionEvent,
    context::{
        mycore,
        send_message,
    },
    full_empty::FullEmpty,
    gaddr::GlobalAddress,
    Core,
};
use ::std::rc::Rc;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Runs `f` on `destination` and returns what it returned. The calling Worker is suspended until the reply comes
/// back. A call to the calling core runs `f` right away.
pub async fn call<F, R>(destination: Core, f: F) -> R
where
    F: FnOnce() -> R + Copy + Send + 'static,
    R: Copy + Send + 'static,
{
    if destination == mycore() {
        return f();
    }
    let result: Rc<FullEmpty<R>> = Rc::new(FullEmpty::new());
    let reply_to: GlobalAddress<FullEmpty<R>> = lend(&result);
    trace!("call(): core {} -> core {}", reply_to.core(), destination);
    send_message(destination, move || {
        let value: R = f();
        send_message(reply_to.core(), move || {
            // Safety: lent above, and taken back once.
            let result: Rc<FullEmpty<R>> = unsafe { reclaim(reply_to) };
            result.write_xf(value);
        });
    });
    result.read_ff().await
}

/// Runs `f` on `destination` without waiting for it. `done` is enrolled right away and completed once `f` has run,
/// so a caller may issue many calls and wait for all of them at once.
pub fn call_async<F>(done: &Rc<CompletionEvent>, destination: Core, f: F)
where
    F: FnOnce() + Copy + Send + 'static,
{
    done.enroll(1);
    if destination == mycore() {
        f();
        done.complete(1);
        return;
    }
    let reply_to: GlobalAddress<CompletionEvent> = lend(done);
    send_message(destination, move || {
        f();
        send_message(reply_to.core(), move || {
            // Safety: lent above, and taken back once.
            let done: Rc<CompletionEvent> = unsafe { reclaim(reply_to) };
            done.complete(1);
        });
    });
}

/// Hands out a strong reference to `value` as an address on this core. The pointee stays alive until the address
/// is passed to [reclaim], even if the caller goes away in between.
fn lend<T>(value: &Rc<T>) -> GlobalAddress<T> {
    GlobalAddress::new(mycore(), Rc::into_raw(value.clone()))
}

/// Takes back the reference [lend] gave out. Doing so away from the lending core is a fatal error.
///
/// # Safety
///
/// `address` must come from [lend] and be reclaimed only once.
unsafe fn reclaim<T>(address: GlobalAddress<T>) -> Rc<T> {
    let mycore: Core = mycore();
    assert!(
        address.core() == mycore,
        "reclaim(): address of core {} reclaimed on core {}",
        address.core(),
        mycore
    );
    Rc::from_raw(address.as_ptr())
}
