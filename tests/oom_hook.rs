// Allocation failure routing. Lives in its own test binary because the
// hook is process-wide.
use kvcore::{set_oom_handler, Allocator};
use std::panic;

fn hook(size: usize) -> ! {
    panic!("oom hook: {size}");
}

// Test: failed allocation.
// Assumes: a request of usize::MAX bytes can never be satisfied.
// Verifies: the installed hook receives the requested size, and nothing is
// recorded against the allocator.
#[test]
fn failed_allocation_reaches_installed_hook() {
    set_oom_handler(hook);
    let alloc = Allocator::isolated();
    let res = panic::catch_unwind(|| {
        let a = Allocator::isolated();
        a.alloc(usize::MAX).len()
    });
    let payload = res.expect_err("allocation must not succeed");
    let msg = payload.downcast_ref::<String>().cloned().unwrap_or_default();
    assert_eq!(msg, format!("oom hook: {}", usize::MAX));

    // Normal allocations are unaffected.
    let block = alloc.alloc(64);
    assert_eq!(alloc.used_memory(), 64);
    alloc.free(block);
    assert_eq!(alloc.used_memory(), 0);
}
