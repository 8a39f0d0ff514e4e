#![no_main]
use libfuzzer_sys::fuzz_target;
use poolalloc_core::{Budgeted, PoolAllocator, PoolConfig, SystemPlatform};

fuzz_target!(|data: &[u8]| {
    // Each 4-byte chunk is one op: [opcode, size lo, size hi, slot].
    if data.len() < 4 {
        return;
    }

    // A budget keeps exhaustion paths reachable.
    let platform = Budgeted::new(SystemPlatform, 1 << 20);
    let Ok(mut pool) = PoolAllocator::with_platform(platform, PoolConfig::default()) else {
        return;
    };
    let mut live: Vec<Option<(std::ptr::NonNull<u8>, usize, u8)>> = vec![None; 16];

    for chunk in data.chunks_exact(4) {
        let op = chunk[0] % 3;
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize % 4096;
        let slot = chunk[3] as usize % live.len();
        let tag = chunk[0];

        match (op, live[slot].take()) {
            (0, None) => {
                if let Ok(ptr) = pool.allocate(size) {
                    // SAFETY: ptr is live with `size` bytes.
                    unsafe { ptr.as_ptr().write_bytes(tag, size) };
                    live[slot] = Some((ptr, size, tag));
                }
            }
            (1, Some((ptr, old, old_tag))) => {
                // SAFETY: ptr is live with size `old`.
                match unsafe { pool.reallocate(ptr, old, size) } {
                    Ok(out) => {
                        // SAFETY: out holds the preserved prefix.
                        let kept = unsafe { std::slice::from_raw_parts(out.as_ptr(), old.min(size)) };
                        assert!(kept.iter().all(|&b| b == old_tag));
                        // SAFETY: out is live with `size` bytes.
                        unsafe { out.as_ptr().write_bytes(tag, size) };
                        live[slot] = Some((out, size, tag));
                    }
                    Err(_) => live[slot] = Some((ptr, old, old_tag)),
                }
            }
            (_, Some((ptr, old, old_tag))) => {
                // SAFETY: ptr is live with size `old`.
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), old) };
                assert!(bytes.iter().all(|&b| b == old_tag));
                // SAFETY: ptr is live with size `old`.
                unsafe { pool.deallocate(ptr, old) };
            }
            (_, None) => {}
        }
    }

    for (ptr, size, _) in live.into_iter().flatten() {
        // SAFETY: every remaining block is live with its recorded size.
        unsafe { pool.deallocate(ptr, size) };
    }
    let arena = pool.arena_stats();
    assert_eq!(arena.carved + arena.remaining, arena.granted + arena.reclaimed);
});
