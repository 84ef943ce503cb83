//! Uses the process-wide heap, backed by the real program break and real
//! mappings, the way a C program would use `malloc`.

use brkalloc::global;

fn main() {
    unsafe {
        let mut ptr = global::allocate(8);
        println!("Allocated 8 bytes at {ptr:?}");

        // Expand the last block step by step.
        for size in [16, 64, 256, 1024, 4096, 200_000] {
            ptr = global::resize(ptr, size);
            std::ptr::write_bytes(ptr, 0xAA, size);
            println!("Resized to {size} bytes at {ptr:?}");
        }

        let zeroed = global::zero_allocate(10, 8);
        println!("Zero-allocated 80 bytes at {zeroed:?}: {:?}", std::slice::from_raw_parts(zeroed, 8));

        assert!(global::resize(ptr, 0).is_null());
        global::release(zeroed);
    }
}
