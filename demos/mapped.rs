use brkalloc::{HEADER_SIZE, MemAlloc, SimulatedKernel, config::MMAP_THRESHOLD};

fn main() {
    let mut allocator = MemAlloc::with_platform(SimulatedKernel::new(1 << 20));

    unsafe {
        let small = allocator.allocate(MMAP_THRESHOLD - HEADER_SIZE - 8);
        println!(
            "{small:?}: heap is {} bytes, {} mappings",
            allocator.platform().heap_size(),
            allocator.platform().live_mappings()
        );

        let large = allocator.allocate(MMAP_THRESHOLD);
        println!(
            "{large:?}: heap is {} bytes, {} mappings",
            allocator.platform().heap_size(),
            allocator.platform().live_mappings()
        );

        // Zero-allocations are mapped from one page on.
        let zeroed = allocator.zero_allocate(1, SimulatedKernel::PAGE_SIZE);
        println!("{zeroed:?}: {} mappings", allocator.platform().live_mappings());

        println!("Deallocating the mappings");
        allocator.release(large);
        allocator.release(zeroed);
        println!("{} mappings left", allocator.platform().live_mappings());

        allocator.release(small);
    }
}
