use brkalloc::{MemAlloc, SimulatedKernel};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn print_arena(allocator: &MemAlloc<SimulatedKernel>) {
    for block in allocator.blocks() {
        println!("  {:#x} {:>7} bytes {:?}", block.addr, block.size, block.status);
    }
}

fn main() {
    let mut allocator = MemAlloc::with_platform(SimulatedKernel::new(1 << 20));

    unsafe {
        let addr1 = allocator.allocate(8);
        log_alloc(addr1, 8);

        let addr2 = allocator.allocate(13);
        log_alloc(addr2, 13);

        let addr3 = allocator.allocate(16);
        log_alloc(addr3, 16);

        println!("Arena after three allocations:");
        print_arena(&allocator);

        allocator.release(addr1);
        allocator.release(addr2);

        // Both holes are merged before searching, so this lands on addr1.
        let addr4 = allocator.allocate(24);
        log_alloc(addr4, 24);
        println!("Reused the first block: {}", addr4 == addr1);

        let addr5 = allocator.resize(addr3, 200);
        println!("Resized {addr3:?} to 200 bytes at {addr5:?}");

        println!("Arena at the end:");
        print_arena(&allocator);

        allocator.release(addr4);
        allocator.release(addr5);
    }
}
