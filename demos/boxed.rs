//! Installs the process-wide heap as the Rust global allocator. Everything
//! here runs on the main thread.

use brkalloc::global::BrkAlloc;

#[global_allocator]
static ALLOCATOR: BrkAlloc = BrkAlloc;

fn main() {
    let val_box = Box::new(22);
    println!("Box Value: {val_box}, At: {val_box:p}");

    let mut v = Vec::new();
    for i in 0..5 {
        v.push(i * 10);
        println!("Added {}; Capacity: {}; At: {:p}", v[i], v.capacity(), v.as_ptr());
    }

    let msg = String::from("Heap Testing");
    println!("String '{msg}' - At: {:p}", msg.as_ptr());

    // Two neighbours freed together are merged and reused as one block.
    let a = Box::new([0u8; 64]);
    let b = Box::new([0u8; 64]);
    let ptr_a = a.as_ptr();

    drop(a);
    drop(b);

    let c = Box::new([0u8; 128]);
    if ptr_a == c.as_ptr() {
        println!("Correctly reused at {:p}", c.as_ptr());
    } else {
        println!("A was at {ptr_a:p} and C is at {:p}", c.as_ptr());
    }
}
