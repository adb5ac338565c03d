pub mod asm;
pub mod console;
pub mod device;
pub mod engine;
pub mod kernel;
pub mod keyboard;
pub mod machine;
pub mod memory;
pub mod proc;
pub mod sched;
pub mod sem;
pub mod syscall;
pub mod trap;
pub mod wait_queue;
pub mod x86;
