use pmos_core::device::device::{STD_IN, STD_OUT};
use pmos_core::kernel::kernel::{HeadlessKernel, KernelConfig};
use pmos_core::proc::proc::{IDLE_PID, Pid, ProcState, frame_addr, stack_top_addr};
use pmos_core::syscall::syscall::SyscallNumber;
use pmos_core::x86::x86::{TrapFrame, Vector, ucode_desc, udata_desc, usel};

const SEG: usize = 0x1000;

fn make_kernel() -> HeadlessKernel {
    let config = KernelConfig {
        proc_mem_size: SEG,
        time_quantum: 4,
        ..KernelConfig::default()
    };
    HeadlessKernel::headless(config).unwrap()
}

fn trap(kernel: &mut HeadlessKernel, vector: Vector) -> TrapFrame {
    let mut frame = kernel.resume_frame();
    frame.irq = vector as u32;
    kernel.irq_handle(&mut frame).unwrap();
    frame
}

/// Issue `int 0x80` from the current process and return what it sees in eax.
fn syscall(kernel: &mut HeadlessKernel, nr: u32, ecx: u32, edx: u32, ebx: u32) -> i32 {
    let caller = kernel.current();
    let mut frame = kernel.resume_frame();
    frame.irq = Vector::Syscall as u32;
    frame.eax = nr;
    frame.ecx = ecx;
    frame.edx = edx;
    frame.ebx = ebx;
    kernel.irq_handle(&mut frame).unwrap();
    kernel.proc(caller).unwrap().regs.return_value()
}

fn run_pid(kernel: &mut HeadlessKernel, pid: Pid) {
    for _ in 0..64 {
        if kernel.current() == pid {
            return;
        }
        trap(kernel, Vector::Timer);
    }
    panic!("pid {pid} never scheduled");
}

fn press(kernel: &mut HeadlessKernel, text: &str) {
    let count = kernel.keyboard_mut().type_str(text);
    for _ in 0..count {
        trap(kernel, Vector::Keyboard);
    }
}

#[test]
fn sys_write_renders_to_screen() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    kernel.write_user(pid, 0x100, b"hello\nworld").unwrap();
    run_pid(&mut kernel, pid);

    let ret = syscall(&mut kernel, SyscallNumber::Write as u32, STD_OUT as u32, 0x100, 11);
    assert_eq!(ret, 11);
    assert_eq!(kernel.screen().row_text(0), "hello");
    assert_eq!(kernel.screen().row_text(1), "world");
    assert_eq!(kernel.screen().cursor(), (1, 5));
    assert_eq!(kernel.current(), pid);
}

#[test]
fn sys_write_rejects_bad_fd_and_buffer() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, pid);

    assert_eq!(syscall(&mut kernel, 0, 7, 0, 1), -1);
    assert_eq!(syscall(&mut kernel, 0, STD_OUT as u32, (SEG - 0x10) as u32, 0x20), -1);
    assert_eq!(kernel.screen().row_text(0), "");
}

#[test]
fn sys_read_blocks_then_restarts() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, pid);
    // pretend the trapping `int 0x80` sits at 0x10
    kernel.proc_mut(pid).unwrap().regs.eip = 0x12;

    let ret = syscall(&mut kernel, SyscallNumber::Read as u32, STD_IN as u32, 0x200, 10);
    assert_eq!(ret, 0);
    assert_eq!(kernel.proc(pid).unwrap().state, ProcState::Blocked);
    assert_eq!(kernel.proc(pid).unwrap().sleep_time, None);
    assert_eq!(kernel.device(STD_IN).unwrap().value, -1);
    assert_eq!(kernel.current(), IDLE_PID);

    press(&mut kernel, "h");
    let pcb = kernel.proc(pid).unwrap();
    assert_ne!(pcb.state, ProcState::Blocked);
    assert_eq!(pcb.regs.eip, 0x10);
    assert_eq!(pcb.regs.eax, SyscallNumber::Read as u32);
    assert_eq!(kernel.device(STD_IN).unwrap().value, 1);
    // idle gives way to the woken reader at once
    assert_eq!(kernel.current(), pid);

    press(&mut kernel, "i");
    let ret = syscall(&mut kernel, SyscallNumber::Read as u32, STD_IN as u32, 0x200, 10);
    assert_eq!(ret, 2);
    assert_eq!(kernel.read_user(pid, 0x200, 3).unwrap(), b"hi\0".to_vec());
    assert_eq!(kernel.device(STD_IN).unwrap().value, 0);
    assert!(kernel.key_buffer().is_empty());
    // keystrokes are echoed
    assert_eq!(kernel.screen().row_text(0), "hi");
}

#[test]
fn sys_read_copies_at_most_len_minus_one() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, pid);

    press(&mut kernel, "abcdef");
    assert_eq!(kernel.device(STD_IN).unwrap().value, 1);

    let ret = syscall(&mut kernel, 1, STD_IN as u32, 0x40, 4);
    assert_eq!(ret, 3);
    assert_eq!(kernel.read_user(pid, 0x40, 4).unwrap(), b"abc\0".to_vec());
    // leftovers stay available
    assert_eq!(kernel.device(STD_IN).unwrap().value, 1);

    let ret = syscall(&mut kernel, 1, STD_IN as u32, 0x40, 16);
    assert_eq!(ret, 3);
    assert_eq!(kernel.read_user(pid, 0x40, 4).unwrap(), b"def\0".to_vec());
    assert_eq!(kernel.device(STD_IN).unwrap().value, 0);
}

#[test]
fn sys_read_second_reader_is_rejected() {
    let mut kernel = make_kernel();
    let a = kernel.load_program(&[0x90]).unwrap();
    let b = kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, a);

    assert_eq!(syscall(&mut kernel, 1, STD_IN as u32, 0x100, 8), 0);
    assert_eq!(kernel.current(), b);

    assert_eq!(syscall(&mut kernel, 1, STD_IN as u32, 0x100, 8), -1);
    assert_eq!(kernel.proc(b).unwrap().state, ProcState::Running);
    assert_eq!(kernel.current(), b);
    let dev = kernel.device(STD_IN).unwrap();
    assert_eq!(dev.value, -1);
    assert_eq!(dev.waiters(kernel.procs()), vec![a]);
}

#[test]
fn sys_read_backspace_withdraws_input() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, pid);

    press(&mut kernel, "ab\u{8}");
    assert_eq!(kernel.key_buffer().contents(), b"a".to_vec());
    assert_eq!(kernel.screen().row_text(0), "a");

    press(&mut kernel, "\u{8}");
    assert!(kernel.key_buffer().is_empty());
    assert_eq!(kernel.device(STD_IN).unwrap().value, 0);

    press(&mut kernel, "x\n");
    assert_eq!(kernel.key_buffer().contents(), b"x\n".to_vec());
    assert_eq!(kernel.console().row, 1);
}

#[test]
fn backspace_leaves_program_output_and_unread_keys() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    kernel.write_user(pid, 0x100, b"> ").unwrap();
    run_pid(&mut kernel, pid);

    press(&mut kernel, "a");
    assert_eq!(syscall(&mut kernel, SyscallNumber::Write as u32, STD_OUT as u32, 0x100, 2), 2);
    assert_eq!(kernel.screen().row_text(0), "a>");

    press(&mut kernel, "\u{8}");
    assert_eq!(kernel.screen().row_text(0), "a>");
    assert_eq!(kernel.screen().cursor(), (0, 3));
    assert_eq!(kernel.key_buffer().contents(), b"a".to_vec());
    assert_eq!(kernel.device(STD_IN).unwrap().value, 1);

    // keys typed after the output can still be taken back
    press(&mut kernel, "bc\u{8}");
    assert_eq!(kernel.screen().row_text(0), "a> b");
    assert_eq!(kernel.key_buffer().contents(), b"ab".to_vec());
}

#[test]
fn sys_fork_full_table_fails() {
    let mut kernel = make_kernel();
    let first = kernel.load_program(&[0x90]).unwrap();
    for _ in 1..kernel.config().max_pcb - 1 {
        kernel.load_program(&[0x90]).unwrap();
    }
    run_pid(&mut kernel, first);

    let live = kernel.procs().count(ProcState::Dead);
    assert_eq!(live, 0);
    assert_eq!(syscall(&mut kernel, SyscallNumber::Fork as u32, 0, 0, 0), -1);
    assert_eq!(kernel.procs().count(ProcState::Dead), 0);
    assert_eq!(kernel.current(), first);
}

#[test]
fn sys_fork_duplicates_parent() {
    let mut kernel = make_kernel();
    let parent = kernel.load_program(b"\x90\x90program text").unwrap();
    kernel.write_user(parent, 0x800, b"heap bytes").unwrap();
    run_pid(&mut kernel, parent);
    kernel.proc_mut(parent).unwrap().regs.esi = 0xfeed;

    let child = syscall(&mut kernel, SyscallNumber::Fork as u32, 0, 0, 0);
    assert_eq!(child, 2);
    let child = child as Pid;

    let mem = kernel.mem();
    assert_eq!(mem.segment(parent).unwrap(), mem.segment(child).unwrap());

    let pcb = kernel.proc(child).unwrap();
    assert_eq!(pcb.state, ProcState::Runnable);
    assert_eq!(pcb.regs.return_value(), 0);
    assert_eq!(pcb.regs.esi, 0xfeed);
    assert_eq!(pcb.regs.cs, usel(ucode_desc(child)));
    assert_eq!(pcb.regs.ds, usel(udata_desc(child)));
    assert_eq!(pcb.regs.ss, usel(udata_desc(child)));
    assert_eq!(pcb.stack_top, frame_addr(child));
    assert_eq!(pcb.prev_stack_top, stack_top_addr(child));
    assert_eq!(kernel.current(), parent);

    // writes after the fork stay private
    kernel.write_user(parent, 0x800, b"HEAP").unwrap();
    assert_eq!(kernel.read_user(child, 0x800, 4).unwrap(), b"heap".to_vec());
}

#[test]
fn sys_sleep_zero_is_a_no_op() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, pid);

    assert_eq!(syscall(&mut kernel, SyscallNumber::Sleep as u32, 0, 0, 0), 0);
    assert_eq!(kernel.current(), pid);
    assert_eq!(kernel.proc(pid).unwrap().state, ProcState::Running);
}

#[test]
fn sys_sleep_blocks_for_ticks() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, pid);

    assert_eq!(syscall(&mut kernel, SyscallNumber::Sleep as u32, 3, 0, 0), 0);
    assert_eq!(kernel.proc(pid).unwrap().state, ProcState::Blocked);
    assert_eq!(kernel.proc(pid).unwrap().sleep_time, Some(3));
    assert_eq!(kernel.current(), IDLE_PID);

    trap(&mut kernel, Vector::Timer);
    trap(&mut kernel, Vector::Timer);
    assert_eq!(kernel.proc(pid).unwrap().sleep_time, Some(1));
    assert_eq!(kernel.current(), IDLE_PID);

    trap(&mut kernel, Vector::Timer);
    assert_eq!(kernel.current(), pid);
    assert_eq!(kernel.proc(pid).unwrap().sleep_time, None);
}

#[test]
fn sys_exit_frees_the_slot() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, pid);

    syscall(&mut kernel, SyscallNumber::Exit as u32, 0, 0, 0);
    assert_eq!(kernel.proc(pid).unwrap().state, ProcState::Dead);
    assert_eq!(kernel.current(), IDLE_PID);
    assert!(!kernel.has_live_processes());

    // a dead process is never picked again
    for _ in 0..8 {
        trap(&mut kernel, Vector::Timer);
        assert_eq!(kernel.current(), IDLE_PID);
    }
    assert_eq!(kernel.load_program(&[0x90]).unwrap(), pid);
}

#[test]
fn sys_exec_leaves_the_caller_untouched() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, pid);

    let before = kernel.proc(pid).unwrap().regs;
    // eax still holds the syscall number on return
    assert_eq!(syscall(&mut kernel, SyscallNumber::Exec as u32, 7, 8, 9), SyscallNumber::Exec as i32);
    let after = kernel.proc(pid).unwrap().regs;
    assert_eq!((after.ecx, after.edx, after.ebx), (7, 8, 9));
    assert_eq!(after.eip, before.eip);
    assert_eq!(kernel.current(), pid);
    assert_eq!(kernel.proc(pid).unwrap().state, ProcState::Running);
}

#[test]
fn sys_unknown_numbers_fail() {
    let mut kernel = make_kernel();
    let pid = kernel.load_program(&[0x90]).unwrap();
    run_pid(&mut kernel, pid);

    assert_eq!(syscall(&mut kernel, 42, 0, 0, 0), -1);
    assert_eq!(syscall(&mut kernel, 0x20, 0, 0, 0), -1);
    assert_eq!(kernel.current(), pid);
}
