use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pmos_core::asm::asm::{Assembler, assemble};
use pmos_core::console::console::TextScreen;
use pmos_core::engine::engine::Engine;
use pmos_core::kernel::kernel::{HeadlessKernel, KernelConfig};
use pmos_core::keyboard::keyboard::ScancodeKeyboard;
use pmos_core::machine::machine::Machine;
use pmos_core::proc::proc::ProcState;

type TestMachine = Machine<TextScreen, ScancodeKeyboard, StdRng>;

fn boot(programs: &[&str], seed: u64) -> TestMachine {
    let config = KernelConfig {
        proc_mem_size: 0x1000,
        time_quantum: 2,
        ..KernelConfig::default()
    };
    let mut kernel = HeadlessKernel::headless(config).unwrap();
    for source in programs {
        kernel.load_program(&assemble(source).unwrap()).unwrap();
    }
    Machine::with_engine(kernel, Engine::with_rng(StdRng::seed_from_u64(seed)), 20)
}

const HELLO: &str = "
        mov eax, 0      ; write
        mov ecx, 0      ; stdout
        mov edx, msg
        mov ebx, 6
        int 0x80
        mov eax, 5      ; exit
        int 0x80
msg:    .ascii \"hello\\n\"
";

#[test]
fn hello_then_exit() {
    let mut machine = boot(&[HELLO], 1);
    let cycles = machine.run(10_000).unwrap();
    assert!(cycles < 10_000);
    assert!(machine.is_finished());
    assert!(machine.is_idle());
    assert_eq!(machine.kernel.screen().dump(), "hello");
    assert_eq!(machine.kernel.console().row, 1);
    assert_eq!(machine.kernel.proc(1).unwrap().state, ProcState::Dead);
}

#[test]
fn forked_child_sees_zero() {
    let program = "
        mov eax, 2          ; fork
        int 0x80
        cmp eax, 0
        je child
        mov edx, parent_msg
        jmp print
child:  mov edx, child_msg
print:  mov eax, 0
        mov ecx, 0
        mov ebx, 1
        int 0x80
        mov eax, 5
        int 0x80
parent_msg: .ascii \"P\"
child_msg:  .ascii \"C\"
";
    let mut machine = boot(&[program], 1);
    machine.run(10_000).unwrap();
    assert!(machine.is_finished());
    assert_eq!(machine.kernel.screen().row_text(0), "PC");
}

#[test]
fn blocked_read_restarts_after_keypress() {
    let program = "
        mov eax, 1          ; read(stdin, buf, 16)
        mov ecx, 1
        mov edx, buf
        mov ebx, 16
        int 0x80
        mov ebx, eax        ; write(stdout, buf, count)
        mov eax, 0
        mov ecx, 0
        mov edx, buf
        int 0x80
        mov eax, 5
        int 0x80
buf:    .space 16
";
    let mut machine = boot(&[program], 1);
    let blocked = machine
        .run_until(10_000, |k| k.proc(1).unwrap().state == ProcState::Blocked)
        .unwrap();
    assert!(blocked);
    assert!(machine.is_idle());
    assert!(machine.is_stalled());

    let count = machine.kernel.keyboard_mut().type_str("ok");
    machine.raise_keyboard(count);
    assert!(!machine.is_stalled());
    machine.run(10_000).unwrap();

    assert!(machine.is_finished());
    assert_eq!(machine.kernel.screen().row_text(0), "okok");
    assert!(machine.kernel.key_buffer().is_empty());
}

#[test]
fn user_hlt_halts_the_kernel() {
    let mut machine = boot(&["nop\n hlt"], 1);
    assert!(machine.run(10_000).is_err());
    assert!(machine.kernel.is_halted());
    assert!(machine.step().is_err());
}

#[test]
fn sleep_waits_for_timer_ticks() {
    let program = "
        mov eax, 4          ; sleep(5)
        mov ecx, 5
        int 0x80
        mov eax, 0
        mov ecx, 0
        mov edx, msg
        mov ebx, 1
        int 0x80
        mov eax, 5
        int 0x80
msg:    .ascii \"z\"
";
    let mut machine = boot(&[program], 1);
    machine.run(10_000).unwrap();
    assert!(machine.is_finished());
    assert!(machine.ticks() >= 5);
    assert_eq!(machine.kernel.screen().row_text(0), "z");
}

#[test]
fn busy_processes_share_the_cpu() {
    let spin = "spin: inc esi\n jmp spin";
    let mut machine = boot(&[spin, spin], 1);
    assert_eq!(machine.run(2_000).unwrap(), 2_000);
    assert!(!machine.is_finished());
    assert!(machine.ticks() > 10);

    let a = machine.kernel.proc(1).unwrap().regs.esi;
    let b = machine.kernel.proc(2).unwrap().regs.esi;
    assert!(a > 0 && b > 0, "a = {a}, b = {b}");
}

#[test]
fn rdrand_draws_from_the_engine_rng() {
    let program = "
        rdrand eax
        mov ebx, out
        mov [ebx], eax
        mov eax, 5
        int 0x80
out:    .long 0
";
    let mut asm = Assembler::new();
    asm.assemble(program).unwrap();
    let out = asm.symbol("out").unwrap();

    let mut machine = boot(&[program], 42);
    machine.run(1_000).unwrap();

    let expected: u32 = StdRng::seed_from_u64(42).random();
    let stored = machine.kernel.read_user(1, out, 4).unwrap();
    assert_eq!(stored, expected.to_le_bytes().to_vec());
}
