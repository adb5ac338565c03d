pub mod engine {
    use std::io::{Error, ErrorKind};

    use rand::Rng;
    use rand::rngs::ThreadRng;

    use crate::memory::memory::PhysicalMemory;
    use crate::x86::x86::{DPL_USER, EFlags, Gdt, TrapFrame, Vector};

    /// Opcodes of the user ISA. Register operands use the x86 numbering
    /// (eax ecx edx ebx esp ebp esi edi). Two-register forms carry a byte
    /// `rr` with the destination in the high nibble and the source in the
    /// low nibble; the `0x81` group carries `op << 4 | reg`.
    ///
    /// ```text
    /// 90            nop
    /// b8+r imm32    mov r, imm
    /// 89 rr         mov dst, src
    /// 8b rr         mov dst, [src]       dword load through ds
    /// 87 rr         mov [dst], src       dword store through ds
    /// 8a rr         movb dst, [src]      byte load, zero-extended
    /// 88 rr         movb [dst], src
    /// 01/29/39 rr   add/sub/cmp dst, src
    /// 21/09/31 rr   and/or/xor dst, src
    /// 81 or imm32   alu dst, imm         op: 0 add 1 or 4 and 5 sub 6 xor 7 cmp
    /// 40+r / 48+r   inc r / dec r
    /// 50+r / 58+r   push r / pop r       through ss
    /// e8 rel32      call
    /// c3            ret
    /// e9 rel32      jmp
    /// 0f 8x rel32   je 84, jne 85, jl 8c, jge 8d, jle 8e, jg 8f
    /// 0f c7 f0+r    rdrand r
    /// cd ib         int ib
    /// f4 / fa / fb  hlt / cli / sti      privileged
    /// ```
    pub mod opcode {
        pub const NOP: u8 = 0x90;
        pub const MOV_IMM: u8 = 0xb8;
        pub const MOV: u8 = 0x89;
        pub const LOAD: u8 = 0x8b;
        pub const STORE: u8 = 0x87;
        pub const LOADB: u8 = 0x8a;
        pub const STOREB: u8 = 0x88;
        pub const ADD: u8 = 0x01;
        pub const SUB: u8 = 0x29;
        pub const CMP: u8 = 0x39;
        pub const AND: u8 = 0x21;
        pub const OR: u8 = 0x09;
        pub const XOR: u8 = 0x31;
        pub const GRP_IMM: u8 = 0x81;
        pub const INC: u8 = 0x40;
        pub const DEC: u8 = 0x48;
        pub const PUSH: u8 = 0x50;
        pub const POP: u8 = 0x58;
        pub const CALL: u8 = 0xe8;
        pub const RET: u8 = 0xc3;
        pub const JMP: u8 = 0xe9;
        pub const ESCAPE: u8 = 0x0f;
        pub const JE: u8 = 0x84;
        pub const JNE: u8 = 0x85;
        pub const JL: u8 = 0x8c;
        pub const JGE: u8 = 0x8d;
        pub const JLE: u8 = 0x8e;
        pub const JG: u8 = 0x8f;
        pub const RDRAND: u8 = 0xc7;
        pub const INT: u8 = 0xcd;
        pub const HLT: u8 = 0xf4;
        pub const CLI: u8 = 0xfa;
        pub const STI: u8 = 0xfb;

        pub const GRP_ADD: u8 = 0;
        pub const GRP_OR: u8 = 1;
        pub const GRP_AND: u8 = 4;
        pub const GRP_SUB: u8 = 5;
        pub const GRP_XOR: u8 = 6;
        pub const GRP_CMP: u8 = 7;
    }

    use opcode::*;

    // keep operand nibble extraction in one place.
    macro_rules! extract_dst {
        ($rr:expr) => {
            ($rr >> 4) & 0xf
        };
    }

    macro_rules! extract_src {
        ($rr:expr) => {
            $rr & 0xf
        };
    }

    /// What one instruction did to the flow of control.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum Step {
        Retired,
        /// raise this vector; eip already points where the trap should return
        Trap(u32),
        /// ring-0 `hlt`: wait for the next interrupt
        Halt,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    enum AluOp {
        Add,
        Sub,
        Cmp,
        And,
        Or,
        Xor,
    }

    fn fault(msg: &'static str) -> Error {
        Error::new(ErrorKind::PermissionDenied, msg)
    }

    /// Interpreter for the user ISA. Each `step` either retires one
    /// instruction completely or leaves the cpu untouched and reports #GP.
    pub struct Engine<R: Rng> {
        rng: R,
    }

    impl Engine<ThreadRng> {
        pub fn new() -> Engine<ThreadRng> {
            Engine { rng: rand::rng() }
        }
    }

    impl Default for Engine<ThreadRng> {
        fn default() -> Engine<ThreadRng> {
            Engine::new()
        }
    }

    impl<R: Rng> Engine<R> {
        pub fn with_rng(rng: R) -> Engine<R> {
            Engine { rng }
        }

        pub fn step(&mut self, cpu: &mut TrapFrame, gdt: &Gdt, mem: &mut PhysicalMemory) -> Step {
            // work on a copy so a faulting instruction leaves no trace
            let mut next = *cpu;
            match self.execute(&mut next, gdt, mem) {
                Ok(step) => {
                    *cpu = next;
                    step
                }
                Err(_) => Step::Trap(Vector::GeneralProtection as u32),
            }
        }

        fn execute(&mut self, cpu: &mut TrapFrame, gdt: &Gdt, mem: &mut PhysicalMemory) -> Result<Step, Error> {
            let op = fetch_u8(cpu, gdt, mem)?;

            match op {
                NOP => {}
                MOV_IMM..=0xbf => {
                    let imm = fetch_u32(cpu, gdt, mem)?;
                    set_reg(cpu, op - MOV_IMM, imm)?;
                }
                MOV => {
                    let rr = fetch_u8(cpu, gdt, mem)?;
                    let value = reg(cpu, extract_src!(rr))?;
                    set_reg(cpu, extract_dst!(rr), value)?;
                }
                LOAD | LOADB => {
                    let rr = fetch_u8(cpu, gdt, mem)?;
                    let offset = reg(cpu, extract_src!(rr))?;
                    let value = if op == LOAD {
                        mem.read_u32(gdt.translate(cpu.ds, offset, 4)?)?
                    } else {
                        mem.read_u8(gdt.translate(cpu.ds, offset, 1)?)? as u32
                    };
                    set_reg(cpu, extract_dst!(rr), value)?;
                }
                STORE | STOREB => {
                    let rr = fetch_u8(cpu, gdt, mem)?;
                    let offset = reg(cpu, extract_dst!(rr))?;
                    let value = reg(cpu, extract_src!(rr))?;
                    if op == STORE {
                        mem.write_u32(gdt.translate(cpu.ds, offset, 4)?, value)?;
                    } else {
                        mem.write_u8(gdt.translate(cpu.ds, offset, 1)?, value as u8)?;
                    }
                }
                ADD | SUB | CMP | AND | OR | XOR => {
                    let rr = fetch_u8(cpu, gdt, mem)?;
                    let alu_op = match op {
                        ADD => AluOp::Add,
                        SUB => AluOp::Sub,
                        CMP => AluOp::Cmp,
                        AND => AluOp::And,
                        OR => AluOp::Or,
                        _ => AluOp::Xor,
                    };
                    let dst = extract_dst!(rr);
                    let rhs = reg(cpu, extract_src!(rr))?;
                    alu_reg(cpu, alu_op, dst, rhs)?;
                }
                GRP_IMM => {
                    let modrm = fetch_u8(cpu, gdt, mem)?;
                    let imm = fetch_u32(cpu, gdt, mem)?;
                    let alu_op = match extract_dst!(modrm) {
                        GRP_ADD => AluOp::Add,
                        GRP_OR => AluOp::Or,
                        GRP_AND => AluOp::And,
                        GRP_SUB => AluOp::Sub,
                        GRP_XOR => AluOp::Xor,
                        GRP_CMP => AluOp::Cmp,
                        _ => return Err(fault("undefined alu group op")),
                    };
                    alu_reg(cpu, alu_op, extract_src!(modrm), imm)?;
                }
                INC..=0x4f => {
                    let r = op & 0x7;
                    let value = reg(cpu, r)?;
                    let result = if op < DEC {
                        value.wrapping_add(1)
                    } else {
                        value.wrapping_sub(1)
                    };
                    // inc/dec leave CF alone
                    cpu.set_flag(EFlags::ZF, result == 0);
                    cpu.set_flag(EFlags::SF, result >> 31 == 1);
                    cpu.set_flag(
                        EFlags::OF,
                        if op < DEC { result == 0x8000_0000 } else { result == 0x7fff_ffff },
                    );
                    set_reg(cpu, r, result)?;
                }
                PUSH..=0x57 => {
                    let value = reg(cpu, op - PUSH)?;
                    push(cpu, gdt, mem, value)?;
                }
                POP..=0x5f => {
                    let value = pop(cpu, gdt, mem)?;
                    set_reg(cpu, op - POP, value)?;
                }
                CALL => {
                    let rel = fetch_u32(cpu, gdt, mem)?;
                    let ret = cpu.eip;
                    push(cpu, gdt, mem, ret)?;
                    cpu.eip = ret.wrapping_add(rel);
                }
                RET => {
                    cpu.eip = pop(cpu, gdt, mem)?;
                }
                JMP => {
                    let rel = fetch_u32(cpu, gdt, mem)?;
                    cpu.eip = cpu.eip.wrapping_add(rel);
                }
                ESCAPE => return self.execute_escape(cpu, gdt, mem),
                INT => {
                    let vector = fetch_u8(cpu, gdt, mem)? as u32;
                    // only the syscall gate is open to ring 3
                    if cpu.cpl() == DPL_USER && vector != Vector::Syscall as u32 {
                        return Err(fault("int to a kernel-only gate"));
                    }
                    return Ok(Step::Trap(vector));
                }
                HLT | CLI | STI => {
                    if cpu.cpl() == DPL_USER {
                        return Err(fault("privileged instruction"));
                    }
                    match op {
                        HLT => return Ok(Step::Halt),
                        CLI => cpu.set_flag(EFlags::IF, false),
                        _ => cpu.set_flag(EFlags::IF, true),
                    }
                }
                _ => return Err(fault("undefined opcode")),
            }

            Ok(Step::Retired)
        }

        fn execute_escape(&mut self, cpu: &mut TrapFrame, gdt: &Gdt, mem: &mut PhysicalMemory) -> Result<Step, Error> {
            let op = fetch_u8(cpu, gdt, mem)?;

            match op {
                JE | JNE | JL | JGE | JLE | JG => {
                    let rel = fetch_u32(cpu, gdt, mem)?;
                    let flags = cpu.flags();
                    let zf = flags.contains(EFlags::ZF);
                    let less = flags.contains(EFlags::SF) != flags.contains(EFlags::OF);
                    let taken = match op {
                        JE => zf,
                        JNE => !zf,
                        JL => less,
                        JGE => !less,
                        JLE => zf || less,
                        _ => !zf && !less,
                    };
                    if taken {
                        cpu.eip = cpu.eip.wrapping_add(rel);
                    }
                }
                RDRAND => {
                    let modrm = fetch_u8(cpu, gdt, mem)?;
                    if modrm & 0xf8 != 0xf0 {
                        return Err(fault("bad rdrand operand"));
                    }
                    let value: u32 = self.rng.random();
                    set_reg(cpu, modrm & 0x7, value)?;
                    cpu.set_flag(EFlags::CF, true);
                }
                _ => return Err(fault("undefined opcode")),
            }

            Ok(Step::Retired)
        }
    }

    fn reg(cpu: &TrapFrame, idx: u8) -> Result<u32, Error> {
        cpu.reg(idx).ok_or_else(|| fault("bad register"))
    }

    fn set_reg(cpu: &mut TrapFrame, idx: u8, value: u32) -> Result<(), Error> {
        cpu.set_reg(idx, value).ok_or_else(|| fault("bad register"))
    }

    fn fetch_u8(cpu: &mut TrapFrame, gdt: &Gdt, mem: &PhysicalMemory) -> Result<u8, Error> {
        let byte = mem.read_u8(gdt.translate(cpu.cs, cpu.eip, 1)?)?;
        cpu.eip = cpu.eip.wrapping_add(1);
        Ok(byte)
    }

    fn fetch_u32(cpu: &mut TrapFrame, gdt: &Gdt, mem: &PhysicalMemory) -> Result<u32, Error> {
        let word = mem.read_u32(gdt.translate(cpu.cs, cpu.eip, 4)?)?;
        cpu.eip = cpu.eip.wrapping_add(4);
        Ok(word)
    }

    fn push(cpu: &mut TrapFrame, gdt: &Gdt, mem: &mut PhysicalMemory, value: u32) -> Result<(), Error> {
        let esp = cpu.esp.wrapping_sub(4);
        mem.write_u32(gdt.translate(cpu.ss, esp, 4)?, value)?;
        cpu.esp = esp;
        Ok(())
    }

    fn pop(cpu: &mut TrapFrame, gdt: &Gdt, mem: &PhysicalMemory) -> Result<u32, Error> {
        let value = mem.read_u32(gdt.translate(cpu.ss, cpu.esp, 4)?)?;
        cpu.esp = cpu.esp.wrapping_add(4);
        Ok(value)
    }

    fn alu_reg(cpu: &mut TrapFrame, op: AluOp, dst: u8, rhs: u32) -> Result<(), Error> {
        let lhs = reg(cpu, dst)?;
        let (result, cf, of) = match op {
            AluOp::Add => {
                let r = lhs.wrapping_add(rhs);
                (r, r < lhs, ((lhs ^ r) & (rhs ^ r)) >> 31 == 1)
            }
            AluOp::Sub | AluOp::Cmp => {
                let r = lhs.wrapping_sub(rhs);
                (r, lhs < rhs, ((lhs ^ rhs) & (lhs ^ r)) >> 31 == 1)
            }
            AluOp::And => (lhs & rhs, false, false),
            AluOp::Or => (lhs | rhs, false, false),
            AluOp::Xor => (lhs ^ rhs, false, false),
        };

        cpu.set_flag(EFlags::CF, cf);
        cpu.set_flag(EFlags::OF, of);
        cpu.set_flag(EFlags::ZF, result == 0);
        cpu.set_flag(EFlags::SF, result >> 31 == 1);

        if op != AluOp::Cmp {
            set_reg(cpu, dst, result)?;
        }
        Ok(())
    }
}
