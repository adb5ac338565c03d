pub mod x86 {
    use std::io::{Error, ErrorKind};
    use std::mem::size_of;

    use bitflags::bitflags;
    use num_enum::TryFromPrimitive;

    pub const SEG_KCODE: u32 = 1;
    pub const SEG_KDATA: u32 = 2;

    pub const DPL_KERN: u32 = 0;
    pub const DPL_USER: u32 = 3;

    /// Length of `int imm8` (`CD ib`); a restarted syscall rewinds eip by this much.
    pub const INT_INSN_LEN: u32 = 2;

    pub const fn ksel(desc: u32) -> u32 {
        (desc << 3) | DPL_KERN
    }

    pub const fn usel(desc: u32) -> u32 {
        (desc << 3) | DPL_USER
    }

    // slot i owns descriptors 1+2i (code) and 2+2i (data); slot 0 lands on the kernel pair.
    pub const fn ucode_desc(pid: usize) -> u32 {
        1 + 2 * pid as u32
    }

    pub const fn udata_desc(pid: usize) -> u32 {
        2 + 2 * pid as u32
    }

    /// Interrupt vectors the dispatcher knows how to route.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
    #[repr(u32)]
    pub enum Vector {
        GeneralProtection = 0x0d,
        Timer = 0x20,
        Keyboard = 0x21,
        Syscall = 0x80,
        /// the `-1` vector pushed by stubs that only want a pass through the kernel.
        Spurious = 0xffff_ffff,
    }

    bitflags! {
        /// The EFLAGS bits the machine model tracks.
        pub struct EFlags: u32 {
            const CF = 1 << 0;
            const RESERVED = 1 << 1;
            const ZF = 1 << 6;
            const SF = 1 << 7;
            const IF = 1 << 9;
            const OF = 1 << 11;
        }
    }

    /// Register snapshot pushed on trap entry: segment registers and the
    /// `pushal` block by the stub, vector and error code, then the hardware
    /// part (eip, cs, eflags, esp, ss).
    ///
    /// One of these sits at the top of every PCB's kernel stack; it is both
    /// the context a process resumes from and the place its syscall return
    /// value (`eax`) is written to.
    #[repr(C)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct TrapFrame {
        pub gs: u32,
        pub fs: u32,
        pub es: u32,
        pub ds: u32,
        pub edi: u32,
        pub esi: u32,
        pub ebp: u32,
        pub xxx: u32,
        pub ebx: u32,
        pub edx: u32,
        pub ecx: u32,
        pub eax: u32,
        pub irq: u32,
        pub error: u32,
        pub eip: u32,
        pub cs: u32,
        pub eflags: u32,
        pub esp: u32,
        pub ss: u32,
    }

    pub const FRAME_SIZE: usize = size_of::<TrapFrame>();

    impl TrapFrame {
        /// Fresh user context for slot `pid`: its own selectors, interrupts on.
        pub fn user(pid: usize, entry: u32, stack: u32) -> TrapFrame {
            let data = usel(udata_desc(pid));
            TrapFrame {
                gs: data,
                fs: data,
                es: data,
                ds: data,
                ss: data,
                cs: usel(ucode_desc(pid)),
                eip: entry,
                esp: stack,
                eflags: (EFlags::IF | EFlags::RESERVED).bits(),
                ..TrapFrame::default()
            }
        }

        /// Context of the idle loop: kernel selectors, interrupts on.
        pub fn kernel() -> TrapFrame {
            let data = ksel(SEG_KDATA);
            TrapFrame {
                gs: data,
                fs: data,
                es: data,
                ds: data,
                ss: data,
                cs: ksel(SEG_KCODE),
                eflags: (EFlags::IF | EFlags::RESERVED).bits(),
                ..TrapFrame::default()
            }
        }

        pub fn flags(&self) -> EFlags {
            EFlags::from_bits_truncate(self.eflags)
        }

        pub fn set_flag(&mut self, flag: EFlags, on: bool) {
            let mut flags = self.flags();
            flags.set(flag, on);
            self.eflags = flags.bits() | (self.eflags & !EFlags::all().bits());
        }

        pub fn interrupts_enabled(&self) -> bool {
            self.flags().contains(EFlags::IF)
        }

        /// Privilege level the frame was running at (RPL of cs).
        pub fn cpl(&self) -> u32 {
            self.cs & 0x3
        }

        pub fn set_return(&mut self, value: i32) {
            self.eax = value as u32;
        }

        pub fn return_value(&self) -> i32 {
            self.eax as i32
        }

        /// General purpose register by its x86 encoding
        /// (eax ecx edx ebx esp ebp esi edi).
        pub fn reg(&self, idx: u8) -> Option<u32> {
            Some(match idx {
                0 => self.eax,
                1 => self.ecx,
                2 => self.edx,
                3 => self.ebx,
                4 => self.esp,
                5 => self.ebp,
                6 => self.esi,
                7 => self.edi,
                _ => return None,
            })
        }

        pub fn set_reg(&mut self, idx: u8, value: u32) -> Option<()> {
            let slot = match idx {
                0 => &mut self.eax,
                1 => &mut self.ecx,
                2 => &mut self.edx,
                3 => &mut self.ebx,
                4 => &mut self.esp,
                5 => &mut self.ebp,
                6 => &mut self.esi,
                7 => &mut self.edi,
                _ => return None,
            };
            *slot = value;
            Some(())
        }

        /// Arrange for the `int` that trapped here to execute again with
        /// syscall number `nr` once this frame is resumed.
        pub fn rewind_syscall(&mut self, nr: u32) {
            self.eip = self.eip.wrapping_sub(INT_INSN_LEN);
            self.eax = nr;
        }
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SegmentDescriptor {
        pub base: u32,
        pub limit: u32,
        pub dpl: u32,
        pub present: bool,
    }

    impl SegmentDescriptor {
        const NULL: SegmentDescriptor = SegmentDescriptor {
            base: 0,
            limit: 0,
            dpl: 0,
            present: false,
        };
    }

    /// Flat descriptor table: null, kernel code/data over the whole arena,
    /// then a user code/data pair per process slot.
    pub struct Gdt {
        descs: Vec<SegmentDescriptor>,
    }

    impl Gdt {
        pub fn new(slots: usize, seg_size: usize) -> Gdt {
            let arena = ((slots + 1) * seg_size) as u32;
            let kernel = SegmentDescriptor {
                base: 0,
                limit: arena,
                dpl: DPL_KERN,
                present: true,
            };

            let mut descs = vec![SegmentDescriptor::NULL, kernel, kernel];
            for pid in 1..slots {
                let user = SegmentDescriptor {
                    base: ((pid + 1) * seg_size) as u32,
                    limit: seg_size as u32,
                    dpl: DPL_USER,
                    present: true,
                };
                // code and data overlap; the model has no execute/write split.
                descs.push(user);
                descs.push(user);
            }

            Gdt { descs }
        }

        pub fn len(&self) -> usize {
            self.descs.len()
        }

        pub fn descriptor(&self, selector: u32) -> Option<&SegmentDescriptor> {
            self.descs
                .get((selector >> 3) as usize)
                .filter(|desc| desc.present)
        }

        /// Resolve `selector:offset` for an access of `len` bytes into an
        /// arena address, enforcing the segment limit.
        pub fn translate(&self, selector: u32, offset: u32, len: usize) -> Result<usize, Error> {
            let desc = self
                .descriptor(selector)
                .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "selector not present"))?;

            let end = (offset as usize)
                .checked_add(len)
                .ok_or_else(|| Error::new(ErrorKind::Other, "overflow computing segment range"))?;

            if end > desc.limit as usize {
                return Err(Error::new(ErrorKind::AddrNotAvailable, "segment limit exceeded"));
            }

            Ok(desc.base as usize + offset as usize)
        }
    }

    /// Only the ring-0 stack fields of the task-state segment are modelled.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Tss {
        pub esp0: usize,
        pub ss0: u32,
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn user_segments_are_disjoint_per_slot() {
            let gdt = Gdt::new(4, 0x1000);
            assert_eq!(gdt.len(), 1 + 2 * 4);

            let a = gdt.translate(usel(udata_desc(1)), 0, 1).unwrap();
            let b = gdt.translate(usel(udata_desc(2)), 0, 1).unwrap();
            assert_eq!(a, 0x2000);
            assert_eq!(b, 0x3000);
            assert_eq!(gdt.translate(usel(ucode_desc(3)), 0x10, 1).unwrap(), 0x4010);
        }

        #[test]
        fn translate_enforces_limit() {
            let gdt = Gdt::new(2, 0x1000);
            let sel = usel(udata_desc(1));
            assert!(gdt.translate(sel, 0x0fff, 1).is_ok());
            assert!(gdt.translate(sel, 0x0fff, 2).is_err());
            assert!(gdt.translate(usel(40), 0, 1).is_err());
        }

        #[test]
        fn rewind_restores_syscall_number() {
            let mut frame = TrapFrame::user(1, 0x40, 0x1000);
            frame.eip = 0x42;
            frame.set_return(0);
            frame.rewind_syscall(1);
            assert_eq!(frame.eip, 0x40);
            assert_eq!(frame.eax, 1);
            assert!(frame.interrupts_enabled());
            assert_eq!(frame.cpl(), DPL_USER);
        }
    }
}
