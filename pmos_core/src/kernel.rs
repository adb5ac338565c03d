pub mod kernel {
    use std::io::{Error, ErrorKind};

    use log::info;

    use crate::console::console::{Console, TextScreen};
    use crate::device::device::{
        Device, KeyboardDevice, MAX_DEV_NUM, MAX_SEM_NUM, STD_IN, STD_OUT, Screen, Semaphore,
    };
    use crate::keyboard::keyboard::{KeyBuffer, MAX_KEYBUFFER_SIZE, ScancodeKeyboard};
    use crate::memory::memory::{PROC_MEM_SIZE, PhysicalMemory};
    use crate::proc::proc::{
        IDLE_PID, MAX_PCB_NUM, Pcb, Pid, ProcState, ProcessTable, frame_addr, stack_top_addr,
    };
    use crate::sched::sched::{MAX_TIME_COUNT, Scheduler};
    use crate::wait_queue::wait_queue::Link;
    use crate::x86::x86::{Gdt, SEG_KDATA, TrapFrame, Tss, ksel, udata_desc, usel};

    /// Sizing of every kernel table.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct KernelConfig {
        pub max_pcb: usize,
        pub max_sem: usize,
        pub max_dev: usize,
        /// timer ticks a process may hold the cpu
        pub time_quantum: u32,
        pub key_buffer_size: usize,
        pub proc_mem_size: usize,
    }

    impl Default for KernelConfig {
        fn default() -> KernelConfig {
            KernelConfig {
                max_pcb: MAX_PCB_NUM,
                max_sem: MAX_SEM_NUM,
                max_dev: MAX_DEV_NUM,
                time_quantum: MAX_TIME_COUNT,
                key_buffer_size: MAX_KEYBUFFER_SIZE,
                proc_mem_size: PROC_MEM_SIZE,
            }
        }
    }

    impl KernelConfig {
        pub fn validate(&self) -> Result<(), Error> {
            if self.max_pcb < 2 {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "need at least two pcbs (idle + one process)",
                ));
            }
            if self.max_dev <= STD_IN {
                return Err(Error::new(ErrorKind::InvalidInput, "device registry too small for stdin"));
            }
            if self.time_quantum == 0 || self.key_buffer_size < 2 || self.proc_mem_size == 0 {
                return Err(Error::new(ErrorKind::InvalidInput, "sizes must be non-zero"));
            }
            if self.proc_mem_size > u32::MAX as usize / (self.max_pcb + 1) {
                return Err(Error::new(ErrorKind::InvalidInput, "arena does not fit a 32-bit segment"));
            }
            Ok(())
        }
    }

    /// The whole kernel state: descriptor tables, the physical arena, the
    /// process table with its scheduler, the device and semaphore
    /// registries, the keyboard buffer and the console.
    ///
    /// Nothing outside the trap path mutates this while a process runs:
    /// `irq_handle` is the only entry that changes scheduling state, and it
    /// runs with interrupts held off.
    pub struct Kernel<S: Screen, K: KeyboardDevice> {
        pub(crate) config: KernelConfig,
        pub(crate) gdt: Gdt,
        pub(crate) tss: Tss,
        pub(crate) mem: PhysicalMemory,
        pub(crate) procs: ProcessTable,
        pub(crate) sched: Scheduler,
        pub(crate) dev: Vec<Device>,
        pub(crate) sem: Vec<Semaphore>,
        pub(crate) key_buffer: KeyBuffer,
        pub(crate) console: Console,
        pub(crate) screen: S,
        pub(crate) keyboard: K,
        pub(crate) halted: bool,
        pub(crate) interrupts: bool,
    }

    pub type HeadlessKernel = Kernel<TextScreen, ScancodeKeyboard>;

    impl HeadlessKernel {
        pub fn headless(config: KernelConfig) -> Result<HeadlessKernel, Error> {
            Kernel::new(config, TextScreen::new(), ScancodeKeyboard::new())
        }
    }

    impl<S: Screen, K: KeyboardDevice> Kernel<S, K> {
        /// Boot: segments, console, key buffer, semaphores, devices, then the
        /// process table with the idle loop current.
        pub fn new(config: KernelConfig, mut screen: S, keyboard: K) -> Result<Kernel<S, K>, Error> {
            config.validate()?;

            let gdt = Gdt::new(config.max_pcb, config.proc_mem_size);
            let tss = Tss {
                esp0: stack_top_addr(IDLE_PID),
                ss0: ksel(SEG_KDATA),
            };
            let mem = PhysicalMemory::new(config.max_pcb, config.proc_mem_size)?;

            let mut console = Console::new();
            console.reset(&mut screen);

            let key_buffer = KeyBuffer::new(config.key_buffer_size);
            let sem = vec![Semaphore::default(); config.max_sem];

            let mut dev = vec![Device::default(); config.max_dev];
            dev[STD_OUT].activate(0);
            dev[STD_IN].activate(0);

            let mut procs = ProcessTable::new(config.max_pcb);
            let idle = &mut procs[IDLE_PID];
            idle.state = ProcState::Running;
            idle.regs = TrapFrame::kernel();

            info!(
                "boot: {} pcbs, {:#x} byte segments, quantum {}",
                config.max_pcb, config.proc_mem_size, config.time_quantum
            );

            Ok(Kernel {
                sched: Scheduler::new(config.time_quantum),
                config,
                gdt,
                tss,
                mem,
                procs,
                dev,
                sem,
                key_buffer,
                console,
                screen,
                keyboard,
                halted: false,
                interrupts: true,
            })
        }

        /// Copy `image` into the first free slot at offset 0 and make it
        /// runnable with a fresh user context (eip 0, esp at the segment top).
        pub fn load_program(&mut self, image: &[u8]) -> Result<Pid, Error> {
            if image.len() > self.config.proc_mem_size {
                return Err(Error::new(ErrorKind::FileTooLarge, "File too large"));
            }

            let pid = self
                .procs
                .find_dead()
                .ok_or_else(|| Error::new(ErrorKind::AddrNotAvailable, "no free process slot"))?;

            self.mem.zero_segment(pid)?;
            let base = self.mem.segment_base(pid);
            self.mem.write(base, image)?;

            let pcb = &mut self.procs[pid];
            pcb.stack_top = frame_addr(pid);
            pcb.prev_stack_top = stack_top_addr(pid);
            pcb.state = ProcState::Runnable;
            pcb.time_count = 0;
            pcb.sleep_time = None;
            pcb.pid = pid;
            pcb.blocked = Link::default();
            pcb.regs = TrapFrame::user(pid, 0, self.config.proc_mem_size as u32);

            info!("loaded {} byte image into pid {pid}", image.len());
            Ok(pid)
        }

        /// Run `f` with interrupts held off; the previous state comes back
        /// afterwards, so scopes nest.
        pub fn without_interrupts<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
            let saved = std::mem::replace(&mut self.interrupts, false);
            let ret = f(self);
            self.interrupts = saved;
            ret
        }

        pub fn interrupts_enabled(&self) -> bool {
            self.interrupts
        }

        pub(crate) fn caller_regs(&self) -> &TrapFrame {
            &self.procs[self.sched.current()].regs
        }

        pub(crate) fn set_caller_return(&mut self, value: i32) {
            let cur = self.sched.current();
            self.procs[cur].regs.set_return(value);
        }

        pub(crate) fn user_read(&self, selector: u32, offset: u32, len: usize) -> Result<Vec<u8>, Error> {
            let addr = self.gdt.translate(selector, offset, len)?;
            self.mem.read(addr, len)
        }

        /// Bytes at `offset` in the data segment of `pid`.
        pub fn read_user(&self, pid: Pid, offset: u32, len: usize) -> Result<Vec<u8>, Error> {
            self.user_read(usel(udata_desc(pid)), offset, len)
        }

        pub fn write_user(&mut self, pid: Pid, offset: u32, data: &[u8]) -> Result<(), Error> {
            let addr = self.gdt.translate(usel(udata_desc(pid)), offset, data.len())?;
            self.mem.write(addr, data)
        }

        /// Context the cpu resumes: the saved frame of the current pcb.
        pub fn resume_frame(&self) -> TrapFrame {
            self.procs[self.sched.current()].regs
        }

        pub fn config(&self) -> &KernelConfig {
            &self.config
        }

        pub fn current(&self) -> Pid {
            self.sched.current()
        }

        pub fn proc(&self, pid: Pid) -> Option<&Pcb> {
            self.procs.get(pid)
        }

        pub fn proc_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
            self.procs.get_mut(pid)
        }

        pub fn procs(&self) -> &ProcessTable {
            &self.procs
        }

        pub fn device(&self, idx: usize) -> Option<&Device> {
            self.dev.get(idx)
        }

        pub fn semaphore(&self, id: usize) -> Option<&Semaphore> {
            self.sem.get(id)
        }

        pub fn key_buffer(&self) -> &KeyBuffer {
            &self.key_buffer
        }

        pub fn console(&self) -> Console {
            self.console
        }

        pub fn screen(&self) -> &S {
            &self.screen
        }

        pub fn screen_mut(&mut self) -> &mut S {
            &mut self.screen
        }

        pub fn keyboard(&self) -> &K {
            &self.keyboard
        }

        pub fn keyboard_mut(&mut self) -> &mut K {
            &mut self.keyboard
        }

        pub fn gdt(&self) -> &Gdt {
            &self.gdt
        }

        pub fn tss(&self) -> &Tss {
            &self.tss
        }

        pub fn mem(&self) -> &PhysicalMemory {
            &self.mem
        }

        pub fn is_halted(&self) -> bool {
            self.halted
        }

        /// Any process besides idle that has not exited.
        pub fn has_live_processes(&self) -> bool {
            self.procs
                .iter()
                .any(|pcb| pcb.pid != IDLE_PID && !pcb.is_dead())
        }
    }
}
