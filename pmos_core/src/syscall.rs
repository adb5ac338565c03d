pub mod syscall {
    use log::{debug, info, warn};
    use num_enum::TryFromPrimitive;

    use crate::device::device::{KeyboardDevice, STD_IN, STD_OUT, Screen};
    use crate::kernel::kernel::Kernel;
    use crate::proc::proc::{ProcState, stack_top_addr};
    use crate::wait_queue::wait_queue::Link;
    use crate::x86::x86::{ucode_desc, udata_desc, usel};

    #[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
    #[repr(u32)]
    pub enum SyscallNumber {
        Write = 0,
        Read = 1,
        Fork = 2,
        Exec = 3,
        Sleep = 4,
        Exit = 5,
        Sem = 6,
    }

    /// fd selector of write/read; doubles as the device registry index.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
    #[repr(u32)]
    pub enum Fd {
        StdOut = 0,
        StdIn = 1,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
    #[repr(u32)]
    pub enum SemOp {
        Init = 0,
        Wait = 1,
        Post = 2,
        Destroy = 3,
    }

    /// syscall handlers tell the trap dispatcher whether the caller keeps
    /// the cpu.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum SyscallOutcome {
        Completed,
        Blocked,
        Exited,
    }

    impl<S: Screen, K: KeyboardDevice> Kernel<S, K> {
        /// Route the current process's `int 0x80` by its eax.
        pub(crate) fn syscall_handle(&mut self) -> SyscallOutcome {
            let nr = self.caller_regs().eax;
            match SyscallNumber::try_from(nr) {
                Ok(SyscallNumber::Write) => self.syscall_write(),
                Ok(SyscallNumber::Read) => self.syscall_read(),
                Ok(SyscallNumber::Fork) => self.syscall_fork(),
                Ok(SyscallNumber::Exec) => self.syscall_exec(),
                Ok(SyscallNumber::Sleep) => self.syscall_sleep(),
                Ok(SyscallNumber::Exit) => self.syscall_exit(),
                Ok(SyscallNumber::Sem) => self.syscall_sem(),
                Err(_) => {
                    warn!("pid {}: unknown syscall {nr}", self.sched.current());
                    self.set_caller_return(-1);
                    SyscallOutcome::Completed
                }
            }
        }

        fn syscall_write(&mut self) -> SyscallOutcome {
            match Fd::try_from(self.caller_regs().ecx) {
                Ok(Fd::StdOut) => self.syscall_write_std_out(),
                _ => {
                    warn!("pid {}: write to bad fd {}", self.sched.current(), self.caller_regs().ecx);
                    self.set_caller_return(-1);
                    SyscallOutcome::Completed
                }
            }
        }

        fn syscall_write_std_out(&mut self) -> SyscallOutcome {
            let pid = self.sched.current();
            if !self.dev[STD_OUT].is_active() {
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            }

            let regs = *self.caller_regs();
            let data = match self.user_read(regs.ds, regs.edx, regs.ebx as usize) {
                Ok(data) => data,
                Err(err) => {
                    warn!("pid {pid}: write buffer rejected: {err}");
                    self.set_caller_return(-1);
                    return SyscallOutcome::Completed;
                }
            };

            self.console.write_bytes(&mut self.screen, &data);
            self.set_caller_return(data.len() as i32);
            SyscallOutcome::Completed
        }

        fn syscall_read(&mut self) -> SyscallOutcome {
            match Fd::try_from(self.caller_regs().ecx) {
                Ok(Fd::StdIn) => self.syscall_read_std_in(),
                _ => {
                    warn!("pid {}: read from bad fd {}", self.sched.current(), self.caller_regs().ecx);
                    self.set_caller_return(-1);
                    SyscallOutcome::Completed
                }
            }
        }

        /// Single-reader consumer side of the keyboard buffer.
        ///
        /// With nothing buffered the caller is parked on `dev[STD_IN]` and
        /// sees 0 for now; the keyboard handler later rewinds it so the read
        /// is issued again once input exists. A second reader arriving while
        /// one is parked is turned away with -1.
        fn syscall_read_std_in(&mut self) -> SyscallOutcome {
            let pid = self.sched.current();
            let regs = *self.caller_regs();
            let dev = &self.dev[STD_IN];

            if !dev.is_active() {
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            }

            if dev.value < 0 {
                warn!("pid {pid}: stdin already has a blocked reader");
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            }

            if dev.value == 0 {
                self.dev[STD_IN].block(&mut self.procs, pid);
                self.set_caller_return(0);
                debug!("pid {pid} blocked on stdin");
                return SyscallOutcome::Blocked;
            }

            let len = regs.ebx as usize;
            if len == 0 {
                self.set_caller_return(0);
                return SyscallOutcome::Completed;
            }

            let addr = match self.gdt.translate(regs.ds, regs.edx, len) {
                Ok(addr) => addr,
                Err(err) => {
                    warn!("pid {pid}: read buffer rejected: {err}");
                    self.set_caller_return(-1);
                    return SyscallOutcome::Completed;
                }
            };

            let mut data = self.without_interrupts(|kernel| {
                let mut data = Vec::with_capacity(len);
                while data.len() < len - 1 {
                    match kernel.key_buffer.pop() {
                        Some(ch) => data.push(ch),
                        None => break,
                    }
                }
                kernel.dev[STD_IN].value = if kernel.key_buffer.is_empty() { 0 } else { 1 };
                data
            });

            let count = data.len();
            data.push(0);
            if let Err(err) = self.mem.write(addr, &data) {
                warn!("pid {pid}: read copy-out failed: {err}");
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            }

            self.set_caller_return(count as i32);
            SyscallOutcome::Completed
        }

        fn syscall_fork(&mut self) -> SyscallOutcome {
            let parent = self.sched.current();
            let Some(child) = self.procs.find_dead() else {
                warn!("pid {parent}: fork with a full process table");
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            };

            if let Err(err) = self.mem.copy_segment(parent, child) {
                warn!("pid {parent}: fork copy failed: {err}");
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            }

            let src = self.procs[parent].clone();
            let pcb = &mut self.procs[child];

            // keep the same depth into the kernel stack as the parent
            pcb.stack_top = stack_top_addr(child) - (stack_top_addr(parent) - src.stack_top);
            pcb.prev_stack_top = stack_top_addr(child) - (stack_top_addr(parent) - src.prev_stack_top);
            pcb.state = ProcState::Runnable;
            pcb.time_count = src.time_count;
            pcb.sleep_time = src.sleep_time;
            pcb.pid = child;
            pcb.blocked = Link::default();

            let data = usel(udata_desc(child));
            pcb.regs = src.regs;
            pcb.regs.cs = usel(ucode_desc(child));
            pcb.regs.ss = data;
            pcb.regs.ds = data;
            pcb.regs.es = data;
            pcb.regs.fs = data;
            pcb.regs.gs = data;
            pcb.regs.set_return(0);

            info!("pid {parent} forked pid {child}");
            self.set_caller_return(child as i32);
            SyscallOutcome::Completed
        }

        /// Placeholder: the caller resumes with its registers as they were.
        fn syscall_exec(&mut self) -> SyscallOutcome {
            debug!("pid {}: exec ignored", self.sched.current());
            SyscallOutcome::Completed
        }

        fn syscall_sleep(&mut self) -> SyscallOutcome {
            let ticks = self.caller_regs().ecx;
            self.set_caller_return(0);
            if ticks == 0 {
                return SyscallOutcome::Completed;
            }

            let pid = self.sched.current();
            let pcb = &mut self.procs[pid];
            pcb.state = ProcState::Blocked;
            pcb.sleep_time = Some(ticks);
            debug!("pid {pid} sleeping for {ticks} ticks");
            SyscallOutcome::Blocked
        }

        fn syscall_exit(&mut self) -> SyscallOutcome {
            let pid = self.sched.current();
            let pcb = &mut self.procs[pid];
            pcb.state = ProcState::Dead;
            pcb.time_count = 0;
            pcb.sleep_time = None;
            info!("pid {pid} exited");
            SyscallOutcome::Exited
        }
    }
}
