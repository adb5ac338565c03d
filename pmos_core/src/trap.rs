pub mod trap {
    use std::io::{Error, ErrorKind};

    use log::{debug, error, trace, warn};

    use crate::device::device::{KeyboardDevice, STD_IN, Screen};
    use crate::kernel::kernel::Kernel;
    use crate::keyboard::keyboard::{BREAK_BIT, KEY_BACKSPACE, KEY_ENTER};
    use crate::proc::proc::{frame_addr, stack_top_addr};
    use crate::sched::sched::Switch;
    use crate::syscall::syscall::{SyscallNumber, SyscallOutcome};
    use crate::x86::x86::{TrapFrame, Vector};

    impl<S: Screen, K: KeyboardDevice> Kernel<S, K> {
        /// Trap dispatcher. `frame` is the live cpu context at the moment of
        /// the trap; on return it holds the context to resume, which belongs
        /// to whichever process the scheduler left current.
        ///
        /// Entry saves `frame` into the current pcb and records where its
        /// kernel stack stood. Unless a context switch happens, that stack
        /// position is put back before returning. A general-protection fault
        /// or an unknown vector halts the kernel: the call returns `Err` and
        /// every later trap is refused.
        pub fn irq_handle(&mut self, frame: &mut TrapFrame) -> Result<(), Error> {
            if self.halted {
                return Err(Error::new(ErrorKind::Other, "kernel is halted"));
            }

            self.without_interrupts(|kernel| kernel.dispatch(frame))
        }

        fn dispatch(&mut self, frame: &mut TrapFrame) -> Result<(), Error> {
            let cur = self.sched.current();
            trace!("trap {:#x} from pid {cur} at eip {:#x}", frame.irq, frame.eip);

            self.procs[cur].regs = *frame;
            let tmp_stack_top = self.procs[cur].stack_top;
            self.procs[cur].prev_stack_top = tmp_stack_top;
            self.procs[cur].stack_top = frame_addr(cur);

            let switch = match Vector::try_from(frame.irq) {
                Ok(Vector::Spurious) => None,
                Ok(Vector::GeneralProtection) => {
                    return Err(self.fault(format!(
                        "general protection fault in pid {cur} at {:#x}:{:#x}",
                        frame.cs, frame.eip
                    )));
                }
                Ok(Vector::Timer) => self.timer_handle(),
                Ok(Vector::Keyboard) => self.keyboard_handle(),
                Ok(Vector::Syscall) => match self.syscall_handle() {
                    SyscallOutcome::Completed => None,
                    SyscallOutcome::Blocked | SyscallOutcome::Exited => {
                        Some(self.sched.reschedule(&mut self.procs))
                    }
                },
                Err(_) => {
                    return Err(self.fault(format!("unexpected interrupt vector {:#x}", frame.irq)));
                }
            };

            match switch {
                Some(switch) => self.context_switch(switch),
                None => self.procs[cur].stack_top = tmp_stack_top,
            }

            *frame = self.procs[self.sched.current()].regs;
            Ok(())
        }

        fn timer_handle(&mut self) -> Option<Switch> {
            self.sched.tick(&mut self.procs)
        }

        /// Restore the kernel stack of the process picked by the scheduler
        /// and point the TSS at it. The process switched away from keeps
        /// `stack_top` on its saved frame.
        fn context_switch(&mut self, switch: Switch) {
            let pcb = &mut self.procs[switch.to];
            pcb.stack_top = pcb.prev_stack_top;
            self.tss.esp0 = stack_top_addr(switch.to);

            if switch.from != switch.to {
                debug!("switch pid {} -> pid {}", switch.from, switch.to);
            }
        }

        /// One scancode per interrupt: edit the key buffer, echo to the
        /// console, and hand input to a reader parked on stdin.
        pub(crate) fn keyboard_handle(&mut self) -> Option<Switch> {
            let code = self.keyboard.get_key_code();
            if code == 0 {
                return None;
            }

            match code {
                KEY_BACKSPACE => {
                    // an echoed key still buffered is the newest entry
                    if self.console.erase_echo(&mut self.screen) {
                        self.key_buffer.pop_back();
                    }
                }
                KEY_ENTER => {
                    if self.key_buffer.push(b'\n') {
                        self.console.new_line(&mut self.screen);
                    } else {
                        warn!("key buffer full, dropping newline");
                    }
                }
                c if c < BREAK_BIT => {
                    let ch = self.keyboard.get_char(c);
                    if ch != 0 {
                        if self.key_buffer.push(ch) {
                            self.console.echo_byte(&mut self.screen, ch);
                        } else {
                            warn!("key buffer full, dropping {:?}", ch as char);
                        }
                    }
                }
                _ => {}
            }
            self.console.sync_cursor(&mut self.screen);

            // value mirrors whether unread input exists, unless a reader waits
            let dev = &mut self.dev[STD_IN];
            if !dev.is_active() {
                return None;
            }
            if self.key_buffer.is_empty() {
                if dev.value > 0 {
                    dev.value = 0;
                }
                return None;
            }
            if dev.value >= 0 {
                dev.value = 1;
                return None;
            }

            let pid = dev.wake_one(&mut self.procs)?;
            dev.value = 1;
            // the reader parked with eax = 0; make it issue the read again
            self.procs[pid].regs.rewind_syscall(SyscallNumber::Read as u32);
            debug!("pid {pid} woken by keyboard");

            self.sched.preempt(&mut self.procs)
        }

        fn fault(&mut self, msg: String) -> Error {
            error!("{msg}; halting");
            self.halted = true;
            Error::new(ErrorKind::Other, msg)
        }
    }
}
