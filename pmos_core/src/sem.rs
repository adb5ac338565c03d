pub mod sem {
    use log::{debug, warn};

    use crate::device::device::{KeyboardDevice, Screen};
    use crate::kernel::kernel::Kernel;
    use crate::syscall::syscall::{SemOp, SyscallOutcome};

    impl<S: Screen, K: KeyboardDevice> Kernel<S, K> {
        /// `sem(op, arg)`: op in ecx, initial value or semaphore id in edx.
        pub(crate) fn syscall_sem(&mut self) -> SyscallOutcome {
            let regs = *self.caller_regs();
            match SemOp::try_from(regs.ecx) {
                Ok(SemOp::Init) => self.sem_init(regs.edx as i32),
                Ok(SemOp::Wait) => self.sem_wait(regs.edx),
                Ok(SemOp::Post) => self.sem_post(regs.edx),
                Ok(SemOp::Destroy) => self.sem_destroy(regs.edx),
                Err(_) => {
                    warn!("pid {}: bad semaphore op {}", self.sched.current(), regs.ecx);
                    self.set_caller_return(-1);
                    SyscallOutcome::Completed
                }
            }
        }

        fn sem_init(&mut self, value: i32) -> SyscallOutcome {
            let pid = self.sched.current();
            if value < 0 {
                warn!("pid {pid}: semaphore initial value {value} is negative");
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            }

            let Some(id) = self.sem.iter().position(|sem| !sem.is_active()) else {
                warn!("pid {pid}: no free semaphore");
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            };

            self.sem[id].activate(value);
            debug!("pid {pid} created sem {id} = {value}");
            self.set_caller_return(id as i32);
            SyscallOutcome::Completed
        }

        fn sem_wait(&mut self, id: u32) -> SyscallOutcome {
            let Some(id) = self.valid_sem(id) else {
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            };

            self.set_caller_return(0);
            if self.sem[id].value > 0 {
                self.sem[id].value -= 1;
                return SyscallOutcome::Completed;
            }

            let pid = self.sched.current();
            self.sem[id].block(&mut self.procs, pid);
            debug!("pid {pid} blocked on sem {id}");
            SyscallOutcome::Blocked
        }

        fn sem_post(&mut self, id: u32) -> SyscallOutcome {
            let Some(id) = self.valid_sem(id) else {
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            };

            let sem = &mut self.sem[id];
            if sem.value < 0 {
                if let Some(pid) = sem.wake_one(&mut self.procs) {
                    debug!("sem {id} woke pid {pid}");
                }
            } else {
                let Some(value) = sem.value.checked_add(1) else {
                    warn!("pid {}: sem {id} count is saturated", self.sched.current());
                    self.set_caller_return(-1);
                    return SyscallOutcome::Completed;
                };
                sem.value = value;
            }

            self.set_caller_return(0);
            SyscallOutcome::Completed
        }

        fn sem_destroy(&mut self, id: u32) -> SyscallOutcome {
            let Some(id) = self.valid_sem(id) else {
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            };

            if self.sem[id].has_waiters() {
                warn!("pid {}: sem {id} destroyed with waiters", self.sched.current());
                self.set_caller_return(-1);
                return SyscallOutcome::Completed;
            }

            self.sem[id].deactivate();
            self.set_caller_return(0);
            SyscallOutcome::Completed
        }

        fn valid_sem(&self, id: u32) -> Option<usize> {
            let id = id as usize;
            match self.sem.get(id) {
                Some(sem) if sem.is_active() => Some(id),
                _ => {
                    warn!("pid {}: bad semaphore id {id}", self.sched.current());
                    None
                }
            }
        }
    }
}
