pub mod sched {
    use log::debug;

    use crate::proc::proc::{IDLE_PID, Pid, ProcState, ProcessTable};

    /// Default quantum, in timer ticks.
    pub const MAX_TIME_COUNT: u32 = 16;

    /// A scheduling decision: `from` was current on entry, `to` runs next.
    /// `from == to` is legal when the same process is picked again.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Switch {
        pub from: Pid,
        pub to: Pid,
    }

    /// Round-robin over the process table with slot 0 as the idle fallback.
    ///
    /// The scheduler owns only the current slot and the quantum; per-process
    /// accounting (`time_count`, `sleep_time`, `state`) lives in the pcbs.
    #[derive(Clone, Debug)]
    pub struct Scheduler {
        current: Pid,
        quantum: u32,
    }

    impl Scheduler {
        pub fn new(quantum: u32) -> Scheduler {
            Scheduler {
                current: IDLE_PID,
                quantum,
            }
        }

        pub fn current(&self) -> Pid {
            self.current
        }

        pub fn quantum(&self) -> u32 {
            self.quantum
        }

        /// Timer path: age sleepers, then decide whether the current process
        /// keeps the cpu.
        pub fn tick(&mut self, table: &mut ProcessTable) -> Option<Switch> {
            for pid in self.age_sleepers(table) {
                debug!("pid {pid} woke from sleep");
            }
            self.preempt(table)
        }

        /// Count down every timed sleeper; those reaching zero become
        /// runnable. The current pcb is never asleep, so it is skipped.
        pub fn age_sleepers(&self, table: &mut ProcessTable) -> Vec<Pid> {
            let mut woken = Vec::new();
            for pcb in table.iter_mut() {
                if pcb.pid == self.current || pcb.state != ProcState::Blocked {
                    continue;
                }
                let Some(left) = pcb.sleep_time else {
                    continue;
                };

                let left = left.saturating_sub(1);
                if left == 0 {
                    pcb.state = ProcState::Runnable;
                    pcb.sleep_time = None;
                    woken.push(pcb.pid);
                } else {
                    pcb.sleep_time = Some(left);
                }
            }
            woken
        }

        /// Quantum accounting without aging. The idle slot gives up the cpu
        /// as soon as anything else can run.
        pub fn preempt(&mut self, table: &mut ProcessTable) -> Option<Switch> {
            let idle_with_work = self.current == IDLE_PID && self.has_candidate(table);
            let pcb = &mut table[self.current];

            if pcb.state == ProcState::Running && pcb.time_count < self.quantum && !idle_with_work {
                pcb.time_count += 1;
                return None;
            }

            Some(self.reschedule(table))
        }

        /// Pick the next process unconditionally. A RUNNING caller goes back
        /// to RUNNABLE with a fresh quantum; a blocked or dead one is left
        /// as it is.
        pub fn reschedule(&mut self, table: &mut ProcessTable) -> Switch {
            let from = self.current;
            let pcb = &mut table[from];
            if pcb.state == ProcState::Running {
                pcb.state = ProcState::Runnable;
                pcb.time_count = 0;
            }

            let to = self.select_next(table);
            let next = &mut table[to];
            next.state = ProcState::Running;
            next.time_count = 1;
            self.current = to;

            Switch { from, to }
        }

        /// Search starting after the current slot, wrapping around, for a
        /// RUNNABLE non-idle pcb. The current slot is looked at last; the
        /// idle slot only when nothing else qualifies.
        pub fn select_next(&self, table: &ProcessTable) -> Pid {
            let n = table.len();
            let mut pid = (self.current + 1) % n;
            while pid != self.current {
                if pid != IDLE_PID && table[pid].state == ProcState::Runnable {
                    break;
                }
                pid = (pid + 1) % n;
            }

            if table[pid].state == ProcState::Runnable {
                pid
            } else {
                IDLE_PID
            }
        }

        fn has_candidate(&self, table: &ProcessTable) -> bool {
            table
                .iter()
                .any(|pcb| pcb.pid != IDLE_PID && pcb.state == ProcState::Runnable)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn table(states: &[ProcState]) -> ProcessTable {
            let mut table = ProcessTable::new(states.len());
            for (pid, state) in states.iter().enumerate() {
                table[pid].state = *state;
            }
            table
        }

        #[test]
        fn falls_back_to_idle() {
            use ProcState::*;
            let mut table = table(&[Running, Blocked, Dead]);
            let mut sched = Scheduler::new(4);
            assert_eq!(sched.select_next(&table), IDLE_PID);
            table[1].state = Runnable;
            assert_eq!(sched.reschedule(&mut table), Switch { from: 0, to: 1 });
            assert_eq!(table[0].state, Runnable);
            assert_eq!(table[1].time_count, 1);
        }

        #[test]
        fn current_is_reselected_last() {
            use ProcState::*;
            let mut table = table(&[Runnable, Running, Blocked, Dead]);
            let mut sched = Scheduler::new(2);
            sched.current = 1;
            let switch = sched.reschedule(&mut table);
            assert_eq!(switch.to, 1);
            assert_eq!(table[1].state, Running);
        }

        #[test]
        fn sleepers_count_down() {
            use ProcState::*;
            let mut table = table(&[Running, Blocked, Blocked]);
            table[1].sleep_time = Some(2);
            let sched = Scheduler::new(4);
            assert!(sched.age_sleepers(&mut table).is_empty());
            assert_eq!(table[1].sleep_time, Some(1));
            assert_eq!(sched.age_sleepers(&mut table), vec![1]);
            assert_eq!(table[1].state, Runnable);
            // blocked without a deadline never ages
            assert_eq!(table[2].state, Blocked);
        }
    }
}
