pub mod device {
    use crate::proc::proc::{Pid, ProcState, ProcessTable};
    use crate::wait_queue::wait_queue::WaitQueue;

    /// Registry indices of the two standard devices. User code passes the
    /// same numbers as the fd argument of write/read.
    pub const STD_OUT: usize = 0;
    pub const STD_IN: usize = 1;

    pub const MAX_DEV_NUM: usize = 4;
    pub const MAX_SEM_NUM: usize = 4;

    /// Character-cell output surface the console writes to.
    pub trait Screen {
        fn put_char(&mut self, row: usize, col: usize, ch: u8);
        fn scroll_screen(&mut self);
        fn update_cursor(&mut self, row: usize, col: usize);
    }

    /// Scancode source plus its decoder.
    pub trait KeyboardDevice {
        /// Next pending scancode, 0 when nothing is waiting.
        fn get_key_code(&mut self) -> u32;
        /// ASCII for a make code, 0 for keys without one.
        fn get_char(&self, code: u32) -> u8;
    }

    /// Registry entry shared by devices and semaphores: an activity flag,
    /// a signed counter and a FIFO of blocked pcbs.
    ///
    /// `value < 0` holds exactly when the queue is non-empty, and then
    /// `-value` is the number of waiters. Every mutation goes through
    /// [`Device::block`] and [`Device::wake_one`], which keep the two in step.
    #[derive(Clone, Debug, Default)]
    pub struct Device {
        pub state: bool,
        pub value: i32,
        pub pcb: WaitQueue,
    }

    pub type Semaphore = Device;

    impl Device {
        pub fn activate(&mut self, value: i32) {
            self.state = true;
            self.value = value;
            self.pcb = WaitQueue::new();
        }

        pub fn deactivate(&mut self) {
            self.state = false;
            self.value = 0;
            self.pcb = WaitQueue::new();
        }

        pub fn is_active(&self) -> bool {
            self.state
        }

        pub fn has_waiters(&self) -> bool {
            !self.pcb.is_empty()
        }

        pub fn waiters(&self, table: &ProcessTable) -> Vec<Pid> {
            self.pcb.pids(table)
        }

        /// Park `pid` at the tail of the queue, indefinitely.
        pub fn block(&mut self, table: &mut ProcessTable, pid: Pid) {
            self.value -= 1;
            self.pcb.push_back(table, pid);

            let pcb = &mut table[pid];
            pcb.state = ProcState::Blocked;
            pcb.sleep_time = None;
        }

        /// Release the oldest waiter, if any, and make it runnable.
        pub fn wake_one(&mut self, table: &mut ProcessTable) -> Option<Pid> {
            let pid = self.pcb.pop_front(table)?;
            self.value += 1;

            let pcb = &mut table[pid];
            pcb.state = ProcState::Runnable;
            pcb.sleep_time = None;

            Some(pid)
        }

        pub fn is_consistent(&self) -> bool {
            (self.value < 0) == self.has_waiters()
                && (self.value >= 0 || (-self.value) as usize == self.pcb.len())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn counter_tracks_waiters() {
            let mut table = ProcessTable::new(4);
            let mut dev = Device::default();
            dev.activate(0);

            dev.block(&mut table, 1);
            dev.block(&mut table, 2);
            assert_eq!(dev.value, -2);
            assert!(dev.is_consistent());
            assert_eq!(table[1].state, ProcState::Blocked);

            assert_eq!(dev.wake_one(&mut table), Some(1));
            assert_eq!(table[1].state, ProcState::Runnable);
            assert_eq!(dev.wake_one(&mut table), Some(2));
            assert_eq!(dev.value, 0);
            assert!(dev.is_consistent());
            assert_eq!(dev.wake_one(&mut table), None);
        }
    }
}
