pub mod proc {
    use std::ops::{Index, IndexMut};

    use crate::wait_queue::wait_queue::Link;
    use crate::x86::x86::{FRAME_SIZE, TrapFrame};

    pub type Pid = usize;

    /// Slot 0 runs the kernel idle loop and is never handed out by fork.
    pub const IDLE_PID: Pid = 0;

    pub const MAX_PCB_NUM: usize = 4;
    pub const KSTACK_SIZE: usize = 0x1000;

    // kernel-side placement of the pcb table. each pcb is a kernel stack whose
    // top holds the saved trap frame, followed by the bookkeeping fields.
    pub const PCB_TABLE_BASE: usize = 0x0010_0000;
    const PCB_STRIDE: usize = KSTACK_SIZE + FRAME_SIZE + 0x40;

    /// Kernel address of the trap frame slot inside pcb `pid`.
    pub fn frame_addr(pid: Pid) -> usize {
        PCB_TABLE_BASE + pid * PCB_STRIDE + KSTACK_SIZE
    }

    /// Kernel stack top of pcb `pid` when it is not inside a trap.
    pub fn stack_top_addr(pid: Pid) -> usize {
        frame_addr(pid) + FRAME_SIZE
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum ProcState {
        Running,
        Runnable,
        Blocked,
        Dead,
    }

    #[derive(Clone, Debug)]
    pub struct Pcb {
        pub stack_top: usize,
        pub prev_stack_top: usize,
        pub state: ProcState,
        pub time_count: u32,
        /// `None` while blocked on a device or semaphore.
        pub sleep_time: Option<u32>,
        pub pid: Pid,
        pub blocked: Link,
        pub regs: TrapFrame,
    }

    impl Pcb {
        pub fn dead(pid: Pid) -> Pcb {
            Pcb {
                stack_top: stack_top_addr(pid),
                prev_stack_top: stack_top_addr(pid),
                state: ProcState::Dead,
                time_count: 0,
                sleep_time: None,
                pid,
                blocked: Link::default(),
                regs: TrapFrame::default(),
            }
        }

        pub fn is_dead(&self) -> bool {
            self.state == ProcState::Dead
        }

        /// True once the pcb has been switched away from: its stack_top points
        /// at its own saved frame and prev_stack_top at its resting top.
        pub fn is_parked(&self) -> bool {
            self.stack_top == frame_addr(self.pid) && self.prev_stack_top == stack_top_addr(self.pid)
        }

        pub fn is_sleeping(&self) -> bool {
            self.state == ProcState::Blocked && self.sleep_time.is_some()
        }
    }

    /// Fixed-size table of pcbs, indexed by pid.
    pub struct ProcessTable {
        pcbs: Vec<Pcb>,
    }

    impl ProcessTable {
        pub fn new(slots: usize) -> ProcessTable {
            ProcessTable {
                pcbs: (0..slots).map(Pcb::dead).collect(),
            }
        }

        pub fn len(&self) -> usize {
            self.pcbs.len()
        }

        pub fn get(&self, pid: Pid) -> Option<&Pcb> {
            self.pcbs.get(pid)
        }

        pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
            self.pcbs.get_mut(pid)
        }

        pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
            self.pcbs.iter()
        }

        pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pcb> {
            self.pcbs.iter_mut()
        }

        /// First free slot, if any. The idle slot is never free.
        pub fn find_dead(&self) -> Option<Pid> {
            self.pcbs
                .iter()
                .position(|pcb| pcb.pid != IDLE_PID && pcb.is_dead())
        }

        pub fn count(&self, state: ProcState) -> usize {
            self.pcbs.iter().filter(|pcb| pcb.state == state).count()
        }
    }

    impl Index<Pid> for ProcessTable {
        type Output = Pcb;

        fn index(&self, pid: Pid) -> &Pcb {
            &self.pcbs[pid]
        }
    }

    impl IndexMut<Pid> for ProcessTable {
        fn index_mut(&mut self, pid: Pid) -> &mut Pcb {
            &mut self.pcbs[pid]
        }
    }

}
