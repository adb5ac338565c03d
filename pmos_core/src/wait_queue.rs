pub mod wait_queue {
    use crate::proc::proc::{Pid, ProcessTable};

    /// Intrusive link stored in every pcb. A pcb can be on at most one
    /// queue at a time, tracked by `queued`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Link {
        pub prev: Option<Pid>,
        pub next: Option<Pid>,
        pub queued: bool,
    }

    /// FIFO of blocked pcbs threaded through their `blocked` links.
    ///
    /// The queue only owns head and tail indices; the links live in the
    /// process table, so every operation takes the table explicitly.
    #[derive(Clone, Debug, Default)]
    pub struct WaitQueue {
        head: Option<Pid>,
        tail: Option<Pid>,
        len: usize,
    }

    impl WaitQueue {
        pub const fn new() -> WaitQueue {
            WaitQueue {
                head: None,
                tail: None,
                len: 0,
            }
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub fn is_empty(&self) -> bool {
            self.head.is_none()
        }

        pub fn front(&self) -> Option<Pid> {
            self.head
        }

        pub fn push_back(&mut self, table: &mut ProcessTable, pid: Pid) {
            assert!(!table[pid].blocked.queued, "pcb {pid} is already on a wait queue");

            table[pid].blocked = Link {
                prev: self.tail,
                next: None,
                queued: true,
            };
            match self.tail {
                Some(tail) => table[tail].blocked.next = Some(pid),
                None => self.head = Some(pid),
            }
            self.tail = Some(pid);
            self.len += 1;
        }

        pub fn pop_front(&mut self, table: &mut ProcessTable) -> Option<Pid> {
            let pid = self.head?;
            let next = table[pid].blocked.next;

            match next {
                Some(next) => table[next].blocked.prev = None,
                None => self.tail = None,
            }
            self.head = next;
            table[pid].blocked = Link::default();
            self.len -= 1;

            Some(pid)
        }

        /// Queued pids, oldest first.
        pub fn pids(&self, table: &ProcessTable) -> Vec<Pid> {
            let mut pids = Vec::with_capacity(self.len);
            let mut cursor = self.head;
            while let Some(pid) = cursor {
                pids.push(pid);
                cursor = table[pid].blocked.next;
            }
            pids
        }

        pub fn contains(&self, table: &ProcessTable, pid: Pid) -> bool {
            self.pids(table).contains(&pid)
        }
    }

}
