pub mod machine {
    use std::io::{Error, ErrorKind};

    use log::trace;
    use rand::Rng;
    use rand::rngs::ThreadRng;

    use crate::device::device::{KeyboardDevice, Screen};
    use crate::engine::engine::{Engine, Step};
    use crate::kernel::kernel::Kernel;
    use crate::proc::proc::{IDLE_PID, ProcState};
    use crate::x86::x86::{TrapFrame, Vector};

    /// Instructions retired between two timer interrupts.
    pub const DEFAULT_TIMER_INTERVAL: u32 = 100;

    /// A single cpu with a latched interrupt controller, running the kernel.
    ///
    /// `cpu` is the live register file. Between traps it belongs to the
    /// current process; every trap hands it to [`Kernel::irq_handle`], which
    /// saves it and puts back the context of whoever runs next.
    pub struct Machine<S: Screen, K: KeyboardDevice, R: Rng = ThreadRng> {
        pub kernel: Kernel<S, K>,
        pub cpu: TrapFrame,
        engine: Engine<R>,
        timer_interval: u32,
        countdown: u32,
        timer_pending: bool,
        keyboard_pending: usize,
        ticks: u64,
        retired: u64,
    }

    impl<S: Screen, K: KeyboardDevice> Machine<S, K, ThreadRng> {
        pub fn new(kernel: Kernel<S, K>, timer_interval: u32) -> Machine<S, K, ThreadRng> {
            Machine::with_engine(kernel, Engine::new(), timer_interval)
        }
    }

    impl<S: Screen, K: KeyboardDevice, R: Rng> Machine<S, K, R> {
        pub fn with_engine(kernel: Kernel<S, K>, engine: Engine<R>, timer_interval: u32) -> Machine<S, K, R> {
            let interval = timer_interval.max(1);
            Machine {
                cpu: kernel.resume_frame(),
                kernel,
                engine,
                timer_interval: interval,
                countdown: interval,
                timer_pending: false,
                keyboard_pending: 0,
                ticks: 0,
                retired: 0,
            }
        }

        /// Latch one keyboard interrupt per scancode queued on the device.
        pub fn raise_keyboard(&mut self, count: usize) {
            self.keyboard_pending += count;
        }

        pub fn raise_timer(&mut self) {
            self.timer_pending = true;
        }

        pub fn ticks(&self) -> u64 {
            self.ticks
        }

        pub fn retired(&self) -> u64 {
            self.retired
        }

        pub fn is_idle(&self) -> bool {
            self.kernel.current() == IDLE_PID
        }

        /// One machine cycle: deliver a latched interrupt if IF allows it,
        /// otherwise run one user instruction, or sit in `hlt` when the idle
        /// loop is current.
        pub fn step(&mut self) -> Result<(), Error> {
            if self.kernel.is_halted() {
                return Err(Error::new(ErrorKind::Other, "kernel is halted"));
            }

            if self.cpu.interrupts_enabled() && self.kernel.interrupts_enabled() {
                if self.keyboard_pending > 0 {
                    self.keyboard_pending -= 1;
                    return self.trap(Vector::Keyboard as u32);
                }
                if self.timer_pending {
                    self.timer_pending = false;
                    self.ticks += 1;
                    return self.trap(Vector::Timer as u32);
                }
            }

            if self.is_idle() {
                // hlt: nothing happens until the next interrupt
                self.countdown = self.timer_interval;
                self.timer_pending = true;
                return Ok(());
            }

            let step = self.engine.step(&mut self.cpu, &self.kernel.gdt, &mut self.kernel.mem);
            self.retired += 1;
            self.countdown -= 1;
            if self.countdown == 0 {
                self.countdown = self.timer_interval;
                self.timer_pending = true;
            }

            match step {
                Step::Retired => Ok(()),
                Step::Halt => {
                    self.timer_pending = true;
                    Ok(())
                }
                Step::Trap(vector) => self.trap(vector),
            }
        }

        fn trap(&mut self, vector: u32) -> Result<(), Error> {
            trace!("raise {vector:#x}");
            self.cpu.irq = vector;
            self.kernel.irq_handle(&mut self.cpu)
        }

        /// Run up to `cycles` cycles, stopping early once no process besides
        /// idle is left and nothing is latched.
        pub fn run(&mut self, cycles: usize) -> Result<usize, Error> {
            for done in 0..cycles {
                if self.is_finished() {
                    return Ok(done);
                }
                self.step()?;
            }
            Ok(cycles)
        }

        /// Run until `done` holds, for at most `cycles` cycles. Returns
        /// whether the condition was reached.
        pub fn run_until<F>(&mut self, cycles: usize, mut done: F) -> Result<bool, Error>
        where
            F: FnMut(&Kernel<S, K>) -> bool,
        {
            for _ in 0..cycles {
                if done(&self.kernel) {
                    return Ok(true);
                }
                self.step()?;
            }
            Ok(done(&self.kernel))
        }

        pub fn is_finished(&self) -> bool {
            !self.kernel.has_live_processes() && self.keyboard_pending == 0
        }

        /// Idle with live processes that only a keystroke could release:
        /// nobody is runnable, nobody sleeps and no key is latched.
        pub fn is_stalled(&self) -> bool {
            self.is_idle()
                && self.keyboard_pending == 0
                && self.kernel.has_live_processes()
                && !self
                    .kernel
                    .procs()
                    .iter()
                    .any(|pcb| pcb.pid != IDLE_PID && (pcb.state == ProcState::Runnable || pcb.is_sleeping()))
        }

        pub fn keyboard_pending(&self) -> usize {
            self.keyboard_pending
        }
    }
}
