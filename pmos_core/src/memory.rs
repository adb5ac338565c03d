pub mod memory {
    use std::io::{Error, ErrorKind};

    use crate::proc::proc::Pid;

    /// Default size of one process segment.
    pub const PROC_MEM_SIZE: usize = 0x100000;

    /// Physical memory is one flat arena carved into fixed, equally sized
    /// segments. Slot `i` owns `[(i+1)*seg_size, (i+2)*seg_size)`; the first
    /// segment belongs to the kernel.
    ///
    /// Nothing here knows about selectors: callers translate through the
    /// GDT first and hand in arena addresses.
    pub struct PhysicalMemory {
        pub phys_mem: Vec<u8>,
        seg_size: usize,
    }

    impl PhysicalMemory {
        pub fn new(slots: usize, seg_size: usize) -> Result<PhysicalMemory, Error> {
            if seg_size == 0 {
                return Err(Error::new(ErrorKind::InvalidInput, "segment size must be > 0"));
            }

            let size = slots
                .checked_add(1)
                .and_then(|n| n.checked_mul(seg_size))
                .ok_or_else(|| Error::new(ErrorKind::OutOfMemory, "arena size overflows"))?;

            Ok(PhysicalMemory {
                phys_mem: vec![0; size],
                seg_size,
            })
        }

        pub fn seg_size(&self) -> usize {
            self.seg_size
        }

        pub fn segment_base(&self, pid: Pid) -> usize {
            (pid + 1) * self.seg_size
        }

        pub fn segment(&self, pid: Pid) -> Result<&[u8], Error> {
            let base = self.segment_base(pid);
            self.phys_mem
                .get(base..base + self.seg_size)
                .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "segment out of bounds"))
        }

        /// write copies `data` into the arena at `addr`. The whole range is
        /// bounds-checked before anything is written.
        pub fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), Error> {
            let end = addr
                .checked_add(data.len())
                .ok_or_else(|| Error::new(ErrorKind::Other, "overflow computing write range"))?;
            if end > self.phys_mem.len() {
                return Err(Error::new(ErrorKind::InvalidInput, "write range out of bounds"));
            }

            self.phys_mem[addr..end].copy_from_slice(data);

            Ok(())
        }

        // read clones a byte slice into a new Vec for callers.
        pub fn read(&self, addr: usize, len: usize) -> Result<Vec<u8>, Error> {
            let end = addr
                .checked_add(len)
                .ok_or_else(|| Error::new(ErrorKind::Other, "overflow computing read range"))?;
            if end > self.phys_mem.len() {
                return Err(Error::new(ErrorKind::InvalidInput, "read range out of bounds"));
            }

            Ok(self.phys_mem[addr..end].to_vec())
        }

        pub fn read_u8(&self, addr: usize) -> Result<u8, Error> {
            self.phys_mem
                .get(addr)
                .copied()
                .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "read range out of bounds"))
        }

        pub fn write_u8(&mut self, addr: usize, value: u8) -> Result<(), Error> {
            self.write(addr, &[value])
        }

        // 32-bit accesses are little-endian like the real thing.
        pub fn read_u32(&self, addr: usize) -> Result<u32, Error> {
            let bytes = self.read(addr, 4)?;
            Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }

        pub fn write_u32(&mut self, addr: usize, value: u32) -> Result<(), Error> {
            self.write(addr, &value.to_le_bytes())
        }

        pub fn zero_segment(&mut self, pid: Pid) -> Result<(), Error> {
            let base = self.segment_base(pid);
            self.phys_mem
                .get_mut(base..base + self.seg_size)
                .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "segment out of bounds"))?
                .fill(0);
            Ok(())
        }

        /// Duplicate the whole segment of `src` into the segment of `dst`.
        pub fn copy_segment(&mut self, src: Pid, dst: Pid) -> Result<(), Error> {
            let from = self.segment_base(src);
            let to = self.segment_base(dst);
            let len = self.seg_size;

            if from.max(to) + len > self.phys_mem.len() {
                return Err(Error::new(ErrorKind::InvalidInput, "segment out of bounds"));
            }

            self.phys_mem.copy_within(from..from + len, to);
            Ok(())
        }
    }

}
