//! Abstract access layer.
//!
//! The RVSWD link only addresses debug module registers. CPU registers are
//! reached through abstract commands, and target memory through a two
//! instruction load/store sequence executed from the program buffer with the
//! address in a1 and the value in a0.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{error, trace};

use crate::error::ProgrammerError;
use crate::poll::Delay;
use crate::protocol::*;
use crate::target::Target;
use crate::transport::RvswdTransport;

/// Maximum program buffer payload in bytes.
pub const MAX_DEBUG_CODE: usize = PROGBUF_WORDS * 4;

/// Pack instruction bytes into zero-padded little-endian program buffer words.
pub fn pack_program(code: &[u8]) -> Result<[u32; PROGBUF_WORDS], ProgrammerError> {
    if code.len() > MAX_DEBUG_CODE {
        return Err(ProgrammerError::ProgramTooLarge {
            size: code.len(),
            max: MAX_DEBUG_CODE,
        });
    }
    if code.len() % 2 != 0 {
        return Err(ProgrammerError::InvalidProgramSize { size: code.len() });
    }

    let mut bytes = [0u8; MAX_DEBUG_CODE];
    bytes[..code.len()].copy_from_slice(code);

    let mut words = [0u32; PROGBUF_WORDS];
    LittleEndian::read_u32_into(&bytes, &mut words);
    Ok(words)
}

impl<T: RvswdTransport, D: Delay> Target<T, D> {
    /// Write a CPU register (GPR or CSR number space).
    pub fn write_cpu_reg(&mut self, regno: u16, value: u32) -> Result<(), ProgrammerError> {
        let command = AbstractCommand::AccessRegister {
            regno,
            direction: Direction::Write,
        };
        self.dm_write(DM_DATA0, value)?;
        self.dm_write(DM_COMMAND, command.encode())?;
        Ok(())
    }

    /// Read a CPU register (GPR or CSR number space).
    pub fn read_cpu_reg(&mut self, regno: u16) -> Result<u32, ProgrammerError> {
        let command = AbstractCommand::AccessRegister {
            regno,
            direction: Direction::Read,
        };
        self.dm_write(DM_COMMAND, command.encode())?;
        Ok(self.dm_read(DM_DATA0)?)
    }

    /// Load `code` into the program buffer and execute it.
    pub fn run_debug_code(&mut self, code: &[u8]) -> Result<(), ProgrammerError> {
        let words = pack_program(code).inspect_err(|e| error!("{}", e))?;

        for (slot, word) in (DM_PROGBUF0..).zip(words) {
            self.dm_write(slot, word)?;
        }
        self.dm_write(DM_COMMAND, AbstractCommand::RunProgramBuffer.encode())?;
        Ok(())
    }

    /// Read one 32-bit word of target memory.
    pub fn read_memory_word(&mut self, address: u32) -> Result<u32, ProgrammerError> {
        self.write_cpu_reg(REG_A1, address)?;
        self.run_debug_code(&READ_MEMORY_CODE)?;
        let value = self.read_cpu_reg(REG_A0)?;
        trace!(address = %format!("0x{:08X}", address), value = %format!("0x{:08X}", value), "Memory read");
        Ok(value)
    }

    /// Write one 32-bit word of target memory.
    pub fn write_memory_word(&mut self, address: u32, value: u32) -> Result<(), ProgrammerError> {
        trace!(address = %format!("0x{:08X}", address), value = %format!("0x{:08X}", value), "Memory write");
        self.write_cpu_reg(REG_A0, value)?;
        self.write_cpu_reg(REG_A1, address)?;
        self.run_debug_code(&WRITE_MEMORY_CODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::tests::RecordingDelay;
    use crate::transport::SimulatedTarget;

    #[test]
    fn test_pack_program_pads_with_zero() {
        let words = pack_program(&READ_MEMORY_CODE).unwrap();
        assert_eq!(words[0], 0x9002_4188);
        assert!(words[1..].iter().all(|&w| w == 0));
    }

    #[test]
    fn test_pack_program_rejects_oversize() {
        let err = pack_program(&[0u8; 34]).unwrap_err();
        assert!(matches!(
            err,
            ProgrammerError::ProgramTooLarge { size: 34, max: 32 }
        ));
    }

    #[test]
    fn test_pack_program_rejects_odd_length() {
        let err = pack_program(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, ProgrammerError::InvalidProgramSize { size: 3 }));
    }

    #[test]
    fn test_pack_program_full_buffer() {
        let code: Vec<u8> = (0..32).collect();
        let words = pack_program(&code).unwrap();
        assert_eq!(words[0], 0x0302_0100);
        assert_eq!(words[7], 0x1F1E_1D1C);
    }

    #[test]
    fn test_run_debug_code_fills_all_slots() {
        let mut sim = SimulatedTarget::halted();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        target.run_debug_code(&WRITE_MEMORY_CODE).unwrap();
        assert_eq!(sim.progbuf()[0], 0x9002_C188);
        assert!(sim.progbuf()[1..].iter().all(|&w| w == 0));
        assert_eq!(sim.last_command(), Some(0x0024_0000));
    }

    #[test]
    fn test_rejected_program_touches_nothing() {
        let mut sim = SimulatedTarget::halted();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        assert!(target.run_debug_code(&[0u8; 40]).is_err());
        assert_eq!(sim.register_write_count(), 0);
    }

    #[test]
    fn test_cpu_register_round_trip() {
        let mut sim = SimulatedTarget::halted();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        target.write_cpu_reg(REGS_GPR + 5, 0xDEAD_BEEF).unwrap();
        assert_eq!(target.read_cpu_reg(REGS_GPR + 5).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_memory_word_access() {
        let mut sim = SimulatedTarget::halted();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        target.write_memory_word(0x2000_0010, 0x1234_5678).unwrap();
        assert_eq!(target.read_memory_word(0x2000_0010).unwrap(), 0x1234_5678);
        assert_eq!(sim.ram_word(0x2000_0010), Some(0x1234_5678));
    }
}
