//! Flash programming engine.
//!
//! Drives the CH32V20x flash controller in fast page mode: 256-byte erase
//! and program units, the page loaded one word at a time and read back after
//! the commit. All register access goes through the abstract access layer.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProgrammerError;
use crate::image::padded_blocks;
use crate::poll::{CLEAR_BUSY_POLL, Delay, FLASH_READY_POLL, Poll, PollOutcome};
use crate::protocol::*;
use crate::target::Target;
use crate::transport::RvswdTransport;

/// Progress callback: message and percentage (0..=100).
pub type ProgressFn<'a> = dyn FnMut(&str, u8) + 'a;

fn check_aligned(address: u32, align: u32) -> Result<(), ProgrammerError> {
    if address % align != 0 {
        return Err(ProgrammerError::UnalignedAddress { address, align });
    }
    Ok(())
}

/// Reject images whose padded block span does not fit below 4 GiB.
fn check_range(address: u32, len: usize) -> Result<(), ProgrammerError> {
    let span = len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    if address as u64 + span as u64 > u32::MAX as u64 + 1 {
        return Err(ProgrammerError::AddressOutOfRange { address, len });
    }
    Ok(())
}

/// Percentage of `offset` into `len`, truncated.
fn percent(offset: usize, len: usize) -> u8 {
    (offset * 100 / len) as u8
}

impl<T: RvswdTransport, D: Delay> Target<T, D> {
    /// Poll FLASH_STATR until BSY clears.
    pub fn wait_flash_ready(&mut self) -> Result<(), ProgrammerError> {
        let outcome = FLASH_READY_POLL.poll(self, |target, attempt| -> Result<_, ProgrammerError> {
            let status = target.read_memory_word(FLASH_STATR)?;
            if status & FLASH_STATR_BSY == 0 {
                return Ok(Poll::Ready(()));
            }
            debug!(statr = %format!("0x{:08X}", status), attempt, "Flash busy");
            Ok(Poll::Pending(status))
        })?;

        match outcome {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::TimedOut(status) => {
                error!(statr = %format!("0x{:08X}", status), "Flash busy timeout");
                Err(ProgrammerError::FlashBusyTimeout { status })
            }
        }
    }

    /// Spin until WRBUSY clears. Unbounded: a single word write completes
    /// within a few link round trips.
    pub fn wait_flash_write(&mut self) -> Result<(), ProgrammerError> {
        while self.read_memory_word(FLASH_STATR)? & FLASH_STATR_WRBUSY != 0 {}
        Ok(())
    }

    /// Whether FLASH_CTLR currently reports LOCK.
    pub fn is_flash_locked(&mut self) -> Result<bool, ProgrammerError> {
        Ok(self.read_memory_word(FLASH_CTLR)? & FLASH_CTLR_LOCK != 0)
    }

    /// Enter the key pair into KEYR, OBKEYR and MODEKEYR, then check LOCK.
    pub fn unlock_flash(&mut self) -> Result<(), ProgrammerError> {
        let before = self.read_memory_word(FLASH_CTLR)?;
        debug!(ctlr = %format!("0x{:08X}", before), "Unlocking flash");

        for register in FLASH_KEY_REGISTERS {
            self.write_memory_word(register, FLASH_KEY1)?;
            self.write_memory_word(register, FLASH_KEY2)?;
        }

        let control = self.read_memory_word(FLASH_CTLR)?;
        if control & FLASH_CTLR_LOCK != 0 {
            error!(ctlr = %format!("0x{:08X}", control), "Flash still locked");
            return Err(ProgrammerError::UnlockFailed { control });
        }
        info!("Flash unlocked");
        Ok(())
    }

    /// Set LOCK in FLASH_CTLR. No-op when already locked.
    pub fn lock_flash(&mut self) -> Result<(), ProgrammerError> {
        let control = self.read_memory_word(FLASH_CTLR)?;
        if control & FLASH_CTLR_LOCK != 0 {
            warn!("Target flash already locked");
            return Ok(());
        }

        self.write_memory_word(FLASH_CTLR, control | FLASH_CTLR_LOCK)?;

        let control = self.read_memory_word(FLASH_CTLR)?;
        if control & FLASH_CTLR_LOCK == 0 {
            error!(ctlr = %format!("0x{:08X}", control), "Flash did not lock");
            return Err(ProgrammerError::LockFailed { control });
        }
        info!("Flash locked");
        Ok(())
    }

    /// Fast-erase the 256-byte block at `address`.
    pub fn erase_block(&mut self, address: u32) -> Result<(), ProgrammerError> {
        check_aligned(address, BLOCK_SIZE as u32)?;
        let erase_failed = |source: ProgrammerError| ProgrammerError::EraseFailed {
            address,
            source: Box::new(source),
        };

        self.wait_flash_ready().map_err(erase_failed)?;
        self.write_memory_word(FLASH_CTLR, FLASH_CTLR_FTER)?;
        self.write_memory_word(FLASH_ADDR, address)?;
        self.write_memory_word(FLASH_CTLR, FLASH_CTLR_FTER | FLASH_CTLR_STRT)?;
        self.wait_flash_ready().map_err(erase_failed)?;
        self.write_memory_word(FLASH_CTLR, 0)?;

        debug!(address = %format!("0x{:08X}", address), "Block erased");
        Ok(())
    }

    /// Fast-program the 256-byte block at `address` and verify it.
    ///
    /// The block must already be erased.
    pub fn write_block(&mut self, address: u32, data: &[u8; BLOCK_SIZE]) -> Result<(), ProgrammerError> {
        check_aligned(address, BLOCK_SIZE as u32)?;
        let program_failed = |source: ProgrammerError| ProgrammerError::ProgramFailed {
            address,
            source: Box::new(source),
        };

        let mut written = [0u32; BLOCK_WORDS];
        LittleEndian::read_u32_into(data, &mut written);

        self.wait_flash_ready().map_err(program_failed)?;
        self.write_memory_word(FLASH_CTLR, FLASH_CTLR_FTPG)?;
        self.write_memory_word(FLASH_ADDR, address)?;

        // One word at a time; the page buffer accepts the next word only
        // after WRBUSY drops.
        for (i, word) in written.iter().enumerate() {
            self.write_memory_word(address + (i * 4) as u32, *word)?;
            self.wait_flash_write()?;
        }

        self.write_memory_word(FLASH_CTLR, FLASH_CTLR_FTPG | FLASH_CTLR_PGSTRT)?;
        self.wait_flash_ready().map_err(program_failed)?;
        self.write_memory_word(FLASH_CTLR, 0)?;
        self.sleep_ms(1);

        let mut readback = [0u32; BLOCK_WORDS];
        for (i, word) in readback.iter_mut().enumerate() {
            *word = self.read_memory_word(address + (i * 4) as u32)?;
        }

        if written != readback {
            error!(address = %format!("0x{:08X}", address), "Write block mismatch");
            error!("Write:");
            for (i, word) in written.iter().enumerate() {
                error!("{:x}: {:08x}", i, word);
            }
            error!("Read:");
            for (i, word) in readback.iter().enumerate() {
                error!("{:x}: {:08x}", i, word);
            }
            return Err(ProgrammerError::VerifyMismatch {
                address,
                written: Box::new(written),
                readback: Box::new(readback),
            });
        }

        debug!(address = %format!("0x{:08X}", address), "Block written and verified");
        Ok(())
    }

    /// Erase and program `data` starting at `address`, block by block.
    ///
    /// `address` only has to be 64-byte aligned here, but every block
    /// operation requires 256-byte alignment, so a start address that is not
    /// a multiple of 256 fails on the first block. The final partial block is
    /// zero-padded. Flash already written when a block fails is left as is.
    #[instrument(skip(self, data, progress), fields(address = %format!("0x{:08X}", address), len = data.len()))]
    pub fn write_image(
        &mut self,
        address: u32,
        data: &[u8],
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), ProgrammerError> {
        check_aligned(address, IMAGE_ALIGN)?;
        check_range(address, data.len())?;
        if address % BLOCK_SIZE as u32 != 0 {
            warn!("Image start is 64-byte aligned but not block aligned");
        }

        for (offset, block) in padded_blocks(data) {
            let block_address = address + offset as u32;

            progress(
                &format!("Writing at 0x{:08x}", block_address),
                percent(offset, data.len()),
            );

            self.erase_block(block_address).inspect_err(|e| {
                error!(address = %format!("0x{:08X}", block_address), "Failed to erase flash: {}", e)
            })?;
            self.write_block(block_address, &block).inspect_err(|e| {
                error!(address = %format!("0x{:08X}", block_address), "Failed to write flash: {}", e)
            })?;
        }

        info!(blocks = data.len().div_ceil(BLOCK_SIZE), "Image written");
        Ok(())
    }

    /// Recover a flash controller left busy by an interrupted operation.
    ///
    /// Pending EOP and WRPRTERR flags are cleared (write-1-to-clear); a plain
    /// write-busy state is waited out. Busy with no recognizable cause is an
    /// error carrying STATR and CTLR.
    pub fn clear_running_operations(&mut self) -> Result<(), ProgrammerError> {
        let outcome = CLEAR_BUSY_POLL.poll(self, |target, _| -> Result<_, ProgrammerError> {
            let status = target.read_memory_word(FLASH_STATR)?;
            if status & FLASH_STATR_BSY == 0 {
                return Ok(Poll::Ready(()));
            }

            if status & FLASH_STATR_EOP != 0 {
                debug!("Clearing EOP flag");
                target.write_memory_word(FLASH_STATR, status | FLASH_STATR_EOP)?;
            } else if status & FLASH_STATR_WRPRTERR != 0 {
                debug!("Clearing WRPRTERR flag");
                target.write_memory_word(FLASH_STATR, status | FLASH_STATR_WRPRTERR)?;
            } else if status & FLASH_STATR_WRBUSY != 0 {
                debug!("Waiting for busy flag to clear");
            } else {
                let control = target.read_memory_word(FLASH_CTLR)?;
                error!(
                    statr = %format!("0x{:08X}", status),
                    ctlr = %format!("0x{:08X}", control),
                    "Target busy for unknown reason"
                );
                return Err(ProgrammerError::UnknownBusyState { status, control });
            }
            Ok(Poll::Pending(status))
        })?;

        match outcome {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::TimedOut(status) => {
                error!("Timeout while waiting for target to clear busy flag");
                Err(ProgrammerError::ClearTimeout { status })
            }
        }
    }
}
