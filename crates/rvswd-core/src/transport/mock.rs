//! Simulated CH32V20x target for testing.
//!
//! Models the debug module (halt/resume/reset state, DATA0, abstract
//! commands, program buffer), the flash controller in fast page mode and the
//! option bytes block, closely enough to run every engine sequence end to
//! end. Faults can be injected to exercise timeout and recovery paths.

use std::collections::HashMap;

use super::traits::{RvswdTransport, TransportError};
use crate::protocol::*;

/// Word a fast-erased CH32V20x flash page reads back as.
pub const ERASED_WORD: u32 = 0xE339_E339;

/// Factory option bytes: RDPR unprotected, all user bits set, no write protection.
pub const DEFAULT_OPTION_BYTES: [u32; OPTION_BYTES_WORDS] =
    [0x00FF_5AA5, 0x00FF_00FF, 0x00FF_00FF, 0x00FF_00FF];

/// Reads of FLASH_STATR that report BSY after an erase or page program starts.
const OPERATION_BUSY_READS: u32 = 2;

/// DMSTATUS bits that are always set: authenticated, version 0.13.
const DMSTATUS_BASE: u32 = (1 << 7) | 0x2;

/// ABSTRACTCS cmderr value for "not in the right state".
const CMDERR_HALT_RESUME: u32 = 4;

fn word_of(code: [u8; 4]) -> u32 {
    u32::from_le_bytes(code)
}

#[derive(Debug, Default)]
struct Faults {
    never_halt: bool,
    never_resume: bool,
    never_reset: bool,
    disconnected: bool,
    init_fails: bool,
    reject_keys: bool,
    ignore_lock: bool,
    stuck_busy_after_pages: Option<usize>,
    corrupt_readback: HashMap<u32, u32>,
}

/// Unlock sequence progress for one key register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum KeyStage {
    #[default]
    Idle,
    FirstKey,
}

/// Simulated target implementing `RvswdTransport`.
#[derive(Debug)]
pub struct SimulatedTarget {
    faults: Faults,

    // Debug module
    dmcontrol: u32,
    halted: bool,
    have_reset: bool,
    data0: u32,
    data1: u32,
    cmderr: u32,
    progbuf: [u32; PROGBUF_WORDS],
    cpu_regs: HashMap<u16, u32>,
    last_command: Option<u32>,

    // Flash controller
    statr_flags: u32,
    ctlr: u32,
    addr: u32,
    keyr_stage: KeyStage,
    obkeyr_stage: KeyStage,
    modekeyr_stage: KeyStage,
    fast_unlocked: bool,
    page_buffer: [Option<u32>; BLOCK_WORDS],
    write_busy_pending: bool,
    operation_busy_reads: u32,
    write_busy_reads: u32,
    stale_busy: bool,
    busy_forever: bool,

    // Memory
    flash: Vec<u32>,
    ram: HashMap<u32, u32>,
    option_bytes: [u32; OPTION_BYTES_WORDS],

    // Statistics
    init_count: usize,
    link_reset_count: usize,
    reset_count: usize,
    dmstatus_reads: usize,
    statr_reads: usize,
    register_writes: usize,
    pages_erased: usize,
    pages_programmed: usize,
    memory_writes: Vec<(u32, u32)>,
}

impl SimulatedTarget {
    /// Target with a running core, locked flash and fully erased code flash.
    pub fn new() -> Self {
        Self {
            faults: Faults::default(),
            dmcontrol: 0,
            halted: false,
            have_reset: false,
            data0: 0,
            data1: 0,
            cmderr: 0,
            progbuf: [0; PROGBUF_WORDS],
            cpu_regs: HashMap::new(),
            last_command: None,
            statr_flags: 0,
            ctlr: FLASH_CTLR_LOCK,
            addr: 0,
            keyr_stage: KeyStage::Idle,
            obkeyr_stage: KeyStage::Idle,
            modekeyr_stage: KeyStage::Idle,
            fast_unlocked: false,
            page_buffer: [None; BLOCK_WORDS],
            write_busy_pending: false,
            operation_busy_reads: 0,
            write_busy_reads: 0,
            stale_busy: false,
            busy_forever: false,
            flash: vec![ERASED_WORD; FLASH_SIZE / 4],
            ram: HashMap::new(),
            option_bytes: DEFAULT_OPTION_BYTES,
            init_count: 0,
            link_reset_count: 0,
            reset_count: 0,
            dmstatus_reads: 0,
            statr_reads: 0,
            register_writes: 0,
            pages_erased: 0,
            pages_programmed: 0,
            memory_writes: Vec::new(),
        }
    }

    /// Target whose core is already halted.
    pub fn halted() -> Self {
        let mut sim = Self::new();
        sim.halted = true;
        sim.dmcontrol = DMCONTROL_ENABLE;
        sim
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// Replace the option bytes block.
    pub fn set_option_bytes(&mut self, words: [u32; OPTION_BYTES_WORDS]) {
        self.option_bytes = words;
    }

    /// Preload code flash contents starting at `address`.
    pub fn load_flash(&mut self, address: u32, data: &[u8]) {
        for (i, chunk) in data.chunks(4).enumerate() {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            if let Some(index) = self.flash_index(address + (i * 4) as u32) {
                self.flash[index] = u32::from_le_bytes(bytes);
            }
        }
    }

    /// Leave the flash controller unlocked, as a previous aborted run would.
    pub fn set_flash_unlocked(&mut self) {
        self.ctlr &= !FLASH_CTLR_LOCK;
        self.fast_unlocked = true;
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Ignore halt requests.
    pub fn fault_never_halt(&mut self) {
        self.faults.never_halt = true;
    }

    /// Ignore resume requests.
    pub fn fault_never_resume(&mut self) {
        self.faults.never_resume = true;
    }

    /// Never report havereset after a core reset.
    pub fn fault_never_reset(&mut self) {
        self.faults.never_reset = true;
    }

    /// Fail every register access.
    pub fn fault_disconnect(&mut self) {
        self.faults.disconnected = true;
    }

    /// Fail link initialization.
    pub fn fault_init_fails(&mut self) {
        self.faults.init_fails = true;
    }

    /// Ignore unlock keys.
    pub fn fault_reject_keys(&mut self) {
        self.faults.reject_keys = true;
    }

    /// Drop CTLR writes that set LOCK.
    pub fn fault_ignore_lock(&mut self) {
        self.faults.ignore_lock = true;
    }

    /// Report BSY forever once `pages` page programs have completed and the
    /// controller has been returned to idle.
    pub fn fault_stuck_busy_after_pages(&mut self, pages: usize) {
        self.faults.stuck_busy_after_pages = Some(pages);
        if pages == 0 {
            self.busy_forever = true;
        }
    }

    /// XOR `mask` into every read of the flash word at `address`.
    pub fn fault_corrupt_readback(&mut self, address: u32, mask: u32) {
        self.faults.corrupt_readback.insert(address, mask);
    }

    /// Leave BSY set from an interrupted operation, with `flags`
    /// (EOP and/or WRPRTERR, or none) pending in FLASH_STATR.
    pub fn fault_stale_busy(&mut self, flags: u32) {
        self.stale_busy = true;
        self.statr_flags |= flags & (FLASH_STATR_EOP | FLASH_STATR_WRPRTERR);
    }

    /// Report BSY | WRBUSY for the next `reads` status reads
    /// (`u32::MAX` for never clearing).
    pub fn fault_write_busy_reads(&mut self, reads: u32) {
        self.write_busy_reads = reads;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn have_reset(&self) -> bool {
        self.have_reset
    }

    pub fn dmcontrol(&self) -> u32 {
        self.dmcontrol
    }

    pub fn progbuf(&self) -> &[u32; PROGBUF_WORDS] {
        &self.progbuf
    }

    pub fn last_command(&self) -> Option<u32> {
        self.last_command
    }

    /// Number of core resets requested through DMCONTROL.
    pub fn reset_count(&self) -> usize {
        self.reset_count
    }

    pub fn init_count(&self) -> usize {
        self.init_count
    }

    pub fn link_reset_count(&self) -> usize {
        self.link_reset_count
    }

    pub fn dmstatus_reads(&self) -> usize {
        self.dmstatus_reads
    }

    pub fn statr_reads(&self) -> usize {
        self.statr_reads
    }

    /// Debug register writes seen on the link.
    pub fn register_write_count(&self) -> usize {
        self.register_writes
    }

    /// Every memory store executed through the program buffer, in order.
    pub fn memory_writes(&self) -> &[(u32, u32)] {
        &self.memory_writes
    }

    pub fn pages_erased(&self) -> usize {
        self.pages_erased
    }

    pub fn pages_programmed(&self) -> usize {
        self.pages_programmed
    }

    pub fn is_flash_locked(&self) -> bool {
        self.ctlr & FLASH_CTLR_LOCK != 0
    }

    pub fn flash_control(&self) -> u32 {
        self.ctlr
    }

    pub fn ram_word(&self, address: u32) -> Option<u32> {
        self.ram.get(&address).copied()
    }

    /// Stored flash word, without readback faults applied.
    pub fn flash_word(&self, address: u32) -> Option<u32> {
        self.flash_index(address).map(|i| self.flash[i])
    }

    /// Stored flash contents as bytes.
    pub fn flash_bytes(&self, address: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut cursor = address & !3;
        while out.len() < len + (address & 3) as usize {
            let word = self.flash_word(cursor).unwrap_or(0);
            out.extend_from_slice(&word.to_le_bytes());
            cursor += 4;
        }
        out.drain(..(address & 3) as usize);
        out.truncate(len);
        out
    }

    // ------------------------------------------------------------------
    // Debug module
    // ------------------------------------------------------------------

    fn write_dmcontrol(&mut self, value: u32) {
        let previous = self.dmcontrol;
        self.dmcontrol = value;

        if value & DMCONTROL_HALTREQ != 0 && !self.faults.never_halt {
            self.halted = true;
        }
        if value & DMCONTROL_RESUMEREQ != 0 && !self.faults.never_resume {
            self.halted = false;
        }
        if value & DMCONTROL_NDMRESET != 0 && previous & DMCONTROL_NDMRESET == 0 {
            self.reset_count += 1;
            if !self.faults.never_reset {
                self.have_reset = true;
                self.halted = false;
                self.cmderr = 0;
            }
        }
        if value & DMCONTROL_ACKHAVERESET != 0 {
            self.have_reset = false;
        }
    }

    fn dmstatus(&self) -> u32 {
        let mut status = DMSTATUS_BASE;
        if self.halted {
            status |= 0b11 << DMSTATUS_HALTED_SHIFT;
        } else {
            status |= 0b11 << DMSTATUS_RUNNING_SHIFT;
        }
        if self.have_reset {
            status |= 0b11 << DMSTATUS_HAVERESET_SHIFT;
        }
        status
    }

    fn abstractcs(&self) -> u32 {
        // progbufsize 8, datacount 2
        ((PROGBUF_WORDS as u32) << 24) | (self.cmderr << 8) | 2
    }

    fn execute(&mut self, word: u32) {
        self.last_command = Some(word);
        if !self.halted {
            self.cmderr = CMDERR_HALT_RESUME;
            return;
        }
        match AbstractCommand::decode(word) {
            Some(AbstractCommand::AccessRegister { regno, direction }) => match direction {
                Direction::Write => {
                    self.cpu_regs.insert(regno, self.data0);
                }
                Direction::Read => {
                    self.data0 = self.cpu_regs.get(&regno).copied().unwrap_or(0);
                }
            },
            Some(AbstractCommand::RunProgramBuffer) => self.run_progbuf(),
            None => {}
        }
    }

    fn run_progbuf(&mut self) {
        let a0 = self.cpu_regs.get(&REG_A0).copied().unwrap_or(0);
        let a1 = self.cpu_regs.get(&REG_A1).copied().unwrap_or(0);
        if self.progbuf[0] == word_of(READ_MEMORY_CODE) {
            let value = self.memory_read(a1);
            self.cpu_regs.insert(REG_A0, value);
        } else if self.progbuf[0] == word_of(WRITE_MEMORY_CODE) {
            self.memory_write(a1, a0);
        }
    }

    // ------------------------------------------------------------------
    // Memory bus
    // ------------------------------------------------------------------

    fn flash_index(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(FLASH_BASE)? as usize;
        (offset < FLASH_SIZE).then_some(offset / 4)
    }

    fn memory_read(&mut self, address: u32) -> u32 {
        match address {
            FLASH_STATR => self.read_statr(),
            FLASH_CTLR => self.ctlr,
            FLASH_ADDR => self.addr,
            a if (OPTION_BYTES_ADDR..OPTION_BYTES_ADDR + 4 * OPTION_BYTES_WORDS as u32)
                .contains(&a) =>
            {
                self.option_bytes[((a - OPTION_BYTES_ADDR) / 4) as usize]
            }
            a => match self.flash_index(a) {
                Some(index) => {
                    let mask = self.faults.corrupt_readback.get(&a).copied().unwrap_or(0);
                    self.flash[index] ^ mask
                }
                None => self.ram.get(&a).copied().unwrap_or(0),
            },
        }
    }

    fn memory_write(&mut self, address: u32, value: u32) {
        self.memory_writes.push((address, value));
        match address {
            FLASH_KEYR => {
                if self.advance_key(KeyKind::Flash, value) && !self.faults.reject_keys {
                    self.ctlr &= !FLASH_CTLR_LOCK;
                }
            }
            FLASH_OBKEYR => {
                self.advance_key(KeyKind::OptionBytes, value);
            }
            FLASH_MODEKEYR => {
                if self.advance_key(KeyKind::FastMode, value)
                    && !self.faults.reject_keys
                    && !self.is_flash_locked()
                {
                    self.fast_unlocked = true;
                }
            }
            FLASH_STATR => {
                // write-1-to-clear flags
                self.statr_flags &= !(value & (FLASH_STATR_EOP | FLASH_STATR_WRPRTERR));
                if self.statr_flags & (FLASH_STATR_EOP | FLASH_STATR_WRPRTERR) == 0 {
                    self.stale_busy = false;
                }
            }
            FLASH_CTLR => self.write_ctlr(value),
            FLASH_ADDR => self.addr = value,
            a => match self.flash_index(a) {
                Some(index) => {
                    if self.ctlr & FLASH_CTLR_FTPG != 0 && self.fast_unlocked {
                        self.page_buffer[index % BLOCK_WORDS] = Some(value);
                        self.write_busy_pending = true;
                    } else {
                        self.statr_flags |= FLASH_STATR_WRPRTERR;
                    }
                }
                None => {
                    self.ram.insert(a, value);
                }
            },
        }
    }

    /// Returns true when `value` completes the two-key sequence.
    fn advance_key(&mut self, kind: KeyKind, value: u32) -> bool {
        let stage = match kind {
            KeyKind::Flash => &mut self.keyr_stage,
            KeyKind::OptionBytes => &mut self.obkeyr_stage,
            KeyKind::FastMode => &mut self.modekeyr_stage,
        };
        match (*stage, value) {
            (_, FLASH_KEY1) => {
                *stage = KeyStage::FirstKey;
                false
            }
            (KeyStage::FirstKey, FLASH_KEY2) => {
                *stage = KeyStage::Idle;
                true
            }
            _ => {
                *stage = KeyStage::Idle;
                false
            }
        }
    }

    fn read_statr(&mut self) -> u32 {
        self.statr_reads += 1;
        let mut status = self.statr_flags;
        if self.busy_forever || self.stale_busy {
            status |= FLASH_STATR_BSY;
        }
        if self.operation_busy_reads > 0 {
            self.operation_busy_reads -= 1;
            status |= FLASH_STATR_BSY;
        }
        if self.write_busy_reads > 0 {
            if self.write_busy_reads != u32::MAX {
                self.write_busy_reads -= 1;
            }
            status |= FLASH_STATR_BSY | FLASH_STATR_WRBUSY;
        }
        if self.write_busy_pending {
            self.write_busy_pending = false;
            status |= FLASH_STATR_WRBUSY;
        }
        status
    }

    fn write_ctlr(&mut self, value: u32) {
        if self.is_flash_locked() {
            // Only LOCK itself is writable while locked.
            return;
        }
        if value & FLASH_CTLR_LOCK != 0 {
            if self.faults.ignore_lock {
                return;
            }
            self.ctlr = FLASH_CTLR_LOCK;
            self.fast_unlocked = false;
            return;
        }

        let starting_page = value & FLASH_CTLR_FTPG != 0 && self.ctlr & FLASH_CTLR_FTPG == 0;
        self.ctlr = value & !(FLASH_CTLR_STRT | FLASH_CTLR_PGSTRT);

        if value == 0 && self.faults.stuck_busy_after_pages == Some(self.pages_programmed) {
            self.busy_forever = true;
        }

        if starting_page {
            self.page_buffer = [None; BLOCK_WORDS];
        }

        if value & (FLASH_CTLR_FTER | FLASH_CTLR_STRT) == FLASH_CTLR_FTER | FLASH_CTLR_STRT {
            if !self.fast_unlocked {
                self.statr_flags |= FLASH_STATR_WRPRTERR;
                return;
            }
            self.erase_page(self.addr);
        }

        if value & (FLASH_CTLR_FTPG | FLASH_CTLR_PGSTRT) == FLASH_CTLR_FTPG | FLASH_CTLR_PGSTRT {
            if !self.fast_unlocked {
                self.statr_flags |= FLASH_STATR_WRPRTERR;
                return;
            }
            self.program_page(self.addr);
        }
    }

    fn erase_page(&mut self, address: u32) {
        let base = address & !(BLOCK_SIZE as u32 - 1);
        if let Some(start) = self.flash_index(base) {
            self.flash[start..start + BLOCK_WORDS].fill(ERASED_WORD);
        }
        self.pages_erased += 1;
        self.operation_busy_reads = OPERATION_BUSY_READS;
    }

    fn program_page(&mut self, address: u32) {
        let base = address & !(BLOCK_SIZE as u32 - 1);
        if let Some(start) = self.flash_index(base) {
            for (i, word) in self.page_buffer.iter().enumerate() {
                if let Some(value) = word {
                    self.flash[start + i] = *value;
                }
            }
        }
        self.page_buffer = [None; BLOCK_WORDS];
        self.pages_programmed += 1;
        self.operation_busy_reads = OPERATION_BUSY_READS;
    }

    fn check_link(&self, reg: u8) -> Result<(), TransportError> {
        if self.faults.disconnected {
            return Err(TransportError::NoResponse { reg });
        }
        if reg > DM_ADDR_MAX {
            return Err(TransportError::InvalidRegister(reg));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum KeyKind {
    Flash,
    OptionBytes,
    FastMode,
}

impl Default for SimulatedTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl RvswdTransport for SimulatedTarget {
    fn init(&mut self) -> Result<(), TransportError> {
        if self.faults.init_fails {
            return Err(TransportError::Link("SWDIO stuck low".into()));
        }
        self.init_count += 1;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        if self.faults.disconnected {
            return Err(TransportError::Link("no response to reset pulse".into()));
        }
        self.link_reset_count += 1;
        Ok(())
    }

    fn write(&mut self, reg: u8, value: u32) -> Result<(), TransportError> {
        self.check_link(reg)?;
        self.register_writes += 1;
        match reg {
            DM_DATA0 => self.data0 = value,
            DM_DATA1 => self.data1 = value,
            DM_CONTROL => self.write_dmcontrol(value),
            DM_COMMAND => self.execute(value),
            DM_ABSTRACTCS => {
                // cmderr is write-1-to-clear
                self.cmderr &= !((value >> 8) & 0x7);
            }
            r if (DM_PROGBUF0..DM_PROGBUF0 + PROGBUF_WORDS as u8).contains(&r) => {
                self.progbuf[(r - DM_PROGBUF0) as usize] = value;
            }
            _ => {}
        }
        Ok(())
    }

    fn read(&mut self, reg: u8) -> Result<u32, TransportError> {
        self.check_link(reg)?;
        let value = match reg {
            DM_DATA0 => self.data0,
            DM_DATA1 => self.data1,
            DM_CONTROL => self.dmcontrol,
            DM_STATUS => {
                self.dmstatus_reads += 1;
                self.dmstatus()
            }
            DM_ABSTRACTCS => self.abstractcs(),
            DM_COMMAND => self.last_command.unwrap_or(0),
            r if (DM_PROGBUF0..DM_PROGBUF0 + PROGBUF_WORDS as u8).contains(&r) => {
                self.progbuf[(r - DM_PROGBUF0) as usize]
            }
            DM_HALTSUM0 => self.halted as u32,
            _ => 0,
        };
        Ok(value)
    }
}
