//! Register catalog and protocol constants for the CH32V20x debug module
//! and flash controller.
//!
//! Derived from the WCH CH32V20x reference manual (debug module and FPEC
//! chapters).

// ============================================================================
// Debug Module Registers (RVSWD addressable, 7-bit)
// ============================================================================

/// Highest address the RVSWD link can select.
pub const DM_ADDR_MAX: u8 = 0x7F;

/// Data register 0, scratch for abstract register transfers
pub const DM_DATA0: u8 = 0x04;
/// Data register 1
pub const DM_DATA1: u8 = 0x05;
/// Debug module control
pub const DM_CONTROL: u8 = 0x10;
/// Debug module status
pub const DM_STATUS: u8 = 0x11;
/// Hart information
pub const DM_HARTINFO: u8 = 0x12;
/// Abstract command status
pub const DM_ABSTRACTCS: u8 = 0x16;
/// Abstract command
pub const DM_COMMAND: u8 = 0x17;
/// Abstract command auto-execution
pub const DM_ABSTRACTAUTO: u8 = 0x18;
/// Program buffer slot 0; slots 1..=7 follow consecutively.
pub const DM_PROGBUF0: u8 = 0x20;
/// Halt summary
pub const DM_HALTSUM0: u8 = 0x40;
/// Capability register
pub const DM_CPBR: u8 = 0x7C;
/// Configuration register
pub const DM_CFGR: u8 = 0x7D;
/// Shadow configuration register
pub const DM_SHDWCFGR: u8 = 0x7E;

/// Number of 32-bit program buffer slots.
pub const PROGBUF_WORDS: usize = 8;

// ============================================================================
// DMCONTROL Words
// ============================================================================

/// dmactive only: keeps the module enabled and drops any pending request.
pub const DMCONTROL_ENABLE: u32 = 0x0000_0001;
/// haltreq | dmactive
pub const DMCONTROL_HALT_REQ: u32 = 0x8000_0001;
/// resumereq | dmactive
pub const DMCONTROL_RESUME_REQ: u32 = 0x4000_0001;
/// ndmreset | dmactive
pub const DMCONTROL_CORE_RESET: u32 = 0x0000_0003;
/// ackhavereset | dmactive
pub const DMCONTROL_ACK_RESET: u32 = 0x1000_0001;

pub const DMCONTROL_HALTREQ: u32 = 1 << 31;
pub const DMCONTROL_RESUMEREQ: u32 = 1 << 30;
pub const DMCONTROL_ACKHAVERESET: u32 = 1 << 28;
pub const DMCONTROL_NDMRESET: u32 = 1 << 1;
pub const DMCONTROL_DMACTIVE: u32 = 1 << 0;

// ============================================================================
// DMSTATUS Fields (2-bit any/all pairs)
// ============================================================================

/// anyhalted/allhalted
pub const DMSTATUS_HALTED_SHIFT: u32 = 8;
/// anyrunning/allrunning
pub const DMSTATUS_RUNNING_SHIFT: u32 = 10;
/// anyhavereset/allhavereset
pub const DMSTATUS_HAVERESET_SHIFT: u32 = 18;

// ============================================================================
// Abstract Command Fields
// ============================================================================

/// Register number offset for CSRs.
pub const REGS_CSR: u16 = 0x0000;
/// Register number offset for general-purpose (x) registers.
pub const REGS_GPR: u16 = 0x1000;

/// x10 / a0: value register for the load/store sequences
pub const REG_A0: u16 = REGS_GPR + 10;
/// x11 / a1: address register for the load/store sequences
pub const REG_A1: u16 = REGS_GPR + 11;

/// `c.lw a0, 0(a1); c.ebreak`
pub const READ_MEMORY_CODE: [u8; 4] = [0x88, 0x41, 0x02, 0x90];
/// `c.sw a0, 0(a1); c.ebreak`
pub const WRITE_MEMORY_CODE: [u8; 4] = [0x88, 0xC1, 0x02, 0x90];

// ============================================================================
// Memory Map
// ============================================================================

/// Start of the code flash region
pub const FLASH_BASE: u32 = 0x0800_0000;
/// Default size of the user code flash (CH32V203x8)
pub const FLASH_SIZE: usize = 64 * 1024;
/// Option bytes block
pub const OPTION_BYTES_ADDR: u32 = 0x1FFF_F800;
/// Number of 32-bit words in the option bytes block
pub const OPTION_BYTES_WORDS: usize = 4;

// ============================================================================
// Flash Controller (FPEC)
// ============================================================================

/// FPEC key register
pub const FLASH_KEYR: u32 = 0x4002_2004;
/// Option bytes key register
pub const FLASH_OBKEYR: u32 = 0x4002_2008;
/// Status register
pub const FLASH_STATR: u32 = 0x4002_200C;
/// Control register
pub const FLASH_CTLR: u32 = 0x4002_2010;
/// Address register
pub const FLASH_ADDR: u32 = 0x4002_2014;
/// Fast programming mode key register
pub const FLASH_MODEKEYR: u32 = 0x4002_2024;

pub const FLASH_KEY1: u32 = 0x4567_0123;
pub const FLASH_KEY2: u32 = 0xCDEF_89AB;

/// Registers that take the key pair during unlock, in order.
pub const FLASH_KEY_REGISTERS: [u32; 3] = [FLASH_KEYR, FLASH_OBKEYR, FLASH_MODEKEYR];

// STATR bits
pub const FLASH_STATR_BSY: u32 = 1 << 0;
pub const FLASH_STATR_WRBUSY: u32 = 1 << 1;
pub const FLASH_STATR_WRPRTERR: u32 = 1 << 4;
pub const FLASH_STATR_EOP: u32 = 1 << 5;

// CTLR bits
pub const FLASH_CTLR_PG: u32 = 1 << 0;
pub const FLASH_CTLR_PER: u32 = 1 << 1;
pub const FLASH_CTLR_MER: u32 = 1 << 2;
pub const FLASH_CTLR_STRT: u32 = 1 << 6;
pub const FLASH_CTLR_LOCK: u32 = 1 << 7;
/// Fast page program (256 bytes)
pub const FLASH_CTLR_FTPG: u32 = 1 << 16;
/// Fast page erase (256 bytes)
pub const FLASH_CTLR_FTER: u32 = 1 << 17;
/// Start the buffered page program
pub const FLASH_CTLR_PGSTRT: u32 = 1 << 21;

// ============================================================================
// Flash Geometry
// ============================================================================

/// Erase and program unit.
pub const BLOCK_SIZE: usize = 256;
/// 32-bit words per block.
pub const BLOCK_WORDS: usize = BLOCK_SIZE / 4;
/// Alignment the image entry point checks.
pub const IMAGE_ALIGN: u32 = 64;
