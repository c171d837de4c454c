// SPDX-License-Identifier: MPL-2.0

//! The DWARF stack unwinder.
//!
//! Used by the panic and bug-reporting paths to produce stack traces from
//! the linker-embedded `.eh_frame` / `.eh_frame_hdr` sections. Only the
//! subset of DWARF CFI that compilers emit for kernel code is understood:
//! the `"zR"` augmentation and the small set of CFA opcodes below.
//! Anything else ends the walk with [`Error::NotSupported`] and a warning
//! rather than guessing.
//!
//! A walk holds one [`UnwindState`]; each [`UnwindState::next_frame`]
//! locates the FDE for the current PC through the `.eh_frame_hdr` binary
//! search table, runs the CIE's and FDE's CFA programs against a
//! per-register rule table, and materialises the caller's register frame.

use gimli::constants::*;
use spin::Once;

use crate::arch::unwind::{Registers, DWARF_SP_REG, NUM_DWARF_REGISTERS};
use crate::prelude::Result;
use crate::Error;

/// A bounds-checked cursor over one DWARF record.
#[derive(Clone, Copy)]
struct EhCursor {
    ptr: *const u8,
    bytes_left: usize,
}

impl EhCursor {
    /// Opens a length-prefixed `.eh_frame` record (CIE or FDE).
    ///
    /// # Safety
    ///
    /// `ptr` must reference a live record; the declared length is trusted,
    /// as the section is linker-generated.
    unsafe fn at_record(ptr: *const u8) -> Self {
        // SAFETY: Per the function contract.
        let mut length = unsafe { (ptr as *const u32).read_unaligned() } as u64 as usize;
        let mut ptr = unsafe { ptr.add(4) };
        if length == 0xffff_ffff {
            // SAFETY: An extended record carries a 64-bit length next.
            length = unsafe { (ptr as *const u64).read_unaligned() } as usize;
            ptr = unsafe { ptr.add(8) };
        }
        Self {
            ptr,
            bytes_left: length,
        }
    }

    fn over(ptr: *const u8, bytes: usize) -> Self {
        Self {
            ptr,
            bytes_left: bytes,
        }
    }

    /// Reads `count` little-endian bytes into a `u64`.
    fn consume_bytes(&mut self, count: usize) -> Result<u64> {
        if self.bytes_left < count {
            return Err(Error::Overflow);
        }
        let mut value = 0u64;
        for i in 0..count {
            // SAFETY: `i < count <= bytes_left` bytes are readable.
            value |= (unsafe { self.ptr.add(i).read() } as u64) << (i * 8);
        }
        self.ptr = unsafe { self.ptr.add(count) };
        self.bytes_left -= count;
        Ok(value)
    }

    fn consume_u8(&mut self) -> Result<u8> {
        self.consume_bytes(1).map(|v| v as u8)
    }

    fn consume_u32(&mut self) -> Result<u32> {
        self.consume_bytes(4).map(|v| v as u32)
    }
}

const LEB128_MAX_PER_BYTE: u8 = 0x7f;
const LEB128_HAS_NEXT_BYTE: u8 = 0x80;
const LEB128_BITS_PER_BYTE: u32 = 7;

/// Decodes the value part of a pointer encoding, adding it to the base the
/// scaling already put in `value`.
fn decode_format(cursor: &mut EhCursor, format: DwEhPe, value: &mut u64) -> Result<()> {
    let mut num_bits = 0u32;
    let decoded;

    match format {
        DW_EH_PE_absptr => {
            decoded = cursor.consume_bytes(core::mem::size_of::<usize>())?;
        }
        DW_EH_PE_uleb128 | DW_EH_PE_sleb128 => {
            let mut leb = 0u64;
            loop {
                let byte = cursor.consume_u8()?;
                leb |= ((byte & LEB128_MAX_PER_BYTE) as u64) << num_bits;
                num_bits += LEB128_BITS_PER_BYTE;
                if byte & LEB128_HAS_NEXT_BYTE == 0 {
                    break;
                }
            }
            decoded = leb;
        }
        DW_EH_PE_udata8 | DW_EH_PE_sdata8 => decoded = cursor.consume_bytes(8)?,
        DW_EH_PE_udata4 | DW_EH_PE_sdata4 => {
            num_bits = 32;
            decoded = cursor.consume_bytes(4)?;
        }
        DW_EH_PE_udata2 | DW_EH_PE_sdata2 => {
            num_bits = 16;
            decoded = cursor.consume_bytes(2)?;
        }
        _ => {
            log::warn!("unhandled DWARF format {:#x}", format.0);
            return Err(Error::NotSupported);
        }
    }

    let mut decoded = decoded;
    // Sign-extend the signed variants (they all have bit 3 set).
    if format.0 & 0x08 != 0 && num_bits != 0 && num_bits < 64 {
        let sign_bit = num_bits - 1;
        if decoded & (1u64 << sign_bit) != 0 {
            decoded |= !0u64 << sign_bit;
        }
    }

    *value = value.wrapping_add(decoded);
    Ok(())
}

/// Decodes one encoded pointer: the upper nibble selects the base the
/// value is relative to, the lower nibble the storage format.
fn decode_value(
    cursor: &mut EhCursor,
    encoding: u8,
    tables: Option<&UnwindTables>,
) -> Result<u64> {
    let mut value = match DwEhPe(encoding & 0xf0) {
        DW_EH_PE_absptr => 0,
        DW_EH_PE_pcrel => cursor.ptr as u64,
        DW_EH_PE_textrel => tables.ok_or(Error::NotSupported)?.text_base as u64,
        DW_EH_PE_datarel => tables.ok_or(Error::NotSupported)?.hdr_base as u64,
        other => {
            log::warn!("unhandled DWARF scaling {:#x}", other.0);
            return Err(Error::NotSupported);
        }
    };

    decode_format(cursor, DwEhPe(encoding & 0x0f), &mut value)?;
    Ok(value)
}

/// The parsed `.eh_frame_hdr` lookup tables.
#[derive(Debug)]
pub struct UnwindTables {
    bst: *const u8,
    table_encoding: u8,
    /// Width of one `<initial_pc, fde_ptr>` pair, deduced from the first
    /// decoded entry (all entries share one encoding).
    entry_width: usize,
    num_fdes: u64,
    hdr_base: usize,
    text_base: usize,
}

// SAFETY: The tables only reference linker-embedded read-only sections.
unsafe impl Send for UnwindTables {}
unsafe impl Sync for UnwindTables {}

impl UnwindTables {
    /// Parses a `.eh_frame_hdr` section.
    ///
    /// `eh_frame_begin` is the address of the embedded `.eh_frame`, which
    /// the header's `eh_frame_ptr` must match; `text_begin` anchors
    /// text-relative encodings.
    pub fn parse(hdr: &'static [u8], eh_frame_begin: usize, text_begin: usize) -> Result<Self> {
        let mut tables = UnwindTables {
            bst: core::ptr::null(),
            table_encoding: 0,
            entry_width: 0,
            num_fdes: 0,
            hdr_base: hdr.as_ptr() as usize,
            text_base: text_begin,
        };
        let mut cursor = EhCursor::over(hdr.as_ptr(), hdr.len());

        let version = cursor.consume_u8()?;
        if version != 1 {
            return Err(Error::InvalidArgs);
        }

        let eh_frame_ptr_encoding = cursor.consume_u8()?;
        let fde_count_encoding = cursor.consume_u8()?;
        tables.table_encoding = cursor.consume_u8()?;

        let eh_frame_ptr = decode_value(&mut cursor, eh_frame_ptr_encoding, Some(&tables))?;
        if eh_frame_ptr != eh_frame_begin as u64 {
            return Err(Error::InvalidArgs);
        }

        tables.num_fdes = decode_value(&mut cursor, fde_count_encoding, Some(&tables))?;
        if tables.num_fdes == 0 {
            return Err(Error::InvalidArgs);
        }

        tables.bst = cursor.ptr;

        // All table values share one width; measure the first.
        decode_value(&mut cursor, tables.table_encoding, Some(&tables))?;
        tables.entry_width = (cursor.ptr as usize - tables.bst as usize) * 2;

        Ok(tables)
    }

    /// Binary search of the `<initial_pc, fde_ptr>` table for the FDE
    /// covering `pc`.
    fn find_fde(&self, pc: usize) -> Result<*const u8> {
        let mut begin = 0u64;
        let mut end = self.num_fdes;

        while end - begin > 1 {
            let middle = begin + (end - begin) / 2;

            // SAFETY: `middle < num_fdes`, so the entry is inside the
            // linker-generated table.
            let entry = unsafe { self.bst.add(middle as usize * self.entry_width) };
            let mut cursor = EhCursor::over(entry, self.entry_width);
            let sym_addr = decode_value(&mut cursor, self.table_encoding, Some(self))?;

            if sym_addr <= pc as u64 {
                begin = middle;
            } else {
                end = middle;
            }
        }

        // SAFETY: As above; offset by half an entry to the fde_ptr value.
        let entry = unsafe {
            self.bst
                .add(begin as usize * self.entry_width + self.entry_width / 2)
        };
        let mut cursor = EhCursor::over(entry, self.entry_width / 2);
        let fde_addr = decode_value(&mut cursor, self.table_encoding, Some(self))?;
        Ok(fde_addr as usize as *const u8)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RegisterRule {
    /// Keep the value from the previous frame.
    SameValue,
    /// Load from `CFA + offset * data_alignment_factor`.
    Offset(u64),
    /// The computed CFA itself.
    DefCfa,
}

/// The state of one stack walk.
pub struct UnwindState {
    frame: [usize; NUM_DWARF_REGISTERS],
    cie_code: Option<EhCursor>,
    fde_code: Option<EhCursor>,
    code_alignment_factor: u64,
    data_alignment_factor: i64,
    ret_reg_idx: usize,
    cfa_reg_idx: usize,
    cfa_offset: u64,
    pc: u64,
    fde_encoding: u8,
    end: bool,
    signal_frame: bool,
}

impl UnwindState {
    pub fn new() -> Self {
        Self {
            frame: [0; NUM_DWARF_REGISTERS],
            cie_code: None,
            fde_code: None,
            code_alignment_factor: 0,
            data_alignment_factor: 0,
            ret_reg_idx: crate::arch::unwind::DWARF_PC_REG,
            cfa_reg_idx: DWARF_SP_REG,
            cfa_offset: 0,
            pc: 0,
            fde_encoding: 0,
            end: false,
            signal_frame: false,
        }
    }

    /// Starts the walk from a captured register snapshot (e.g. the
    /// registers at an exception). The first frame is exact, so no PC
    /// correction applies to it.
    pub fn load_registers(&mut self, regs: &Registers) {
        self.frame = regs.dwarf_frame();
        self.signal_frame = true;
    }

    pub fn return_address(&self) -> usize {
        if self.end {
            return 0;
        }
        self.frame[self.ret_reg_idx]
    }

    pub fn is_done(&self) -> bool {
        self.end
    }

    pub fn stack_pointer(&self) -> usize {
        self.frame[DWARF_SP_REG]
    }

    /// The PC used to locate an FDE. The recovered return address points
    /// after the call instruction, possibly past the end of the caller;
    /// off-by-one backwards keeps the lookup inside it.
    fn reliable_pc(&self) -> usize {
        let pc = self.return_address();
        if self.signal_frame {
            pc
        } else {
            pc.wrapping_sub(1)
        }
    }

    fn parse_cie(&mut self, mut cie: EhCursor) -> Result<()> {
        let id = cie.consume_u32()?;
        if id != 0 {
            return Err(Error::InvalidArgs);
        }

        let version = cie.consume_u8()?;
        if version != 1 {
            return Err(Error::InvalidArgs);
        }

        // The only augmentation understood: 'z' (augmentation data is
        // present) and 'R' (it holds the FDE pointer encoding).
        const EXPECTED_AUGMENTATION: &[u8] = b"zR\0";
        for (idx, &expected) in EXPECTED_AUGMENTATION.iter().enumerate() {
            let ch = cie.consume_u8()?;
            if ch != expected {
                log::warn!("unhandled DWARF augmentation @{}: {:?}", idx, ch as char);
                return Err(Error::NotSupported);
            }
        }

        self.code_alignment_factor = decode_value(&mut cie, DW_EH_PE_uleb128.0, None)?;
        self.data_alignment_factor = decode_value(&mut cie, DW_EH_PE_sleb128.0, None)? as i64;

        let ret_reg = decode_value(&mut cie, DW_EH_PE_uleb128.0, None)?;
        if ret_reg >= NUM_DWARF_REGISTERS as u64 {
            return Err(Error::InvalidArgs);
        }
        self.ret_reg_idx = ret_reg as usize;

        let aug_length = decode_value(&mut cie, DW_EH_PE_uleb128.0, None)?;
        if aug_length != 1 {
            return Err(Error::InvalidArgs);
        }
        self.fde_encoding = cie.consume_u8()?;

        self.cie_code = Some(cie);
        Ok(())
    }

    fn parse_fde(&mut self, mut fde: EhCursor) -> Result<()> {
        // The CIE is referenced as a 32-bit offset backwards from the
        // start of this very field; zero would make the record a CIE.
        let field_ptr = fde.ptr;
        let cie_offset = fde.consume_u32()?;
        if cie_offset == 0 {
            return Err(Error::InvalidArgs);
        }

        // SAFETY: The offset points back into the same linker-generated
        // `.eh_frame` section.
        let cie = unsafe { EhCursor::at_record(field_ptr.sub(cie_offset as usize)) };
        self.parse_cie(cie)?;

        self.pc = decode_value(&mut fde, self.fde_encoding, None)?;

        // `pc_range` is famously underspecified; the common reading is
        // "same format as pc_begin, but absolute".
        let pc_range = decode_value(&mut fde, self.fde_encoding & 0x0f, None)?;

        let current_pc = self.reliable_pc() as u64;
        if current_pc < self.pc || current_pc >= self.pc + pc_range {
            return Err(Error::InvalidArgs);
        }

        let aug_length = fde.consume_u8()?;
        if aug_length != 0 {
            return Err(Error::NotSupported);
        }

        self.fde_code = Some(fde);
        Ok(())
    }

    /// Executes one CFA program against the rule table, stopping at the
    /// row covering the current PC.
    fn exec(&mut self, rules: &mut [RegisterRule; NUM_DWARF_REGISTERS], code: EhCursor) -> Result<()> {
        let mut data = code;

        while data.bytes_left > 0 {
            if self.pc > self.return_address() as u64 {
                return Ok(());
            }

            let opcode = data.consume_u8()?;

            match DwCfa(opcode & 0xc0) {
                DW_CFA_advance_loc => {
                    self.pc += (opcode & 0x3f) as u64 * self.code_alignment_factor;
                    continue;
                }
                DW_CFA_offset => {
                    let reg = (opcode & 0x3f) as usize;
                    if reg >= NUM_DWARF_REGISTERS {
                        return Err(Error::InvalidArgs);
                    }
                    let offset = decode_value(&mut data, DW_EH_PE_uleb128.0, None)?;
                    rules[reg] = RegisterRule::Offset(offset);
                    continue;
                }
                DwCfa(0) => {}
                other => {
                    log::warn!("unhandled DWARF CFA opcode {:#04x}", other.0);
                    return Err(Error::NotSupported);
                }
            }

            match DwCfa(opcode) {
                DW_CFA_nop => {}
                DW_CFA_advance_loc1 | DW_CFA_advance_loc2 | DW_CFA_advance_loc4 => {
                    let bytes_needed = match DwCfa(opcode) {
                        DW_CFA_advance_loc1 => 1,
                        DW_CFA_advance_loc2 => 2,
                        _ => 4,
                    };
                    let delta = data.consume_bytes(bytes_needed)?;
                    self.pc += delta * self.code_alignment_factor;
                }
                DW_CFA_same_value => {
                    let reg = decode_value(&mut data, DW_EH_PE_uleb128.0, None)?;
                    if reg >= NUM_DWARF_REGISTERS as u64 {
                        return Err(Error::InvalidArgs);
                    }
                    rules[reg as usize] = RegisterRule::SameValue;
                }
                DW_CFA_def_cfa | DW_CFA_def_cfa_register => {
                    let reg = decode_value(&mut data, DW_EH_PE_uleb128.0, None)?;
                    if reg >= NUM_DWARF_REGISTERS as u64 {
                        return Err(Error::InvalidArgs);
                    }
                    self.cfa_reg_idx = reg as usize;

                    if DwCfa(opcode) == DW_CFA_def_cfa {
                        self.cfa_offset = decode_value(&mut data, DW_EH_PE_uleb128.0, None)?;
                    }
                }
                DW_CFA_def_cfa_offset => {
                    self.cfa_offset = decode_value(&mut data, DW_EH_PE_uleb128.0, None)?;
                }
                other => {
                    log::warn!("unhandled DWARF CFA opcode {:#04x}", other.0);
                    return Err(Error::NotSupported);
                }
            }
        }

        Ok(())
    }

    fn apply_rules(&mut self, rules: &[RegisterRule; NUM_DWARF_REGISTERS]) {
        let cfa = self.frame[self.cfa_reg_idx].wrapping_add(self.cfa_offset as usize);
        let mut new_frame = [0usize; NUM_DWARF_REGISTERS];

        for (reg, rule) in rules.iter().enumerate() {
            new_frame[reg] = match *rule {
                RegisterRule::SameValue => self.frame[reg],
                RegisterRule::Offset(offset) => {
                    let addr = cfa.wrapping_add(
                        (offset as i64).wrapping_mul(self.data_alignment_factor) as usize,
                    );
                    // SAFETY: The address points into the stack of a frame
                    // this walk is still below; the CFI told us so.
                    unsafe { (addr as *const usize).read_unaligned() }
                }
                RegisterRule::DefCfa => cfa,
            };
        }

        self.frame = new_frame;
        self.cfa_reg_idx = DWARF_SP_REG;
        self.cfa_offset = 0;
    }

    /// Unwinds one frame. The walk ends when the return address register
    /// reaches zero, or on the first record the unwinder does not
    /// understand.
    pub fn next_frame(&mut self, tables: &UnwindTables) -> Result<()> {
        if self.end {
            return Err(Error::InvalidArgs);
        }

        let result = self.try_next_frame(tables);
        if result.is_err() {
            self.end = true;
        }
        result
    }

    fn try_next_frame(&mut self, tables: &UnwindTables) -> Result<()> {
        let fde_ptr = tables.find_fde(self.reliable_pc())?;
        // SAFETY: The search table hands out addresses of real FDE records
        // inside `.eh_frame`.
        let fde = unsafe { EhCursor::at_record(fde_ptr) };
        self.parse_fde(fde)?;

        let mut rules = [RegisterRule::SameValue; NUM_DWARF_REGISTERS];
        rules[DWARF_SP_REG] = RegisterRule::DefCfa;
        self.signal_frame = false;

        let cie_code = self.cie_code.take().ok_or(Error::InvalidArgs)?;
        self.exec(&mut rules, cie_code)?;
        let fde_code = self.fde_code.take().ok_or(Error::InvalidArgs)?;
        self.exec(&mut rules, fde_code)?;

        self.apply_rules(&rules);
        self.end = self.return_address() == 0;
        Ok(())
    }
}

static TABLES: Once<UnwindTables> = Once::new();

/// Whether stack traces are available.
pub fn is_available() -> bool {
    TABLES.get().is_some()
}

/// Parses the linker-embedded unwind tables. On failure the unwinder
/// stays unavailable and stack traces degrade to a warning.
pub(crate) fn init() -> Result<()> {
    #[cfg(target_os = "none")]
    {
        extern "C" {
            static __eh_frame_hdr_start: u8;
            static __eh_frame_hdr_end: u8;
            static __eh_frame_start: u8;
            static __text_start: u8;
        }

        // SAFETY: The linker script provides these section bounds.
        let (hdr, eh_frame_begin, text_begin) = unsafe {
            let start = &__eh_frame_hdr_start as *const u8;
            let end = &__eh_frame_hdr_end as *const u8;
            (
                core::slice::from_raw_parts(start, end as usize - start as usize),
                &__eh_frame_start as *const u8 as usize,
                &__text_start as *const u8 as usize,
            )
        };

        let tables = UnwindTables::parse(hdr, eh_frame_begin, text_begin)?;
        TABLES.call_once(|| tables);
        log::info!("stack traces are available");
        Ok(())
    }
    #[cfg(not(target_os = "none"))]
    {
        // Hosted builds have no embedded tables to adopt.
        Err(Error::NoDevice)
    }
}

/// Walks the stack described by `regs` (or the current one), feeding each
/// return address to `callback` along with whether the PC was corrected
/// (`true` everywhere but on signal frames). The walk stops when the
/// callback returns `false` or the return address reaches zero.
#[inline(never)]
pub fn walk(
    regs: Option<&Registers>,
    mut callback: impl FnMut(usize, bool) -> bool,
) -> Result<()> {
    let tables = TABLES.get().ok_or(Error::NoDevice)?;

    let mut state = UnwindState::new();
    match regs {
        Some(regs) => state.load_registers(regs),
        None => {
            let mut current = Registers::default();
            if !crate::arch::unwind::capture_registers(&mut current) {
                return Err(Error::NotSupported);
            }
            state.load_registers(&current);
            state.signal_frame = false;
            // This very function stays on the stack for the whole walk, so
            // unwinding straight out of the captured frame is sound; skip
            // it to start reporting at the caller.
            state.next_frame(tables)?;
        }
    }

    loop {
        let ret_addr = state.return_address();
        if !callback(ret_addr, !state.signal_frame) {
            break;
        }
        state.next_frame(tables)?;
        if state.is_done() {
            break;
        }
    }

    Ok(())
}

/// Prints the current (or the given) stack to the log at ERR severity.
pub fn dump_stack(regs: Option<&Registers>) {
    if !is_available() {
        pr_warn!("stack trace unavailable\n");
        return;
    }

    pr_err!("call trace:\n");
    let result = walk(regs, |ret_addr, reliable| {
        if ret_addr != 0 {
            pr_err!("  [<%p>]%s\n", ret_addr, if reliable { "" } else { " (exact)" });
        }
        true
    });
    if let Err(err) = result {
        pr_warn!("stack walk ended early (%d)\n", err as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    const CAF: u64 = 1;
    const DAF: i64 = -8;
    const RA_REG: u64 = 16;

    fn push_uleb(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    fn push_sleb(out: &mut Vec<u8>, mut value: i64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let sign_clear = byte & 0x40 == 0;
            if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Emits a record with its 32-bit length prefix fixed up afterwards.
    fn push_record(out: &mut Vec<u8>, body: impl FnOnce(&mut Vec<u8>)) -> usize {
        let record_start = out.len();
        out.extend_from_slice(&[0; 4]);
        body(out);
        let length = (out.len() - record_start - 4) as u32;
        out[record_start..record_start + 4].copy_from_slice(&length.to_le_bytes());
        record_start
    }

    /// A CIE with the standard prologue rules: CFA = rsp + 8, return
    /// address at CFA - 8.
    fn push_cie(out: &mut Vec<u8>) -> usize {
        push_record(out, |out| {
            out.extend_from_slice(&0u32.to_le_bytes()); // id
            out.push(1); // version
            out.extend_from_slice(b"zR\0");
            push_uleb(out, CAF);
            push_sleb(out, DAF);
            push_uleb(out, RA_REG);
            push_uleb(out, 1); // augmentation data length
            out.push(DW_EH_PE_absptr.0); // FDE pointer encoding
            // Initial instructions: def_cfa(rsp, 8); offset(ra, 1).
            out.push(DW_CFA_def_cfa.0);
            push_uleb(out, DWARF_SP_REG as u64);
            push_uleb(out, 8);
            out.push(0x80 | RA_REG as u8); // DW_CFA_offset | reg
            push_uleb(out, 1);
        })
    }

    struct FdeSpec {
        pc_begin: usize,
        pc_range: usize,
        /// Extra CFA program bytes executed after the CIE's.
        instructions: Vec<u8>,
    }

    struct BuiltTables {
        fde_addrs: Vec<usize>,
        tables: UnwindTables,
    }

    /// Builds `.eh_frame` + `.eh_frame_hdr` images for the given
    /// functions and parses the header for real.
    fn build(specs: &[FdeSpec]) -> BuiltTables {
        let mut eh_frame: Vec<u8> = Vec::new();
        let cie_start = push_cie(&mut eh_frame);

        let mut fde_offsets = Vec::new();
        for spec in specs {
            let record_start = push_record(&mut eh_frame, |out| {
                // Placeholder; the CIE back-offset is patched below.
                out.extend_from_slice(&[0; 4]);
                out.extend_from_slice(&spec.pc_begin.to_le_bytes());
                out.extend_from_slice(&spec.pc_range.to_le_bytes());
                out.push(0); // augmentation data length
                out.extend_from_slice(&spec.instructions);
            });
            let field_offset = record_start + 4;
            let cie_offset = (field_offset - cie_start) as u32;
            eh_frame[field_offset..field_offset + 4]
                .copy_from_slice(&cie_offset.to_le_bytes());
            fde_offsets.push(record_start);
        }

        let eh_frame: &'static [u8] = Vec::leak(eh_frame);
        let eh_frame_begin = eh_frame.as_ptr() as usize;
        let fde_addrs: Vec<usize> = fde_offsets.iter().map(|o| eh_frame_begin + o).collect();

        let mut hdr: Vec<u8> = Vec::new();
        hdr.push(1); // version
        hdr.push(DW_EH_PE_absptr.0); // eh_frame_ptr encoding
        hdr.push(DW_EH_PE_udata4.0); // fde_count encoding
        hdr.push(DW_EH_PE_absptr.0); // table encoding
        hdr.extend_from_slice(&eh_frame_begin.to_le_bytes());
        hdr.extend_from_slice(&(specs.len() as u32).to_le_bytes());
        for (spec, fde_addr) in specs.iter().zip(&fde_addrs) {
            hdr.extend_from_slice(&spec.pc_begin.to_le_bytes());
            hdr.extend_from_slice(&fde_addr.to_le_bytes());
        }

        let hdr: &'static [u8] = Vec::leak(hdr);
        let tables = UnwindTables::parse(hdr, eh_frame_begin, 0).unwrap();
        BuiltTables { fde_addrs, tables }
    }

    const FUNC_A: usize = 0x1000_0000;
    const FUNC_B: usize = 0x1000_0200;

    fn two_function_tables() -> BuiltTables {
        build(&[
            FdeSpec {
                pc_begin: FUNC_A,
                pc_range: 0x100,
                // After one byte of prologue the frame grows to 16 bytes
                // and rbp is saved at CFA - 16.
                instructions: {
                    let mut code = Vec::new();
                    code.push(0x40 | 1); // DW_CFA_advance_loc(1)
                    code.push(DW_CFA_def_cfa_offset.0);
                    push_uleb(&mut code, 16);
                    code.push(0x80 | 6); // DW_CFA_offset | rbp
                    push_uleb(&mut code, 2);
                    code
                },
            },
            FdeSpec {
                pc_begin: FUNC_B,
                pc_range: 0x100,
                instructions: Vec::new(),
            },
        ])
    }

    #[test]
    fn header_parse_records_the_table_shape() {
        let built = two_function_tables();
        assert_eq!(built.tables.num_fdes, 2);
        // absptr pairs: 8 + 8 bytes per entry on 64-bit.
        assert_eq!(built.tables.entry_width, 2 * core::mem::size_of::<usize>());
    }

    #[test]
    fn bad_header_version_is_rejected() {
        let hdr: &'static [u8] = Vec::leak(alloc::vec![2, 0, 3, 0]);
        assert_eq!(
            UnwindTables::parse(hdr, 0, 0).unwrap_err(),
            Error::InvalidArgs
        );
    }

    #[test]
    fn mismatched_eh_frame_pointer_is_rejected() {
        let built = two_function_tables();
        // Re-parse the same header against the wrong eh_frame base.
        let hdr = unsafe {
            core::slice::from_raw_parts(built.tables.hdr_base as *const u8, 4 + 8 + 4 + 32)
        };
        assert_eq!(
            UnwindTables::parse(hdr, 0xdead_b000, 0).unwrap_err(),
            Error::InvalidArgs
        );
    }

    #[test]
    fn fde_lookup_finds_the_covering_entry() {
        let built = two_function_tables();
        assert_eq!(
            built.tables.find_fde(FUNC_A + 0x10).unwrap() as usize,
            built.fde_addrs[0]
        );
        assert_eq!(
            built.tables.find_fde(FUNC_B + 0x80).unwrap() as usize,
            built.fde_addrs[1]
        );
    }

    /// Lay out a fake downward-grown stack:
    ///
    /// ```text
    /// rsp_a -> [ saved rbp ]    (CFA_a - 16)
    ///          [ RA into B ]    (CFA_a - 8)
    ///          [ 0 ]            func_b's RA slot: terminates the walk
    /// ```
    fn fake_stack() -> &'static mut [usize] {
        Vec::leak(alloc::vec![0usize; 8])
    }

    #[test]
    fn walk_recovers_caller_frames_until_zero() {
        let built = two_function_tables();
        let stack = fake_stack();
        stack[0] = 0xb99; // func_a's saved rbp
        stack[1] = FUNC_B + 0x42; // return address into func_b
        stack[2] = 0; // func_b's return address: end of walk

        let mut state = UnwindState::new();
        let mut regs = Registers::default();
        regs.set_dwarf_register(RA_REG as usize, FUNC_A + 0x10);
        regs.set_dwarf_register(DWARF_SP_REG, stack.as_ptr() as usize);
        regs.set_dwarf_register(6, 0xaaaa);
        state.load_registers(&regs);

        let sp_before = state.stack_pointer();
        state.next_frame(&built.tables).unwrap();

        // Now inside func_b: the return address and saved rbp came off the
        // stack, and the stack pointer moved up by the 16-byte frame.
        assert_eq!(state.return_address(), FUNC_B + 0x42);
        assert_eq!(state.frame[6], 0xb99);
        assert_eq!(state.stack_pointer(), sp_before + 16);
        assert!(!state.is_done());

        let sp_middle = state.stack_pointer();
        state.next_frame(&built.tables).unwrap();

        // func_b's return slot held zero, so the walk terminates; stack
        // pointers never decreased along the way.
        assert!(state.is_done());
        assert_eq!(state.return_address(), 0);
        assert!(state.stack_pointer() >= sp_middle);

        assert_eq!(state.next_frame(&built.tables), Err(Error::InvalidArgs));
    }

    #[test]
    fn pc_correction_applies_off_signal_frames() {
        let built = two_function_tables();
        let stack = fake_stack();
        // The return address is the first byte PAST func_a; only the
        // PC - 1 correction keeps the lookup inside it.
        stack[1] = FUNC_A + 0x100;
        stack[2] = 0;

        let mut state = UnwindState::new();
        let mut regs = Registers::default();
        regs.set_dwarf_register(RA_REG as usize, FUNC_B + 0x10);
        regs.set_dwarf_register(DWARF_SP_REG, stack.as_ptr() as usize + 8);
        state.load_registers(&regs);

        // First unwind (func_b, exact PC) pulls the past-the-end return
        // address; the second must still resolve func_a's FDE.
        state.next_frame(&built.tables).unwrap();
        assert_eq!(state.return_address(), FUNC_A + 0x100);
        state.next_frame(&built.tables).unwrap();
        assert!(state.is_done());
    }

    #[test]
    fn unknown_augmentation_stops_the_walk() {
        // A CIE with a "zRP" augmentation string.
        let mut eh_frame: Vec<u8> = Vec::new();
        let cie_start = push_record(&mut eh_frame, |out| {
            out.extend_from_slice(&0u32.to_le_bytes());
            out.push(1);
            out.extend_from_slice(b"zRP\0");
            push_uleb(out, CAF);
            push_sleb(out, DAF);
            push_uleb(out, RA_REG);
            push_uleb(out, 2);
            out.push(DW_EH_PE_absptr.0);
            out.push(0);
        });
        let record_start = push_record(&mut eh_frame, |out| {
            out.extend_from_slice(&[0; 4]);
            out.extend_from_slice(&FUNC_A.to_le_bytes());
            out.extend_from_slice(&0x100usize.to_le_bytes());
            out.push(0);
        });
        let field_offset = record_start + 4;
        let cie_offset = (field_offset - cie_start) as u32;
        eh_frame[field_offset..field_offset + 4].copy_from_slice(&cie_offset.to_le_bytes());

        let eh_frame: &'static [u8] = Vec::leak(eh_frame);
        let eh_frame_begin = eh_frame.as_ptr() as usize;
        let fde_addr = eh_frame_begin + record_start;

        let mut hdr: Vec<u8> = Vec::new();
        hdr.push(1);
        hdr.push(DW_EH_PE_absptr.0);
        hdr.push(DW_EH_PE_udata4.0);
        hdr.push(DW_EH_PE_absptr.0);
        hdr.extend_from_slice(&eh_frame_begin.to_le_bytes());
        hdr.extend_from_slice(&1u32.to_le_bytes());
        hdr.extend_from_slice(&FUNC_A.to_le_bytes());
        hdr.extend_from_slice(&fde_addr.to_le_bytes());
        let hdr: &'static [u8] = Vec::leak(hdr);

        let tables = UnwindTables::parse(hdr, eh_frame_begin, 0).unwrap();

        let mut state = UnwindState::new();
        let mut regs = Registers::default();
        regs.set_dwarf_register(RA_REG as usize, FUNC_A + 0x10);
        state.load_registers(&regs);

        assert_eq!(state.next_frame(&tables), Err(Error::NotSupported));
        assert!(state.is_done());
    }

    #[test]
    fn unknown_cfa_opcode_stops_the_walk() {
        let built = build(&[FdeSpec {
            pc_begin: FUNC_A,
            pc_range: 0x100,
            // DW_CFA_remember_state is real DWARF, but out of subset.
            instructions: alloc::vec![0x0a],
        }]);
        let stack = fake_stack();

        let mut state = UnwindState::new();
        let mut regs = Registers::default();
        regs.set_dwarf_register(RA_REG as usize, FUNC_A + 0x10);
        regs.set_dwarf_register(DWARF_SP_REG, stack.as_ptr() as usize);
        state.load_registers(&regs);

        assert_eq!(state.next_frame(&built.tables), Err(Error::NotSupported));
        assert!(state.is_done());
    }

    #[test]
    fn pc_outside_every_fde_is_rejected() {
        let built = two_function_tables();

        let mut state = UnwindState::new();
        let mut regs = Registers::default();
        regs.set_dwarf_register(RA_REG as usize, FUNC_A + 0x5000);
        state.load_registers(&regs);

        assert!(state.next_frame(&built.tables).is_err());
        assert!(state.is_done());
    }
}
