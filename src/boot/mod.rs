// SPDX-License-Identifier: MPL-2.0

//! The architecture-independent boot module.
//!
//! The boot protocol itself (attribute stream parsing, platform discovery)
//! lives in the loader shim, outside this crate. What arrives here is an
//! already-parsed [`BootContext`]; this module validates it and publishes
//! its pieces to the rest of the kernel.

pub mod kcmdline;
pub mod memory_region;

use spin::Once;

use self::memory_region::MemoryRegion;
use crate::mm::{Paddr, Vaddr};

/// The magic number the loader shim passes along with the attribute list.
pub const BOOT_MAGIC: u32 = 0x7665_726d;

/// Platform discovery results.
#[derive(Copy, Clone, Debug)]
pub struct PlatformInfo {
    pub name: &'static str,
    /// Physical address of the ACPI RSDP, when the loader found one.
    pub acpi_rsdp: Option<Paddr>,
}

/// Where the kernel binary itself sits.
#[derive(Copy, Clone, Debug)]
pub struct KernelInfo {
    pub physical_base: Paddr,
    pub virtual_base: Vaddr,
    pub size: usize,
}

/// The framebuffer arguments.
#[derive(Copy, Clone, Debug)]
pub struct FramebufferInfo {
    pub address: Paddr,
    pub width: usize,
    pub height: usize,
    /// Bits per pixel of the buffer.
    pub bpp: usize,
}

/// One loader-provided module (e.g. an initrd).
#[derive(Copy, Clone, Debug)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub address: Paddr,
    pub size: usize,
}

/// The pre-parsed boot context. Mandatory attributes are plain fields;
/// absence is checked (fatally) at [`init`] time, not at every access.
#[derive(Clone, Debug)]
pub struct BootContext {
    pub magic: u32,
    pub platform_info: Option<PlatformInfo>,
    pub kernel_info: Option<KernelInfo>,
    pub memory_map: Option<&'static [MemoryRegion]>,
    pub command_line: Option<&'static str>,
    pub framebuffer: Option<FramebufferInfo>,
    pub modules: &'static [ModuleInfo],
}

struct ValidatedContext {
    platform_info: PlatformInfo,
    kernel_info: KernelInfo,
    memory_map: &'static [MemoryRegion],
    command_line: &'static str,
    framebuffer: Option<FramebufferInfo>,
    modules: &'static [ModuleInfo],
}

static CONTEXT: Once<ValidatedContext> = Once::new();

pub(crate) fn init(ctx: BootContext) {
    bug_on!(
        ctx.magic != BOOT_MAGIC,
        "bad boot magic {:#010x}",
        ctx.magic
    );

    let validated = ValidatedContext {
        platform_info: ctx
            .platform_info
            .unwrap_or_else(|| panic!("boot context is missing the platform info attribute")),
        kernel_info: ctx
            .kernel_info
            .unwrap_or_else(|| panic!("boot context is missing the kernel info attribute")),
        memory_map: ctx
            .memory_map
            .unwrap_or_else(|| panic!("boot context is missing the memory map attribute")),
        command_line: ctx.command_line.unwrap_or(""),
        framebuffer: ctx.framebuffer,
        modules: ctx.modules,
    };

    CONTEXT.call_once(|| validated);

    let info = platform_info();
    log::info!("booting on {}", info.name);
}

fn context() -> &'static ValidatedContext {
    CONTEXT
        .get()
        .expect("the boot context is read before boot::init")
}

pub fn platform_info() -> &'static PlatformInfo {
    &context().platform_info
}

pub fn kernel_info() -> &'static KernelInfo {
    &context().kernel_info
}

pub fn memory_regions() -> &'static [MemoryRegion] {
    context().memory_map
}

pub fn kernel_cmdline() -> &'static str {
    context().command_line
}

pub fn framebuffer_info() -> Option<&'static FramebufferInfo> {
    context().framebuffer.as_ref()
}

pub fn modules() -> &'static [ModuleInfo] {
    context().modules
}
