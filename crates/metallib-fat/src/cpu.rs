/// Bit set on 64-bit CPU types.
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;

/// Apple-designed GPUs.
pub const CPU_TYPE_APPLE_GPU: u32 = CPU_ARCH_ABI64 | 0x13;
/// AMD GPUs.
pub const CPU_TYPE_AMD_GPU: u32 = CPU_ARCH_ABI64 | 0x14;
/// Intel GPUs.
pub const CPU_TYPE_INTEL_GPU: u32 = CPU_ARCH_ABI64 | 0x15;
/// Generic 64-bit AIR, the slice every GPU family can consume after compilation.
pub const CPU_TYPE_AIR64: u32 = CPU_ARCH_ABI64 | 0x17;

/// Capability bits stored in the high byte of a CPU subtype.
///
/// These are masked off before subtypes are compared.
pub const CPU_SUBTYPE_MASK: u32 = 0xFF00_0000;

/// Returns a short human-readable name for a known GPU CPU type.
pub fn cpu_type_name(cpu_type: u32) -> Option<&'static str> {
    match cpu_type {
        CPU_TYPE_APPLE_GPU => Some("applegpu"),
        CPU_TYPE_AMD_GPU => Some("amdgpu"),
        CPU_TYPE_INTEL_GPU => Some("intelgpu"),
        CPU_TYPE_AIR64 => Some("air64"),
        _ => None,
    }
}
