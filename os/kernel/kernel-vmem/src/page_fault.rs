use bitfield_struct::bitfield;

/// Page-fault error code layout (i386).
///
/// Pushed by the CPU before entering the page-fault handler; each bit
/// describes the condition that caused the fault.
/// Reference: Intel SDM Vol. 3A, §4.7 "Page-Fault Exceptions".
#[bitfield(u32)]
pub struct PageFaultErrorCode {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read access.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32, // reserved / ignored bits
}

impl PageFaultErrorCode {
    /// Whether demand paging can resolve the fault by installing a mapping.
    #[must_use]
    pub const fn is_not_present(&self) -> bool {
        !self.present() && !self.reserved_bit()
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_bit() {
            "Reserved bit set in a paging structure"
        } else if !self.present() {
            "Non-present page (no table or no entry yet)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}
