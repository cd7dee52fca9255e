use crate::{ControlRegisters, Cr0, Cr2, Cr3};

/// [`ControlRegisters`] backed by the executing CPU.
#[derive(Debug)]
pub struct NativeRegisters {
    _private: (),
}

impl NativeRegisters {
    /// # Safety
    /// The value must only be used at CPL0; every accessor executes a
    /// privileged `mov` to or from a control register.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl ControlRegisters for NativeRegisters {
    #[inline]
    fn cr0(&self) -> Cr0 {
        use crate::LoadRegisterUnsafe;
        // SAFETY: constructing `NativeRegisters` promised CPL0.
        unsafe { Cr0::load_unsafe() }
    }

    #[inline]
    unsafe fn write_cr0(&self, value: Cr0) {
        use crate::StoreRegisterUnsafe;
        unsafe { value.store_unsafe() }
    }

    #[inline]
    fn cr2(&self) -> Cr2 {
        use crate::LoadRegisterUnsafe;
        // SAFETY: constructing `NativeRegisters` promised CPL0.
        unsafe { Cr2::load_unsafe() }
    }

    #[inline]
    fn cr3(&self) -> Cr3 {
        use crate::LoadRegisterUnsafe;
        // SAFETY: constructing `NativeRegisters` promised CPL0.
        unsafe { Cr3::load_unsafe() }
    }

    #[inline]
    unsafe fn write_cr3(&self, value: Cr3) {
        use crate::StoreRegisterUnsafe;
        unsafe { value.store_unsafe() }
    }
}
