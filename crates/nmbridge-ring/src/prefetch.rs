//! Software prefetch hints for the slot loops.
//!
//! Hints never fault and never change program behavior; on targets without a
//! prefetch instruction they compile to nothing.

/// Prefetch `ptr` for an upcoming write
#[inline(always)]
pub fn prefetch_write<T>(ptr: *const T) {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: prefetch is a hint; it does not dereference or fault on bad addresses.
        unsafe {
            use core::arch::x86_64::{_MM_HINT_T0, _mm_prefetch};
            _mm_prefetch::<_MM_HINT_T0>(ptr.cast::<i8>());
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: PRFM is a hint and does not fault.
        unsafe {
            core::arch::asm!(
                "prfm pstl1keep, [{ptr}]",
                ptr = in(reg) ptr,
                options(nostack, preserves_flags, readonly)
            );
        }
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = ptr;
    }
}
