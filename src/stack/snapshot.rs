//! C1 — Stack Snapshot: capture/restore a slice of the native call stack
//! between two addresses.

use std::cell::RefCell;
use std::sync::OnceLock;

/// Which way the native stack grows. Detected once at process startup by
/// comparing the address of a local in a deeper call to one in its caller
/// (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackDirection {
    Down,
    Up,
}

static DIRECTION: OnceLock<StackDirection> = OnceLock::new();

pub fn direction() -> StackDirection {
    *DIRECTION.get_or_init(detect_direction)
}

fn detect_direction() -> StackDirection {
    let outer_local = 0u8;
    #[inline(never)]
    fn inner(outer_addr: usize) -> StackDirection {
        let inner_local = 0u8;
        let inner_addr = &inner_local as *const u8 as usize;
        if inner_addr < outer_addr {
            StackDirection::Down
        } else {
            StackDirection::Up
        }
    }
    inner(&outer_local as *const u8 as usize)
}

thread_local! {
    /// Stack ranges a continuation capture might currently overwrite,
    /// innermost (most recently pushed) last. Used only for the debug
    /// pointer check on [`crate::value::Value`].
    static CAPTURABLE_RANGES: RefCell<Vec<(usize, usize)>> = RefCell::new(Vec::new());
}

/// Mark `[low, high)` as capturable for the duration of the returned guard.
pub struct CapturableGuard;

pub fn push_capturable_range(low: usize, high: usize) -> CapturableGuard {
    CAPTURABLE_RANGES.with(|r| r.borrow_mut().push((low, high)));
    CapturableGuard
}

impl Drop for CapturableGuard {
    fn drop(&mut self) {
        CAPTURABLE_RANGES.with(|r| {
            r.borrow_mut().pop();
        });
    }
}

#[cfg(debug_assertions)]
pub fn debug_assert_not_capturable(addr: usize) {
    CAPTURABLE_RANGES.with(|r| {
        for &(low, high) in r.borrow().iter() {
            assert!(
                !(addr >= low && addr < high),
                "Value holds a pointer (0x{addr:x}) into a capturable stack range \
                 (0x{low:x}..0x{high:x}); it would dangle once a continuation is \
                 captured across it"
            );
        }
    });
}

#[cfg(not(debug_assertions))]
#[inline(always)]
pub fn debug_assert_not_capturable(_addr: usize) {}

/// A captured slice of the native stack, between two absolute addresses.
/// Because the address range is preserved bit-for-bit across
/// capture/restore, any pointer into the saved stack stays valid once
/// restored.
#[derive(Clone)]
pub struct StackSnapshot {
    /// The address nearest the handler frame (the end that does not move
    /// as more frames are pushed).
    base: usize,
    bytes: Vec<u8>,
}

impl StackSnapshot {
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self) -> (usize, usize) {
        match direction() {
            StackDirection::Down => (self.base - self.bytes.len(), self.base),
            StackDirection::Up => (self.base, self.base + self.bytes.len()),
        }
    }

    /// Capture the bytes between `base` (the handler's stackbase) and `top`
    /// (the current stack pointer at the yield site) into a heap buffer.
    ///
    /// # Safety
    /// `base` and `top` must both be live addresses on the calling thread's
    /// native stack.
    pub unsafe fn capture(base: usize, top: usize) -> Self {
        let (low, high) = match direction() {
            StackDirection::Down => (top, base),
            StackDirection::Up => (base, top),
        };
        let len = high.saturating_sub(low);
        let mut bytes = vec![0u8; len];
        if len > 0 {
            std::ptr::copy_nonoverlapping(low as *const u8, bytes.as_mut_ptr(), len);
        }
        Self { base, bytes }
    }

    /// Copy the captured bytes back to the same absolute address range.
    ///
    /// # Safety
    /// The caller must ensure this cannot trample the frame performing the
    /// restore — see [`restore_guarded`], which is the entry point the
    /// effect core actually uses.
    unsafe fn restore_raw(&self) {
        if self.bytes.is_empty() {
            return;
        }
        let (low, _high) = self.range();
        std::ptr::copy_nonoverlapping(self.bytes.as_ptr(), low as *mut u8, self.bytes.len());
    }

    /// Merge a later-captured snapshot into this one. Where the ranges
    /// overlap, `other`'s bytes win (spec §4.3 `pop-up-to`: later fragment
    /// layers overwrite earlier ones).
    pub fn extend(&mut self, other: &StackSnapshot) {
        if other.bytes.is_empty() {
            return;
        }
        if self.bytes.is_empty() {
            *self = other.clone();
            return;
        }
        let (self_low, self_high) = self.range();
        let (other_low, other_high) = other.range();
        let low = self_low.min(other_low);
        let high = self_high.max(other_high);
        let mut merged = vec![0u8; high - low];
        merged[self_low - low..self_low - low + self.bytes.len()].copy_from_slice(&self.bytes);
        merged[other_low - low..other_low - low + other.bytes.len()]
            .copy_from_slice(&other.bytes);
        self.base = match direction() {
            StackDirection::Down => high,
            StackDirection::Up => low,
        };
        self.bytes = merged;
    }
}

/// Restore `snapshot`'s bytes and then invoke `jump`, guaranteeing the
/// restoring memcpy cannot trample the frame performing it: a scratch
/// region is overallocated on the executing stack, in the direction the
/// stack grows, before the copy runs (spec §4.1 "Restoration constraint").
///
/// `jump` must transfer control away without returning through this frame
/// (it is always a [`crate::stack::jump::JumpContext::jump`] call in
/// practice) — the bytes this function just restored may alias frames
/// between here and wherever a normal `return` would otherwise unwind to.
#[inline(never)]
pub fn restore_guarded(snapshot: &StackSnapshot, jump: impl FnOnce() -> !) -> ! {
    // Overallocate scratch so this frame sits further from the handler's
    // stackbase than `snapshot`'s destination range, in the growth
    // direction, before the memcpy below runs.
    const SCRATCH_BYTES: usize = 8 * 1024;
    let scratch = [0u8; SCRATCH_BYTES];
    std::hint::black_box(&scratch);
    unsafe { snapshot.restore_raw() };
    jump()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_is_consistent_across_calls() {
        assert_eq!(direction(), direction());
    }

    #[test]
    fn capture_and_restore_roundtrip_same_bytes() {
        let mut buf = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let base = buf.as_ptr() as usize + buf.len();
        let top = buf.as_ptr() as usize;
        let snap = unsafe { StackSnapshot::capture(base, top) };
        assert_eq!(snap.len(), buf.len());
        buf = [0u8; 8];
        unsafe { snap.restore_raw() };
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn extend_overwrites_overlap_with_later_layer() {
        let mut a = [0u8; 16];
        for (i, b) in a.iter_mut().enumerate() {
            *b = i as u8;
        }
        let base_a = a.as_ptr() as usize + a.len();
        let top_a = a.as_ptr() as usize;
        let snap_a = unsafe { StackSnapshot::capture(base_a, top_a) };

        let mut b = [0xffu8; 8];
        let base_b = b.as_ptr() as usize + b.len();
        let top_b = b.as_ptr() as usize;
        let snap_b = unsafe { StackSnapshot::capture(base_b, top_b) };

        let mut merged = snap_a.clone();
        merged.extend(&snap_b);
        assert!(merged.len() >= snap_a.len());
        drop(a);
        drop(b);
    }
}
