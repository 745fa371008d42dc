//! Process-scoped registry of live target handles.
//!
//! Handles register a descriptor on creation and drop out automatically:
//! the registry only keeps weak references, so looking a target up never
//! confers ownership and never keeps a dead handle alive.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use once_cell::sync::Lazy;

/// Descriptor of a live target handle: which wire resources it occupies.
#[derive(Debug)]
pub struct TargetInfo {
    /// GPIO driving SWCLK.
    pub swclk_pin: u8,
    /// GPIO driving/sampling SWDIO.
    pub swdio_pin: u8,
    /// SWCLK frequency the handle was created with, in kHz.
    pub frequency_khz: u32,
}

static REGISTRY: Lazy<Mutex<Vec<Weak<TargetInfo>>>> = Lazy::new(|| Mutex::new(Vec::new()));

pub(crate) fn register(info: &Arc<TargetInfo>) {
    let mut entries = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    entries.retain(|entry| entry.strong_count() > 0);
    entries.push(Arc::downgrade(info));
}

/// Descriptors of every target handle currently alive in this process.
pub fn active_targets() -> Vec<Arc<TargetInfo>> {
    let mut entries = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    entries.retain(|entry| entry.strong_count() > 0);
    entries.iter().filter_map(Weak::upgrade).collect()
}

#[cfg(test)]
mod tests {
    use super::{active_targets, register, TargetInfo};
    use std::sync::Arc;

    #[test]
    fn dead_handles_disappear_from_the_registry() {
        let info = Arc::new(TargetInfo {
            swclk_pin: 14,
            swdio_pin: 15,
            frequency_khz: 125,
        });
        register(&info);

        assert!(active_targets()
            .iter()
            .any(|entry| entry.swclk_pin == 14 && entry.frequency_khz == 125));

        drop(info);

        assert!(!active_targets().iter().any(|entry| entry.swclk_pin == 14));
    }
}
