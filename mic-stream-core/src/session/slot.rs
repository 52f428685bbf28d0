use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::models::error::StreamError;

static GLOBAL_SLOT: OnceLock<Arc<SessionSlot>> = OnceLock::new();

/// Claim on the microphone shared by every controller bound to the same slot.
///
/// At most one session holds a slot at a time. Controllers use the
/// process-wide slot unless given their own.
#[derive(Debug, Default)]
pub struct SessionSlot {
    holder: Mutex<Option<String>>,
}

impl SessionSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide slot.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_SLOT.get_or_init(Self::new))
    }

    pub fn is_claimed(&self) -> bool {
        self.holder.lock().is_some()
    }

    /// Session id currently holding the slot.
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().clone()
    }

    /// Claim the slot for `session_id` until the returned guard drops.
    pub fn claim(self: &Arc<Self>, session_id: &str) -> Result<SlotClaim, StreamError> {
        let mut holder = self.holder.lock();
        if let Some(current) = holder.as_deref() {
            log::warn!("microphone already claimed by session {}", current);
            return Err(StreamError::SessionAlreadyActive);
        }
        *holder = Some(session_id.to_string());
        Ok(SlotClaim {
            slot: Arc::clone(self),
        })
    }
}

/// Releases its `SessionSlot` on drop.
#[derive(Debug)]
pub struct SlotClaim {
    slot: Arc<SessionSlot>,
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        self.slot.holder.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_until_release() {
        let slot = SessionSlot::new();

        let claim = slot.claim("a").unwrap();
        assert_eq!(slot.holder().as_deref(), Some("a"));
        assert_eq!(slot.claim("b").unwrap_err(), StreamError::SessionAlreadyActive);

        drop(claim);
        assert!(!slot.is_claimed());
        assert!(slot.claim("b").is_ok());
    }

    #[test]
    fn global_slot_is_shared() {
        assert!(Arc::ptr_eq(&SessionSlot::global(), &SessionSlot::global()));
    }

    #[test]
    fn private_slots_are_independent() {
        let first = SessionSlot::new();
        let second = SessionSlot::new();

        let _claim = first.claim("a").unwrap();
        assert!(second.claim("b").is_ok());
    }
}
