//! The tagged result code shared between event sources and the event loop.
//!
//! Ported from the `EVENT_CODE`/`EVENT_EXIT`/`EVENT_SIGNAL`/`EVENT_NOTIFY`/`EVENT_FAIL` macros:
//! the low 8 bits carry a payload and exactly one of four flag bits (8..11) identifies the
//! category.

const PAYLOAD_MASK: i32 = 0xFF;
const EXITED: i32 = 1 << 8;
const SIGNALED: i32 = 1 << 9;
const NOTIFIED: i32 = 1 << 10;
const FAILED: i32 = 1 << 11;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaggedCode(i32);

impl TaggedCode {
    pub fn exited(payload: i32) -> TaggedCode {
        TaggedCode((payload & PAYLOAD_MASK) | EXITED)
    }

    pub fn signaled(payload: i32) -> TaggedCode {
        TaggedCode((payload & PAYLOAD_MASK) | SIGNALED)
    }

    pub fn notified(payload: i32) -> TaggedCode {
        TaggedCode((payload & PAYLOAD_MASK) | NOTIFIED)
    }

    pub fn failed(payload: i32) -> TaggedCode {
        TaggedCode((payload & PAYLOAD_MASK) | FAILED)
    }

    /// A code carrying no category flag, meaning "nothing happened, keep looping".
    pub fn none() -> TaggedCode {
        TaggedCode(0)
    }

    pub fn payload(self) -> i32 {
        self.0 & PAYLOAD_MASK
    }

    pub fn is_exited(self) -> bool {
        self.0 & EXITED != 0
    }

    pub fn is_signaled(self) -> bool {
        self.0 & SIGNALED != 0
    }

    pub fn is_notified(self) -> bool {
        self.0 & NOTIFIED != 0
    }

    pub fn is_failed(self) -> bool {
        self.0 & FAILED != 0
    }

    /// True once the loop should stop: the sandbox exited or died by signal.
    pub fn is_terminal(self) -> bool {
        self.is_exited() || self.is_signaled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_mutually_exclusive() {
        let codes = [
            TaggedCode::exited(3),
            TaggedCode::signaled(9),
            TaggedCode::notified(4),
            TaggedCode::failed(255),
        ];
        for code in codes {
            let flags = [
                code.is_exited(),
                code.is_signaled(),
                code.is_notified(),
                code.is_failed(),
            ];
            assert_eq!(flags.iter().filter(|b| **b).count(), 1);
        }
    }

    #[test]
    fn payload_is_masked_to_8_bits() {
        assert_eq!(TaggedCode::exited(300).payload(), 300 & 0xFF);
    }

    #[test]
    fn none_is_not_terminal() {
        assert!(!TaggedCode::none().is_terminal());
    }

    #[test]
    fn exited_and_signaled_are_terminal() {
        assert!(TaggedCode::exited(0).is_terminal());
        assert!(TaggedCode::signaled(0).is_terminal());
        assert!(!TaggedCode::notified(0).is_terminal());
        assert!(!TaggedCode::failed(0).is_terminal());
    }
}
