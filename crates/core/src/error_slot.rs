//! Thread-local builtin error slot.
//!
//! A builtin body's calling convention is `(args) -> value-or-null-with-
//! error-slot`: instead of returning a `Result`, a body that wants to fail
//! sets this slot and returns a sentinel. The `Builtin` node handler checks
//! the slot immediately after the call and turns a set slot into an
//! `Error` eval-result. The slot is thread-local and carries only a
//! message string; there is no FFI boundary here, only Rust calling Rust.

use std::cell::RefCell;

thread_local! {
    static LAST_BUILTIN_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Record that the builtin currently executing on this thread failed.
pub fn set_builtin_error(message: impl Into<String>) {
    LAST_BUILTIN_ERROR.with(|slot| *slot.borrow_mut() = Some(message.into()));
}

/// Take (and clear) the pending builtin error, if any.
pub fn take_builtin_error() -> Option<String> {
    LAST_BUILTIN_ERROR.with(|slot| slot.borrow_mut().take())
}

/// Whether a builtin error is pending on this thread.
pub fn has_builtin_error() -> bool {
    LAST_BUILTIN_ERROR.with(|slot| slot.borrow().is_some())
}

/// Clear any pending builtin error without reading it.
pub fn clear_builtin_error() {
    LAST_BUILTIN_ERROR.with(|slot| *slot.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_take_roundtrip() {
        clear_builtin_error();
        assert!(!has_builtin_error());
        set_builtin_error("divide: bad operand");
        assert!(has_builtin_error());
        assert_eq!(take_builtin_error().as_deref(), Some("divide: bad operand"));
        assert!(!has_builtin_error());
    }

    #[test]
    fn clear_without_reading() {
        set_builtin_error("boom");
        clear_builtin_error();
        assert!(!has_builtin_error());
        assert_eq!(take_builtin_error(), None);
    }
}
