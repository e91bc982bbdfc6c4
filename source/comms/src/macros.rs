//! Logging
//!
//! `lin_log!(level, "fmt", args..)` goes to `defmt` when the `defmt-logging`
//! feature is on. Otherwise the arguments are still evaluated, once, and then
//! dropped, so a build without a logger behaves the same.

#![allow(unused_macros)]

#[cfg(feature = "defmt-logging")]
macro_rules! lin_log {
    ($level:ident, $($arg:expr),+ $(,)?) => {
        defmt::$level!($($arg),+)
    };
}

#[cfg(not(feature = "defmt-logging"))]
macro_rules! lin_log {
    ($level:ident, $($arg:expr),+ $(,)?) => {{
        $( let _ = $arg; )+
    }};
}

#[cfg(all(test, not(feature = "defmt-logging")))]
mod tests {
    use core::cell::Cell;

    #[test]
    fn disabled_log_still_evaluates_arguments_once() {
        let calls = Cell::new(0u8);
        let next = || {
            calls.set(calls.get() + 1);
            calls.get()
        };
        lin_log!(warn, "ID {=u8:#x} in slot {=u8}", next(), next(),);
        assert_eq!(calls.get(), 2);
    }
}
