#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => {
        #[cfg(test)]
        tracing::trace!($($arg)+)
    };
}
pub(crate) use crate::trace;

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(test)]
        tracing::debug!($($arg)+)
    };
}
pub(crate) use crate::debug;

// Warnings and errors are never compiled out: they report subscribers being cut off.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        tracing::warn!($($arg)+)
    };
}
pub(crate) use crate::warn;

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        tracing::error!($($arg)+)
    };
}
pub(crate) use crate::error;
