//! Format wrappers for zenith-chain

use std::fmt;

/// Wrapper to override `Debug`, redirecting it to the `Display` impl.
pub struct DisplayToDebug<T>(pub T);

impl<T> fmt::Debug for DisplayToDebug<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}
