use std::{
    env,
    fmt,
    fmt::{Debug, Display},
};

/// Holds a sensitive value (signing keys, API tokens, webhook secrets) so that it never leaks into logs or error
/// messages through `Debug` or `Display`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret<T>
where T: Clone + Default
{
    value: T,
}

impl<T: Clone + Default> Secret<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn reveal(&self) -> &T {
        &self.value
    }
}

impl Secret<String> {
    /// Reads a secret from the environment. Unset and blank variables are both treated as absent.
    pub fn from_env(name: &str) -> Option<Self> {
        env::var(name).ok().filter(|s| !s.trim().is_empty()).map(Self::new)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.value.as_bytes()
    }
}

impl<T: Clone + Default> Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl<T: Clone + Default> Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}
