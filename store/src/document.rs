//! Document versioning primitives.

/// Monotonically increasing version of a stored document.
///
/// Versions start at 1 on first insert and bump on every committed write.
/// Conflict detection compares the version a transaction observed at read
/// time (or observed absence) against the current one at commit time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly inserted document.
    #[must_use]
    pub const fn first() -> Self {
        Self(1)
    }

    /// The version after one more committed write.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A stored document plus its current version.
#[derive(Clone, Debug)]
pub struct Versioned<T> {
    /// The document value.
    pub value: T,
    /// Current version.
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Wraps a freshly inserted value at [`Version::first`].
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            value,
            version: Version::first(),
        }
    }

    /// Replaces the value, bumping the version.
    pub fn replace(&mut self, value: T) {
        self.value = value;
        self.version = self.version.next();
    }
}
