use std::fmt;

/// Address of one cached resource: the path it is fetched from, plus whether
/// fetch failures for it raise a notification.
///
/// Two keys with the same path but different flags are different entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    path: String,
    notify: bool,
}

impl CacheKey {
    /// Key whose fetch failures stay silent.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            notify: false,
        }
    }

    /// Key whose fetch failures raise an error notification.
    pub fn notifying(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            notify: true,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn notify(&self) -> bool {
        self.notify
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.notify {
            write!(f, "{} [notify]", self.path)
        } else {
            f.write_str(&self.path)
        }
    }
}
