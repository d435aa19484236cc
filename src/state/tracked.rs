/// A derived value that follows its source until it is manually overridden.
///
/// Any change of the source drops the override again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked<T> {
    source: T,
    overridden: Option<T>,
}

impl<T: Clone + PartialEq> Tracked<T> {
    /// Start tracking `source` with no override.
    pub fn new(source: T) -> Self {
        Self {
            source,
            overridden: None,
        }
    }

    /// Effective value: the override if any, else the source.
    pub fn get(&self) -> &T {
        self.overridden.as_ref().unwrap_or(&self.source)
    }

    /// Feed a fresh source value. Returns whether the effective value changed.
    pub fn track(&mut self, source: T) -> bool {
        if source == self.source {
            return false;
        }
        let before = self.get().clone();
        self.source = source;
        self.overridden = None;
        *self.get() != before
    }

    /// Pin the effective value until the source moves.
    pub fn set_override(&mut self, value: T) {
        self.overridden = Some(value);
    }
}
