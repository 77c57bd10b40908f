//! A value with one authoritative "current" entry plus every equivalent
//! alternative seen so far (mirrors, alternate local copies).

/// Mutators return `true` when something changed; the caller decides
/// whether that is worth announcing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiValue<T> {
    current: Option<T>,
    values: Vec<T>,
    last_value_wins: bool,
}

impl<T: Clone + PartialEq> MultiValue<T> {
    /// `last_value_wins` decides whether `set` overwrites an existing current value.
    pub fn new(last_value_wins: bool) -> Self {
        Self {
            current: None,
            values: Vec::new(),
            last_value_wins,
        }
    }

    /// Adds an alternative. The first value added also becomes current.
    pub fn add(&mut self, value: T) -> bool {
        if self.values.contains(&value) {
            return false;
        }
        if self.current.is_none() {
            self.current = Some(value.clone());
        }
        self.values.push(value);
        true
    }

    pub fn add_all(&mut self, values: impl IntoIterator<Item = T>) -> bool {
        values
            .into_iter()
            .fold(false, |changed, value| self.add(value) || changed)
    }

    /// Makes `value` current (adding it if new), subject to the overwrite policy.
    pub fn set(&mut self, value: T) -> bool {
        let added = self.add(value.clone());
        if self.current.as_ref() == Some(&value) {
            return added;
        }
        if self.last_value_wins {
            self.current = Some(value);
            return true;
        }
        added
    }

    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// All values, current first.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.current
            .iter()
            .chain(self.values.iter().filter(|v| Some(*v) != self.current.as_ref()))
    }

    pub fn contains(&self, value: &T) -> bool {
        self.values.contains(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Clone + PartialEq> Default for MultiValue<T> {
    fn default() -> Self {
        Self::new(false)
    }
}
