use crate::core::{Engine, EngineValue};

/// Tracks engine handles created while building a composite value.
///
/// Unless [`Scope::escape`] was called, every tracked handle is released when the scope is
/// closed or dropped, so an early `?` return never leaks half-built values. Escaping hands all
/// tracked handles to the caller at once.
pub struct Scope<'a> {
    engine: &'a dyn Engine,
    values: Vec<EngineValue>,
    escapable: bool,
    closed: bool,
}

impl<'a> Scope<'a> {
    pub fn new(engine: &'a dyn Engine) -> Self {
        Scope {
            engine,
            values: Vec::new(),
            escapable: false,
            closed: false,
        }
    }

    /// Tracks `value` and hands it back. Scalars are returned untracked.
    pub fn add(&mut self, value: EngineValue) -> EngineValue {
        if value.is_reference() {
            self.values.push(value.clone());
        }
        value
    }

    pub fn values(&self) -> &[EngineValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_escapable(&self) -> bool {
        self.escapable
    }

    /// Marks the scope so closing it keeps every tracked handle alive.
    pub fn escape(&mut self) {
        self.escapable = true;
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let values = std::mem::take(&mut self.values);
        if self.escapable {
            return;
        }
        for value in values.iter().rev() {
            if let Err(err) = self.engine.release(value) {
                log::warn!("Scope failed to release {value:?}: {err}");
            }
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
