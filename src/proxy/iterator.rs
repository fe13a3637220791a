use crate::core::{Engine, EngineValue, Scope};
use crate::error::BridgeError;
use crate::host::{HostMap, HostSet, HostValue, Shared};
use crate::proxy::{new_engine_array, new_function, to_engine};
use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IteratorKind {
    Keys,
    Values,
    Entries,
}

/// The live collection an iterator walks.
#[derive(Clone)]
pub enum IteratorSource {
    List(Shared<Vec<HostValue>>),
    Set(Shared<HostSet>),
    Map(Shared<HostMap>),
}

enum Step {
    Single(HostValue),
    Pair(HostValue, HostValue),
}

impl IteratorSource {
    pub fn of(value: &HostValue) -> Option<IteratorSource> {
        match value {
            HostValue::List(list) => Some(IteratorSource::List(list.clone())),
            HostValue::Set(set) => Some(IteratorSource::Set(set.clone())),
            HostValue::Map(map) => Some(IteratorSource::Map(map.clone())),
            _ => None,
        }
    }

    fn step(&self, position: usize, kind: IteratorKind) -> Option<Step> {
        match self {
            IteratorSource::List(list) => {
                let item = list.borrow().get(position).cloned()?;
                let index = HostValue::Integer(position as i32);
                Some(match kind {
                    IteratorKind::Keys => Step::Single(index),
                    IteratorKind::Values => Step::Single(item),
                    IteratorKind::Entries => Step::Pair(index, item),
                })
            }
            IteratorSource::Set(set) => {
                let item = set.borrow().get(position).cloned()?;
                Some(match kind {
                    IteratorKind::Entries => Step::Pair(item.clone(), item),
                    _ => Step::Single(item),
                })
            }
            IteratorSource::Map(map) => {
                let map = map.borrow();
                let (key, value) = map.entry_at(position)?;
                Some(match kind {
                    IteratorKind::Keys => Step::Single(key.clone()),
                    IteratorKind::Values => Step::Single(value.clone()),
                    IteratorKind::Entries => Step::Pair(key.clone(), value.clone()),
                })
            }
        }
    }
}

/// Single-pass cursor over a live collection. Once exhausted it stays exhausted, even if the
/// collection grows afterwards.
pub struct HostIterator {
    source: IteratorSource,
    kind: IteratorKind,
    position: Cell<usize>,
    done: Cell<bool>,
}

impl HostIterator {
    pub fn new(source: IteratorSource, kind: IteratorKind) -> Self {
        HostIterator {
            source,
            kind,
            position: Cell::new(0),
            done: Cell::new(false),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Advances and returns a `{ value, done }` result object.
    pub fn next(&self, engine: &dyn Engine) -> Result<EngineValue, BridgeError> {
        let step = if self.done.get() {
            None
        } else {
            self.source.step(self.position.get(), self.kind)
        };
        let mut scope = Scope::new(engine);
        let result = scope.add(engine.create_object()?);
        let done = match step {
            Some(step) => {
                let mut locals = Scope::new(engine);
                let value = locals.add(match step {
                    Step::Single(item) => to_engine(engine, &item)?,
                    Step::Pair(key, value) => new_engine_array(engine, &[key, value])?,
                });
                engine.set_named(&result, "value", &value)?;
                self.position.set(self.position.get() + 1);
                false
            }
            None => {
                self.done.set(true);
                engine.set_named(&result, "value", &EngineValue::Undefined)?;
                true
            }
        };
        engine.set_named(&result, "done", &EngineValue::Boolean(done))?;
        scope.escape();
        Ok(result)
    }
}

/// Wraps `iterator` in a script iterator object: a `next` method plus a `Symbol.iterator` method
/// returning the object itself.
pub fn iterator_object(engine: &dyn Engine, iterator: Rc<HostIterator>) -> Result<EngineValue, BridgeError> {
    let mut scope = Scope::new(engine);
    let object = scope.add(engine.create_object()?);
    let mut locals = Scope::new(engine);
    let next = locals.add(new_function(
        engine,
        "next",
        Rc::new(move |engine: &dyn Engine, _: &EngineValue, _: &[EngineValue]| iterator.next(engine)),
    )?);
    engine.set_named(&object, "next", &next)?;
    let symbol = locals.add(engine.well_known_symbol("Symbol.iterator")?);
    let itself = locals.add(new_function(
        engine,
        "[Symbol.iterator]",
        Rc::new(|engine: &dyn Engine, this: &EngineValue, _: &[EngineValue]| engine.duplicate(this)),
    )?);
    engine.set_property(&object, &symbol, &itself)?;
    locals.close();
    scope.escape();
    Ok(object)
}

/// A native function that starts a fresh iterator over `source` on every call.
pub fn iterator_function(engine: &dyn Engine, source: IteratorSource, kind: IteratorKind, name: &str) -> Result<EngineValue, BridgeError> {
    new_function(
        engine,
        name,
        Rc::new(move |engine: &dyn Engine, _: &EngineValue, _: &[EngineValue]| {
            iterator_object(engine, Rc::new(HostIterator::new(source.clone(), kind)))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MemoryEngine;
    use crate::host::shared;

    fn read_step(engine: &MemoryEngine, result: &EngineValue) -> (EngineValue, bool) {
        let value = engine.get_named(result, "value").unwrap();
        let done = engine.get_named(result, "done").unwrap();
        engine.release(result).unwrap();
        (value, done == EngineValue::Boolean(true))
    }

    #[test]
    fn test_iterator_is_single_pass() {
        let engine = MemoryEngine::new();
        let list = shared(vec![HostValue::Integer(1)]);
        let iterator = HostIterator::new(IteratorSource::List(list.clone()), IteratorKind::Values);
        assert_eq!(read_step(&engine, &iterator.next(&engine).unwrap()), (EngineValue::Integer(1), false));
        assert_eq!(read_step(&engine, &iterator.next(&engine).unwrap()), (EngineValue::Undefined, true));
        list.borrow_mut().push(HostValue::Integer(2));
        assert_eq!(read_step(&engine, &iterator.next(&engine).unwrap()), (EngineValue::Undefined, true));
        assert!(iterator.is_done());
    }

    #[test]
    fn test_iterator_sees_live_growth_before_exhaustion() {
        let engine = MemoryEngine::new();
        let list = shared(vec![HostValue::Integer(1)]);
        let iterator = HostIterator::new(IteratorSource::List(list.clone()), IteratorKind::Keys);
        list.borrow_mut().push(HostValue::Integer(2));
        assert_eq!(read_step(&engine, &iterator.next(&engine).unwrap()).0, EngineValue::Integer(0));
        assert_eq!(read_step(&engine, &iterator.next(&engine).unwrap()).0, EngineValue::Integer(1));
        assert!(read_step(&engine, &iterator.next(&engine).unwrap()).1);
    }
}
