//! `Set.prototype` look-alikes for proxied host sets.

use crate::core::{Engine, EngineValue, Scope};
use crate::error::BridgeError;
use crate::host::{HostSet, HostValue, Shared, release_handles};
use crate::proxy::{IteratorKind, IteratorSource, PolyfillFn, argument, iterator_function, new_function, to_engine, to_host};
use std::rc::Rc;

pub fn lookup(name: &str) -> Option<PolyfillFn> {
    let polyfill: PolyfillFn = match name {
        "add" => add,
        "clear" => clear,
        "delete" => delete,
        "entries" => entries,
        "forEach" => for_each,
        "has" => has,
        "keys" => values,
        "size" => size,
        "toJSON" => to_json,
        "toString" => to_string,
        "values" => values,
        _ => return None,
    };
    Some(polyfill)
}

fn set_of(target: &HostValue) -> Result<Shared<HostSet>, BridgeError> {
    match target {
        HostValue::Set(set) => Ok(set.clone()),
        other => Err(BridgeError::not_supported(format!("host {} is not a set", other.type_label()))),
    }
}

fn method<F>(engine: &dyn Engine, target: &HostValue, name: &str, body: F) -> Result<EngineValue, BridgeError>
where
    F: Fn(&dyn Engine, &Shared<HostSet>, &EngineValue, &[EngineValue]) -> Result<EngineValue, BridgeError> + 'static,
{
    let set = set_of(target)?;
    new_function(
        engine,
        name,
        Rc::new(move |engine: &dyn Engine, this: &EngineValue, args: &[EngineValue]| body(engine, &set, this, args)),
    )
}

fn add(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "add", |engine, set, this, args| {
        let value = to_host(engine, argument(args, 0))?;
        let inserted = set.borrow_mut().insert(value.clone());
        if !inserted {
            value.release_handle(engine)?;
        }
        engine.duplicate(this)
    })
}

fn clear(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "clear", |engine, set, _, _| {
        let items: Vec<HostValue> = set.borrow().iter().cloned().collect();
        set.borrow_mut().clear();
        release_handles(engine, &items)?;
        Ok(EngineValue::Undefined)
    })
}

fn delete(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "delete", |engine, set, _, args| {
        let value = to_host(engine, argument(args, 0))?;
        let removed = set.borrow_mut().take(&value);
        value.release_handle(engine)?;
        match removed {
            Some(removed) => {
                removed.release_handle(engine)?;
                Ok(EngineValue::Boolean(true))
            }
            None => Ok(EngineValue::Boolean(false)),
        }
    })
}

fn entries(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    iterator_function(engine, IteratorSource::Set(set_of(target)?), IteratorKind::Entries, "entries")
}

fn for_each(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "forEach", |engine, set, this, args| {
        let callback = argument(args, 0);
        if !engine.is_callable(callback) {
            return Err(BridgeError::not_supported("callback is not a function"));
        }
        let items: Vec<HostValue> = set.borrow().iter().cloned().collect();
        for item in &items {
            let mut scope = Scope::new(engine);
            let value = scope.add(to_engine(engine, item)?);
            let result = engine.call(callback, argument(args, 1), &[value.clone(), value, this.clone()])?;
            engine.release(&result)?;
        }
        Ok(EngineValue::Undefined)
    })
}

fn has(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "has", |engine, set, _, args| {
        let value = to_host(engine, argument(args, 0))?;
        let found = set.borrow().contains(&value);
        value.release_handle(engine)?;
        Ok(EngineValue::Boolean(found))
    })
}

fn size(_engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    Ok(EngineValue::Integer(set_of(target)?.borrow().len() as i32))
}

/// A set serializes as an empty object, as native sets do.
fn to_json(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "toJSON", |engine, _, _, _| engine.create_object())
}

fn to_string(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "toString", |_, _, _, _| Ok(EngineValue::String("[object Set]".to_string())))
}

fn values(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    iterator_function(engine, IteratorSource::Set(set_of(target)?), IteratorKind::Values, "values")
}
