//! `Map.prototype` look-alikes for proxied host maps.

use crate::converters::map_to_engine_object;
use crate::core::{Engine, EngineValue, Scope};
use crate::error::BridgeError;
use crate::host::{HostMap, HostValue, Shared, release_handles};
use crate::proxy::{IteratorKind, IteratorSource, PolyfillFn, argument, iterator_function, new_function, to_engine, to_host};
use std::rc::Rc;

pub fn lookup(name: &str) -> Option<PolyfillFn> {
    let polyfill: PolyfillFn = match name {
        "clear" => clear,
        "delete" => delete,
        "entries" => entries,
        "forEach" => for_each,
        "get" => get,
        "has" => has,
        "keys" => keys,
        "set" => set,
        "size" => size,
        "toJSON" => to_json,
        "values" => values,
        _ => return None,
    };
    Some(polyfill)
}

fn map_of(target: &HostValue) -> Result<Shared<HostMap>, BridgeError> {
    match target {
        HostValue::Map(map) => Ok(map.clone()),
        other => Err(BridgeError::not_supported(format!("host {} is not a map", other.type_label()))),
    }
}

fn method<F>(engine: &dyn Engine, target: &HostValue, name: &str, body: F) -> Result<EngineValue, BridgeError>
where
    F: Fn(&dyn Engine, &Shared<HostMap>, &EngineValue, &[EngineValue]) -> Result<EngineValue, BridgeError> + 'static,
{
    let map = map_of(target)?;
    new_function(
        engine,
        name,
        Rc::new(move |engine: &dyn Engine, this: &EngineValue, args: &[EngineValue]| body(engine, &map, this, args)),
    )
}

/// Map keys are matched by their display form.
fn key_argument(engine: &dyn Engine, args: &[EngineValue]) -> Result<String, BridgeError> {
    let key = to_host(engine, argument(args, 0))?;
    key.release_handle(engine)?;
    Ok(key.to_string())
}

fn clear(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "clear", |engine, map, _, _| {
        let entries: Vec<HostValue> = map.borrow().iter().flat_map(|(k, v)| [k.clone(), v.clone()]).collect();
        map.borrow_mut().clear();
        release_handles(engine, &entries)?;
        Ok(EngineValue::Undefined)
    })
}

fn delete(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "delete", |engine, map, _, args| {
        let key = key_argument(engine, args)?;
        let removed = map.borrow_mut().remove_entry(&key);
        match removed {
            Some((key, value)) => {
                release_handles(engine, [&key, &value])?;
                Ok(EngineValue::Boolean(true))
            }
            None => Ok(EngineValue::Boolean(false)),
        }
    })
}

fn entries(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    iterator_function(engine, IteratorSource::Map(map_of(target)?), IteratorKind::Entries, "entries")
}

fn for_each(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "forEach", |engine, map, this, args| {
        let callback = argument(args, 0);
        if !engine.is_callable(callback) {
            return Err(BridgeError::not_supported("callback is not a function"));
        }
        let entries: Vec<(HostValue, HostValue)> = map.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (key, value) in &entries {
            let mut scope = Scope::new(engine);
            let key = scope.add(to_engine(engine, key)?);
            let value = scope.add(to_engine(engine, value)?);
            let result = engine.call(callback, argument(args, 1), &[value, key, this.clone()])?;
            engine.release(&result)?;
        }
        Ok(EngineValue::Undefined)
    })
}

fn get(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "get", |engine, map, _, args| {
        let key = key_argument(engine, args)?;
        let value = map.borrow().get(&key).cloned();
        match value {
            Some(value) => to_engine(engine, &value),
            None => Ok(EngineValue::Undefined),
        }
    })
}

fn has(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "has", |engine, map, _, args| {
        let key = key_argument(engine, args)?;
        Ok(EngineValue::Boolean(map.borrow().contains_key(&key)))
    })
}

fn keys(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    iterator_function(engine, IteratorSource::Map(map_of(target)?), IteratorKind::Keys, "keys")
}

fn set(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "set", |engine, map, this, args| {
        let key = to_host(engine, argument(args, 0))?;
        let value = to_host(engine, argument(args, 1))?;
        let replaced = map.borrow_mut().insert_entry(key, value);
        if let Some((key, value)) = replaced {
            release_handles(engine, [&key, &value])?;
        }
        engine.duplicate(this)
    })
}

fn size(_engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    Ok(EngineValue::Integer(map_of(target)?.borrow().len() as i32))
}

/// Serializes as a plain object of key to value.
fn to_json(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "toJSON", |engine, map, _, _| {
        let snapshot = map.borrow().clone();
        let converter = engine.converter();
        map_to_engine_object(converter.as_ref(), engine, &snapshot, 0)
    })
}

fn values(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    iterator_function(engine, IteratorSource::Map(map_of(target)?), IteratorKind::Values, "values")
}
