//! `toJSON`, `valueOf` and `toString` for proxied host scalars.

use crate::core::{Engine, EngineValue};
use crate::error::BridgeError;
use crate::host::HostValue;
use crate::proxy::{PolyfillFn, new_function, to_engine};
use std::rc::Rc;

pub fn lookup(name: &str) -> Option<PolyfillFn> {
    let polyfill: PolyfillFn = match name {
        "toJSON" => to_json,
        "valueOf" => value_of,
        "toString" => to_string,
        _ => return None,
    };
    Some(polyfill)
}

/// A function returning the unwrapped scalar.
fn unwrapping(engine: &dyn Engine, target: &HostValue, name: &str) -> Result<EngineValue, BridgeError> {
    if !target.is_scalar() {
        return Err(BridgeError::not_supported(format!("host {} is not a primitive", target.type_label())));
    }
    let value = target.clone();
    new_function(
        engine,
        name,
        Rc::new(move |engine: &dyn Engine, _: &EngineValue, _: &[EngineValue]| to_engine(engine, &value)),
    )
}

fn to_json(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    unwrapping(engine, target, "toJSON")
}

fn value_of(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    unwrapping(engine, target, "valueOf")
}

fn to_string(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    let text = target.to_string();
    new_function(
        engine,
        "toString",
        Rc::new(move |_: &dyn Engine, _: &EngineValue, _: &[EngineValue]| Ok(EngineValue::String(text.clone()))),
    )
}
