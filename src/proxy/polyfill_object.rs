//! Properties every proxied host value answers.

use crate::core::{Engine, EngineValue};
use crate::error::BridgeError;
use crate::host::HostValue;
use crate::proxy::PolyfillFn;

pub fn lookup(name: &str) -> Option<PolyfillFn> {
    match name {
        "constructor" => Some(constructor),
        _ => None,
    }
}

/// The global constructor a native value of the same shape would report.
fn constructor(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    let name = match target {
        HostValue::List(_) | HostValue::Array(_) => "Array",
        HostValue::Set(_) => "Set",
        _ => "Object",
    };
    engine.global(name)
}
