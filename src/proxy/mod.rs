//! Live proxies over host values.
//!
//! A proxy is a native engine proxy whose handler object carries one native function per trap.
//! The traps dispatch to a [`ProxyHandler`], which resolves properties against the host value
//! and, for collections and boxed primitives, against the polyfill tables.

use crate::converters::{PRIVATE_PROPERTY_PROXY_TARGET, values_to_engine_array};
use crate::core::{CallbackContext, CallbackId, CallbackReceiver, Engine, EngineValue, NativeFn, Scope};
use crate::error::BridgeError;
use crate::host::{HostValue, ProxyMode, release_handles};
use std::rc::Rc;

mod handler;
pub use handler::*;

mod iterator;
pub use iterator::*;

pub mod polyfill_list;
pub mod polyfill_map;
pub mod polyfill_object;
pub mod polyfill_primitive;
pub mod polyfill_set;

/// Fabricates the value of a polyfilled property: a plain value such as `length`, or a native
/// function bound to the target collection.
pub type PolyfillFn = fn(&dyn Engine, &HostValue) -> Result<EngineValue, BridgeError>;

const OBJECT_TRAPS: [&str; 5] = ["get", "set", "has", "deleteProperty", "ownKeys"];
const CALLABLE_TRAPS: [&str; 2] = ["apply", "construct"];

static UNDEFINED: EngineValue = EngineValue::Undefined;

/// The `index`-th argument, or undefined when absent.
pub(crate) fn argument(args: &[EngineValue], index: usize) -> &EngineValue {
    args.get(index).unwrap_or(&UNDEFINED)
}

pub(crate) fn to_engine(engine: &dyn Engine, value: &HostValue) -> Result<EngineValue, BridgeError> {
    engine.converter().to_engine(engine, value)
}

pub(crate) fn to_host(engine: &dyn Engine, value: &EngineValue) -> Result<HostValue, BridgeError> {
    engine.converter().to_host(engine, value)
}

pub(crate) fn to_host_args(engine: &dyn Engine, args: &[EngineValue]) -> Result<Vec<HostValue>, BridgeError> {
    let converter = engine.converter();
    args.iter().map(|arg| converter.to_host(engine, arg)).collect()
}

/// A native script array whose elements go through the engine's converter.
pub(crate) fn new_engine_array(engine: &dyn Engine, items: &[HostValue]) -> Result<EngineValue, BridgeError> {
    let converter = engine.converter();
    values_to_engine_array(converter.as_ref(), engine, items, 0)
}

pub(crate) fn new_function(engine: &dyn Engine, name: &str, callable: NativeFn) -> Result<EngineValue, BridgeError> {
    let (function, _) = engine.create_function(CallbackContext::new(name, callable))?;
    Ok(function)
}

/// Owned copies of a script array's elements.
pub(crate) fn array_elements(engine: &dyn Engine, array: &EngineValue) -> Result<Vec<EngineValue>, BridgeError> {
    if !array.is_reference() {
        return Ok(Vec::new());
    }
    let mut scope = Scope::new(engine);
    let mut elements = Vec::new();
    engine.array_for_each(array, &mut |_, item| {
        elements.push(scope.add(engine.duplicate(item)?));
        Ok(())
    })?;
    scope.escape();
    Ok(elements)
}

/// Releases every value, returning the first failure.
pub(crate) fn release_all(engine: &dyn Engine, values: &[EngineValue]) -> Result<(), BridgeError> {
    let mut outcome = Ok(());
    for value in values {
        let released = engine.release(value);
        if outcome.is_ok() {
            outcome = released;
        }
    }
    outcome
}

/// Releases the passthrough handles of host temporaries once `result` no longer needs them.
///
/// When the release fails the result is released too and the failure returned.
pub(crate) fn release_after(engine: &dyn Engine, result: Result<EngineValue, BridgeError>, temporaries: &[HostValue]) -> Result<EngineValue, BridgeError> {
    let released = release_handles(engine, temporaries);
    match (result, released) {
        (Ok(value), Err(error)) => {
            if let Err(e) = engine.release(&value) {
                log::warn!("failed to release result after {error}: {e}");
            }
            Err(error)
        }
        (result, _) => result,
    }
}

pub fn proxy_mode_of(value: &HostValue) -> ProxyMode {
    match value {
        HostValue::Class(_) => ProxyMode::Class,
        HostValue::Object(object) => object.proxy_mode(),
        _ => ProxyMode::Object,
    }
}

/// Creates a live proxy for `value`. The returned proxy is owned by the caller.
pub fn create_proxy(engine: &dyn Engine, value: &HostValue) -> Result<EngineValue, BridgeError> {
    let mode = proxy_mode_of(value);
    let handler: Rc<dyn ProxyHandler> = match value {
        HostValue::Object(object) if object.as_direct_proxy_handler().is_some() => Rc::new(DirectProxyHandlerAdapter::new(object.clone(), mode)),
        _ => Rc::new(ReflectionProxyHandler::new(value.clone(), mode)),
    };
    log::debug!("creating {mode:?} proxy for host {}", value.type_label());

    // The proxy keeps its target and handler alive, so the locals are always released.
    let mut locals = Scope::new(engine);
    let target = locals.add(match mode {
        ProxyMode::Class | ProxyMode::Function => engine.compile_and_evaluate("() => {}")?,
        ProxyMode::Object => engine.create_object()?,
    });
    let handler_object = locals.add(engine.create_object()?);
    bind_handler(engine, &handler_object, handler, mode)?;

    let mut scope = Scope::new(engine);
    let proxy = scope.add(engine.create_proxy(&target, &handler_object)?);
    scope.escape();
    Ok(proxy)
}

struct HandlerReceiver(Rc<dyn ProxyHandler>);

impl CallbackReceiver for HandlerReceiver {
    fn target_object(&self) -> Option<HostValue> {
        self.0.target_object()
    }
}

/// Installs one native function per trap on `handler_object` and stamps the first callback id
/// as the proxy-target marker.
fn bind_handler(engine: &dyn Engine, handler_object: &EngineValue, handler: Rc<dyn ProxyHandler>, mode: ProxyMode) -> Result<(), BridgeError> {
    let receiver: Rc<dyn CallbackReceiver> = Rc::new(HandlerReceiver(handler.clone()));
    let callable_traps: &[&str] = if mode == ProxyMode::Object { &[] } else { &CALLABLE_TRAPS };
    let mut first: Option<CallbackId> = None;
    for &trap in OBJECT_TRAPS.iter().chain(callable_traps) {
        let context = CallbackContext::new(trap, trap_callable(trap, handler.clone())).with_receiver(receiver.clone());
        let (function, id) = engine.create_function(context)?;
        let mut scope = Scope::new(engine);
        let function = scope.add(function);
        engine.set_named(handler_object, trap, &function)?;
        first.get_or_insert(id);
    }
    if let Some(id) = first {
        engine.set_private(handler_object, PRIVATE_PROPERTY_PROXY_TARGET, &EngineValue::Long(id.0 as i64))?;
    }
    Ok(())
}

fn trap_callable(trap: &str, handler: Rc<dyn ProxyHandler>) -> NativeFn {
    match trap {
        "get" => Rc::new(move |engine: &dyn Engine, _: &EngineValue, args: &[EngineValue]| {
            handler.get(engine, argument(args, 0), argument(args, 1), argument(args, 2))
        }),
        "set" => Rc::new(move |engine: &dyn Engine, _: &EngineValue, args: &[EngineValue]| {
            handler
                .set(engine, argument(args, 0), argument(args, 1), argument(args, 2), argument(args, 3))
                .map(EngineValue::Boolean)
        }),
        "has" => Rc::new(move |engine: &dyn Engine, _: &EngineValue, args: &[EngineValue]| {
            handler.has(engine, argument(args, 0), argument(args, 1)).map(EngineValue::Boolean)
        }),
        "deleteProperty" => Rc::new(move |engine: &dyn Engine, _: &EngineValue, args: &[EngineValue]| {
            handler.delete_property(engine, argument(args, 0), argument(args, 1)).map(EngineValue::Boolean)
        }),
        "ownKeys" => Rc::new(move |engine: &dyn Engine, _: &EngineValue, args: &[EngineValue]| handler.own_keys(engine, argument(args, 0))),
        "apply" => Rc::new(move |engine: &dyn Engine, _: &EngineValue, args: &[EngineValue]| {
            let arguments = array_elements(engine, argument(args, 2))?;
            let result = handler.apply(engine, argument(args, 0), argument(args, 1), &arguments);
            release_all(engine, &arguments)?;
            result
        }),
        _ => Rc::new(move |engine: &dyn Engine, _: &EngineValue, args: &[EngineValue]| {
            let arguments = array_elements(engine, argument(args, 1))?;
            let result = handler.construct(engine, argument(args, 0), &arguments, argument(args, 2));
            release_all(engine, &arguments)?;
            result
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MemoryEngine;

    #[test]
    fn test_release_all_continues_past_failures() {
        let engine = MemoryEngine::new();
        let stale = engine.create_object().unwrap();
        engine.release(&stale).unwrap();
        let live = engine.create_array().unwrap();
        let err = release_all(&engine, &[stale, live]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHandle { .. }), "{err:?}");
        assert_eq!(engine.live_handles(), 0);
    }
}
