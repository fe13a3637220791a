use crate::converters::Converter;
use crate::core::{CallbackId, EngineValue, FunctionType, ReferenceKind, TypedArrayKind};
use crate::error::BridgeError;
use crate::host::HostValue;
use std::fmt;
use std::rc::Rc;

/// Native function body: `(engine, this, arguments) -> result`.
///
/// `this` and the arguments are borrowed from the engine for the duration of the call; the
/// returned value is owned by the engine afterwards.
pub type NativeFn = Rc<dyn Fn(&dyn Engine, &EngineValue, &[EngineValue]) -> Result<EngineValue, BridgeError>>;

/// The host-side object a native callback is bound to.
pub trait CallbackReceiver {
    /// The host value this receiver stands for, if any. Used to unwrap proxies.
    fn target_object(&self) -> Option<HostValue> {
        None
    }
}

pub struct CallbackContext {
    pub name: String,
    pub receiver: Option<Rc<dyn CallbackReceiver>>,
    pub callable: NativeFn,
}

impl CallbackContext {
    pub fn new(name: impl Into<String>, callable: NativeFn) -> Self {
        CallbackContext {
            name: name.into(),
            receiver: None,
            callable,
        }
    }

    pub fn with_receiver(mut self, receiver: Rc<dyn CallbackReceiver>) -> Self {
        self.receiver = Some(receiver);
        self
    }
}

impl fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackContext")
            .field("name", &self.name)
            .field("has_receiver", &self.receiver.is_some())
            .finish()
    }
}

/// The script engine as seen from the host.
///
/// Ownership rules: every `EngineValue::Reference` returned by a method is owned by the caller
/// and must be released exactly once. Values handed to callbacks (iteration closures, native
/// functions) are borrowed and released by the engine once the callback returns.
pub trait Engine {
    fn create_array(&self) -> Result<EngineValue, BridgeError>;
    fn create_object(&self) -> Result<EngineValue, BridgeError>;
    fn create_map(&self) -> Result<EngineValue, BridgeError>;
    fn create_set(&self) -> Result<EngineValue, BridgeError>;
    fn create_weak_map(&self) -> Result<EngineValue, BridgeError>;
    fn create_typed_array(&self, kind: TypedArrayKind, length: usize) -> Result<EngineValue, BridgeError>;
    /// Creates a symbol. A `global` symbol is shared by description (`Symbol.for`).
    fn create_symbol(&self, description: &str, global: bool) -> Result<EngineValue, BridgeError>;
    fn create_proxy(&self, target: &EngineValue, handler: &EngineValue) -> Result<EngineValue, BridgeError>;
    fn create_function(&self, context: CallbackContext) -> Result<(EngineValue, CallbackId), BridgeError>;
    fn callback_context(&self, id: CallbackId) -> Option<Rc<CallbackContext>>;
    fn compile_and_evaluate(&self, source: &str) -> Result<EngineValue, BridgeError>;

    fn duplicate(&self, value: &EngineValue) -> Result<EngineValue, BridgeError>;
    fn release(&self, value: &EngineValue) -> Result<(), BridgeError>;
    fn reference_kind(&self, value: &EngineValue) -> Result<ReferenceKind, BridgeError>;

    fn get_property(&self, object: &EngineValue, key: &EngineValue) -> Result<EngineValue, BridgeError>;
    fn set_property(&self, object: &EngineValue, key: &EngineValue, value: &EngineValue) -> Result<bool, BridgeError>;
    fn has_property(&self, object: &EngineValue, key: &EngineValue) -> Result<bool, BridgeError>;
    fn delete_property(&self, object: &EngineValue, key: &EngineValue) -> Result<bool, BridgeError>;
    fn own_keys(&self, object: &EngineValue) -> Result<Vec<EngineValue>, BridgeError>;

    fn array_length(&self, array: &EngineValue) -> Result<usize, BridgeError>;
    fn array_get(&self, array: &EngineValue, index: usize) -> Result<EngineValue, BridgeError>;
    fn array_push(&self, array: &EngineValue, value: &EngineValue) -> Result<usize, BridgeError>;
    fn array_for_each(
        &self,
        array: &EngineValue,
        f: &mut dyn FnMut(usize, &EngineValue) -> Result<(), BridgeError>,
    ) -> Result<(), BridgeError>;

    fn set_add(&self, set: &EngineValue, value: &EngineValue) -> Result<(), BridgeError>;
    fn set_for_each(&self, set: &EngineValue, f: &mut dyn FnMut(&EngineValue) -> Result<(), BridgeError>) -> Result<(), BridgeError>;

    fn map_set(&self, map: &EngineValue, key: &EngineValue, value: &EngineValue) -> Result<(), BridgeError>;
    fn map_for_each(
        &self,
        map: &EngineValue,
        f: &mut dyn FnMut(&EngineValue, &EngineValue) -> Result<(), BridgeError>,
    ) -> Result<(), BridgeError>;

    fn typed_array_bytes(&self, array: &EngineValue) -> Result<Vec<u8>, BridgeError>;
    fn typed_array_write_bytes(&self, array: &EngineValue, bytes: &[u8]) -> Result<(), BridgeError>;

    fn function_type(&self, function: &EngineValue) -> Result<FunctionType, BridgeError>;
    fn function_source(&self, function: &EngineValue) -> Result<Option<String>, BridgeError>;
    fn display_string(&self, value: &EngineValue) -> Result<String, BridgeError>;
    fn symbol_description(&self, symbol: &EngineValue) -> Result<String, BridgeError>;
    fn proxy_handler(&self, proxy: &EngineValue) -> Result<EngineValue, BridgeError>;
    fn proxy_target(&self, proxy: &EngineValue) -> Result<EngineValue, BridgeError>;

    fn set_private(&self, object: &EngineValue, name: &str, value: &EngineValue) -> Result<(), BridgeError>;
    fn get_private(&self, object: &EngineValue, name: &str) -> Result<Option<EngineValue>, BridgeError>;
    fn has_private(&self, object: &EngineValue, name: &str) -> Result<bool, BridgeError>;

    fn call(&self, function: &EngineValue, this: &EngineValue, args: &[EngineValue]) -> Result<EngineValue, BridgeError>;
    fn construct(&self, function: &EngineValue, args: &[EngineValue]) -> Result<EngineValue, BridgeError>;

    /// A global binding such as `Object`, `Array`, `Map` or `Set`. Unknown names read as undefined.
    fn global(&self, name: &str) -> Result<EngineValue, BridgeError>;
    /// A well-known symbol by its description, e.g. `Symbol.iterator`.
    fn well_known_symbol(&self, description: &str) -> Result<EngineValue, BridgeError>;

    /// The converter native callbacks use to move values across the boundary.
    fn converter(&self) -> Rc<dyn Converter>;

    fn get_named(&self, object: &EngineValue, name: &str) -> Result<EngineValue, BridgeError> {
        self.get_property(object, &EngineValue::String(name.to_string()))
    }

    fn set_named(&self, object: &EngineValue, name: &str, value: &EngineValue) -> Result<bool, BridgeError> {
        self.set_property(object, &EngineValue::String(name.to_string()), value)
    }

    fn is_callable(&self, value: &EngineValue) -> bool {
        value.is_reference() && matches!(self.reference_kind(value), Ok(ReferenceKind::Function))
    }

    /// Visits own enumerable string-keyed properties in insertion order.
    ///
    /// The walk stops at the first error, but every key is still released.
    fn object_for_each_own(
        &self,
        object: &EngineValue,
        f: &mut dyn FnMut(&str, &EngineValue) -> Result<(), BridgeError>,
    ) -> Result<(), BridgeError> {
        let keys = self.own_keys(object)?;
        let mut outcome = Ok(());
        for key in &keys {
            let EngineValue::String(name) = key else {
                continue;
            };
            let visited = self.get_property(object, key).and_then(|value| {
                let result = f(name, &value);
                let released = self.release(&value);
                result.and(released)
            });
            if visited.is_err() {
                outcome = visited;
                break;
            }
        }
        for key in &keys {
            if let Err(error) = self.release(key)
                && outcome.is_ok()
            {
                outcome = Err(error);
            }
        }
        outcome
    }
}
