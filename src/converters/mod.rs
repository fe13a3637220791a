//! The converter chain.
//!
//! Each layer is a set of functions taking an `outer` converter that nested values re-enter, so
//! a container converted by the structural layer still routes its children through whichever
//! converter the caller started with. The converter types wire a layer to itself as `outer`.

use crate::config::{ConverterConfig, ScalarKind};
use crate::core::{Engine, EngineValue, ReferenceKind, TypedArrayKind};
use crate::error::BridgeError;
use crate::host::HostValue;

mod bridge;
pub use bridge::*;

mod object;
pub use object::*;

mod primitive;
pub use primitive::*;

mod proxy;
pub use proxy::*;

/// Private property naming the custom object type an engine object was converted from.
pub const PRIVATE_PROPERTY_CUSTOM_OBJECT_CLASS_NAME: &str = "jsbridge#customObjectClassName";
/// Private property on a proxy handler holding the callback id that leads back to the host value.
pub const PRIVATE_PROPERTY_PROXY_TARGET: &str = "jsbridge#proxyTarget";

pub trait Converter {
    fn config(&self) -> &ConverterConfig;

    fn to_host_at(&self, engine: &dyn Engine, value: &EngineValue, depth: usize) -> Result<HostValue, BridgeError>;

    fn to_engine_at(&self, engine: &dyn Engine, value: &HostValue, depth: usize) -> Result<EngineValue, BridgeError>;

    fn to_host(&self, engine: &dyn Engine, value: &EngineValue) -> Result<HostValue, BridgeError> {
        self.to_host_at(engine, value, 0)
    }

    /// The returned reference, if any, is owned by the caller.
    fn to_engine(&self, engine: &dyn Engine, value: &HostValue) -> Result<EngineValue, BridgeError> {
        self.to_engine_at(engine, value, 0)
    }

    /// Converts `value` and releases it whatever the outcome.
    fn to_host_and_release(&self, engine: &dyn Engine, value: EngineValue) -> Result<HostValue, BridgeError> {
        let result = self.to_host(engine, &value);
        if let Err(err) = engine.release(&value) {
            log::warn!("failed to release converted source {value:?}: {err}");
        }
        result
    }

    /// Converts `value`, lends the engine value to `f`, then releases it.
    ///
    /// The value is released whatever `f` returns. An error from `f` wins over a release failure.
    fn to_engine_scoped<R, F>(&self, engine: &dyn Engine, value: &HostValue, f: F) -> Result<R, BridgeError>
    where
        Self: Sized,
        F: FnOnce(&EngineValue) -> Result<R, BridgeError>,
    {
        let converted = self.to_engine(engine, value)?;
        let result = f(&converted);
        let released = engine.release(&converted);
        let value = result?;
        released?;
        Ok(value)
    }

    /// Coerces a scalar engine value to one host scalar kind, falling back to the configured default.
    fn to_host_scalar(&self, value: &EngineValue, kind: ScalarKind) -> HostValue {
        coerce_scalar(self.config(), value, kind)
    }

    fn validate_depth(&self, depth: usize) -> Result<(), BridgeError> {
        validate_depth(self.config(), depth)
    }
}

pub(crate) fn validate_depth(config: &ConverterConfig, depth: usize) -> Result<(), BridgeError> {
    if depth >= config.max_depth() {
        return Err(BridgeError::CircularStructure {
            max_depth: config.max_depth(),
        });
    }
    Ok(())
}

/// The shape of an engine value, resolved once before dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Indexed,
    Set,
    Map,
    WeakMap,
    TypedView(TypedArrayKind),
    Callable,
    Symbol,
    Proxy,
    PlainObject,
}

impl Shape {
    pub fn of(engine: &dyn Engine, value: &EngineValue) -> Result<Shape, BridgeError> {
        if !value.is_reference() {
            return Ok(Shape::Scalar);
        }
        Ok(match engine.reference_kind(value)? {
            ReferenceKind::Array => Shape::Indexed,
            ReferenceKind::Object => Shape::PlainObject,
            ReferenceKind::Map => Shape::Map,
            ReferenceKind::Set => Shape::Set,
            ReferenceKind::WeakMap => Shape::WeakMap,
            ReferenceKind::TypedArray(kind) => Shape::TypedView(kind),
            ReferenceKind::Function => Shape::Callable,
            ReferenceKind::Symbol => Shape::Symbol,
            ReferenceKind::Proxy => Shape::Proxy,
        })
    }
}
