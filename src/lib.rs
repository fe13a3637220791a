//! Value conversion and proxy bridging between a host program and an embedded script engine.
//!
//! Host values ([`HostValue`]) are turned into engine values ([`EngineValue`]) and back by a
//! chain of converters; composite host values can instead be handed to script code as live
//! proxies whose traps resolve against the host value itself.

pub mod config;
pub mod converters;
pub mod core;
pub mod error;
pub mod host;
pub mod list_utils;
pub mod proxy;
pub mod registry;

pub use config::{ConverterConfig, DEFAULT_MAX_DEPTH, DefaultScalars, ScalarKind};
pub use converters::{BridgeConverter, Converter, ObjectConverter, PrimitiveConverter, ProxyConverter};
pub use crate::core::{CallbackContext, CallbackId, Engine, EngineValue, MemoryEngine, NativeFn, ReferenceKind, Scope, TypedArrayKind, ValueHandle};
pub use error::{BridgeError, ErrorKind};
pub use host::{DirectProxyHandler, HostArray, HostClass, HostMap, HostObject, HostSet, HostStream, HostValue, ProxyMode};
pub use proxy::{ProxyHandler, create_proxy};
pub use registry::{CustomObject, CustomObjectRegistry};
