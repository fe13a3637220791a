use crate::config::ConverterConfig;
use crate::converters::{
    Converter, PRIVATE_PROPERTY_CUSTOM_OBJECT_CLASS_NAME, PRIVATE_PROPERTY_PROXY_TARGET, Shape, scalar_to_engine, scalar_to_host,
};
use crate::core::{CallbackId, Engine, EngineValue, FunctionType, Scope, TypedArrayKind};
use crate::error::BridgeError;
use crate::host::{FunctionEntity, HostArray, HostMap, HostObject, HostSet, HostValue, SymbolEntity};
use crate::registry::CustomObject;

/// Structural converter: collections, typed views, functions, symbols and registered custom
/// objects, on top of the scalar mapping.
#[derive(Clone, Debug, Default)]
pub struct ObjectConverter {
    config: ConverterConfig,
}

impl ObjectConverter {
    pub fn new() -> Self {
        ObjectConverter::default()
    }

    pub fn with_config(config: ConverterConfig) -> Self {
        ObjectConverter { config }
    }

    pub fn config_mut(&mut self) -> &mut ConverterConfig {
        &mut self.config
    }

    /// Returns `false` when `T` was already registered.
    pub fn register_custom_object<T: CustomObject>(&self) -> bool {
        self.config.registry().register::<T>()
    }

    pub fn unregister_custom_object<T: CustomObject>(&self) -> bool {
        self.config.registry().unregister::<T>()
    }
}

impl Converter for ObjectConverter {
    fn config(&self) -> &ConverterConfig {
        &self.config
    }

    fn to_host_at(&self, engine: &dyn Engine, value: &EngineValue, depth: usize) -> Result<HostValue, BridgeError> {
        structural_to_host(self, engine, value, depth)
    }

    fn to_engine_at(&self, engine: &dyn Engine, value: &HostValue, depth: usize) -> Result<EngineValue, BridgeError> {
        structural_to_engine(self, engine, value, depth)
    }
}

pub(crate) fn structural_to_host(outer: &dyn Converter, engine: &dyn Engine, value: &EngineValue, depth: usize) -> Result<HostValue, BridgeError> {
    if let Some(host) = scalar_to_host(outer, value, depth)? {
        return Ok(host);
    }
    let shape = Shape::of(engine, value)?;
    log::trace!("converting engine {shape:?} to host at depth {depth}");
    match shape {
        Shape::Indexed => {
            let mut items = Vec::new();
            engine.array_for_each(value, &mut |_, item| {
                items.push(outer.to_host_at(engine, item, depth + 1)?);
                Ok(())
            })?;
            Ok(HostValue::list(items))
        }
        Shape::Set => {
            let mut set = HostSet::new();
            engine.set_for_each(value, &mut |item| {
                set.insert(outer.to_host_at(engine, item, depth + 1)?);
                Ok(())
            })?;
            Ok(HostValue::set(set))
        }
        Shape::Map => {
            let mut map = HostMap::entity();
            engine.map_for_each(value, &mut |key, item| {
                let key = engine.display_string(key)?;
                map.insert(key, outer.to_host_at(engine, item, depth + 1)?);
                Ok(())
            })?;
            Ok(HostValue::map(map))
        }
        Shape::TypedView(kind) => typed_view_to_host(engine, value, kind),
        Shape::Callable => function_to_host(outer.config(), engine, value),
        Shape::Symbol => Ok(HostValue::Symbol(SymbolEntity::new(engine.symbol_description(value)?))),
        Shape::Proxy => match unwrap_proxy(engine, value)? {
            Some(host) => Ok(host),
            None => object_to_host(outer, engine, value, depth),
        },
        Shape::PlainObject => object_to_host(outer, engine, value, depth),
        Shape::Scalar | Shape::WeakMap => Ok(HostValue::Engine(engine.duplicate(value)?)),
    }
}

fn le_bytes<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&chunk[..N]);
    bytes
}

fn typed_view_to_host(engine: &dyn Engine, value: &EngineValue, kind: TypedArrayKind) -> Result<HostValue, BridgeError> {
    let bytes = engine.typed_array_bytes(value)?;
    let array = match kind {
        TypedArrayKind::Int8 | TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => HostArray::Byte(bytes.iter().map(|b| *b as i8).collect()),
        TypedArrayKind::Int16 | TypedArrayKind::Uint16 => HostArray::Short(bytes.chunks_exact(2).map(|c| i16::from_le_bytes(le_bytes(c))).collect()),
        TypedArrayKind::Int32 | TypedArrayKind::Uint32 => {
            HostArray::Integer(bytes.chunks_exact(4).map(|c| i32::from_le_bytes(le_bytes(c))).collect())
        }
        TypedArrayKind::Float32 => HostArray::Float(bytes.chunks_exact(4).map(|c| f32::from_le_bytes(le_bytes(c))).collect()),
        TypedArrayKind::Float64 => HostArray::Double(bytes.chunks_exact(8).map(|c| f64::from_le_bytes(le_bytes(c))).collect()),
        TypedArrayKind::BigInt64 | TypedArrayKind::BigUint64 => {
            HostArray::Long(bytes.chunks_exact(8).map(|c| i64::from_le_bytes(le_bytes(c))).collect())
        }
    };
    Ok(HostValue::Array(array))
}

fn function_to_host(config: &ConverterConfig, engine: &dyn Engine, value: &EngineValue) -> Result<HostValue, BridgeError> {
    let mut entity = FunctionEntity::default();
    if config.extract_function_source() {
        let function_type = engine.function_type(value)?;
        entity.function_type = function_type;
        entity.source = match function_type {
            FunctionType::Native | FunctionType::Api => Some(engine.display_string(value)?),
            FunctionType::UserDefined => engine.function_source(value)?,
            FunctionType::Unknown => None,
        };
    }
    Ok(HostValue::Function(entity))
}

/// Follows a proxy's handler marker back to the host value it was created for.
fn unwrap_proxy(engine: &dyn Engine, value: &EngineValue) -> Result<Option<HostValue>, BridgeError> {
    let handler = engine.proxy_handler(value)?;
    let marker = engine.get_private(&handler, PRIVATE_PROPERTY_PROXY_TARGET);
    engine.release(&handler)?;
    let id = match marker? {
        Some(EngineValue::Long(id)) => CallbackId(id as u64),
        Some(EngineValue::Integer(id)) => CallbackId(id as u64),
        Some(other) => {
            engine.release(&other)?;
            return Ok(None);
        }
        None => return Ok(None),
    };
    let target = engine
        .callback_context(id)
        .and_then(|context| context.receiver.as_ref().and_then(|receiver| receiver.target_object()));
    if target.is_some() {
        log::trace!("unwrapped proxy through callback {}", id.0);
    }
    Ok(target)
}

fn object_to_host(outer: &dyn Converter, engine: &dyn Engine, value: &EngineValue, depth: usize) -> Result<HostValue, BridgeError> {
    let config = outer.config();
    let mut map = HostMap::new();
    engine.object_for_each_own(value, &mut |key, item| {
        if key == "constructor" {
            let name = if item.is_reference() { engine.get_named(item, "name")? } else { item.clone() };
            let result = match &name {
                EngineValue::String(s) => Ok(HostValue::String(s.clone())),
                EngineValue::Undefined | EngineValue::Null => Ok(HostValue::Null),
                other => engine.display_string(other).map(HostValue::String),
            };
            if item.is_reference() {
                engine.release(&name)?;
            }
            map.insert(key, result?);
            return Ok(());
        }
        if item.is_undefined() || (config.skip_functions_in_object() && engine.is_callable(item)) {
            return Ok(());
        }
        map.insert(key, outer.to_host_at(engine, item, depth + 1)?);
        Ok(())
    })?;
    if !config.registry().is_empty()
        && engine.has_private(value, PRIVATE_PROPERTY_CUSTOM_OBJECT_CLASS_NAME)?
        && let Some(EngineValue::String(name)) = engine.get_private(value, PRIVATE_PROPERTY_CUSTOM_OBJECT_CLASS_NAME)?
    {
        match config.registry().create(&name, &map) {
            Ok(object) => return Ok(HostValue::Object(object)),
            Err(err) => log::debug!("returning a plain map for custom object {name}: {err}"),
        }
    }
    Ok(HostValue::map(map))
}

pub(crate) fn structural_to_engine(
    outer: &dyn Converter,
    engine: &dyn Engine,
    value: &HostValue,
    depth: usize,
) -> Result<EngineValue, BridgeError> {
    let scalar = scalar_to_engine(outer, engine, value, depth)?;
    if !scalar.is_undefined() {
        return Ok(scalar);
    }
    log::trace!("converting host {} to engine at depth {depth}", value.type_label());
    match value {
        HostValue::Map(map) => {
            let map = map.borrow();
            if map.is_entity() {
                map_to_engine_map(outer, engine, &map, depth)
            } else {
                map_to_engine_object(outer, engine, &map, depth)
            }
        }
        HostValue::Set(set) => set_to_engine(outer, engine, &set.borrow(), depth),
        HostValue::List(items) => values_to_engine_array(outer, engine, &items.borrow(), depth),
        HostValue::Stream(stream) => match stream.take() {
            Some(items) => values_to_engine_array(outer, engine, &items, depth),
            None => Err(BridgeError::converter("stream has already been consumed")),
        },
        HostValue::Array(array) => machine_array_to_engine(outer, engine, array, depth),
        HostValue::Function(entity) => function_to_engine(engine, entity),
        HostValue::Symbol(symbol) => engine.create_symbol(&symbol.description, true),
        HostValue::Object(object) => custom_object_to_engine(outer, engine, object.as_ref(), depth),
        _ => Ok(EngineValue::Undefined),
    }
}

fn map_to_engine_map(outer: &dyn Converter, engine: &dyn Engine, map: &HostMap, depth: usize) -> Result<EngineValue, BridgeError> {
    let mut scope = Scope::new(engine);
    let result = scope.add(engine.create_map()?);
    for (key, item) in map.iter() {
        let mut children = Scope::new(engine);
        let key = match key {
            HostValue::String(s) => EngineValue::String(s.clone()),
            other => EngineValue::String(other.to_string()),
        };
        let item = children.add(outer.to_engine_at(engine, item, depth + 1)?);
        engine.map_set(&result, &key, &item)?;
    }
    scope.escape();
    Ok(result)
}

pub(crate) fn map_to_engine_object(outer: &dyn Converter, engine: &dyn Engine, map: &HostMap, depth: usize) -> Result<EngineValue, BridgeError> {
    let mut scope = Scope::new(engine);
    let result = scope.add(engine.create_object()?);
    for (key, item) in map.iter() {
        let mut children = Scope::new(engine);
        let item = children.add(outer.to_engine_at(engine, item, depth + 1)?);
        engine.set_named(&result, &key.to_string(), &item)?;
    }
    scope.escape();
    Ok(result)
}

fn set_to_engine(outer: &dyn Converter, engine: &dyn Engine, set: &HostSet, depth: usize) -> Result<EngineValue, BridgeError> {
    let mut scope = Scope::new(engine);
    let result = scope.add(engine.create_set()?);
    for item in set.iter() {
        let mut children = Scope::new(engine);
        let item = children.add(outer.to_engine_at(engine, item, depth + 1)?);
        engine.set_add(&result, &item)?;
    }
    scope.escape();
    Ok(result)
}

/// Converts every element first, then builds the array. A failing element releases all of its
/// already converted siblings before the error propagates.
pub(crate) fn values_to_engine_array(
    outer: &dyn Converter,
    engine: &dyn Engine,
    items: &[HostValue],
    depth: usize,
) -> Result<EngineValue, BridgeError> {
    let mut elements = Scope::new(engine);
    let mut converted = Vec::with_capacity(items.len());
    for item in items {
        converted.push(elements.add(outer.to_engine_at(engine, item, depth + 1)?));
    }
    let mut scope = Scope::new(engine);
    let result = scope.add(engine.create_array()?);
    for item in &converted {
        engine.array_push(&result, item)?;
    }
    scope.escape();
    Ok(result)
}

/// The typed view kind and little-endian contents for numeric machine arrays.
pub(crate) fn typed_view_bytes(array: &HostArray) -> Option<(TypedArrayKind, Vec<u8>)> {
    Some(match array {
        HostArray::Byte(v) => (TypedArrayKind::Int8, v.iter().map(|b| *b as u8).collect()),
        HostArray::Short(v) => (TypedArrayKind::Int16, v.iter().flat_map(|x| x.to_le_bytes()).collect()),
        HostArray::Integer(v) => (TypedArrayKind::Int32, v.iter().flat_map(|x| x.to_le_bytes()).collect()),
        HostArray::Long(v) => (TypedArrayKind::BigInt64, v.iter().flat_map(|x| x.to_le_bytes()).collect()),
        HostArray::Float(v) => (TypedArrayKind::Float32, v.iter().flat_map(|x| x.to_le_bytes()).collect()),
        HostArray::Double(v) => (TypedArrayKind::Float64, v.iter().flat_map(|x| x.to_le_bytes()).collect()),
        HostArray::Boolean(_) | HostArray::Char(_) | HostArray::String(_) | HostArray::Object(_) => return None,
    })
}

fn machine_array_to_engine(outer: &dyn Converter, engine: &dyn Engine, array: &HostArray, depth: usize) -> Result<EngineValue, BridgeError> {
    let Some((kind, bytes)) = typed_view_bytes(array) else {
        return values_to_engine_array(outer, engine, &array.to_values(), depth);
    };
    let mut scope = Scope::new(engine);
    let view = scope.add(engine.create_typed_array(kind, array.len())?);
    engine.typed_array_write_bytes(&view, &bytes)?;
    scope.escape();
    Ok(view)
}

fn function_to_engine(engine: &dyn Engine, entity: &FunctionEntity) -> Result<EngineValue, BridgeError> {
    if entity.function_type == FunctionType::UserDefined
        && let Some(source) = &entity.source
        && !source.is_empty()
    {
        return engine.compile_and_evaluate(source);
    }
    Ok(EngineValue::Null)
}

fn custom_object_to_engine(outer: &dyn Converter, engine: &dyn Engine, object: &dyn HostObject, depth: usize) -> Result<EngineValue, BridgeError> {
    let Some((name, snapshot)) = outer.config().registry().snapshot(object) else {
        return Ok(EngineValue::Undefined);
    };
    let mut scope = Scope::new(engine);
    let result = scope.add(map_to_engine_object(outer, engine, &snapshot, depth)?);
    engine.set_private(&result, PRIVATE_PROPERTY_CUSTOM_OBJECT_CLASS_NAME, &EngineValue::String(name))?;
    scope.escape();
    Ok(result)
}
