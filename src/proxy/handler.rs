use crate::core::{Engine, EngineValue, ReferenceKind, Scope};
use crate::error::BridgeError;
use crate::host::{DirectProxyHandler, HostClass, HostObject, HostValue, ProxyMode, Shared, release_handles};
use crate::list_utils;
use crate::proxy::{PolyfillFn, new_function, polyfill_list, polyfill_map, polyfill_object, polyfill_primitive, polyfill_set};
use crate::proxy::{to_engine, to_host, to_host_args};
use std::rc::Rc;

/// Pads `list` with `Null` up to `length`. `false` when the length is out of bounds.
fn grow(list: &Shared<Vec<HostValue>>, length: usize) -> Result<bool, BridgeError> {
    Ok(list_utils::resize(&mut list.borrow_mut(), length)?.is_some())
}

/// Trap implementations behind a proxy's handler object.
///
/// `target` is the engine-side proxy target, which carries no state; everything is resolved
/// against the host value the handler was created for.
pub trait ProxyHandler {
    /// The host value this handler stands for.
    fn target_object(&self) -> Option<HostValue>;

    fn get(&self, engine: &dyn Engine, target: &EngineValue, property: &EngineValue, receiver: &EngineValue) -> Result<EngineValue, BridgeError>;

    fn set(
        &self,
        engine: &dyn Engine,
        target: &EngineValue,
        property: &EngineValue,
        value: &EngineValue,
        receiver: &EngineValue,
    ) -> Result<bool, BridgeError>;

    fn has(&self, engine: &dyn Engine, target: &EngineValue, property: &EngineValue) -> Result<bool, BridgeError>;

    fn delete_property(&self, engine: &dyn Engine, target: &EngineValue, property: &EngineValue) -> Result<bool, BridgeError>;

    /// Returns a script array of property names.
    fn own_keys(&self, engine: &dyn Engine, target: &EngineValue) -> Result<EngineValue, BridgeError>;

    fn apply(&self, engine: &dyn Engine, target: &EngineValue, this: &EngineValue, args: &[EngineValue]) -> Result<EngineValue, BridgeError>;

    fn construct(&self, engine: &dyn Engine, target: &EngineValue, args: &[EngineValue], new_target: &EngineValue) -> Result<EngineValue, BridgeError>;
}

/// A property key as seen by a trap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyName {
    Index(usize),
    Name(String),
    /// A symbol, by description.
    Symbol(String),
}

impl PropertyName {
    pub fn of(engine: &dyn Engine, property: &EngineValue) -> Result<PropertyName, BridgeError> {
        Ok(match property {
            EngineValue::String(s) => PropertyName::parse(s),
            EngineValue::Integer(i) if *i >= 0 => PropertyName::Index(*i as usize),
            EngineValue::Reference(_) if engine.reference_kind(property)? == ReferenceKind::Symbol => {
                PropertyName::Symbol(engine.symbol_description(property)?)
            }
            other => PropertyName::parse(&engine.display_string(other)?),
        })
    }

    fn parse(name: &str) -> PropertyName {
        match name.parse::<usize>() {
            Ok(index) if index.to_string() == name => PropertyName::Index(index),
            _ => PropertyName::Name(name.to_string()),
        }
    }

    pub fn key(&self) -> String {
        match self {
            PropertyName::Index(index) => index.to_string(),
            PropertyName::Name(name) => name.clone(),
            PropertyName::Symbol(description) => format!("Symbol({description})"),
        }
    }
}

pub(crate) fn string_array(engine: &dyn Engine, names: Vec<String>) -> Result<EngineValue, BridgeError> {
    let mut scope = Scope::new(engine);
    let array = scope.add(engine.create_array()?);
    for name in names {
        engine.array_push(&array, &EngineValue::String(name))?;
    }
    scope.escape();
    Ok(array)
}

/// Universal handler: resolves traps through the host value's capabilities, the reflection
/// surface of host objects and classes, and the polyfill tables.
pub struct ReflectionProxyHandler {
    target: HostValue,
    mode: ProxyMode,
}

impl ReflectionProxyHandler {
    pub fn new(target: HostValue, mode: ProxyMode) -> Self {
        ReflectionProxyHandler { target, mode }
    }

    pub fn target(&self) -> &HostValue {
        &self.target
    }

    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    fn table(&self) -> fn(&str) -> Option<PolyfillFn> {
        match &self.target {
            HostValue::List(_) => polyfill_list::lookup,
            HostValue::Set(_) => polyfill_set::lookup,
            HostValue::Map(_) => polyfill_map::lookup,
            target if target.is_scalar() => polyfill_primitive::lookup,
            _ => polyfill_object::lookup,
        }
    }

    fn polyfill(&self, engine: &dyn Engine, key: &str) -> Result<EngineValue, BridgeError> {
        if let Some(polyfill) = self.table()(key).or_else(|| polyfill_object::lookup(key)) {
            return polyfill(engine, &self.target);
        }
        Ok(EngineValue::Undefined)
    }

    fn has_polyfill(&self, key: &str) -> bool {
        self.table()(key).is_some() || polyfill_object::lookup(key).is_some()
    }

    fn symbol(&self, engine: &dyn Engine, description: &str) -> Result<EngineValue, BridgeError> {
        let name = match (description, &self.target) {
            ("Symbol.iterator", HostValue::Map(_)) => "entries",
            ("Symbol.iterator", HostValue::List(_) | HostValue::Set(_)) => "values",
            ("Symbol.toPrimitive", target) if target.is_scalar() => "valueOf",
            _ => return Ok(EngineValue::Undefined),
        };
        self.polyfill(engine, name)
    }

    fn get_reflected(&self, engine: &dyn Engine, object: &Rc<dyn HostObject>, key: &str) -> Result<EngineValue, BridgeError> {
        if let Some(value) = object.get_property(key) {
            return to_engine(engine, &value);
        }
        if object.has_method(key) {
            let object = object.clone();
            let method = key.to_string();
            return new_function(
                engine,
                key,
                Rc::new(move |engine: &dyn Engine, _: &EngineValue, args: &[EngineValue]| {
                    let args = to_host_args(engine, args)?;
                    let result = object.invoke(&method, args)?;
                    to_engine(engine, &result)
                }),
            );
        }
        self.polyfill(engine, key)
    }

    fn get_static(&self, engine: &dyn Engine, class: &Rc<dyn HostClass>, key: &str) -> Result<EngineValue, BridgeError> {
        match class.static_property(key) {
            Some(value) => to_engine(engine, &value),
            None if key == "name" => Ok(EngineValue::String(class.name().to_string())),
            None => Ok(EngineValue::Undefined),
        }
    }
}

impl ProxyHandler for ReflectionProxyHandler {
    fn target_object(&self) -> Option<HostValue> {
        Some(self.target.clone())
    }

    fn get(&self, engine: &dyn Engine, _target: &EngineValue, property: &EngineValue, _receiver: &EngineValue) -> Result<EngineValue, BridgeError> {
        let name = PropertyName::of(engine, property)?;
        log::trace!("proxy get {name:?} on host {}", self.target.type_label());
        if let PropertyName::Symbol(description) = &name {
            return self.symbol(engine, description);
        }
        match (&self.target, &name) {
            (HostValue::List(list), PropertyName::Index(index)) => {
                let item = list.borrow().get(*index).cloned();
                match item {
                    Some(item) => to_engine(engine, &item),
                    None => Ok(EngineValue::Undefined),
                }
            }
            (HostValue::Map(map), _) => {
                let key = name.key();
                let item = map.borrow().get(&key).cloned();
                match item {
                    Some(item) => to_engine(engine, &item),
                    None => self.polyfill(engine, &key),
                }
            }
            (HostValue::Object(object), _) => self.get_reflected(engine, object, &name.key()),
            (HostValue::Class(class), _) => self.get_static(engine, class, &name.key()),
            _ => self.polyfill(engine, &name.key()),
        }
    }

    fn set(
        &self,
        engine: &dyn Engine,
        _target: &EngineValue,
        property: &EngineValue,
        value: &EngineValue,
        _receiver: &EngineValue,
    ) -> Result<bool, BridgeError> {
        let name = PropertyName::of(engine, property)?;
        log::trace!("proxy set {name:?} on host {}", self.target.type_label());
        match (&self.target, &name) {
            (_, PropertyName::Symbol(_)) => Ok(false),
            (HostValue::List(list), PropertyName::Index(index)) => {
                if *index >= list.borrow().len() && !grow(list, index.saturating_add(1))? {
                    return Ok(false);
                }
                let value = to_host(engine, value)?;
                let replaced = std::mem::replace(&mut list.borrow_mut()[*index], value);
                replaced.release_handle(engine)?;
                Ok(true)
            }
            (HostValue::List(list), PropertyName::Name(key)) if key == "length" => match value.as_i64() {
                Some(length) if length >= 0 => {
                    let Ok(length) = usize::try_from(length) else {
                        return Ok(false);
                    };
                    let truncated = list_utils::resize(&mut list.borrow_mut(), length)?;
                    match truncated {
                        Some(tail) => {
                            release_handles(engine, &tail)?;
                            Ok(true)
                        }
                        None => Ok(false),
                    }
                }
                _ => Ok(false),
            },
            (HostValue::Map(map), _) => {
                let value = to_host(engine, value)?;
                let replaced = map.borrow_mut().insert(name.key(), value);
                if let Some(replaced) = replaced {
                    replaced.release_handle(engine)?;
                }
                Ok(true)
            }
            (HostValue::Object(object), _) => {
                let value = to_host(engine, value)?;
                object.set_property(&name.key(), value)
            }
            _ => Ok(false),
        }
    }

    fn has(&self, engine: &dyn Engine, _target: &EngineValue, property: &EngineValue) -> Result<bool, BridgeError> {
        let name = PropertyName::of(engine, property)?;
        Ok(match (&self.target, &name) {
            (target, PropertyName::Symbol(description)) => {
                description == "Symbol.iterator" && matches!(target, HostValue::List(_) | HostValue::Set(_) | HostValue::Map(_))
            }
            (HostValue::List(list), PropertyName::Index(index)) => *index < list.borrow().len(),
            (HostValue::List(_), PropertyName::Name(key)) => key == "length" || self.has_polyfill(key),
            (HostValue::Map(map), _) => {
                let key = name.key();
                map.borrow().contains_key(&key) || self.has_polyfill(&key)
            }
            (HostValue::Object(object), _) => {
                let key = name.key();
                object.property_names().contains(&key) || object.has_method(&key)
            }
            (HostValue::Class(class), _) => class.static_property(&name.key()).is_some(),
            _ => self.has_polyfill(&name.key()),
        })
    }

    fn delete_property(&self, engine: &dyn Engine, _target: &EngineValue, property: &EngineValue) -> Result<bool, BridgeError> {
        let name = PropertyName::of(engine, property)?;
        Ok(match (&self.target, &name) {
            (_, PropertyName::Symbol(_)) => false,
            (HostValue::List(list), PropertyName::Index(index)) => {
                let removed = list.borrow_mut().get_mut(*index).map(|slot| std::mem::replace(slot, HostValue::Null));
                if let Some(removed) = removed {
                    removed.release_handle(engine)?;
                }
                true
            }
            (HostValue::Map(map), _) => {
                let removed = map.borrow_mut().remove(&name.key());
                if let Some(removed) = removed {
                    removed.release_handle(engine)?;
                }
                true
            }
            _ => false,
        })
    }

    fn own_keys(&self, engine: &dyn Engine, _target: &EngineValue) -> Result<EngineValue, BridgeError> {
        let keys: Vec<String> = match &self.target {
            HostValue::List(list) => (0..list.borrow().len()).map(|i| i.to_string()).collect(),
            HostValue::Map(map) => map.borrow().keys().map(|k| k.to_string()).collect(),
            HostValue::Object(object) => object.property_names(),
            _ => Vec::new(),
        };
        string_array(engine, keys)
    }

    fn apply(&self, engine: &dyn Engine, _target: &EngineValue, _this: &EngineValue, args: &[EngineValue]) -> Result<EngineValue, BridgeError> {
        match &self.target {
            HostValue::Object(object) if self.mode == ProxyMode::Function => {
                let args = to_host_args(engine, args)?;
                let result = object.call(args)?;
                to_engine(engine, &result)
            }
            HostValue::Class(class) => Err(BridgeError::not_supported(format!(
                "class {} cannot be invoked without 'new'",
                class.name()
            ))),
            other => Err(BridgeError::not_supported(format!("host {} is not callable", other.type_label()))),
        }
    }

    fn construct(&self, engine: &dyn Engine, _target: &EngineValue, args: &[EngineValue], _new_target: &EngineValue) -> Result<EngineValue, BridgeError> {
        match &self.target {
            HostValue::Class(class) => {
                let args = to_host_args(engine, args)?;
                let instance = class.construct(args)?;
                to_engine(engine, &instance)
            }
            other => Err(BridgeError::not_supported(format!("host {} is not constructible", other.type_label()))),
        }
    }
}

/// Handler for host objects implementing [`DirectProxyHandler`]. Traps the object declines fall
/// back to reflection.
pub struct DirectProxyHandlerAdapter {
    object: Rc<dyn HostObject>,
    fallback: ReflectionProxyHandler,
}

impl DirectProxyHandlerAdapter {
    pub fn new(object: Rc<dyn HostObject>, mode: ProxyMode) -> Self {
        let fallback = ReflectionProxyHandler::new(HostValue::Object(object.clone()), mode);
        DirectProxyHandlerAdapter { object, fallback }
    }

    fn direct(&self) -> Option<&dyn DirectProxyHandler> {
        self.object.as_direct_proxy_handler()
    }
}

impl ProxyHandler for DirectProxyHandlerAdapter {
    fn target_object(&self) -> Option<HostValue> {
        Some(HostValue::Object(self.object.clone()))
    }

    fn get(&self, engine: &dyn Engine, target: &EngineValue, property: &EngineValue, receiver: &EngineValue) -> Result<EngineValue, BridgeError> {
        if let Some(direct) = self.direct()
            && let Some(value) = direct.proxy_get(engine, property)?
        {
            return Ok(value);
        }
        self.fallback.get(engine, target, property, receiver)
    }

    fn set(
        &self,
        engine: &dyn Engine,
        target: &EngineValue,
        property: &EngineValue,
        value: &EngineValue,
        receiver: &EngineValue,
    ) -> Result<bool, BridgeError> {
        if let Some(direct) = self.direct()
            && let Some(accepted) = direct.proxy_set(engine, property, value)?
        {
            return Ok(accepted);
        }
        self.fallback.set(engine, target, property, value, receiver)
    }

    fn has(&self, engine: &dyn Engine, target: &EngineValue, property: &EngineValue) -> Result<bool, BridgeError> {
        if let Some(direct) = self.direct()
            && let Some(found) = direct.proxy_has(engine, property)?
        {
            return Ok(found);
        }
        self.fallback.has(engine, target, property)
    }

    fn delete_property(&self, engine: &dyn Engine, target: &EngineValue, property: &EngineValue) -> Result<bool, BridgeError> {
        if let Some(direct) = self.direct()
            && let Some(deleted) = direct.proxy_delete_property(engine, property)?
        {
            return Ok(deleted);
        }
        self.fallback.delete_property(engine, target, property)
    }

    fn own_keys(&self, engine: &dyn Engine, target: &EngineValue) -> Result<EngineValue, BridgeError> {
        if let Some(direct) = self.direct()
            && let Some(keys) = direct.proxy_own_keys(engine)?
        {
            return string_array(engine, keys);
        }
        self.fallback.own_keys(engine, target)
    }

    fn apply(&self, engine: &dyn Engine, target: &EngineValue, this: &EngineValue, args: &[EngineValue]) -> Result<EngineValue, BridgeError> {
        if let Some(direct) = self.direct()
            && let Some(result) = direct.proxy_apply(engine, this, args)?
        {
            return Ok(result);
        }
        self.fallback.apply(engine, target, this, args)
    }

    fn construct(&self, engine: &dyn Engine, target: &EngineValue, args: &[EngineValue], new_target: &EngineValue) -> Result<EngineValue, BridgeError> {
        if let Some(direct) = self.direct()
            && let Some(result) = direct.proxy_construct(engine, args)?
        {
            return Ok(result);
        }
        self.fallback.construct(engine, target, args, new_target)
    }
}
