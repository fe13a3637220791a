use crate::converters::{Converter, ObjectConverter};
use crate::core::{CallbackContext, CallbackId, Engine, EngineValue, FunctionType, ReferenceKind, TypedArrayKind, ValueHandle};
use crate::error::BridgeError;
use crate::host::format_number;
use crate::list_utils::{MAX_GROWTH, MAX_LENGTH};
use crate::raise_engine_error;
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

const GLOBAL_CONSTRUCTORS: [&str; 6] = ["Object", "Array", "Map", "Set", "WeakMap", "Symbol"];
const WELL_KNOWN_SYMBOLS: [&str; 4] = ["Symbol.iterator", "Symbol.asyncIterator", "Symbol.toPrimitive", "Symbol.toStringTag"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ObjectId(usize);

#[derive(Clone, Debug)]
enum Slot {
    Value(EngineValue),
    Object(ObjectId),
}

impl Slot {
    fn same_value_zero(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Object(a), Slot::Object(b)) => a == b,
            (Slot::Value(a), Slot::Value(b)) => match (number_of(a), number_of(b)) {
                (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
                _ => a == b,
            },
            _ => false,
        }
    }
}

/// Array length change with the same bounds as host lists. `false` when out of bounds or the
/// allocation fails.
fn resize_slots(items: &mut Vec<Slot>, length: usize) -> bool {
    let growth = length.saturating_sub(items.len());
    if length > MAX_LENGTH || growth > MAX_GROWTH || items.try_reserve(growth).is_err() {
        return false;
    }
    items.resize(length, Slot::Value(EngineValue::Undefined));
    true
}

fn number_of(value: &EngineValue) -> Option<f64> {
    match value {
        EngineValue::Integer(i) => Some(*i as f64),
        EngineValue::Long(l) => Some(*l as f64),
        EngineValue::Double(d) => Some(*d),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Key {
    String(String),
    Symbol(ObjectId),
}

enum ObjectData {
    Object,
    Array(Vec<Slot>),
    Map(Vec<(Slot, Slot)>),
    Set(Vec<Slot>),
    WeakMap(Vec<(ObjectId, Slot)>),
    TypedArray {
        kind: TypedArrayKind,
        bytes: Vec<u8>,
    },
    Function {
        function_type: FunctionType,
        name: String,
        source: Option<String>,
        callback: Option<CallbackId>,
    },
    Symbol {
        description: String,
    },
    Proxy {
        target: ObjectId,
        handler: ObjectId,
    },
}

struct HeapObject {
    data: ObjectData,
    properties: IndexMap<Key, Slot>,
    private: HashMap<String, Slot>,
}

#[derive(Default)]
struct Heap {
    objects: Vec<HeapObject>,
    handles: HashMap<u64, ObjectId>,
    next_handle: u64,
    /// Native callbacks by id. A slot is emptied once its function is unreachable.
    callbacks: Vec<Option<Rc<CallbackContext>>>,
    free_callbacks: Vec<usize>,
    /// Callback functions some heap slot or proxy refers to.
    pinned: HashSet<ObjectId>,
    global_symbols: HashMap<String, ObjectId>,
    globals: HashMap<String, ObjectId>,
    well_known: HashMap<String, ObjectId>,
}

impl Heap {
    fn push(&mut self, data: ObjectData) -> ObjectId {
        self.objects.push(HeapObject {
            data,
            properties: IndexMap::new(),
            private: HashMap::new(),
        });
        ObjectId(self.objects.len() - 1)
    }

    fn add_callback(&mut self, context: CallbackContext) -> CallbackId {
        let context = Some(Rc::new(context));
        match self.free_callbacks.pop() {
            Some(index) => {
                self.callbacks[index] = context;
                CallbackId(index as u64)
            }
            None => {
                self.callbacks.push(context);
                CallbackId((self.callbacks.len() - 1) as u64)
            }
        }
    }

    /// Records that a heap slot or proxy now refers to `id`. Heap objects are never collected,
    /// so a stored callback function stays reachable for the life of the engine.
    fn pin(&mut self, id: ObjectId) {
        if matches!(self.object(id).data, ObjectData::Function { callback: Some(_), .. }) {
            self.pinned.insert(id);
        }
    }

    /// Detaches the native callback of an unreachable function and frees its slot for reuse.
    ///
    /// The context is handed back so the caller can drop it outside the heap borrow.
    fn reclaim_callback(&mut self, id: ObjectId) -> Option<Rc<CallbackContext>> {
        let ObjectData::Function { callback: Some(callback), .. } = &self.object(id).data else {
            return None;
        };
        let index = callback.0 as usize;
        if self.pinned.contains(&id) || self.handles.values().any(|held| *held == id) {
            return None;
        }
        if let ObjectData::Function { callback, .. } = &mut self.object_mut(id).data {
            *callback = None;
        }
        let context = self.callbacks.get_mut(index)?.take();
        self.free_callbacks.push(index);
        context
    }

    fn new_handle(&mut self, id: ObjectId) -> EngineValue {
        self.next_handle += 1;
        self.handles.insert(self.next_handle, id);
        EngineValue::Reference(ValueHandle(self.next_handle))
    }

    fn resolve(&self, value: &EngineValue) -> Result<ObjectId, BridgeError> {
        match value {
            EngineValue::Reference(handle) => self
                .handles
                .get(&handle.0)
                .copied()
                .ok_or(BridgeError::InvalidHandle { handle: handle.0 }),
            other => Err(BridgeError::not_supported(format!("expected an engine reference, got {other:?}"))),
        }
    }

    /// Converts a value about to be stored in the heap.
    fn to_slot(&mut self, value: &EngineValue) -> Result<Slot, BridgeError> {
        match value {
            EngineValue::Reference(_) => {
                let id = self.resolve(value)?;
                self.pin(id);
                Ok(Slot::Object(id))
            }
            other => Ok(Slot::Value(other.clone())),
        }
    }

    fn from_slot(&mut self, slot: &Slot) -> EngineValue {
        match slot {
            Slot::Value(value) => value.clone(),
            Slot::Object(id) => self.new_handle(*id),
        }
    }

    fn from_key(&mut self, key: &Key) -> EngineValue {
        match key {
            Key::String(name) => EngineValue::String(name.clone()),
            Key::Symbol(id) => self.new_handle(*id),
        }
    }

    fn object(&self, id: ObjectId) -> &HeapObject {
        &self.objects[id.0]
    }

    fn object_mut(&mut self, id: ObjectId) -> &mut HeapObject {
        &mut self.objects[id.0]
    }

    fn proxy_parts(&self, id: ObjectId) -> Option<(ObjectId, ObjectId)> {
        match &self.object(id).data {
            ObjectData::Proxy { target, handler } => Some((*target, *handler)),
            _ => None,
        }
    }

    fn is_callable(&self, id: ObjectId) -> bool {
        match &self.object(id).data {
            ObjectData::Function { .. } => true,
            ObjectData::Proxy { target, .. } => self.is_callable(*target),
            _ => false,
        }
    }

    fn own_slot(&self, id: ObjectId, key: &Key) -> Option<Slot> {
        let object = self.object(id);
        if let Key::String(name) = key {
            match &object.data {
                ObjectData::Array(items) => {
                    if name == "length" {
                        return Some(Slot::Value(EngineValue::Integer(items.len() as i32)));
                    }
                    if let Ok(index) = name.parse::<usize>() {
                        return items.get(index).cloned();
                    }
                }
                ObjectData::TypedArray { kind, bytes } => {
                    let size = kind.element_size();
                    if name == "length" {
                        return Some(Slot::Value(EngineValue::Integer((bytes.len() / size) as i32)));
                    }
                    if let Ok(index) = name.parse::<usize>() {
                        let start = index.checked_mul(size)?;
                        return bytes
                            .get(start..start.checked_add(size)?)
                            .map(|chunk| Slot::Value(decode_element(*kind, chunk)));
                    }
                }
                ObjectData::Map(entries) if name == "size" => {
                    return Some(Slot::Value(EngineValue::Integer(entries.len() as i32)));
                }
                ObjectData::Set(items) if name == "size" => {
                    return Some(Slot::Value(EngineValue::Integer(items.len() as i32)));
                }
                ObjectData::Function { name: function_name, .. } if name == "name" && !object.properties.contains_key(key) => {
                    return Some(Slot::Value(EngineValue::String(function_name.clone())));
                }
                ObjectData::Symbol { description } if name == "description" => {
                    return Some(Slot::Value(EngineValue::String(description.clone())));
                }
                _ => {}
            }
        }
        object.properties.get(key).cloned()
    }

    fn ordinary_set(&mut self, id: ObjectId, key: Key, slot: Slot) -> bool {
        let object = self.object_mut(id);
        if let Key::String(name) = &key {
            match &mut object.data {
                ObjectData::Array(items) => {
                    if name == "length" {
                        if let Slot::Value(value) = &slot
                            && let Some(length) = value.as_i64()
                            && let Ok(length) = usize::try_from(length)
                        {
                            return resize_slots(items, length);
                        }
                        return false;
                    }
                    if let Ok(index) = name.parse::<usize>() {
                        if index >= items.len() && !resize_slots(items, index.saturating_add(1)) {
                            return false;
                        }
                        items[index] = slot;
                        return true;
                    }
                }
                ObjectData::TypedArray { kind, bytes } => {
                    if let Ok(index) = name.parse::<usize>() {
                        let size = kind.element_size();
                        let Slot::Value(value) = &slot else {
                            return false;
                        };
                        let start = index.saturating_mul(size);
                        return match bytes.get_mut(start..start.saturating_add(size)) {
                            Some(chunk) => {
                                chunk.copy_from_slice(&encode_element(*kind, value));
                                true
                            }
                            None => false,
                        };
                    }
                }
                _ => {}
            }
        }
        object.properties.insert(key, slot);
        true
    }

    fn ordinary_delete(&mut self, id: ObjectId, key: &Key) -> bool {
        let object = self.object_mut(id);
        if let Key::String(name) = key
            && let ObjectData::Array(items) = &mut object.data
            && let Ok(index) = name.parse::<usize>()
        {
            if let Some(item) = items.get_mut(index) {
                *item = Slot::Value(EngineValue::Undefined);
            }
            return true;
        }
        object.properties.shift_remove(key);
        true
    }

    fn ordinary_own_keys(&self, id: ObjectId) -> Vec<Key> {
        let object = self.object(id);
        let mut keys: Vec<Key> = match &object.data {
            ObjectData::Array(items) => (0..items.len()).map(|i| Key::String(i.to_string())).collect(),
            ObjectData::TypedArray { kind, bytes } => (0..bytes.len() / kind.element_size()).map(|i| Key::String(i.to_string())).collect(),
            _ => Vec::new(),
        };
        keys.extend(object.properties.keys().filter(|k| matches!(k, Key::String(_))).cloned());
        keys.extend(object.properties.keys().filter(|k| matches!(k, Key::Symbol(_))).cloned());
        keys
    }

    fn display_slot(&self, slot: &Slot, depth: usize) -> String {
        let id = match slot {
            Slot::Value(value) => return display_scalar(value),
            Slot::Object(id) => *id,
        };
        match &self.object(id).data {
            ObjectData::Array(items) => {
                if depth > 8 {
                    return String::new();
                }
                items
                    .iter()
                    .map(|item| match item {
                        Slot::Value(EngineValue::Undefined | EngineValue::Null) => String::new(),
                        item => self.display_slot(item, depth + 1),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            ObjectData::Object => "[object Object]".to_string(),
            ObjectData::Map(_) => "[object Map]".to_string(),
            ObjectData::Set(_) => "[object Set]".to_string(),
            ObjectData::WeakMap(_) => "[object WeakMap]".to_string(),
            ObjectData::TypedArray { kind, bytes } => bytes
                .chunks(kind.element_size())
                .map(|chunk| display_scalar(&decode_element(*kind, chunk)))
                .collect::<Vec<_>>()
                .join(","),
            ObjectData::Function { name, source, .. } => source
                .clone()
                .unwrap_or_else(|| format!("function {name}() {{ [native code] }}")),
            ObjectData::Symbol { description } => format!("Symbol({description})"),
            ObjectData::Proxy { target, .. } => {
                if self.is_callable(*target) {
                    self.display_slot(&Slot::Object(*target), depth + 1)
                } else {
                    "[object Object]".to_string()
                }
            }
        }
    }
}

fn display_scalar(value: &EngineValue) -> String {
    match value {
        EngineValue::Undefined => "undefined".to_string(),
        EngineValue::Null => "null".to_string(),
        EngineValue::Boolean(b) => b.to_string(),
        EngineValue::Integer(i) => i.to_string(),
        EngineValue::Long(l) => l.to_string(),
        EngineValue::Double(d) => format_number(*d),
        EngineValue::String(s) => s.clone(),
        EngineValue::BigInt(b) => b.to_string(),
        EngineValue::Date(ms) => chrono::DateTime::from_timestamp_millis(*ms)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "Invalid Date".to_string()),
        EngineValue::Reference(handle) => format!("[reference {handle}]"),
    }
}

fn decode_element(kind: TypedArrayKind, chunk: &[u8]) -> EngineValue {
    let mut buf = [0u8; 8];
    let len = chunk.len().min(8);
    buf[..len].copy_from_slice(&chunk[..len]);
    let b2 = [buf[0], buf[1]];
    let b4 = [buf[0], buf[1], buf[2], buf[3]];
    match kind {
        TypedArrayKind::Int8 => EngineValue::Integer(buf[0] as i8 as i32),
        TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => EngineValue::Integer(buf[0] as i32),
        TypedArrayKind::Int16 => EngineValue::Integer(i16::from_le_bytes(b2) as i32),
        TypedArrayKind::Uint16 => EngineValue::Integer(u16::from_le_bytes(b2) as i32),
        TypedArrayKind::Int32 => EngineValue::Integer(i32::from_le_bytes(b4)),
        TypedArrayKind::Uint32 => EngineValue::Double(u32::from_le_bytes(b4) as f64),
        TypedArrayKind::Float32 => EngineValue::Double(f32::from_le_bytes(b4) as f64),
        TypedArrayKind::Float64 => EngineValue::Double(f64::from_le_bytes(buf)),
        TypedArrayKind::BigInt64 => EngineValue::BigInt(BigInt::from(i64::from_le_bytes(buf))),
        TypedArrayKind::BigUint64 => EngineValue::BigInt(BigInt::from(u64::from_le_bytes(buf))),
    }
}

fn encode_element(kind: TypedArrayKind, value: &EngineValue) -> Vec<u8> {
    let number = match value {
        EngineValue::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        EngineValue::BigInt(b) => b.to_f64().unwrap_or(0.0),
        other => number_of(other).unwrap_or(0.0),
    };
    let integer = number as i64;
    match kind {
        TypedArrayKind::Int8 => vec![integer as i8 as u8],
        TypedArrayKind::Uint8 => vec![integer as u8],
        TypedArrayKind::Uint8Clamped => vec![number.clamp(0.0, 255.0).round() as u8],
        TypedArrayKind::Int16 => (integer as i16).to_le_bytes().to_vec(),
        TypedArrayKind::Uint16 => (integer as u16).to_le_bytes().to_vec(),
        TypedArrayKind::Int32 => (integer as i32).to_le_bytes().to_vec(),
        TypedArrayKind::Uint32 => (integer as u32).to_le_bytes().to_vec(),
        TypedArrayKind::Float32 => (number as f32).to_le_bytes().to_vec(),
        TypedArrayKind::Float64 => number.to_le_bytes().to_vec(),
        TypedArrayKind::BigInt64 => match value {
            EngineValue::BigInt(b) => b.to_i64().unwrap_or(0),
            _ => integer,
        }
        .to_le_bytes()
        .to_vec(),
        TypedArrayKind::BigUint64 => match value {
            EngineValue::BigInt(b) => b.to_u64().unwrap_or(0),
            _ => integer as u64,
        }
        .to_le_bytes()
        .to_vec(),
    }
}

fn looks_like_function(source: &str) -> bool {
    source.starts_with("function") || source.starts_with("async") || source.starts_with("class ") || source.contains("=>")
}

fn declared_name(source: &str) -> String {
    let rest = if let Some(rest) = source.strip_prefix("function") {
        rest.trim_start_matches(['*', ' '])
    } else if let Some(rest) = source.strip_prefix("class ") {
        rest.trim_start()
    } else {
        return String::new();
    };
    rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$').collect()
}

/// An in-process engine: a handle table over an object heap.
///
/// It stores values, dispatches proxy traps and native callbacks, and evaluates literals and
/// function sources. It does not run script code, so calling a user-defined function fails.
/// Objects are never collected; only handles are tracked, which makes leaks and double frees
/// observable through [`MemoryEngine::live_handles`].
pub struct MemoryEngine {
    heap: RefCell<Heap>,
    converter: RefCell<Rc<dyn Converter>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        MemoryEngine::new()
    }
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heap = self.heap.borrow();
        f.debug_struct("MemoryEngine")
            .field("objects", &heap.objects.len())
            .field("live_handles", &heap.handles.len())
            .field("callbacks", &heap.callbacks.iter().flatten().count())
            .finish()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        let mut heap = Heap::default();
        for name in GLOBAL_CONSTRUCTORS {
            let id = heap.push(ObjectData::Function {
                function_type: FunctionType::Native,
                name: name.to_string(),
                source: None,
                callback: None,
            });
            heap.globals.insert(name.to_string(), id);
        }
        for description in WELL_KNOWN_SYMBOLS {
            let id = heap.push(ObjectData::Symbol {
                description: description.to_string(),
            });
            heap.well_known.insert(description.to_string(), id);
        }
        MemoryEngine {
            heap: RefCell::new(heap),
            converter: RefCell::new(Rc::new(ObjectConverter::new())),
        }
    }

    pub fn with_converter(converter: Rc<dyn Converter>) -> Self {
        let engine = MemoryEngine::new();
        engine.set_converter(converter);
        engine
    }

    pub fn set_converter(&self, converter: Rc<dyn Converter>) {
        *self.converter.borrow_mut() = converter;
    }

    /// Number of native callbacks still attached to a reachable function.
    pub fn live_callbacks(&self) -> usize {
        self.heap.borrow().callbacks.iter().flatten().count()
    }

    /// Number of handles currently owned by callers.
    pub fn live_handles(&self) -> usize {
        self.heap.borrow().handles.len()
    }

    pub fn object_count(&self) -> usize {
        self.heap.borrow().objects.len()
    }

    fn resolve(&self, value: &EngineValue) -> Result<ObjectId, BridgeError> {
        self.heap.borrow().resolve(value)
    }

    fn alloc(&self, data: ObjectData) -> EngineValue {
        let mut heap = self.heap.borrow_mut();
        let id = heap.push(data);
        heap.new_handle(id)
    }

    fn with_temp<R>(&self, id: ObjectId, f: impl FnOnce(&EngineValue) -> Result<R, BridgeError>) -> Result<R, BridgeError> {
        let value = self.heap.borrow_mut().new_handle(id);
        let result = f(&value);
        self.release(&value)?;
        result
    }

    fn proxy_parts(&self, id: ObjectId) -> Option<(ObjectId, ObjectId)> {
        self.heap.borrow().proxy_parts(id)
    }

    fn to_key(&self, key: &EngineValue) -> Result<Key, BridgeError> {
        match key {
            EngineValue::String(name) => Ok(Key::String(name.clone())),
            EngineValue::Reference(_) => {
                let id = self.resolve(key)?;
                if matches!(self.heap.borrow().object(id).data, ObjectData::Symbol { .. }) {
                    Ok(Key::Symbol(id))
                } else {
                    Ok(Key::String(self.display_string(key)?))
                }
            }
            other => Ok(Key::String(display_scalar(other))),
        }
    }

    /// Calls the handler's trap `name`, or returns `None` when the handler does not define it.
    fn invoke_trap(&self, handler: ObjectId, name: &str, args: &[EngineValue]) -> Result<Option<EngineValue>, BridgeError> {
        let trap = self.heap.borrow().object(handler).properties.get(&Key::String(name.to_string())).cloned();
        let Some(Slot::Object(trap)) = trap else {
            return Ok(None);
        };
        log::trace!("dispatching proxy trap {name}");
        self.with_temp(trap, |trap| self.with_temp(handler, |handler| self.call(trap, handler, args)))
            .map(Some)
    }

    fn create_args_array(&self, args: &[EngineValue]) -> Result<EngineValue, BridgeError> {
        let array = self.create_array()?;
        for arg in args {
            if let Err(err) = self.array_push(&array, arg) {
                self.release(&array)?;
                return Err(err);
            }
        }
        Ok(array)
    }

    fn construct_native(&self, name: &str, args: &[EngineValue]) -> Result<EngineValue, BridgeError> {
        match name {
            "Object" => self.create_object(),
            "Array" => self.create_array(),
            "Map" => self.create_map(),
            "Set" => self.create_set(),
            "WeakMap" => self.create_weak_map(),
            "Symbol" => {
                let description = match args.first() {
                    Some(arg) if !arg.is_undefined() => self.display_string(arg)?,
                    _ => String::new(),
                };
                self.create_symbol(&description, false)
            }
            other => raise_engine_error!(format!("native function {other} is not available")),
        }
    }
}

impl Engine for MemoryEngine {
    fn create_array(&self) -> Result<EngineValue, BridgeError> {
        Ok(self.alloc(ObjectData::Array(Vec::new())))
    }

    fn create_object(&self) -> Result<EngineValue, BridgeError> {
        Ok(self.alloc(ObjectData::Object))
    }

    fn create_map(&self) -> Result<EngineValue, BridgeError> {
        Ok(self.alloc(ObjectData::Map(Vec::new())))
    }

    fn create_set(&self) -> Result<EngineValue, BridgeError> {
        Ok(self.alloc(ObjectData::Set(Vec::new())))
    }

    fn create_weak_map(&self) -> Result<EngineValue, BridgeError> {
        Ok(self.alloc(ObjectData::WeakMap(Vec::new())))
    }

    fn create_typed_array(&self, kind: TypedArrayKind, length: usize) -> Result<EngineValue, BridgeError> {
        Ok(self.alloc(ObjectData::TypedArray {
            kind,
            bytes: vec![0; length * kind.element_size()],
        }))
    }

    fn create_symbol(&self, description: &str, global: bool) -> Result<EngineValue, BridgeError> {
        let mut heap = self.heap.borrow_mut();
        let existing = if global { heap.global_symbols.get(description).copied() } else { None };
        let id = match existing {
            Some(id) => id,
            None => {
                let id = heap.push(ObjectData::Symbol {
                    description: description.to_string(),
                });
                if global {
                    heap.global_symbols.insert(description.to_string(), id);
                }
                id
            }
        };
        Ok(heap.new_handle(id))
    }

    fn create_proxy(&self, target: &EngineValue, handler: &EngineValue) -> Result<EngineValue, BridgeError> {
        let target = self.resolve(target)?;
        let handler = self.resolve(handler)?;
        self.heap.borrow_mut().pin(target);
        Ok(self.alloc(ObjectData::Proxy { target, handler }))
    }

    fn create_function(&self, context: CallbackContext) -> Result<(EngineValue, CallbackId), BridgeError> {
        let name = context.name.clone();
        let id = self.heap.borrow_mut().add_callback(context);
        let function = self.alloc(ObjectData::Function {
            function_type: FunctionType::Api,
            name,
            source: None,
            callback: Some(id),
        });
        Ok((function, id))
    }

    fn callback_context(&self, id: CallbackId) -> Option<Rc<CallbackContext>> {
        self.heap.borrow().callbacks.get(id.0 as usize).cloned().flatten()
    }

    fn compile_and_evaluate(&self, source: &str) -> Result<EngineValue, BridgeError> {
        let source = source.trim();
        if looks_like_function(source) {
            return Ok(self.alloc(ObjectData::Function {
                function_type: FunctionType::UserDefined,
                name: declared_name(source),
                source: Some(source.to_string()),
                callback: None,
            }));
        }
        let value = match source {
            "" | "undefined" => EngineValue::Undefined,
            "null" => EngineValue::Null,
            "true" => EngineValue::Boolean(true),
            "false" => EngineValue::Boolean(false),
            _ => {
                if let Ok(i) = source.parse::<i32>() {
                    EngineValue::Integer(i)
                } else if let Ok(d) = source.parse::<f64>() {
                    EngineValue::Double(d)
                } else if source.len() >= 2
                    && ((source.starts_with('"') && source.ends_with('"')) || (source.starts_with('\'') && source.ends_with('\'')))
                {
                    EngineValue::String(source[1..source.len() - 1].to_string())
                } else {
                    raise_engine_error!(format!("cannot evaluate '{source}' without a script runtime"));
                }
            }
        };
        Ok(value)
    }

    fn duplicate(&self, value: &EngineValue) -> Result<EngineValue, BridgeError> {
        match value {
            EngineValue::Reference(_) => {
                let mut heap = self.heap.borrow_mut();
                let id = heap.resolve(value)?;
                Ok(heap.new_handle(id))
            }
            other => Ok(other.clone()),
        }
    }

    fn release(&self, value: &EngineValue) -> Result<(), BridgeError> {
        if let EngineValue::Reference(handle) = value {
            let reclaimed = {
                let mut heap = self.heap.borrow_mut();
                let Some(id) = heap.handles.remove(&handle.0) else {
                    return Err(BridgeError::InvalidHandle { handle: handle.0 });
                };
                heap.reclaim_callback(id)
            };
            if reclaimed.is_some() {
                log::trace!("reclaimed native callback of released function");
            }
        }
        Ok(())
    }

    fn reference_kind(&self, value: &EngineValue) -> Result<ReferenceKind, BridgeError> {
        let heap = self.heap.borrow();
        let id = heap.resolve(value)?;
        Ok(match &heap.object(id).data {
            ObjectData::Object => ReferenceKind::Object,
            ObjectData::Array(_) => ReferenceKind::Array,
            ObjectData::Map(_) => ReferenceKind::Map,
            ObjectData::Set(_) => ReferenceKind::Set,
            ObjectData::WeakMap(_) => ReferenceKind::WeakMap,
            ObjectData::TypedArray { kind, .. } => ReferenceKind::TypedArray(*kind),
            ObjectData::Function { .. } => ReferenceKind::Function,
            ObjectData::Symbol { .. } => ReferenceKind::Symbol,
            ObjectData::Proxy { .. } => ReferenceKind::Proxy,
        })
    }

    fn get_property(&self, object: &EngineValue, key: &EngineValue) -> Result<EngineValue, BridgeError> {
        let id = self.resolve(object)?;
        if let Some((target, handler)) = self.proxy_parts(id) {
            return self.with_temp(target, |target_value| {
                match self.invoke_trap(handler, "get", &[target_value.clone(), key.clone(), object.clone()])? {
                    Some(value) => Ok(value),
                    None => self.get_property(target_value, key),
                }
            });
        }
        let key = self.to_key(key)?;
        let mut heap = self.heap.borrow_mut();
        Ok(match heap.own_slot(id, &key) {
            Some(slot) => heap.from_slot(&slot),
            None => EngineValue::Undefined,
        })
    }

    fn set_property(&self, object: &EngineValue, key: &EngineValue, value: &EngineValue) -> Result<bool, BridgeError> {
        let id = self.resolve(object)?;
        if let Some((target, handler)) = self.proxy_parts(id) {
            return self.with_temp(target, |target_value| {
                match self.invoke_trap(handler, "set", &[target_value.clone(), key.clone(), value.clone(), object.clone()])? {
                    Some(result) => {
                        let accepted = result.is_truthy();
                        self.release(&result)?;
                        Ok(accepted)
                    }
                    None => self.set_property(target_value, key, value),
                }
            });
        }
        let key = self.to_key(key)?;
        let mut heap = self.heap.borrow_mut();
        let slot = heap.to_slot(value)?;
        Ok(heap.ordinary_set(id, key, slot))
    }

    fn has_property(&self, object: &EngineValue, key: &EngineValue) -> Result<bool, BridgeError> {
        let id = self.resolve(object)?;
        if let Some((target, handler)) = self.proxy_parts(id) {
            return self.with_temp(target, |target_value| {
                match self.invoke_trap(handler, "has", &[target_value.clone(), key.clone()])? {
                    Some(result) => {
                        let found = result.is_truthy();
                        self.release(&result)?;
                        Ok(found)
                    }
                    None => self.has_property(target_value, key),
                }
            });
        }
        let key = self.to_key(key)?;
        Ok(self.heap.borrow().own_slot(id, &key).is_some())
    }

    fn delete_property(&self, object: &EngineValue, key: &EngineValue) -> Result<bool, BridgeError> {
        let id = self.resolve(object)?;
        if let Some((target, handler)) = self.proxy_parts(id) {
            return self.with_temp(target, |target_value| {
                match self.invoke_trap(handler, "deleteProperty", &[target_value.clone(), key.clone()])? {
                    Some(result) => {
                        let deleted = result.is_truthy();
                        self.release(&result)?;
                        Ok(deleted)
                    }
                    None => self.delete_property(target_value, key),
                }
            });
        }
        let key = self.to_key(key)?;
        Ok(self.heap.borrow_mut().ordinary_delete(id, &key))
    }

    fn own_keys(&self, object: &EngineValue) -> Result<Vec<EngineValue>, BridgeError> {
        let id = self.resolve(object)?;
        if let Some((target, handler)) = self.proxy_parts(id) {
            return self.with_temp(target, |target_value| match self.invoke_trap(handler, "ownKeys", &[target_value.clone()])? {
                Some(keys) => {
                    let mut result = Vec::new();
                    let collected = self.array_for_each(&keys, &mut |_, key| {
                        result.push(self.duplicate(key)?);
                        Ok(())
                    });
                    self.release(&keys)?;
                    collected?;
                    Ok(result)
                }
                None => self.own_keys(target_value),
            });
        }
        let mut heap = self.heap.borrow_mut();
        let keys = heap.ordinary_own_keys(id);
        Ok(keys.iter().map(|key| heap.from_key(key)).collect())
    }

    fn array_length(&self, array: &EngineValue) -> Result<usize, BridgeError> {
        let id = self.resolve(array)?;
        if self.proxy_parts(id).is_some() {
            let length = self.get_named(array, "length")?;
            let result = length.as_i64().unwrap_or(0).max(0) as usize;
            self.release(&length)?;
            return Ok(result);
        }
        match &self.heap.borrow().object(id).data {
            ObjectData::Array(items) => Ok(items.len()),
            ObjectData::TypedArray { kind, bytes } => Ok(bytes.len() / kind.element_size()),
            _ => Err(BridgeError::not_supported("value is not an array")),
        }
    }

    fn array_get(&self, array: &EngineValue, index: usize) -> Result<EngineValue, BridgeError> {
        self.get_property(array, &EngineValue::String(index.to_string()))
    }

    fn array_push(&self, array: &EngineValue, value: &EngineValue) -> Result<usize, BridgeError> {
        let mut heap = self.heap.borrow_mut();
        let id = heap.resolve(array)?;
        let slot = heap.to_slot(value)?;
        match &mut heap.object_mut(id).data {
            ObjectData::Array(items) => {
                items.push(slot);
                Ok(items.len())
            }
            _ => Err(BridgeError::not_supported("value is not an array")),
        }
    }

    fn array_for_each(
        &self,
        array: &EngineValue,
        f: &mut dyn FnMut(usize, &EngineValue) -> Result<(), BridgeError>,
    ) -> Result<(), BridgeError> {
        let id = self.resolve(array)?;
        let snapshot = match &self.heap.borrow().object(id).data {
            ObjectData::Array(items) => Some(items.clone()),
            _ => None,
        };
        match snapshot {
            Some(items) => {
                for (index, slot) in items.iter().enumerate() {
                    let value = self.heap.borrow_mut().from_slot(slot);
                    let result = f(index, &value);
                    self.release(&value)?;
                    result?;
                }
            }
            None => {
                for index in 0..self.array_length(array)? {
                    let value = self.array_get(array, index)?;
                    let result = f(index, &value);
                    self.release(&value)?;
                    result?;
                }
            }
        }
        Ok(())
    }

    fn set_add(&self, set: &EngineValue, value: &EngineValue) -> Result<(), BridgeError> {
        let mut heap = self.heap.borrow_mut();
        let id = heap.resolve(set)?;
        let slot = heap.to_slot(value)?;
        match &mut heap.object_mut(id).data {
            ObjectData::Set(items) => {
                if !items.iter().any(|item| item.same_value_zero(&slot)) {
                    items.push(slot);
                }
                Ok(())
            }
            _ => Err(BridgeError::not_supported("value is not a set")),
        }
    }

    fn set_for_each(&self, set: &EngineValue, f: &mut dyn FnMut(&EngineValue) -> Result<(), BridgeError>) -> Result<(), BridgeError> {
        let id = self.resolve(set)?;
        let items = match &self.heap.borrow().object(id).data {
            ObjectData::Set(items) => items.clone(),
            _ => return Err(BridgeError::not_supported("value is not a set")),
        };
        for slot in &items {
            let value = self.heap.borrow_mut().from_slot(slot);
            let result = f(&value);
            self.release(&value)?;
            result?;
        }
        Ok(())
    }

    fn map_set(&self, map: &EngineValue, key: &EngineValue, value: &EngineValue) -> Result<(), BridgeError> {
        let mut heap = self.heap.borrow_mut();
        let id = heap.resolve(map)?;
        let key = heap.to_slot(key)?;
        let value = heap.to_slot(value)?;
        match &mut heap.object_mut(id).data {
            ObjectData::Map(entries) => {
                match entries.iter_mut().find(|(k, _)| k.same_value_zero(&key)) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
                Ok(())
            }
            ObjectData::WeakMap(entries) => {
                let Slot::Object(key) = key else {
                    return Err(BridgeError::not_supported("weak map keys must be objects"));
                };
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
                Ok(())
            }
            _ => Err(BridgeError::not_supported("value is not a map")),
        }
    }

    fn map_for_each(
        &self,
        map: &EngineValue,
        f: &mut dyn FnMut(&EngineValue, &EngineValue) -> Result<(), BridgeError>,
    ) -> Result<(), BridgeError> {
        let id = self.resolve(map)?;
        let entries: Vec<(Slot, Slot)> = match &self.heap.borrow().object(id).data {
            ObjectData::Map(entries) => entries.clone(),
            ObjectData::WeakMap(entries) => entries.iter().map(|(k, v)| (Slot::Object(*k), v.clone())).collect(),
            _ => return Err(BridgeError::not_supported("value is not a map")),
        };
        for (key, value) in &entries {
            let (key, value) = {
                let mut heap = self.heap.borrow_mut();
                (heap.from_slot(key), heap.from_slot(value))
            };
            let result = f(&key, &value);
            self.release(&key)?;
            self.release(&value)?;
            result?;
        }
        Ok(())
    }

    fn typed_array_bytes(&self, array: &EngineValue) -> Result<Vec<u8>, BridgeError> {
        let heap = self.heap.borrow();
        let id = heap.resolve(array)?;
        match &heap.object(id).data {
            ObjectData::TypedArray { bytes, .. } => Ok(bytes.clone()),
            _ => Err(BridgeError::not_supported("value is not a typed array")),
        }
    }

    fn typed_array_write_bytes(&self, array: &EngineValue, source: &[u8]) -> Result<(), BridgeError> {
        let mut heap = self.heap.borrow_mut();
        let id = heap.resolve(array)?;
        match &mut heap.object_mut(id).data {
            ObjectData::TypedArray { bytes, .. } => {
                if bytes.len() != source.len() {
                    raise_engine_error!(format!("byte length mismatch: view has {}, source has {}", bytes.len(), source.len()));
                }
                bytes.copy_from_slice(source);
                Ok(())
            }
            _ => Err(BridgeError::not_supported("value is not a typed array")),
        }
    }

    fn function_type(&self, function: &EngineValue) -> Result<FunctionType, BridgeError> {
        let heap = self.heap.borrow();
        let id = heap.resolve(function)?;
        match &heap.object(id).data {
            ObjectData::Function { function_type, .. } => Ok(*function_type),
            ObjectData::Proxy { .. } if heap.is_callable(id) => Ok(FunctionType::Unknown),
            _ => Err(BridgeError::not_supported("value is not a function")),
        }
    }

    fn function_source(&self, function: &EngineValue) -> Result<Option<String>, BridgeError> {
        let heap = self.heap.borrow();
        let id = heap.resolve(function)?;
        match &heap.object(id).data {
            ObjectData::Function { source, .. } => Ok(source.clone()),
            _ => Err(BridgeError::not_supported("value is not a function")),
        }
    }

    fn display_string(&self, value: &EngineValue) -> Result<String, BridgeError> {
        match value {
            EngineValue::Reference(_) => {
                let heap = self.heap.borrow();
                let id = heap.resolve(value)?;
                Ok(heap.display_slot(&Slot::Object(id), 0))
            }
            other => Ok(display_scalar(other)),
        }
    }

    fn symbol_description(&self, symbol: &EngineValue) -> Result<String, BridgeError> {
        let heap = self.heap.borrow();
        let id = heap.resolve(symbol)?;
        match &heap.object(id).data {
            ObjectData::Symbol { description } => Ok(description.clone()),
            _ => Err(BridgeError::not_supported("value is not a symbol")),
        }
    }

    fn proxy_handler(&self, proxy: &EngineValue) -> Result<EngineValue, BridgeError> {
        let mut heap = self.heap.borrow_mut();
        let id = heap.resolve(proxy)?;
        match heap.proxy_parts(id) {
            Some((_, handler)) => Ok(heap.new_handle(handler)),
            None => Err(BridgeError::not_supported("value is not a proxy")),
        }
    }

    fn proxy_target(&self, proxy: &EngineValue) -> Result<EngineValue, BridgeError> {
        let mut heap = self.heap.borrow_mut();
        let id = heap.resolve(proxy)?;
        match heap.proxy_parts(id) {
            Some((target, _)) => Ok(heap.new_handle(target)),
            None => Err(BridgeError::not_supported("value is not a proxy")),
        }
    }

    fn set_private(&self, object: &EngineValue, name: &str, value: &EngineValue) -> Result<(), BridgeError> {
        let mut heap = self.heap.borrow_mut();
        let id = heap.resolve(object)?;
        let slot = heap.to_slot(value)?;
        heap.object_mut(id).private.insert(name.to_string(), slot);
        Ok(())
    }

    fn get_private(&self, object: &EngineValue, name: &str) -> Result<Option<EngineValue>, BridgeError> {
        let mut heap = self.heap.borrow_mut();
        let id = heap.resolve(object)?;
        let slot = heap.object(id).private.get(name).cloned();
        Ok(slot.map(|slot| heap.from_slot(&slot)))
    }

    fn has_private(&self, object: &EngineValue, name: &str) -> Result<bool, BridgeError> {
        let heap = self.heap.borrow();
        let id = heap.resolve(object)?;
        Ok(heap.object(id).private.contains_key(name))
    }

    fn call(&self, function: &EngineValue, this: &EngineValue, args: &[EngineValue]) -> Result<EngineValue, BridgeError> {
        let id = self.resolve(function)?;
        if let Some((target, handler)) = self.proxy_parts(id) {
            return self.with_temp(target, |target_value| {
                let arguments = self.create_args_array(args)?;
                let result = self.invoke_trap(handler, "apply", &[target_value.clone(), this.clone(), arguments.clone()]);
                self.release(&arguments)?;
                match result? {
                    Some(value) => Ok(value),
                    None => self.call(target_value, this, args),
                }
            });
        }
        let (function_type, name, callback) = match &self.heap.borrow().object(id).data {
            ObjectData::Function {
                function_type,
                name,
                callback,
                ..
            } => (*function_type, name.clone(), *callback),
            _ => return Err(BridgeError::not_supported("value is not a function")),
        };
        if let Some(callback) = callback {
            let Some(context) = self.callback_context(callback) else {
                raise_engine_error!(format!("callback {} is missing", callback.0));
            };
            return (context.callable)(self, this, args);
        }
        match function_type {
            FunctionType::Native => self.construct_native(&name, args),
            _ => raise_engine_error!(format!("cannot execute user-defined function '{name}' without a script runtime")),
        }
    }

    fn construct(&self, function: &EngineValue, args: &[EngineValue]) -> Result<EngineValue, BridgeError> {
        let id = self.resolve(function)?;
        if let Some((target, handler)) = self.proxy_parts(id) {
            return self.with_temp(target, |target_value| {
                let arguments = self.create_args_array(args)?;
                let result = self.invoke_trap(handler, "construct", &[target_value.clone(), arguments.clone(), function.clone()]);
                self.release(&arguments)?;
                match result? {
                    Some(value) => Ok(value),
                    None => self.construct(target_value, args),
                }
            });
        }
        self.call(function, &EngineValue::Undefined, args)
    }

    fn global(&self, name: &str) -> Result<EngineValue, BridgeError> {
        let mut heap = self.heap.borrow_mut();
        match heap.globals.get(name).copied() {
            Some(id) => Ok(heap.new_handle(id)),
            None => Ok(EngineValue::Undefined),
        }
    }

    fn well_known_symbol(&self, description: &str) -> Result<EngineValue, BridgeError> {
        let mut heap = self.heap.borrow_mut();
        match heap.well_known.get(description).copied() {
            Some(id) => Ok(heap.new_handle(id)),
            None => Err(BridgeError::not_supported(format!("unknown well-known symbol {description}"))),
        }
    }

    fn converter(&self) -> Rc<dyn Converter> {
        self.converter.borrow().clone()
    }

    fn is_callable(&self, value: &EngineValue) -> bool {
        let heap = self.heap.borrow();
        match heap.resolve(value) {
            Ok(id) => heap.is_callable(id),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NativeFn;

    #[test]
    fn test_double_release_is_rejected() {
        let engine = MemoryEngine::new();
        let object = engine.create_object().unwrap();
        engine.release(&object).unwrap();
        assert!(matches!(engine.release(&object), Err(BridgeError::InvalidHandle { .. })));
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_released_callback_is_reclaimed() {
        let engine = MemoryEngine::new();
        let callable: NativeFn = Rc::new(|_: &dyn Engine, _: &EngineValue, _: &[EngineValue]| Ok(EngineValue::Integer(7)));
        let (function, id) = engine.create_function(CallbackContext::new("seven", callable.clone())).unwrap();
        assert_eq!(engine.live_callbacks(), 1);
        engine.release(&function).unwrap();
        assert!(engine.callback_context(id).is_none());
        assert_eq!(engine.live_callbacks(), 0);

        // The freed slot is reused, and a stored function keeps its callback.
        let (stored, reused) = engine.create_function(CallbackContext::new("stored", callable)).unwrap();
        assert_eq!(reused, id);
        let holder = engine.create_object().unwrap();
        engine.set_named(&holder, "f", &stored).unwrap();
        engine.release(&stored).unwrap();
        assert_eq!(engine.live_callbacks(), 1);
        let stored = engine.get_named(&holder, "f").unwrap();
        assert_eq!(engine.call(&stored, &EngineValue::Undefined, &[]).unwrap(), EngineValue::Integer(7));
        engine.release(&stored).unwrap();
        engine.release(&holder).unwrap();
        assert_eq!(engine.live_callbacks(), 1);
    }

    #[test]
    fn test_array_growth_is_bounded() {
        let engine = MemoryEngine::new();
        let array = engine.create_array().unwrap();
        assert!(!engine.set_named(&array, "4294967294", &EngineValue::Integer(1)).unwrap());
        assert!(!engine.set_named(&array, "length", &EngineValue::Double(1e15)).unwrap());
        assert_eq!(engine.array_length(&array).unwrap(), 0);
        engine.release(&array).unwrap();
    }

    #[test]
    fn test_array_length_and_holes() {
        let engine = MemoryEngine::new();
        let array = engine.create_array().unwrap();
        engine.array_push(&array, &EngineValue::Integer(1)).unwrap();
        engine.set_named(&array, "3", &EngineValue::from("x")).unwrap();
        assert_eq!(engine.array_length(&array).unwrap(), 4);
        assert_eq!(engine.array_get(&array, 1).unwrap(), EngineValue::Undefined);
        assert_eq!(engine.display_string(&array).unwrap(), "1,,,x");
        engine.release(&array).unwrap();
    }

    #[test]
    fn test_typed_array_elements() {
        let engine = MemoryEngine::new();
        let view = engine.create_typed_array(TypedArrayKind::Int16, 2).unwrap();
        engine.typed_array_write_bytes(&view, &[0xff, 0xff, 0x02, 0x00]).unwrap();
        assert_eq!(engine.array_get(&view, 0).unwrap(), EngineValue::Integer(-1));
        assert_eq!(engine.array_get(&view, 1).unwrap(), EngineValue::Integer(2));
        assert!(engine.typed_array_write_bytes(&view, &[0]).is_err());
        engine.release(&view).unwrap();
    }

    #[test]
    fn test_global_symbols_are_shared() {
        let engine = MemoryEngine::new();
        let a = engine.create_symbol("k", true).unwrap();
        let b = engine.create_symbol("k", true).unwrap();
        let object = engine.create_object().unwrap();
        engine.set_property(&object, &a, &EngineValue::Integer(1)).unwrap();
        assert_eq!(engine.get_property(&object, &b).unwrap(), EngineValue::Integer(1));
        for value in [a, b, object] {
            engine.release(&value).unwrap();
        }
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_weak_map_rejects_scalar_keys() {
        let engine = MemoryEngine::new();
        let map = engine.create_weak_map().unwrap();
        let result = engine.map_set(&map, &EngineValue::from("k"), &EngineValue::Integer(1));
        assert!(matches!(result, Err(BridgeError::NotSupported { .. })));
        engine.release(&map).unwrap();
    }

    #[test]
    fn test_native_callback_and_user_defined_function() {
        let engine = MemoryEngine::new();
        let callable: crate::core::NativeFn =
            Rc::new(|_: &dyn Engine, _: &EngineValue, args: &[EngineValue]| -> Result<EngineValue, BridgeError> {
                Ok(EngineValue::Integer(args.len() as i32))
            });
        let (function, _) = engine.create_function(CallbackContext::new("count", callable)).unwrap();
        let result = engine
            .call(&function, &EngineValue::Undefined, &[EngineValue::Null, EngineValue::Null])
            .unwrap();
        assert_eq!(result, EngineValue::Integer(2));
        assert_eq!(engine.function_type(&function).unwrap(), FunctionType::Api);

        let user = engine.compile_and_evaluate("function add(a, b) { return a + b; }").unwrap();
        assert_eq!(engine.function_type(&user).unwrap(), FunctionType::UserDefined);
        assert_eq!(engine.get_named(&user, "name").unwrap(), EngineValue::from("add"));
        assert!(engine.call(&user, &EngineValue::Undefined, &[]).is_err());
        engine.release(&function).unwrap();
        engine.release(&user).unwrap();
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_compile_literals() {
        let engine = MemoryEngine::new();
        assert_eq!(engine.compile_and_evaluate("42").unwrap(), EngineValue::Integer(42));
        assert_eq!(engine.compile_and_evaluate("'hi'").unwrap(), EngineValue::from("hi"));
        assert!(engine.compile_and_evaluate("a + b").is_err());
    }
}
