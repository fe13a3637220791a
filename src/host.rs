use crate::core::{Engine, EngineValue, FunctionType};
use crate::error::BridgeError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// A value on the host side of the boundary.
///
/// Collections are shared and mutable so that a proxy handed to script code keeps operating on
/// the very same backing storage the host holds.
#[derive(Clone)]
pub enum HostValue {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    String(String),
    BigInt(BigInt),
    DateTime(DateTime<Utc>),
    Optional(Option<Box<HostValue>>),
    List(Shared<Vec<HostValue>>),
    Set(Shared<HostSet>),
    Map(Shared<HostMap>),
    Stream(HostStream),
    Array(HostArray),
    Function(FunctionEntity),
    Symbol(SymbolEntity),
    Object(Rc<dyn HostObject>),
    Class(Rc<dyn HostClass>),
    /// An engine value passed through unconverted. A reference here owns its handle.
    Engine(EngineValue),
}

impl HostValue {
    pub fn list(items: Vec<HostValue>) -> Self {
        HostValue::List(shared(items))
    }

    pub fn map(map: HostMap) -> Self {
        HostValue::Map(shared(map))
    }

    pub fn set(set: HostSet) -> Self {
        HostValue::Set(shared(set))
    }

    pub fn object<T: HostObject>(object: T) -> Self {
        HostValue::Object(Rc::new(object))
    }

    pub fn stream<I>(iter: I) -> Self
    where
        I: Iterator<Item = HostValue> + 'static,
    {
        HostValue::Stream(HostStream::new(iter))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null | HostValue::Optional(None))
    }

    /// Machine scalars and boxed-like values that map onto engine primitives.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            HostValue::Boolean(_)
                | HostValue::Byte(_)
                | HostValue::Short(_)
                | HostValue::Integer(_)
                | HostValue::Long(_)
                | HostValue::Float(_)
                | HostValue::Double(_)
                | HostValue::Char(_)
                | HostValue::String(_)
                | HostValue::BigInt(_)
                | HostValue::DateTime(_)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Byte(v) => Some(*v as f64),
            HostValue::Short(v) => Some(*v as f64),
            HostValue::Integer(v) => Some(*v as f64),
            HostValue::Long(v) => Some(*v as f64),
            HostValue::Float(v) => Some(*v as f64),
            HostValue::Double(v) => Some(*v),
            HostValue::BigInt(v) => v.to_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Builds a host value from JSON. Objects become plain (non-entity) maps.
    pub fn from_json(value: &serde_json::Value) -> HostValue {
        match value {
            serde_json::Value::Null => HostValue::Null,
            serde_json::Value::Bool(b) => HostValue::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(i) => HostValue::Integer(i),
                        Err(_) => HostValue::Long(i),
                    }
                } else {
                    HostValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => HostValue::String(s.clone()),
            serde_json::Value::Array(items) => HostValue::list(items.iter().map(HostValue::from_json).collect()),
            serde_json::Value::Object(fields) => {
                let mut map = HostMap::new();
                for (key, value) in fields {
                    map.insert(key.as_str(), HostValue::from_json(value));
                }
                HostValue::map(map)
            }
        }
    }

    pub fn from_json_str(text: &str) -> Result<HostValue, BridgeError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(HostValue::from_json(&value))
    }

    pub fn to_json(&self) -> Result<serde_json::Value, BridgeError> {
        use serde_json::Value;
        let number = |d: f64| serde_json::Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null);
        Ok(match self {
            HostValue::Null | HostValue::Optional(None) => Value::Null,
            HostValue::Optional(Some(inner)) => inner.to_json()?,
            HostValue::Boolean(b) => Value::Bool(*b),
            HostValue::Byte(v) => Value::from(*v),
            HostValue::Short(v) => Value::from(*v),
            HostValue::Integer(v) => Value::from(*v),
            HostValue::Long(v) => Value::from(*v),
            HostValue::Float(v) => number(*v as f64),
            HostValue::Double(v) => number(*v),
            HostValue::Char(c) => Value::String(c.to_string()),
            HostValue::String(s) => Value::String(s.clone()),
            HostValue::BigInt(b) => Value::String(b.to_string()),
            HostValue::DateTime(dt) => serde_json::to_value(dt)?,
            HostValue::List(items) => Value::Array(items.borrow().iter().map(|v| v.to_json()).collect::<Result<_, _>>()?),
            HostValue::Set(set) => Value::Array(set.borrow().iter().map(|v| v.to_json()).collect::<Result<_, _>>()?),
            HostValue::Array(array) => Value::Array(array.to_values().iter().map(|v| v.to_json()).collect::<Result<_, _>>()?),
            HostValue::Map(map) => {
                let mut fields = serde_json::Map::new();
                for (key, value) in map.borrow().iter() {
                    fields.insert(key.to_string(), value.to_json()?);
                }
                Value::Object(fields)
            }
            HostValue::Symbol(symbol) => Value::String(symbol.description.clone()),
            HostValue::Function(_) | HostValue::Stream(_) | HostValue::Object(_) | HostValue::Class(_) | HostValue::Engine(_) => {
                return Err(BridgeError::not_supported(format!("{} cannot be serialized to JSON", self.type_label())));
            }
        })
    }

    /// The engine handle owned by a passthrough value.
    pub fn passthrough_handle(&self) -> Option<&EngineValue> {
        match self {
            HostValue::Engine(value) if value.is_reference() => Some(value),
            _ => None,
        }
    }

    /// Releases the handle a passthrough value owns. Values nested in collections belong to the
    /// collection's owner and are left alone.
    pub fn release_handle(&self, engine: &dyn Engine) -> Result<(), BridgeError> {
        match self.passthrough_handle() {
            Some(value) => engine.release(value),
            None => Ok(()),
        }
    }

    /// A copy that owns a handle of its own when this is a passthrough value.
    pub fn duplicate_handle(&self, engine: &dyn Engine) -> Result<HostValue, BridgeError> {
        match self.passthrough_handle() {
            Some(value) => Ok(HostValue::Engine(engine.duplicate(value)?)),
            None => Ok(self.clone()),
        }
    }

    pub fn type_label(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Boolean(_) => "boolean",
            HostValue::Byte(_) => "byte",
            HostValue::Short(_) => "short",
            HostValue::Integer(_) => "int",
            HostValue::Long(_) => "long",
            HostValue::Float(_) => "float",
            HostValue::Double(_) => "double",
            HostValue::Char(_) => "char",
            HostValue::String(_) => "string",
            HostValue::BigInt(_) => "bigint",
            HostValue::DateTime(_) => "datetime",
            HostValue::Optional(_) => "optional",
            HostValue::List(_) => "list",
            HostValue::Set(_) => "set",
            HostValue::Map(_) => "map",
            HostValue::Stream(_) => "stream",
            HostValue::Array(_) => "array",
            HostValue::Function(_) => "function",
            HostValue::Symbol(_) => "symbol",
            HostValue::Object(_) => "object",
            HostValue::Class(_) => "class",
            HostValue::Engine(_) => "engine value",
        }
    }
}

/// Releases every passthrough handle in `values`, returning the first failure.
pub fn release_handles<'a>(engine: &dyn Engine, values: impl IntoIterator<Item = &'a HostValue>) -> Result<(), BridgeError> {
    let mut outcome = Ok(());
    for value in values {
        let released = value.release_handle(engine);
        if outcome.is_ok() {
            outcome = released;
        }
    }
    outcome
}

const MAX_NESTING: usize = 128;

thread_local! {
    static VISITING: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Outcome of entering a shared collection during a recursive walk on this thread.
enum Visit {
    Entered(VisitGuard),
    /// The collection (or pair of collections) is already being walked further up.
    Cycle,
    TooDeep,
}

struct VisitGuard;

impl Drop for VisitGuard {
    fn drop(&mut self) {
        VISITING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

fn address<T>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

fn visit(key: (usize, usize)) -> Visit {
    VISITING.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.contains(&key) {
            Visit::Cycle
        } else if stack.len() >= MAX_NESTING {
            Visit::TooDeep
        } else {
            stack.push(key);
            Visit::Entered(VisitGuard)
        }
    })
}

fn shared_eq<T: PartialEq>(a: &Shared<T>, b: &Shared<T>) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    match visit((address(a), address(b))) {
        Visit::Entered(_guard) => *a.borrow() == *b.borrow(),
        Visit::Cycle => true,
        Visit::TooDeep => false,
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Null, HostValue::Null) => true,
            (HostValue::Boolean(a), HostValue::Boolean(b)) => a == b,
            (HostValue::Byte(a), HostValue::Byte(b)) => a == b,
            (HostValue::Short(a), HostValue::Short(b)) => a == b,
            (HostValue::Integer(a), HostValue::Integer(b)) => a == b,
            (HostValue::Long(a), HostValue::Long(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Double(a), HostValue::Double(b)) => a == b,
            (HostValue::Char(a), HostValue::Char(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::BigInt(a), HostValue::BigInt(b)) => a == b,
            (HostValue::DateTime(a), HostValue::DateTime(b)) => a == b,
            (HostValue::Optional(a), HostValue::Optional(b)) => a == b,
            (HostValue::List(a), HostValue::List(b)) => shared_eq(a, b),
            (HostValue::Set(a), HostValue::Set(b)) => shared_eq(a, b),
            (HostValue::Map(a), HostValue::Map(b)) => shared_eq(a, b),
            (HostValue::Stream(a), HostValue::Stream(b)) => a.ptr_eq(b),
            (HostValue::Array(a), HostValue::Array(b)) => a == b,
            (HostValue::Function(a), HostValue::Function(b)) => a == b,
            (HostValue::Symbol(a), HostValue::Symbol(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            (HostValue::Class(a), HostValue::Class(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            (HostValue::Engine(a), HostValue::Engine(b)) => a == b,
            _ => false,
        }
    }
}

pub(crate) fn format_number(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if d == d.trunc() && d.abs() < 1e21 {
        format!("{}", d as i64)
    } else {
        format!("{d}")
    }
}

fn join(values: &[HostValue]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null | HostValue::Optional(None) => write!(f, "null"),
            HostValue::Optional(Some(inner)) => write!(f, "{inner}"),
            HostValue::Boolean(b) => write!(f, "{b}"),
            HostValue::Byte(v) => write!(f, "{v}"),
            HostValue::Short(v) => write!(f, "{v}"),
            HostValue::Integer(v) => write!(f, "{v}"),
            HostValue::Long(v) => write!(f, "{v}"),
            HostValue::Float(v) => write!(f, "{}", format_number(*v as f64)),
            HostValue::Double(v) => write!(f, "{}", format_number(*v)),
            HostValue::Char(c) => write!(f, "{c}"),
            HostValue::String(s) => write!(f, "{s}"),
            HostValue::BigInt(b) => write!(f, "{b}"),
            HostValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            // A list already being joined further up reads as empty.
            HostValue::List(items) => match visit((address(items), 0)) {
                Visit::Entered(_guard) => write!(f, "{}", join(&items.borrow())),
                Visit::Cycle | Visit::TooDeep => Ok(()),
            },
            HostValue::Array(array) => write!(f, "{}", join(&array.to_values())),
            HostValue::Set(_) => write!(f, "[object Set]"),
            HostValue::Map(map) => {
                if map.borrow().is_entity() {
                    write!(f, "[object Map]")
                } else {
                    write!(f, "[object Object]")
                }
            }
            HostValue::Stream(_) => write!(f, "[object Stream]"),
            HostValue::Function(function) => match &function.source {
                Some(source) => write!(f, "{source}"),
                None => write!(f, "function () {{ [native code] }}"),
            },
            HostValue::Symbol(symbol) => write!(f, "Symbol({})", symbol.description),
            HostValue::Object(_) => write!(f, "[object Object]"),
            HostValue::Class(class) => write!(f, "class {}", class.name()),
            HostValue::Engine(value) => write!(f, "{value:?}"),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => write!(f, "Null"),
            HostValue::Boolean(b) => write!(f, "Boolean({b})"),
            HostValue::Byte(v) => write!(f, "Byte({v})"),
            HostValue::Short(v) => write!(f, "Short({v})"),
            HostValue::Integer(v) => write!(f, "Integer({v})"),
            HostValue::Long(v) => write!(f, "Long({v})"),
            HostValue::Float(v) => write!(f, "Float({v})"),
            HostValue::Double(v) => write!(f, "Double({v})"),
            HostValue::Char(c) => write!(f, "Char({c:?})"),
            HostValue::String(s) => write!(f, "String({s:?})"),
            HostValue::BigInt(b) => write!(f, "BigInt({b})"),
            HostValue::DateTime(dt) => write!(f, "DateTime({dt})"),
            HostValue::Optional(inner) => write!(f, "Optional({inner:?})"),
            HostValue::List(items) => match visit((address(items), 0)) {
                Visit::Entered(_guard) => f.debug_tuple("List").field(&*items.borrow()).finish(),
                Visit::Cycle | Visit::TooDeep => write!(f, "List([...])"),
            },
            HostValue::Set(set) => match visit((address(set), 0)) {
                Visit::Entered(_guard) => f.debug_tuple("Set").field(&*set.borrow()).finish(),
                Visit::Cycle | Visit::TooDeep => write!(f, "Set([...])"),
            },
            HostValue::Map(map) => match visit((address(map), 0)) {
                Visit::Entered(_guard) => f.debug_tuple("Map").field(&*map.borrow()).finish(),
                Visit::Cycle | Visit::TooDeep => write!(f, "Map([...])"),
            },
            HostValue::Stream(_) => write!(f, "Stream"),
            HostValue::Array(array) => write!(f, "Array({array:?})"),
            HostValue::Function(function) => write!(f, "{function:?}"),
            HostValue::Symbol(symbol) => write!(f, "{symbol:?}"),
            HostValue::Object(object) => write!(f, "Object({})", object.type_name()),
            HostValue::Class(class) => write!(f, "Class({})", class.name()),
            HostValue::Engine(value) => write!(f, "Engine({value:?})"),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HostValue {
                fn from(v: $ty) -> Self {
                    HostValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Boolean,
    i8 => Byte,
    i16 => Short,
    i32 => Integer,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    char => Char,
    String => String,
    BigInt => BigInt,
    DateTime<Utc> => DateTime,
    HostArray => Array,
    FunctionEntity => Function,
    SymbolEntity => Symbol,
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        HostValue::list(items)
    }
}

impl From<HostMap> for HostValue {
    fn from(map: HostMap) -> Self {
        HostValue::map(map)
    }
}

impl From<HostSet> for HostValue {
    fn from(set: HostSet) -> Self {
        HostValue::set(set)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        HostValue::Optional(value.map(|v| Box::new(v.into())))
    }
}

/// Insertion-ordered map keyed by the display form of its keys.
///
/// An entity map stands for a script `Map`; a plain map stands for a script object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostMap {
    entries: IndexMap<String, (HostValue, HostValue)>,
    entity: bool,
}

impl HostMap {
    pub fn new() -> Self {
        HostMap::default()
    }

    pub fn entity() -> Self {
        HostMap {
            entries: IndexMap::new(),
            entity: true,
        }
    }

    pub fn is_entity(&self) -> bool {
        self.entity
    }

    pub fn insert(&mut self, key: impl Into<HostValue>, value: HostValue) -> Option<HostValue> {
        self.insert_entry(key, value).map(|(_, old)| old)
    }

    /// Like `insert`, but hands back the replaced key along with its value.
    pub fn insert_entry(&mut self, key: impl Into<HostValue>, value: HostValue) -> Option<(HostValue, HostValue)> {
        let key = key.into();
        self.entries.insert(key.to_string(), (key, value))
    }

    pub fn get(&self, key: &str) -> Option<&HostValue> {
        self.entries.get(key).map(|(_, v)| v)
    }

    pub fn get_value(&self, key: &HostValue) -> Option<&HostValue> {
        self.get(&key.to_string())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<HostValue> {
        self.remove_entry(key).map(|(_, v)| v)
    }

    pub fn remove_entry(&mut self, key: &str) -> Option<(HostValue, HostValue)> {
        self.entries.shift_remove(key)
    }

    pub fn entry_at(&self, index: usize) -> Option<(&HostValue, &HostValue)> {
        self.entries.get_index(index).map(|(_, (k, v))| (k, v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HostValue, &HostValue)> {
        self.entries.values().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &HostValue> {
        self.entries.values().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &HostValue> {
        self.entries.values().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: Into<HostValue>> FromIterator<(K, HostValue)> for HostMap {
    fn from_iter<I: IntoIterator<Item = (K, HostValue)>>(iter: I) -> Self {
        let mut map = HostMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// Insertion-ordered set of host values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostSet {
    items: Vec<HostValue>,
}

impl HostSet {
    pub fn new() -> Self {
        HostSet::default()
    }

    /// Returns `false` when an equal value was already present.
    pub fn insert(&mut self, value: HostValue) -> bool {
        if self.items.contains(&value) {
            return false;
        }
        self.items.push(value);
        true
    }

    pub fn contains(&self, value: &HostValue) -> bool {
        self.items.contains(value)
    }

    pub fn remove(&mut self, value: &HostValue) -> bool {
        self.take(value).is_some()
    }

    /// Removes and returns the stored value equal to `value`.
    pub fn take(&mut self, value: &HostValue) -> Option<HostValue> {
        let index = self.items.iter().position(|v| v == value)?;
        Some(self.items.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<&HostValue> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostValue> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl FromIterator<HostValue> for HostSet {
    fn from_iter<I: IntoIterator<Item = HostValue>>(iter: I) -> Self {
        let mut set = HostSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

/// A one-shot sequence of host values. The first consumer drains it.
#[derive(Clone)]
pub struct HostStream(Rc<RefCell<Option<Box<dyn Iterator<Item = HostValue>>>>>);

impl HostStream {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = HostValue> + 'static,
    {
        HostStream(Rc::new(RefCell::new(Some(Box::new(iter)))))
    }

    /// Drains the stream. A second call yields `None`.
    pub fn take(&self) -> Option<Vec<HostValue>> {
        self.0.borrow_mut().take().map(|iter| iter.collect())
    }

    pub fn ptr_eq(&self, other: &HostStream) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Machine arrays. Numeric kinds map onto typed views on the engine side.
#[derive(Clone, Debug, PartialEq)]
pub enum HostArray {
    Boolean(Vec<bool>),
    Char(Vec<char>),
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Integer(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
    Object(Vec<HostValue>),
}

impl HostArray {
    pub fn len(&self) -> usize {
        match self {
            HostArray::Boolean(v) => v.len(),
            HostArray::Char(v) => v.len(),
            HostArray::Byte(v) => v.len(),
            HostArray::Short(v) => v.len(),
            HostArray::Integer(v) => v.len(),
            HostArray::Long(v) => v.len(),
            HostArray::Float(v) => v.len(),
            HostArray::Double(v) => v.len(),
            HostArray::String(v) => v.len(),
            HostArray::Object(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element-wise host values.
    pub fn to_values(&self) -> Vec<HostValue> {
        match self {
            HostArray::Boolean(v) => v.iter().map(|&x| HostValue::Boolean(x)).collect(),
            HostArray::Char(v) => v.iter().map(|&x| HostValue::Char(x)).collect(),
            HostArray::Byte(v) => v.iter().map(|&x| HostValue::Byte(x)).collect(),
            HostArray::Short(v) => v.iter().map(|&x| HostValue::Short(x)).collect(),
            HostArray::Integer(v) => v.iter().map(|&x| HostValue::Integer(x)).collect(),
            HostArray::Long(v) => v.iter().map(|&x| HostValue::Long(x)).collect(),
            HostArray::Float(v) => v.iter().map(|&x| HostValue::Float(x)).collect(),
            HostArray::Double(v) => v.iter().map(|&x| HostValue::Double(x)).collect(),
            HostArray::String(v) => v.iter().map(|x| HostValue::String(x.clone())).collect(),
            HostArray::Object(v) => v.clone(),
        }
    }
}

/// Host-side record of a script function.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FunctionEntity {
    pub function_type: FunctionType,
    pub source: Option<String>,
}

impl FunctionEntity {
    pub fn user_defined(source: impl Into<String>) -> Self {
        FunctionEntity {
            function_type: FunctionType::UserDefined,
            source: Some(source.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolEntity {
    pub description: String,
}

impl SymbolEntity {
    pub fn new(description: impl Into<String>) -> Self {
        SymbolEntity {
            description: description.into(),
        }
    }
}

/// How a host object is presented to script code when proxied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProxyMode {
    /// A constructible type descriptor.
    Class,
    /// A callable.
    Function,
    #[default]
    Object,
}

/// An arbitrary host object.
///
/// The property and method methods form the reflection surface used by the universal proxy
/// handler; the defaults describe an object with nothing to reflect.
pub trait HostObject: Any {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn proxy_mode(&self) -> ProxyMode {
        ProxyMode::Object
    }

    fn as_direct_proxy_handler(&self) -> Option<&dyn DirectProxyHandler> {
        None
    }

    fn get_property(&self, _name: &str) -> Option<HostValue> {
        None
    }

    /// Returns `false` when the property does not exist or is read-only.
    fn set_property(&self, _name: &str, _value: HostValue) -> Result<bool, BridgeError> {
        Ok(false)
    }

    fn property_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn invoke(&self, name: &str, _args: Vec<HostValue>) -> Result<HostValue, BridgeError> {
        Err(BridgeError::not_supported(format!("{} has no method '{name}'", self.type_name())))
    }

    fn call(&self, _args: Vec<HostValue>) -> Result<HostValue, BridgeError> {
        Err(BridgeError::not_supported(format!("{} is not callable", self.type_name())))
    }
}

/// A host type descriptor exposed as a constructible proxy.
pub trait HostClass {
    fn name(&self) -> &str;

    fn construct(&self, args: Vec<HostValue>) -> Result<HostValue, BridgeError>;

    fn static_property(&self, _name: &str) -> Option<HostValue> {
        None
    }
}

/// Proxy traps implemented directly by a host object.
///
/// Returning `Ok(None)` falls back to the reflection-based behavior for that trap.
pub trait DirectProxyHandler {
    fn proxy_get(&self, _engine: &dyn Engine, _property: &EngineValue) -> Result<Option<EngineValue>, BridgeError> {
        Ok(None)
    }

    fn proxy_set(&self, _engine: &dyn Engine, _property: &EngineValue, _value: &EngineValue) -> Result<Option<bool>, BridgeError> {
        Ok(None)
    }

    fn proxy_has(&self, _engine: &dyn Engine, _property: &EngineValue) -> Result<Option<bool>, BridgeError> {
        Ok(None)
    }

    fn proxy_delete_property(&self, _engine: &dyn Engine, _property: &EngineValue) -> Result<Option<bool>, BridgeError> {
        Ok(None)
    }

    fn proxy_own_keys(&self, _engine: &dyn Engine) -> Result<Option<Vec<String>>, BridgeError> {
        Ok(None)
    }

    fn proxy_apply(&self, _engine: &dyn Engine, _this: &EngineValue, _args: &[EngineValue]) -> Result<Option<EngineValue>, BridgeError> {
        Ok(None)
    }

    fn proxy_construct(&self, _engine: &dyn Engine, _args: &[EngineValue]) -> Result<Option<EngineValue>, BridgeError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_keeps_insertion_order_and_non_string_keys() {
        let mut map = HostMap::new();
        map.insert("b", HostValue::Integer(1));
        map.insert(HostValue::Integer(7), HostValue::from("seven"));
        map.insert("a", HostValue::Integer(2));
        let keys: Vec<String> = map.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "7", "a"]);
        assert_eq!(map.get("7"), Some(&HostValue::from("seven")));
        assert_eq!(map.remove("b"), Some(HostValue::Integer(1)));
        assert_eq!(map.entry_at(0).map(|(k, _)| k.clone()), Some(HostValue::Integer(7)));
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let mut set = HostSet::new();
        assert!(set.insert(HostValue::from("x")));
        assert!(!set.insert(HostValue::from("x")));
        assert!(set.insert(HostValue::Integer(1)));
        assert_eq!(set.len(), 2);
        assert!(set.remove(&HostValue::from("x")));
        assert!(!set.contains(&HostValue::from("x")));
    }

    #[test]
    fn test_json_round_trip() {
        let value = HostValue::from_json_str(r#"{"x":1,"y":"2","z":[true,null,1.5]}"#).unwrap();
        let HostValue::Map(map) = &value else {
            panic!("expected a map, got {value:?}");
        };
        assert!(!map.borrow().is_entity());
        assert_eq!(map.borrow().get("x"), Some(&HostValue::Integer(1)));
        let json = value.to_json().unwrap();
        assert_eq!(json.to_string(), r#"{"x":1,"y":"2","z":[true,null,1.5]}"#);
    }

    #[test]
    fn test_display_matches_script_conventions() {
        assert_eq!(HostValue::Double(3.0).to_string(), "3");
        assert_eq!(HostValue::Double(0.5).to_string(), "0.5");
        assert_eq!(HostValue::list(vec![1.into(), "a".into()]).to_string(), "1,a");
        assert_eq!(HostValue::set(HostSet::new()).to_string(), "[object Set]");
        assert_eq!(HostValue::map(HostMap::entity()).to_string(), "[object Map]");
    }

    #[test]
    fn test_stream_is_one_shot() {
        let stream = HostStream::new(vec![HostValue::Integer(1), HostValue::Integer(2)].into_iter());
        assert_eq!(stream.take().map(|v| v.len()), Some(2));
        assert!(stream.take().is_none());
    }

    #[test]
    fn test_self_containing_collections_format_and_compare() {
        let a = HostValue::list(vec![1.into()]);
        let b = HostValue::list(vec![1.into()]);
        for value in [&a, &b] {
            if let HostValue::List(items) = value {
                items.borrow_mut().push(value.clone());
            }
        }
        assert_eq!(a.to_string(), "1,");
        assert!(format!("{a:?}").contains("List([...])"));
        assert_eq!(a, b);
        let maps: Vec<HostValue> = (0..2)
            .map(|_| {
                let value = HostValue::map(HostMap::entity());
                if let HostValue::Map(inner) = &value {
                    inner.borrow_mut().insert("k", HostValue::Integer(1));
                    inner.borrow_mut().insert("self", value.clone());
                }
                value
            })
            .collect();
        assert!(format!("{:?}", maps[0]).contains("Map([...])"));
        assert_eq!(maps[0], maps[1]);
        // Break the cycles so the test does not leak.
        for value in [&a, &b] {
            if let HostValue::List(items) = value {
                items.borrow_mut().clear();
            }
        }
        for value in &maps {
            if let HostValue::Map(inner) = value {
                inner.borrow_mut().clear();
            }
        }
    }

    #[test]
    fn test_deep_nesting_stops_at_limit() {
        let nested = || {
            let mut value = HostValue::Integer(0);
            for _ in 0..(MAX_NESTING + 10) {
                value = HostValue::list(vec![value]);
            }
            value
        };
        let value = nested();
        assert_eq!(value.to_string(), "");
        assert!(format!("{value:?}").contains("List([...])"));
        assert_ne!(value, nested());
    }

    #[test]
    fn test_shared_collections_compare_by_content() {
        let a = HostValue::list(vec![1.into()]);
        let b = HostValue::list(vec![1.into()]);
        assert_eq!(a, b);
        assert_ne!(a, HostValue::list(vec![2.into()]));
    }
}
