use jsbridge::core::ReferenceKind;
use jsbridge::{
    BridgeError, Converter, ConverterConfig, DirectProxyHandler, Engine, EngineValue, ErrorKind, HostClass, HostMap, HostObject, HostValue,
    MemoryEngine, ProxyConverter, ProxyMode,
};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
// Using `ctor` ensures initialization runs before tests start.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

fn proxy_engine(config: ConverterConfig) -> (MemoryEngine, Rc<ProxyConverter>) {
    let converter = Rc::new(ProxyConverter::with_config(config));
    let engine = MemoryEngine::with_converter(converter.clone());
    (engine, converter)
}

fn map_proxy_config() -> ConverterConfig {
    let mut config = ConverterConfig::default();
    config.set_proxy_map_enabled(true);
    config
}

/// A host object with a reflection surface: one field and a `greet` method.
#[derive(Default)]
struct Person {
    name: RefCell<String>,
}

impl HostObject for Person {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_property(&self, name: &str) -> Option<HostValue> {
        (name == "name").then(|| HostValue::from(self.name.borrow().as_str()))
    }

    fn set_property(&self, name: &str, value: HostValue) -> Result<bool, BridgeError> {
        if name != "name" {
            return Ok(false);
        }
        *self.name.borrow_mut() = value.to_string();
        Ok(true)
    }

    fn property_names(&self) -> Vec<String> {
        vec!["name".to_string()]
    }

    fn has_method(&self, name: &str) -> bool {
        name == "greet"
    }

    fn invoke(&self, name: &str, args: Vec<HostValue>) -> Result<HostValue, BridgeError> {
        match name {
            "greet" => Ok(HostValue::String(format!("{}, {}", args.first().map(|a| a.to_string()).unwrap_or_default(), self.name.borrow()))),
            other => Err(BridgeError::not_supported(format!("no method {other}"))),
        }
    }
}

struct Adder;

impl HostObject for Adder {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn proxy_mode(&self) -> ProxyMode {
        ProxyMode::Function
    }

    fn call(&self, args: Vec<HostValue>) -> Result<HostValue, BridgeError> {
        let sum: f64 = args.iter().filter_map(HostValue::as_f64).sum();
        Ok(HostValue::Double(sum))
    }
}

struct PersonClass;

impl HostClass for PersonClass {
    fn name(&self) -> &str {
        "Person"
    }

    fn construct(&self, args: Vec<HostValue>) -> Result<HostValue, BridgeError> {
        let person = Person::default();
        if let Some(name) = args.first() {
            *person.name.borrow_mut() = name.to_string();
        }
        Ok(HostValue::object(person))
    }

    fn static_property(&self, name: &str) -> Option<HostValue> {
        (name == "species").then(|| HostValue::from("human"))
    }
}

/// Answers `answer` itself and leaves everything else to reflection.
#[derive(Default)]
struct Oracle {
    name: RefCell<String>,
}

impl HostObject for Oracle {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_direct_proxy_handler(&self) -> Option<&dyn DirectProxyHandler> {
        Some(self)
    }

    fn get_property(&self, name: &str) -> Option<HostValue> {
        (name == "name").then(|| HostValue::from(self.name.borrow().as_str()))
    }
}

impl DirectProxyHandler for Oracle {
    fn proxy_get(&self, _engine: &dyn Engine, property: &EngineValue) -> Result<Option<EngineValue>, BridgeError> {
        Ok((property.as_str() == Some("answer")).then_some(EngineValue::Integer(42)))
    }

    fn proxy_own_keys(&self, _engine: &dyn Engine) -> Result<Option<Vec<String>>, BridgeError> {
        Ok(Some(vec!["answer".to_string(), "name".to_string()]))
    }
}

#[test]
fn test_map_is_proxied_when_enabled() {
    let (engine, converter) = proxy_engine(map_proxy_config());
    let mut map = HostMap::new();
    map.insert("x", HostValue::Integer(1));
    map.insert("y", HostValue::from("2"));
    let value = HostValue::map(map);
    let HostValue::Map(backing) = &value else { unreachable!() };

    let proxy = converter.to_engine(&engine, &value).unwrap();
    assert_eq!(engine.reference_kind(&proxy).unwrap(), ReferenceKind::Proxy);
    assert_eq!(engine.get_named(&proxy, "x").unwrap(), EngineValue::Integer(1));
    assert_eq!(engine.get_named(&proxy, "y").unwrap(), EngineValue::from("2"));
    assert!(engine.has_property(&proxy, &EngineValue::from("x")).unwrap());

    assert!(engine.set_named(&proxy, "z", &EngineValue::Integer(3)).unwrap());
    assert_eq!(backing.borrow().get("z"), Some(&HostValue::Integer(3)));

    assert!(engine.delete_property(&proxy, &EngineValue::from("x")).unwrap());
    assert!(!backing.borrow().contains_key("x"));
    let keys: Vec<EngineValue> = engine.own_keys(&proxy).unwrap();
    assert_eq!(keys, vec![EngineValue::from("y"), EngineValue::from("z")]);
    engine.release(&proxy).unwrap();
}

#[test]
fn test_map_is_structural_when_disabled() {
    let (engine, converter) = proxy_engine(ConverterConfig::default());
    let mut map = HostMap::new();
    map.insert("x", HostValue::Integer(1));
    let object = converter.to_engine(&engine, &HostValue::map(map)).unwrap();
    assert_eq!(engine.reference_kind(&object).unwrap(), ReferenceKind::Object);
    engine.release(&object).unwrap();
}

#[test]
fn test_unwrap_returns_the_same_instance() {
    let (engine, converter) = proxy_engine(ConverterConfig::default());
    let person: Rc<dyn HostObject> = Rc::new(Person::default());
    let proxy = converter.to_engine(&engine, &HostValue::Object(person.clone())).unwrap();
    assert_eq!(engine.reference_kind(&proxy).unwrap(), ReferenceKind::Proxy);
    let back = converter.to_host_and_release(&engine, proxy).unwrap();
    let HostValue::Object(back) = back else {
        panic!("expected the host object back, got {back:?}");
    };
    assert!(Rc::ptr_eq(&back, &person));
}

#[test]
fn test_unwrap_map_proxy_keeps_backing_storage() {
    let (engine, converter) = proxy_engine(map_proxy_config());
    let value = HostValue::map(HostMap::new());
    let proxy = converter.to_engine(&engine, &value).unwrap();
    let back = converter.to_host_and_release(&engine, proxy).unwrap();
    match (&back, &value) {
        (HostValue::Map(a), HostValue::Map(b)) => assert!(Rc::ptr_eq(a, b)),
        _ => panic!("expected a map back, got {back:?}"),
    }
}

#[test]
fn test_reflection_properties_and_methods() {
    let (engine, converter) = proxy_engine(ConverterConfig::default());
    let person = Rc::new(Person::default());
    *person.name.borrow_mut() = "Ada".to_string();
    let proxy = converter.to_engine(&engine, &HostValue::Object(person.clone())).unwrap();

    assert_eq!(engine.get_named(&proxy, "name").unwrap(), EngineValue::from("Ada"));
    assert!(engine.set_named(&proxy, "name", &EngineValue::from("Grace")).unwrap());
    assert_eq!(*person.name.borrow(), "Grace");
    assert!(!engine.set_named(&proxy, "age", &EngineValue::Integer(3)).unwrap());

    let greet = engine.get_named(&proxy, "greet").unwrap();
    assert!(engine.is_callable(&greet));
    let greeting = engine.call(&greet, &proxy, &[EngineValue::from("Hello")]).unwrap();
    assert_eq!(greeting, EngineValue::from("Hello, Grace"));
    assert!(engine.has_property(&proxy, &EngineValue::from("greet")).unwrap());
    assert!(!engine.has_property(&proxy, &EngineValue::from("missing")).unwrap());
    assert_eq!(engine.get_named(&proxy, "missing").unwrap(), EngineValue::Undefined);

    let constructor = engine.get_named(&proxy, "constructor").unwrap();
    assert_eq!(engine.get_named(&constructor, "name").unwrap(), EngineValue::from("Object"));
    for value in [greet, constructor, proxy] {
        engine.release(&value).unwrap();
    }
}

#[test]
fn test_function_mode_object_is_callable() {
    let (engine, converter) = proxy_engine(ConverterConfig::default());
    let proxy = converter.to_engine(&engine, &HostValue::object(Adder)).unwrap();
    assert!(engine.is_callable(&proxy));
    let sum = engine
        .call(&proxy, &EngineValue::Undefined, &[EngineValue::Integer(1), EngineValue::Double(2.5)])
        .unwrap();
    assert_eq!(sum, EngineValue::Double(3.5));
    engine.release(&proxy).unwrap();
}

#[test]
fn test_object_mode_proxy_is_not_callable() {
    let (engine, converter) = proxy_engine(ConverterConfig::default());
    let proxy = converter.to_engine(&engine, &HostValue::object(Person::default())).unwrap();
    assert!(!engine.is_callable(&proxy));
    engine.release(&proxy).unwrap();
}

#[test]
fn test_class_proxy_constructs_instances() {
    let (engine, converter) = proxy_engine(ConverterConfig::default());
    let class = HostValue::Class(Rc::new(PersonClass));
    let proxy = converter.to_engine(&engine, &class).unwrap();
    assert_eq!(engine.get_named(&proxy, "name").unwrap(), EngineValue::from("Person"));
    assert_eq!(engine.get_named(&proxy, "species").unwrap(), EngineValue::from("human"));

    let instance = engine.construct(&proxy, &[EngineValue::from("Lin")]).unwrap();
    assert_eq!(engine.get_named(&instance, "name").unwrap(), EngineValue::from("Lin"));
    let HostValue::Object(object) = converter.to_host(&engine, &instance).unwrap() else {
        panic!("expected the constructed host object");
    };
    assert_eq!(*object.as_any().downcast_ref::<Person>().unwrap().name.borrow(), "Lin");

    let err = engine.call(&proxy, &EngineValue::Undefined, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    engine.release(&instance).unwrap();
    engine.release(&proxy).unwrap();
}

#[test]
fn test_direct_handler_wins_over_reflection() {
    let (engine, converter) = proxy_engine(ConverterConfig::default());
    let oracle = Oracle::default();
    *oracle.name.borrow_mut() = "delphi".to_string();
    let proxy = converter.to_engine(&engine, &HostValue::object(oracle)).unwrap();
    assert_eq!(engine.get_named(&proxy, "answer").unwrap(), EngineValue::Integer(42));
    assert_eq!(engine.get_named(&proxy, "name").unwrap(), EngineValue::from("delphi"));
    assert_eq!(
        engine.own_keys(&proxy).unwrap(),
        vec![EngineValue::from("answer"), EngineValue::from("name")]
    );
    engine.release(&proxy).unwrap();
}

#[test]
fn test_to_proxy_forces_a_proxy() {
    let (engine, converter) = proxy_engine(ConverterConfig::default());
    let proxy = converter.to_proxy(&engine, &HostValue::list(vec![HostValue::Integer(1)])).unwrap();
    assert_eq!(engine.reference_kind(&proxy).unwrap(), ReferenceKind::Proxy);
    assert_eq!(engine.array_length(&proxy).unwrap(), 1);
    engine.release(&proxy).unwrap();
}

#[test]
fn test_proxy_creation_leaves_only_the_proxy_handle() {
    let (engine, converter) = proxy_engine(map_proxy_config());
    let before = engine.live_handles();
    let proxy = converter.to_engine(&engine, &HostValue::map(HostMap::new())).unwrap();
    assert_eq!(engine.live_handles(), before + 1);
    engine.release(&proxy).unwrap();
    assert_eq!(engine.live_handles(), before);
}
