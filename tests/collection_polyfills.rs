use jsbridge::core::ReferenceKind;
use jsbridge::host::shared;
use jsbridge::{BridgeConverter, BridgeError, CallbackContext, Converter, Engine, EngineValue, HostMap, HostSet, HostValue, MemoryEngine, create_proxy};
use std::rc::Rc;

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
// Using `ctor` ensures initialization runs before tests start.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

fn bridge_engine() -> MemoryEngine {
    MemoryEngine::with_converter(Rc::new(BridgeConverter::new()))
}

fn invoke(engine: &MemoryEngine, proxy: &EngineValue, method: &str, args: &[EngineValue]) -> EngineValue {
    let function = engine.get_named(proxy, method).unwrap();
    let result = engine.call(&function, proxy, args).unwrap();
    engine.release(&function).unwrap();
    result
}

fn drain(engine: &MemoryEngine, iterator: &EngineValue) -> Vec<HostValue> {
    let next = engine.get_named(iterator, "next").unwrap();
    let mut values = Vec::new();
    loop {
        let step = engine.call(&next, iterator, &[]).unwrap();
        let done = engine.get_named(&step, "done").unwrap();
        let value = engine.get_named(&step, "value").unwrap();
        engine.release(&step).unwrap();
        if done.is_truthy() {
            break;
        }
        values.push(engine.converter().to_host_and_release(engine, value).unwrap());
    }
    engine.release(&next).unwrap();
    values
}

fn set_fixture() -> (MemoryEngine, HostValue, EngineValue) {
    let engine = bridge_engine();
    let set: HostSet = ["a", "b"].into_iter().map(HostValue::from).collect();
    let host = HostValue::set(set);
    let proxy = create_proxy(&engine, &host).unwrap();
    (engine, host, proxy)
}

#[test]
fn test_set_membership() {
    let (engine, host, proxy) = set_fixture();
    assert_eq!(engine.get_named(&proxy, "size").unwrap(), EngineValue::Integer(2));
    assert_eq!(invoke(&engine, &proxy, "has", &["a".into()]), EngineValue::Boolean(true));
    assert_eq!(invoke(&engine, &proxy, "has", &["z".into()]), EngineValue::Boolean(false));

    let returned = invoke(&engine, &proxy, "add", &["c".into()]);
    assert_eq!(engine.reference_kind(&returned).unwrap(), ReferenceKind::Proxy);
    engine.release(&returned).unwrap();
    let returned = invoke(&engine, &proxy, "add", &["a".into()]);
    engine.release(&returned).unwrap();
    assert_eq!(engine.get_named(&proxy, "size").unwrap(), EngineValue::Integer(3));

    assert_eq!(invoke(&engine, &proxy, "delete", &["b".into()]), EngineValue::Boolean(true));
    assert_eq!(invoke(&engine, &proxy, "delete", &["b".into()]), EngineValue::Boolean(false));
    let HostValue::Set(set) = &host else { unreachable!() };
    assert_eq!(set.borrow().iter().cloned().collect::<Vec<_>>(), vec![HostValue::from("a"), HostValue::from("c")]);

    assert_eq!(invoke(&engine, &proxy, "clear", &[]), EngineValue::Undefined);
    assert!(set.borrow().is_empty());
    engine.release(&proxy).unwrap();
}

#[test]
fn test_set_string_forms() {
    let (engine, _, proxy) = set_fixture();
    assert_eq!(invoke(&engine, &proxy, "toString", &[]), EngineValue::from("[object Set]"));
    let json = invoke(&engine, &proxy, "toJSON", &[]);
    assert_eq!(engine.reference_kind(&json).unwrap(), ReferenceKind::Object);
    assert!(engine.own_keys(&json).unwrap().is_empty());
    engine.release(&json).unwrap();

    let constructor = engine.get_named(&proxy, "constructor").unwrap();
    assert_eq!(engine.get_named(&constructor, "name").unwrap(), EngineValue::from("Set"));
    engine.release(&constructor).unwrap();
}

#[test]
fn test_set_iteration() {
    let (engine, _, proxy) = set_fixture();
    let values = invoke(&engine, &proxy, "values", &[]);
    assert_eq!(drain(&engine, &values), vec![HostValue::from("a"), HostValue::from("b")]);
    engine.release(&values).unwrap();

    let keys = invoke(&engine, &proxy, "keys", &[]);
    assert_eq!(drain(&engine, &keys), vec![HostValue::from("a"), HostValue::from("b")]);
    engine.release(&keys).unwrap();

    let entries = invoke(&engine, &proxy, "entries", &[]);
    assert_eq!(
        drain(&engine, &entries),
        vec![
            HostValue::list(vec!["a".into(), "a".into()]),
            HostValue::list(vec!["b".into(), "b".into()]),
        ]
    );
    engine.release(&entries).unwrap();
}

#[test]
fn test_set_for_each_passes_value_twice() {
    let (engine, _, proxy) = set_fixture();
    let seen = shared(Vec::new());
    let record = seen.clone();
    let (visitor, _) = engine
        .create_function(CallbackContext::new(
            "visitor",
            Rc::new(move |_: &dyn Engine, _: &EngineValue, args: &[EngineValue]| -> Result<EngineValue, BridgeError> {
                record.borrow_mut().push((args[0].clone(), args[1].clone()));
                Ok(EngineValue::Undefined)
            }),
        ))
        .unwrap();
    assert_eq!(invoke(&engine, &proxy, "forEach", &[visitor.clone()]), EngineValue::Undefined);
    let expected: Vec<(EngineValue, EngineValue)> = vec![("a".into(), "a".into()), ("b".into(), "b".into())];
    assert_eq!(*seen.borrow(), expected);
    engine.release(&visitor).unwrap();
}

fn map_fixture() -> (MemoryEngine, HostValue, EngineValue) {
    let engine = bridge_engine();
    let mut map = HostMap::entity();
    map.insert("one", HostValue::Integer(1));
    map.insert("two", HostValue::Integer(2));
    let host = HostValue::map(map);
    let proxy = create_proxy(&engine, &host).unwrap();
    (engine, host, proxy)
}

#[test]
fn test_map_accessors() {
    let (engine, host, proxy) = map_fixture();
    assert_eq!(engine.get_named(&proxy, "size").unwrap(), EngineValue::Integer(2));
    assert_eq!(invoke(&engine, &proxy, "get", &["one".into()]), EngineValue::Integer(1));
    assert_eq!(invoke(&engine, &proxy, "get", &["three".into()]), EngineValue::Undefined);
    assert_eq!(invoke(&engine, &proxy, "has", &["two".into()]), EngineValue::Boolean(true));

    let returned = invoke(&engine, &proxy, "set", &["three".into(), EngineValue::Integer(3)]);
    assert_eq!(engine.reference_kind(&returned).unwrap(), ReferenceKind::Proxy);
    engine.release(&returned).unwrap();
    let HostValue::Map(map) = &host else { unreachable!() };
    assert_eq!(map.borrow().get("three"), Some(&HostValue::Integer(3)));

    assert_eq!(invoke(&engine, &proxy, "delete", &["one".into()]), EngineValue::Boolean(true));
    assert_eq!(invoke(&engine, &proxy, "delete", &["one".into()]), EngineValue::Boolean(false));
    assert_eq!(engine.get_named(&proxy, "size").unwrap(), EngineValue::Integer(2));
    assert_eq!(invoke(&engine, &proxy, "clear", &[]), EngineValue::Undefined);
    assert!(map.borrow().is_empty());
    engine.release(&proxy).unwrap();
}

#[test]
fn test_map_keys_match_by_display_form() {
    let engine = bridge_engine();
    let mut map = HostMap::entity();
    map.insert(HostValue::Integer(1), HostValue::from("first"));
    let proxy = create_proxy(&engine, &HostValue::map(map)).unwrap();
    assert_eq!(invoke(&engine, &proxy, "get", &[EngineValue::Integer(1)]), EngineValue::from("first"));
    assert_eq!(invoke(&engine, &proxy, "get", &["1".into()]), EngineValue::from("first"));
    engine.release(&proxy).unwrap();
}

#[test]
fn test_map_iteration() {
    let (engine, _, proxy) = map_fixture();
    let keys = invoke(&engine, &proxy, "keys", &[]);
    assert_eq!(drain(&engine, &keys), vec![HostValue::from("one"), HostValue::from("two")]);
    engine.release(&keys).unwrap();

    let values = invoke(&engine, &proxy, "values", &[]);
    assert_eq!(drain(&engine, &values), vec![HostValue::Integer(1), HostValue::Integer(2)]);
    engine.release(&values).unwrap();

    let symbol = engine.well_known_symbol("Symbol.iterator").unwrap();
    let entries = engine.get_property(&proxy, &symbol).unwrap();
    let iterator = engine.call(&entries, &proxy, &[]).unwrap();
    assert_eq!(
        drain(&engine, &iterator),
        vec![
            HostValue::list(vec!["one".into(), 1.into()]),
            HostValue::list(vec!["two".into(), 2.into()]),
        ]
    );
    for value in [symbol, entries, iterator] {
        engine.release(&value).unwrap();
    }
}

#[test]
fn test_map_for_each_passes_value_then_key() {
    let (engine, _, proxy) = map_fixture();
    let seen = shared(Vec::new());
    let record = seen.clone();
    let (visitor, _) = engine
        .create_function(CallbackContext::new(
            "visitor",
            Rc::new(move |_: &dyn Engine, _: &EngineValue, args: &[EngineValue]| -> Result<EngineValue, BridgeError> {
                record.borrow_mut().push((args[0].clone(), args[1].clone()));
                Ok(EngineValue::Undefined)
            }),
        ))
        .unwrap();
    invoke(&engine, &proxy, "forEach", &[visitor.clone()]);
    assert_eq!(
        *seen.borrow(),
        vec![(EngineValue::Integer(1), "one".into()), (EngineValue::Integer(2), "two".into())]
    );
    engine.release(&visitor).unwrap();
}

#[test]
fn test_map_to_json_is_plain_object() {
    let (engine, _, proxy) = map_fixture();
    let json = invoke(&engine, &proxy, "toJSON", &[]);
    assert_eq!(engine.reference_kind(&json).unwrap(), ReferenceKind::Object);
    assert_eq!(engine.get_named(&json, "one").unwrap(), EngineValue::Integer(1));
    assert_eq!(engine.get_named(&json, "two").unwrap(), EngineValue::Integer(2));
    engine.release(&json).unwrap();
}

#[test]
fn test_map_own_entries_shadow_polyfills() {
    let engine = bridge_engine();
    let mut map = HostMap::entity();
    map.insert("size", HostValue::from("large"));
    let proxy = create_proxy(&engine, &HostValue::map(map)).unwrap();
    assert_eq!(engine.get_named(&proxy, "size").unwrap(), EngineValue::from("large"));
    engine.release(&proxy).unwrap();
}

#[test]
fn test_primitive_proxy_unwraps() {
    let engine = bridge_engine();
    let proxy = create_proxy(&engine, &HostValue::Integer(42)).unwrap();
    assert_eq!(invoke(&engine, &proxy, "valueOf", &[]), EngineValue::Integer(42));
    assert_eq!(invoke(&engine, &proxy, "toJSON", &[]), EngineValue::Integer(42));
    assert_eq!(invoke(&engine, &proxy, "toString", &[]), EngineValue::from("42"));

    let symbol = engine.well_known_symbol("Symbol.toPrimitive").unwrap();
    let to_primitive = engine.get_property(&proxy, &symbol).unwrap();
    assert_eq!(engine.call(&to_primitive, &proxy, &[]).unwrap(), EngineValue::Integer(42));
    assert_eq!(engine.get_named(&proxy, "missing").unwrap(), EngineValue::Undefined);
    for value in [symbol, to_primitive, proxy] {
        engine.release(&value).unwrap();
    }
}

#[test]
fn test_object_constructor_fallback() {
    let engine = bridge_engine();
    let proxy = create_proxy(&engine, &HostValue::from("text")).unwrap();
    let constructor = engine.get_named(&proxy, "constructor").unwrap();
    assert_eq!(engine.get_named(&constructor, "name").unwrap(), EngineValue::from("Object"));
    for value in [constructor, proxy] {
        engine.release(&value).unwrap();
    }
}

#[test]
fn test_collection_entries_release_passthrough_handles() {
    let engine = bridge_engine();
    let map = HostValue::map(HostMap::entity());
    let map_proxy = create_proxy(&engine, &map).unwrap();
    let set = HostValue::set(HostSet::new());
    let set_proxy = create_proxy(&engine, &set).unwrap();
    let weak = engine.create_weak_map().unwrap();
    let base = engine.live_handles();

    for _ in 0..2 {
        let returned = invoke(&engine, &map_proxy, "set", &["k".into(), weak.clone()]);
        engine.release(&returned).unwrap();
    }
    assert_eq!(engine.live_handles(), base + 1);
    assert_eq!(invoke(&engine, &map_proxy, "has", &[weak.clone()]), EngineValue::Boolean(false));
    assert_eq!(invoke(&engine, &map_proxy, "delete", &["k".into()]), EngineValue::Boolean(true));
    assert_eq!(engine.live_handles(), base);
    assert!(engine.set_named(&map_proxy, "x", &weak).unwrap());
    assert_eq!(invoke(&engine, &map_proxy, "clear", &[]), EngineValue::Undefined);
    assert_eq!(engine.live_handles(), base);

    let returned = invoke(&engine, &set_proxy, "add", &[weak.clone()]);
    engine.release(&returned).unwrap();
    assert_eq!(engine.live_handles(), base + 1);
    assert_eq!(invoke(&engine, &set_proxy, "has", &[weak.clone()]), EngineValue::Boolean(false));
    assert_eq!(invoke(&engine, &set_proxy, "clear", &[]), EngineValue::Undefined);
    assert_eq!(engine.live_handles(), base);
    let HostValue::Set(set) = &set else { unreachable!() };
    assert!(set.borrow().is_empty());

    for value in [weak, map_proxy, set_proxy] {
        engine.release(&value).unwrap();
    }
}
