use jsbridge::core::ReferenceKind;
use jsbridge::{BridgeConverter, Converter, ConverterConfig, Engine, EngineValue, HostArray, HostMap, HostSet, HostValue, MemoryEngine};
use std::rc::Rc;

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
// Using `ctor` ensures initialization runs before tests start.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

fn bridge_engine() -> (MemoryEngine, Rc<BridgeConverter>) {
    let converter = Rc::new(BridgeConverter::new());
    let engine = MemoryEngine::with_converter(converter.clone());
    (engine, converter)
}

#[test]
fn test_default_enables_every_proxy_flag() {
    let converter = BridgeConverter::new();
    assert!(converter.config().proxy_map_enabled());
    assert!(converter.config().proxy_set_enabled());
    assert!(converter.config().proxy_list_enabled());

    let plain = BridgeConverter::with_config(ConverterConfig::default());
    assert!(!plain.config().proxy_list_enabled());
}

#[test]
fn test_collections_become_proxies() {
    let (engine, converter) = bridge_engine();
    let values = [
        HostValue::list(vec![HostValue::Integer(1)]),
        HostValue::set(HostSet::new()),
        HostValue::map(HostMap::new()),
    ];
    for value in &values {
        let proxy = converter.to_engine(&engine, value).unwrap();
        assert_eq!(engine.reference_kind(&proxy).unwrap(), ReferenceKind::Proxy);
        assert_eq!(&converter.to_host_and_release(&engine, proxy).unwrap(), value);
    }
    assert_eq!(engine.live_handles(), 0);
}

#[test]
fn test_machine_arrays_are_marshaled_element_wise() {
    let (engine, converter) = bridge_engine();
    let array = converter
        .to_engine(&engine, &HostValue::Array(HostArray::Integer(vec![4, 5, 6])))
        .unwrap();
    assert_eq!(engine.reference_kind(&array).unwrap(), ReferenceKind::Array);
    assert_eq!(engine.array_length(&array).unwrap(), 3);
    assert_eq!(engine.array_get(&array, 2).unwrap(), EngineValue::Integer(6));
    let back = converter.to_host_and_release(&engine, array).unwrap();
    assert_eq!(back, HostValue::list(vec![4.into(), 5.into(), 6.into()]));
}

#[test]
fn test_nested_lists_are_proxied_lazily() {
    let (engine, converter) = bridge_engine();
    let inner = HostValue::list(vec![HostValue::from("deep")]);
    let outer = HostValue::list(vec![inner.clone()]);
    let proxy = converter.to_engine(&engine, &outer).unwrap();
    let first = engine.array_get(&proxy, 0).unwrap();
    assert_eq!(engine.reference_kind(&first).unwrap(), ReferenceKind::Proxy);
    assert_eq!(engine.array_get(&first, 0).unwrap(), EngineValue::from("deep"));

    if let HostValue::List(items) = &inner {
        items.borrow_mut().push(HostValue::from("later"));
    }
    assert_eq!(engine.array_length(&first).unwrap(), 2);
    engine.release(&first).unwrap();
    engine.release(&proxy).unwrap();
}

#[test]
fn test_scalars_stay_scalars() {
    let (engine, converter) = bridge_engine();
    assert_eq!(converter.to_engine(&engine, &HostValue::Integer(9)).unwrap(), EngineValue::Integer(9));
    assert_eq!(converter.to_host(&engine, &EngineValue::from("s")).unwrap(), HostValue::from("s"));
}

#[test]
fn test_engine_collections_convert_structurally() {
    let (engine, converter) = bridge_engine();
    let array = engine.create_array().unwrap();
    engine.array_push(&array, &EngineValue::Integer(1)).unwrap();
    let back = converter.to_host_and_release(&engine, array).unwrap();
    assert_eq!(back, HostValue::list(vec![1.into()]));
}
