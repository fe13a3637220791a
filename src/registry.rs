use crate::error::BridgeError;
use crate::host::{HostMap, HostObject};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A host type that can be rebuilt from, and snapshotted into, a plain map.
pub trait CustomObject: HostObject + Default {
    fn from_map(&mut self, map: &HostMap) -> Result<(), BridgeError>;

    fn to_map(&self) -> HostMap;
}

type CreateFn = Box<dyn Fn(&HostMap) -> Result<Rc<dyn HostObject>, BridgeError> + Send + Sync>;
type SnapshotFn = Box<dyn Fn(&dyn HostObject) -> Option<HostMap> + Send + Sync>;

struct Registration {
    name: String,
    create: CreateFn,
    snapshot: SnapshotFn,
}

#[derive(Default)]
struct RegistryTables {
    by_type: HashMap<TypeId, Arc<Registration>>,
    by_name: HashMap<String, Arc<Registration>>,
}

/// Registered custom object types, keyed by host type and by type name.
///
/// The name travels with a converted object as a private marker so that the engine-to-host
/// direction can rebuild the original type.
#[derive(Default)]
pub struct CustomObjectRegistry {
    tables: RwLock<RegistryTables>,
}

impl CustomObjectRegistry {
    pub fn new() -> Self {
        CustomObjectRegistry::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryTables> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryTables> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `T` through its [`CustomObject`] implementation.
    ///
    /// Returns `false` when `T` is already registered.
    pub fn register<T: CustomObject>(&self) -> bool {
        self.register_with::<T>(T::default, T::from_map, T::to_map)
    }

    /// Registers `T` with an explicit constructor, populate method and snapshot method.
    pub fn register_with<T: HostObject>(
        &self,
        construct: fn() -> T,
        populate: fn(&mut T, &HostMap) -> Result<(), BridgeError>,
        snapshot: fn(&T) -> HostMap,
    ) -> bool {
        let name = std::any::type_name::<T>().to_string();
        let mut tables = self.write();
        if tables.by_type.contains_key(&TypeId::of::<T>()) || tables.by_name.contains_key(&name) {
            log::debug!("custom object {name} is already registered");
            return false;
        }
        let registration = Arc::new(Registration {
            name: name.clone(),
            create: Box::new(move |map| {
                let mut object = construct();
                populate(&mut object, map)?;
                Ok(Rc::new(object) as Rc<dyn HostObject>)
            }),
            snapshot: Box::new(move |object| object.as_any().downcast_ref::<T>().map(snapshot)),
        });
        tables.by_type.insert(TypeId::of::<T>(), registration.clone());
        tables.by_name.insert(name.clone(), registration);
        log::debug!("registered custom object {name}");
        true
    }

    /// Returns `false` when `T` was not registered.
    pub fn unregister<T: HostObject>(&self) -> bool {
        let mut tables = self.write();
        match tables.by_type.remove(&TypeId::of::<T>()) {
            Some(registration) => {
                tables.by_name.remove(&registration.name);
                log::debug!("unregistered custom object {}", registration.name);
                true
            }
            None => false,
        }
    }

    pub fn is_registered<T: HostObject>(&self) -> bool {
        self.read().by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.read().by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_type.is_empty()
    }

    pub fn clear(&self) {
        let mut tables = self.write();
        tables.by_type.clear();
        tables.by_name.clear();
    }

    /// The registered name of `object`'s concrete type.
    pub fn name_of(&self, object: &dyn HostObject) -> Option<String> {
        let type_id = Any::type_id(object.as_any());
        self.read().by_type.get(&type_id).map(|r| r.name.clone())
    }

    /// Constructs the type registered as `name` and populates it from `map`.
    pub fn create(&self, name: &str, map: &HostMap) -> Result<Rc<dyn HostObject>, BridgeError> {
        let registration = self.read().by_name.get(name).cloned();
        match registration {
            Some(registration) => (registration.create)(map),
            None => Err(BridgeError::converter(format!("custom object {name} is not registered"))),
        }
    }

    /// The registered name and a map snapshot of `object`, if its type is registered.
    pub fn snapshot(&self, object: &dyn HostObject) -> Option<(String, HostMap)> {
        let type_id = Any::type_id(object.as_any());
        let registration = self.read().by_type.get(&type_id).cloned()?;
        (registration.snapshot)(object).map(|map| (registration.name.clone(), map))
    }
}

impl fmt::Debug for CustomObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.read();
        let mut names: Vec<&String> = tables.by_name.keys().collect();
        names.sort();
        f.debug_struct("CustomObjectRegistry").field("types", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostValue;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Point {
        x: RefCell<i32>,
    }

    impl HostObject for Point {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl CustomObject for Point {
        fn from_map(&mut self, map: &HostMap) -> Result<(), BridgeError> {
            match map.get("x") {
                Some(HostValue::Integer(x)) => {
                    *self.x.borrow_mut() = *x;
                    Ok(())
                }
                other => Err(BridgeError::converter(format!("bad x: {other:?}"))),
            }
        }

        fn to_map(&self) -> HostMap {
            let mut map = HostMap::new();
            map.insert("x", HostValue::Integer(*self.x.borrow()));
            map
        }
    }

    #[test]
    fn test_register_twice_returns_false() {
        let registry = CustomObjectRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.register::<Point>());
        assert!(!registry.register::<Point>());
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister::<Point>());
        assert!(!registry.unregister::<Point>());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_create_and_snapshot() {
        let registry = CustomObjectRegistry::new();
        registry.register::<Point>();
        let name = std::any::type_name::<Point>();
        let mut map = HostMap::new();
        map.insert("x", HostValue::Integer(5));
        let object = registry.create(name, &map).unwrap();
        let point = object.as_any().downcast_ref::<Point>().unwrap();
        assert_eq!(*point.x.borrow(), 5);
        let (snapshot_name, snapshot) = registry.snapshot(object.as_ref()).unwrap();
        assert_eq!(snapshot_name, name);
        assert_eq!(snapshot.get("x"), Some(&HostValue::Integer(5)));
    }

    #[test]
    fn test_create_propagates_populate_errors() {
        let registry = CustomObjectRegistry::new();
        registry.register::<Point>();
        let result = registry.create(std::any::type_name::<Point>(), &HostMap::new());
        assert!(result.is_err());
        assert!(registry.create("missing::Type", &HostMap::new()).is_err());
    }
}
