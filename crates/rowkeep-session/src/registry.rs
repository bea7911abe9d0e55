//! Per-type data mapper registry.

use crate::{EntityRef, Trackable};
use rowkeep_core::{DataMapper, Entity, Error, PersistOp, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased mapper slot.
trait ErasedMapper: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Apply `op` to a tracked entity of the slot's type.
    fn apply(&self, op: PersistOp, object: &dyn Trackable) -> Result<()>;
}

struct MapperSlot<E: Entity> {
    mapper: Arc<dyn DataMapper<E>>,
}

impl<E: Entity> ErasedMapper for MapperSlot<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn apply(&self, op: PersistOp, object: &dyn Trackable) -> Result<()> {
        let Some(entity) = object.as_any().downcast_ref::<EntityRef<E>>() else {
            return Err(Error::Custom(format!(
                "entity {} is not a '{}'",
                object.handle(),
                E::ENTITY_NAME
            )));
        };
        match op {
            PersistOp::Insert => self.mapper.add(&mut *entity.write()),
            PersistOp::Update => self.mapper.update(&*entity.read()),
            PersistOp::Delete => self.mapper.delete(&*entity.read()),
        }
    }
}

/// Maps entity types to their data mappers. One mapper per type.
#[derive(Default)]
pub struct DataMapperRegistry {
    mappers: HashMap<TypeId, Box<dyn ErasedMapper>>,
}

impl DataMapperRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the mapper for `E`, replacing any earlier one.
    ///
    /// Returns `true` if a mapper was replaced.
    pub fn register<E, M>(&mut self, mapper: M) -> bool
    where
        E: Entity,
        M: DataMapper<E> + 'static,
    {
        let slot = MapperSlot::<E> {
            mapper: Arc::new(mapper),
        };
        self.mappers
            .insert(TypeId::of::<E>(), Box::new(slot))
            .is_some()
    }

    /// Resolve the mapper for `E`.
    ///
    /// # Errors
    ///
    /// A configuration error (`UnregisteredMapper`) if none is registered.
    pub fn resolve<E: Entity>(&self) -> Result<Arc<dyn DataMapper<E>>> {
        self.mappers
            .get(&TypeId::of::<E>())
            .and_then(|slot| slot.as_any().downcast_ref::<MapperSlot<E>>())
            .map(|slot| Arc::clone(&slot.mapper))
            .ok_or_else(|| Error::unregistered_mapper(E::ENTITY_NAME))
    }

    /// Whether a mapper is registered for `E`.
    pub fn contains<E: Entity>(&self) -> bool {
        self.mappers.contains_key(&TypeId::of::<E>())
    }

    /// Apply `op` to a type-erased entity through its type's mapper.
    pub(crate) fn apply(&self, op: PersistOp, object: &dyn Trackable) -> Result<()> {
        let slot = self
            .mappers
            .get(&object.entity_type())
            .ok_or_else(|| Error::unregistered_mapper(object.entity_name()))?;
        slot.apply(op, object)
    }

    /// Number of registered mappers.
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    /// Whether no mapper is registered.
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl std::fmt::Debug for DataMapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMapperRegistry")
            .field("mappers", &self.mappers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowkeep_core::{ConfigErrorKind, FieldInfo, Value};
    use std::sync::Mutex;

    struct Item {
        id: Option<i64>,
    }

    impl Entity for Item {
        const ENTITY_NAME: &'static str = "items";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[FieldInfo::new("id").primary_key(true)];
            FIELDS
        }

        fn field_values(&self) -> Vec<(&'static str, Value)> {
            vec![("id", self.id.into())]
        }

        fn primary_key_value(&self) -> Vec<Value> {
            vec![self.id.into()]
        }

        fn is_new(&self) -> bool {
            self.id.is_none()
        }
    }

    #[derive(Default)]
    struct CountingMapper {
        calls: Mutex<Vec<&'static str>>,
    }

    impl DataMapper<Item> for CountingMapper {
        fn add(&self, entity: &mut Item) -> Result<()> {
            self.calls.lock().unwrap().push("add");
            entity.id = Some(10);
            Ok(())
        }

        fn update(&self, _entity: &Item) -> Result<()> {
            self.calls.lock().unwrap().push("update");
            Ok(())
        }

        fn delete(&self, _entity: &Item) -> Result<()> {
            self.calls.lock().unwrap().push("delete");
            Ok(())
        }
    }

    #[test]
    fn test_unregistered_is_config_error() {
        let registry = DataMapperRegistry::new();
        let err = registry.resolve::<Item>().err().unwrap();

        match err {
            Error::Config(c) => assert_eq!(c.kind, ConfigErrorKind::UnregisteredMapper),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_register_and_replace() {
        let mut registry = DataMapperRegistry::new();
        assert!(!registry.register::<Item, _>(CountingMapper::default()));
        assert!(registry.register::<Item, _>(CountingMapper::default()));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains::<Item>());
        assert!(registry.resolve::<Item>().is_ok());
    }

    #[test]
    fn test_apply_routes_to_mapper() {
        let mapper = Arc::new(CountingMapper::default());
        let mut registry = DataMapperRegistry::new();
        registry.register::<Item, _>(Arc::clone(&mapper));

        let item = EntityRef::new(Item { id: None });
        registry.apply(PersistOp::Insert, &item).unwrap();
        registry.apply(PersistOp::Delete, &item).unwrap();

        assert_eq!(item.read().id, Some(10));
        assert_eq!(*mapper.calls.lock().unwrap(), vec!["add", "delete"]);
    }
}
