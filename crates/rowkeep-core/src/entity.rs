//! Entity trait for domain objects persisted through a unit of work.
//!
//! An `Entity` declares the shape the coordinator needs: a stable type name,
//! the primary-key field(s), and the list of persistable fields with their
//! current values.

use crate::field::FieldInfo;
use crate::value::Value;

/// Trait for domain types whose lifecycle is persisted to a row.
///
/// # Example
///
/// ```ignore
/// use rowkeep_core::{Entity, FieldInfo, Value};
///
/// struct User {
///     id: Option<i64>,
///     name: String,
/// }
///
/// impl Entity for User {
///     const ENTITY_NAME: &'static str = "users";
///     const PRIMARY_KEY: &'static [&'static str] = &["id"];
///
///     fn fields() -> &'static [FieldInfo] {
///         static FIELDS: &[FieldInfo] = &[
///             FieldInfo::new("id").primary_key(true).auto_increment(true),
///             FieldInfo::new("name"),
///         ];
///         FIELDS
///     }
///
///     fn field_values(&self) -> Vec<(&'static str, Value)> {
///         vec![("id", self.id.into()), ("name", self.name.as_str().into())]
///     }
///
///     fn primary_key_value(&self) -> Vec<Value> {
///         vec![self.id.into()]
///     }
///
///     fn is_new(&self) -> bool {
///         self.id.is_none()
///     }
/// }
/// ```
pub trait Entity: Send + Sync + 'static {
    /// Name of the entity type (table name for row-backed mappers).
    const ENTITY_NAME: &'static str;

    /// The primary key field name(s).
    const PRIMARY_KEY: &'static [&'static str];

    /// Declared persistable fields.
    fn fields() -> &'static [FieldInfo];

    /// Current values of the declared fields, in declaration order.
    fn field_values(&self) -> Vec<(&'static str, Value)>;

    /// Get the value of the primary key field(s).
    fn primary_key_value(&self) -> Vec<Value>;

    /// Check if the primary key is still unset (the row was never inserted).
    fn is_new(&self) -> bool;
}

/// Entities whose key is generated by the store on insert.
pub trait AutoIncrement: Entity {
    /// Set the generated id after insert.
    fn set_id(&mut self, id: i64);
}

/// Primary key of an entity, or `None` while it is unset.
pub fn assigned_key<E: Entity>(entity: &E) -> Option<Vec<Value>> {
    if entity.is_new() {
        None
    } else {
        Some(entity.primary_key_value())
    }
}
