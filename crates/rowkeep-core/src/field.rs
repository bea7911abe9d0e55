//! Declared field metadata.
//!
//! Every entity type publishes a static list of its persistable fields. The
//! list is the contract used for snapshots and dirty checks: a struct member
//! that is not declared here is never compared or persisted.

/// Metadata about one persistable field of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Storage column name (may differ from field name)
    pub column_name: &'static str,
    /// Whether this field is nullable
    pub nullable: bool,
    /// Whether this is (part of) the primary key
    pub primary_key: bool,
    /// Whether the store generates this field's value on insert
    pub auto_increment: bool,
    /// Whether this field carries a unique constraint
    pub unique: bool,
}

impl FieldInfo {
    /// Create a new field info whose column name equals the field name.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            column_name: name,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
        }
    }

    /// Set the storage column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set primary key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set auto-increment flag.
    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Set unique flag.
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }
}

/// Look up a field by its Rust name.
pub fn find_field<'a>(fields: &'a [FieldInfo], name: &str) -> Option<&'a FieldInfo> {
    fields.iter().find(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    static FIELDS: &[FieldInfo] = &[
        FieldInfo::new("id").primary_key(true).auto_increment(true),
        FieldInfo::new("email").column("email_address").unique(true),
        FieldInfo::new("nickname").nullable(true),
    ];

    #[test]
    fn builders_set_flags() {
        let id = &FIELDS[0];
        assert!(id.primary_key);
        assert!(id.auto_increment);
        assert!(!id.nullable);

        let email = &FIELDS[1];
        assert_eq!(email.column_name, "email_address");
        assert!(email.unique);
    }

    #[test]
    fn find_field_by_name() {
        assert_eq!(
            find_field(FIELDS, "nickname").map(|f| f.column_name),
            Some("nickname")
        );
        assert!(find_field(FIELDS, "missing").is_none());
    }
}
