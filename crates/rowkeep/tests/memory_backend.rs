use rowkeep::prelude::*;

#[derive(Debug, Clone)]
struct Customer {
    id: Option<i64>,
    name: String,
    email: String,
}

impl Entity for Customer {
    const ENTITY_NAME: &'static str = "customers";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("id").primary_key(true).auto_increment(true),
            FieldInfo::new("name"),
            FieldInfo::new("email").unique(true),
        ];
        FIELDS
    }

    fn field_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("name", self.name.as_str().into()),
            ("email", self.email.as_str().into()),
        ]
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![self.id.into()]
    }

    fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

impl AutoIncrement for Customer {
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone)]
struct Invoice {
    id: Option<i64>,
    customer: String,
    amount_cents: i64,
}

impl Entity for Invoice {
    const ENTITY_NAME: &'static str = "invoices";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("id").primary_key(true).auto_increment(true),
            FieldInfo::new("customer"),
            FieldInfo::new("amount_cents"),
        ];
        FIELDS
    }

    fn field_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("customer", self.customer.as_str().into()),
            ("amount_cents", Value::BigInt(self.amount_cents)),
        ]
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![self.id.into()]
    }

    fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

impl AutoIncrement for Invoice {
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

fn customer(name: &str, email: &str) -> EntityRef<Customer> {
    EntityRef::new(Customer {
        id: None,
        name: name.to_string(),
        email: email.to_string(),
    })
}

fn invoice(customer: &str, amount_cents: i64) -> EntityRef<Invoice> {
    EntityRef::new(Invoice {
        id: None,
        customer: customer.to_string(),
        amount_cents,
    })
}

fn setup() -> (UnitOfWork<MemoryStore>, MemoryStore, MemorySink) {
    let store = MemoryStore::new();
    let sink = MemorySink::new();
    let mut uow = UnitOfWork::new(store.clone()).with_sink(sink.clone());
    uow.register_data_mapper::<Customer, _>(TableMapper::<Customer>::new(store.clone()));
    uow.register_data_mapper::<Invoice, _>(TableMapper::<Invoice>::new(store.clone()));
    (uow, store, sink)
}

#[test]
fn insert_assigns_id_and_stores_row() {
    let (mut uow, store, _sink) = setup();
    let c = customer("a", "a@example.com");

    uow.manage(&c);
    uow.schedule_for_insert(&c).unwrap();
    let report = uow.commit().unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(c.read().id, Some(1));
    assert!(uow.is_managed(&c));
    assert!(uow.pending_counts().is_empty());

    let row = store.get_row("customers", 1).unwrap();
    assert_eq!(row, c.read().field_values());
    assert!(!store.in_transaction());
}

#[test]
fn update_and_delete_round_trip_through_store() {
    let (mut uow, store, _sink) = setup();
    let c = customer("a", "a@example.com");
    uow.schedule_for_insert(&c).unwrap();
    uow.commit().unwrap();

    c.write().name = "renamed".to_string();
    assert_eq!(uow.commit().unwrap().updated, 1);
    let row = store.get_row("customers", 1).unwrap();
    assert_eq!(row[1], ("name", Value::Text("renamed".to_string())));

    uow.schedule_for_delete(&c).unwrap();
    assert_eq!(uow.commit().unwrap().deleted, 1);
    assert_eq!(store.row_count("customers"), 0);
    assert_eq!(uow.state(&c), EntityState::Deleted);
}

#[test]
fn constraint_violation_rolls_back_all_tables() {
    let (mut uow, store, sink) = setup();
    let existing = customer("first", "dup@example.com");
    uow.schedule_for_insert(&existing).unwrap();
    uow.commit().unwrap();

    let inv = invoice("first", 1250);
    let dup = customer("second", "dup@example.com");
    uow.schedule_for_insert(&inv).unwrap();
    uow.schedule_for_insert(&dup).unwrap();

    let err = uow.commit().unwrap_err();

    assert!(err.is_constraint_violation());
    assert_eq!(store.row_count("invoices"), 0);
    assert_eq!(store.row_count("customers"), 1);
    assert!(!store.in_transaction());
    assert_eq!(sink.len(), 1);

    assert!(!uow.is_managed(&inv));
    assert!(!uow.is_managed(&dup));
    assert!(uow.is_managed(&existing));
}

#[test]
fn rolled_back_insert_can_be_retried() {
    let (mut uow, store, _sink) = setup();
    let existing = customer("first", "dup@example.com");
    uow.schedule_for_insert(&existing).unwrap();
    uow.commit().unwrap();

    let ann = uow.manage(&customer("ann", "ann@example.com"));
    existing.write().name = "first, renamed".to_string();
    uow.schedule_for_insert(&ann).unwrap();
    uow.schedule_for_insert(&customer("dup", "dup@example.com")).unwrap();

    assert!(uow.commit().unwrap_err().is_constraint_violation());
    assert_eq!(ann.read().id, Some(2));
    assert_eq!(uow.state(&ann), EntityState::Unmanaged);
    assert_eq!(store.row_count("customers"), 1);

    // Only the reverted update is picked up again.
    let report = uow.commit().unwrap();
    assert_eq!((report.inserted, report.updated), (0, 1));
    let row = store.get_row("customers", 1).unwrap();
    assert_eq!(row[1], ("name", Value::Text("first, renamed".to_string())));

    uow.schedule_for_insert(&ann).unwrap();
    assert_eq!(uow.commit().unwrap().inserted, 1);
    assert_eq!(store.row_count("customers"), 2);
    assert_eq!(store.get_row("customers", 2).unwrap(), ann.read().field_values());
    assert!(uow.is_managed(&ann));
    assert!(!uow.has_changes());
}

#[test]
fn updating_a_vanished_row_fails_cleanly() {
    let (mut uow, store, _sink) = setup();
    let c = customer("a", "a@example.com");
    uow.schedule_for_insert(&c).unwrap();
    uow.commit().unwrap();

    // Someone else removed the row behind the unit of work's back.
    store.delete_row("customers", 1).unwrap();
    c.write().name = "b".to_string();

    let err = uow.commit().unwrap_err();
    match err.root() {
        Error::Query(q) => assert_eq!(q.kind, rowkeep::QueryErrorKind::NotFound),
        other => panic!("expected not found, got {other:?}"),
    }
    assert!(uow.is_managed(&c));
}

#[test]
fn loaded_rows_are_managed_once() {
    let (mut uow, store, _sink) = setup();
    let c = customer("a", "a@example.com");
    uow.schedule_for_insert(&c).unwrap();
    uow.commit().unwrap();

    // A second load of the same row resolves to the tracked instance.
    let row = store.get_row("customers", 1).unwrap();
    let loaded = EntityRef::new(Customer {
        id: row[0].1.as_i64(),
        name: row[1].1.as_str().unwrap_or_default().to_string(),
        email: row[2].1.as_str().unwrap_or_default().to_string(),
    });
    let resolved = uow.manage(&loaded);

    assert!(resolved.ptr_eq(&c));
    assert_eq!(uow.tracked_count(), 1);
}

#[test]
fn debug_state_serializes() {
    let (mut uow, _store, _sink) = setup();
    let a = customer("a", "a@example.com");
    uow.manage(&a);
    uow.schedule_for_insert(&invoice("a", 5)).unwrap();

    let json = serde_json::to_value(uow.debug_state()).unwrap();

    assert_eq!(json["tracked"], 2);
    assert_eq!(json["managed"], 1);
    assert_eq!(json["pending"]["insert"], 1);
    assert_eq!(json["mappers"], 2);
    assert_eq!(uow.store().row_count("invoices"), 0);
}
