//! Async store access: `find_async` and `store_values_async` deliver the
//! same results as their synchronous counterparts through `Outcome`.

use asupersync::runtime::RuntimeBuilder;
use tether::prelude::*;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Office {
    id: i32,
    name: String,
}

impl Entity for Office {
    const SET_NAME: &'static str = "Offices";
    const KEY: &'static [&'static str] = &["Id"];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("Id", ScalarType::Int).key(true),
            FieldInfo::new("Name", ScalarType::Text),
        ];
        FIELDS
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.push("Id", Value::Int(self.id));
        r.push("Name", Value::Text(self.name.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("Id").and_then(Value::as_i64).unwrap_or_default() as i32,
            name: record
                .get("Name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[test]
fn find_async_fetches_and_attaches() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let mut backend = MemoryBackend::new();
    backend.seed(&Office {
        id: 1,
        name: "HQ".into(),
    });
    let mut ctx = Context::new(backend);

    rt.block_on(async {
        let office =
            unwrap_outcome(ctx.find_async::<Office>(&cx, &[Value::Int(1)]).await).unwrap();
        assert_eq!(office.name, "HQ");
        assert_eq!(ctx.state_of(&office), EntityState::Unchanged);

        let missing = unwrap_outcome(ctx.find_async::<Office>(&cx, &[Value::Int(2)]).await);
        assert!(missing.is_none());
    });
}

#[test]
fn find_async_reports_key_errors_through_outcome() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let mut ctx = Context::new(MemoryBackend::new());

    rt.block_on(async {
        let outcome = ctx.find_async::<Office>(&cx, &[]).await;
        match outcome {
            Outcome::Err(Error::Key(k)) => assert!(k.message.contains("key_values")),
            Outcome::Err(other) => panic!("unexpected error: {other:?}"),
            Outcome::Ok(_) => panic!("expected a key error"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    });
}

#[test]
fn store_values_async_matches_sync_snapshot() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let mut backend = MemoryBackend::new();
    let office = Office {
        id: 1,
        name: "HQ".into(),
    };
    backend.seed(&office);
    let mut ctx = Context::new(backend);
    ctx.attach(&office).unwrap();

    let mut row = office.to_record();
    row.set("Name", Value::Text("Annex".into()));
    ctx.backend_mut()
        .seed_record("Offices", &[Value::Int(1)], row);

    let sync_snapshot = ctx.store_values(&office).unwrap().unwrap();
    rt.block_on(async {
        let snapshot =
            unwrap_outcome(ctx.store_values_async(&cx, &office).await).unwrap();
        assert_eq!(snapshot.get("Name").unwrap(), &Value::Text("Annex".into()));
        assert_eq!(snapshot.record(), sync_snapshot.record());
    });
}
