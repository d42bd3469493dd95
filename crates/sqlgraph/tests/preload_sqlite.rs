use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use sqlgraph::prelude::*;
use sqlgraph_sqlite::SqliteConnection;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn foos() -> ModelRegistry {
    ModelRegistry::builder()
        .model(
            ModelDef::new("Foo")
                .field(FieldDef::new("ID", FieldType::Int64).primary_key())
                .field(FieldDef::new("BarID", FieldType::Int64))
                .field(FieldDef::belongs_to("Bar", "Bar")),
        )
        .model(
            ModelDef::new("Bar")
                .field(FieldDef::new("ID", FieldType::Int64).primary_key())
                .field(FieldDef::new("Label", FieldType::Text)),
        )
        .build()
        .expect("build registry")
}

#[test]
fn sqlite_preload_missing_belongs_to_target_is_none() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        let ctx = Context::new(foos());
        unwrap_outcome(ctx.auto_migrate(&cx, &conn).await);

        let mut empty: Vec<Record> = Vec::new();
        unwrap_outcome(
            ctx.preload(&cx, &conn, PreloadParams::new(&mut empty).field("Bar"))
                .await,
        );

        let mut bar = ctx.record("Bar").unwrap().with("ID", 1_i64).with("Label", "one");
        unwrap_outcome(ctx.save_one(&cx, &conn, &mut bar).await);
        let mut foos = vec![
            ctx.record("Foo").unwrap().with("ID", 1_i64).with("BarID", 1_i64),
            ctx.record("Foo").unwrap().with("ID", 2_i64).with("BarID", 999_i64),
        ];
        unwrap_outcome(ctx.save(&cx, &conn, SaveParams::new(&mut foos)).await);

        unwrap_outcome(
            ctx.preload(&cx, &conn, PreloadParams::new(&mut foos).field("Bar"))
                .await,
        );
        assert_eq!(
            foos[0].one("Bar").map(|b| b.get("Label").clone()),
            Some(Value::Text("one".into()))
        );
        assert!(foos[1].one("Bar").is_none());
        assert!(foos[1].related("Bar").is_some(), "slot is loaded even when empty");
    });
}

#[test]
fn sqlite_query_helpers() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        let config: ContextConfig =
            serde_json::from_str(r#"{"page_size": 2, "log_sql": true}"#).expect("parse config");
        let ctx = Context::with_config(foos(), config);
        assert_eq!(ctx.config().page_size, 2);
        unwrap_outcome(ctx.auto_migrate(&cx, &conn).await);

        let mut bars: Vec<Record> = (1..=5_i64)
            .map(|id| {
                ctx.record("Bar")
                    .unwrap()
                    .with("ID", id)
                    .with("Label", format!("bar {id}"))
            })
            .collect();
        let stats = unwrap_outcome(ctx.save(&cx, &conn, SaveParams::new(&mut bars)).await);
        assert_eq!(stats.inserts, 5);
        assert_eq!(
            serde_json::to_value(ctx.stats()).expect("serialize stats"),
            serde_json::json!({"inserts": 5, "updates": 0, "current": 0})
        );

        let picked = unwrap_outcome(
            ctx.select(
                &cx,
                &conn,
                "Bar",
                Some(&Filter::in_list(
                    "id",
                    vec![Value::from(2_i64), Value::from(4_i64), Value::from(5_i64)],
                )),
                Some(&Search::new().order_by("id desc").limit(2).offset(1)),
            )
            .await,
        );
        let ids: Vec<_> = picked.iter().map(|r| r.get("ID").clone()).collect();
        assert_eq!(ids, vec![Value::BigInt(4), Value::BigInt(2)]);
        assert_eq!(
            picked[0].to_json(),
            serde_json::json!({"ID": 4, "Label": "bar 4"})
        );

        let nothing = unwrap_outcome(
            ctx.select(&cx, &conn, "Bar", Some(&Filter::in_list("id", Vec::new())), None)
                .await,
        );
        assert!(nothing.is_empty());

        let deleted = unwrap_outcome(
            ctx.delete(&cx, &conn, "Bar", Some(&Filter::eq("label", "bar 1")))
                .await,
        );
        assert_eq!(deleted, 1);
        assert_eq!(unwrap_outcome(ctx.count(&cx, &conn, "Bar", None).await), 4);

        let touched = unwrap_outcome(
            ctx.exec(
                &cx,
                &conn,
                "UPDATE \"bars\" SET \"label\" = ? WHERE \"id\" > ?",
                &[Value::from("high"), Value::from(3_i64)],
            )
            .await,
        );
        assert_eq!(touched, 2);
        let high = unwrap_outcome(
            ctx.count(&cx, &conn, "Bar", Some(&Filter::eq("label", "high")))
                .await,
        );
        assert_eq!(high, 2);

        ctx.reset_stats();
        assert_eq!(ctx.stats(), SaveStats::default());

        match ctx.select(&cx, &conn, "Nope", None, None).await {
            Outcome::Err(_) => {}
            other => panic!("expected an unknown model error, got {other:?}"),
        }
    });
}
