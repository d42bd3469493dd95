use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use sqlgraph::RelationshipErrorKind;
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

fn id() -> FieldDef {
    FieldDef::new("ID", FieldType::Int64).primary_key()
}

async fn count(ctx: &Context, cx: &Cx, conn: &SqliteConnection, model: &str) -> i64 {
    unwrap_outcome(ctx.count(cx, conn, model, None).await)
}

async fn fresh_context(cx: &Cx, conn: &SqliteConnection, registry: ModelRegistry) -> Context {
    let ctx = Context::new(registry);
    unwrap_outcome(ctx.auto_migrate(cx, conn).await);
    ctx
}

fn fates() -> ModelRegistry {
    ModelRegistry::builder()
        .model(
            ModelDef::new("Human")
                .field(id())
                .field(FieldDef::new("FateID", FieldType::Int64))
                .field(FieldDef::belongs_to("Fate", "Fate")),
        )
        .model(
            ModelDef::new("Fate")
                .field(id())
                .field(FieldDef::new("Desc", FieldType::Text)),
        )
        .model(
            ModelDef::new("Joke")
                .field(FieldDef::new("ID", FieldType::Text).primary_key())
                .field(FieldDef::new("HumanID", FieldType::Int64))
                .field(FieldDef::belongs_to("Human", "Human")),
        )
        .build()
        .expect("build registry")
}

#[test]
fn sqlite_belongs_to_preload_single_record() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        let ctx = fresh_context(&cx, &conn, fates()).await;

        let mut fate = ctx
            .record("Fate")
            .unwrap()
            .with("ID", 123_i64)
            .with("Desc", "Consumer-grade flamethrowers");
        unwrap_outcome(ctx.save_one(&cx, &conn, &mut fate).await);

        let mut lea = ctx
            .record("Human")
            .unwrap()
            .with("ID", 3_i64)
            .with("FateID", 123_i64);
        unwrap_outcome(ctx.save_one(&cx, &conn, &mut lea).await);

        let mut humans = vec![lea];
        unwrap_outcome(
            ctx.preload(&cx, &conn, PreloadParams::new(&mut humans).field("Fate"))
                .await,
        );
        let fate = humans[0].one("Fate").expect("fate preloaded");
        assert_eq!(
            fate.get("Desc"),
            &Value::Text("Consumer-grade flamethrowers".into())
        );
    });
}

#[test]
fn sqlite_belongs_to_save_assoc_only() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        let ctx = fresh_context(&cx, &conn, fates()).await;

        let fate = ctx
            .record("Fate")
            .unwrap()
            .with("ID", 421_i64)
            .with("Desc", "Book authorship");
        let mut humans = vec![ctx.record("Human").unwrap().with("ID", 3_i64).with_one("Fate", fate)];
        unwrap_outcome(
            ctx.save(&cx, &conn, SaveParams::new(&mut humans).assocs(["Fate"]))
                .await,
        );

        let fate = unwrap_outcome(
            ctx.select_one(&cx, &conn, "Fate", Some(&Filter::eq("id", 421_i64)), None)
                .await,
        )
        .expect("fate 421");
        assert_eq!(fate.get("Desc"), &Value::Text("Book authorship".into()));
        assert_eq!(count(&ctx, &cx, &conn, "Human").await, 0);
        // The foreign key is still copied onto the in-memory parent.
        assert_eq!(humans[0].get("FateID"), &Value::BigInt(421));
    });
}

#[test]
fn sqlite_belongs_to_nested_preload() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        let ctx = fresh_context(&cx, &conn, fates()).await;

        let mut fate = ctx.record("Fate").unwrap().with("ID", 3_i64).with("Desc", "Space rodeo");
        unwrap_outcome(ctx.save_one(&cx, &conn, &mut fate).await);
        let mut human = ctx.record("Human").unwrap().with("ID", 6_i64).with("FateID", 3_i64);
        unwrap_outcome(ctx.save_one(&cx, &conn, &mut human).await);
        let mut joke = ctx.record("Joke").unwrap().with("ID", "neuf").with("HumanID", 6_i64);
        unwrap_outcome(ctx.save_one(&cx, &conn, &mut joke).await);

        let mut jokes = vec![joke];
        unwrap_outcome(
            ctx.preload(
                &cx,
                &conn,
                PreloadParams::new(&mut jokes).fields(["Human", "Human.Fate"]),
            )
            .await,
        );
        let human = jokes[0].one("Human").expect("human preloaded");
        let fate = human.one("Fate").expect("fate preloaded");
        assert_eq!(fate.get("Desc"), &Value::Text("Space rodeo".into()));
    });
}

#[test]
fn sqlite_has_one_save_and_preload() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        let registry = ModelRegistry::builder()
            .model(
                ModelDef::new("Country")
                    .field(id())
                    .field(FieldDef::new("Desc", FieldType::Text))
                    .field(FieldDef::has_one("Specialty", "Specialty")),
            )
            .model(
                ModelDef::new("Specialty")
                    .field(FieldDef::new("ID", FieldType::Text).primary_key())
                    .field(FieldDef::new("CountryID", FieldType::Int64))
                    .field(FieldDef::has_one("Drawback", "Drawback")),
            )
            .model(
                ModelDef::new("Drawback")
                    .field(id())
                    .field(FieldDef::new("Comment", FieldType::Text))
                    .field(FieldDef::new("SpecialtyID", FieldType::Text)),
            )
            .build()
            .expect("build registry");
        let ctx = fresh_context(&cx, &conn, registry).await;

        let drawback = ctx
            .record("Drawback")
            .unwrap()
            .with("ID", 1249_i64)
            .with("Comment", "bitterness");
        let specialty = ctx
            .record("Specialty")
            .unwrap()
            .with("ID", "complain")
            .with_one("Drawback", drawback);
        let mut countries = vec![
            ctx.record("Country")
                .unwrap()
                .with("ID", 324_i64)
                .with("Desc", "Shmance")
                .with_one("Specialty", specialty),
        ];

        unwrap_outcome(
            ctx.save(&cx, &conn, SaveParams::new(&mut countries).assocs(["Specialty"]))
                .await,
        );
        assert_eq!(count(&ctx, &cx, &conn, "Country").await, 0);
        assert_eq!(count(&ctx, &cx, &conn, "Specialty").await, 1);
        assert_eq!(count(&ctx, &cx, &conn, "Drawback").await, 1);

        unwrap_outcome(ctx.save(&cx, &conn, SaveParams::new(&mut countries)).await);
        assert_eq!(count(&ctx, &cx, &conn, "Country").await, 1);
        assert_eq!(count(&ctx, &cx, &conn, "Specialty").await, 1);
        assert_eq!(count(&ctx, &cx, &conn, "Drawback").await, 1);

        let mut loaded = Vec::new();
        for _ in 0..4 {
            let country = unwrap_outcome(
                ctx.select_one(&cx, &conn, "Country", Some(&Filter::eq("id", 324_i64)), None)
                    .await,
            )
            .expect("country 324");
            loaded.push(country);
        }
        unwrap_outcome(
            ctx.preload(
                &cx,
                &conn,
                PreloadParams::new(&mut loaded).fields(["Specialty", "Specialty.Drawback"]),
            )
            .await,
        );
        for country in &loaded {
            let specialty = country.one("Specialty").expect("specialty preloaded");
            assert_eq!(specialty.get("CountryID"), &Value::BigInt(324));
            let drawback = specialty.one("Drawback").expect("drawback preloaded");
            assert_eq!(drawback.get("Comment"), &Value::Text("bitterness".into()));
        }
    });
}

fn programmers() -> ModelRegistry {
    ModelRegistry::builder()
        .model(
            ModelDef::new("Quality")
                .field(id())
                .field(FieldDef::new("ProgrammerID", FieldType::Int64))
                .field(FieldDef::new("Label", FieldType::Text)),
        )
        .model(
            ModelDef::new("Programmer")
                .field(id())
                .field(FieldDef::has_many("Qualities", "Quality")),
        )
        .build()
        .expect("build registry")
}

fn quality(ctx: &Context, id: i64, label: &str) -> Record {
    ctx.record("Quality").unwrap().with("ID", id).with("Label", label)
}

#[test]
fn sqlite_has_many_save_generates_keys_for_new_graph() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        let ctx = fresh_context(&cx, &conn, programmers()).await;

        let mut programmers = vec![ctx.record("Programmer").unwrap().with_many(
            "Qualities",
            vec![
                ctx.record("Quality").unwrap().with("Label", "Patience"),
                ctx.record("Quality").unwrap().with("Label", "Curiosity"),
            ],
        )];
        let stats = unwrap_outcome(ctx.save(&cx, &conn, SaveParams::new(&mut programmers)).await);
        assert_eq!((stats.inserts, stats.updates, stats.current), (3, 0, 0));

        let programmer_id = programmers[0].get("ID").clone();
        assert_eq!(programmer_id, Value::BigInt(1));
        for quality in programmers[0].many("Qualities") {
            assert_eq!(quality.get("ProgrammerID"), &programmer_id);
            assert_ne!(quality.get("ID"), &Value::Null);
        }
        let stored = unwrap_outcome(
            ctx.select(&cx, &conn, "Quality", Some(&Filter::eq("programmer_id", 1_i64)), None)
                .await,
        );
        assert_eq!(stored.len(), 2);

        let stats = unwrap_outcome(ctx.save(&cx, &conn, SaveParams::new(&mut programmers)).await);
        assert_eq!((stats.inserts, stats.updates, stats.current), (0, 0, 3));
        assert_eq!(count(&ctx, &cx, &conn, "Programmer").await, 1);
        assert_eq!(count(&ctx, &cx, &conn, "Quality").await, 2);
    });
}

#[test]
fn sqlite_has_many_save_diff_and_preload() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        let ctx = fresh_context(&cx, &conn, programmers()).await;

        let p1 = ctx.record("Programmer").unwrap().with("ID", 3_i64).with_many(
            "Qualities",
            vec![
                quality(&ctx, 9, "Inspiration"),
                quality(&ctx, 10, "Creativity"),
                quality(&ctx, 11, "Ability to not repeat oneself"),
            ],
        );
        let mut programmers = vec![p1];
        let stats = unwrap_outcome(ctx.save(&cx, &conn, SaveParams::new(&mut programmers)).await);
        assert_eq!(stats.inserts, 4);
        assert_eq!(count(&ctx, &cx, &conn, "Programmer").await, 1);
        assert_eq!(count(&ctx, &cx, &conn, "Quality").await, 3);

        programmers[0].many_mut("Qualities").unwrap()[2].set("Label", "Inspiration again");
        let stats = unwrap_outcome(ctx.save(&cx, &conn, SaveParams::new(&mut programmers)).await);
        assert_eq!((stats.inserts, stats.updates, stats.current), (0, 1, 3));
        assert_eq!(count(&ctx, &cx, &conn, "Quality").await, 3);
        let q = unwrap_outcome(
            ctx.select_one(&cx, &conn, "Quality", Some(&Filter::eq("id", 11_i64)), None)
                .await,
        )
        .expect("quality 11");
        assert_eq!(q.get("Label"), &Value::Text("Inspiration again".into()));

        programmers.push(ctx.record("Programmer").unwrap().with("ID", 8_i64).with_many(
            "Qualities",
            vec![quality(&ctx, 40, "Peace"), quality(&ctx, 41, "Serenity")],
        ));
        unwrap_outcome(ctx.save(&cx, &conn, SaveParams::new(&mut programmers)).await);
        assert_eq!(count(&ctx, &cx, &conn, "Programmer").await, 2);
        assert_eq!(count(&ctx, &cx, &conn, "Quality").await, 5);
        assert_eq!(ctx.stats().inserts, 7);

        let mut p1bis = vec![ctx.record("Programmer").unwrap().with("ID", 3_i64)];
        unwrap_outcome(
            ctx.preload(&cx, &conn, PreloadParams::new(&mut p1bis).field("Qualities"))
                .await,
        );
        assert_eq!(p1bis[0].many("Qualities").len(), 3, "preload has_many");

        unwrap_outcome(
            ctx.preload(&cx, &conn, PreloadParams::new(&mut p1bis).field("Qualities"))
                .await,
        );
        assert_eq!(
            p1bis[0].many("Qualities").len(),
            3,
            "preload replaces, doesn't append"
        );

        unwrap_outcome(
            ctx.preload(
                &cx,
                &conn,
                PreloadParams::new(&mut p1bis)
                    .field(PreloadField::new("Qualities").order_by("id asc")),
            )
            .await,
        );
        assert_eq!(
            p1bis[0].many("Qualities")[0].get("Label"),
            &Value::Text("Inspiration".into()),
            "orders by (asc)"
        );

        unwrap_outcome(
            ctx.preload(
                &cx,
                &conn,
                PreloadParams::new(&mut p1bis)
                    .field(PreloadField::new("Qualities").order_by("id desc")),
            )
            .await,
        );
        assert_eq!(
            p1bis[0].many("Qualities")[0].get("Label"),
            &Value::Text("Inspiration again".into()),
            "orders by (desc)"
        );

        match ctx.preload(&cx, &conn, PreloadParams::new(&mut p1bis)).await {
            Outcome::Err(Error::Shape(_)) => {}
            other => panic!("expected a shape error for empty fields, got {other:?}"),
        }

        match ctx
            .preload(&cx, &conn, PreloadParams::new(&mut p1bis).field("Woops"))
            .await
        {
            Outcome::Err(e) => {
                assert_eq!(e.relationship_kind(), Some(RelationshipErrorKind::UnknownField));
                assert!(e.to_string().contains("Relation not found: Programmer.Woops"));
            }
            other => panic!("expected an unknown relation error, got {other:?}"),
        }

        let mut mixed = vec![
            ctx.record("Programmer").unwrap().with("ID", 3_i64),
            quality(&ctx, 9, "Inspiration"),
        ];
        match ctx
            .preload(&cx, &conn, PreloadParams::new(&mut mixed).field("Qualities"))
            .await
        {
            Outcome::Err(Error::Shape(_)) => {}
            other => panic!("expected a shape error for mixed models, got {other:?}"),
        }
    });
}
