use std::{collections::BTreeSet, sync::Arc};

use docmap::{
    bson::{Bson, DateTime, Document, doc},
    error::DocmapError,
    memory::InMemoryStore,
    prelude::*,
};
use futures::StreamExt;
use serde::Deserialize;

fn person() -> Arc<Schema> {
    Schema::builder("Person")
        .collection("test_collection")
        .field("created", Field::timestamp().default_fn(|| Bson::DateTime(DateTime::from_chrono(chrono::Utc::now()))))
        .field("age", Field::int())
        .field("name", Field::char().index(IndexKind::Text))
        .field("parents", Field::list())
        .field("height", Field::float())
        .field("inc", Field::int())
        .build()
        .unwrap()
}

fn product() -> Arc<Schema> {
    Schema::builder("Product")
        .field("name", Field::char())
        .field("serial", Field::char().default_fn(|| Bson::String(uuid::Uuid::new_v4().to_string())))
        .field("size", Field::int())
        .unique_together(["size", "name"])
        .build()
        .unwrap()
}

fn data() -> Document {
    doc! { "age": 29, "name": "Anthony", "parents": ["the", "streets"], "height": 1.76 }
}

fn store() -> DocumentStore<InMemoryStore> {
    DocumentStore::new(InMemoryStore::new())
}

#[tokio::test]
async fn test_init() {
    let store = store();
    let people = store.model(&person());
    let anthony = people.new_record(data()).unwrap();

    let names: BTreeSet<&str> = people
        .schema()
        .fields()
        .iter()
        .map(Field::name)
        .collect();
    let expected: BTreeSet<&str> = ["age", "name", "parents", "height", "created", "_id", "inc"].into();
    assert_eq!(names, expected);

    assert_eq!(anthony.get("age").unwrap(), &Bson::Int64(29));
    assert_eq!(anthony.get("name").unwrap(), &Bson::from("Anthony"));
    assert_eq!(anthony.get("parents").unwrap(), &Bson::from(vec!["the", "streets"]));
    assert_eq!(anthony.get("height").unwrap(), &Bson::Double(1.76));
    assert!(matches!(anthony.get("created").unwrap(), Bson::Timestamp(_)));
}

#[tokio::test]
async fn test_collection() {
    let store = store();
    let person = person();
    let product = product();

    assert_eq!(product.collection_name(), "product");

    store.model(&person).ensure_indexes().await.unwrap();
    store.model(&product).ensure_indexes().await.unwrap();

    let names = store.list_collections().await.unwrap();
    assert!(names.contains(&"test_collection".to_string()));
    assert!(names.contains(&"product".to_string()));
}

#[tokio::test]
async fn test_save() {
    let store = store();
    let people = store.model(&person());

    let mut anthony = people.new_record(data()).unwrap();
    anthony.save(&people).await.unwrap();

    assert!(anthony.id().is_some());
    assert!(anthony.is_from_db());
    assert!(people.get(doc! { "name": "Anthony" }).await.is_ok());
}

#[tokio::test]
async fn test_get() {
    let store = store();
    let people = store.model(&person());

    let err = people.get(doc! { "name": "asfasf" }).await.unwrap_err();
    assert!(err.is_does_not_exist("Person"));

    let anthony = people.create(data()).await.unwrap();
    people.create(data()).await.unwrap();

    let err = people.get(doc! { "name": "Anthony" }).await.unwrap_err();
    assert!(err.is_multiple_objects_exist("Person"));

    let id = anthony.id().unwrap();
    let gotten = people.get(doc! { "_id": id }).await.unwrap();
    for name in ["_id", "name", "age", "parents", "height", "created"] {
        assert_eq!(gotten.get(name).unwrap(), anthony.get(name).unwrap(), "{name}");
    }

    let gotten = people
        .get_with(doc! { "_id": id }, Projection::include(["name", "parents"]))
        .await
        .unwrap();
    assert_eq!(gotten.id(), Some(id));
    assert_eq!(gotten.get("name").unwrap(), anthony.get("name").unwrap());
    assert_eq!(gotten.get("age").unwrap(), &Bson::Null);
    assert_eq!(gotten.get("parents").unwrap(), anthony.get("parents").unwrap());
    assert_eq!(gotten.get("height").unwrap(), &Bson::Null);

    let gotten = people
        .get_with(doc! { "_id": id }, Projection::exclude(["_id", "name", "parents"]))
        .await
        .unwrap();
    assert_eq!(gotten.get("_id").unwrap(), &Bson::Null);
    assert_eq!(gotten.get("name").unwrap(), &Bson::Null);
    assert_eq!(gotten.get("age").unwrap(), anthony.get("age").unwrap());
    assert_eq!(gotten.get("parents").unwrap(), &Bson::Null);
    assert_eq!(gotten.get("height").unwrap(), anthony.get("height").unwrap());

    let mut gotten = people
        .get_with(
            doc! { "_id": id, "parents": "the" },
            Projection::Raw(doc! { "parents.$": 1 }),
        )
        .await
        .unwrap();
    assert_eq!(gotten.get("parents").unwrap(), &Bson::from(vec!["the"]));

    gotten.set("name", "Tony").unwrap();
    gotten.save(&people).await.unwrap();
    assert_eq!(gotten.get("name").unwrap(), &Bson::from("Tony"));
    assert_eq!(people.filter(doc! { "name": "Tony" }).count(false).await.unwrap(), 1);

    let mut young = people.new_record(data()).unwrap();
    young.set("age", 22).unwrap();
    young.save(&people).await.unwrap();
    assert!(young.is_from_db());
    assert_eq!(
        people.filter(doc! { "name": "Anthony", "age": 22 }).count(false).await.unwrap(),
        1
    );

    let err = people.get(doc! { "name": "Alice" }).await.unwrap_err();
    assert!(err.is_does_not_exist("Person"));

    people.create(doc! { "name": "Tony" }).await.unwrap();

    let mut broken = people.filter(doc! { "name__asfdf": "asfd" });
    let err = broken.get(0).await.unwrap_err();
    assert!(err.is_query_error("Person"), "{err}");

    let mut broken = people.filter(doc! { "name__asfdf": "asfd" });
    let first = broken.stream().next().await.unwrap();
    assert!(matches!(first, Err(ref err) if err.is_query_error("Person")));

    let err = people.get(doc! { "name": "Tony" }).await.unwrap_err();
    assert!(err.is_multiple_objects_exist("Person"));
}

#[tokio::test]
async fn test_filter() {
    let store = store();
    let people = store.model(&person());

    let clones = (0..10)
        .map(|inc| {
            let mut values = data();
            values.insert("inc", inc);
            people.new_record(values)
        })
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let created = people.bulk_create(clones).await.unwrap();
    assert!(created.iter().all(|record| record.is_from_db() && record.id().is_some()));

    let queryset = people.filter(doc! { "name": "Anthony" });
    assert!(!people.filter(doc! { "name": "asdf" }).exists().await.unwrap());
    assert!(queryset.exists().await.unwrap());
    assert_eq!(queryset.count(false).await.unwrap(), 10);

    let mut older = people.filter(doc! { "name": "Anthony", "inc": { "$gt": 4 } });
    assert_eq!(older.count(false).await.unwrap(), 5);
    let updated = older.update(doc! { "$set": { "age": 60 } }).await.unwrap();
    assert_eq!(updated.len(), 5);
    assert!(updated.iter().all(|record| record.get("age").unwrap() == &Bson::Int64(60)));

    let mut queryset = people
        .filter_with(doc! { "name": "Anthony" }, Projection::exclude(["inc", "_id"]))
        .unwrap();
    queryset.filter(doc! { "age": { "$gt": 40 } });
    assert_eq!(queryset.count(false).await.unwrap(), 5);

    let err = queryset.update_fields(doc! { "not_here": 1000 }).await.unwrap_err();
    assert!(matches!(err, DocmapError::UnknownField { ref field, .. } if field == "not_here"));

    queryset.update_fields(doc! { "age": 100 }).await.unwrap();

    let mut expected = data();
    expected.insert("age", 100_i64);
    for serialized in queryset.serialize().await.unwrap() {
        assert!(!serialized.contains_key("_id"));
        assert!(!serialized.contains_key("inc"));
        for (key, value) in &expected {
            assert_eq!(serialized.get(key), Some(value), "{key}");
        }
    }
    assert!(queryset.exists().await.unwrap());

    queryset.limit(2);
    assert_eq!(queryset.count(false).await.unwrap(), 5);
    assert_eq!(queryset.count(true).await.unwrap(), 2);
    assert_eq!(queryset.len().await.unwrap(), 2);

    let unique = queryset.distinct("name").await.unwrap();
    assert_eq!(unique, vec![Bson::from("Anthony")]);
}

#[tokio::test]
async fn test_field_index() {
    let store = store();
    store.model(&person()).ensure_indexes().await.unwrap();
    store.model(&product()).ensure_indexes().await.unwrap();

    assert!(store
        .list_indexes("test_collection")
        .await
        .unwrap()
        .contains(&"name_text".to_string()));
    assert!(store
        .list_indexes("product")
        .await
        .unwrap()
        .contains(&"size_1_name_1".to_string()));
}

#[tokio::test]
async fn bootstrap_runs_again_after_drop() {
    let store = store();
    let people = store.model(&person());

    people.ensure_indexes().await.unwrap();
    people.ensure_indexes().await.unwrap();

    store.drop_collection("test_collection").await.unwrap();
    assert!(store.list_collections().await.unwrap().is_empty());

    people.create(data()).await.unwrap();
    assert!(store
        .list_indexes("test_collection")
        .await
        .unwrap()
        .contains(&"name_text".to_string()));
}

#[tokio::test]
async fn unique_together_is_enforced() {
    let store = store();
    let products = store.model(&product());

    let widget = products.create(doc! { "name": "widget", "size": 1 }).await.unwrap();
    assert!(matches!(widget.get("serial").unwrap(), Bson::String(serial) if !serial.is_empty()));

    products.create(doc! { "name": "widget", "size": 2 }).await.unwrap();

    let err = products.create(doc! { "name": "widget", "size": 1 }).await.unwrap_err();
    assert!(matches!(err, DocmapError::DuplicateKey { ref index, .. } if index == "size_1_name_1"));
}

#[tokio::test]
async fn save_after_projection_writes_only_changed_fields() {
    let store = store();
    let people = store.model(&person());
    let anthony = people.create(data()).await.unwrap();
    let id = anthony.id().unwrap();

    let mut partial = people
        .get_with(doc! { "_id": id }, Projection::include(["name"]))
        .await
        .unwrap();
    partial.set("name", "Tony").unwrap();
    partial.save(&people).await.unwrap();

    let stored = people.get(doc! { "_id": id }).await.unwrap();
    assert_eq!(stored.get("name").unwrap(), &Bson::from("Tony"));
    assert_eq!(stored.get("age").unwrap(), &Bson::Int64(29));
    assert_eq!(stored.get("parents").unwrap(), anthony.get("parents").unwrap());

    let mut loaded = people.get(doc! { "_id": id }).await.unwrap();
    loaded.unset("height").unwrap();
    loaded.save(&people).await.unwrap();

    let raw = people
        .filter(doc! { "_id": id, "height": { "$exists": true } })
        .count(false)
        .await
        .unwrap();
    assert_eq!(raw, 0);
}

#[tokio::test]
async fn records_render_and_decode() {
    #[derive(Debug, Deserialize)]
    struct Person {
        name: String,
        age: i64,
        parents: Vec<String>,
    }

    let store = store();
    let people = store.model(&person());
    let anthony = people.create(data()).await.unwrap();

    let json = anthony.to_json().unwrap();
    assert_eq!(json["_id"], serde_json::Value::String(anthony.id().unwrap().to_hex()));
    assert_eq!(json["name"], serde_json::json!("Anthony"));
    assert!(json["created"].is_string());
    assert_eq!(json["inc"], serde_json::Value::Null);

    let decoded: Person = anthony.decode().unwrap();
    assert_eq!(decoded.name, "Anthony");
    assert_eq!(decoded.age, 29);
    assert_eq!(decoded.parents, vec!["the", "streets"]);

    let rendered = people
        .filter(doc! { "name": "Anthony" })
        .serialize_json()
        .await
        .unwrap();
    assert_eq!(rendered.len(), 1);
    assert!(rendered[0]["_id"].is_string());
    assert!(rendered[0]["created"].is_string());
}

#[tokio::test]
async fn queryset_caches_until_changed() {
    let store = store();
    let people = store.model(&person());
    for inc in 0..3 {
        let mut values = data();
        values.insert("inc", inc);
        people.create(values).await.unwrap();
    }

    let mut queryset = people.filter(doc! { "name": "Anthony" });
    queryset.order_by("inc", SortDirection::Desc);
    assert_eq!(queryset.len().await.unwrap(), 3);
    assert_eq!(
        queryset.first().await.unwrap().unwrap().get("inc").unwrap(),
        &Bson::Int64(2)
    );

    people.create(data()).await.unwrap();
    assert_eq!(queryset.len().await.unwrap(), 3);
    assert_eq!(queryset.count(true).await.unwrap(), 3);
    assert_eq!(queryset.count(false).await.unwrap(), 4);

    queryset.skip(1);
    assert_eq!(queryset.len().await.unwrap(), 3);

    let records = queryset.into_records().await.unwrap();
    assert_eq!(records.len(), 3);
}

#[tokio::test]
async fn lookups_sorts_and_hints() {
    let store = store();
    let people = store.model(&person());
    for (name, age) in [("Anthony", 29), ("Mary", 52), ("John", 41)] {
        people.create(doc! { "name": name, "age": age }).await.unwrap();
    }

    let mut older = people.filter(doc! { "age__gte": 41 });
    older.sort(doc! { "age": 1 });
    let names: Vec<Bson> = older
        .fetch()
        .await
        .unwrap()
        .iter()
        .map(|record| record.get("name").unwrap().clone())
        .collect();
    assert_eq!(names, vec![Bson::from("John"), Bson::from("Mary")]);

    let mut hinted = people.filter(doc! {});
    hinted.hint(Hint::Name("name_text".to_string()));
    assert_eq!(hinted.len().await.unwrap(), 3);

    let mut bad_hint = people.filter(doc! {});
    bad_hint.hint(Hint::Name("missing_1".to_string()));
    assert!(bad_hint.fetch().await.unwrap_err().is_query_error("Person"));

    let mut streamed = people.filter(doc! { "age__lt": 50 });
    let collected: Vec<_> = streamed.stream().collect().await;
    assert_eq!(collected.len(), 2);
    assert!(collected.iter().all(Result::is_ok));
}

#[tokio::test]
async fn invalid_updates_and_projections_are_rejected() {
    let store = store();
    let people = store.model(&person());
    people.create(data()).await.unwrap();

    let mut queryset = people.filter(doc! { "name": "Anthony" });
    let err = queryset.update(doc! { "age": 3 }).await.unwrap_err();
    assert!(matches!(err, DocmapError::InvalidUpdate(_)));

    let err = queryset.update(doc! { "$rename": { "age": "years" } }).await.unwrap_err();
    assert!(err.is_query_error("Person"));

    let err = people
        .get_with(doc! { "name": "Anthony" }, Projection::include(["nickname"]))
        .await
        .unwrap_err();
    assert!(matches!(err, DocmapError::UnknownField { .. }));

    let err = Projection::from_options(Some(vec!["name".into()]), Some(vec!["age".into()])).unwrap_err();
    assert!(matches!(err, DocmapError::InvalidProjection(_)));

    let updated = queryset.update(doc! { "$inc": { "age": 1 } }).await.unwrap();
    assert_eq!(updated[0].get("age").unwrap(), &Bson::Int64(30));

    assert_eq!(people.remove(doc! { "name": "Anthony" }).await.unwrap(), 1);
    assert!(!queryset.exists().await.unwrap());
}

#[tokio::test]
async fn raw_updates_are_coerced_before_writing() {
    let store = store();
    let people = store.model(&person());
    people.create(doc! { "name": "A", "age": 29 }).await.unwrap();

    let mut queryset = people.filter(doc! { "name": "A" });
    let err = queryset.update(doc! { "$set": { "age": "old" } }).await.unwrap_err();
    assert!(matches!(err, DocmapError::InvalidValue { ref field, .. } if field == "age"));

    let err = queryset.update(doc! { "$set": { "nickname": "Tony" } }).await.unwrap_err();
    assert!(matches!(err, DocmapError::UnknownField { ref field, .. } if field == "nickname"));

    assert_eq!(people.filter(doc! { "age": "old" }).count(false).await.unwrap(), 0);
    assert_eq!(people.get(doc! { "name": "A" }).await.unwrap().get("age").unwrap(), &Bson::Int64(29));

    let updated = queryset.update(doc! { "$set": { "age": "31", "height": 2 } }).await.unwrap();
    assert_eq!(updated[0].get("age").unwrap(), &Bson::Int64(31));
    assert_eq!(updated[0].get("height").unwrap(), &Bson::Double(2.0));
}

#[tokio::test]
async fn rejected_field_updates_write_nothing() {
    let store = store();
    let people = store.model(&person());
    people.create(data()).await.unwrap();

    let mut queryset = people.filter(doc! { "name": "Anthony" });
    let err = queryset
        .update_fields(doc! { "age": 40, "not_here": 1000 })
        .await
        .unwrap_err();
    assert!(matches!(err, DocmapError::UnknownField { ref field, .. } if field == "not_here"));

    assert_eq!(people.filter(doc! { "not_here": { "$exists": true } }).count(false).await.unwrap(), 0);
    assert_eq!(people.filter(doc! { "age": 29 }).count(false).await.unwrap(), 1);
}

#[tokio::test]
async fn updated_records_are_fully_hydrated() {
    let store = store();
    let people = store.model(&person());
    people.create(data()).await.unwrap();

    let mut queryset = people
        .filter_with(doc! { "name": "Anthony" }, Projection::exclude(["_id", "height"]))
        .unwrap();
    let mut updated = queryset.update_fields(doc! { "age": 5 }).await.unwrap();
    assert_eq!(updated.len(), 1);
    assert!(updated[0].id().is_some());
    assert_eq!(updated[0].get("height").unwrap(), &Bson::Double(1.76));

    updated[0].set("name", "Tony").unwrap();
    people.save(&mut updated[0]).await.unwrap();

    let saved = people.get(doc! { "name": "Tony" }).await.unwrap();
    assert_eq!(saved.get("age").unwrap(), &Bson::Int64(5));
}

#[tokio::test]
async fn lookups_inside_logical_clauses() {
    let store = store();
    let people = store.model(&person());
    for (name, age) in [("Anthony", 29), ("Mary", 52), ("John", 41)] {
        people.create(doc! { "name": name, "age": age }).await.unwrap();
    }

    let mut either = people.filter(doc! { "$or": [{ "age__gt": 50 }, { "name__eq": "Anthony" }] });
    assert_eq!(either.len().await.unwrap(), 2);
    assert_eq!(either.count(false).await.unwrap(), 2);
}
