//! The same operations against both layouts must select, order and page records identically.

mod common;

use bson::{Bson, doc};
use common::{MODES, adapter, fruits, names, seed_fruits};
use recordlayer::prelude::*;

async fn run_both(def: &CollectionDefinition, rows: &[bson::Document], query: Query) -> [Vec<String>; 2] {
    let mut results: [Vec<String>; 2] = Default::default();

    for (slot, mode) in MODES.into_iter().enumerate() {
        let adapter = adapter(mode).await;
        adapter.initialize_collection(def).await.unwrap();
        for row in rows {
            adapter.create(def, row.clone()).await.unwrap();
        }

        results[slot] = names(&adapter.query(def, query.clone()).await.unwrap());
    }

    results
}

fn produce() -> Vec<bson::Document> {
    vec![
        doc! { "name": "Apple", "price": 1.99, "color": "Red", "organic": true },
        doc! { "name": "banana", "price": 0.99, "color": "yellow" },
        doc! { "name": "Cherry", "color": "red", "organic": false },
        doc! { "name": "Date", "price": 5.99, "organic": true },
        doc! { "name": "Elderberry", "price": 7.99, "color": "Purple" },
        doc! { "name": "Fig", "price": 1.99, "color": "purple" },
    ]
}

#[tokio::test]
async fn filters_agree() {
    let def = fruits();
    let queries = vec![
        (Filter::eq("color", "red"), vec!["Cherry"]),
        (Filter::ieq("color", "RED"), vec!["Apple", "Cherry"]),
        (Filter::icontains("color", "URP"), vec!["Elderberry", "Fig"]),
        (Filter::starts("name", "b"), vec!["banana"]),
        (Filter::istarts("name", "B"), vec!["banana"]),
        (Filter::ends("name", "rry"), vec!["Cherry", "Elderberry"]),
        (Filter::neq("color", "red"), vec!["Apple", "banana", "Elderberry", "Fig"]),
        (Filter::lte("price", 1.99), vec!["Apple", "banana", "Fig"]),
        (Filter::gte("price", "5.99"), vec!["Date", "Elderberry"]),
        (Filter::eq("organic", true), vec!["Apple", "Date"]),
        (Filter::is_null("price", true), vec!["Cherry"]),
        (Filter::is_null("organic", false), vec!["Apple", "Cherry", "Date"]),
        (Filter::contains("price", ".99"), vec!["Apple", "banana", "Date", "Elderberry", "Fig"]),
    ];

    for (condition, expected) in queries {
        let query = Query::builder().filter(condition.clone()).build();
        let [tables, documents] = run_both(&def, &produce(), query).await;

        assert_eq!(tables, expected, "physical tables: {condition:?}");
        assert_eq!(documents, expected, "document store: {condition:?}");
    }
}

#[tokio::test]
async fn conditions_are_conjunctive() {
    let query = Query::builder()
        .filter(Filter::lt("price", 6))
        .filter(Filter::icontains("name", "e"))
        .build();

    let [tables, documents] = run_both(&fruits(), &produce(), query).await;
    assert_eq!(tables, vec!["Apple", "Date"]);
    assert_eq!(documents, tables);
}

#[tokio::test]
async fn sorting_agrees_with_nulls_first() {
    let cases = vec![
        (
            Query::builder().sort("price", SortDirection::Asc).build(),
            vec!["Cherry", "banana", "Apple", "Fig", "Date", "Elderberry"],
        ),
        (
            Query::builder().sort("price", SortDirection::Desc).build(),
            vec!["Cherry", "Elderberry", "Date", "Apple", "Fig", "banana"],
        ),
        (
            Query::builder()
                .sort("price", SortDirection::Desc)
                .sort("name", SortDirection::Desc)
                .build(),
            vec!["Cherry", "Elderberry", "Date", "Fig", "Apple", "banana"],
        ),
        (
            Query::builder().sort("organic", SortDirection::Asc).build(),
            vec!["banana", "Elderberry", "Fig", "Cherry", "Apple", "Date"],
        ),
        (
            Query::builder().sort("name", SortDirection::Asc).build(),
            vec!["Apple", "Cherry", "Date", "Elderberry", "Fig", "banana"],
        ),
    ];

    for (query, expected) in cases {
        let [tables, documents] = run_both(&fruits(), &produce(), query.clone()).await;

        assert_eq!(tables, expected, "physical tables: {:?}", query.sort);
        assert_eq!(documents, expected, "document store: {:?}", query.sort);
    }
}

#[tokio::test]
async fn pagination_agrees() {
    for mode in MODES {
        let adapter = adapter(mode).await;
        let def = seed_fruits(adapter.as_ref()).await;

        let page = adapter
            .query(
                &def,
                Query::builder()
                    .sort("price", SortDirection::Asc)
                    .pagination(Pagination::new(2, 2).unwrap())
                    .build(),
            )
            .await
            .unwrap();

        assert_eq!(names(&page), vec!["Cherry", "Date"], "{mode}");
        assert_eq!(page.metadata.total_count, 5, "{mode}");
        assert_eq!(page.metadata.total_pages, 3, "{mode}");
        assert!(page.metadata.has_next(), "{mode}");
        assert!(page.metadata.has_previous(), "{mode}");

        let beyond = adapter
            .query(&def, Query::builder().pagination(Pagination::new(9, 2).unwrap()).build())
            .await
            .unwrap();

        assert!(beyond.is_empty(), "{mode}");
        assert_eq!(beyond.metadata.total_count, 5, "{mode}");
        assert_eq!(beyond.metadata.page, 9, "{mode}");
        assert!(!beyond.metadata.has_next(), "{mode}");

        let empty = adapter
            .query(&def, Query::builder().filter(Filter::gt("price", 100)).build())
            .await
            .unwrap();

        assert!(empty.is_empty(), "{mode}");
        assert_eq!(empty.metadata.total_pages, 0, "{mode}");
    }
}

#[tokio::test]
async fn projection_keeps_system_fields() {
    for mode in MODES {
        let adapter = adapter(mode).await;
        let def = seed_fruits(adapter.as_ref()).await;

        let result = adapter
            .query(
                &def,
                Query::builder()
                    .filter(Filter::eq("name", "Apple"))
                    .fields(["price"])
                    .build(),
            )
            .await
            .unwrap();

        let apple = &result.records[0];
        assert_eq!(apple.data, doc! { "price": 1.99 }, "{mode}");
        assert!(!apple.id.to_string().is_empty(), "{mode}");
    }
}

#[tokio::test]
async fn unknown_fields_are_invalid_queries() {
    for mode in MODES {
        let adapter = adapter(mode).await;
        let def = seed_fruits(adapter.as_ref()).await;

        for query in [
            Query::builder().filter(Filter::eq("weight", 1)).build(),
            Query::builder().sort("weight", SortDirection::Asc).build(),
            Query::builder().fields(["weight"]).build(),
        ] {
            assert!(
                matches!(adapter.query(&def, query).await, Err(StoreError::InvalidQuery(_))),
                "{mode}"
            );
        }
    }
}

#[tokio::test]
async fn system_timestamps_are_filterable_and_sortable() {
    for mode in MODES {
        let adapter = adapter(mode).await;
        let def = seed_fruits(adapter.as_ref()).await;

        let newest_first = adapter
            .query(&def, Query::builder().sort("created_at", SortDirection::Desc).build())
            .await
            .unwrap();
        let apple = newest_first
            .records
            .iter()
            .find(|record| record.get("name") == Some(&Bson::String("Apple".into())))
            .unwrap();

        let since_apple = adapter
            .query(
                &def,
                Query::builder()
                    .filter(Filter::gte("created_at", Bson::DateTime(bson::DateTime::from_chrono(apple.created_at))))
                    .build(),
            )
            .await
            .unwrap();

        assert_eq!(since_apple.metadata.total_count, 5, "{mode}");
        assert_eq!(
            names(&newest_first).last().map(String::as_str),
            Some("Apple"),
            "{mode}"
        );
    }
}

fn counters() -> CollectionDefinition {
    CollectionDefinition::builder("counters")
        .field(FieldDefinition::new("name", FieldType::String).nullable(false))
        .field(FieldDefinition::new("hits", FieldType::Long).unique())
        .build()
        .unwrap()
}

#[tokio::test]
async fn longs_beyond_double_precision_stay_distinct() {
    let def = counters();
    let rows = vec![
        doc! { "name": "low", "hits": 9_007_199_254_740_992_i64 },
        doc! { "name": "high", "hits": 9_007_199_254_740_993_i64 },
    ];

    let cases = vec![
        (Query::builder().filter(Filter::eq("hits", 9_007_199_254_740_993_i64)).build(), vec!["high"]),
        (Query::builder().filter(Filter::gt("hits", 9_007_199_254_740_992_i64)).build(), vec!["high"]),
        (Query::builder().filter(Filter::lte("hits", "9007199254740992")).build(), vec!["low"]),
        (Query::builder().sort("hits", SortDirection::Desc).build(), vec!["high", "low"]),
    ];

    for (query, expected) in cases {
        let [tables, documents] = run_both(&def, &rows, query.clone()).await;

        assert_eq!(tables, expected, "physical tables: {:?} {:?}", query.filters, query.sort);
        assert_eq!(documents, expected, "document store: {:?} {:?}", query.filters, query.sort);
    }

    for mode in MODES {
        let adapter = adapter(mode).await;
        adapter.initialize_collection(&def).await.unwrap();
        for row in &rows {
            adapter.create(&def, row.clone()).await.unwrap();
        }

        let duplicate = adapter
            .create(&def, doc! { "name": "again", "hits": 9_007_199_254_740_993_i64 })
            .await
            .unwrap_err();
        assert!(matches!(duplicate, StoreError::UniqueConstraintViolation { .. }), "{mode}");
        assert!(
            adapter
                .is_unique(&def, "hits", &Bson::Int64(9_007_199_254_740_994), None)
                .await
                .unwrap(),
            "{mode}"
        );
    }
}

#[tokio::test]
async fn text_operators_see_doubles_as_sql_renders_them() {
    let rows = vec![
        doc! { "name": "Sum", "price": 0.1 + 0.2 },
        doc! { "name": "Huge", "price": 1e15 },
        doc! { "name": "Tiny", "price": 1.5e-7 },
        doc! { "name": "Whole", "price": 5.0 },
        doc! { "name": "Third", "price": 1.0 / 3.0 },
    ];

    let queries = vec![
        (Filter::contains("price", "0000000"), vec![]),
        (Filter::eq("price", 0.3), vec![]),
        (Filter::ieq("price", "0.3"), vec!["Sum"]),
        (Filter::ieq("price", "1.0E+15"), vec!["Huge"]),
        (Filter::ends("price", "e-07"), vec!["Tiny"]),
        (Filter::ends("price", ".0"), vec!["Whole"]),
        (Filter::contains("price", ".0"), vec!["Huge", "Whole"]),
        (Filter::ieq("price", "0.333333333333333"), vec!["Third"]),
    ];

    for (condition, expected) in queries {
        let query = Query::builder().filter(condition.clone()).build();
        let [tables, documents] = run_both(&fruits(), &rows, query).await;

        assert_eq!(tables, expected, "physical tables: {condition:?}");
        assert_eq!(documents, expected, "document store: {condition:?}");
    }
}

#[tokio::test]
async fn json_values_compare_as_their_text() {
    let def = CollectionDefinition::builder("labels")
        .field(FieldDefinition::new("name", FieldType::String).nullable(false))
        .field(FieldDefinition::new("payload", FieldType::Json))
        .build()
        .unwrap();
    let rows = vec![
        doc! { "name": "ten", "payload": 10 },
        doc! { "name": "nine", "payload": 9 },
        doc! { "name": "letter", "payload": "a" },
        doc! { "name": "object", "payload": { "k": 1 } },
        doc! { "name": "missing" },
    ];

    let cases = vec![
        (
            Query::builder().sort("payload", SortDirection::Asc).build(),
            vec!["missing", "letter", "ten", "nine", "object"],
        ),
        (
            Query::builder().sort("payload", SortDirection::Desc).build(),
            vec!["missing", "object", "nine", "ten", "letter"],
        ),
        (Query::builder().filter(Filter::eq("payload", 10)).build(), vec!["ten"]),
        (Query::builder().filter(Filter::contains("payload", "a")).build(), vec!["letter"]),
        (Query::builder().filter(Filter::gt("payload", 9)).build(), vec!["object"]),
    ];

    for (query, expected) in cases {
        let [tables, documents] = run_both(&def, &rows, query.clone()).await;

        assert_eq!(tables, expected, "physical tables: {:?} {:?}", query.filters, query.sort);
        assert_eq!(documents, expected, "document store: {:?} {:?}", query.filters, query.sort);
    }

    for mode in MODES {
        let adapter = adapter(mode).await;
        adapter.initialize_collection(&def).await.unwrap();
        let ten = adapter.create(&def, rows[0].clone()).await.unwrap();
        let letter = adapter.create(&def, rows[2].clone()).await.unwrap();

        let fetched = adapter.get_by_id(&def, ten.id).await.unwrap().unwrap();
        assert_eq!(fetched.get("payload"), Some(&Bson::Int32(10)), "{mode}");
        let fetched = adapter.get_by_id(&def, letter.id).await.unwrap().unwrap();
        assert_eq!(fetched.get("payload"), Some(&Bson::String("a".into())), "{mode}");
    }
}

#[tokio::test]
async fn unaddressable_pages_are_empty() {
    for mode in MODES {
        let adapter = adapter(mode).await;
        let def = seed_fruits(adapter.as_ref()).await;

        let result = adapter
            .query(
                &def,
                Query::builder()
                    .sort("price", SortDirection::Asc)
                    .pagination(Pagination::new(usize::MAX / 2, 1000).unwrap())
                    .build(),
            )
            .await
            .unwrap();

        assert!(result.is_empty(), "{mode}");
        assert_eq!(result.metadata.total_count, 5, "{mode}");
        assert_eq!(result.metadata.page, usize::MAX / 2, "{mode}");
        assert!(!result.metadata.has_next(), "{mode}");
    }
}
