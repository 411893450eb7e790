//! Localized reads and writes: fallback, fallback strategies and nested
//! overrides.

use ntest::timeout;
use serde_json::{json, Value};

use content_repo_core::store::Direction;
use content_repo_core::{FallbackStrategy, FindOptions, RepoError, RequestContext};

use super::helpers::{barbers_repo, id_of, row_count};

fn bio_en() -> Value {
    json!({"type": "doc", "content": [{"type": "paragraph", "text": "Twenty years of fades"}]})
}

fn bio_sk() -> Value {
    json!({"type": "doc", "content": [{"type": "heading", "text": "Dvadsat rokov"}, {"type": "paragraph"}]})
}

/// Default-locale create, `sk` update, reads in en, sk and the unconfigured de.
#[timeout(5000)]
#[test]
fn test_barbers_locale_scenario() {
    for strategy in [FallbackStrategy::AliasedJoin, FallbackStrategy::Subquery] {
        let repo = barbers_repo(strategy);
        let barbers = repo.collection("barbers").unwrap();
        let en = RequestContext::anonymous();
        let sk = RequestContext::anonymous().with_locale("sk");
        let de = RequestContext::anonymous().with_locale("de");

        let created = barbers
            .create(&en, json!({"name": "Marek", "bio": bio_en()}))
            .unwrap();
        let id = id_of(&created);
        assert_eq!(created["bio"], bio_en());

        barbers.update_by_id(&sk, &id, json!({"bio": bio_sk()})).unwrap();

        let read = |ctx: &RequestContext| {
            barbers
                .find_by_id(ctx, &id, &FindOptions::new())
                .unwrap()
                .expect("record visible")
        };
        assert_eq!(read(&en)["bio"], bio_en(), "{strategy:?}");
        assert_eq!(read(&sk)["bio"], bio_sk(), "{strategy:?}");
        assert_eq!(read(&de)["bio"], bio_en(), "{strategy:?}");
        assert_eq!(read(&de)["name"], json!("Marek"));
    }
}

/// Without fallback a locale with no row reads as null.
#[timeout(5000)]
#[test]
fn test_fallback_disabled() {
    let repo = barbers_repo(FallbackStrategy::AliasedJoin);
    let barbers = repo.collection("barbers").unwrap();
    let created = barbers
        .create(&RequestContext::anonymous(), json!({"name": "Ivan", "bio": bio_en()}))
        .unwrap();
    let id = id_of(&created);

    let sk = RequestContext::anonymous().with_locale("sk");
    let fallback = barbers.find_by_id(&sk, &id, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(fallback["bio"], bio_en());

    let strict = sk.without_fallback();
    let record = barbers.find_by_id(&strict, &id, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(record["bio"], Value::Null);
    assert_eq!(record["name"], json!("Ivan"));
}

/// A record created in `sk` also seeds the default locale.
#[timeout(5000)]
#[test]
fn test_create_in_secondary_locale() {
    let repo = barbers_repo(FallbackStrategy::Subquery);
    let barbers = repo.collection("barbers").unwrap();
    let sk = RequestContext::anonymous().with_locale("sk");
    let created = barbers.create(&sk, json!({"name": "Jana", "bio": bio_sk()})).unwrap();
    let id = id_of(&created);
    assert_eq!(row_count(&repo, "barbers_i18n"), 2);

    let de = RequestContext::anonymous().with_locale("de");
    let record = barbers.find_by_id(&de, &id, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(record["bio"], bio_sk());

    let strict = de.without_fallback();
    let record = barbers.find_by_id(&strict, &id, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(record["bio"], Value::Null);
}

/// Both strategies return identical list reads.
#[timeout(5000)]
#[test]
fn test_strategies_produce_identical_lists() {
    let mut results = Vec::new();
    for strategy in [FallbackStrategy::AliasedJoin, FallbackStrategy::Subquery] {
        let repo = barbers_repo(strategy);
        let barbers = repo.collection("barbers").unwrap();
        let en = RequestContext::anonymous();
        let sk = RequestContext::anonymous().with_locale("sk");
        for (name, translated) in [("Adam", true), ("Boris", false), ("Cyril", true)] {
            let record = barbers
                .create(&en, json!({"name": name, "bio": {"text": format!("{name} en")}}))
                .unwrap();
            if translated {
                barbers
                    .update_by_id(&sk, &id_of(&record), json!({"bio": {"text": format!("{name} sk")}}))
                    .unwrap();
            }
        }
        let mut contexts = vec![sk.clone(), sk.clone().without_fallback()];
        contexts.push(RequestContext::anonymous().with_locale("de"));
        let mut reads = Vec::new();
        for ctx in &contexts {
            let options = FindOptions::new().order_by("name", Direction::Asc);
            let bios: Vec<Value> = barbers
                .find(ctx, &options)
                .unwrap()
                .into_iter()
                .map(|record| record["bio"].clone())
                .collect();
            reads.push(bios);
        }
        results.push(reads);
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(
        results[0][0],
        vec![
            json!({"text": "Adam sk"}),
            json!({"text": "Boris en"}),
            json!({"text": "Cyril sk"})
        ]
    );
    assert_eq!(results[0][1][1], Value::Null);
}

/// Nested fields keep their structure in Main and merge per-locale fragments.
#[timeout(5000)]
#[test]
fn test_nested_overrides() {
    let repo = barbers_repo(FallbackStrategy::AliasedJoin);
    let barbers = repo.collection("barbers").unwrap();
    let en = RequestContext::anonymous();
    let sk = RequestContext::anonymous().with_locale("sk");
    let layout = json!({"hero": {"title": "Hi", "image": "a.png"}});
    let created = barbers.create(&en, json!({"name": "Eva", "layout": layout})).unwrap();
    let id = id_of(&created);

    barbers
        .update_by_id(&sk, &id, json!({"layout": {"hero": {"title": "Ahoj"}}}))
        .unwrap();

    let read = |ctx: &RequestContext| {
        barbers.find_by_id(ctx, &id, &FindOptions::new()).unwrap().unwrap()["layout"].clone()
    };
    assert_eq!(read(&sk), json!({"hero": {"title": "Ahoj", "image": "a.png"}}));
    assert_eq!(read(&en), layout);
    assert_eq!(read(&RequestContext::anonymous().with_locale("de")), layout);
    assert_eq!(
        read(&RequestContext::anonymous().with_locale("de").without_fallback()),
        Value::Null
    );

    // default-locale writes replace the base
    barbers
        .update_by_id(&en, &id, json!({"layout": {"hero": {"title": "Hello", "image": "b.png"}}}))
        .unwrap();
    assert_eq!(read(&sk), json!({"hero": {"title": "Ahoj", "image": "b.png"}}));
}

/// Writes in a locale outside the configured set are rejected.
#[timeout(5000)]
#[test]
fn test_unconfigured_write_locale() {
    let repo = barbers_repo(FallbackStrategy::AliasedJoin);
    let barbers = repo.collection("barbers").unwrap();
    let de = RequestContext::anonymous().with_locale("de");
    let err = barbers.create(&de, json!({"name": "Otto"})).unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "locale"));
    assert_eq!(row_count(&repo, "barbers"), 0);
}
