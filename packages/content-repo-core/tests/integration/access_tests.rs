//! Collection and field access rules.

use ntest::timeout;
use serde_json::json;

use content_repo_core::store::Filter;
use content_repo_core::{
    AccessDecision, AccessRule, CollectionAccess, CollectionDefinition, FieldDefinition,
    FieldRule, FindOptions, RepoConfig, RepoError, Repository, RequestContext,
};

use super::helpers::{id_of, row_count};

fn staff_repo() -> Repository {
    Repository::builder(RepoConfig::default())
        .collection(
            CollectionDefinition::new("staff")
                .field(FieldDefinition::text("name").required())
                .field(
                    FieldDefinition::integer("salary")
                        .read_access(FieldRule::Role("hr".into()))
                        .write_access(FieldRule::Role("hr".into())),
                )
                .field(FieldDefinition::text("passwordHash").hidden())
                .versioned(),
        )
        .build()
        .unwrap()
}

/// An unreadable field is absent from single, list and history reads, and
/// writing it fails naming the field.
#[timeout(5000)]
#[test]
fn test_field_access_symmetry() {
    let repo = staff_repo();
    let staff = repo.collection("staff").unwrap();
    let hr = RequestContext::user("u-hr", &["hr"]);
    let guest = RequestContext::user("u-guest", &[]);

    let created = staff
        .create(&hr, json!({"name": "Dana", "salary": 5000, "passwordHash": "x"}))
        .unwrap();
    let id = id_of(&created);
    assert_eq!(created["salary"], json!(5000));
    assert!(!created.contains_key("passwordHash"));

    let single = staff.find_by_id(&guest, &id, &FindOptions::new()).unwrap().unwrap();
    assert!(!single.contains_key("salary"));
    let list = staff.find(&guest, &FindOptions::new()).unwrap();
    assert!(list.iter().all(|r| !r.contains_key("salary")));
    let history = staff.find_versions(&guest, &id).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history.iter().all(|r| !r.contains_key("salary")));

    let err = staff
        .update_by_id(&guest, &id, json!({"name": "Dana K.", "salary": 9000}))
        .unwrap_err();
    assert_eq!(
        err,
        RepoError::FieldAccessDenied {
            collection: "staff".into(),
            field: "salary".into()
        }
    );
    assert_eq!(staff.find_versions(&hr, &id).unwrap().len(), 1);

    let visible = staff.find_by_id(&hr, &id, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(visible["salary"], json!(5000));
    assert_eq!(visible["name"], json!("Dana"));
    assert!(!visible.contains_key("passwordHash"));

    let updated = staff.update_by_id(&guest, &id, json!({"name": "Dana K."})).unwrap();
    assert!(!updated.contains_key("salary"));
}

/// The system context bypasses field rules.
#[timeout(5000)]
#[test]
fn test_system_bypass() {
    let repo = staff_repo();
    let staff = repo.collection("staff").unwrap();
    let system = RequestContext::system();
    let record = staff.create(&system, json!({"name": "Root", "salary": 1})).unwrap();
    assert_eq!(record["salary"], json!(1));
    let err = staff
        .create(&RequestContext::anonymous(), json!({"name": "Eve", "salary": 1}))
        .unwrap_err();
    assert!(err.is_access_denied());
    assert_eq!(row_count(&repo, "staff"), 1);
}

fn articles_repo() -> Repository {
    let read = AccessRule::check(|ctx| {
        if ctx.has_role("editor") {
            AccessDecision::Allow
        } else {
            AccessDecision::Where(Filter::eq("status", "published"))
        }
    });
    let owner = AccessRule::check(|ctx| match &ctx.user {
        Some(user) => AccessDecision::Where(Filter::Eq("ownerId".into(), user.id.clone())),
        None => AccessDecision::Deny,
    });
    Repository::builder(RepoConfig::default())
        .collection(
            CollectionDefinition::new("articles")
                .field(FieldDefinition::text("title"))
                .field(FieldDefinition::text("status").default_value("draft"))
                .field(FieldDefinition::text("ownerId"))
                .access(CollectionAccess {
                    create: AccessRule::role("editor"),
                    read,
                    update: owner,
                    delete: AccessRule::Deny,
                }),
        )
        .build()
        .unwrap()
}

/// Collection read filters hide records the way a missing record looks.
#[timeout(5000)]
#[test]
fn test_collection_rules() {
    let repo = articles_repo();
    let articles = repo.collection("articles").unwrap();
    let editor = RequestContext::user("ed", &["editor"]);
    let guest = RequestContext::anonymous();

    let draft = id_of(
        &articles
            .create(&editor, json!({"title": "Soon", "ownerId": "ed"}))
            .unwrap(),
    );
    let live = id_of(
        &articles
            .create(&editor, json!({"title": "Out", "status": "published", "ownerId": "ed"}))
            .unwrap(),
    );

    assert!(articles.find_by_id(&guest, &draft, &FindOptions::new()).unwrap().is_none());
    assert!(articles.find_by_id(&guest, &live, &FindOptions::new()).unwrap().is_some());
    assert_eq!(articles.count(&guest, None).unwrap(), 1);
    assert_eq!(articles.count(&editor, None).unwrap(), 2);
    assert_eq!(
        articles
            .count(&editor, Some(&json!({"status": "draft"})))
            .unwrap(),
        1
    );

    let err = articles.create(&guest, json!({"title": "Nope"})).unwrap_err();
    assert!(matches!(err, RepoError::AccessDenied { ref operation, .. } if operation == "create"));

    // someone else's record is simply not found
    let other = RequestContext::user("mallory", &["editor"]);
    let err = articles
        .update_by_id(&other, &draft, json!({"title": "Mine"}))
        .unwrap_err();
    assert!(err.is_not_found());
    let updated = articles
        .update_by_id(&editor, &draft, json!({"title": "Later"}))
        .unwrap();
    assert_eq!(updated["title"], json!("Later"));

    // bulk updates skip records outside the update filter
    let changed = articles
        .update(&other, &json!({"status": "published"}), json!({"title": "Hijacked"}))
        .unwrap();
    assert!(changed.is_empty());

    let err = articles.delete(&editor, &live).unwrap_err();
    assert!(err.is_access_denied());
    articles.delete(&RequestContext::system(), &live).unwrap();
    assert_eq!(articles.count(&guest, None).unwrap(), 0);
}

/// Unknown attributes, read-only fields and primary keys are rejected before
/// anything is written.
#[timeout(5000)]
#[test]
fn test_payload_rejections() {
    let repo = Repository::builder(RepoConfig::default())
        .collection(
            CollectionDefinition::new("products")
                .field(FieldDefinition::text("sku").primary_key())
                .field(FieldDefinition::integer("price").required())
                .field(FieldDefinition::text("slug").read_only())
                .field(FieldDefinition::virtual_field("label", |record| {
                    json!(format!("{} ({})", record["sku"].as_str().unwrap_or(""), record["price"]))
                })),
        )
        .build()
        .unwrap();
    let ctx = RequestContext::anonymous();
    let products = repo.collection("products").unwrap();

    let created = products.create(&ctx, json!({"sku": "A-1", "price": 10})).unwrap();
    assert_eq!(created["label"], json!("A-1 (10)"));

    for (payload, field) in [
        (json!({"sku": "A-2", "price": 1, "colour": "red"}), "colour"),
        (json!({"sku": "A-2", "price": 1, "slug": "a"}), "slug"),
        (json!({"sku": "A-2", "price": 1, "label": "x"}), "label"),
        (json!({"sku": "A-2"}), "price"),
        (json!({"sku": "A-2", "price": "ten"}), "price"),
    ] {
        let err = products.create(&ctx, payload).unwrap_err();
        assert!(
            matches!(err, RepoError::Validation { field: ref f, .. } if f == field),
            "{err:?}"
        );
    }
    let err = products
        .update_by_id(&ctx, &json!("A-1"), json!({"sku": "B-1"}))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "sku"));
    assert_eq!(row_count(&repo, "products"), 1);
}
