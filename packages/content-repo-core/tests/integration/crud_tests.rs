//! Listing, counting, soft delete, globals, uploads and repository assembly.

use std::io::Write;
use std::sync::Arc;

use ntest::timeout;
use serde_json::{json, Value};

use content_repo_core::relation::RelationConfig;
use content_repo_core::schema::{FieldType, Operator};
use content_repo_core::store::{Column, ColumnType, Direction};
use content_repo_core::upload::PublicUrlDriver;
use content_repo_core::{
    AccessRule, BuilderExtension, CollectionDefinition, CollectionsFile, FieldDefinition,
    FindOptions, GlobalDefinition, IdStrategy, RepoConfig, RepoError, Repository,
    RepositoryBuilder, RequestContext, VersionRef,
};

use super::helpers::{id_of, row_count};

fn tickets_repo() -> Repository {
    Repository::builder(RepoConfig {
        id_strategy: IdStrategy::Serial,
        ..RepoConfig::default()
    })
    .collection(
        CollectionDefinition::new("tickets")
            .field(FieldDefinition::text("subject").required())
            .field(FieldDefinition::integer("priority").default_value(3))
            .field(FieldDefinition::select("status", &["open", "closed"]).default_value("open"))
            .soft_delete(),
    )
    .build()
    .unwrap()
}

/// Filters, ordering and pagination over live records.
#[timeout(5000)]
#[test]
fn test_find_filter_order_paginate() {
    let repo = tickets_repo();
    let tickets = repo.collection("tickets").unwrap();
    let ctx = RequestContext::anonymous();
    for (subject, priority) in [("disk", 5), ("login", 1), ("mail", 3), ("vpn", 4)] {
        tickets
            .create(&ctx, json!({"subject": subject, "priority": priority}))
            .unwrap();
    }

    let options = FindOptions::new()
        .filter(json!({"priority": {"gte": 3}}))
        .order_by("priority", Direction::Desc);
    let subjects: Vec<Value> = tickets
        .find(&ctx, &options)
        .unwrap()
        .into_iter()
        .map(|r| r["subject"].clone())
        .collect();
    assert_eq!(subjects, vec![json!("disk"), json!("vpn"), json!("mail")]);

    let page = tickets
        .find(&ctx, &FindOptions::new().order_by("subject", Direction::Asc).offset(1).limit(2))
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["subject"], json!("login"));
    assert_eq!(page[1]["subject"], json!("mail"));

    let first = tickets
        .find_one(&ctx, &FindOptions::new().filter(json!({"subject": {"like": "v%"}})))
        .unwrap()
        .unwrap();
    assert_eq!(first["subject"], json!("vpn"));
    assert_eq!(first["status"], json!("open"));
    assert!(first["id"].is_i64());

    let err = tickets
        .find(&ctx, &FindOptions::new().filter(json!({"status": {"gt": "a"}})))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "status"));
}

/// Soft-deleted records leave reads and counts until restored.
#[timeout(5000)]
#[test]
fn test_soft_delete_and_restore() {
    let repo = tickets_repo();
    let tickets = repo.collection("tickets").unwrap();
    let ctx = RequestContext::anonymous();
    let ids: Vec<Value> = ["a", "b", "c"]
        .iter()
        .map(|s| id_of(&tickets.create(&ctx, json!({"subject": s})).unwrap()))
        .collect();

    let deleted = tickets.delete(&ctx, &ids[1]).unwrap();
    assert_eq!(deleted["subject"], json!("b"));
    assert_eq!(tickets.count(&ctx, None).unwrap(), 2);
    assert!(tickets.find_by_id(&ctx, &ids[1], &FindOptions::new()).unwrap().is_none());
    assert_eq!(row_count(&repo, "tickets"), 3);

    let all = tickets.find(&ctx, &FindOptions::new().include_deleted()).unwrap();
    assert_eq!(all.len(), 3);
    assert!(!all[1]["deletedAt"].is_null());

    assert!(tickets.delete(&ctx, &ids[1]).unwrap_err().is_not_found());

    let restored = tickets.restore(&ctx, &ids[1]).unwrap();
    assert!(restored["deletedAt"].is_null());
    assert_eq!(tickets.count(&ctx, None).unwrap(), 3);

    let err = tickets.restore(&ctx, &ids[0]).unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "deletedAt"));
}

/// Bulk update touches every match in one call.
#[timeout(5000)]
#[test]
fn test_bulk_update_and_count() {
    let repo = tickets_repo();
    let tickets = repo.collection("tickets").unwrap();
    let ctx = RequestContext::anonymous();
    for priority in [1, 2, 5, 5] {
        tickets
            .create(&ctx, json!({"subject": "s", "priority": priority}))
            .unwrap();
    }
    let updated = tickets
        .update(&ctx, &json!({"priority": 5}), json!({"status": "closed"}))
        .unwrap();
    assert_eq!(updated.len(), 2);
    assert!(updated.iter().all(|r| r["status"] == json!("closed")));
    assert_eq!(tickets.count(&ctx, Some(&json!({"status": "open"}))).unwrap(), 2);
    assert_eq!(
        tickets
            .count(&ctx, Some(&json!({"OR": [{"priority": 1}, {"status": "closed"}]})))
            .unwrap(),
        3
    );

    let err = tickets
        .update(&ctx, &json!({"priority": 1}), json!({"status": "pending"}))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "status"));
    assert_eq!(tickets.count(&ctx, Some(&json!({"status": "open"}))).unwrap(), 2);
}

/// A global starts empty, is created on first update and keeps one record.
#[timeout(5000)]
#[test]
fn test_global_lifecycle() {
    let repo = Repository::builder(RepoConfig::default())
        .global(
            GlobalDefinition::new("settings")
                .field(FieldDefinition::text("siteName"))
                .field(FieldDefinition::text("tagline").localized())
                .versioned()
                .update_access(AccessRule::role("admin")),
        )
        .build()
        .unwrap();
    let settings = repo.global("settings").unwrap();
    let admin = RequestContext::user("root", &["admin"]);
    let guest = RequestContext::anonymous();

    assert!(settings.get(&guest, None).unwrap().is_none());
    assert!(settings.find_versions(&guest).unwrap().is_empty());
    assert!(settings.revert_to_version(&admin, VersionRef::Number(1)).unwrap_err().is_not_found());

    settings
        .update(&admin, json!({"siteName": "Barbershop", "tagline": "Sharp"}))
        .unwrap();
    settings.update(&admin, json!({"siteName": "Barber & Co"})).unwrap();
    assert_eq!(row_count(&repo, "settings"), 1);

    let current = settings.get(&guest, None).unwrap().unwrap();
    assert_eq!(current["siteName"], json!("Barber & Co"));
    assert_eq!(current["tagline"], json!("Sharp"));
    assert_eq!(settings.find_versions(&guest).unwrap().len(), 2);

    let err = settings.update(&guest, json!({"siteName": "Hacked"})).unwrap_err();
    assert!(err.is_access_denied());

    let reverted = settings.revert_to_version(&admin, VersionRef::Number(1)).unwrap();
    assert_eq!(reverted["siteName"], json!("Barbershop"));
    assert!(repo.collection("settings").is_err());
}

/// Upload fields store the file tuple; URLs come from the storage driver.
#[timeout(5000)]
#[test]
fn test_upload_urls() {
    let repo = Repository::builder(RepoConfig::default())
        .collection(CollectionDefinition::new("media").field(FieldDefinition::upload("file")))
        .storage_driver(Arc::new(PublicUrlDriver::new("https://cdn.example.com")))
        .build()
        .unwrap();
    let media = repo.collection("media").unwrap();
    let ctx = RequestContext::anonymous();

    let public = media
        .create(&ctx, json!({"file": {"key": "img/cut.png", "filename": "cut.png", "size": 2048}}))
        .unwrap();
    assert_eq!(public["file"]["url"], json!("https://cdn.example.com/img/cut.png"));
    assert_eq!(public["file"]["size"], json!(2048));

    let private = media
        .create(
            &ctx,
            json!({"file": {"key": "cv.pdf", "filename": "cv.pdf", "size": 10, "visibility": "private"}}),
        )
        .unwrap();
    assert!(private["file"].get("url").is_none());

    let err = media.create(&ctx, json!({"file": {"key": "x"}})).unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "file"));
}

/// Lowercase slug type contributed by an extension.
struct SlugType;

impl FieldType for SlugType {
    fn name(&self) -> &str {
        "slug"
    }

    fn to_columns(&self, field: &FieldDefinition, _relation: Option<&RelationConfig>) -> Vec<Column> {
        vec![Column::new(&field.name, ColumnType::Text)]
    }

    fn validate(&self, _field: &FieldDefinition, value: &Value) -> Result<(), String> {
        match value.as_str() {
            Some(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c == '-') => Ok(()),
            _ => Err("expected a lowercase slug".into()),
        }
    }

    fn operators(&self) -> &[Operator] {
        &[Operator::Eq, Operator::Like]
    }
}

struct SlugExtension;

impl BuilderExtension for SlugExtension {
    fn name(&self) -> &str {
        "slugs"
    }

    fn extend(&self, builder: &mut RepositoryBuilder) -> content_repo_core::Result<()> {
        builder.register_field_type(Arc::new(SlugType))?;
        if let Some(pages) = builder.collection_mut("pages") {
            pages.fields.push(FieldDefinition::new("slug", "slug"));
        }
        Ok(())
    }
}

/// Extensions add field types and fields at build time, once.
#[timeout(5000)]
#[test]
fn test_extension_field_type() {
    let repo = Repository::builder(RepoConfig::default())
        .collection(CollectionDefinition::new("pages").field(FieldDefinition::text("heading")))
        .extension(Arc::new(SlugExtension))
        .extension(Arc::new(SlugExtension))
        .build()
        .unwrap();
    let pages = repo.collection("pages").unwrap();
    let ctx = RequestContext::anonymous();
    pages
        .create(&ctx, json!({"heading": "About", "slug": "about-us"}))
        .unwrap();
    let err = pages
        .create(&ctx, json!({"heading": "Bad", "slug": "Not A Slug"}))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "slug"));
    assert_eq!(pages.count(&ctx, Some(&json!({"slug": {"like": "about%"}}))).unwrap(), 1);

    let unknown = Repository::builder(RepoConfig::default())
        .collection(CollectionDefinition::new("pages").field(FieldDefinition::new("slug", "slug")))
        .build()
        .unwrap_err();
    assert!(matches!(unknown, RepoError::UnknownFieldType { ref kind, .. } if kind == "slug"));
}

/// A collections file on disk builds a working repository.
#[timeout(5000)]
#[test]
fn test_collections_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let contents = json!({
        "config": {"locales": ["en", "sk"], "id_strategy": "serial"},
        "collections": [
            {
                "name": "services",
                "title": "label",
                "softDelete": true,
                "versioning": "plain",
                "fields": [
                    {"name": "label", "type": "text", "required": true, "localized": true},
                    {"name": "minutes", "type": "integer", "default": 30},
                    {"name": "barber", "relation": {"target": "barbers"}}
                ]
            },
            {"name": "barbers", "fields": [{"name": "name", "type": "text"}]}
        ]
    });
    write!(file, "{contents}").unwrap();

    let repo = CollectionsFile::from_json_file(file.path())
        .unwrap()
        .build()
        .unwrap();
    let services = repo.collection("services").unwrap();
    let ctx = RequestContext::anonymous();
    let barber = id_of(
        &repo
            .collection("barbers")
            .unwrap()
            .create(&ctx, json!({"name": "Marek"}))
            .unwrap(),
    );
    let created = services
        .create(&ctx, json!({"label": "Fade", "barber": barber}))
        .unwrap();
    assert_eq!(created["minutes"], json!(30));
    assert_eq!(services.title_of(&created), Some(&json!("Fade")));
    assert_eq!(services.find_versions(&ctx, &id_of(&created)).unwrap().len(), 1);

    let missing = CollectionsFile::from_json_file(file.path().with_extension("missing"));
    assert!(matches!(missing, Err(RepoError::Config(_))));
}
