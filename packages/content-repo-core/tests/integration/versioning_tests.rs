//! Version history: numbering, revert and retention.

use ntest::timeout;
use serde_json::json;

use content_repo_core::{
    CollectionDefinition, FallbackStrategy, FieldDefinition, FindOptions, RepoConfig, RepoError,
    Repository, RequestContext, VersionRef,
};

use super::helpers::{barbers_repo, id_of, row_count};

fn numbers(versions: &[content_repo_core::Record]) -> Vec<i64> {
    versions
        .iter()
        .map(|v| v["versionNumber"].as_i64().unwrap())
        .collect()
}

/// Sequential mutations number versions 1..N, including locale-scoped updates.
#[timeout(5000)]
#[test]
fn test_version_numbers_are_gapless() {
    let repo = barbers_repo(FallbackStrategy::AliasedJoin);
    let barbers = repo.collection("barbers").unwrap();
    let en = RequestContext::user("editor-1", &["editor"]);
    let sk = en.clone().with_locale("sk");

    let id = id_of(&barbers.create(&en, json!({"name": "Marek", "bio": {"v": 1}})).unwrap());
    barbers.update_by_id(&sk, &id, json!({"bio": {"v": "sk"}})).unwrap();
    barbers.update_by_id(&en, &id, json!({"name": "Marek B."})).unwrap();
    barbers.update_by_id(&sk, &id, json!({"layout": {"hero": "Ahoj"}})).unwrap();

    let versions = barbers.find_versions(&en, &id).unwrap();
    assert_eq!(numbers(&versions), vec![1, 2, 3, 4]);
    let operations: Vec<&str> = versions
        .iter()
        .map(|v| v["versionOperation"].as_str().unwrap())
        .collect();
    assert_eq!(operations, vec!["create", "update", "update", "update"]);
    assert!(versions.iter().all(|v| v["versionUserId"] == json!("editor-1")));

    // each entry is the record as it was
    assert_eq!(versions[0]["name"], json!("Marek"));
    assert_eq!(versions[2]["name"], json!("Marek B."));
    let in_sk = barbers.find_versions(&sk, &id).unwrap();
    assert_eq!(in_sk[0]["bio"], json!({"v": 1}));
    assert_eq!(in_sk[1]["bio"], json!({"v": "sk"}));
}

/// Reverting appends a version equal to the target and leaves history intact.
#[timeout(5000)]
#[test]
fn test_revert_is_additive() {
    let repo = barbers_repo(FallbackStrategy::Subquery);
    let barbers = repo.collection("barbers").unwrap();
    let en = RequestContext::anonymous();
    let sk = RequestContext::anonymous().with_locale("sk");

    let id = id_of(&barbers.create(&en, json!({"name": "First", "bio": {"v": 1}})).unwrap());
    barbers.update_by_id(&en, &id, json!({"name": "Second", "bio": {"v": 2}})).unwrap();
    barbers.update_by_id(&sk, &id, json!({"bio": {"v": "sk"}})).unwrap();
    let before = barbers.find_versions(&en, &id).unwrap();
    assert_eq!(before.len(), 3);

    let reverted = barbers
        .revert_to_version(&en, &id, VersionRef::Number(1))
        .unwrap();
    assert_eq!(reverted["name"], json!("First"));
    assert_eq!(reverted["bio"], json!({"v": 1}));

    let after = barbers.find_versions(&en, &id).unwrap();
    assert_eq!(numbers(&after), vec![1, 2, 3, 4]);
    assert_eq!(&after[..3], &before[..]);
    for attribute in ["name", "bio", "layout"] {
        assert_eq!(after[3][attribute], before[0][attribute], "{attribute}");
    }
    assert_eq!(after[3]["versionOperation"], json!("update"));

    // the sk translation did not exist at version 1
    let live = barbers.find_by_id(&sk, &id, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(live["bio"], json!({"v": 1}));
    assert_eq!(row_count(&repo, "barbers_i18n"), 1);

    let by_id = after[1]["versionId"].as_i64().unwrap();
    let reverted = barbers.revert_to_version(&en, &id, VersionRef::Id(by_id)).unwrap();
    assert_eq!(reverted["name"], json!("Second"));
    assert_eq!(numbers(&barbers.find_versions(&en, &id).unwrap()).len(), 5);
}

/// Unknown versions are not found; unversioned collections have no history.
#[timeout(5000)]
#[test]
fn test_version_errors() {
    let repo = Repository::builder(RepoConfig::default())
        .collection(
            CollectionDefinition::new("pages")
                .field(FieldDefinition::text("slug"))
                .versioned(),
        )
        .collection(CollectionDefinition::new("drafts").field(FieldDefinition::text("slug")))
        .build()
        .unwrap();
    let ctx = RequestContext::anonymous();
    let pages = repo.collection("pages").unwrap();
    let id = id_of(&pages.create(&ctx, json!({"slug": "home"})).unwrap());

    let err = pages
        .revert_to_version(&ctx, &id, VersionRef::Number(9))
        .unwrap_err();
    assert!(err.is_not_found());

    let drafts = repo.collection("drafts").unwrap();
    let draft = id_of(&drafts.create(&ctx, json!({"slug": "x"})).unwrap());
    let err = drafts.find_versions(&ctx, &draft).unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "versions"));
    assert_eq!(row_count(&repo, "pages_versions"), 1);
    assert!(!repo.store().has_table("drafts_versions"));
}

/// `max_versions` keeps only the newest snapshots.
#[timeout(5000)]
#[test]
fn test_max_versions_trims_oldest() {
    let repo = Repository::builder(RepoConfig::default())
        .collection(
            CollectionDefinition::new("pages")
                .field(FieldDefinition::text("slug"))
                .field(FieldDefinition::text("heading").localized())
                .versioned()
                .max_versions(2),
        )
        .build()
        .unwrap();
    let ctx = RequestContext::anonymous();
    let pages = repo.collection("pages").unwrap();
    let id = id_of(&pages.create(&ctx, json!({"slug": "a", "heading": "A"})).unwrap());
    for slug in ["b", "c", "d"] {
        pages.update_by_id(&ctx, &id, json!({"slug": slug})).unwrap();
    }

    let versions = pages.find_versions(&ctx, &id).unwrap();
    assert_eq!(numbers(&versions), vec![3, 4]);
    assert_eq!(versions[1]["slug"], json!("d"));
    assert_eq!(versions[0]["heading"], json!("A"));
    assert_eq!(row_count(&repo, "pages_i18n_versions"), 2);

    let err = pages
        .revert_to_version(&ctx, &id, VersionRef::Number(1))
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Deletes and restores are versioned like any other mutation.
#[timeout(5000)]
#[test]
fn test_delete_and_restore_append_versions() {
    let repo = Repository::builder(RepoConfig::default())
        .collection(
            CollectionDefinition::new("pages")
                .field(FieldDefinition::text("slug"))
                .versioned()
                .soft_delete(),
        )
        .build()
        .unwrap();
    let ctx = RequestContext::anonymous();
    let pages = repo.collection("pages").unwrap();
    let id = id_of(&pages.create(&ctx, json!({"slug": "a"})).unwrap());
    pages.delete(&ctx, &id).unwrap();
    pages.restore(&ctx, &id).unwrap();

    let versions = pages.find_versions(&ctx, &id).unwrap();
    let operations: Vec<&str> = versions
        .iter()
        .map(|v| v["versionOperation"].as_str().unwrap())
        .collect();
    assert_eq!(operations, vec!["create", "delete", "update"]);
}
