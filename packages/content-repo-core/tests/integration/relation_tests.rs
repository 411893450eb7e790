//! Relation round-trips and mutation syntax for every relation kind.

use ntest::timeout;
use serde_json::{json, Value};

use content_repo_core::store::StoreRead;
use content_repo_core::{
    CollectionDefinition, FallbackStrategy, FieldDefinition, FindOptions, IdStrategy,
    RelationOptions, RepoError, Repository, RequestContext,
};

use super::helpers::{blog_repo, config, id_of, row_count};

/// Create then read returns the written relation values for all six kinds.
#[timeout(5000)]
#[test]
fn test_round_trip_every_kind() {
    let repo = blog_repo();
    let ctx = RequestContext::anonymous();
    let authors = repo.collection("authors").unwrap();
    let tags = repo.collection("tags").unwrap();
    let posts = repo.collection("posts").unwrap();
    let comments = repo.collection("comments").unwrap();
    let notes = repo.collection("notes").unwrap();

    let author = id_of(&authors.create(&ctx, json!({"name": "Ann"})).unwrap());
    let rust = id_of(&tags.create(&ctx, json!({"label": "rust"})).unwrap());
    let cms = id_of(&tags.create(&ctx, json!({"label": "cms"})).unwrap());

    // belongsTo, manyToMany and multiple
    let post = posts
        .create(
            &ctx,
            json!({"title": "Hello", "author": author, "tags": [rust, cms], "topics": [cms]}),
        )
        .unwrap();
    let post_id = id_of(&post);
    assert_eq!(post["author"], author);
    assert_eq!(post["tags"], json!([rust, cms]));
    assert_eq!(post["topics"], json!([cms]));
    assert_eq!(row_count(&repo, "post_tags"), 2);

    // hasMany and morphMany through the owning side
    let comment = comments
        .create(&ctx, json!({"body": "Nice", "post": post_id}))
        .unwrap();
    let note = notes
        .create(&ctx, json!({"body": "Check links", "subject": {"type": "post", "id": post_id}}))
        .unwrap();
    assert_eq!(note["subject"], json!({"type": "post", "id": post_id}));

    let read = posts
        .find_by_id(&ctx, &post_id, &FindOptions::new())
        .unwrap()
        .unwrap();
    assert_eq!(read["title"], json!("Hello"));
    assert_eq!(read["author"], author);
    assert_eq!(read["tags"], json!([rust, cms]));
    assert_eq!(read["topics"], json!([cms]));
    assert_eq!(read["comments"], json!([id_of(&comment)]));
    assert_eq!(read["notes"], json!([id_of(&note)]));

    // a note on an author is not listed on the post
    notes
        .create(&ctx, json!({"body": "Bio", "subject": {"type": "author", "id": author}}))
        .unwrap();
    let read = posts.find_by_id(&ctx, &post_id, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(read["notes"], json!([id_of(&note)]));
}

/// `with` replaces ids by the related records.
#[timeout(5000)]
#[test]
fn test_eager_load() {
    let repo = blog_repo();
    let ctx = RequestContext::anonymous();
    let author = id_of(
        &repo
            .collection("authors")
            .unwrap()
            .create(&ctx, json!({"name": "Ann"}))
            .unwrap(),
    );
    let posts = repo.collection("posts").unwrap();
    let post = id_of(
        &posts
            .create(&ctx, json!({"title": "Hello", "author": author, "tags": {"create": {"label": "new"}}}))
            .unwrap(),
    );

    let options = FindOptions::new().with("author").with("tags");
    let read = posts.find_by_id(&ctx, &post, &options).unwrap().unwrap();
    assert_eq!(read["author"]["name"], json!("Ann"));
    let loaded = read["tags"].as_array().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0]["label"], json!("new"));

    let err = posts
        .find_by_id(&ctx, &post, &FindOptions::new().with("title"))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "title"));
}

/// Structured connect, disconnect, create and set on to-many relations.
#[timeout(5000)]
#[test]
fn test_to_many_mutations() {
    let repo = blog_repo();
    let ctx = RequestContext::anonymous();
    let tags = repo.collection("tags").unwrap();
    let posts = repo.collection("posts").unwrap();
    let a = id_of(&tags.create(&ctx, json!({"label": "a"})).unwrap());
    let b = id_of(&tags.create(&ctx, json!({"label": "b"})).unwrap());
    let post = id_of(&posts.create(&ctx, json!({"title": "T", "tags": [a, b]})).unwrap());

    let updated = posts
        .update_by_id(&ctx, &post, json!({"tags": {"disconnect": a}}))
        .unwrap();
    assert_eq!(updated["tags"], json!([b]));

    let updated = posts
        .update_by_id(&ctx, &post, json!({"tags": {"connect": [a]}, "topics": {"connect": [a, b]}}))
        .unwrap();
    assert_eq!(updated["tags"], json!([b, a]));
    assert_eq!(updated["topics"], json!([a, b]));

    let updated = posts
        .update_by_id(&ctx, &post, json!({"topics": {"disconnect": [a]}, "tags": {"set": [a]}}))
        .unwrap();
    assert_eq!(updated["topics"], json!([b]));
    assert_eq!(updated["tags"], json!([a]));
    assert_eq!(row_count(&repo, "post_tags"), 1);

    let updated = posts
        .update_by_id(&ctx, &post, json!({"comments": {"create": [{"body": "one"}, {"body": "two"}]}}))
        .unwrap();
    assert_eq!(updated["comments"].as_array().unwrap().len(), 2);

    let updated = posts.update_by_id(&ctx, &post, json!({"comments": null})).unwrap();
    assert_eq!(updated["comments"], json!([]));
    assert_eq!(row_count(&repo, "comments"), 2);
}

/// connectOrCreate reuses a matching target and creates one otherwise.
#[timeout(5000)]
#[test]
fn test_connect_or_create() {
    let repo = blog_repo();
    let ctx = RequestContext::anonymous();
    let posts = repo.collection("posts").unwrap();
    let payload = || {
        json!({
            "title": "T",
            "author": {"connectOrCreate": {"where": {"name": "Bob"}, "create": {"name": "Bob"}}}
        })
    };
    let first = posts.create(&ctx, payload()).unwrap();
    let second = posts.create(&ctx, payload()).unwrap();
    assert_eq!(first["author"], second["author"]);
    assert_eq!(repo.collection("authors").unwrap().count(&ctx, None).unwrap(), 1);
}

/// To-one relations reject set and disconnect; missing targets fail the write.
#[timeout(5000)]
#[test]
fn test_invalid_mutations() {
    let repo = blog_repo();
    let ctx = RequestContext::anonymous();
    let author = id_of(
        &repo
            .collection("authors")
            .unwrap()
            .create(&ctx, json!({"name": "Ann"}))
            .unwrap(),
    );
    let posts = repo.collection("posts").unwrap();
    let post = id_of(&posts.create(&ctx, json!({"title": "T", "author": author})).unwrap());

    for payload in [
        json!({"author": {"set": [author]}}),
        json!({"author": {"disconnect": author}}),
        json!({"author": "6a1f9a0e-5b8e-4a55-9a43-6c3e7f1b2d90"}),
    ] {
        let err = posts.update_by_id(&ctx, &post, payload).unwrap_err();
        assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "author"));
    }

    let err = repo
        .collection("notes")
        .unwrap()
        .create(&ctx, json!({"subject": {"type": "video", "id": author}}))
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "subject"));

    let read = posts.find_by_id(&ctx, &post, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(read["author"], author);
    let cleared = posts.update_by_id(&ctx, &post, json!({"author": null})).unwrap();
    assert_eq!(cleared["author"], Value::Null);
}

/// Deleting a post clears back-references and removes its junction rows.
#[timeout(5000)]
#[test]
fn test_delete_cleans_up_links() {
    let repo = blog_repo();
    let ctx = RequestContext::anonymous();
    let tags = repo.collection("tags").unwrap();
    let posts = repo.collection("posts").unwrap();
    let comments = repo.collection("comments").unwrap();
    let tag = id_of(&tags.create(&ctx, json!({"label": "a"})).unwrap());
    let post = id_of(&posts.create(&ctx, json!({"title": "T", "tags": [tag]})).unwrap());
    let comment = id_of(&comments.create(&ctx, json!({"body": "c", "post": post})).unwrap());

    posts.delete(&ctx, &post).unwrap();
    assert_eq!(row_count(&repo, "post_tags"), 0);
    let orphan = comments.find_by_id(&ctx, &comment, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(orphan["post"], Value::Null);
    assert!(tags.find_by_id(&ctx, &tag, &FindOptions::new()).unwrap().is_some());
}

/// Comments on serial-keyed pages and uuid-keyed posts.
fn mixed_key_repo() -> Repository {
    Repository::builder(config(FallbackStrategy::AliasedJoin))
        .collection(
            CollectionDefinition::new("pages")
                .field(FieldDefinition::text("title"))
                .field(FieldDefinition::relation(
                    "comments",
                    RelationOptions::polymorphic(&[("page", "comments")])
                        .has_many()
                        .morph_name("subject"),
                ))
                .id_strategy(IdStrategy::Serial),
        )
        .collection(CollectionDefinition::new("posts").field(FieldDefinition::text("title")))
        .collection(
            CollectionDefinition::new("comments")
                .field(FieldDefinition::text("body"))
                .field(FieldDefinition::relation(
                    "subject",
                    RelationOptions::polymorphic(&[("page", "pages"), ("post", "posts")]),
                )),
        )
        .build()
        .unwrap()
}

/// A polymorphic relation over integer and uuid keys stores both in one
/// text column and reads each back with its target's key type.
#[timeout(5000)]
#[test]
fn test_polymorphic_mixed_key_types() {
    let repo = mixed_key_repo();
    let ctx = RequestContext::anonymous();
    let pages = repo.collection("pages").unwrap();
    let posts = repo.collection("posts").unwrap();
    let comments = repo.collection("comments").unwrap();

    let page = id_of(&pages.create(&ctx, json!({"title": "Home"})).unwrap());
    assert_eq!(page, json!(1));
    let post = id_of(&posts.create(&ctx, json!({"title": "Hello"})).unwrap());

    let on_page = comments
        .create(&ctx, json!({"body": "a", "subject": {"type": "page", "id": 1}}))
        .unwrap();
    assert_eq!(on_page["subject"], json!({"type": "page", "id": 1}));
    let on_post = comments
        .create(&ctx, json!({"body": "b", "subject": {"type": "post", "id": post}}))
        .unwrap();
    assert_eq!(on_post["subject"], json!({"type": "post", "id": post}));

    {
        let view = repo.store().read();
        let rows = view.rows("comments").unwrap();
        assert_eq!(rows[0]["subjectId"], json!("1"));
        assert_eq!(rows[1]["subjectId"], post);
    }

    let read = comments
        .find_by_id(&ctx, &id_of(&on_page), &FindOptions::new().with("subject"))
        .unwrap()
        .unwrap();
    assert_eq!(read["subject"]["id"], json!(1));
    assert_eq!(read["subject"]["value"]["title"], json!("Home"));

    let home = pages.find_by_id(&ctx, &page, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(home["comments"], json!([id_of(&on_page)]));

    // connecting from the page side writes the same text key
    let home = pages
        .update_by_id(&ctx, &page, json!({"comments": {"connect": [id_of(&on_post)]}}))
        .unwrap();
    assert_eq!(home["comments"], json!([id_of(&on_page), id_of(&on_post)]));
    let moved = comments
        .find_by_id(&ctx, &id_of(&on_post), &FindOptions::new())
        .unwrap()
        .unwrap();
    assert_eq!(moved["subject"], json!({"type": "page", "id": 1}));

    let home = pages
        .update_by_id(&ctx, &page, json!({"comments": {"disconnect": [id_of(&on_page)]}}))
        .unwrap();
    assert_eq!(home["comments"], json!([id_of(&on_post)]));
}
