//! Shared fixtures for the integration suite.

use std::sync::Arc;

use serde_json::Value;

use content_repo_core::{
    CollectionDefinition, FallbackStrategy, FieldDefinition, InMemoryJobQueue, Record,
    RelationOptions, RepoConfig, Repository,
};

/// Config accepting `en` (default) and `sk` writes.
pub fn config(strategy: FallbackStrategy) -> RepoConfig {
    RepoConfig {
        locales: vec!["en".into(), "sk".into()],
        fallback_strategy: strategy,
        ..RepoConfig::default()
    }
}

/// Primary key of a returned record.
pub fn id_of(record: &Record) -> Value {
    record.get("id").cloned().unwrap_or(Value::Null)
}

/// Number of rows currently committed in `table`.
pub fn row_count(repo: &Repository, table: &str) -> usize {
    use content_repo_core::store::StoreRead;
    repo.store().read().rows(table).map(|rows| rows.len()).unwrap_or(0)
}

/// `barbers` with a required name, a whole-mode localized bio and a
/// nested-mode localized layout.
pub fn barbers_repo(strategy: FallbackStrategy) -> Repository {
    Repository::builder(config(strategy))
        .collection(
            CollectionDefinition::new("barbers")
                .field(FieldDefinition::text("name").required())
                .field(FieldDefinition::json("bio").localized())
                .field(FieldDefinition::json("layout").localized_nested())
                .title("name")
                .versioned(),
        )
        .build()
        .expect("barbers repository builds")
}

/// Blog schema covering every relation kind.
pub fn blog_repo() -> Repository {
    Repository::builder(config(FallbackStrategy::AliasedJoin))
        .collection(CollectionDefinition::new("authors").field(FieldDefinition::text("name")))
        .collection(CollectionDefinition::new("tags").field(FieldDefinition::text("label")))
        .collection(
            CollectionDefinition::new("posts")
                .field(FieldDefinition::text("title").required())
                .field(FieldDefinition::relation("author", RelationOptions::to("authors")))
                .field(FieldDefinition::relation(
                    "tags",
                    RelationOptions::to("tags").has_many().through("post_tags"),
                ))
                .field(FieldDefinition::relation(
                    "topics",
                    RelationOptions::to("tags").multiple(),
                ))
                .field(FieldDefinition::relation(
                    "comments",
                    RelationOptions::to("comments").has_many().foreign_key("postId"),
                ))
                .field(FieldDefinition::relation(
                    "notes",
                    RelationOptions::polymorphic(&[("post", "notes")])
                        .has_many()
                        .morph_name("subject"),
                )),
        )
        .collection(
            CollectionDefinition::new("post_tags")
                .field(FieldDefinition::text("postsId"))
                .field(FieldDefinition::text("tagsId")),
        )
        .collection(
            CollectionDefinition::new("comments")
                .field(FieldDefinition::text("body"))
                .field(FieldDefinition::relation("post", RelationOptions::to("posts"))),
        )
        .collection(
            CollectionDefinition::new("notes")
                .field(FieldDefinition::text("body"))
                .field(FieldDefinition::relation(
                    "subject",
                    RelationOptions::polymorphic(&[("post", "posts"), ("author", "authors")]),
                )),
        )
        .build()
        .expect("blog repository builds")
}

/// `posts` under a draft/published workflow, publishing jobs to `queue`.
pub fn workflow_repo(queue: Arc<InMemoryJobQueue>) -> Repository {
    Repository::builder(RepoConfig::default())
        .collection(
            CollectionDefinition::new("posts")
                .field(FieldDefinition::text("title").required())
                .field(FieldDefinition::text("summary").localized())
                .workflow(&["draft", "published"], "draft"),
        )
        .job_queue(queue)
        .build()
        .expect("workflow repository builds")
}
