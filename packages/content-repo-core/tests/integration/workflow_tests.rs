//! Workflow stages: immediate and scheduled transitions, stage reads and
//! the deferred job handler.

use std::sync::Arc;

use chrono::{Duration, Utc};
use ntest::timeout;
use serde_json::json;

use content_repo_core::{
    CollectionDefinition, FieldDefinition, FindOptions, GlobalDefinition, InMemoryJobQueue, JobOutcome, RepoConfig,
    RepoError, Repository, RequestContext, TransitionOptions, TransitionOutcome,
};

use super::helpers::{id_of, row_count, workflow_repo};

fn published() -> FindOptions {
    FindOptions::new().stage("published")
}

/// A new draft has no published snapshot until it is transitioned.
#[timeout(5000)]
#[test]
fn test_publish_immediately() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let repo = workflow_repo(queue.clone());
    let posts = repo.collection("posts").unwrap();
    let ctx = RequestContext::anonymous();
    let id = id_of(&posts.create(&ctx, json!({"title": "Hello", "summary": "Hi"})).unwrap());

    assert!(posts.find_by_id(&ctx, &id, &published()).unwrap().is_none());
    assert!(posts.find_by_id(&ctx, &id, &FindOptions::new().stage("draft")).unwrap().is_some());

    let outcome = posts
        .transition_stage(&ctx, &id, TransitionOptions::new("published"))
        .unwrap();
    assert!(!outcome.is_scheduled());
    assert_eq!(outcome.record()["title"], json!("Hello"));
    assert!(queue.is_empty());

    let staged = posts.find_by_id(&ctx, &id, &published()).unwrap().unwrap();
    assert_eq!(staged["title"], json!("Hello"));
    assert_eq!(staged["summary"], json!("Hi"));

    // later edits stay in the draft until published again
    posts.update_by_id(&ctx, &id, json!({"title": "Hello v2"})).unwrap();
    let staged = posts.find_by_id(&ctx, &id, &published()).unwrap().unwrap();
    assert_eq!(staged["title"], json!("Hello"));
    let live = posts.find_by_id(&ctx, &id, &FindOptions::new()).unwrap().unwrap();
    assert_eq!(live["title"], json!("Hello v2"));

    let versions = posts.find_versions(&ctx, &id).unwrap();
    let stages: Vec<&str> = versions
        .iter()
        .map(|v| v["versionStage"].as_str().unwrap())
        .collect();
    assert_eq!(stages, vec!["draft", "published", "draft"]);
}

/// Version retention keeps the newest snapshot of every stage, so a
/// published record survives any number of later draft edits.
#[timeout(5000)]
#[test]
fn test_retention_keeps_stage_snapshots() {
    let repo = Repository::builder(RepoConfig::default())
        .collection(
            CollectionDefinition::new("posts")
                .field(FieldDefinition::text("title").required())
                .field(FieldDefinition::text("summary").localized())
                .workflow(&["draft", "published"], "draft")
                .max_versions(2),
        )
        .build()
        .unwrap();
    let posts = repo.collection("posts").unwrap();
    let ctx = RequestContext::anonymous();
    let id = id_of(&posts.create(&ctx, json!({"title": "Hello", "summary": "Hi"})).unwrap());
    posts
        .transition_stage(&ctx, &id, TransitionOptions::new("published"))
        .unwrap();
    for n in 2..5 {
        posts
            .update_by_id(&ctx, &id, json!({"title": format!("Hello v{n}"), "summary": "Edited"}))
            .unwrap();
    }

    let staged = posts.find_by_id(&ctx, &id, &published()).unwrap().unwrap();
    assert_eq!(staged["title"], json!("Hello"));
    assert_eq!(staged["summary"], json!("Hi"));
    let draft = posts
        .find_by_id(&ctx, &id, &FindOptions::new().stage("draft"))
        .unwrap()
        .unwrap();
    assert_eq!(draft["title"], json!("Hello v4"));

    let numbers: Vec<i64> = posts
        .find_versions(&ctx, &id)
        .unwrap()
        .iter()
        .map(|v| v["versionNumber"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![2, 4, 5]);
    assert_eq!(row_count(&repo, "posts_i18n_versions"), 3);
}

/// A past schedule runs now and queues nothing.
#[timeout(5000)]
#[test]
fn test_past_schedule_runs_now() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let repo = workflow_repo(queue.clone());
    let posts = repo.collection("posts").unwrap();
    let ctx = RequestContext::anonymous();
    let id = id_of(&posts.create(&ctx, json!({"title": "Old news"})).unwrap());

    let options = TransitionOptions::new("published").scheduled_at(Utc::now() - Duration::minutes(5));
    let outcome = posts.transition_stage(&ctx, &id, options).unwrap();
    assert!(matches!(outcome, TransitionOutcome::Applied(_)));
    assert!(queue.is_empty());
    assert!(posts.find_by_id(&ctx, &id, &published()).unwrap().is_some());
}

/// A future schedule queues one job and changes nothing until it runs.
#[timeout(5000)]
#[test]
fn test_future_schedule_queues_job() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let repo = workflow_repo(queue.clone());
    let posts = repo.collection("posts").unwrap();
    let ctx = RequestContext::anonymous();
    let id = id_of(&posts.create(&ctx, json!({"title": "Embargoed"})).unwrap());

    let at = Utc::now() + Duration::hours(1);
    let outcome = posts
        .transition_stage(&ctx, &id, TransitionOptions::new("published").scheduled_at(at))
        .unwrap();
    let TransitionOutcome::Scheduled { record, job_id } = outcome else {
        panic!("expected a scheduled transition");
    };
    assert_eq!(record["title"], json!("Embargoed"));

    let jobs = queue.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, job_id);
    assert_eq!(jobs[0].name, "content.transition-stage");
    assert_eq!(jobs[0].start_after, Some(at));
    assert_eq!(
        jobs[0].payload,
        json!({"type": "collection", "collection": "posts", "recordId": id, "stage": "published"})
    );
    assert!(posts.find_by_id(&ctx, &id, &published()).unwrap().is_none());
    assert_eq!(row_count(&repo, "posts_versions"), 1);

    assert!(queue.take_due(Utc::now()).is_empty());
    let due = queue.take_due(at + Duration::seconds(1));
    assert_eq!(due.len(), 1);
    let outcome = repo.handle_job(&due[0].name, &due[0].payload).unwrap();
    assert!(matches!(outcome, JobOutcome::Applied(_)));
    let staged = posts.find_by_id(&ctx, &id, &published()).unwrap().unwrap();
    assert_eq!(staged["title"], json!("Embargoed"));
}

/// Jobs whose record or stage disappeared are skipped, malformed jobs fail.
#[timeout(5000)]
#[test]
fn test_job_revalidation() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let repo = workflow_repo(queue.clone());
    let posts = repo.collection("posts").unwrap();
    let ctx = RequestContext::anonymous();
    let id = id_of(&posts.create(&ctx, json!({"title": "Gone soon"})).unwrap());
    let at = Utc::now() + Duration::minutes(10);
    posts
        .transition_stage(&ctx, &id, TransitionOptions::new("published").scheduled_at(at))
        .unwrap();
    posts.delete(&ctx, &id).unwrap();

    let job = queue.take_due(at).pop().unwrap();
    let outcome = repo.handle_job(&job.name, &job.payload).unwrap();
    assert!(matches!(outcome, JobOutcome::Skipped(_)));

    let stale_stage = json!({"type": "collection", "collection": "posts", "recordId": id, "stage": "archived"});
    assert!(matches!(
        repo.handle_job(&job.name, &stale_stage).unwrap(),
        JobOutcome::Skipped(_)
    ));
    let unknown = json!({"type": "collection", "collection": "pages", "recordId": id, "stage": "published"});
    assert!(matches!(
        repo.handle_job(&job.name, &unknown).unwrap(),
        JobOutcome::Skipped(_)
    ));

    assert!(matches!(
        repo.handle_job("email.send", &job.payload),
        Err(RepoError::JobQueue(_))
    ));
    assert!(matches!(
        repo.handle_job(&job.name, &json!({"type": "collection", "stage": "published"})),
        Err(RepoError::JobQueue(_))
    ));
}

/// Undeclared stages fail on transition and on read.
#[timeout(5000)]
#[test]
fn test_unknown_stage() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let repo = workflow_repo(queue.clone());
    let posts = repo.collection("posts").unwrap();
    let ctx = RequestContext::anonymous();
    let id = id_of(&posts.create(&ctx, json!({"title": "T"})).unwrap());

    let err = posts
        .transition_stage(&ctx, &id, TransitionOptions::new("archived"))
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownStage { ref stage, .. } if stage == "archived"));
    let err = posts
        .find_by_id(&ctx, &id, &FindOptions::new().stage("archived"))
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownStage { .. }));
    assert_eq!(row_count(&repo, "posts_versions"), 1);
    assert!(queue.is_empty());
}

/// Globals schedule jobs without a record id and publish through the handler.
#[timeout(5000)]
#[test]
fn test_global_scheduled_publish() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let repo = Repository::builder(RepoConfig::default())
        .global(
            GlobalDefinition::new("homepage")
                .field(FieldDefinition::text("headline"))
                .workflow(&["draft", "published"], "draft"),
        )
        .job_queue(queue.clone())
        .build()
        .unwrap();
    let homepage = repo.global("homepage").unwrap();
    let ctx = RequestContext::anonymous();
    homepage.update(&ctx, json!({"headline": "Launch"})).unwrap();

    let at = Utc::now() + Duration::days(1);
    let outcome = homepage
        .transition_stage(&ctx, TransitionOptions::new("published").scheduled_at(at))
        .unwrap();
    assert!(outcome.is_scheduled());
    let job = queue.take_due(at).pop().unwrap();
    assert_eq!(
        job.payload,
        json!({"type": "global", "global": "homepage", "stage": "published"})
    );
    assert!(homepage.get(&ctx, Some("published")).unwrap().is_none());

    let outcome = repo.handle_job(&job.name, &job.payload).unwrap();
    assert!(matches!(outcome, JobOutcome::Applied(_)));
    let staged = homepage.get(&ctx, Some("published")).unwrap().unwrap();
    assert_eq!(staged["headline"], json!("Launch"));
}
