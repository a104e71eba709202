mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use std::path::PathBuf;

use sourcetrack_core::project;
use sourcetrack_core::{
    ChangeOrigin, ChangeState, Component, ComponentSet, ComponentStatus, DeployResult,
    FileResponse, OrgTarget, RetrieveResult, StateFilter, TrackingOptions,
};
use sourcetrack_sync::{
    ChangeFormat, ChangeQuery, FileStoreProvider, SourceTracking, TrackingError, TrackingSide,
};
use tempfile::TempDir;

fn response(type_name: &str, name: &str, state: ComponentStatus, path: Option<&str>) -> FileResponse {
    FileResponse {
        type_name: type_name.into(),
        full_name: name.into(),
        state,
        file_path: path.map(str::to_string),
        error: None,
    }
}

async fn local_changes(tracking: &SourceTracking, state: StateFilter) -> Vec<String> {
    tracking
        .get_changes(ChangeQuery::new(ChangeOrigin::Local, state, ChangeFormat::Filenames))
        .await
        .expect("local changes")
        .into_filenames()
        .expect("filenames variant")
}

async fn remote_changes(tracking: &SourceTracking) -> usize {
    tracking
        .get_changes(ChangeQuery::new(
            ChangeOrigin::Remote,
            StateFilter::NonDelete,
            ChangeFormat::ChangeResults,
        ))
        .await
        .expect("remote changes")
        .len()
}

fn file_backed(tmp: &TempDir, org: Arc<ScriptedOrg>) -> SourceTracking {
    session(
        tmp.path(),
        project_config(&["force-app"]),
        Arc::new(FileStoreProvider::new(org)),
        TrackingOptions::default(),
    )
}

// ---------------------------------------------------------------------------
// File-backed round trips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_round_trip_leaves_nothing_pending() {
    init_tracing();
    let tmp = TempDir::new().expect("tmp");
    write_file(tmp.path(), "force-app/classes/Foo.cls", "class Foo {}");
    let org = Arc::new(ScriptedOrg::default());
    let tracking = file_backed(&tmp, org.clone());

    assert_eq!(
        local_changes(&tracking, StateFilter::Add).await,
        strings(&["force-app/classes/Foo.cls"])
    );
    let sets = tracking
        .local_changes_as_component_sets(None)
        .await
        .expect("sets");
    assert!(sets[0].has("ApexClass", "Foo"));

    org.touch("ApexClass", "Foo", false);
    let result = DeployResult {
        id: "0Af000000000001".into(),
        file_responses: vec![response(
            "ApexClass",
            "Foo",
            ComponentStatus::Created,
            Some("force-app/classes/Foo.cls"),
        )],
    };
    tracking
        .update_tracking_from_deploy(&result)
        .await
        .expect("tracking updated");

    assert!(local_changes(&tracking, StateFilter::NonDelete).await.is_empty());
    assert_eq!(remote_changes(&tracking).await, 0);
}

#[tokio::test]
async fn retrieve_round_trip_leaves_nothing_pending() {
    let tmp = TempDir::new().expect("tmp");
    let org = Arc::new(ScriptedOrg::default());
    let tracking = file_backed(&tmp, org.clone());

    org.touch("ApexClass", "Bar", false);
    let set = tracking
        .remote_non_deletes_as_component_set(true)
        .await
        .expect("set");
    assert!(set.has("ApexClass", "Bar"));

    write_file(tmp.path(), "force-app/classes/Bar.cls", "class Bar {}");
    let absolute = tmp.path().join("force-app/classes/Bar.cls");
    let result = RetrieveResult {
        id: "09S000000000001".into(),
        file_responses: vec![response(
            "ApexClass",
            "Bar",
            ComponentStatus::Created,
            Some(absolute.to_str().expect("utf8 path")),
        )],
    };
    tracking.re_read_local_tracking_cache().await.expect("rescan");
    tracking
        .update_tracking_from_retrieve(&result)
        .await
        .expect("tracking updated");

    assert!(local_changes(&tracking, StateFilter::NonDelete).await.is_empty());
    assert_eq!(remote_changes(&tracking).await, 0);
}

#[tokio::test]
async fn deploying_part_of_a_bundle_commits_its_pending_deletes() {
    let tmp = TempDir::new().expect("tmp");
    write_file(tmp.path(), "force-app/lwc/card/card.js", "v1");
    write_file(tmp.path(), "force-app/lwc/card/card.css", "v1");
    let org = Arc::new(ScriptedOrg::default());
    let tracking = file_backed(&tmp, org.clone());
    assert_eq!(tracking.reset_local_tracking().await.expect("reset").len(), 2);

    std::fs::remove_file(tmp.path().join("force-app/lwc/card/card.css")).expect("rm css");
    write_file(tmp.path(), "force-app/lwc/card/card.js", "v2");
    tracking.re_read_local_tracking_cache().await.expect("rescan");
    assert_eq!(
        local_changes(&tracking, StateFilter::Delete).await,
        strings(&["force-app/lwc/card/card.css"])
    );

    let sets = tracking
        .local_changes_as_component_sets(None)
        .await
        .expect("sets");
    assert_eq!(sets[0].destructive_keys().count(), 0);

    org.touch(LWC, "card", false);
    let result = DeployResult {
        id: "0Af000000000002".into(),
        file_responses: vec![response(
            LWC,
            "card",
            ComponentStatus::Changed,
            Some("force-app/lwc/card/card.js"),
        )],
    };
    tracking
        .update_tracking_from_deploy(&result)
        .await
        .expect("tracking updated");

    assert!(local_changes(&tracking, StateFilter::Delete).await.is_empty());
    assert!(local_changes(&tracking, StateFilter::NonDelete).await.is_empty());
}

#[tokio::test]
async fn reset_accepts_every_pending_change() {
    let tmp = TempDir::new().expect("tmp");
    write_file(tmp.path(), "force-app/classes/A.cls", "a");
    write_file(tmp.path(), "force-app/classes/B.cls", "b");
    write_file(tmp.path(), "force-app/classes/Old.cls", "old");
    let org = Arc::new(ScriptedOrg::default());
    org.touch("ApexClass", "A", false);
    org.touch("ApexClass", "B", false);
    let tracking = file_backed(&tmp, org.clone());
    assert_eq!(tracking.reset_local_tracking().await.expect("first reset").len(), 3);

    std::fs::remove_file(tmp.path().join("force-app/classes/Old.cls")).expect("rm Old");
    write_file(tmp.path(), "force-app/classes/B.cls", "b2");
    write_file(tmp.path(), "force-app/classes/C.cls", "c");
    tracking
        .re_read_local_tracking_cache()
        .await
        .expect("re-read");

    let mut accepted = tracking.reset_local_tracking().await.expect("reset");
    accepted.sort();
    assert_eq!(
        accepted,
        strings(&[
            "force-app/classes/B.cls",
            "force-app/classes/C.cls",
            "force-app/classes/Old.cls",
        ])
    );
    assert!(local_changes(&tracking, StateFilter::NonDelete).await.is_empty());
    assert!(local_changes(&tracking, StateFilter::Delete).await.is_empty());

    assert_eq!(tracking.reset_remote_tracking(None).await.expect("reset"), 2);
    assert_eq!(remote_changes(&tracking).await, 0);
}

#[tokio::test]
async fn reset_to_revision_leaves_later_changes_pending() {
    let tmp = TempDir::new().expect("tmp");
    let org = Arc::new(ScriptedOrg::default());
    let first = org.touch("ApexClass", "A", false);
    org.touch("ApexClass", "B", false);
    let tracking = file_backed(&tmp, org);

    assert_eq!(tracking.reset_remote_tracking(Some(first)).await.expect("reset"), 1);
    assert_eq!(remote_changes(&tracking).await, 1);
}

#[tokio::test]
async fn deleting_tracking_files_returns_their_paths() {
    let tmp = TempDir::new().expect("tmp");
    write_file(tmp.path(), "force-app/classes/A.cls", "a");
    let org = Arc::new(ScriptedOrg::default());
    org.touch("ApexClass", "A", false);
    let tracking = file_backed(&tmp, org);
    tracking.reset_local_tracking().await.expect("reset local");
    tracking.reset_remote_tracking(None).await.expect("reset remote");

    let local = tracking.delete_local_tracking().await.expect("delete local");
    let remote = tracking.delete_remote_tracking().await.expect("delete remote");
    assert!(local.ends_with("local-baseline.json"));
    assert!(remote.ends_with("remote-cursor.json"));
    assert!(!local.exists());
    assert!(!remote.exists());
}

// ---------------------------------------------------------------------------
// In-memory stores
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stores_are_opened_once_under_concurrent_first_use() {
    let tmp = TempDir::new().expect("tmp");
    let provider = CountingProvider::new(MemoryLocalStore::default(), MemoryRemoteStore::default());
    let tracking = session(
        tmp.path(),
        project_config(&["force-app"]),
        provider.clone(),
        TrackingOptions::default(),
    );

    let (a, b, c, d, e) = tokio::join!(
        tracking.ensure_local_tracking(),
        tracking.ensure_local_tracking(),
        tracking.local_changes_as_component_sets(None),
        tracking.ensure_remote_tracking(),
        tracking.get_conflicts()
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok() && e.is_ok());
    assert_eq!(provider.local_opens.load(Ordering::SeqCst), 1);
    assert_eq!(provider.remote_opens.load(Ordering::SeqCst), 1);

    tracking.get_status(true, true).await.expect("status");
    assert_eq!(provider.local_opens.load(Ordering::SeqCst), 1);
    assert_eq!(provider.remote_opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deleting_remote_tracking_does_not_open_the_store() {
    let tmp = TempDir::new().expect("tmp");
    let provider = CountingProvider::new(MemoryLocalStore::default(), MemoryRemoteStore::default());
    let tracking = session(
        tmp.path(),
        project_config(&["force-app"]),
        provider.clone(),
        TrackingOptions::default(),
    );
    tracking.delete_remote_tracking().await.expect("delete");
    assert_eq!(provider.remote_opens.load(Ordering::SeqCst), 0);
    assert_eq!(provider.remote_deletes.load(Ordering::SeqCst), 1);
}

fn class(name: &str) -> Component {
    Component {
        type_name: "ApexClass".into(),
        full_name: name.into(),
        xml: None,
        content: Some(PathBuf::from(format!("force-app/classes/{name}.cls"))),
    }
}

fn bundle(name: &str) -> Component {
    Component {
        type_name: LWC.into(),
        full_name: name.into(),
        xml: None,
        content: Some(PathBuf::from(format!("force-app/lwc/{name}"))),
    }
}

fn memory_session(tmp: &TempDir, provider: Arc<CountingProvider>) -> SourceTracking {
    session(
        tmp.path(),
        project_config(&["force-app"]),
        provider,
        TrackingOptions::default(),
    )
}

#[tokio::test]
async fn deleting_components_removes_files_and_records_both_sides() {
    let tmp = TempDir::new().expect("tmp");
    write_file(tmp.path(), "force-app/classes/Foo.cls", "x");
    write_file(tmp.path(), "force-app/lwc/card/card.js", "x");
    write_file(tmp.path(), "force-app/lwc/card/card.css", "x");
    let provider = CountingProvider::new(MemoryLocalStore::default(), MemoryRemoteStore::default());
    let tracking = memory_session(&tmp, provider.clone());

    let set: ComponentSet = vec![class("Foo"), bundle("card")].into_iter().collect();
    let responses = tracking
        .delete_files_and_update_tracking(&set)
        .await
        .expect("deleted");

    assert_eq!(responses.len(), 3);
    assert!(responses.iter().all(|r| r.state == ComponentStatus::Deleted));
    assert!(!tmp.path().join("force-app/classes/Foo.cls").exists());
    assert!(!tmp.path().join("force-app/lwc/card/card.css").exists());

    let commits = provider.local.commits.lock().expect("lock");
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].deleted_files.len(), 3);
    assert!(commits[0].deployed_files.is_empty());
    let synced = provider.remote.synced.lock().expect("lock");
    assert_eq!(synced.len(), 2);
    assert!(synced.iter().all(|s| s.state == ComponentStatus::Deleted));
    assert!(provider.remote.polled.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn deleting_an_empty_set_touches_nothing() {
    let tmp = TempDir::new().expect("tmp");
    let provider = CountingProvider::new(MemoryLocalStore::default(), MemoryRemoteStore::refusing());
    let tracking = memory_session(&tmp, provider.clone());

    let responses = tracking
        .delete_files_and_update_tracking(&ComponentSet::default())
        .await
        .expect("nothing to do");
    assert!(responses.is_empty());
    assert_eq!(provider.local_opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn remote_deletes_are_applied_to_local_files() {
    let tmp = TempDir::new().expect("tmp");
    write_file(tmp.path(), "force-app/classes/Old.cls", "x");
    write_file(tmp.path(), "force-app/classes/Foo.cls", "x");
    let provider = CountingProvider::new(
        MemoryLocalStore::default(),
        MemoryRemoteStore::with(vec![
            element("ApexClass", "Old", true, false),
            element("ApexClass", "Foo", false, true),
        ]),
    );
    let tracking = memory_session(&tmp, provider.clone());

    let applied = tracking
        .maybe_apply_remote_deletes_to_local(true)
        .await
        .expect("applied");

    assert!(!tmp.path().join("force-app/classes/Old.cls").exists());
    assert!(tmp.path().join("force-app/classes/Foo.cls").exists());
    assert!(applied.component_set.has("ApexClass", "Foo"));
    assert!(!applied.component_set.has("ApexClass", "Old"));
    let responses = applied.file_responses.expect("responses requested");
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].file_path.as_deref(), Some("force-app/classes/Old.cls"));
}

#[tokio::test]
async fn delete_responses_are_omitted_unless_requested() {
    let tmp = TempDir::new().expect("tmp");
    write_file(tmp.path(), "force-app/classes/Old.cls", "x");
    let provider = CountingProvider::new(
        MemoryLocalStore::default(),
        MemoryRemoteStore::with(vec![element("ApexClass", "Old", true, false)]),
    );
    let tracking = memory_session(&tmp, provider);

    let applied = tracking
        .maybe_apply_remote_deletes_to_local(false)
        .await
        .expect("applied");
    assert!(applied.file_responses.is_none());
    assert!(applied.component_set.is_empty());
    assert!(!tmp.path().join("force-app/classes/Old.cls").exists());
}

fn deploy_of_foo() -> DeployResult {
    DeployResult {
        id: "0Af000000000003".into(),
        file_responses: vec![
            response(
                "ApexClass",
                "Foo",
                ComponentStatus::Changed,
                Some("force-app/classes/Foo.cls"),
            ),
            response("ApexClass", "Broken", ComponentStatus::Failed, Some("force-app/classes/Broken.cls")),
            response("ApexClass", "Pathless", ComponentStatus::Changed, None),
        ],
    }
}

#[tokio::test]
async fn deploy_updates_only_successes_with_paths_and_polls() {
    let tmp = TempDir::new().expect("tmp");
    let provider = CountingProvider::new(
        MemoryLocalStore::with(&[("force-app/classes/Foo.cls", ChangeState::Modify)]),
        MemoryRemoteStore::default(),
    );
    let tracking = memory_session(&tmp, provider.clone());

    tracking
        .update_tracking_from_deploy(&deploy_of_foo())
        .await
        .expect("updated");

    let commits = provider.local.commits.lock().expect("lock");
    assert_eq!(commits[0].deployed_files, strings(&["force-app/classes/Foo.cls"]));
    let synced = provider.remote.synced.lock().expect("lock");
    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0].full_name, "Foo");
    assert_eq!(provider.remote.polled.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn failed_remote_half_reports_local_as_committed() {
    let tmp = TempDir::new().expect("tmp");
    let remote = MemoryRemoteStore::default();
    remote.fail_sync.store(true, Ordering::SeqCst);
    let provider = CountingProvider::new(MemoryLocalStore::default(), remote);
    let tracking = memory_session(&tmp, provider.clone());

    let err = tracking
        .update_tracking_from_deploy(&deploy_of_foo())
        .await
        .expect_err("remote fails");
    assert!(matches!(
        err,
        TrackingError::PartialTrackingUpdate { committed: TrackingSide::Local, .. }
    ));
    assert_eq!(provider.local.commits.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn failed_local_half_reports_remote_as_committed() {
    let tmp = TempDir::new().expect("tmp");
    let local = MemoryLocalStore::default();
    local.fail_commit.store(true, Ordering::SeqCst);
    let provider = CountingProvider::new(local, MemoryRemoteStore::default());
    let tracking = memory_session(&tmp, provider.clone());

    let err = tracking
        .update_tracking_from_deploy(&deploy_of_foo())
        .await
        .expect_err("local fails");
    assert!(matches!(
        err,
        TrackingError::PartialTrackingUpdate { committed: TrackingSide::Remote, .. }
    ));
    assert_eq!(provider.remote.synced.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn both_halves_failing_surfaces_the_local_error() {
    let tmp = TempDir::new().expect("tmp");
    let local = MemoryLocalStore::default();
    local.fail_commit.store(true, Ordering::SeqCst);
    let remote = MemoryRemoteStore::default();
    remote.fail_sync.store(true, Ordering::SeqCst);
    let tracking = memory_session(&tmp, CountingProvider::new(local, remote));

    let err = tracking
        .update_tracking_from_deploy(&deploy_of_foo())
        .await
        .expect_err("both fail");
    assert!(err.to_string().contains("local commit refused"), "{err}");
}

#[tokio::test]
async fn orgs_without_source_tracking_only_update_local() {
    let tmp = TempDir::new().expect("tmp");
    let provider = CountingProvider::new(MemoryLocalStore::default(), MemoryRemoteStore::default());
    let tracking = SourceTracking::with_config(
        tmp.path(),
        project_config(&["force-app"]),
        OrgTarget::new("00Dprod", false),
        Arc::new(ConventionRegistry::new(tmp.path())),
        provider.clone(),
        TrackingOptions::default(),
    );

    tracking
        .update_tracking_from_deploy(&deploy_of_foo())
        .await
        .expect("local only");
    assert_eq!(provider.local.commits.lock().expect("lock").len(), 1);
    assert_eq!(provider.remote_opens.load(Ordering::SeqCst), 0);

    let err = tracking
        .update_remote_tracking(&[], true)
        .await
        .expect_err("explicit remote update");
    assert!(matches!(err, TrackingError::NotSourceTracked { .. }));
}

#[tokio::test]
async fn retrieve_commits_locally_without_polling() {
    let tmp = TempDir::new().expect("tmp");
    let provider = CountingProvider::new(MemoryLocalStore::default(), MemoryRemoteStore::default());
    let tracking = memory_session(&tmp, provider.clone());
    let result = RetrieveResult {
        id: "09S000000000002".into(),
        file_responses: vec![response(
            "ApexClass",
            "Foo",
            ComponentStatus::Changed,
            Some("force-app/classes/Foo.cls"),
        )],
    };

    tracking
        .update_tracking_from_retrieve(&result)
        .await
        .expect("updated");
    assert_eq!(provider.local.commits.lock().expect("lock").len(), 1);
    assert_eq!(provider.remote.synced.lock().expect("lock").len(), 1);
    assert!(provider.remote.polled.lock().expect("lock").is_empty());
}

// ---------------------------------------------------------------------------
// Session construction
// ---------------------------------------------------------------------------

#[test]
fn new_session_reads_the_project_file() {
    let tmp = TempDir::new().expect("tmp");
    project::save_at(tmp.path(), &project_config(&["force-app", "shared"])).expect("save");

    let tracking = SourceTracking::new(
        tmp.path(),
        OrgTarget::new(ORG, true),
        Arc::new(ConventionRegistry::new(tmp.path())),
        Arc::new(FileStoreProvider::new(Arc::new(ScriptedOrg::default()))),
        TrackingOptions::default(),
    )
    .expect("session");
    assert!(tracking.project().has_multiple_package_directories());
}

#[test]
fn new_session_without_project_file_fails() {
    let tmp = TempDir::new().expect("tmp");
    let err = SourceTracking::new(
        tmp.path(),
        OrgTarget::new(ORG, true),
        Arc::new(ConventionRegistry::new(tmp.path())),
        Arc::new(FileStoreProvider::new(Arc::new(ScriptedOrg::default()))),
        TrackingOptions::default(),
    )
    .expect_err("no project file");
    assert!(matches!(err, TrackingError::Project(_)));
}
