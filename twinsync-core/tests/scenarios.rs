//! End-to-end reconciliation scenarios (spec §8) driven against the
//! in-memory test provider: create, rename, content update, deletion,
//! simultaneous-create conflict, and path conflict.

use std::sync::Arc;

use twinsync_core::{Exists, FnTranslator, ObjectType, Provider, Side, SyncManager, SyncState};
use twinsync_testkit::MemProvider;

fn translator() -> FnTranslator<impl Fn(Side, &str) -> Option<String>> {
    FnTranslator(|target: Side, path: &str| {
        let suffix = path.strip_prefix("/local").or_else(|| path.strip_prefix("/remote"))?;
        Some(match target {
            Side::Local => format!("/local{suffix}"),
            Side::Remote => format!("/remote{suffix}"),
        })
    })
}

async fn reader(bytes: &'static [u8]) -> twinsync_core::provider::Reader {
    Box::pin(std::io::Cursor::new(bytes.to_vec()))
}

async fn drain(manager: &mut SyncManager, max_ticks: usize) {
    for _ in 0..max_ticks {
        if !manager.state().has_changes() {
            break;
        }
        manager.do_tick().await.expect("tick should not error");
    }
}

fn build_manager(local: Arc<MemProvider>, remote: Arc<MemProvider>, state: SyncState) -> SyncManager {
    let providers: [Arc<dyn Provider>; 2] = [local, remote];
    SyncManager::new(
        providers,
        Arc::new(translator()),
        state,
        std::env::temp_dir().join(format!("twinsync-test-{}", uuid::Uuid::new_v4())),
    )
}

#[tokio::test]
async fn basic_propagation() {
    let local = Arc::new(MemProvider::new("local"));
    let remote = Arc::new(MemProvider::new("remote"));
    let info = local.create("/local/stuff1", reader(b"hello").await).await.unwrap();

    let mut state = SyncState::new(None, "pair").await.unwrap();
    state
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff1"), Some(b"hello".to_vec()), Exists::Exists)
        .await
        .unwrap();

    let mut manager = build_manager(local.clone(), remote.clone(), state);
    drain(&mut manager, 10).await;

    assert_eq!(remote.read_path("/remote/stuff1"), Some(b"hello".to_vec()));
}

#[tokio::test]
async fn rename_propagation() {
    let local = Arc::new(MemProvider::new("local"));
    let remote = Arc::new(MemProvider::new("remote"));
    let info = local.create("/local/stuff1", reader(b"hello").await).await.unwrap();

    let mut state = SyncState::new(None, "pair").await.unwrap();
    let id = state
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff1"), Some(b"hello".to_vec()), Exists::Exists)
        .await
        .unwrap();
    let mut manager = build_manager(local.clone(), remote.clone(), state);
    drain(&mut manager, 10).await;
    assert_eq!(remote.read_path("/remote/stuff1"), Some(b"hello".to_vec()));

    local.rename(&info.oid, "/local/stuff2").await.unwrap();
    manager
        .state_mut()
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff2"), Some(b"hello".to_vec()), Exists::Exists)
        .await
        .unwrap();
    assert!(manager.state().get(id).is_some());
    drain(&mut manager, 10).await;

    assert_eq!(remote.read_path("/remote/stuff2"), Some(b"hello".to_vec()));
    assert_eq!(remote.read_path("/remote/stuff1"), None);
}

#[tokio::test]
async fn content_update_propagates_new_bytes() {
    let local = Arc::new(MemProvider::new("local"));
    let remote = Arc::new(MemProvider::new("remote"));
    let info = local.create("/local/stuff1", reader(b"hello").await).await.unwrap();

    let mut state = SyncState::new(None, "pair").await.unwrap();
    state
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff1"), Some(b"hello".to_vec()), Exists::Exists)
        .await
        .unwrap();
    let mut manager = build_manager(local.clone(), remote.clone(), state);
    drain(&mut manager, 10).await;
    assert_eq!(remote.read_path("/remote/stuff1"), Some(b"hello".to_vec()));

    local.upload(&info.oid, reader(b"hello2").await).await.unwrap();
    manager
        .state_mut()
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff1"), Some(b"hello2".to_vec()), Exists::Exists)
        .await
        .unwrap();
    drain(&mut manager, 10).await;

    assert_eq!(remote.read_path("/remote/stuff1"), Some(b"hello2".to_vec()));
}

#[tokio::test]
async fn deletion_propagates() {
    let local = Arc::new(MemProvider::new("local"));
    let remote = Arc::new(MemProvider::new("remote"));
    let info = local.create("/local/stuff1", reader(b"hello").await).await.unwrap();

    let mut state = SyncState::new(None, "pair").await.unwrap();
    state
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff1"), Some(b"hello".to_vec()), Exists::Exists)
        .await
        .unwrap();
    let mut manager = build_manager(local.clone(), remote.clone(), state);
    drain(&mut manager, 10).await;
    assert!(remote.read_path("/remote/stuff1").is_some());

    local.delete(&info.oid).await.unwrap();
    manager
        .state_mut()
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff1"), None, Exists::Trashed)
        .await
        .unwrap();
    drain(&mut manager, 10).await;

    assert!(remote.read_path("/remote/stuff1").is_none());
}

#[tokio::test]
async fn simultaneous_create_conflict_preserves_both_byte_strings() {
    let local = Arc::new(MemProvider::new("local"));
    let remote = Arc::new(MemProvider::new("remote"));
    let local_info = local.create("/local/stuff1", reader(b"hello").await).await.unwrap();
    let remote_info = remote.create("/remote/stuff1", reader(b"goodbye").await).await.unwrap();

    let mut state = SyncState::new(None, "pair").await.unwrap();
    state
        .update(Side::Local, ObjectType::File, &local_info.oid, Some("/local/stuff1"), Some(b"hello".to_vec()), Exists::Exists)
        .await
        .unwrap();
    state
        .update(Side::Remote, ObjectType::File, &remote_info.oid, Some("/remote/stuff1"), Some(b"goodbye".to_vec()), Exists::Exists)
        .await
        .unwrap();

    let mut manager = build_manager(local.clone(), remote.clone(), state);
    drain(&mut manager, 30).await;

    let mut local_paths = local.live_paths();
    local_paths.sort();
    assert_eq!(local_paths, vec!["/local/stuff1".to_string(), "/local/stuff1.conflicted".to_string()]);
    let mut remote_paths = remote.live_paths();
    remote_paths.sort();
    assert_eq!(remote_paths, vec!["/remote/stuff1".to_string(), "/remote/stuff1.conflicted".to_string()]);

    assert_eq!(local.read_path("/local/stuff1"), remote.read_path("/remote/stuff1"));
    assert_eq!(local.read_path("/local/stuff1.conflicted"), remote.read_path("/remote/stuff1.conflicted"));

    let canonical = local.read_path("/local/stuff1").unwrap();
    let conflicted = local.read_path("/local/stuff1.conflicted").unwrap();
    let mut contents = vec![canonical, conflicted];
    contents.sort();
    let mut expected = vec![b"hello".to_vec(), b"goodbye".to_vec()];
    expected.sort();
    assert_eq!(contents, expected);
}

#[tokio::test]
async fn path_conflict_converges_to_lexicographically_greater_suffix() {
    let local = Arc::new(MemProvider::new("local"));
    let remote = Arc::new(MemProvider::new("remote"));
    let info = local.create("/local/stuff", reader(b"same").await).await.unwrap();

    let mut state = SyncState::new(None, "pair").await.unwrap();
    state
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff"), Some(b"same".to_vec()), Exists::Exists)
        .await
        .unwrap();
    let mut manager = build_manager(local.clone(), remote.clone(), state);
    drain(&mut manager, 10).await;
    let remote_oid = remote.info_path("/remote/stuff").await.unwrap().unwrap().oid;

    local.rename(&info.oid, "/local/stuff-l").await.unwrap();
    remote.rename(&remote_oid, "/remote/stuff-r").await.unwrap();
    manager
        .state_mut()
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff-l"), Some(b"same".to_vec()), Exists::Exists)
        .await
        .unwrap();
    manager
        .state_mut()
        .update(Side::Remote, ObjectType::File, &remote_oid, Some("/remote/stuff-r"), Some(b"same".to_vec()), Exists::Exists)
        .await
        .unwrap();
    drain(&mut manager, 10).await;

    assert!(local.read_path("/local/stuff").is_none());
    assert!(remote.read_path("/remote/stuff").is_none());
    assert!(local.read_path("/local/stuff-l").is_none());
    assert!(local.read_path("/local/stuff-r").is_some());
    assert!(remote.read_path("/remote/stuff-r").is_some());
}

#[tokio::test]
async fn three_cycle_rename_converges() {
    let local = Arc::new(MemProvider::new("local"));
    let remote = Arc::new(MemProvider::new("remote"));
    let a = local.create("/local/a", reader(b"A").await).await.unwrap();
    let b = local.create("/local/b", reader(b"B").await).await.unwrap();
    let c = local.create("/local/c", reader(b"C").await).await.unwrap();

    let mut state = SyncState::new(None, "pair").await.unwrap();
    state
        .update(Side::Local, ObjectType::File, &a.oid, Some("/local/a"), Some(b"A".to_vec()), Exists::Exists)
        .await
        .unwrap();
    state
        .update(Side::Local, ObjectType::File, &b.oid, Some("/local/b"), Some(b"B".to_vec()), Exists::Exists)
        .await
        .unwrap();
    state
        .update(Side::Local, ObjectType::File, &c.oid, Some("/local/c"), Some(b"C".to_vec()), Exists::Exists)
        .await
        .unwrap();

    let mut manager = build_manager(local.clone(), remote.clone(), state);
    drain(&mut manager, 20).await;
    assert_eq!(remote.read_path("/remote/a"), Some(b"A".to_vec()));
    assert_eq!(remote.read_path("/remote/b"), Some(b"B".to_vec()));
    assert_eq!(remote.read_path("/remote/c"), Some(b"C".to_vec()));

    // Rotate a -> d, c -> a, b -> c, d -> b, entirely on the local side.
    local.rename(&a.oid, "/local/d").await.unwrap();
    local.rename(&c.oid, "/local/a").await.unwrap();
    local.rename(&b.oid, "/local/c").await.unwrap();
    local.rename(&a.oid, "/local/b").await.unwrap();
    // After these four renames, the oids now sit at: a.oid -> /local/b,
    // b.oid -> /local/c, c.oid -> /local/a (a 3-cycle with no intermediate
    // name left behind).
    manager
        .state_mut()
        .update(Side::Local, ObjectType::File, &a.oid, Some("/local/b"), Some(b"A".to_vec()), Exists::Exists)
        .await
        .unwrap();
    manager
        .state_mut()
        .update(Side::Local, ObjectType::File, &b.oid, Some("/local/c"), Some(b"B".to_vec()), Exists::Exists)
        .await
        .unwrap();
    manager
        .state_mut()
        .update(Side::Local, ObjectType::File, &c.oid, Some("/local/a"), Some(b"C".to_vec()), Exists::Exists)
        .await
        .unwrap();
    drain(&mut manager, 30).await;

    assert_eq!(remote.read_path("/remote/a"), Some(b"C".to_vec()));
    assert_eq!(remote.read_path("/remote/b"), Some(b"A".to_vec()));
    assert_eq!(remote.read_path("/remote/c"), Some(b"B".to_vec()));
}

#[tokio::test]
async fn nested_directory_creation_propagates_recursively() {
    let local = Arc::new(MemProvider::new("local"));
    let remote = Arc::new(MemProvider::new("remote"));
    local.mkdir("/local/a").await.unwrap();
    let inner = local.mkdir("/local/a/b").await.unwrap();

    let mut state = SyncState::new(None, "pair").await.unwrap();
    let id = state
        .update(Side::Local, ObjectType::Directory, &inner, Some("/local/a/b"), None, Exists::Exists)
        .await
        .unwrap();
    let mut manager = build_manager(local.clone(), remote.clone(), state);
    drain(&mut manager, 10).await;

    // The intermediate directory was never registered as its own entry, yet
    // mkdirs() must still have materialized it on the remote side.
    assert!(remote.info_path("/remote/a").await.unwrap().is_some());
    let remote_info = remote.info_path("/remote/a/b").await.unwrap().unwrap();
    assert_eq!(remote_info.otype, ObjectType::Directory);

    assert_eq!(manager.state().lookup_oid(Side::Remote, &remote_info.oid), Some(id));
    assert!(manager.state().lookup_path(Side::Remote, "/remote/a/b").contains(&id));
    assert_eq!(
        manager.state().get(id).unwrap().side(Side::Remote).sync_path.as_deref(),
        Some("/remote/a/b")
    );
}

#[tokio::test]
async fn content_update_then_remote_rename_keeps_sync_path_on_own_side() {
    let local = Arc::new(MemProvider::new("local"));
    let remote = Arc::new(MemProvider::new("remote"));
    let info = local.create("/local/stuff1", reader(b"hello").await).await.unwrap();

    let mut state = SyncState::new(None, "pair").await.unwrap();
    let id = state
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff1"), Some(b"hello".to_vec()), Exists::Exists)
        .await
        .unwrap();
    let mut manager = build_manager(local.clone(), remote.clone(), state);
    drain(&mut manager, 10).await;
    assert_eq!(remote.read_path("/remote/stuff1"), Some(b"hello".to_vec()));

    local.upload(&info.oid, reader(b"hello2").await).await.unwrap();
    manager
        .state_mut()
        .update(Side::Local, ObjectType::File, &info.oid, Some("/local/stuff1"), Some(b"hello2".to_vec()), Exists::Exists)
        .await
        .unwrap();
    drain(&mut manager, 10).await;
    assert_eq!(remote.read_path("/remote/stuff1"), Some(b"hello2".to_vec()));

    // Remote's own sync_path witness must track its own path, not the side
    // that changed — otherwise this looks like a path change forever after.
    assert_eq!(
        manager.state().get(id).unwrap().side(Side::Remote).sync_path.as_deref(),
        Some("/remote/stuff1")
    );

    let remote_oid = remote.info_path("/remote/stuff1").await.unwrap().unwrap().oid;
    remote.rename(&remote_oid, "/remote/stuff2").await.unwrap();
    manager
        .state_mut()
        .update(Side::Remote, ObjectType::File, &remote_oid, Some("/remote/stuff2"), Some(b"hello2".to_vec()), Exists::Exists)
        .await
        .unwrap();
    drain(&mut manager, 10).await;

    assert_eq!(local.read_path("/local/stuff2"), Some(b"hello2".to_vec()));
    assert!(local.read_path("/local/stuff1").is_none());

    // The renamed-to oid/path must now be indexed on Local too, since it was
    // the `synced` side of this rename.
    let local_oid = local.info_path("/local/stuff2").await.unwrap().unwrap().oid;
    assert_eq!(manager.state().lookup_oid(Side::Local, &local_oid), Some(id));
    assert!(manager.state().lookup_path(Side::Local, "/local/stuff2").contains(&id));
    assert!(manager.state().lookup_path(Side::Local, "/local/stuff1").is_empty());
}
