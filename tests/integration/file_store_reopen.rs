#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;
use treestore::{
    primitives::pager::{FilePageStore, PageStore, PagerOptions, PAGE_TRAILER_LEN},
    PageId, StoreError, TreeStore, TreeStoreOptions,
};

const PAGE_SIZE: u32 = 512;

fn open(path: &Path, options: TreeStoreOptions) -> treestore::Result<TreeStore> {
    let pager = PagerOptions::default().page_size(PAGE_SIZE).fsync(false);
    let store = Arc::new(FilePageStore::open(path, pager)?);
    TreeStore::open(store, options)
}

fn fill(tree: &mut TreeStore, dirs: i32, files: i32) -> treestore::Result<()> {
    for i in 0..dirs {
        for j in 0..files {
            let (dir, file) = (format!("dir{i:02}"), format!("file{j:02}"));
            let pos = tree
                .lookup(&[dir.as_str(), file.as_str()], true)?
                .expect("insert");
            pos.set_row_id(tree, i * 1000 + j)?;
        }
    }
    Ok(())
}

#[test]
fn flushed_tree_survives_reopen() -> treestore::Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("paths.tree");
    let expected = {
        let mut tree = open(&path, TreeStoreOptions::default())?;
        fill(&mut tree, 12, 15)?;
        assert!(tree.split_count() > 0);
        tree.flush()?;
        tree.to_testable_string()?
    };

    let mut tree = open(&path, TreeStoreOptions::default())?;
    assert_eq!(tree.root_page(), PageId(1));
    assert_eq!(tree.to_testable_string()?, expected);
    assert!(tree.check()? > 1);
    for i in 0..12 {
        for j in 0..15 {
            let (d, f) = (format!("dir{i:02}"), format!("file{j:02}"));
            let pos = tree.lookup(&[d.as_str(), f.as_str()], false)?.expect("present");
            assert_eq!(pos.row_id(&mut tree)?, i * 1000 + j);
        }
    }
    Ok(())
}

#[test]
fn unflushed_changes_are_dropped() -> treestore::Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("partial.tree");
    {
        let mut tree = open(&path, TreeStoreOptions::default())?;
        tree.lookup(&["kept"], true)?.expect("insert");
        tree.flush()?;
        tree.lookup(&["lost"], true)?.expect("insert");
        assert_eq!(tree.dirty_pages(), 1);
    }

    let mut tree = open(&path, TreeStoreOptions::default())?;
    assert!(tree.lookup(&["kept"], false)?.is_some());
    assert!(tree.lookup(&["lost"], false)?.is_none());
    Ok(())
}

#[test]
fn positions_stay_valid_across_reopen() -> treestore::Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("handles.tree");
    let mut saved = Vec::new();
    {
        let mut tree = open(&path, TreeStoreOptions::default())?;
        fill(&mut tree, 4, 10)?;
        let pos = tree.lookup(&["dir03", "file07"], false)?.expect("present");
        pos.write_to(&mut saved);
        tree.flush()?;
    }

    let mut tree = open(&path, TreeStoreOptions::default())?;
    let pos = tree.read_pos(&saved)?;
    assert_eq!(pos.row_id(&mut tree)?, 3007);
    assert_eq!(pos.name(&mut tree)?, "file07");
    Ok(())
}

#[test]
fn timestamps_survive_reopen() -> treestore::Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stamped.tree");
    let options = TreeStoreOptions::default().timestamps(true);
    {
        let mut tree = open(&path, options.clone())?;
        let pos = tree.lookup(&["var", "log"], true)?.expect("insert");
        pos.set_row_id(&mut tree, 11)?;
        pos.set_timestamp(&mut tree, -5)?;
        tree.flush()?;
    }

    let mut tree = open(&path, options)?;
    let pos = tree.lookup(&["var", "log"], false)?.expect("present");
    assert_eq!(pos.timestamp(&mut tree)?, -5);
    assert_eq!(pos.row_id(&mut tree)?, 11);
    Ok(())
}

#[test]
fn reopening_with_other_timestamp_setting_is_refused() -> treestore::Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("layout.tree");
    {
        let mut tree = open(&path, TreeStoreOptions::default().timestamps(true))?;
        tree.lookup(&["a"], true)?.expect("insert");
        tree.flush()?;
    }

    assert!(matches!(
        open(&path, TreeStoreOptions::default()),
        Err(StoreError::Invalid(_))
    ));
    let mut tree = open(&path, TreeStoreOptions::default().timestamps(true))?;
    assert!(tree.lookup(&["a"], false)?.is_some());

    let plain = dir.path().join("plain.tree");
    open(&plain, TreeStoreOptions::default())?.flush()?;
    assert!(matches!(
        open(&plain, TreeStoreOptions::default().timestamps(true)),
        Err(StoreError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn damaged_root_page_is_corruption() -> treestore::Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("damaged.tree");
    {
        let mut tree = open(&path, TreeStoreOptions::default())?;
        fill(&mut tree, 1, 3)?;
        tree.flush()?;
    }

    let mut bytes = fs::read(&path).unwrap();
    let slot = PAGE_SIZE as usize + PAGE_TRAILER_LEN;
    bytes[slot + 8] ^= 0xff;
    fs::write(&path, bytes).unwrap();

    assert!(matches!(
        open(&path, TreeStoreOptions::default()),
        Err(StoreError::Corruption(_))
    ));
    Ok(())
}

#[test]
fn stored_page_size_wins_over_options() -> treestore::Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sized.tree");
    {
        let mut tree = open(&path, TreeStoreOptions::default())?;
        tree.flush()?;
    }
    let store = FilePageStore::open(&path, PagerOptions::default().page_size(4096))?;
    assert_eq!(store.page_size(), PAGE_SIZE as usize);
    assert_eq!(store.root_hint(), Some(PageId(1)));
    Ok(())
}
