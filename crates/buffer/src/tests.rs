use super::*;
use storage::{PageManageVariant, StorageStrategy};
use tempfile::tempdir;

fn cache_at(path: &std::path::Path, cache_count: usize) -> PageCache {
    let mut file = PagedFile::attach(StorageStrategy::new(path, 4096, PageManageVariant::V1));
    file.create().unwrap();
    PageCache::new(file, cache_count)
}

#[test]
fn allocate_and_reattach_round_trip() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 10);
    cache.open(FixMode::Write, CancelToken::new());

    let pid = {
        let page = cache.allocate_page(|buf| buf[0..3].copy_from_slice(b"abc")).unwrap();
        page.id()
    };
    cache.flush_all_pages().unwrap();

    cache.open(FixMode::ReadOnly, CancelToken::new());
    let page = cache.attach_page(pid, FixPriority::Middle).unwrap();
    assert_eq!(&page.data()[0..3], b"abc");
}

#[test]
fn flush_empties_the_cache() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 10);
    cache.open(FixMode::Write, CancelToken::new());

    for _ in 0..5 {
        cache.allocate_page(|_| {}).unwrap();
    }
    assert_eq!(cache.attached_page_count(), 5);

    cache.flush_all_pages().unwrap();
    assert_eq!(cache.attached_page_count(), 0);
}

#[test]
fn freed_page_moves_to_freelist_and_is_recycled() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 10);
    cache.open(FixMode::Write, CancelToken::new());

    let page = cache.allocate_page(|_| {}).unwrap();
    let pid = page.id();
    cache.free_page(page);

    // Never in both structures: the freed page left the LRU list.
    assert_eq!(cache.attached_page_count(), 1);

    // Allocation reuses the freed page before touching the file.
    let again = cache.allocate_page(|_| {}).unwrap();
    assert_eq!(again.id(), pid);
}

#[test]
fn free_is_physical_only_at_flush() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 10);
    cache.open(FixMode::Write, CancelToken::new());

    let page = cache.allocate_page(|_| {}).unwrap();
    cache.free_page(page);
    cache.flush_all_pages().unwrap();

    cache.with_file(|file| {
        assert_eq!(file.used_page_count().unwrap(), 0);
        assert_eq!(file.page_count().unwrap(), 1);
    });
}

#[test]
fn eviction_detaches_lru_clean_page() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 2);
    cache.open(FixMode::Write, CancelToken::new());

    let (a, b, c);
    {
        let p = cache.allocate_page(|_| {}).unwrap();
        a = p.id();
    }
    {
        let p = cache.allocate_page(|_| {}).unwrap();
        b = p.id();
    }
    {
        let p = cache.allocate_page(|_| {}).unwrap();
        c = p.id();
    }
    cache.flush_all_pages().unwrap();

    // Re-attach three clean pages with a cache count of two; dropping
    // the third pushes the count over the limit and the LRU head (the
    // first page attached) is detached while the second remains.
    cache.open(FixMode::ReadOnly, CancelToken::new());
    drop(cache.attach_page(a, FixPriority::Middle).unwrap());
    drop(cache.attach_page(b, FixPriority::Middle).unwrap());
    drop(cache.attach_page(c, FixPriority::Middle).unwrap());

    assert_eq!(cache.attached_page_count(), 2);
}

#[test]
fn dirty_pages_survive_eviction_pressure() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 1);
    cache.open(FixMode::Write, CancelToken::new());

    let dirty_pid = {
        let page = cache.allocate_page(|_| {}).unwrap();
        page.data_mut()[0] = 0xFF;
        page.id()
    };
    for _ in 0..3 {
        cache.allocate_page(|_| {}).unwrap();
    }

    // The dirty page is still resident and its modification intact.
    let page = cache.attach_page(dirty_pid, FixPriority::Middle).unwrap();
    assert_eq!(page.data()[0], 0xFF);
    assert!(page.is_dirty());
}

#[test]
fn recover_discards_discardable_modifications() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 10);

    cache.open(FixMode::Write, CancelToken::new());
    let pid = cache.allocate_page(|_| {}).unwrap().id();
    cache.flush_all_pages().unwrap();

    cache.open(FixMode::WriteDiscardable, CancelToken::new());
    {
        let page = cache.attach_page(pid, FixPriority::Middle).unwrap();
        page.data_mut()[0] = 0x55;
    }
    cache.recover_all_pages().unwrap();

    cache.open(FixMode::ReadOnly, CancelToken::new());
    let page = cache.attach_page(pid, FixPriority::Middle).unwrap();
    assert_eq!(page.data()[0], 0);
}

#[test]
fn save_keeps_pages_resident_and_clean() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 10);
    cache.open(FixMode::Write, CancelToken::new());

    let page = cache.allocate_page(|buf| buf[0] = 7).unwrap();
    let pid = page.id();
    drop(page);

    cache.save_all_pages().unwrap();
    assert_eq!(cache.attached_page_count(), 1);

    let page = cache.attach_page(pid, FixPriority::Middle).unwrap();
    assert!(!page.is_dirty());
    assert_eq!(page.data()[0], 7);
}

#[test]
fn cancel_is_polled_every_hundred_attaches() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 200);
    cache.open(FixMode::Write, CancelToken::new());
    let pid = cache.allocate_page(|_| {}).unwrap().id();
    cache.flush_all_pages().unwrap();

    let token = CancelToken::new();
    cache.open(FixMode::ReadOnly, token.clone());
    token.cancel();

    // The flag is only polled on the hundredth attach.
    let mut result = Ok(());
    for _ in 0..100 {
        match cache.attach_page(pid, FixPriority::Middle) {
            Ok(_) => {}
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    assert!(matches!(result, Err(EngineError::Cancelled)));
}

#[test]
fn verification_reports_bad_page() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 10);
    cache.open(FixMode::Write, CancelToken::new());
    let pid = cache.allocate_page(|_| {}).unwrap().id();
    cache.flush_all_pages().unwrap();

    cache.start_verification(Treatment::read_only());
    assert!(cache.attach_page(pid, FixPriority::Middle).is_ok());
    // A page that was never allocated fails the walk.
    assert!(matches!(
        cache.attach_page(PageId(99), FixPriority::Middle),
        Err(EngineError::VerifyAborted)
    ));
    let progress = cache.end_verification();
    assert!(!progress.is_good());
    assert_eq!(progress.pages_checked(), 1);
}

#[test]
fn handle_clone_shares_the_fix() {
    let dir = tempdir().unwrap();
    let cache = cache_at(&dir.path().join("f"), 10);
    cache.open(FixMode::Write, CancelToken::new());

    let page = cache.allocate_page(|_| {}).unwrap();
    let second = page.clone();
    drop(page);
    // The page is still fixed through the clone.
    second.data_mut()[1] = 1;
    assert_eq!(second.data()[1], 1);
}
