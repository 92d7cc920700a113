use super::*;
use std::sync::atomic::AtomicUsize;
use std::thread;

#[derive(Debug, PartialEq)]
struct TestData {
    name: String,
}

#[test]
fn test_register_resolve_release() {
    let table = HandleTable::new();
    let id = table.register(Object::new(TestData {
        name: "test_data".into(),
    }));

    let object = table.resolve(id).unwrap();
    assert_eq!(object.downcast_ref::<TestData>().unwrap().name, "test_data");

    table.release(id).unwrap();
    assert!(table.resolve(id).is_none());
    assert_eq!(table.release(id).unwrap_err(), HandleError::NotFound(id));
}

#[test]
fn test_ids_monotonic_never_reused() {
    let table = HandleTable::new();
    let a = table.register(Object::new(1u32));
    table.release(a).unwrap();
    let b = table.register(Object::new(2u32));
    assert!(b > a);
    assert_ne!(a, 0);
}

#[test]
fn test_register_does_not_deduplicate() {
    let table = HandleTable::new();
    let object = Object::new(String::from("shared"));
    let a = table.register(object.clone());
    let b = table.register(object.clone());
    assert_ne!(a, b);
    assert!(table.resolve(a).unwrap().ptr_eq(&table.resolve(b).unwrap()));
    assert_eq!(table.len(), 2);
}

#[test]
fn test_concurrent_registration() {
    let table = Arc::new(HandleTable::new());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let table = table.clone();
            thread::spawn(move || {
                (0..100)
                    .map(|i| table.register(Object::new(t * 1000 + i)))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 800);
    assert_eq!(table.len(), 800);
}

#[test]
fn test_local_handle_release_callback() {
    let record = local_handle(Object::new(TestData {
        name: "test_data".into(),
    }));
    assert_eq!(record.runtime_id, RUST_RUNTIME_ID);

    let object = resolve_local(&record).unwrap();
    assert!(object.is::<TestData>());

    let mut record_copy = record;
    unsafe { release_local_handle(&mut record_copy) };
    assert!(resolve_local(&record).is_err());

    // Second release is reported, not fatal
    unsafe { release_local_handle(&mut record_copy) };
}

static FOREIGN_RELEASES: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn count_release(_record: *mut CdtHandle) {
    FOREIGN_RELEASES.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_foreign_handle_released_once() {
    let foreign = ForeignHandle::new(CdtHandle {
        handle: 0xBEEF as *mut c_void,
        runtime_id: 99,
        release: Some(count_release),
    });
    let clone = foreign.clone();
    assert_eq!(foreign, clone);

    foreign.release().unwrap();
    assert_eq!(clone.release().unwrap_err(), HandleError::AlreadyReleased);
    assert_eq!(FOREIGN_RELEASES.load(Ordering::SeqCst), 1);
}

#[test]
fn test_foreign_handle_without_releaser() {
    let foreign = ForeignHandle::new(CdtHandle {
        handle: core::ptr::null_mut(),
        runtime_id: 5,
        release: None,
    });
    assert_eq!(
        foreign.release().unwrap_err(),
        HandleError::NoReleaser { runtime_id: 5 }
    );
}
