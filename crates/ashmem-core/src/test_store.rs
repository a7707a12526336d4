//! Recording backing store for unit tests.

use crate::backing::BackingStore;
use crate::error::{Error, Result};
use crate::range::PageRange;
use crate::util::PAGE_SIZE;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub(crate) struct TestStore {
    pub created: AtomicUsize,
    pub fail_release: AtomicBool,
    pub fail_create: AtomicBool,
    /// Every successful release, in order, tagged with the object name
    pub log: Mutex<Vec<(String, PageRange)>>,
}

#[derive(Debug)]
pub(crate) struct TestObject {
    pub name: String,
    pub size: usize,
    pub released: Mutex<Vec<PageRange>>,
}

impl TestObject {
    pub fn released(&self) -> Vec<PageRange> {
        self.released.lock().unwrap().clone()
    }
}

impl TestStore {
    pub fn log(&self) -> Vec<(String, PageRange)> {
        self.log.lock().unwrap().clone()
    }
}

impl BackingStore for TestStore {
    type Object = TestObject;

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn create_object(&self, name: &str, size: usize) -> Result<TestObject> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::ResourceExhausted("test object"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(TestObject {
            name: name.to_owned(),
            size,
            released: Mutex::new(Vec::new()),
        })
    }

    fn read_object(&self, object: &TestObject, offset: usize, buf: &mut [u8]) -> Result<usize> {
        // contents are a function of the offset, zero once released
        let page_size = self.page_size() as u64;
        let released = object.released();
        for (i, b) in buf.iter_mut().enumerate() {
            let at = offset + i;
            let page = at as u64 / page_size;
            *b = if released.iter().any(|r| r.start <= page && page <= r.end) {
                0
            } else {
                (at % 251) as u8 + 1
            };
        }
        Ok(buf.len())
    }

    fn release_pages(&self, object: &TestObject, pages: PageRange) -> Result<()> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(Error::backing(std::io::Error::other("release rejected")));
        }
        object.released.lock().unwrap().push(pages);
        self.log.lock().unwrap().push((object.name.clone(), pages));
        Ok(())
    }
}
