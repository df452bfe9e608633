//! C ABI shim for embedding AcornDB.
//!
//! Conventions:
//!
//! - All strings are UTF-8, NUL-terminated.
//! - Handles are opaque pointers created and freed by paired functions
//!   (`acorn_grove_new` / `acorn_grove_free`).
//! - Return codes: `0` = OK, `1` = not found, `-1` = error; error detail is
//!   retrievable per thread via [`acorn_last_error`].
//! - Every buffer the shim allocates has a paired free
//!   ([`acorn_string_free`]); freeing a NULL pointer is a no-op.
//! - Generics do not cross the boundary: payloads are JSON bytes, and
//!   collections opened through the shim hold `serde_json::Value`.
#![allow(unsafe_code)]

use std::cell::RefCell;
use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr;

use acorn_db::backend::log::AppendLogBackend;
use acorn_db::backend::memory::MemoryBackend;
use acorn_db::builder::CollectionBuilder;
use acorn_db::collection::Collection;
use acorn_db::grove::Grove;

/// OK return code.
pub const ACORN_OK: c_int = 0;
/// Not-found return code.
pub const ACORN_NOT_FOUND: c_int = 1;
/// Error return code; see [`acorn_last_error`].
pub const ACORN_ERR: c_int = -1;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    let cstring = CString::new(message.clone())
        .unwrap_or_else(|_| CString::new("error message contained NUL").unwrap_or_default());
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(cstring));
}

/// Opaque grove handle.
pub struct AcornGrove {
    grove: Grove,
}

/// Reads a required UTF-8 argument; records an error and returns `None` on
/// NULL or invalid UTF-8.
///
/// # Safety
///
/// `ptr` must be NULL or a valid NUL-terminated string.
unsafe fn required_str<'a>(ptr: *const c_char, what: &str) -> Option<&'a str> {
    if ptr.is_null() {
        set_last_error(format!("{what} must not be NULL"));
        return None;
    }
    // SAFETY: non-null, caller guarantees NUL termination.
    match unsafe { CStr::from_ptr(ptr) }.to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            set_last_error(format!("{what} is not valid UTF-8"));
            None
        }
    }
}

/// Resolves the collection planted under `tag`.
fn collection_for(grove: &AcornGrove, tag: &str) -> Option<Collection<serde_json::Value>> {
    match grove.grove.handle(tag) {
        Some(handle) => handle.typed::<serde_json::Value>(),
        None => {
            set_last_error(format!("no collection planted under tag `{tag}`"));
            None
        }
    }
}

/// Detail of the most recent error on this thread, or NULL if none has
/// occurred yet. The pointer stays valid until the next failing shim call
/// on the same thread; do not free it. Check return codes first: the
/// detail is not reset by successful calls.
#[no_mangle]
pub extern "C" fn acorn_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}

/// Creates a new grove. Free with [`acorn_grove_free`].
#[no_mangle]
pub extern "C" fn acorn_grove_new() -> *mut AcornGrove {
    Box::into_raw(Box::new(AcornGrove {
        grove: Grove::new(),
    }))
}

/// Disposes every planted collection and frees the grove. NULL is a no-op.
///
/// # Safety
///
/// `grove` must be a pointer returned by [`acorn_grove_new`], not yet freed.
#[no_mangle]
pub unsafe extern "C" fn acorn_grove_free(grove: *mut AcornGrove) {
    if grove.is_null() {
        return;
    }
    // SAFETY: per contract, this pointer came from Box::into_raw.
    let boxed = unsafe { Box::from_raw(grove) };
    boxed.grove.dispose_all();
}

/// Plants a volatile in-memory collection under `tag`.
///
/// # Safety
///
/// `grove` must be a live grove handle; `tag` a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn acorn_grove_open_memory(
    grove: *mut AcornGrove,
    tag: *const c_char,
) -> c_int {
    if grove.is_null() {
        set_last_error("grove must not be NULL");
        return ACORN_ERR;
    }
    // SAFETY: per contract.
    let grove = unsafe { &*grove };
    let Some(tag) = (unsafe { required_str(tag, "tag") }) else {
        return ACORN_ERR;
    };

    match CollectionBuilder::<serde_json::Value>::new(Box::new(MemoryBackend::new())).open() {
        Ok(collection) => {
            grove.grove.plant_as(tag, collection);
            ACORN_OK
        }
        Err(err) => {
            set_last_error(err.to_string());
            ACORN_ERR
        }
    }
}

/// Plants an append-only-log-backed collection under `tag`, storing at
/// `path` (a directory; the log file is created inside it).
///
/// # Safety
///
/// `grove` must be a live grove handle; `tag` and `path` valid
/// NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn acorn_grove_open_log(
    grove: *mut AcornGrove,
    tag: *const c_char,
    path: *const c_char,
) -> c_int {
    if grove.is_null() {
        set_last_error("grove must not be NULL");
        return ACORN_ERR;
    }
    // SAFETY: per contract.
    let grove = unsafe { &*grove };
    let Some(tag) = (unsafe { required_str(tag, "tag") }) else {
        return ACORN_ERR;
    };
    let Some(path) = (unsafe { required_str(path, "path") }) else {
        return ACORN_ERR;
    };

    let backend = match AppendLogBackend::open_dir(path) {
        Ok(backend) => backend,
        Err(err) => {
            set_last_error(err.to_string());
            return ACORN_ERR;
        }
    };
    match CollectionBuilder::<serde_json::Value>::new(Box::new(backend)).open() {
        Ok(collection) => {
            grove.grove.plant_as(tag, collection);
            ACORN_OK
        }
        Err(err) => {
            set_last_error(err.to_string());
            ACORN_ERR
        }
    }
}

/// Stores a JSON payload under `id` in the collection tagged `tag`.
///
/// # Safety
///
/// `grove` must be a live grove handle; `tag`, `id`, and `payload_json`
/// valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn acorn_put(
    grove: *const AcornGrove,
    tag: *const c_char,
    id: *const c_char,
    payload_json: *const c_char,
) -> c_int {
    if grove.is_null() {
        set_last_error("grove must not be NULL");
        return ACORN_ERR;
    }
    // SAFETY: per contract.
    let grove = unsafe { &*grove };
    let (Some(tag), Some(id), Some(payload)) = (unsafe {
        (
            required_str(tag, "tag"),
            required_str(id, "id"),
            required_str(payload_json, "payload"),
        )
    }) else {
        return ACORN_ERR;
    };
    let Some(collection) = collection_for(grove, tag) else {
        return ACORN_ERR;
    };

    let doc: serde_json::Value = match serde_json::from_str(payload) {
        Ok(doc) => doc,
        Err(err) => {
            set_last_error(format!("payload is not valid JSON: {err}"));
            return ACORN_ERR;
        }
    };
    match collection.put_with_id(id, doc) {
        Ok(()) => {
            ACORN_OK
        }
        Err(err) => {
            set_last_error(err.to_string());
            ACORN_ERR
        }
    }
}

/// Fetches the JSON payload for `id`. On OK, `*out` receives a string the
/// caller must free with [`acorn_string_free`].
///
/// # Safety
///
/// `grove` must be a live grove handle; `tag` and `id` valid NUL-terminated
/// strings; `out` a valid pointer to a `char*` slot.
#[no_mangle]
pub unsafe extern "C" fn acorn_get(
    grove: *const AcornGrove,
    tag: *const c_char,
    id: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    if grove.is_null() || out.is_null() {
        set_last_error("grove and out must not be NULL");
        return ACORN_ERR;
    }
    // SAFETY: per contract.
    unsafe { *out = ptr::null_mut() };
    let grove = unsafe { &*grove };
    let (Some(tag), Some(id)) =
        (unsafe { (required_str(tag, "tag"), required_str(id, "id")) })
    else {
        return ACORN_ERR;
    };
    let Some(collection) = collection_for(grove, tag) else {
        return ACORN_ERR;
    };

    match collection.get(id) {
        Ok(Some(doc)) => {
            let rendered = doc.to_string();
            match CString::new(rendered) {
                Ok(cstring) => {
                    // SAFETY: out checked non-null above.
                    unsafe { *out = cstring.into_raw() };
                    ACORN_OK
                }
                Err(_) => {
                    set_last_error("payload contained an interior NUL byte");
                    ACORN_ERR
                }
            }
        }
        Ok(None) => ACORN_NOT_FOUND,
        Err(err) => {
            set_last_error(err.to_string());
            ACORN_ERR
        }
    }
}

/// Deletes `id`. Returns OK when a record was removed, not-found otherwise.
///
/// # Safety
///
/// `grove` must be a live grove handle; `tag` and `id` valid NUL-terminated
/// strings.
#[no_mangle]
pub unsafe extern "C" fn acorn_delete(
    grove: *const AcornGrove,
    tag: *const c_char,
    id: *const c_char,
) -> c_int {
    if grove.is_null() {
        set_last_error("grove must not be NULL");
        return ACORN_ERR;
    }
    // SAFETY: per contract.
    let grove = unsafe { &*grove };
    let (Some(tag), Some(id)) =
        (unsafe { (required_str(tag, "tag"), required_str(id, "id")) })
    else {
        return ACORN_ERR;
    };
    let Some(collection) = collection_for(grove, tag) else {
        return ACORN_ERR;
    };

    match collection.delete(id) {
        Ok(true) => {
            ACORN_OK
        }
        Ok(false) => ACORN_NOT_FOUND,
        Err(err) => {
            set_last_error(err.to_string());
            ACORN_ERR
        }
    }
}

/// Number of records in the collection, or -1 on error.
///
/// # Safety
///
/// `grove` must be a live grove handle; `tag` a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn acorn_count(grove: *const AcornGrove, tag: *const c_char) -> i64 {
    if grove.is_null() {
        set_last_error("grove must not be NULL");
        return -1;
    }
    // SAFETY: per contract.
    let grove = unsafe { &*grove };
    let Some(tag) = (unsafe { required_str(tag, "tag") }) else {
        return -1;
    };
    let Some(collection) = collection_for(grove, tag) else {
        return -1;
    };
    i64::try_from(collection.count()).unwrap_or(i64::MAX)
}

/// Frees a string allocated by this shim. NULL is a no-op.
///
/// # Safety
///
/// `s` must be NULL or a pointer previously handed out by [`acorn_get`],
/// not yet freed.
#[no_mangle]
pub unsafe extern "C" fn acorn_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    // SAFETY: per contract, this came from CString::into_raw.
    drop(unsafe { CString::from_raw(s) });
}
