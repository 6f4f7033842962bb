//! Platform classes used by the document-renderer case study.
//!
//! `PdfRenderer`'s constructor behaves the way it did per release: before O
//! it stores its input before `nativeCreate` and keeps it after a failure,
//! so finalization closes the descriptor a second time and the runtime
//! aborts on the double close.

use std::fs::File;
use std::os::fd::IntoRawFd;
use std::path::Path;

use log::{debug, warn};

use crate::backend::{ManagedRuntime, ObjRef, RuntimeError, Value};
use crate::common::Modifiers;
use crate::sdk_version::codes;

use super::{ClassBuilder, Vm};

pub const POINT: &str = "android.graphics.Point";
pub const CLOSE_GUARD: &str = "dalvik.system.CloseGuard";
pub const PARCEL_FILE_DESCRIPTOR: &str = "android.os.ParcelFileDescriptor";
pub const PDF_RENDERER: &str = "android.graphics.pdf.PdfRenderer";

const PDF_MAGIC: &[u8] = b"%PDF-";
const MAX_DOCUMENT_SIZE: i64 = 64 * 1024 * 1024;

fn io_exception(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Thrown {
        class: "java.io.IOException".to_string(),
        message: message.into(),
    }
}

fn illegal_state(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Thrown {
        class: "java.lang.IllegalStateException".to_string(),
        message: message.into(),
    }
}

fn receiver(this: Option<ObjRef>) -> Result<ObjRef, RuntimeError> {
    this.ok_or_else(|| RuntimeError::NullPointer("receiver".to_string()))
}

fn object_arg(args: &[Value], index: usize) -> Option<ObjRef> {
    args.get(index).and_then(Value::as_object)
}

pub(crate) fn install(vm: &Vm) -> Result<(), RuntimeError> {
    vm.define_class(point())?;
    vm.define_class(close_guard())?;
    vm.define_class(parcel_file_descriptor())?;
    vm.define_class(pdf_renderer(vm.sdk()))?;
    Ok(())
}

fn point() -> ClassBuilder {
    ClassBuilder::new(POINT)
        .field("x", "I", Modifiers::PUBLIC)
        .field("y", "I", Modifiers::PUBLIC)
        .constructor(&[], Modifiers::PUBLIC, |_, _, _| Ok(Value::Void))
        .constructor(&["I", "I"], Modifiers::PUBLIC, |vm, this, args| {
            let this = receiver(this)?;
            vm.write_field(this, "x", args[0])?;
            vm.write_field(this, "y", args[1])?;
            Ok(Value::Void)
        })
}

fn close_guard() -> ClassBuilder {
    ClassBuilder::new(CLOSE_GUARD)
        .modifiers(Modifiers::PUBLIC | Modifiers::FINAL)
        .field("closerNameOrAllocationInfo", "Ljava/lang/Object;", Modifiers::PRIVATE)
        .constructor(&[], Modifiers::PRIVATE, |_, _, _| Ok(Value::Void))
        .method("get", &[], "Ldalvik/system/CloseGuard;", Modifiers::PUBLIC | Modifiers::STATIC, |vm, _, _| {
            let class = vm.find_class(CLOSE_GUARD)?;
            Ok(Value::Object(vm.alloc_object(class)?))
        })
        .method("open", &["Ljava/lang/String;"], "V", Modifiers::PUBLIC, |vm, this, args| {
            vm.write_field(receiver(this)?, "closerNameOrAllocationInfo", args[0])?;
            Ok(Value::Void)
        })
        .method("close", &[], "V", Modifiers::PUBLIC, |vm, this, _| {
            vm.write_field(receiver(this)?, "closerNameOrAllocationInfo", Value::Null)?;
            Ok(Value::Void)
        })
        .method("warnIfOpen", &[], "V", Modifiers::PUBLIC, |vm, this, _| {
            let this = receiver(this)?;
            if !vm.read_field(this, "closerNameOrAllocationInfo")?.is_null() {
                warn!("A resource was acquired at {:?} but never released", this);
            }
            Ok(Value::Void)
        })
}

fn parcel_file_descriptor() -> ClassBuilder {
    ClassBuilder::new(PARCEL_FILE_DESCRIPTOR)
        .field("mFd", "I", Modifiers::PRIVATE | Modifiers::FINAL)
        .field("mClosed", "Z", Modifiers::PRIVATE | Modifiers::VOLATILE)
        .constructor(&["I"], Modifiers::PUBLIC, |vm, this, args| {
            vm.write_field(receiver(this)?, "mFd", args[0])?;
            Ok(Value::Void)
        })
        .method("getFd", &[], "I", Modifiers::PUBLIC, |vm, this, _| {
            let this = receiver(this)?;
            if vm.read_field(this, "mClosed")? == Value::Boolean(true) {
                return Err(illegal_state("Already closed"));
            }
            vm.read_field(this, "mFd")
        })
        .method("close", &[], "V", Modifiers::PUBLIC, |vm, this, _| {
            let this = receiver(this)?;
            let fd = vm.read_field(this, "mFd")?.as_int().unwrap_or(-1);
            if vm.read_field(this, "mClosed")? == Value::Boolean(true) {
                return Err(vm.abort(format!("fdsan: double close of file descriptor {}", fd)));
            }
            if unsafe { libc::close(fd) } != 0 {
                warn!("close({}) failed: {}", fd, std::io::Error::last_os_error());
            }
            vm.write_field(this, "mClosed", Value::Boolean(true))?;
            debug!("closed file descriptor {}", fd);
            Ok(Value::Void)
        })
}

fn pdf_renderer(sdk: u32) -> ClassBuilder {
    let stores_input_early = sdk < codes::OREO;
    ClassBuilder::new(PDF_RENDERER)
        .modifiers(Modifiers::PUBLIC | Modifiers::FINAL)
        .field("mCloseGuard", "Ldalvik/system/CloseGuard;", Modifiers::PRIVATE | Modifiers::FINAL)
        .field("mTempPoint", "Landroid/graphics/Point;", Modifiers::PRIVATE | Modifiers::FINAL)
        .field("mInput", "Landroid/os/ParcelFileDescriptor;", Modifiers::PRIVATE)
        .field("mNativeDocument", "J", Modifiers::PRIVATE | Modifiers::FINAL | Modifiers::HIDDEN)
        .field("mPageCount", "I", Modifiers::PRIVATE | Modifiers::FINAL)
        .constructor(&["Landroid/os/ParcelFileDescriptor;"], Modifiers::PUBLIC, move |vm, this, args| {
            let this = receiver(this)?;
            let input = object_arg(args, 0).ok_or_else(|| RuntimeError::NullPointer("input cannot be null".to_string()))?;
            let guard = vm.call(vm.find_class(CLOSE_GUARD)?, None, "get", &[])?;
            vm.write_field(this, "mCloseGuard", guard)?;
            let point = vm.alloc_object(vm.find_class(POINT)?)?;
            vm.call(vm.find_class(POINT)?, Some(point), "<init>", &[])?;
            vm.write_field(this, "mTempPoint", Value::Object(point))?;

            let pfd = vm.find_class(PARCEL_FILE_DESCRIPTOR)?;
            let fd = vm.call(pfd, Some(input), "getFd", &[])?;
            let size = descriptor_size(fd.as_int().unwrap_or(-1))?;
            if stores_input_early {
                vm.write_field(this, "mInput", Value::Object(input))?;
            }
            let renderer = vm.find_class(PDF_RENDERER)?;
            let document = match vm.call(renderer, None, "nativeCreate", &[fd, Value::Long(size)]) {
                Ok(document) => document,
                Err(e) => {
                    vm.call(pfd, Some(input), "close", &[])?;
                    return Err(e);
                }
            };
            if !stores_input_early {
                vm.write_field(this, "mInput", Value::Object(input))?;
            }
            vm.write_field(this, "mNativeDocument", document)?;
            let pages = vm.call(renderer, None, "nativeGetPageCount", &[document])?;
            vm.write_field(this, "mPageCount", pages)?;
            if let Some(guard) = guard.as_object() {
                let message = vm.new_string("close")?;
                vm.call(vm.find_class(CLOSE_GUARD)?, Some(guard), "open", &[Value::Object(message)])?;
            }
            Ok(Value::Void)
        })
        .method("getPageCount", &[], "I", Modifiers::PUBLIC, |vm, this, _| {
            vm.read_field(receiver(this)?, "mPageCount")
        })
        .method("close", &[], "V", Modifiers::PUBLIC, |vm, this, _| {
            let this = receiver(this)?;
            vm.call(vm.find_class(PDF_RENDERER)?, Some(this), "doClose", &[])
        })
        .method("finalize", &[], "V", Modifiers::PROTECTED, |vm, this, _| {
            let this = receiver(this)?;
            if let Some(guard) = vm.read_field(this, "mCloseGuard")?.as_object() {
                vm.call(vm.find_class(CLOSE_GUARD)?, Some(guard), "warnIfOpen", &[])?;
            }
            vm.call(vm.find_class(PDF_RENDERER)?, Some(this), "doClose", &[])
        })
        .method("doClose", &[], "V", Modifiers::PRIVATE, |vm, this, _| {
            let this = receiver(this)?;
            let renderer = vm.find_class(PDF_RENDERER)?;
            let document = vm.read_field(this, "mNativeDocument")?;
            if document.as_long().is_some_and(|d| d != 0) {
                vm.call(renderer, None, "nativeClose", &[document])?;
                vm.write_field(this, "mNativeDocument", Value::Long(0))?;
            }
            if let Some(input) = vm.read_field(this, "mInput")?.as_object() {
                vm.call(vm.find_class(PARCEL_FILE_DESCRIPTOR)?, Some(input), "close", &[])?;
                vm.write_field(this, "mInput", Value::Null)?;
            }
            if let Some(guard) = vm.read_field(this, "mCloseGuard")?.as_object() {
                vm.call(vm.find_class(CLOSE_GUARD)?, Some(guard), "close", &[])?;
            }
            Ok(Value::Void)
        })
        .method(
            "nativeCreate",
            &["I", "J"],
            "J",
            Modifiers::PRIVATE | Modifiers::STATIC | Modifiers::NATIVE | Modifiers::HIDDEN,
            |vm, _, args| {
                let fd = args[0].as_int().unwrap_or(-1);
                let size = args[1].as_long().unwrap_or(0);
                let bytes = read_document(fd, size)?;
                if !bytes.starts_with(PDF_MAGIC) {
                    return Err(io_exception("file not in PDF format or corrupted"));
                }
                let pages = count_pages(&bytes);
                let mut st = vm.inner.state.lock();
                let handle = st.next_document;
                st.next_document += 1;
                st.documents.insert(handle, pages);
                debug!("opened document {} with {} pages", handle, pages);
                Ok(Value::Long(handle))
            },
        )
        .method(
            "nativeGetPageCount",
            &["J"],
            "I",
            Modifiers::PRIVATE | Modifiers::STATIC | Modifiers::NATIVE | Modifiers::HIDDEN,
            |vm, _, args| {
                let handle = args[0].as_long().unwrap_or(0);
                vm.inner
                    .state
                    .lock()
                    .documents
                    .get(&handle)
                    .map(|pages| Value::Int(*pages))
                    .ok_or_else(|| illegal_state(format!("no document {}", handle)))
            },
        )
        .method(
            "nativeClose",
            &["J"],
            "V",
            Modifiers::PRIVATE | Modifiers::STATIC | Modifiers::NATIVE,
            |vm, _, args| {
                let handle = args[0].as_long().unwrap_or(0);
                vm.inner.state.lock().documents.remove(&handle);
                Ok(Value::Void)
            },
        )
}

/// Size of the file behind `fd`, from `fstat`.
pub(crate) fn descriptor_size(fd: i32) -> Result<i64, RuntimeError> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        return Err(io_exception(format!("fstat({}): {}", fd, std::io::Error::last_os_error())));
    }
    Ok(stat.st_size as i64)
}

fn read_document(fd: i32, size: i64) -> Result<Vec<u8>, RuntimeError> {
    if !(0..=MAX_DOCUMENT_SIZE).contains(&size) {
        return Err(io_exception(format!("unsupported document size {}", size)));
    }
    let mut buffer = vec![0u8; size as usize];
    let mut filled = 0usize;
    while filled < buffer.len() {
        let read = unsafe {
            libc::pread(
                fd,
                buffer[filled..].as_mut_ptr() as *mut libc::c_void,
                buffer.len() - filled,
                filled as libc::off_t,
            )
        };
        match read {
            0 => break,
            n if n < 0 => return Err(io_exception(format!("pread({}): {}", fd, std::io::Error::last_os_error()))),
            n => filled += n as usize,
        }
    }
    buffer.truncate(filled);
    Ok(buffer)
}

/// Number of `/Type /Page` objects; the `/Pages` tree nodes do not count.
pub(crate) fn count_pages(bytes: &[u8]) -> i32 {
    const TYPE: &[u8] = b"/Type";
    const PAGE: &[u8] = b"/Page";
    let mut pages = 0;
    let mut pos = 0;
    while let Some(found) = bytes[pos..].windows(TYPE.len()).position(|w| w == TYPE) {
        let mut cursor = pos + found + TYPE.len();
        while bytes.get(cursor).is_some_and(|b| b.is_ascii_whitespace()) {
            cursor += 1;
        }
        let rest = &bytes[cursor..];
        if rest.starts_with(PAGE) && !rest.get(PAGE.len()).is_some_and(|b| b.is_ascii_alphanumeric()) {
            pages += 1;
        }
        pos = cursor;
    }
    pages
}

impl Vm {
    /// Open `path` read-only and wrap the descriptor in a `ParcelFileDescriptor`.
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<ObjRef, RuntimeError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| io_exception(format!("{}: {}", path.display(), e)))?;
        let fd = file.into_raw_fd();
        let class = self.find_class(PARCEL_FILE_DESCRIPTOR)?;
        let pfd = self.alloc_object(class)?;
        self.call(class, Some(pfd), "<init>", &[Value::Int(fd)])?;
        Ok(pfd)
    }

    /// Number of native documents currently open.
    pub fn open_documents(&self) -> usize {
        self.inner.state.lock().documents.len()
    }

    /// Whether a `ParcelFileDescriptor` has been closed.
    pub fn is_closed(&self, pfd: ObjRef) -> Result<bool, RuntimeError> {
        Ok(self.read_field(pfd, "mClosed")? == Value::Boolean(true))
    }
}
