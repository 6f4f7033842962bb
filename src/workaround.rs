//! `PdfRenderer` construction without the pre-O double close.
//!
//! Before O, a `PdfRenderer` whose `nativeCreate` fails keeps its input
//! descriptor, so its finalizer closes that descriptor a second time and
//! fdsan aborts the process. On those releases the renderer is allocated
//! without running its constructor and the constructor's steps are replayed
//! through the facade. A native-create failure closes the input and yields
//! no renderer. Any other failure falls back to the real constructor, which
//! is the only path from O on.

use log::{debug, warn};

use crate::backend::{ManagedRuntime, ObjRef, RuntimeError, Value};
use crate::reflect::{ReflectError, UnsafeReflect};
use crate::sdk_version::codes;
use crate::vm::platform::{CLOSE_GUARD, PARCEL_FILE_DESCRIPTOR, PDF_RENDERER, POINT};

/// Which construction path produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePath {
    /// Allocation plus replayed initialization.
    Legacy,
    /// The platform constructor.
    Constructor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererOutcome {
    pub renderer: Option<ObjRef>,
    pub path: CreatePath,
}

/// Build a renderer over `input`, avoiding the double close where it exists.
pub fn create_renderer<R: ManagedRuntime + 'static>(reflect: &UnsafeReflect<R>, input: ObjRef) -> RendererOutcome {
    if reflect.runtime().sdk_int() < codes::OREO {
        match replay_constructor(reflect, input) {
            Ok(renderer) => {
                return RendererOutcome {
                    renderer: Some(renderer),
                    path: CreatePath::Legacy,
                }
            }
            Err(ReflectError::NativeCreateFailure(cause)) => {
                debug!("document rejected, input closed: {}", cause);
                return RendererOutcome {
                    renderer: None,
                    path: CreatePath::Legacy,
                };
            }
            Err(e) => debug!("replayed construction failed, using the constructor: {}", e),
        }
    }
    RendererOutcome {
        renderer: construct(reflect, input),
        path: CreatePath::Constructor,
    }
}

/// Build a renderer with the unmodified constructor.
pub fn reproduce_defect<R: ManagedRuntime + 'static>(reflect: &UnsafeReflect<R>, input: ObjRef) -> Option<ObjRef> {
    construct(reflect, input)
}

fn construct<R: ManagedRuntime + 'static>(reflect: &UnsafeReflect<R>, input: ObjRef) -> Option<ObjRef> {
    let runtime = reflect.runtime();
    let renderer = runtime.find_class(PDF_RENDERER).ok()?;
    let pfd = runtime.find_class(PARCEL_FILE_DESCRIPTOR).ok()?;
    reflect.new_instance(renderer, Some(&[pfd]), &[Value::Object(input)])
}

fn errno_exception(call: &str) -> ReflectError {
    ReflectError::InvocationFailure(RuntimeError::Thrown {
        class: "android.system.ErrnoException".to_string(),
        message: format!("{} failed: {}", call, std::io::Error::last_os_error()),
    })
}

/// Rewind `fd` and return the size of the file behind it.
fn rewind_and_measure(fd: i32) -> Result<i64, ReflectError> {
    if unsafe { libc::lseek(fd, 0, libc::SEEK_SET) } < 0 {
        return Err(errno_exception("lseek"));
    }
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        return Err(errno_exception("fstat"));
    }
    Ok(stat.st_size as i64)
}

fn replay_constructor<R: ManagedRuntime + 'static>(
    reflect: &UnsafeReflect<R>,
    input: ObjRef,
) -> Result<ObjRef, ReflectError> {
    let runtime = reflect.runtime();
    let renderer_class = runtime.find_class(PDF_RENDERER)?;
    let point_class = runtime.find_class(POINT)?;
    let guard_class = runtime.find_class(CLOSE_GUARD)?;
    let pfd_class = runtime.find_class(PARCEL_FILE_DESCRIPTOR)?;
    let int = runtime.find_class("int")?;
    let long = runtime.find_class("long")?;

    let renderer = reflect.try_allocate_instance(renderer_class)?;
    let point = reflect.try_new_instance(point_class, None, &[])?;
    reflect.try_set_field(renderer_class, Some(renderer), "mTempPoint", Value::Object(point))?;
    let guard = reflect.try_invoke(guard_class, None, "get", None, &[])?;
    reflect.try_set_field(renderer_class, Some(renderer), "mCloseGuard", guard)?;

    let fd = reflect
        .try_invoke(pfd_class, Some(input), "getFd", None, &[])?
        .as_int()
        .ok_or_else(|| ReflectError::MemberNotFound("ParcelFileDescriptor.getFd returned no int".to_string()))?;
    let size = rewind_and_measure(fd)?;

    let created = reflect.try_invoke(
        renderer_class,
        None,
        "nativeCreate",
        Some(&[int, long]),
        &[Value::Int(fd), Value::Long(size)],
    );
    let document = match created {
        Ok(document) => document,
        Err(ReflectError::InvocationFailure(cause)) => {
            if let Err(e) = reflect.try_invoke(pfd_class, Some(input), "close", None, &[]) {
                warn!("closing the rejected input failed: {}", e);
            }
            return Err(ReflectError::NativeCreateFailure(cause.to_string()));
        }
        Err(e) => return Err(e),
    };

    if let Err(e) = finish_replay(reflect, renderer, input, document, guard) {
        if let Err(release) = release_document(reflect, renderer, document) {
            warn!("releasing document {:?} failed: {}", document, release);
        }
        return Err(e);
    }
    debug!("renderer {:?} built over fd {}", renderer, fd);
    Ok(renderer)
}

/// The constructor's steps after a successful `nativeCreate`.
fn finish_replay<R: ManagedRuntime + 'static>(
    reflect: &UnsafeReflect<R>,
    renderer: ObjRef,
    input: ObjRef,
    document: Value,
    guard: Value,
) -> Result<(), ReflectError> {
    let runtime = reflect.runtime();
    let renderer_class = runtime.find_class(PDF_RENDERER)?;
    let guard_class = runtime.find_class(CLOSE_GUARD)?;
    let long = runtime.find_class("long")?;
    let string = runtime.find_class("java.lang.String")?;

    reflect.try_set_field(renderer_class, Some(renderer), "mInput", Value::Object(input))?;
    reflect.try_set_field(renderer_class, Some(renderer), "mNativeDocument", document)?;
    let pages = reflect.try_invoke(renderer_class, None, "nativeGetPageCount", Some(&[long]), &[document])?;
    reflect.try_set_field(renderer_class, Some(renderer), "mPageCount", pages)?;
    if let Some(guard) = guard.as_object() {
        let method = runtime.new_string("close")?;
        reflect.try_invoke(guard_class, Some(guard), "open", Some(&[string]), &[Value::Object(method)])?;
    }
    Ok(())
}

/// Undo a partial replay: close the native document and detach the input,
/// which the constructor fallback takes over.
fn release_document<R: ManagedRuntime + 'static>(
    reflect: &UnsafeReflect<R>,
    renderer: ObjRef,
    document: Value,
) -> Result<(), ReflectError> {
    let runtime = reflect.runtime();
    let renderer_class = runtime.find_class(PDF_RENDERER)?;
    let long = runtime.find_class("long")?;
    reflect.try_invoke(renderer_class, None, "nativeClose", Some(&[long]), &[document])?;
    reflect.try_set_field(renderer_class, Some(renderer), "mNativeDocument", Value::Long(0))?;
    reflect.try_set_field(renderer_class, Some(renderer), "mInput", Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;
    use std::io::Write;

    #[test]
    fn test_failed_replay_releases_the_document() {
        let vm = Vm::new(25).expect("vm");
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"%PDF-1.4 << /Type /Page >>").expect("write");
        let input = vm.open_file(file.path()).expect("open");
        let reflect = UnsafeReflect::new(vm.clone());

        let renderer_class = vm.find_class(PDF_RENDERER).expect("renderer");
        let pfd_class = vm.find_class(PARCEL_FILE_DESCRIPTOR).expect("pfd");
        let renderer = vm.alloc_object(renderer_class).expect("alloc");
        let fd = vm.call(pfd_class, Some(input), "getFd", &[]).expect("fd");
        let size = rewind_and_measure(fd.as_int().expect("int fd")).expect("size");
        let document = vm
            .call(renderer_class, None, "nativeCreate", &[fd, Value::Long(size)])
            .expect("document");
        assert_eq!(vm.open_documents(), 1);

        let point = vm.find_class(POINT).expect("point");
        let not_a_guard = reflect.try_new_instance(point, None, &[]).expect("point");
        assert!(finish_replay(&reflect, renderer, input, document, Value::Object(not_a_guard)).is_err());
        release_document(&reflect, renderer, document).expect("release");

        assert_eq!(vm.open_documents(), 0);
        assert_eq!(vm.read_field(renderer, "mInput"), Ok(Value::Null));
        assert_eq!(vm.read_field(renderer, "mNativeDocument"), Ok(Value::Long(0)));
        assert!(!vm.is_closed(input).expect("input state"));
        vm.run_finalization();
        assert_eq!(vm.aborted(), None);
        assert!(!vm.is_closed(input).expect("input state"));
    }
}

