#![cfg(unix)]

use std::io::Write;

use art_reflect::workaround::{create_renderer, reproduce_defect, CreatePath};
use art_reflect::{ManagedRuntime, UnsafeReflect, Value, Vm, VmOptions};
use tempfile::NamedTempFile;

const RENDERER: &str = "android.graphics.pdf.PdfRenderer";

fn document(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents).expect("write");
    file.flush().expect("flush");
    file
}

fn page_count(reflect: &UnsafeReflect<Vm>, renderer: art_reflect::ObjRef) -> Option<Value> {
    let class = reflect.runtime().find_class(RENDERER).ok()?;
    reflect.invoke(class, Some(renderer), "getPageCount", None, &[])
}

#[test]
fn rejected_document_is_closed_once_before_oreo() {
    let vm = Vm::new(25).expect("vm");
    let file = document(b"definitely not a pdf");
    let input = vm.open_file(file.path()).expect("open");
    let reflect = UnsafeReflect::new(vm.clone());

    let outcome = create_renderer(&reflect, input);
    assert_eq!(outcome.renderer, None);
    assert_eq!(outcome.path, CreatePath::Legacy);
    assert!(vm.is_closed(input).expect("closed"));

    vm.run_finalization();
    assert_eq!(vm.aborted(), None);
}

#[test]
fn unpatched_constructor_double_closes_before_oreo() {
    let vm = Vm::new(25).expect("vm");
    let file = document(b"definitely not a pdf");
    let input = vm.open_file(file.path()).expect("open");
    let reflect = UnsafeReflect::new(vm.clone());

    assert_eq!(reproduce_defect(&reflect, input), None);
    assert!(vm.is_closed(input).expect("closed"));
    vm.run_finalization();
    assert!(vm.aborted().is_some_and(|m| m.contains("double close")));
}

#[test]
fn replayed_constructor_opens_valid_documents() {
    let vm = Vm::new(24).expect("vm");
    let file = document(b"%PDF-1.5\n<< /Type /Pages >> << /Type /Page >> << /Type /Page >>");
    let input = vm.open_file(file.path()).expect("open");
    let reflect = UnsafeReflect::new(vm.clone());

    let outcome = create_renderer(&reflect, input);
    assert_eq!(outcome.path, CreatePath::Legacy);
    let renderer = outcome.renderer.expect("renderer");
    assert_eq!(page_count(&reflect, renderer), Some(Value::Int(2)));
    assert!(!vm.is_closed(input).expect("open input"));

    let class = vm.find_class(RENDERER).expect("class");
    assert_eq!(reflect.invoke(class, Some(renderer), "close", None, &[]), Some(Value::Void));
    assert!(vm.is_closed(input).expect("closed"));
    assert_eq!(vm.open_documents(), 0);
    vm.run_finalization();
    assert_eq!(vm.aborted(), None);
}

#[test]
fn failed_replay_falls_back_to_the_constructor() {
    let options = VmOptions::default().with_sdk(25).with_raw_memory(false);
    let vm = Vm::with_options(options).expect("vm");
    let file = document(b"%PDF-1.4 << /Type /Page >> << /Type /Page >> << /Type /Page >>");
    let input = vm.open_file(file.path()).expect("open");
    let reflect = UnsafeReflect::new(vm.clone());

    let outcome = create_renderer(&reflect, input);
    assert_eq!(outcome.path, CreatePath::Constructor);
    let renderer = outcome.renderer.expect("renderer");
    assert_eq!(page_count(&reflect, renderer), Some(Value::Int(3)));
    assert!(!vm.is_closed(input).expect("open input"));
    assert_eq!(vm.open_documents(), 1);

    vm.run_finalization();
    assert_eq!(vm.aborted(), None);
    assert!(vm.is_closed(input).expect("closed"));
    assert_eq!(vm.open_documents(), 0);
}

#[test]
fn constructor_is_used_from_oreo_on() {
    for sdk in [26, 30, 33] {
        let vm = Vm::new(sdk).expect("vm");
        let reflect = UnsafeReflect::new(vm.clone());

        let bad = document(b"garbage");
        let input = vm.open_file(bad.path()).expect("open");
        let outcome = create_renderer(&reflect, input);
        assert_eq!(outcome.path, CreatePath::Constructor);
        assert_eq!(outcome.renderer, None);
        assert!(vm.is_closed(input).expect("closed"));

        let good = document(b"%PDF-1.7 << /Type /Page >>");
        let input = vm.open_file(good.path()).expect("open");
        let outcome = create_renderer(&reflect, input);
        assert_eq!(outcome.path, CreatePath::Constructor);
        let renderer = outcome.renderer.expect("renderer");
        assert_eq!(page_count(&reflect, renderer), Some(Value::Int(1)));

        vm.run_finalization();
        assert_eq!(vm.aborted(), None, "API {}", sdk);
    }
}
