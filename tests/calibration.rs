use art_reflect::art::{visitor, Calibrator, Enumerator, MetadataArray, ScratchPool, Visit};
use art_reflect::{ArtOffsets, ClassBuilder, ManagedRuntime, Modifiers, Vm, VmOptions};

#[test]
fn measured_layout_matches_the_table() {
    for sdk in 26..=34 {
        let vm = Vm::new(sdk).expect("vm");
        let memory = vm.raw_memory().expect("memory");
        let calibrator = Calibrator::new(&vm, &memory);
        let table = ArtOffsets::for_sdk(sdk).expect("table entry");
        let mismatches = calibrator.verify(&table).expect("calibrated");
        assert!(mismatches.is_empty(), "API {}: {:?}", sdk, mismatches);
    }
}

#[test]
fn measured_layout_is_self_consistent() {
    let vm = Vm::new(35).expect("vm");
    let memory = vm.raw_memory().expect("memory");
    let offsets = Calibrator::new(&vm, &memory).calibrate().expect("calibrated");
    assert!(offsets.validate().is_ok());
    assert_eq!(offsets.art_method_size, 0x18);
    assert!(offsets.art_field_size > 0);
}

#[test]
fn raw_memory_can_be_refused() {
    let vm = Vm::with_options(VmOptions::default().with_sdk(30).with_raw_memory(false)).expect("vm");
    assert!(vm.raw_memory().is_err());
}

#[test]
fn enumeration_visits_every_declared_method() {
    let vm = Vm::new(33).expect("vm");
    let mut builder = ClassBuilder::new("demo.Many");
    for i in 0..12 {
        builder = builder.method(&format!("m{}", i), &[], "V", Modifiers::PRIVATE, |_, _, _| {
            Ok(art_reflect::Value::Void)
        });
    }
    let class = vm.define_class(builder).expect("class");

    let memory = vm.raw_memory().expect("memory");
    let offsets = ArtOffsets::for_sdk(33).expect("table");
    let scratch = ScratchPool::new();
    let enumerator = Enumerator::new(&vm, &memory, &offsets, &scratch, 33);

    let mut names = Vec::new();
    let visits = enumerator
        .enumerate(
            class,
            MetadataArray::Methods,
            &mut visitor(
                |n| n.starts_with('m'),
                |m| {
                    names.push(vm.member_name(m).expect("name"));
                    Visit::Continue
                },
            ),
        )
        .expect("walk");
    assert_eq!(names.len(), 12);
    assert!(visits >= 12);

    let mut first = None;
    enumerator
        .enumerate(
            class,
            MetadataArray::Methods,
            &mut visitor(
                |n| n == "m7",
                |m| {
                    first = Some(m);
                    Visit::Done
                },
            ),
        )
        .expect("walk");
    let found = first.expect("m7");
    assert_eq!(vm.member_name(found).expect("name"), "m7");
    assert_eq!(vm.declaring_class(found), Ok(class));
}

#[test]
fn config_parses_with_defaults() {
    let config = art_reflect::ReflectConfig::from_json(r#"{"modern_sdk": 28}"#).expect("config");
    assert_eq!(config.modern_sdk, 28);
    assert_eq!(config.private_lookup_sdk, 33);
    assert!(matches!(
        art_reflect::ReflectConfig::from_json("{\"layout_policy\": \"sometimes\"}"),
        Err(_)
    ));
}
