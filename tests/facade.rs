use std::sync::Arc;
use std::thread;

use art_reflect::{
    ClassBuilder, LayoutPolicy, ManagedRuntime, Modifiers, ObjRef, ReflectConfig, ReflectError, RuntimeError,
    StrategyKind, UnsafeReflect, Value, Vm, VmOptions,
};

const SUBJECT: &str = "demo.Subject";

const RELEASES: [u32; 7] = [24, 25, 27, 30, 31, 33, 35];

fn this(receiver: Option<ObjRef>) -> Result<ObjRef, RuntimeError> {
    receiver.ok_or_else(|| RuntimeError::NullPointer("this".to_string()))
}

fn bump_constructed(vm: &Vm) -> Result<(), RuntimeError> {
    let class = vm.find_class(SUBJECT)?;
    let count = vm.read_static(class, "constructed")?.as_int().unwrap_or(0);
    vm.write_static(class, "constructed", Value::Int(count + 1))
}

fn define_subject(vm: &Vm) -> ObjRef {
    vm.define_class(
        ClassBuilder::new(SUBJECT)
            .field("publicStatic", "I", Modifiers::PUBLIC | Modifiers::STATIC)
            .field("protectedStatic", "I", Modifiers::PROTECTED | Modifiers::STATIC)
            .field("privateStatic", "I", Modifiers::PRIVATE | Modifiers::STATIC)
            .field("packageStatic", "J", Modifiers::STATIC)
            .field("constructed", "I", Modifiers::PRIVATE | Modifiers::STATIC)
            .field("publicField", "I", Modifiers::PUBLIC)
            .field("protectedField", "Ljava/lang/String;", Modifiers::PROTECTED)
            .field("privateField", "I", Modifiers::PRIVATE)
            .field("packageField", "Z", Modifiers::empty())
            .field("finalField", "I", Modifiers::PRIVATE | Modifiers::FINAL)
            .initial("publicStatic", Value::Int(1))
            .initial("protectedStatic", Value::Int(2))
            .initial("privateStatic", Value::Int(3))
            .initial("packageStatic", Value::Long(4))
            .constructor(&[], Modifiers::PUBLIC, |vm, receiver, _| {
                bump_constructed(vm)?;
                vm.write_field(this(receiver)?, "privateField", Value::Int(7))?;
                Ok(Value::Void)
            })
            .constructor(&["I"], Modifiers::PRIVATE, |vm, receiver, args| {
                bump_constructed(vm)?;
                vm.write_field(this(receiver)?, "privateField", args[0])?;
                Ok(Value::Void)
            })
            .method("answer", &[], "I", Modifiers::PRIVATE | Modifiers::STATIC, |_, _, _| {
                Ok(Value::Int(42))
            })
            .method("answer", &["I"], "I", Modifiers::PRIVATE | Modifiers::STATIC, |_, _, args| {
                Ok(args[0])
            })
            .method("sum", &["I", "I"], "I", Modifiers::PRIVATE | Modifiers::STATIC, |_, _, args| {
                Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0)))
            })
            .method("describe", &[], "Ljava/lang/String;", Modifiers::PRIVATE, |vm, receiver, _| {
                let value = vm.read_field(this(receiver)?, "privateField")?;
                Ok(Value::Object(vm.new_string(&format!("{:?}", value))?))
            })
            .method("touch", &[], "V", Modifiers::PUBLIC, |_, _, _| Ok(Value::Void)),
    )
    .expect("define demo.Subject")
}

fn setup(sdk: u32) -> (Vm, ObjRef, UnsafeReflect<Vm>) {
    let vm = Vm::new(sdk).expect("vm");
    let class = define_subject(&vm);
    let reflect = UnsafeReflect::new(vm.clone());
    (vm, class, reflect)
}

fn round_trip(reflect: &UnsafeReflect<Vm>, class: ObjRef, instance: Option<ObjRef>, name: &str, value: Value) {
    let original = reflect
        .get_field(class, instance, name)
        .unwrap_or_else(|| panic!("read {}", name));
    assert!(reflect.set_field(class, instance, name, value), "write {}", name);
    assert_eq!(reflect.get_field(class, instance, name), Some(value), "{}", name);
    assert!(reflect.set_field(class, instance, name, original), "restore {}", name);
    assert_eq!(reflect.get_field(class, instance, name), Some(original), "{}", name);
}

#[test]
fn static_fields_round_trip_at_every_visibility() {
    for sdk in RELEASES {
        let (_vm, class, reflect) = setup(sdk);
        round_trip(&reflect, class, None, "publicStatic", Value::Int(101));
        round_trip(&reflect, class, None, "protectedStatic", Value::Int(102));
        round_trip(&reflect, class, None, "privateStatic", Value::Int(103));
        round_trip(&reflect, class, None, "packageStatic", Value::Long(1 << 40));
    }
}

#[test]
fn instance_fields_round_trip_at_every_visibility() {
    for sdk in RELEASES {
        let (vm, class, reflect) = setup(sdk);
        let instance = reflect.new_instance(class, None, &[]).expect("instance");
        let text = vm.new_string("text").expect("string");
        round_trip(&reflect, class, Some(instance), "publicField", Value::Int(-1));
        round_trip(&reflect, class, Some(instance), "protectedField", Value::Object(text));
        round_trip(&reflect, class, Some(instance), "privateField", Value::Int(99));
        round_trip(&reflect, class, Some(instance), "packageField", Value::Boolean(true));
        round_trip(&reflect, class, Some(instance), "finalField", Value::Int(5));
    }
}

#[test]
fn private_static_scenario() {
    let (_vm, class, reflect) = setup(30);
    assert_eq!(reflect.get_field(class, None, "privateStatic"), Some(Value::Int(3)));
    assert!(reflect.set_field(class, None, "privateStatic", Value::Int(77)));
    assert_eq!(reflect.get_field(class, None, "privateStatic"), Some(Value::Int(77)));
    assert!(reflect.set_field(class, None, "privateStatic", Value::Int(3)));
    assert_eq!(reflect.get_field(class, None, "privateStatic"), Some(Value::Int(3)));
}

fn names(vm: &Vm, members: Vec<ObjRef>) -> Vec<String> {
    let mut names: Vec<String> = members
        .into_iter()
        .map(|m| vm.member_name(m).expect("name"))
        .collect();
    names.sort();
    names
}

#[test]
fn static_and_instance_fields_partition_declared_fields() {
    for sdk in RELEASES {
        let (vm, class, reflect) = setup(sdk);
        let statics = names(&vm, reflect.get_static_fields(class));
        let instance = names(&vm, reflect.get_instance_fields(class));
        assert_eq!(
            statics,
            vec!["constructed", "packageStatic", "privateStatic", "protectedStatic", "publicStatic"]
        );
        assert_eq!(
            instance,
            vec!["finalField", "packageField", "privateField", "protectedField", "publicField"]
        );
        assert!(statics.iter().all(|s| !instance.contains(s)));
    }
}

#[test]
fn methods_and_constructors_are_listed() {
    for sdk in RELEASES {
        let (vm, class, reflect) = setup(sdk);
        assert_eq!(names(&vm, reflect.get_static_methods(class)), vec!["answer", "answer", "sum"]);
        assert_eq!(names(&vm, reflect.get_instance_methods(class)), vec!["describe", "touch"]);
        assert_eq!(reflect.get_constructors(class).len(), 2);
    }
}

#[test]
fn missing_parameter_types_match_only_the_no_argument_overload() {
    for sdk in RELEASES {
        let (vm, class, reflect) = setup(sdk);
        let int = vm.find_class("int").expect("int");
        assert_eq!(reflect.invoke(class, None, "answer", None, &[]), Some(Value::Int(42)));
        assert_eq!(reflect.invoke(class, None, "answer", Some(&[]), &[]), Some(Value::Int(42)));
        assert_eq!(
            reflect.invoke(class, None, "answer", Some(&[int]), &[Value::Int(5)]),
            Some(Value::Int(5))
        );
        assert_eq!(reflect.invoke(class, None, "sum", None, &[]), None);
        assert!(matches!(
            reflect.try_invoke(class, None, "sum", Some(&[int]), &[Value::Int(1)]),
            Err(ReflectError::MemberNotFound(_))
        ));
        assert_eq!(
            reflect.invoke(class, None, "sum", Some(&[int, int]), &[Value::Int(2), Value::Int(3)]),
            Some(Value::Int(5))
        );
    }
}

#[test]
fn instance_methods_and_private_constructors() {
    for sdk in RELEASES {
        let (vm, class, reflect) = setup(sdk);
        let int = vm.find_class("int").expect("int");
        let instance = reflect
            .new_instance(class, Some(&[int]), &[Value::Int(9)])
            .expect("private constructor");
        assert_eq!(reflect.get_field(class, Some(instance), "privateField"), Some(Value::Int(9)));
        let described = reflect
            .invoke(class, Some(instance), "describe", None, &[])
            .and_then(|v| v.as_object())
            .and_then(|s| vm.string_value(s));
        assert_eq!(described.as_deref(), Some("Int(9)"));
        assert_eq!(reflect.invoke(class, Some(instance), "touch", None, &[]), Some(Value::Void));
        assert!(reflect.get_constructor(class, Some(&[int, int])).is_none());
    }
}

#[test]
fn allocate_instance_runs_no_constructor() {
    for sdk in RELEASES {
        let (_vm, class, reflect) = setup(sdk);
        reflect.new_instance(class, None, &[]).expect("constructed instance");
        let before = reflect.get_field(class, None, "constructed");
        assert_eq!(before, Some(Value::Int(1)));

        let raw = reflect.allocate_instance(class).expect("allocated");
        assert_eq!(reflect.get_field(class, None, "constructed"), before);
        assert_eq!(reflect.get_field(class, Some(raw), "privateField"), Some(Value::Int(0)));
        assert_eq!(reflect.get_field(class, Some(raw), "protectedField"), Some(Value::Null));
        assert_eq!(reflect.get_field(class, Some(raw), "packageField"), Some(Value::Boolean(false)));
    }
}

#[test]
fn hidden_members_are_reachable() {
    for sdk in [25, 28, 30, 33] {
        let vm = Vm::new(sdk).expect("vm");
        let class = vm
            .define_class(
                ClassBuilder::new("demo.Hidden")
                    .field("secret", "I", Modifiers::PRIVATE | Modifiers::STATIC | Modifiers::HIDDEN)
                    .initial("secret", Value::Int(1234))
                    .method(
                        "reveal",
                        &[],
                        "I",
                        Modifiers::PRIVATE | Modifiers::STATIC | Modifiers::HIDDEN,
                        |_, _, _| Ok(Value::Int(4321)),
                    ),
            )
            .expect("class");
        let enforced = sdk >= 28;
        assert_eq!(vm.declared_field(class, "secret").is_err(), enforced);

        let reflect = UnsafeReflect::new(vm.clone());
        assert_eq!(reflect.get_field(class, None, "secret"), Some(Value::Int(1234)));
        assert_eq!(reflect.invoke(class, None, "reveal", None, &[]), Some(Value::Int(4321)));
    }
}

#[test]
fn strategy_follows_configuration() {
    let (_vm, class, reflect) = setup(25);
    assert_eq!(reflect.strategy_kind(), StrategyKind::Legacy);
    assert_eq!(reflect.get_field(class, None, "privateStatic"), Some(Value::Int(3)));

    let vm = Vm::new(33).expect("vm");
    let class = define_subject(&vm);
    let config = ReflectConfig::from_json(r#"{"layout_policy": "always_calibrate"}"#).expect("config");
    assert_eq!(config.layout_policy, LayoutPolicy::AlwaysCalibrate);
    let reflect = UnsafeReflect::with_config(vm, config);
    assert_eq!(reflect.strategy_kind(), StrategyKind::Modern);
    round_trip(&reflect, class, None, "privateStatic", Value::Int(8));
}

#[test]
fn refused_raw_memory_collapses_to_nothing() {
    let vm = Vm::with_options(VmOptions::default().with_sdk(30).with_raw_memory(false)).expect("vm");
    let class = define_subject(&vm);
    let reflect = UnsafeReflect::new(vm);
    assert_eq!(reflect.get_field(class, None, "publicStatic"), None);
    assert!(!reflect.set_field(class, None, "publicStatic", Value::Int(2)));
    assert!(reflect.get_static_fields(class).is_empty());
    assert_eq!(reflect.allocate_instance(class), None);
    assert!(matches!(
        reflect.try_get_field(class, None, "publicStatic"),
        Err(ReflectError::CalibrationUnavailable(_))
    ));
}

#[test]
fn legacy_path_works_without_raw_memory_except_allocation() {
    let vm = Vm::with_options(VmOptions::default().with_sdk(25).with_raw_memory(false)).expect("vm");
    let class = define_subject(&vm);
    let reflect = UnsafeReflect::new(vm);
    assert_eq!(reflect.get_field(class, None, "privateStatic"), Some(Value::Int(3)));
    assert_eq!(reflect.allocate_instance(class), None);
}

#[test]
fn failures_are_total() {
    let (_vm, class, reflect) = setup(33);
    assert_eq!(reflect.get_field(class, None, "nope"), None);
    assert_eq!(reflect.get_field(class, None, "privateField"), None);
    assert!(!reflect.set_field(class, None, "publicStatic", Value::Boolean(true)));
    assert_eq!(reflect.invoke(class, None, "describe", None, &[]), None);
    assert!(matches!(
        reflect.try_get_static_field(class, "nope"),
        Err(ReflectError::MemberNotFound(_))
    ));
    assert!(matches!(
        reflect.try_set_field(class, None, "publicStatic", Value::Boolean(true)),
        Err(ReflectError::InvocationFailure(RuntimeError::IllegalArgument(_)))
    ));
}

#[test]
fn concurrent_lookups_share_scratch_handles() {
    let (_vm, class, reflect) = setup(31);
    let reflect = Arc::new(reflect);
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let reflect = Arc::clone(&reflect);
            thread::spawn(move || {
                for _ in 0..20 {
                    assert_eq!(reflect.get_field(class, None, "protectedStatic"), Some(Value::Int(2)));
                    assert_eq!(reflect.get_static_methods(class).len(), 3, "worker {}", i);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
}

#[test]
fn single_member_lookups() {
    for sdk in RELEASES {
        let (vm, class, reflect) = setup(sdk);
        let int = vm.find_class("int").expect("int");

        let field = reflect.get_static_field(class, "privateStatic").expect("static field");
        assert_eq!(vm.field_get(field, None), Ok(Value::Int(3)));
        assert!(reflect.get_static_field(class, "privateField").is_none());

        let field = reflect.get_instance_field(class, "privateField").expect("instance field");
        assert_eq!(vm.member_name(field).as_deref(), Ok("privateField"));
        assert!(reflect.get_instance_field(class, "privateStatic").is_none());

        let method = reflect.get_static_method(class, "answer", Some(&[int])).expect("static method");
        assert_eq!(vm.method_invoke(method, None, &[Value::Int(11)]), Ok(Value::Int(11)));
        assert!(reflect.get_static_method(class, "describe", None).is_none());

        let method = reflect.get_instance_method(class, "describe", None).expect("instance method");
        assert_eq!(vm.declaring_class(method), Ok(class));
        assert!(reflect.get_instance_method(class, "answer", None).is_none());
    }
}

#[test]
fn repeated_calls_fit_in_a_small_heap() {
    for sdk in [25, 30, 33] {
        let options = VmOptions::default().with_sdk(sdk).with_heap_capacity(256 * 1024);
        let vm = Vm::with_options(options).expect("vm");
        let class = define_subject(&vm);
        let reflect = UnsafeReflect::new(vm.clone());
        let int = vm.find_class("int").expect("int");

        assert_eq!(reflect.get_field(class, None, "privateStatic"), Some(Value::Int(3)));
        assert_eq!(reflect.invoke(class, None, "answer", Some(&[int]), &[Value::Int(1)]), Some(Value::Int(1)));
        assert!(reflect.set_field(class, None, "protectedStatic", Value::Int(2)));
        assert_eq!(reflect.get_static_fields(class).len(), 5);
        let used = vm.heap_used();

        for i in 0..5_000 {
            assert_eq!(
                reflect.get_field(class, None, "privateStatic"),
                Some(Value::Int(3)),
                "API {} call {}",
                sdk,
                i
            );
            assert_eq!(reflect.invoke(class, None, "answer", Some(&[int]), &[Value::Int(i)]), Some(Value::Int(i)));
            assert!(reflect.set_field(class, None, "protectedStatic", Value::Int(i)));
            assert_eq!(reflect.get_static_fields(class).len(), 5);
        }
        assert_eq!(vm.heap_used(), used, "API {}", sdk);
    }
}
