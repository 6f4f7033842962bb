// Layout probing tool: calibrates the metadata layout on each release of the
// embedded runtime and compares it with the built-in layout table.

use art_reflect::art::Calibrator;
use art_reflect::sdk_version::codes;
use art_reflect::{ArtOffsets, ManagedRuntime, SdkVersion, Vm};

const RELEASES: [u32; 5] = [
    codes::OREO,
    codes::RED_VELVET_CAKE,
    codes::SNOW_CONE,
    codes::TIRAMISU,
    codes::VANILLA_ICE_CREAM,
];

fn main() {
    env_logger::init();

    println!("===========================================");
    println!("  ART Layout Probing Tool");
    println!("===========================================\n");

    let mut failures = 0;
    for sdk in RELEASES {
        let version = SdkVersion::new(sdk);
        println!("{}", version);

        let vm = match Vm::new(sdk) {
            Ok(vm) => vm,
            Err(e) => {
                println!("  ✗ runtime failed to start: {}\n", e);
                failures += 1;
                continue;
            }
        };
        let memory = match vm.raw_memory() {
            Ok(memory) => memory,
            Err(e) => {
                println!("  ✗ raw memory refused: {}\n", e);
                failures += 1;
                continue;
            }
        };

        let calibrator = Calibrator::new(&vm, &memory);
        let measured = match calibrator.calibrate() {
            Ok(offsets) => offsets,
            Err(e) => {
                println!("  ✗ {}\n", e);
                failures += 1;
                continue;
            }
        };
        match serde_json::to_string_pretty(&measured) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("  ✗ cannot serialize offsets: {}", e),
        }

        match ArtOffsets::for_sdk(sdk) {
            Some(table) => match calibrator.verify(&table) {
                Ok(mismatches) if mismatches.is_empty() => {
                    println!("  ✓ matches the {} table\n", table.version_name)
                }
                Ok(mismatches) => {
                    failures += 1;
                    for m in mismatches {
                        println!("  ✗ {}: table {:#x}, measured {:#x}", m.name, m.expected, m.measured);
                    }
                    println!();
                }
                Err(e) => {
                    failures += 1;
                    println!("  ✗ {}\n", e);
                }
            },
            None => println!("  - no table entry, calibration only\n"),
        }
    }

    if failures > 0 {
        println!("{} release(s) failed", failures);
        std::process::exit(1);
    }
}
