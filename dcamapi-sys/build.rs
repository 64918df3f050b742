use std::env;
use std::path::PathBuf;

fn main() {
    // Only run bindgen and linking logic if the `dcam-sdk` feature is enabled.
    // Without it the crate compiles to an empty module so the workspace builds
    // on machines that have never seen a Hamamatsu camera.
    #[cfg(feature = "dcam-sdk")]
    {
        println!("cargo:rerun-if-env-changed=DCAM_SDK_DIR");
        println!("cargo:rerun-if-env-changed=DCAM_LIB_DIR");
        println!("cargo:rerun-if-changed=wrapper.h");

        let sdk_dir = env::var("DCAM_SDK_DIR").expect(
            "DCAM_SDK_DIR environment variable must be set when `dcam-sdk` feature is enabled.",
        );

        // The SDK ships headers as `inc/dcamapi4.h` and `inc/dcamprop.h`.
        let sdk_include_path = PathBuf::from(&sdk_dir).join("inc");

        // Allow DCAM_LIB_DIR to override the default lib path
        let sdk_lib_path = if let Ok(lib_dir) = env::var("DCAM_LIB_DIR") {
            PathBuf::from(lib_dir)
        } else {
            PathBuf::from(&sdk_dir).join("lib")
        };

        if !sdk_include_path.exists() {
            panic!(
                "DCAM SDK include path does not exist: {:?}",
                sdk_include_path
            );
        }
        // libdcamapi is normally installed system-wide by the DCAM runtime,
        // so a missing SDK lib directory is only worth a warning.
        if !sdk_lib_path.exists() {
            eprintln!(
                "Warning: DCAM SDK lib path does not exist: {:?}",
                sdk_lib_path
            );
        }

        let bindings = bindgen::Builder::default()
            .header("wrapper.h")
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .clang_arg(format!("-I{}", sdk_include_path.display()))
            // API entry points
            .allowlist_function("dcamapi_.*")
            .allowlist_function("dcamdev_.*")
            .allowlist_function("dcamprop_.*")
            .allowlist_function("dcambuf_.*")
            .allowlist_function("dcamcap_.*")
            .allowlist_function("dcamwait_.*")
            // Parameter structs and handles
            .allowlist_type("HDCAM|HDCAMWAIT")
            .allowlist_type("DCAM.*")
            .allowlist_type("int32|_ui32")
            // Error codes, property ids and enum values become plain integer
            // constants named exactly as in the C headers (DCAMERR_BUSY, ...).
            .constified_enum("DCAM.*")
            .prepend_enum_name(false)
            .allowlist_var("DCAM_IDPROP_.*")
            .allowlist_var("DCAMPROP_.*")
            .generate()
            .expect("Unable to generate bindings");

        let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
        bindings
            .write_to_file(out_path.join("bindings.rs"))
            .expect("Couldn't write bindings!");

        println!("cargo:rustc-link-search=native={}", sdk_lib_path.display());

        #[cfg(target_os = "windows")]
        {
            println!("cargo:rustc-link-lib=dcamapi");
        }
        #[cfg(target_os = "linux")]
        {
            println!("cargo:rustc-link-lib=dcamapi"); // libdcamapi.so
        }
    }
    #[cfg(not(feature = "dcam-sdk"))]
    {
        let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
        std::fs::write(
            out_path.join("bindings.rs"),
            "// Dummy bindings when dcam-sdk feature is not enabled\n",
        )
        .expect("Couldn't write dummy bindings!");
    }
}
