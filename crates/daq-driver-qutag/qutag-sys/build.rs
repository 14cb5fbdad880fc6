fn main() {
    // Only emit linking directives if the `qutag-sdk` feature is enabled.
    // This allows the crate to compile without the vendor SDK installed.
    #[cfg(feature = "qutag-sdk")]
    {
        use std::env;
        use std::path::PathBuf;

        println!("cargo:rerun-if-env-changed=QUTAG_SDK_DIR");
        println!("cargo:rerun-if-env-changed=QUTAG_LIB_DIR");

        let sdk_dir = env::var("QUTAG_SDK_DIR").expect(
            "QUTAG_SDK_DIR environment variable must be set when `qutag-sdk` feature is enabled.",
        );

        // Allow QUTAG_LIB_DIR to override the default lib path
        let sdk_lib_path = if let Ok(lib_dir) = env::var("QUTAG_LIB_DIR") {
            PathBuf::from(lib_dir)
        } else {
            PathBuf::from(&sdk_dir).join("lib")
        };

        // The lib path might not exist if libraries are installed globally.
        // Warn rather than panic.
        if !sdk_lib_path.exists() {
            eprintln!(
                "Warning: quTAG SDK lib path does not exist: {:?}",
                sdk_lib_path
            );
        }

        println!("cargo:rustc-link-search=native={}", sdk_lib_path.display());

        #[cfg(target_os = "windows")]
        {
            println!("cargo:rustc-link-lib=tdcbase64");
        }
        #[cfg(not(target_os = "windows"))]
        {
            println!("cargo:rustc-link-lib=tdcbase");
        }
    }

    #[cfg(not(feature = "qutag-sdk"))]
    {
        // Nothing to link; the crate still exports the shared constants and
        // data layouts used by mock-mode drivers.
    }
}
