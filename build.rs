fn main() {
    // Only generate the C header when the exported ABI is compiled in
    #[cfg(feature = "ffi")]
    generate_header();

    println!("cargo:rerun-if-changed=src/ffi/");
    println!("cargo:rerun-if-changed=cbindgen.toml");
}

#[cfg(feature = "ffi")]
fn generate_header() {
    let Ok(crate_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let output_file = std::path::PathBuf::from(&crate_dir)
        .join("include")
        .join("asherah_bridge.h");

    if let Some(parent) = output_file.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let mut config = match cbindgen::Config::from_file("cbindgen.toml") {
        Ok(config) => config,
        Err(e) => {
            println!("cargo:warning=cbindgen.toml unreadable: {e}");
            return;
        }
    };

    if config.sys_includes.is_empty() {
        config.sys_includes = vec![
            "stdint.h".to_string(),
            "stddef.h".to_string(),
            "stdbool.h".to_string(),
        ];
    }

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            let _ = bindings.write_to_file(&output_file);
        }
        Err(e) => {
            // Header generation never fails the build
            println!("cargo:warning=cbindgen failed: {e}");
        }
    }
}
