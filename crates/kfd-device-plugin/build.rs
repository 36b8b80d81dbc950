fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto = "proto/deviceplugin.proto";
    println!("cargo:rerun-if-changed={proto}");

    // Prefer a system protoc when one is configured
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // Server side for the plugin itself, client side for kubelet registration
    // and for exercising the plugin in tests.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&[proto], &["proto"])?;
    Ok(())
}
