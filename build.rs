fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fall back to the bundled compiler when no system protoc is configured
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    println!("cargo:rerun-if-changed=proto/user_verification.proto");
    tonic_build::configure().compile(&["proto/user_verification.proto"], &["proto"])?;
    Ok(())
}
