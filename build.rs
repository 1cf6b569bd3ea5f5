fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");

    // The peer messages are declared by hand in src/grpc/mod.rs, so only the
    // service glue is generated here and no protoc is required.
    let method = |name: &str, route: &str, input: &str, output: &str| {
        tonic_build::manual::Method::builder()
            .name(name)
            .route_name(route)
            .input_type(format!("crate::grpc::proto::{input}"))
            .output_type(format!("crate::grpc::proto::{output}"))
            .codec_path("tonic::codec::ProstCodec")
            .build()
    };

    let service = tonic_build::manual::Service::builder()
        .name("LeakyBucket")
        .package("meshlimit.v1")
        .method(method("join", "Join", "JoinRequest", "JoinResponse"))
        .method(method("sync", "Sync", "SyncRequest", "SyncResponse"))
        .build();

    tonic_build::manual::Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[service]);

    Ok(())
}
