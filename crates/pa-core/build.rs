//! Build script compiling the vendored xray management API protos.
//!
//! Only the client side is generated; the agent never serves these
//! interfaces. The proto set is the minimal wire-compatible subset the
//! agent actually calls (stats queries, inbound alteration, rate limits)
//! plus the account messages referenced through typed payloads.

const PROTO_FILES: &[&str] = &[
    "proto/xray/app/stats/command/command.proto",
    "proto/xray/app/proxyman/command/command.proto",
    "proto/xray/proxy/vless/account.proto",
    "proto/xray/proxy/vmess/account.proto",
    "proto/xray/proxy/trojan/account.proto",
    "proto/xray/proxy/shadowsocks/account.proto",
];

const PROTO_INCLUDE_DIR: &str = "proto";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(PROTO_FILES, &[PROTO_INCLUDE_DIR])?;
    println!("cargo:rerun-if-changed={PROTO_INCLUDE_DIR}/");
    Ok(())
}
