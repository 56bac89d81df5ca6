//! Integration with the supervised xray core.
//!
//! This crate owns everything that touches the core directly: the typed
//! management-RPC client, the protocol account encoding it needs, the
//! process supervisor, the on-disk configuration materializer, the
//! traffic-counter aggregator, and boot-time capability detection.

pub mod account;
pub mod capabilities;
mod error;
pub mod generate;
pub mod process;
pub mod rpc;
pub mod stats;

pub use error::CoreError;
pub use generate::ConfigGenerator;
pub use process::Supervisor;
pub use rpc::XrayApiClient;
pub use stats::{ScopeTraffic, StatsAggregator, TrafficSnapshot, UserTraffic};

/// Generated protobuf code for the xray management API.
///
/// The module tree mirrors the proto package paths so cross-package
/// references resolve; see `build.rs` for the compiled set.
pub mod proto {
    pub mod xray {
        pub mod common {
            pub mod serial {
                tonic::include_proto!("xray.common.serial");
            }
            pub mod protocol {
                tonic::include_proto!("xray.common.protocol");
            }
        }
        pub mod app {
            pub mod stats {
                pub mod command {
                    tonic::include_proto!("xray.app.stats.command");
                }
            }
            pub mod proxyman {
                pub mod command {
                    tonic::include_proto!("xray.app.proxyman.command");
                }
            }
        }
        pub mod proxy {
            pub mod vless {
                tonic::include_proto!("xray.proxy.vless");
            }
            pub mod vmess {
                tonic::include_proto!("xray.proxy.vmess");
            }
            pub mod trojan {
                tonic::include_proto!("xray.proxy.trojan");
            }
            pub mod shadowsocks {
                tonic::include_proto!("xray.proxy.shadowsocks");
            }
        }
    }
}
