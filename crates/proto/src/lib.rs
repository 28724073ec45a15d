//! Generated gRPC code for tidekv protobuf definitions.

/// Common types (DcInfo, StrategyParams, UpdateStamp).
pub mod common {
    tonic::include_proto!("tide.common");
}

/// Inter-DC coordination service (AnnounceLocation, NewReplica, PushUpdate,
/// RemoteRead, EvictSignal).
pub mod sync {
    tonic::include_proto!("tide.sync");
}

/// Client API (Create, Read, Update, RemoveReplica).
pub mod client {
    tonic::include_proto!("tide.client");
}

/// Admin service (Health, Stats, KeyStatus).
pub mod admin {
    tonic::include_proto!("tide.admin");
}
