//! Conversions between proto types and domain types.

use std::collections::BTreeSet;
use tide_common::{DcId, UpdateStamp};
use tide_proto::common as pb;
use tide_repl::params::{StrategyKind, StrategyParams};

// ---------------------------------------------------------------------------
// StrategyParams
// ---------------------------------------------------------------------------

pub fn params_to_proto(params: &StrategyParams) -> pb::StrategyParams {
    pb::StrategyParams {
        decay_time: params.decay_time,
        decay_factor: params.decay_factor,
        repl_threshold: params.repl_threshold,
        rmv_threshold: params.rmv_threshold,
        max_strength: params.max_strength,
        rstrength: params.rstrength,
        wstrength: params.wstrength,
        min_dcs_number: params.min_dcs_number as u32,
    }
}

pub fn params_from_proto(proto: &pb::StrategyParams) -> StrategyParams {
    StrategyParams {
        decay_time: proto.decay_time,
        decay_factor: proto.decay_factor,
        repl_threshold: proto.repl_threshold,
        rmv_threshold: proto.rmv_threshold,
        max_strength: proto.max_strength,
        rstrength: proto.rstrength,
        wstrength: proto.wstrength,
        min_dcs_number: proto.min_dcs_number as usize,
    }
}

// ---------------------------------------------------------------------------
// UpdateStamp
// ---------------------------------------------------------------------------

pub fn stamp_to_proto(stamp: &UpdateStamp) -> pb::UpdateStamp {
    pb::UpdateStamp {
        wall_ms: stamp.wall_ms,
        seq: stamp.seq,
        dc: stamp.dc.to_string(),
    }
}

pub fn stamp_from_proto(proto: &pb::UpdateStamp) -> UpdateStamp {
    UpdateStamp {
        wall_ms: proto.wall_ms,
        seq: proto.seq,
        dc: DcId::new(proto.dc.clone()),
    }
}

// ---------------------------------------------------------------------------
// StrategyKind / DC sets
// ---------------------------------------------------------------------------

pub fn kind_from_tag(tag: &str) -> Result<StrategyKind, tonic::Status> {
    StrategyKind::from_tag(tag)
        .ok_or_else(|| tonic::Status::invalid_argument(format!("unknown strategy tag '{tag}'")))
}

pub fn dcs_from_proto(ids: &[String]) -> BTreeSet<DcId> {
    ids.iter().map(|id| DcId::new(id.as_str())).collect()
}

pub fn dcs_to_proto(dcs: &BTreeSet<DcId>) -> Vec<String> {
    dcs.iter().map(|id| id.to_string()).collect()
}
