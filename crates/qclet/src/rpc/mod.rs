//! One-shot RPC with the model server: wire types and client.

pub mod client;
pub mod protocol;

pub use client::{ClientConfig, InferError, infer};
pub use protocol::{
    Analysis, InferenceRequest, PREDICTION_HEMORRHAGE, PREDICTION_NORMAL, ReplyError, decode_reply,
};
