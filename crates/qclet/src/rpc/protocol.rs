//! Wire protocol with the model server.
//!
//! One JSON text frame per direction. The request carries only the image
//! path; the response is a flat object whose field set the worker may
//! extend at any time, so unknown fields are preserved rather than
//! rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prediction vocabulary the worker emits. The host maps these to
/// user-facing labels; this crate passes them through unchanged.
pub const PREDICTION_HEMORRHAGE: &str = "Hemorrhage";
pub const PREDICTION_NORMAL: &str = "Normal";

/// Request frame: `{"image_path": "<path>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub image_path: String,
}

impl InferenceRequest {
    pub fn new(image_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
        }
    }

    /// Serialize to the wire frame.
    ///
    /// # Panics
    ///
    /// Never in practice - a struct of one string field always serializes.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).expect("request frame serialization cannot fail")
    }
}

/// Parsed success payload of one inference.
///
/// `prediction` and `confidence_level` are the worker's minimum contract;
/// everything else is optional and absent fields stay unset. Fields this
/// crate does not know about are carried in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub prediction: String,
    pub confidence_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hemorrhage_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_hemorrhage_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midline_shift: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midline_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ventricle_issue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ventricle_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Analysis {
    pub fn is_hemorrhage(&self) -> bool {
        self.prediction == PREDICTION_HEMORRHAGE
    }
}

/// Why a received frame did not decode into an [`Analysis`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    /// The worker answered, but with its error field set instead of a
    /// result. A successful round trip is not a successful inference.
    #[error("model server reported an error: {0}")]
    Worker(String),
    #[error("malformed model server response: {0}")]
    Malformed(String),
}

/// Decode a response frame.
pub fn decode_reply(frame: &str) -> Result<Analysis, ReplyError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| ReplyError::Malformed(e.to_string()))?;

    if let Some(error) = value.get("error") {
        let message = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ReplyError::Worker(message));
    }

    serde_json::from_value(value).map_err(|e| ReplyError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_is_bit_exact() {
        let request = InferenceRequest::new("/srv/uploads/scan_0042.png");
        assert_eq!(
            request.to_frame(),
            r#"{"image_path":"/srv/uploads/scan_0042.png"}"#
        );
    }

    #[test]
    fn request_round_trip_preserves_path() {
        let request = InferenceRequest::new("D:\\uploads\\扫描.png");
        let decoded: InferenceRequest = serde_json::from_str(&request.to_frame()).unwrap();
        assert_eq!(decoded.image_path, request.image_path);
    }

    #[test]
    fn minimal_reply_leaves_optionals_unset() {
        let analysis = decode_reply(
            r#"{"prediction":"Hemorrhage","confidence_level":"high","hemorrhage_probability":0.91}"#,
        )
        .unwrap();

        assert_eq!(analysis.prediction, "Hemorrhage");
        assert_eq!(analysis.confidence_level, "high");
        assert_eq!(analysis.hemorrhage_probability, Some(0.91));
        assert!(analysis.no_hemorrhage_probability.is_none());
        assert!(analysis.midline_shift.is_none());
        assert!(analysis.device.is_none());
        assert!(analysis.extra.is_empty());
        assert!(analysis.is_hemorrhage());
    }

    #[test]
    fn full_reply_copies_all_fields() {
        let analysis = decode_reply(
            r#"{
                "prediction": "Normal",
                "confidence_level": "97.20%",
                "hemorrhage_probability": 0.028,
                "no_hemorrhage_probability": 0.972,
                "analysis_duration": 184.5,
                "midline_shift": false,
                "shift_score": 0.0,
                "midline_detail": "midline centered",
                "ventricle_issue": false,
                "ventricle_detail": "ventricles normal",
                "device": "NVIDIA GeForce RTX 3090"
            }"#,
        )
        .unwrap();

        assert_eq!(analysis.prediction, PREDICTION_NORMAL);
        assert!(!analysis.is_hemorrhage());
        assert_eq!(analysis.no_hemorrhage_probability, Some(0.972));
        assert_eq!(analysis.midline_shift, Some(false));
        assert_eq!(analysis.device.as_deref(), Some("NVIDIA GeForce RTX 3090"));
    }

    #[test]
    fn unknown_fields_land_in_extra() {
        let analysis = decode_reply(
            r#"{"prediction":"Normal","confidence_level":"low","gpu_memory_mb":8123}"#,
        )
        .unwrap();

        assert_eq!(
            analysis.extra.get("gpu_memory_mb"),
            Some(&serde_json::json!(8123))
        );
    }

    #[test]
    fn error_field_wins_over_result() {
        let err = decode_reply(r#"{"error":"Model not loaded"}"#).unwrap_err();
        assert_eq!(err, ReplyError::Worker("Model not loaded".to_string()));

        // Even alongside result-shaped fields.
        let err = decode_reply(
            r#"{"prediction":"Normal","confidence_level":"low","error":"CUDA out of memory"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ReplyError::Worker(_)));
    }

    #[test]
    fn non_string_error_is_still_a_worker_error() {
        let err = decode_reply(r#"{"error":{"code":13}}"#).unwrap_err();
        assert!(matches!(err, ReplyError::Worker(_)));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            decode_reply("not json at all"),
            Err(ReplyError::Malformed(_))
        ));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        assert!(matches!(
            decode_reply(r#"{"confidence_level":"high"}"#),
            Err(ReplyError::Malformed(_))
        ));
    }

    #[test]
    fn analysis_serializes_without_unset_fields() {
        let analysis = Analysis {
            prediction: "Normal".to_string(),
            confidence_level: "low".to_string(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&analysis).unwrap(),
            serde_json::json!({"prediction": "Normal", "confidence_level": "low"})
        );
    }
}
